//! Integration tests for the scorevox engine.
//!
//! These tests drive whole frame cycles through ingest, tracking,
//! voicing and emission, across one or more streams.

use scorevox::{
    BoundingBox, Engine, EngineConfig, FixedAnalyzer, FrameGeometry, RawDetection, RegionStats,
    ReleaseReason, ScoreWriter, VoiceEvent, VoiceState,
};

fn geometry() -> FrameGeometry {
    FrameGeometry::new(640.0, 480.0).unwrap()
}

fn box_at(cx: f64, cy: f64) -> RawDetection {
    RawDetection::new(0, BoundingBox::new(cx - 16.0, cy - 12.0, 32.0, 24.0), 0.9)
}

// =============================================================================
// Test 1: Caps hold under churn
// =============================================================================

#[test]
fn test_caps_hold_under_churn() {
    let engine = Engine::new(EngineConfig {
        max_voices: 3,
        per_stream_cap: 2,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut cam_a = engine.open_stream("camA", geometry(), FixedAnalyzer::default());
    let mut cam_b = engine.open_stream("camB", geometry(), FixedAnalyzer::default());

    for frame in 0..60 {
        let t = frame as f64 / 30.0;

        // camA: five objects drifting right, vanishing one by one.
        let a_count = 5 - (frame / 15).min(4) as usize;
        let a_boxes: Vec<RawDetection> = (0..a_count)
            .map(|i| box_at(60.0 + i as f64 * 100.0 + frame as f64, 100.0))
            .collect();
        cam_a.process_frame(&(), a_boxes, t);

        // camB: four objects, appearing over time.
        let b_count = 1 + (frame / 10).min(3) as usize;
        let b_boxes: Vec<RawDetection> = (0..b_count)
            .map(|i| box_at(80.0 + i as f64 * 120.0, 300.0))
            .collect();
        cam_b.process_frame(&(), b_boxes, t);

        assert!(
            engine.voiced_count() <= 3,
            "frame {}: global cap exceeded with {} bound voices",
            frame,
            engine.voiced_count()
        );
        for stream in ["camA", "camB"] {
            let per_stream = engine
                .voice_snapshot()
                .iter()
                .filter(|v| v.stream.as_str() == stream)
                .count();
            assert!(
                per_stream <= 2,
                "frame {}: {} holds {} voices over its cap",
                frame,
                stream,
                per_stream
            );
        }
    }
}

// =============================================================================
// Test 2: Identities persist, retire, and never come back
// =============================================================================

#[test]
fn test_identity_lifecycle_across_retirement() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut pipeline = engine.open_stream("camA", geometry(), FixedAnalyzer::default());

    let first = pipeline.process_frame(&(), vec![box_at(100.0, 100.0)], 0.0);
    let original = first.created[0];

    // Seen for a second, drifting slowly.
    for frame in 1..30 {
        let t = frame as f64 / 30.0;
        let report = pipeline.process_frame(&(), vec![box_at(100.0 + frame as f64, 100.0)], t);
        assert!(report.created.is_empty(), "frame {frame}: drift must not mint identities");
        assert_eq!(report.records[0].object_id, original);
    }

    // Gone for longer than the 3 s idle timeout.
    let mut retired_at = None;
    for frame in 30..150 {
        let t = frame as f64 / 30.0;
        let report = pipeline.process_frame(&(), vec![], t);
        if !report.retired.is_empty() {
            retired_at = Some(t);
            assert_eq!(report.retired, vec![original]);
            break;
        }
    }
    let retired_at = retired_at.expect("identity should retire after the idle timeout");
    assert!(retired_at > 3.9 && retired_at < 4.1, "retired at {retired_at}, expected just past 0.97+3.0");

    // Same spot, new identity.
    let reborn = pipeline.process_frame(&(), vec![box_at(129.0, 100.0)], retired_at + 0.1);
    assert_eq!(reborn.created.len(), 1);
    assert!(reborn.created[0] > original, "identities are never reused");
}

// =============================================================================
// Test 3: Same input, byte-identical CSV
// =============================================================================

#[test]
fn test_emission_is_deterministic() {
    let run = || {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let analyzer = FixedAnalyzer::new(
            RegionStats {
                hue: 120.0,
                saturation: 0.5,
                value: 0.6,
                edge_density: 0.2,
                shape_score: 0.1,
            },
            0.25,
        );
        let mut pipeline = engine.open_stream("camA", geometry(), analyzer);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        let mut writer = ScoreWriter::create(&path, false).unwrap();
        for frame in 0..20 {
            let t = frame as f64 / 30.0;
            let report = pipeline.process_frame(
                &(),
                vec![box_at(100.0 + frame as f64 * 2.0, 100.0), box_at(400.0, 240.0)],
                t,
            );
            writer.write_frame(&report.records).unwrap();
        }
        writer.flush().unwrap();
        std::fs::read(&path).unwrap()
    };

    assert_eq!(run(), run(), "identical runs must produce identical files");
}

// =============================================================================
// Test 4: Hysteresis keeps the identity and the slot
// =============================================================================

#[test]
fn test_brief_occlusion_keeps_id_and_slot() {
    // Retirement and release tuned to the same 3 s window.
    let engine = Engine::new(EngineConfig {
        idle_retire_timeout: 3.0,
        voice_release_hysteresis: 3.0,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut pipeline = engine.open_stream("camA", geometry(), FixedAnalyzer::default());

    let first = pipeline.process_frame(&(), vec![box_at(100.0, 100.0)], 0.0);
    let id = first.created[0];
    let slot = match first.events[..] {
        [VoiceEvent::Granted { slot, identity }] => {
            assert_eq!(identity, id);
            slot
        }
        ref other => panic!("expected a single grant, got {other:?}"),
    };

    // Occluded for 2.9 s, just inside both windows.
    pipeline.process_frame(&(), vec![], 1.0);
    let back = pipeline.process_frame(&(), vec![box_at(102.0, 100.0)], 2.9);
    assert!(back.created.is_empty(), "occlusion shorter than the timeout must not mint an identity");
    assert_eq!(back.records[0].object_id, id);
    assert!(back
        .events
        .iter()
        .any(|e| matches!(e, VoiceEvent::Revived { slot: s, identity } if *s == slot && *identity == id)));

    // Gone for good: the release tail expires, then the tracker retires it.
    let tail_start = pipeline.process_frame(&(), vec![], 3.0);
    assert!(tail_start.events.iter().any(|e| matches!(e, VoiceEvent::Releasing { .. })));

    let expired = pipeline.process_frame(&(), vec![], 6.1);
    assert!(
        expired.retired.contains(&id),
        "3.1 s unseen must retire the identity"
    );
    assert!(expired
        .events
        .iter()
        .any(|e| matches!(e, VoiceEvent::Released { identity, .. } if *identity == id)));
    assert_eq!(engine.voiced_count(), 0);
}

// =============================================================================
// Test 5: Newest-wins contention for a single slot
// =============================================================================

#[test]
fn test_newest_wins_then_elder_inherits() {
    let engine = Engine::new(EngineConfig {
        max_voices: 1,
        per_stream_cap: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut pipeline = engine.open_stream("camA", geometry(), FixedAnalyzer::default());

    // Two objects appear in the same frame; the later-created (rightmost,
    // higher id) one takes the only slot.
    let first = pipeline.process_frame(&(), vec![box_at(100.0, 100.0), box_at(400.0, 100.0)], 0.0);
    let elder = first.created[0];
    let newest = first.created[1];
    assert!(newest > elder);

    let voiced: Vec<_> = first.records.iter().filter(|r| r.voiced).collect();
    assert_eq!(voiced.len(), 1);
    assert_eq!(voiced[0].object_id, newest, "newest identity wins the slot");

    pipeline.process_frame(&(), vec![box_at(101.0, 100.0), box_at(401.0, 100.0)], 0.9);

    // The winner disappears; its tail must expire before the elder binds.
    let tail = pipeline.process_frame(&(), vec![box_at(102.0, 100.0)], 1.0);
    assert!(!tail.records[0].voiced, "elder still waiting out the tail");

    let inside_tail = pipeline.process_frame(&(), vec![box_at(103.0, 100.0)], 2.9);
    assert!(!inside_tail.records[0].voiced);

    // Past the 1.0 + 2.0 s deadline the slot frees and the elder takes it
    // within the same frame cycle, while the winner is still tracked.
    let after = pipeline.process_frame(&(), vec![box_at(104.0, 100.0)], 3.1);
    assert!(after.retired.is_empty(), "the winner is occluded, not retired");
    assert!(after.records[0].voiced, "freed slot goes to the surviving object");
    assert!(after.events.iter().any(|e| matches!(
        e,
        VoiceEvent::Released { identity, reason: ReleaseReason::HysteresisExpired, .. }
            if *identity == newest
    )));
    assert!(after
        .events
        .iter()
        .any(|e| matches!(e, VoiceEvent::Granted { identity, .. } if *identity == elder)));
}

// =============================================================================
// Test 6: Single-detection feature scenario, end to end
// =============================================================================

#[test]
fn test_single_detection_csv_row() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut pipeline = engine.open_stream("camA", geometry(), FixedAnalyzer::default());

    // Centroid (100, 100), box area exactly 1% of the 640x480 frame.
    let raw = RawDetection::new(5, BoundingBox::new(68.0, 76.0, 64.0, 48.0), 0.9);
    let report = pipeline.process_frame(&(), vec![raw], 0.0);

    assert_eq!(report.records.len(), 1);
    let row = report.records[0].to_csv_row(false);
    assert_eq!(
        row,
        "0.000,camA,0,5,-123.75,17.50,0.990,0.000,0.900,0.000,0.0,0.000,0.000,0.000"
    );
}

// =============================================================================
// Test 7: Two streams contending for one global slot
// =============================================================================

#[test]
fn test_second_stream_waits_for_hysteresis() {
    let engine = Engine::new(EngineConfig {
        max_voices: 1,
        per_stream_cap: 1,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut cam_a = engine.open_stream("camA", geometry(), FixedAnalyzer::default());
    let mut cam_b = engine.open_stream("camB", geometry(), FixedAnalyzer::default());

    let a_first = cam_a.process_frame(&(), vec![box_at(100.0, 100.0)], 0.0);
    let a_id = a_first.created[0];
    assert_eq!(a_id.value(), 0);
    assert!(a_first.records[0].voiced, "first stream takes the only slot");

    let b_first = cam_b.process_frame(&(), vec![box_at(200.0, 200.0)], 0.0);
    let b_id = b_first.created[0];
    assert_eq!(b_id.value(), 1);
    assert!(!b_first.records[0].voiced, "no free slot and no preemption by default");

    // A's object disappears after t=0.9; B keeps being seen but must
    // wait out A's release tail.
    cam_a.process_frame(&(), vec![box_at(100.0, 100.0)], 0.9);
    cam_a.process_frame(&(), vec![], 1.0);
    let b_waiting = cam_b.process_frame(&(), vec![box_at(200.0, 200.0)], 1.5);
    assert!(!b_waiting.records[0].voiced);

    let b_still_waiting = cam_b.process_frame(&(), vec![box_at(200.0, 200.0)], 2.9);
    assert!(!b_still_waiting.records[0].voiced, "tail expires on A's clock, not B's");

    // A's tick past the 1.0 + 2.0 s deadline frees the slot.
    let a_release = cam_a.process_frame(&(), vec![], 3.1);
    assert!(a_release.retired.is_empty());
    assert!(a_release.events.iter().any(|e| matches!(
        e,
        VoiceEvent::Released { identity, reason: ReleaseReason::HysteresisExpired, .. }
            if *identity == a_id
    )));

    let b_bound = cam_b.process_frame(&(), vec![box_at(200.0, 200.0)], 3.2);
    assert!(b_bound.records[0].voiced);
    assert!(b_bound
        .events
        .iter()
        .any(|e| matches!(e, VoiceEvent::Granted { identity, .. } if *identity == b_id)));
}

// =============================================================================
// Test 8: Zero caps track and score but never voice
// =============================================================================

#[test]
fn test_zero_voices_is_a_silent_tracker() {
    let engine = Engine::new(EngineConfig {
        max_voices: 0,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut pipeline = engine.open_stream("camA", geometry(), FixedAnalyzer::default());

    for frame in 0..10 {
        let t = frame as f64 / 30.0;
        let report = pipeline.process_frame(&(), vec![box_at(100.0, 100.0), box_at(300.0, 200.0)], t);
        assert_eq!(report.records.len(), 2, "records still emit");
        assert!(report.events.is_empty(), "no slots, no events");
        assert!(report.records.iter().all(|r| !r.voiced));
    }
    assert_eq!(engine.voiced_count(), 0);
}

// =============================================================================
// Test 9: CSV file shape over a full run
// =============================================================================

#[test]
fn test_csv_file_shape() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let analyzer = FixedAnalyzer::new(
        RegionStats {
            hue: 33.3,
            saturation: 0.4,
            value: 0.7,
            edge_density: 0.15,
            shape_score: 0.6,
        },
        0.1,
    );
    let mut pipeline = engine.open_stream("camA", geometry(), analyzer);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scores.csv");
    {
        let mut writer = ScoreWriter::create(&path, false).unwrap();
        for frame in 0..5 {
            let t = frame as f64 / 30.0;
            let report =
                pipeline.process_frame(&(), vec![box_at(120.0, 90.0), box_at(500.0, 400.0)], t);
            writer.write_frame(&report.records).unwrap();
        }
    }

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "t,stream,oid,cls,az,el,dist,spd,conf,glitch,hue,sat,val,edge");
    assert_eq!(lines.len(), 11, "header plus two rows per frame");

    for line in &lines[1..] {
        let columns: Vec<&str> = line.split(',').collect();
        assert_eq!(columns.len(), 14, "row has a fixed column count: {line}");
        assert_eq!(columns[1], "camA");

        let azimuth: f64 = columns[4].parse().unwrap();
        assert!((-180.0..180.0).contains(&azimuth));
        let elevation: f64 = columns[5].parse().unwrap();
        assert!((-30.0..=30.0).contains(&elevation));
        let distance: f64 = columns[6].parse().unwrap();
        assert!(distance > 0.0 && distance <= 1.0);
        let hue: f64 = columns[10].parse().unwrap();
        assert!((0.0..360.0).contains(&hue));
    }

    // Rows within one frame ascend by object id.
    for pair in lines[1..].chunks(2) {
        let first: u64 = pair[0].split(',').nth(2).unwrap().parse().unwrap();
        let second: u64 = pair[1].split(',').nth(2).unwrap().parse().unwrap();
        assert!(first < second, "frame rows must ascend by oid");
    }
}

// =============================================================================
// Test 10: Two streams on two threads, one pool
// =============================================================================

#[test]
fn test_parallel_streams_respect_caps() {
    let engine = Engine::new(EngineConfig {
        max_voices: 4,
        per_stream_cap: 2,
        ..EngineConfig::default()
    })
    .unwrap();

    let mut cam_a = engine.open_stream("camA", geometry(), FixedAnalyzer::default());
    let mut cam_b = engine.open_stream("camB", geometry(), FixedAnalyzer::default());

    std::thread::scope(|scope| {
        let engine_ref = &engine;
        scope.spawn(move || {
            for frame in 0..100 {
                let t = frame as f64 / 30.0;
                let boxes = (0..3)
                    .map(|i| box_at(60.0 + i as f64 * 150.0 + frame as f64, 100.0))
                    .collect();
                cam_a.process_frame(&(), boxes, t);
                assert!(engine_ref.voiced_count() <= 4, "global cap must hold mid-run");
            }
        });
        scope.spawn(move || {
            for frame in 0..100 {
                let t = frame as f64 / 30.0;
                let boxes = (0..3)
                    .map(|i| box_at(80.0 + i as f64 * 150.0, 350.0 - frame as f64))
                    .collect();
                cam_b.process_frame(&(), boxes, t);
                assert!(engine_ref.voiced_count() <= 4, "global cap must hold mid-run");
            }
        });
    });

    assert_eq!(engine.identities_issued(), 6, "three identities per stream");
    assert!(engine.voiced_count() <= 4);
    for stream in ["camA", "camB"] {
        let per_stream = engine
            .voice_snapshot()
            .iter()
            .filter(|v| v.stream.as_str() == stream)
            .count();
        assert!(per_stream <= 2, "{stream} exceeded its per-stream cap");
    }
}

// =============================================================================
// Test 11: Preemption rebalances within the binding constraint
// =============================================================================

#[test]
fn test_preemption_across_streams() {
    let engine = Engine::new(EngineConfig {
        max_voices: 1,
        per_stream_cap: 1,
        preemption: true,
        ..EngineConfig::default()
    })
    .unwrap();
    let mut cam_a = engine.open_stream("camA", geometry(), FixedAnalyzer::default());
    let mut cam_b = engine.open_stream("camB", geometry(), FixedAnalyzer::default());

    let a_first = cam_a.process_frame(&(), vec![box_at(100.0, 100.0)], 0.0);
    assert!(a_first.records[0].voiced);

    // B's newer object takes the slot immediately, skipping hysteresis.
    let b_first = cam_b.process_frame(&(), vec![box_at(200.0, 200.0)], 0.5);
    assert!(b_first.records[0].voiced);
    assert!(b_first.events.iter().any(|e| matches!(
        e,
        VoiceEvent::Preempted { victim, .. } if victim.value() == 0
    )));

    // A's object is still tracked; its mirror catches up on A's next tick.
    let a_next = cam_a.process_frame(&(), vec![box_at(101.0, 100.0)], 1.0);
    assert!(!a_next.records[0].voiced);
    assert_eq!(engine.voiced_count(), 1);

    let snapshot = engine.voice_snapshot();
    assert_eq!(snapshot[0].stream.as_str(), "camB");
    assert_eq!(snapshot[0].state, VoiceState::Voiced);
}
