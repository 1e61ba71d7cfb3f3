//! Bounded voice pool: which identities are audible right now.
//!
//! The pool owns a fixed array of slots, never more than the configured
//! global cap. Slot state is authoritative; the `voiced` flag on a
//! [`TrackedObject`] is a mirror refreshed on its own stream's frame
//! cycle. One [`VoicePool::tick`] call per stream per frame keeps every
//! transition inside a single critical section, so caps hold under any
//! interleaving of streams.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::detection::StreamId;
use crate::features::FeatureVector;
use crate::tracked_object::{ObjectId, TrackedObject};

/// Audible lifecycle stage of a bound slot.
///
/// A slot in either state counts against both caps; `Releasing` is the
/// hysteresis tail that lets a briefly occluded object take its slot
/// back without an audible retrigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// The identity was seen on its stream's latest frame.
    Voiced,
    /// The identity went unseen; the slot is held until the hysteresis
    /// deadline, then freed.
    Releasing,
}

/// Why a slot was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The hysteresis deadline passed without the identity reappearing.
    HysteresisExpired,
    /// The tracker retired the identity.
    Retired,
    /// The identity's stream was closed.
    StreamClosed,
}

/// One observable slot transition, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// A free slot was bound to an identity.
    Granted { slot: usize, identity: ObjectId },
    /// A releasing identity was seen again and keeps its slot.
    Revived { slot: usize, identity: ObjectId },
    /// A voiced identity went unseen and entered its release tail.
    Releasing { slot: usize, identity: ObjectId },
    /// A slot was freed.
    Released {
        slot: usize,
        identity: ObjectId,
        reason: ReleaseReason,
    },
    /// A higher-ranked identity displaced the holder; the grant for the
    /// new holder follows as its own event.
    Preempted {
        slot: usize,
        victim: ObjectId,
        by: ObjectId,
    },
}

/// Read-only view of one bound slot, for synthesis backends.
#[derive(Debug, Clone)]
pub struct VoiceSnapshot {
    /// Slot index, stable for the lifetime of the binding.
    pub slot: usize,
    /// Identity holding the slot.
    pub identity: ObjectId,
    /// Stream the identity lives on.
    pub stream: StreamId,
    /// Current lifecycle stage.
    pub state: VoiceState,
    /// Synthesis parameters, refreshed on every frame the identity is
    /// seen.
    pub params: FeatureVector,
}

/// Priority key: newer creation wins, then higher speed, then higher
/// identity. Total order, so contention always resolves the same way.
#[derive(Debug, Clone, Copy)]
struct Rank {
    created_at: f64,
    speed: f64,
    id: u64,
}

impl Rank {
    fn of_object(obj: &TrackedObject) -> Self {
        Self {
            created_at: obj.created_at,
            speed: obj.features.speed,
            id: obj.id.value(),
        }
    }

    fn of_binding(binding: &Binding) -> Self {
        Self {
            created_at: binding.created_at,
            speed: binding.speed,
            id: binding.identity.value(),
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .total_cmp(&other.created_at)
            .then(self.speed.total_cmp(&other.speed))
            .then(self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone)]
struct Binding {
    identity: ObjectId,
    stream: StreamId,
    state: VoiceState,
    /// Only meaningful while `Releasing`; infinity while `Voiced`.
    release_deadline: f64,
    created_at: f64,
    speed: f64,
    params: FeatureVector,
}

impl Binding {
    /// Preemption looks for the weakest holder; a releasing holder
    /// loses to any voiced one regardless of rank.
    fn victim_cmp(&self, other: &Self) -> Ordering {
        let tier = |b: &Binding| b.state == VoiceState::Voiced;
        tier(self)
            .cmp(&tier(other))
            .then(Rank::of_binding(self).cmp(&Rank::of_binding(other)))
    }
}

/// Fixed-size pool of synthesis voices shared by every stream.
pub struct VoicePool {
    slots: Vec<Option<Binding>>,
    per_stream_cap: usize,
    hysteresis: f64,
    preemption: bool,
}

impl VoicePool {
    /// Create an empty pool sized by the validated configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            slots: vec![None; config.max_voices],
            per_stream_cap: config.per_stream_cap,
            hysteresis: config.voice_release_hysteresis,
            preemption: config.preemption,
        }
    }

    /// Global slot count, bound or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots currently bound, in either state.
    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Slots currently bound to identities of one stream.
    pub fn stream_bound_count(&self, stream: &StreamId) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|b| b.stream == *stream)
            .count()
    }

    /// Slot index held by an identity, if any.
    pub fn slot_of(&self, identity: ObjectId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|b| b.identity == identity))
    }

    /// Lifecycle stage of an identity's slot, if it holds one.
    pub fn state_of(&self, identity: ObjectId) -> Option<VoiceState> {
        self.slots
            .iter()
            .flatten()
            .find(|b| b.identity == identity)
            .map(|b| b.state)
    }

    /// Snapshot of every bound slot, ascending by slot index.
    pub fn snapshot(&self) -> Vec<VoiceSnapshot> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                s.as_ref().map(|b| VoiceSnapshot {
                    slot,
                    identity: b.identity,
                    stream: b.stream.clone(),
                    state: b.state,
                    params: b.params,
                })
            })
            .collect()
    }

    /// Advance the pool by one frame of one stream.
    ///
    /// Order inside the tick: retirements free slots first, then this
    /// stream's bindings reconcile against the seen set (refresh, revive
    /// or decay), then unvoiced seen identities contend for slots
    /// best-ranked first. Hysteresis deadlines are compared against this
    /// stream's clock only, so one stream's stalled wallclock never cuts
    /// another stream's tails short.
    ///
    /// # Arguments
    /// * `stream` - Stream whose frame cycle this is
    /// * `now` - Frame timestamp on that stream's clock
    /// * `objects` - The stream's live identities; voice mirrors are
    ///   synced in place
    /// * `seen` - Identities observed this frame
    /// * `retired` - Identities the tracker retired this frame
    ///
    /// # Returns
    /// Slot transitions in the order they happened
    pub fn tick(
        &mut self,
        stream: &StreamId,
        now: f64,
        objects: &mut [TrackedObject],
        seen: &[ObjectId],
        retired: &[ObjectId],
    ) -> Vec<VoiceEvent> {
        let mut events = Vec::new();

        for &identity in retired {
            self.release(identity, ReleaseReason::Retired, &mut events);
        }

        let seen: HashSet<ObjectId> = seen.iter().copied().collect();
        self.reconcile(stream, now, objects, &seen, &mut events);

        let mut candidates: Vec<&TrackedObject> = objects
            .iter()
            .filter(|obj| seen.contains(&obj.id) && self.slot_of(obj.id).is_none())
            .collect();
        candidates.sort_by(|a, b| Rank::of_object(b).cmp(&Rank::of_object(a)));
        for candidate in candidates {
            self.try_bind(candidate, &mut events);
        }

        for obj in objects.iter_mut() {
            let state = self.state_of(obj.id);
            obj.voiced = state.is_some();
            if state == Some(VoiceState::Voiced) && seen.contains(&obj.id) {
                obj.last_voiced_at = Some(now);
            }
        }

        events
    }

    /// Free every slot bound to one stream, for stream shutdown.
    pub fn release_stream(&mut self, stream: &StreamId) -> Vec<VoiceEvent> {
        let mut events = Vec::new();
        for (slot_idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|b| b.stream == *stream) {
                if let Some(binding) = slot.take() {
                    debug!(stream = %stream, id = %binding.identity, slot = slot_idx, "voice released, stream closed");
                    events.push(VoiceEvent::Released {
                        slot: slot_idx,
                        identity: binding.identity,
                        reason: ReleaseReason::StreamClosed,
                    });
                }
            }
        }
        events
    }

    /// Refresh, revive or decay this stream's bindings.
    fn reconcile(
        &mut self,
        stream: &StreamId,
        now: f64,
        objects: &[TrackedObject],
        seen: &HashSet<ObjectId>,
        events: &mut Vec<VoiceEvent>,
    ) {
        for (slot_idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(binding) = slot else { continue };
            if binding.stream != *stream {
                continue;
            }

            if seen.contains(&binding.identity) {
                if binding.state == VoiceState::Releasing {
                    binding.state = VoiceState::Voiced;
                    binding.release_deadline = f64::INFINITY;
                    debug!(stream = %stream, id = %binding.identity, slot = slot_idx, "voice revived");
                    events.push(VoiceEvent::Revived {
                        slot: slot_idx,
                        identity: binding.identity,
                    });
                }
                if let Some(obj) = objects.iter().find(|o| o.id == binding.identity) {
                    binding.params = obj.features;
                    binding.speed = obj.features.speed;
                }
            } else {
                match binding.state {
                    VoiceState::Voiced => {
                        binding.state = VoiceState::Releasing;
                        binding.release_deadline = now + self.hysteresis;
                        debug!(stream = %stream, id = %binding.identity, slot = slot_idx, "voice releasing");
                        events.push(VoiceEvent::Releasing {
                            slot: slot_idx,
                            identity: binding.identity,
                        });
                    }
                    VoiceState::Releasing if now > binding.release_deadline => {
                        let identity = binding.identity;
                        *slot = None;
                        debug!(stream = %stream, id = %identity, slot = slot_idx, "voice released, hysteresis expired");
                        events.push(VoiceEvent::Released {
                            slot: slot_idx,
                            identity,
                            reason: ReleaseReason::HysteresisExpired,
                        });
                    }
                    VoiceState::Releasing => {}
                }
            }
        }
    }

    /// Bind one candidate if a slot can be found for it.
    fn try_bind(&mut self, candidate: &TrackedObject, events: &mut Vec<VoiceEvent>) {
        let global_full = self.bound_count() >= self.capacity();
        let stream_full = self.stream_bound_count(&candidate.stream) >= self.per_stream_cap;

        if !global_full && !stream_full {
            if let Some(slot_idx) = self.slots.iter().position(|s| s.is_none()) {
                self.bind(slot_idx, candidate);
                events.push(VoiceEvent::Granted {
                    slot: slot_idx,
                    identity: candidate.id,
                });
            }
            return;
        }

        if !self.preemption {
            return;
        }

        // The binding constraint picks the victim set: a full stream
        // quota can only be rebalanced within that stream, a full global
        // pool can take from any stream.
        let victim_stream = stream_full.then_some(&candidate.stream);
        let Some((slot_idx, victim, victim_voiced, victim_rank)) = self.weakest_bound(victim_stream)
        else {
            return;
        };

        let outranked = !victim_voiced
            || Rank::of_object(candidate).cmp(&victim_rank) == Ordering::Greater;
        if !outranked {
            return;
        }

        self.slots[slot_idx] = None;
        warn!(id = %victim, by = %candidate.id, slot = slot_idx, "voice preempted");
        events.push(VoiceEvent::Preempted {
            slot: slot_idx,
            victim,
            by: candidate.id,
        });
        self.bind(slot_idx, candidate);
        events.push(VoiceEvent::Granted {
            slot: slot_idx,
            identity: candidate.id,
        });
    }

    fn bind(&mut self, slot_idx: usize, obj: &TrackedObject) {
        debug!(stream = %obj.stream, id = %obj.id, slot = slot_idx, "voice granted");
        self.slots[slot_idx] = Some(Binding {
            identity: obj.id,
            stream: obj.stream.clone(),
            state: VoiceState::Voiced,
            release_deadline: f64::INFINITY,
            created_at: obj.created_at,
            speed: obj.features.speed,
            params: obj.features,
        });
    }

    /// Lowest-priority holder, optionally restricted to one stream.
    fn weakest_bound(&self, stream: Option<&StreamId>) -> Option<(usize, ObjectId, bool, Rank)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.as_ref().map(|b| (idx, b)))
            .filter(|(_, b)| stream.map_or(true, |s| b.stream == *s))
            .min_by(|(_, a), (_, b)| a.victim_cmp(b))
            .map(|(idx, b)| {
                (
                    idx,
                    b.identity,
                    b.state == VoiceState::Voiced,
                    Rank::of_binding(b),
                )
            })
    }

    fn release(&mut self, identity: ObjectId, reason: ReleaseReason, events: &mut Vec<VoiceEvent>) {
        // Releasing an identity that holds nothing is a no-op.
        for (slot_idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|b| b.identity == identity) {
                *slot = None;
                debug!(id = %identity, slot = slot_idx, reason = ?reason, "voice released");
                events.push(VoiceEvent::Released {
                    slot: slot_idx,
                    identity,
                    reason,
                });
                return;
            }
        }
    }
}
