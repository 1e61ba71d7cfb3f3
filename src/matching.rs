//! Detection-to-identity association.
//!
//! Association is greedy and detection-major: detections are visited in
//! a deterministic order and each one claims its nearest unclaimed
//! candidate within the gate. The same frame content therefore always
//! produces the same assignment, regardless of the order the detector
//! reported the boxes in.

use nalgebra::Point2;

/// Deterministic processing order over detection centroids: ascending
/// x, ties broken by ascending y, then by input index.
///
/// # Arguments
/// * `centroids` - Detection centroids in input order
///
/// # Returns
/// Indices into `centroids` in processing order
pub fn detection_order(centroids: &[Point2<f64>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..centroids.len()).collect();
    order.sort_by(|&a, &b| {
        centroids[a]
            .x
            .total_cmp(&centroids[b].x)
            .then(centroids[a].y.total_cmp(&centroids[b].y))
            .then(a.cmp(&b))
    });
    order
}

/// Greedily assign detections to candidate centroids.
///
/// Detections are visited in `order`; each unassigned one claims the
/// nearest unclaimed candidate strictly inside the gate. Entries of
/// `assignment` that are already `Some` (for example from an upstream
/// track-id pre-pass) are left alone, as are candidates already marked
/// in `claimed`.
///
/// # Arguments
/// * `order` - Processing order from [`detection_order`]
/// * `detections` - Detection centroids in input order
/// * `candidates` - Candidate identity centroids
/// * `gate` - Exclusive distance ceiling for a valid match
/// * `claimed` - Per-candidate claim flags, updated in place
/// * `assignment` - Per-detection candidate index, updated in place
pub fn claim_nearest(
    order: &[usize],
    detections: &[Point2<f64>],
    candidates: &[Point2<f64>],
    gate: f64,
    claimed: &mut [bool],
    assignment: &mut [Option<usize>],
) {
    for &det_idx in order {
        if assignment[det_idx].is_some() {
            continue;
        }

        let mut best: Option<(usize, f64)> = None;
        for (cand_idx, candidate) in candidates.iter().enumerate() {
            if claimed[cand_idx] {
                continue;
            }
            let dist = nalgebra::distance(&detections[det_idx], candidate);
            match best {
                Some((_, best_dist)) if dist >= best_dist => {}
                _ => best = Some((cand_idx, dist)),
            }
        }

        if let Some((cand_idx, dist)) = best {
            if dist < gate {
                claimed[cand_idx] = true;
                assignment[det_idx] = Some(cand_idx);
            }
        }
    }
}
