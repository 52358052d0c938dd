//! Overlap suppression for detector output.
//!
//! This is deliberately not IoU non-maximum suppression: a region is dropped
//! only when it is strictly smaller than another region that covers more than
//! half of it. Equal-area duplicates both survive.

use crate::types::Region;

/// Fraction of the smaller region's area that an intersection must exceed.
const OVERLAP_FRACTION: f64 = 0.5;

/// Remove regions that are strictly smaller than an overlapping neighbour.
///
/// Every region is judged against the full input, so the decision for one
/// region never depends on whether another region was itself dropped. The
/// largest region of a non-empty input always survives. Output keeps input
/// order.
pub fn filter_overlapping(regions: &[Region]) -> Vec<Region> {
    if regions.len() <= 1 {
        return regions.to_vec();
    }

    let kept: Vec<Region> = regions
        .iter()
        .enumerate()
        .filter(|&(i, candidate)| {
            !regions.iter().enumerate().any(|(j, other)| {
                i != j && overlaps(candidate, other) && candidate.area() < other.area()
            })
        })
        .map(|(_, r)| *r)
        .collect();

    if kept.len() < regions.len() {
        tracing::debug!(
            input = regions.len(),
            kept = kept.len(),
            "suppressed overlapping regions"
        );
    }

    kept
}

/// Intersection exceeds half the area of the smaller of the two regions.
fn overlaps(a: &Region, b: &Region) -> bool {
    let smaller = a.area().min(b.area()) as f64;
    a.intersection_area(b) as f64 > OVERLAP_FRACTION * smaller
}
