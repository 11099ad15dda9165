use tracing::debug;

use crate::core::Destination;
use crate::errors::PlacementError;

/// Check that `destinations` can absorb `totalneeded` bytes in aggregate and
/// order them by their share of the total free memory, largest first.
pub fn rank_destinations(
    mut destinations: Vec<Destination>,
    totalneeded: u64,
) -> Result<Vec<Destination>, PlacementError> {
    let totalfree: i64 = destinations.iter().map(|d| d.memfree.max(0)).sum();
    debug!(totalfree, totalneeded, "Destination capacity");

    if totalfree < totalneeded as i64 {
        return Err(PlacementError::InsufficientCapacity {
            needed: totalneeded,
            free: totalfree as u64,
        });
    }

    for dst in destinations.iter_mut() {
        dst.memperc = if totalfree > 0 {
            dst.memfree.max(0) as f64 / totalfree as f64
        } else {
            0.0
        };
    }
    destinations.sort_by(|a, b| b.memperc.total_cmp(&a.memperc));
    Ok(destinations)
}

/// Largest `memfree` first; ties keep their previous order.
pub fn sort_by_memfree(destinations: &mut [Destination]) {
    destinations.sort_by(|a, b| b.memfree.cmp(&a.memfree));
}
