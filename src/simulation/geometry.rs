//! Geometry calculations for reachability.
//!
//! Contains helper functions for:
//! - Squared distance (avoids a sqrt in the per-round neighbor scan)
//! - Reach tests between two positions
//! - Neighbor discovery over the host collection
//! - Placement region bounds

use serde::Deserialize;

use super::types::{HostId, Point};

/// Squared Euclidean distance in world units.
///
/// Range checks compare `d²` against `reach²`, so the square root is never
/// needed on the hot path. Every host runs one such check per other host per
/// round.
///
/// # Parameters
///
/// * `a` - First point
/// * `b` - Second point
///
/// # Returns
///
/// The squared distance (dx² + dy²).
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Whether a transmitter at `from` with the given reach covers `to`.
///
/// Co-located positions (distance 0) are never reachable, which also keeps
/// a host out of its own neighbor set. The relation is not symmetric: the
/// reach of the transmitter alone decides.
pub fn within_reach(from: &Point, reach: f64, to: &Point) -> bool {
    let d2 = distance2(from, to);
    d2 > 0.0 && d2 <= reach * reach
}

/// Find every host the given transmitter can reach.
///
/// # Parameters
///
/// * `host_id` - ID of the transmitter (excluded from the result)
/// * `position` - Current position of the transmitter
/// * `reach` - Transmitter reach in world units
/// * `others` - All hosts of the simulation with their current positions
///
/// # Returns
///
/// IDs of reachable hosts, in the iteration order of `others`.
pub fn find_neighbors<'a>(host_id: HostId, position: &Point, reach: f64, others: impl IntoIterator<Item = (HostId, &'a Point)>) -> Vec<HostId> {
    others
        .into_iter()
        .filter(|(other_id, other_position)| *other_id != host_id && within_reach(position, reach, other_position))
        .map(|(other_id, _)| other_id)
        .collect()
}

/// Axis-aligned placement region.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Region {
    #[serde(rename = "top-left-position")]
    pub top_left: Point,
    #[serde(rename = "bottom-right-position")]
    pub bottom_right: Point,
}

impl Region {
    pub fn new(top_left: Point, bottom_right: Point) -> Self {
        Self { top_left, bottom_right }
    }

    /// Normalize corners to (left, right, top, bottom).
    fn bounds(&self) -> (f64, f64, f64, f64) {
        let left = self.top_left.x.min(self.bottom_right.x);
        let right = self.top_left.x.max(self.bottom_right.x);
        let top = self.top_left.y.min(self.bottom_right.y);
        let bottom = self.top_left.y.max(self.bottom_right.y);
        (left, right, top, bottom)
    }

    /// Inclusive point-in-region test.
    pub fn contains(&self, p: &Point) -> bool {
        let (left, right, top, bottom) = self.bounds();
        p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
    }

    pub fn clamp(&self, p: Point) -> Point {
        let (left, right, top, bottom) = self.bounds();
        Point {
            x: p.x.clamp(left, right),
            y: p.y.clamp(top, bottom),
        }
    }
}
