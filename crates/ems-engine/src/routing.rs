//! # ems-engine::routing
//!
//! Thin façade over an external road-network router, consumed by the dispatcher
//! and the ambulance process's interpolated-position query. No router
//! implementation exists anywhere in the reference corpus, so [`HaversineRouter`]
//! is a synthetic default: straight-line distance over a constant average speed.
//! The trait is the real interface — a production deployment swaps in a real
//! routing backend behind it.

use ems_types::geo::Coordinate;

/// One leg of a route: an origin/destination pair with its travel characteristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start_point: Coordinate,
    pub end_point: Coordinate,
    /// Travel duration, in seconds.
    pub duration: f64,
    /// Travel distance, in kilometers.
    pub distance: f64,
    /// Average speed over the segment, in km/h.
    pub speed: f64,
    /// Whether this step runs on a highway. Informational only — it does not
    /// affect divertibility or any other routing decision (see DESIGN.md).
    pub on_highway: bool,
}

/// Façade over the external road-network router.
pub trait RoadRouter {
    /// Returns a flattened `sources.len() * destinations.len()` row-major matrix of
    /// segments, one per (source, destination) pair. An empty return means the
    /// router failed or the request was unservable; callers must treat an empty
    /// result as "no candidates," never as an error to propagate.
    fn compute_distances(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Vec<Segment>;

    /// Step-level decomposition of a single start/end leg, used only by the
    /// ambulance's interpolated-position query while mid-travel.
    fn compute_route(&self, start: Coordinate, end: Coordinate) -> Vec<Segment>;
}

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine(a: Coordinate, b: Coordinate) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6_371.0;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Synthetic default router: every segment is a straight line at a constant
/// average speed. Not a routing algorithm — a deterministic stand-in so the
/// simulator is runnable without an external dependency.
pub struct HaversineRouter {
    pub average_speed_kph: f64,
}

impl Default for HaversineRouter {
    fn default() -> Self {
        Self {
            average_speed_kph: 50.0,
        }
    }
}

impl RoadRouter for HaversineRouter {
    fn compute_distances(
        &self,
        sources: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Vec<Segment> {
        let mut out = Vec::with_capacity(sources.len() * destinations.len());
        for &s in sources {
            for &d in destinations {
                let distance = haversine(s, d);
                let duration = distance / self.average_speed_kph * 3_600.0;
                out.push(Segment {
                    start_point: s,
                    end_point: d,
                    duration,
                    distance,
                    speed: self.average_speed_kph,
                    on_highway: false,
                });
            }
        }
        out
    }

    fn compute_route(&self, start: Coordinate, end: Coordinate) -> Vec<Segment> {
        self.compute_distances(&[start], &[end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_symmetric_and_zero_at_identity() {
        let a = Coordinate::new(45.07, 7.69);
        let b = Coordinate::new(41.90, 12.50);
        assert!((haversine(a, b) - haversine(b, a)).abs() < 1e-9);
        assert!(haversine(a, a) < 1e-9);
    }

    #[test]
    fn compute_distances_shapes_a_row_major_matrix() {
        let router = HaversineRouter::default();
        let sources = vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)];
        let dests = vec![
            Coordinate::new(0.0, 1.0),
            Coordinate::new(1.0, 0.0),
            Coordinate::new(2.0, 2.0),
        ];
        let segments = router.compute_distances(&sources, &dests);
        assert_eq!(segments.len(), sources.len() * dests.len());
        assert_eq!(segments[0].start_point, sources[0]);
        assert_eq!(segments[0].end_point, dests[0]);
        assert_eq!(segments[3].start_point, sources[1]);
        assert_eq!(segments[3].end_point, dests[0]);
    }

    #[test]
    fn duration_scales_inversely_with_average_speed() {
        let slow = HaversineRouter {
            average_speed_kph: 25.0,
        };
        let fast = HaversineRouter {
            average_speed_kph: 100.0,
        };
        let a = Coordinate::new(45.0, 7.0);
        let b = Coordinate::new(45.5, 7.5);
        let slow_seg = &slow.compute_distances(&[a], &[b])[0];
        let fast_seg = &fast.compute_distances(&[a], &[b])[0];
        assert!(slow_seg.duration > fast_seg.duration);
    }
}
