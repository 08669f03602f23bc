//! The per-bus route model: an ordered, circular sequence of stops.
//!
//! Two conventions for "where is the bus" coexist and are deliberately kept
//! apart. Driver-reported progress uses the cleared-stop counter; views with
//! no trusted counter fall back to the raw GPS nearest-stop scan. The call
//! sites are not interchangeable, so each convention is its own strategy.

use serde::Serialize;

use crate::geo::haversine_distance;

/// One route entry joined with its stop, ordered by `stop_order`.
#[derive(Debug, Clone, Serialize)]
pub struct RouteStop {
    #[serde(rename = "id")]
    pub entry_id: i64,
    pub bus_id: i64,
    pub stop_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub stop_order: i64,
    pub time_from_start: f64,
}

/// Position of a bus along the circular route, as slice indices.
///
/// `current` is the last cleared stop under cleared-count indexing and the
/// nearest stop under closest-point indexing; `next` always follows it
/// circularly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWindow {
    pub current: usize,
    pub next: usize,
}

/// Strategy for locating a bus along its route.
pub trait StopIndexer {
    /// `None` when the route is empty or the strategy has no usable input.
    fn window(&self, stops: &[RouteStop]) -> Option<StopWindow>;
}

/// Index by the driver-maintained cleared-stop counter.
///
/// A counter of `k > 0` puts the last cleared stop at `(k - 1) mod N` and the
/// next stop at `k mod N`. A counter of 0 means the bus sits between the end
/// of the previous lap and the start of this one: last cleared is the final
/// entry, next is the first. Out-of-range counters (an accepted
/// initialize-trip override) normalize modulo the route length.
pub struct ClearedCountIndex {
    pub stops_cleared: i64,
}

impl StopIndexer for ClearedCountIndex {
    fn window(&self, stops: &[RouteStop]) -> Option<StopWindow> {
        if stops.is_empty() {
            return None;
        }
        let n = stops.len();
        let k = self.stops_cleared.rem_euclid(n as i64) as usize;
        Some(StopWindow {
            current: (k + n - 1) % n,
            next: k,
        })
    }
}

/// Index by raw GPS distance: the nearest stop is taken as current.
pub struct NearestStopIndex {
    pub latitude: f64,
    pub longitude: f64,
}

impl StopIndexer for NearestStopIndex {
    fn window(&self, stops: &[RouteStop]) -> Option<StopWindow> {
        // TODO: Use a spatial index to speed this up
        let mut best = None;
        let mut best_dist = f64::MAX;
        for (i, stop) in stops.iter().enumerate() {
            let dist =
                haversine_distance(self.latitude, self.longitude, stop.latitude, stop.longitude);
            if dist < best_dist {
                best_dist = dist;
                best = Some(i);
            }
        }
        let current = best?;
        Some(StopWindow {
            current,
            next: (current + 1) % stops.len(),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_route(coords: &[(f64, f64)]) -> Vec<RouteStop> {
    coords
        .iter()
        .enumerate()
        .map(|(i, (lat, lon))| RouteStop {
            entry_id: i as i64 + 1,
            bus_id: 1,
            stop_id: i as i64 + 101,
            name: format!("Stop {}", i + 1),
            latitude: *lat,
            longitude: *lon,
            stop_order: i as i64 + 1,
            time_from_start: i as f64 * 10.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(k: i64, stops: &[RouteStop]) -> StopWindow {
        ClearedCountIndex { stops_cleared: k }.window(stops).unwrap()
    }

    #[test]
    fn cleared_count_window_over_three_stops() {
        let stops = test_route(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);

        // Not started: circularly adjacent to the end of the previous lap.
        assert_eq!(window(0, &stops), StopWindow { current: 2, next: 0 });
        assert_eq!(window(1, &stops), StopWindow { current: 0, next: 1 });
        assert_eq!(window(2, &stops), StopWindow { current: 1, next: 2 });
        // A full lap's counter wraps back to the not-started window.
        assert_eq!(window(3, &stops), StopWindow { current: 2, next: 0 });
        // Out-of-range override normalizes modulo the route length.
        assert_eq!(window(5, &stops), StopWindow { current: 1, next: 2 });
    }

    #[test]
    fn cleared_count_single_stop_route() {
        let stops = test_route(&[(0.0, 0.0)]);
        assert_eq!(window(0, &stops), StopWindow { current: 0, next: 0 });
        assert_eq!(window(1, &stops), StopWindow { current: 0, next: 0 });
    }

    #[test]
    fn cleared_count_empty_route() {
        assert_eq!(
            ClearedCountIndex { stops_cleared: 0 }.window(&[]),
            None
        );
    }

    #[test]
    fn nearest_stop_picks_minimum_distance() {
        let stops = test_route(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let sample = NearestStopIndex {
            latitude: 0.0,
            longitude: 1.1,
        };
        assert_eq!(
            sample.window(&stops),
            Some(StopWindow { current: 1, next: 2 })
        );
    }

    #[test]
    fn nearest_stop_wraps_after_last() {
        let stops = test_route(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let sample = NearestStopIndex {
            latitude: 0.0,
            longitude: 2.3,
        };
        assert_eq!(
            sample.window(&stops),
            Some(StopWindow { current: 2, next: 0 })
        );
    }

    #[test]
    fn nearest_stop_rejects_unusable_sample() {
        let stops = test_route(&[(0.0, 0.0), (0.0, 1.0)]);
        let sample = NearestStopIndex {
            latitude: f64::NAN,
            longitude: 1.0,
        };
        assert_eq!(sample.window(&stops), None);
    }
}
