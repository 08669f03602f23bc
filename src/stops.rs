//! Stop directory and the stop-to-stop connection search riders use to find
//! which buses link two stops, with clock times lifted off each bus's
//! current-repetition schedule.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use warp::{Rejection, Reply};

use crate::error::{reject, ApiError};
use crate::route::RouteStop;
use crate::schedule;
use crate::store::SqliteStore;
use crate::web::AppData;

#[derive(Debug, Deserialize)]
pub struct ConnectionsQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentEndpoint {
    pub id: i64,
    pub name: String,
    pub order: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentRoute {
    pub from_stop: SegmentEndpoint,
    pub to_stop: SegmentEndpoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentTimes {
    pub bus_start: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSegment {
    pub id: i64,
    pub display_id: String,
    pub name: String,
    pub current_trip: i64,
    pub total_trips: i64,
    pub trip_number: i64,
    pub route: SegmentRoute,
    pub times: SegmentTimes,
}

fn endpoint(stop: &RouteStop) -> SegmentEndpoint {
    SegmentEndpoint {
        id: stop.stop_id,
        name: stop.name.clone(),
        order: stop.stop_order,
    }
}

/// All rideable segments between two stops. A segment pairs a boarding
/// occurrence of `from` with a later occurrence of `to`, as long as the bus
/// does not pass `from` again in between (riders would board there instead).
/// Buses without a schedule for their current repetition are left out.
pub fn find_connections(
    store: &SqliteStore,
    from: i64,
    to: i64,
    now: NaiveDateTime,
) -> Result<Vec<ConnectionSegment>, ApiError> {
    let mut segments = Vec::new();

    for bus_id in store.buses_serving_both(from, to)? {
        let bus = match store.bus(bus_id)? {
            Some(bus) => bus,
            None => continue,
        };
        let literal = match store.start_time_for(bus_id, bus.current_rep)? {
            Some(literal) => literal,
            None => continue,
        };
        let start = match schedule::parse_start_time(&literal) {
            Some(start) => start,
            None => continue,
        };
        let start_instant = schedule::resolve_start_instant(start, now);

        let route = store.route_stops(bus_id)?;
        let boardings: Vec<&RouteStop> = route.iter().filter(|s| s.stop_id == from).collect();
        let arrivals: Vec<&RouteStop> = route.iter().filter(|s| s.stop_id == to).collect();

        for f in &boardings {
            for t in &arrivals {
                if t.stop_order <= f.stop_order {
                    continue;
                }
                let reboards = boardings.iter().any(|other| {
                    other.stop_order > f.stop_order && other.stop_order < t.stop_order
                });
                if reboards {
                    continue;
                }
                let departure = schedule::stop_instant(start_instant, f.time_from_start);
                let arrival = schedule::stop_instant(start_instant, t.time_from_start);
                segments.push(ConnectionSegment {
                    id: bus.id,
                    display_id: format!("{}-{}-{}", bus.id, f.stop_order, t.stop_order),
                    name: bus.name.clone(),
                    current_trip: bus.current_rep,
                    total_trips: bus.total_rep,
                    trip_number: bus.current_rep,
                    route: SegmentRoute {
                        from_stop: endpoint(f),
                        to_stop: endpoint(t),
                    },
                    times: SegmentTimes {
                        bus_start: literal.clone(),
                        departure_time: schedule::format_hhmm(departure),
                        arrival_time: schedule::format_hhmm(arrival),
                        duration_minutes: (t.time_from_start - f.time_from_start).round()
                            as i64,
                    },
                });
            }
        }
    }

    if segments.is_empty() {
        return Err(ApiError::NotFound(
            "No buses found for this route".to_string(),
        ));
    }
    Ok(segments)
}

pub async fn list_stops(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let stops = ad.store.stops_by_name().map_err(reject)?;
    Ok(warp::reply::json(&stops))
}

pub async fn get_connections(
    query: ConnectionsQuery,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (from, to) = match (query.from, query.to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            return Err(reject(ApiError::Validation(
                "Missing 'from' or 'to' stop ID".to_string(),
            )))
        }
    };
    let segments =
        find_connections(&ad.store, from, to, Local::now().naive_local()).map_err(reject)?;
    Ok(warp::reply::json(&segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    // Bus 1 runs a scheduled loop A -> B -> C -> A; bus 2 serves A and B but
    // has no start time for its current repetition.
    fn fixture() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        let loop_bus = store.add_bus("Campus Loop").unwrap();
        let east = store.add_bus("East Loop").unwrap();
        let a = store.add_stop("Main Gate", 22.3190, 87.3091).unwrap();
        let b = store.add_stop("Library", 22.3177, 87.3055).unwrap();
        let c = store.add_stop("Hijli Hostel", 22.3312, 87.3072).unwrap();

        store.add_route_entry(loop_bus.id, a.id, 1, 0.0).unwrap();
        store.add_route_entry(loop_bus.id, b.id, 2, 5.0).unwrap();
        store.add_route_entry(loop_bus.id, c.id, 3, 15.0).unwrap();
        store.add_route_entry(loop_bus.id, a.id, 4, 25.0).unwrap();
        store.add_start_time(loop_bus.id, 1, "08:00:00").unwrap();

        store.add_route_entry(east.id, a.id, 1, 0.0).unwrap();
        store.add_route_entry(east.id, b.id, 2, 8.0).unwrap();

        store
    }

    #[test]
    fn finds_the_forward_segment_with_schedule_times() {
        let store = fixture();
        let segments = find_connections(&store, 1, 2, at(9, 0)).unwrap();

        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.name, "Campus Loop");
        assert_eq!(seg.display_id, "1-1-2");
        assert_eq!(seg.route.from_stop.order, 1);
        assert_eq!(seg.route.to_stop.order, 2);
        assert_eq!(seg.times.bus_start, "08:00:00");
        assert_eq!(seg.times.departure_time, "08:00");
        assert_eq!(seg.times.arrival_time, "08:05");
        assert_eq!(seg.times.duration_minutes, 5);
    }

    #[test]
    fn unscheduled_buses_are_left_out() {
        let store = fixture();
        let segments = find_connections(&store, 1, 2, at(9, 0)).unwrap();
        assert!(segments.iter().all(|s| s.name != "East Loop"));

        store.add_start_time(2, 1, "10:00:00").unwrap();
        let segments = find_connections(&store, 1, 2, at(9, 0)).unwrap();
        assert_eq!(segments.len(), 2);
        let east = segments.iter().find(|s| s.name == "East Loop").unwrap();
        assert_eq!(east.times.departure_time, "10:00");
        assert_eq!(east.times.arrival_time, "10:08");
    }

    #[test]
    fn riding_backwards_needs_the_loop_to_come_around() {
        let store = fixture();
        // C -> B never happens on this loop, so only the reboarding at A
        // (order 4) offers nothing either: no segments at all.
        let err = find_connections(&store, 3, 2, at(9, 0)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn reboarding_cuts_the_segment_at_the_second_visit() {
        let store = fixture();
        // A -> C must not be reported from the A at order 4; only the
        // boarding at order 1 works, and no A lies strictly between.
        let segments = find_connections(&store, 1, 3, at(9, 0)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].route.from_stop.order, 1);
        assert_eq!(segments[0].route.to_stop.order, 3);
    }

    #[test]
    fn unknown_pair_is_not_found() {
        let store = fixture();
        let err = find_connections(&store, 1, 99, at(9, 0)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
