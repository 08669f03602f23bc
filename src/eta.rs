//! Rider-facing bus views: the annotated schedule (driven by the cleared
//! count), the route overview (driven by the nearest stop to the last GPS
//! fix), and the compact info card. All take an explicit `now` so the
//! yesterday-wrap and minute arithmetic stay testable.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use warp::{Rejection, Reply};

use crate::error::{reject, ApiError};
use crate::geo::haversine_distance;
use crate::route::{ClearedCountIndex, NearestStopIndex, RouteStop, StopIndexer};
use crate::schedule;
use crate::store::SqliteStore;
use crate::web::AppData;

/// Assumed shuttle speed for distance-based arrival estimates, 20 km/h.
pub const AVERAGE_SPEED_MPS: f64 = 5.56;

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedStop {
    pub id: i64,
    pub stop_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub stop_order: i64,
    pub is_cleared: bool,
    pub scheduled_time: Option<String>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ScheduleView {
    pub bus_id: i64,
    pub bus_name: String,
    pub current_rep: i64,
    pub total_rep: i64,
    pub current_stop: Option<AnnotatedStop>,
    pub next_stop: Option<AnnotatedStop>,
    pub estimated_arrival: Option<String>,
    pub stops: Vec<AnnotatedStop>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStopEta {
    pub id: i64,
    pub stop_id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub stop_order: i64,
    pub time_from_start: f64,
    pub eta_minutes: i64,
    pub eta_time: String,
}

#[derive(Debug, Serialize)]
pub struct RouteOverview {
    pub stops: Vec<RouteStopEta>,
    pub current_stop: Option<RouteStopEta>,
    pub next_stop: Option<RouteStopEta>,
    pub current_rep: i64,
}

#[derive(Debug, Serialize)]
pub struct BusInfo {
    pub id: i64,
    pub name: String,
    pub current_rep: i64,
    pub driver_id: Option<i64>,
    pub driver_name: Option<String>,
    pub estimated_arrival: Option<i64>,
    pub next_stop_id: Option<i64>,
    pub next_stop_name: Option<String>,
}

fn distance_minutes(lat: f64, lon: f64, stop: &RouteStop) -> i64 {
    let metres = haversine_distance(lat, lon, stop.latitude, stop.longitude);
    (metres / AVERAGE_SPEED_MPS / 60.0).round() as i64
}

/// Schedule view: every stop of the current repetition annotated with its
/// cleared flag and a status line. The cleared flags use the raw counter, so
/// an out-of-range override reads as "everything cleared"; the current/next
/// window is the normalized one.
pub fn schedule_view(
    store: &SqliteStore,
    bus_id: i64,
    now: NaiveDateTime,
) -> Result<ScheduleView, ApiError> {
    let bus = store
        .bus(bus_id)?
        .ok_or_else(|| ApiError::NotFound("Bus not found".to_string()))?;
    let stops = store.route_stops(bus_id)?;
    if stops.is_empty() {
        return Err(ApiError::NotFound("Bus route not found".to_string()));
    }

    let raw = bus.stops_cleared;
    let window = ClearedCountIndex { stops_cleared: raw }
        .window(&stops)
        .ok_or_else(|| ApiError::NotFound("Bus route not found".to_string()))?;
    let k = raw.rem_euclid(stops.len() as i64) as usize;

    let location = store.latest_bus_location(bus_id)?;
    let eta_minutes = location
        .as_ref()
        .map(|loc| distance_minutes(loc.latitude, loc.longitude, &stops[window.next]));

    let start_instant = store
        .start_time_for(bus_id, bus.current_rep)?
        .and_then(|s| schedule::parse_start_time(&s))
        .map(|t| schedule::resolve_start_instant(t, now));

    let annotated: Vec<AnnotatedStop> = stops
        .iter()
        .enumerate()
        .map(|(idx, stop)| {
            let scheduled_time = start_instant.map(|start| {
                schedule::format_hhmm(schedule::stop_instant(start, stop.time_from_start))
            });
            let is_cleared = (idx as i64) < raw;
            let status = if is_cleared {
                match &scheduled_time {
                    Some(t) => format!("Cleared ({t})"),
                    None => "Cleared".to_string(),
                }
            } else if idx == window.next {
                match (eta_minutes, &scheduled_time) {
                    (Some(m), Some(t)) => format!("{m} min ({t})"),
                    (Some(m), None) => format!("{m} min"),
                    (None, Some(t)) => t.clone(),
                    (None, None) => "Schedule pending".to_string(),
                }
            } else {
                scheduled_time
                    .clone()
                    .unwrap_or_else(|| "Schedule pending".to_string())
            };
            AnnotatedStop {
                id: stop.entry_id,
                stop_id: stop.stop_id,
                name: stop.name.clone(),
                latitude: stop.latitude,
                longitude: stop.longitude,
                stop_order: stop.stop_order,
                is_cleared,
                scheduled_time,
                status,
            }
        })
        .collect();

    // At the start of a repetition nothing has been cleared in it yet, so
    // there is no current stop to show.
    let current_stop = (k > 0).then(|| annotated[window.current].clone());
    let next_stop = Some(annotated[window.next].clone());

    Ok(ScheduleView {
        bus_id: bus.id,
        bus_name: bus.name,
        current_rep: bus.current_rep,
        total_rep: bus.total_rep,
        current_stop,
        next_stop,
        estimated_arrival: eta_minutes.map(|m| format!("{m} min")),
        stops: annotated,
    })
}

/// Route overview: every stop with a minute countdown and a clock label,
/// positioned by the nearest stop to the last GPS fix. Stops whose scheduled
/// time is already behind the bus are marked passed.
pub fn route_overview(
    store: &SqliteStore,
    bus_id: i64,
    now: NaiveDateTime,
) -> Result<RouteOverview, ApiError> {
    let bus = store
        .bus(bus_id)?
        .ok_or_else(|| ApiError::NotFound("Bus not found".to_string()))?;
    let stops = store.route_stops(bus_id)?;
    if stops.is_empty() {
        return Err(ApiError::NotFound("Bus route not found".to_string()));
    }

    // Without a scheduled start the countdown is measured from the wall
    // clock, which renders every stop relative to "if the trip started now".
    let start_instant = store
        .start_time_for(bus_id, bus.current_rep)?
        .and_then(|s| schedule::parse_start_time(&s))
        .map(|t| schedule::resolve_start_instant(t, now))
        .unwrap_or(now);

    let location = store.latest_bus_location(bus_id)?;
    let window = location.as_ref().and_then(|loc| {
        NearestStopIndex {
            latitude: loc.latitude,
            longitude: loc.longitude,
        }
        .window(&stops)
    });
    let current_order = window.map(|w| stops[w.current].stop_order);

    let rows: Vec<RouteStopEta> = stops
        .iter()
        .map(|stop| {
            let instant = schedule::stop_instant(start_instant, stop.time_from_start);
            let hhmm = schedule::format_hhmm(instant);
            let raw_minutes = schedule::minutes_until(instant, now);
            let passed =
                raw_minutes < 0 && current_order.map_or(false, |o| stop.stop_order <= o);
            let (eta_minutes, eta_time) = if passed {
                (-1, format!("{hhmm} (Passed)"))
            } else {
                (raw_minutes.max(0), hhmm)
            };
            RouteStopEta {
                id: stop.entry_id,
                stop_id: stop.stop_id,
                name: stop.name.clone(),
                latitude: stop.latitude,
                longitude: stop.longitude,
                stop_order: stop.stop_order,
                time_from_start: stop.time_from_start,
                eta_minutes,
                eta_time,
            }
        })
        .collect();

    Ok(RouteOverview {
        current_stop: window.map(|w| rows[w.current].clone()),
        next_stop: window.map(|w| rows[w.next].clone()),
        current_rep: bus.current_rep,
        stops: rows,
    })
}

/// Info card: who drives the bus and when it reaches its next stop. The next
/// stop is positioned by the last GPS fix, not the cleared counter, and the
/// card needs a fix, a route and a scheduled start before it names one;
/// missing any of the three leaves the stop and ETA fields empty. The
/// schedule estimate wins unless it drifts past an hour, in which case the
/// distance estimate takes over (a bus running that late is off-schedule).
pub fn bus_info(store: &SqliteStore, bus_id: i64, now: NaiveDateTime) -> Result<BusInfo, ApiError> {
    let row = store
        .bus_with_driver(bus_id)?
        .ok_or_else(|| ApiError::NotFound("Bus info not found".to_string()))?;

    let stops = store.route_stops(bus_id)?;
    let location = store.latest_bus_location(bus_id)?;
    let start = store
        .start_time_for(bus_id, row.current_rep)?
        .and_then(|s| schedule::parse_start_time(&s));

    let mut next = None;
    let mut estimated_arrival = None;
    if let (Some(loc), Some(start)) = (location, start) {
        let window = NearestStopIndex {
            latitude: loc.latitude,
            longitude: loc.longitude,
        }
        .window(&stops);
        if let Some(w) = window {
            let stop = &stops[w.next];
            let start_instant = schedule::resolve_start_instant(start, now);
            let instant = schedule::stop_instant(start_instant, stop.time_from_start);
            let mut minutes = schedule::minutes_until(instant, now).max(1);
            if minutes > 60 {
                minutes = distance_minutes(loc.latitude, loc.longitude, stop);
            }
            estimated_arrival = Some(minutes);
            next = Some(stop);
        }
    }

    Ok(BusInfo {
        id: row.id,
        name: row.name,
        current_rep: row.current_rep,
        driver_id: row.driver_id,
        driver_name: row.driver_name,
        estimated_arrival,
        next_stop_id: next.map(|s| s.stop_id),
        next_stop_name: next.map(|s| s.name.clone()),
    })
}

pub async fn list_buses(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let buses = ad.store.buses_by_name().map_err(reject)?;
    Ok(warp::reply::json(&buses))
}

pub async fn get_bus_schedule(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let view = schedule_view(&ad.store, bus_id, Local::now().naive_local()).map_err(reject)?;
    Ok(warp::reply::json(&view))
}

pub async fn get_bus_route(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let view = route_overview(&ad.store, bus_id, Local::now().naive_local()).map_err(reject)?;
    Ok(warp::reply::json(&view))
}

pub async fn get_bus_info(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let info = bus_info(&ad.store, bus_id, Local::now().naive_local()).map_err(reject)?;
    Ok(warp::reply::json(&info))
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

    // Three stops, ten scheduled minutes apart. The bus location sits about
    // 334 m north of the Library stop, one minute away at 20 km/h.
    fn fixture(with_schedule: bool) -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        let bus = store.add_bus("Campus Loop").unwrap();
        let a = store.add_stop("Main Gate", 22.3190, 87.3091).unwrap();
        let b = store.add_stop("Library", 22.3177, 87.3055).unwrap();
        let c = store.add_stop("Hijli Hostel", 22.3312, 87.3072).unwrap();
        store.add_route_entry(bus.id, a.id, 1, 0.0).unwrap();
        store.add_route_entry(bus.id, b.id, 2, 10.0).unwrap();
        store.add_route_entry(bus.id, c.id, 3, 20.0).unwrap();
        if with_schedule {
            store.add_start_time(bus.id, 1, "08:00:00").unwrap();
        }
        store
    }

    fn near_library(store: &SqliteStore) {
        store.record_bus_location(1, 22.3207, 87.3055).unwrap();
    }

    #[test]
    fn schedule_view_annotates_cleared_next_and_upcoming() {
        let store = fixture(true);
        near_library(&store);
        store.initialize_trip(1, 1, 1).unwrap();

        let view = schedule_view(&store, 1, at(8, 9)).unwrap();
        assert_eq!(view.stops[0].status, "Cleared (08:00)");
        assert!(view.stops[0].is_cleared);
        assert_eq!(view.stops[1].status, "1 min (08:10)");
        assert_eq!(view.stops[2].status, "08:20");
        assert_eq!(view.estimated_arrival.as_deref(), Some("1 min"));
        assert_eq!(
            view.current_stop.as_ref().map(|s| s.name.as_str()),
            Some("Main Gate")
        );
        assert_eq!(
            view.next_stop.as_ref().map(|s| s.name.as_str()),
            Some("Library")
        );
    }

    #[test]
    fn schedule_view_without_schedule_falls_back_to_plain_labels() {
        let store = fixture(false);
        near_library(&store);
        store.initialize_trip(1, 1, 1).unwrap();

        let view = schedule_view(&store, 1, at(8, 9)).unwrap();
        assert_eq!(view.stops[0].status, "Cleared");
        assert_eq!(view.stops[1].status, "1 min");
        assert_eq!(view.stops[2].status, "Schedule pending");
        assert!(view.stops[1].scheduled_time.is_none());
    }

    #[test]
    fn schedule_view_without_location_keeps_clock_labels() {
        let store = fixture(true);
        store.initialize_trip(1, 1, 1).unwrap();

        let view = schedule_view(&store, 1, at(8, 9)).unwrap();
        assert_eq!(view.stops[1].status, "08:10");
        assert!(view.estimated_arrival.is_none());
    }

    #[test]
    fn schedule_view_at_repetition_start_has_no_current_stop() {
        let store = fixture(true);
        let view = schedule_view(&store, 1, at(8, 9)).unwrap();
        assert!(view.current_stop.is_none());
        assert_eq!(
            view.next_stop.as_ref().map(|s| s.name.as_str()),
            Some("Main Gate")
        );
        assert!(!view.stops.iter().any(|s| s.is_cleared));
    }

    #[test]
    fn schedule_view_normalizes_an_overshot_counter() {
        let store = fixture(true);
        store.initialize_trip(1, 1, 7).unwrap();

        let view = schedule_view(&store, 1, at(8, 9)).unwrap();
        assert!(view.stops.iter().all(|s| s.is_cleared));
        assert_eq!(
            view.next_stop.as_ref().map(|s| s.name.as_str()),
            Some("Library")
        );
        assert_eq!(
            view.current_stop.as_ref().map(|s| s.name.as_str()),
            Some("Main Gate")
        );
    }

    #[test]
    fn schedule_view_missing_route_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_bus("Empty").unwrap();
        let err = schedule_view(&store, 1, at(8, 0)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn route_overview_marks_passed_stops_behind_the_bus() {
        let store = fixture(true);
        near_library(&store);

        let view = route_overview(&store, 1, at(8, 15)).unwrap();
        assert_eq!(view.stops[0].eta_minutes, -1);
        assert_eq!(view.stops[0].eta_time, "08:00 (Passed)");
        assert_eq!(view.stops[1].eta_minutes, -1);
        assert_eq!(view.stops[1].eta_time, "08:10 (Passed)");
        assert_eq!(view.stops[2].eta_minutes, 5);
        assert_eq!(view.stops[2].eta_time, "08:20");
        assert_eq!(
            view.current_stop.as_ref().map(|s| s.name.as_str()),
            Some("Library")
        );
        assert_eq!(
            view.next_stop.as_ref().map(|s| s.name.as_str()),
            Some("Hijli Hostel")
        );
    }

    #[test]
    fn route_overview_clamps_future_stops_ahead_of_the_bus() {
        let store = fixture(true);
        near_library(&store);

        // Behind schedule: every stop time has passed but the bus is still
        // near the library, so only stops at or before it are marked.
        let view = route_overview(&store, 1, at(8, 45)).unwrap();
        assert_eq!(view.stops[2].eta_minutes, 0);
        assert_eq!(view.stops[2].eta_time, "08:20");
    }

    #[test]
    fn route_overview_without_location_has_no_window() {
        let store = fixture(true);
        let view = route_overview(&store, 1, at(8, 15)).unwrap();
        assert!(view.current_stop.is_none());
        assert!(view.next_stop.is_none());
        assert_eq!(view.stops[2].eta_minutes, 5);
    }

    #[test]
    fn route_overview_without_schedule_counts_from_now() {
        let store = fixture(false);
        near_library(&store);
        let view = route_overview(&store, 1, at(9, 0)).unwrap();
        assert_eq!(view.stops[0].eta_minutes, 0);
        assert_eq!(view.stops[1].eta_minutes, 10);
        assert_eq!(view.stops[2].eta_minutes, 20);
    }

    #[test]
    fn bus_info_prefers_the_schedule_estimate() {
        let store = fixture(true);
        store.add_driver("ravi", "ravi@example.com", "d", Some(1)).unwrap();
        // Parked at Main Gate, so Library (08:10) is next.
        store.record_bus_location(1, 22.3190, 87.3091).unwrap();

        let info = bus_info(&store, 1, at(8, 9)).unwrap();
        assert_eq!(info.estimated_arrival, Some(1));
        assert_eq!(info.next_stop_name.as_deref(), Some("Library"));
        assert_eq!(info.driver_name.as_deref(), Some("ravi"));
    }

    #[test]
    fn bus_info_falls_back_to_distance_when_schedule_is_far_off() {
        let store = fixture(true);
        // Fourth stop scheduled three hours out; the bus parked at Hijli is
        // about 3.34 km from it, ten minutes at 20 km/h.
        let stadium = store.add_stop("Stadium", 22.3012, 87.3055).unwrap();
        store.add_route_entry(1, stadium.id, 4, 180.0).unwrap();
        store.record_bus_location(1, 22.3312, 87.3072).unwrap();

        let info = bus_info(&store, 1, at(8, 9)).unwrap();
        assert_eq!(info.next_stop_name.as_deref(), Some("Stadium"));
        assert_eq!(info.estimated_arrival, Some(10));
    }

    #[test]
    fn bus_info_clamps_to_one_minute_when_due() {
        let store = fixture(true);
        store.record_bus_location(1, 22.3190, 87.3091).unwrap();
        let info = bus_info(&store, 1, at(8, 30)).unwrap();
        assert_eq!(info.estimated_arrival, Some(1));
    }

    #[test]
    fn bus_info_without_a_location_fix_names_no_stop() {
        let store = fixture(true);
        let info = bus_info(&store, 1, at(8, 9)).unwrap();
        assert!(info.next_stop_id.is_none());
        assert!(info.estimated_arrival.is_none());
    }

    #[test]
    fn bus_info_without_a_schedule_names_no_stop() {
        let store = fixture(false);
        near_library(&store);
        let info = bus_info(&store, 1, at(8, 9)).unwrap();
        assert!(info.next_stop_id.is_none());
        assert!(info.estimated_arrival.is_none());
    }

    #[test]
    fn bus_info_without_route_has_no_estimate() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_bus("Bare").unwrap();
        let info = bus_info(&store, 1, at(8, 0)).unwrap();
        assert!(info.estimated_arrival.is_none());
        assert!(info.next_stop_id.is_none());
    }

    #[test]
    fn bus_info_unknown_bus_is_not_found() {
        let store = fixture(true);
        let err = bus_info(&store, 42, at(8, 0)).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
