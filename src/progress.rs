//! Trip progression. A bus's position along its route is a pair of counters
//! on the bus row: `stops_cleared` since the repetition started, and
//! `current_rep`. Clearing the last stop wraps both.

use crate::error::ApiError;
use crate::route::RouteStop;
use crate::schedule;
use crate::store::{AdvanceOutcome, Bus, SqliteStore};

/// Clear one stop for a bus. Returns the updated bus row and whether the
/// clear wrapped into a new repetition.
pub fn clear_stop(store: &SqliteStore, bus_id: i64, stop_id: i64) -> Result<(Bus, bool), ApiError> {
    match store.advance_stop(bus_id, stop_id)? {
        AdvanceOutcome::NotInRoute => Err(ApiError::NotFound(
            "This stop is not in the route for this bus".to_string(),
        )),
        AdvanceOutcome::Advanced { bus, wrapped } => Ok((bus, wrapped)),
    }
}

#[derive(Debug)]
pub struct TripInit {
    pub bus: Bus,
    pub route: Vec<RouteStop>,
    pub next_stop: Option<RouteStop>,
}

/// Point the counters at a chosen trip: the repetition whose scheduled start
/// matches `start_time` (first repetition when nothing matches), with
/// `next_stop_sequence` stops already cleared. The override is stored as
/// given; out-of-range values are normalized by readers.
pub fn initialize_trip(
    store: &SqliteStore,
    bus_id: i64,
    start_time: &str,
    next_stop_sequence: i64,
) -> Result<TripInit, ApiError> {
    let canonical = schedule::parse_start_time(start_time)
        .map(schedule::format_start_time)
        .unwrap_or_else(|| start_time.to_string());
    let rep_no = store.rep_for_start_time(bus_id, &canonical)?.unwrap_or(1);

    let bus = store
        .initialize_trip(bus_id, rep_no, next_stop_sequence)?
        .ok_or_else(|| ApiError::NotFound("Bus not found".to_string()))?;

    let route = store.route_stops(bus_id)?;
    let next_stop = usize::try_from(next_stop_sequence)
        .ok()
        .and_then(|idx| route.get(idx).cloned());

    Ok(TripInit {
        bus,
        route,
        next_stop,
    })
}
