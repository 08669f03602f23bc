//! Driver endpoints: the assigned-bus view, GPS pushes, clearing stops, and
//! pointing the counters at a chosen trip.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use warp::{Rejection, Reply};

use crate::auth::AuthUser;
use crate::error::{reject, ApiError};
use crate::progress;
use crate::route::{ClearedCountIndex, RouteStop, StopIndexer};
use crate::store::StartTime;
use crate::web::AppData;

#[derive(Debug, Deserialize)]
pub struct DriverLocationPush {
    pub bus_id: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ClearStopRequest {
    pub bus_id: Option<i64>,
    pub stop_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeTripRequest {
    pub bus_id: Option<i64>,
    pub start_time: Option<String>,
    pub next_stop_sequence: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TripOptions {
    pub scheduled_times: Vec<StartTime>,
    pub route_stops: Vec<RouteStop>,
}

async fn ensure_assigned(user: &AuthUser, bus_id: i64, ad: &AppData) -> Result<(), Rejection> {
    let assigned = ad
        .store
        .is_driver_assigned(user.id, bus_id)
        .map_err(reject)?;
    if assigned {
        Ok(())
    } else {
        Err(reject(ApiError::Forbidden(
            "You are not assigned to this bus".to_string(),
        )))
    }
}

/// The driver's own bus with its route and the current/next stop window.
pub async fn my_bus(user: AuthUser, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let bus = ad
        .store
        .bus_for_driver(user.id)
        .map_err(reject)?
        .ok_or_else(|| {
            reject(ApiError::NotFound(
                "No bus assigned to this driver".to_string(),
            ))
        })?;

    let route = ad.store.route_stops(bus.id).map_err(reject)?;
    let window = ClearedCountIndex {
        stops_cleared: bus.stops_cleared,
    }
    .window(&route);

    Ok(warp::reply::json(&json!({
        "bus": bus,
        "route": route,
        "stops_cleared": bus.stops_cleared,
        "last_cleared_stop": window.map(|w| &route[w.current]),
        "next_stop": window.map(|w| &route[w.next]),
    })))
}

pub async fn update_location(
    user: AuthUser,
    body: DriverLocationPush,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (bus_id, latitude, longitude) = match (body.bus_id, body.latitude, body.longitude) {
        (Some(b), Some(lat), Some(lon)) => (b, lat, lon),
        _ => {
            return Err(reject(ApiError::Validation(
                "Bus ID, latitude and longitude are required".to_string(),
            )))
        }
    };
    ensure_assigned(&user, bus_id, &ad).await?;

    let location = ad
        .store
        .record_bus_location(bus_id, latitude, longitude)
        .map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "message": "Bus location updated successfully",
        "location": location,
    })))
}

pub async fn clear_stop(
    user: AuthUser,
    body: ClearStopRequest,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (bus_id, stop_id) = match (body.bus_id, body.stop_id) {
        (Some(b), Some(s)) => (b, s),
        _ => {
            return Err(reject(ApiError::Validation(
                "Bus ID and stop ID are required".to_string(),
            )))
        }
    };
    ensure_assigned(&user, bus_id, &ad).await?;

    let (bus, wrapped) = progress::clear_stop(&ad.store, bus_id, stop_id).map_err(reject)?;
    let message = if wrapped {
        "Last bus stop cleared, new repetition started"
    } else {
        "Bus stop marked as cleared"
    };
    Ok(warp::reply::json(&json!({ "message": message, "bus": bus })))
}

/// Scheduled start times and route stops a driver picks from when starting
/// a shift mid-schedule.
pub async fn trip_options(
    bus_id: i64,
    user: AuthUser,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    ensure_assigned(&user, bus_id, &ad).await?;
    let options = TripOptions {
        scheduled_times: ad.store.start_times(bus_id).map_err(reject)?,
        route_stops: ad.store.route_stops(bus_id).map_err(reject)?,
    };
    Ok(warp::reply::json(&options))
}

pub async fn initialize_trip(
    user: AuthUser,
    body: InitializeTripRequest,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (bus_id, start_time, next_stop_sequence) =
        match (body.bus_id, body.start_time, body.next_stop_sequence) {
            (Some(b), Some(s), Some(n)) => (b, s, n),
            _ => {
                return Err(reject(ApiError::Validation(
                    "Bus ID, start time, and next stop index are required".to_string(),
                )))
            }
        };
    ensure_assigned(&user, bus_id, &ad).await?;

    let init = progress::initialize_trip(&ad.store, bus_id, &start_time, next_stop_sequence)
        .map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "bus": init.bus,
        "route": init.route,
        "stops_cleared": init.bus.stops_cleared,
        "next_stop": init.next_stop,
    })))
}
