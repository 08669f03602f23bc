//! Location endpoints shared by riders, plus the background sweep that
//! keeps the bus ping table from growing without bound.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use warp::{Rejection, Reply};

use crate::auth::AuthUser;
use crate::error::{reject, ApiError};
use crate::web::AppData;

#[derive(Debug, Deserialize)]
pub struct LocationPush {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Latest ping for one bus.
pub async fn get_bus_location(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let location = ad
        .store
        .latest_bus_location(bus_id)
        .map_err(reject)?
        .ok_or_else(|| {
            reject(ApiError::NotFound("Bus location not found".to_string()))
        })?;
    Ok(warp::reply::json(&location))
}

/// Latest ping per bus, restricted to buses heard from recently.
pub async fn get_fleet_locations(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let fleet = ad
        .store
        .fleet_locations(ad.config.location_retention_secs)
        .map_err(reject)?;
    Ok(warp::reply::json(&fleet))
}

pub async fn record_rider_location(
    user: AuthUser,
    body: LocationPush,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (latitude, longitude) = match (body.latitude, body.longitude) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            return Err(reject(ApiError::Validation(
                "Latitude and longitude are required".to_string(),
            )))
        }
    };
    let location = ad
        .store
        .record_user_location(user.id, latitude, longitude)
        .map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "message": "Location updated successfully",
        "location": location,
    })))
}

pub async fn get_rider_location(user: AuthUser, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let location = ad
        .store
        .latest_user_location(user.id)
        .map_err(reject)?
        .ok_or_else(|| {
            reject(ApiError::NotFound(
                "No location found for this user".to_string(),
            ))
        })?;
    Ok(warp::reply::json(&location))
}

/// Periodic retention sweep over the bus ping and session tables. The first
/// pass runs as soon as the task starts.
pub async fn run_retention_sweep(ad: Arc<AppData>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(ad.config.cleanup_interval_secs));
    loop {
        ticker.tick().await;
        match ad.store.delete_stale_locations(ad.config.location_retention_secs) {
            Ok(0) => {}
            Ok(n) => info!("deleted {n} stale bus location samples"),
            Err(err) => error!("location sweep failed: {err}"),
        }
        match ad.store.purge_expired_sessions() {
            Ok(0) => {}
            Ok(n) => info!("purged {n} expired sessions"),
            Err(err) => error!("session sweep failed: {err}"),
        }
    }
}
