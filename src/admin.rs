//! Admin endpoints: fleet, stop and route catalogs, schedules, driver and
//! user accounts, and the operations dashboard counts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::auth::{hash_password, Role};
use crate::error::{reject, ApiError};
use crate::schedule;
use crate::store::is_unique_violation;
use crate::web::AppData;

fn created<T: Serialize>(value: &T) -> impl Reply {
    warp::reply::with_status(warp::reply::json(value), StatusCode::CREATED)
}

fn map_account_err(err: rusqlite::Error) -> Rejection {
    if is_unique_violation(&err) {
        reject(ApiError::InvalidState(
            "Email already in use. Please try a different email.".to_string(),
        ))
    } else {
        reject(err)
    }
}

fn role_field(raw: Option<&str>) -> Result<Role, Rejection> {
    raw.and_then(Role::parse).ok_or_else(|| {
        reject(ApiError::Validation(
            "Invalid role. Must be user, driver, or admin.".to_string(),
        ))
    })
}

/// An empty or blank password on an update form means "leave it alone".
fn password_digest(raw: Option<String>) -> Option<String> {
    raw.filter(|p| !p.trim().is_empty())
        .map(|p| hash_password(&p))
}

// ---- buses ----

pub async fn list_buses(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let buses = ad.store.buses_by_id().map_err(reject)?;
    Ok(warp::reply::json(&buses))
}

pub async fn get_bus(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let bus = ad
        .store
        .bus(id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Bus not found".to_string())))?;
    Ok(warp::reply::json(&bus))
}

#[derive(Debug, Deserialize)]
pub struct BusPayload {
    pub name: Option<String>,
}

pub async fn add_bus(body: BusPayload, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let name = body.name.ok_or_else(|| {
        reject(ApiError::Validation("Bus name is required".to_string()))
    })?;
    let bus = ad.store.add_bus(&name).map_err(reject)?;
    Ok(created(&bus))
}

pub async fn update_bus(
    id: i64,
    body: BusPayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let name = body.name.ok_or_else(|| {
        reject(ApiError::Validation("Bus name is required".to_string()))
    })?;
    let bus = ad
        .store
        .rename_bus(id, &name)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Bus not found".to_string())))?;
    Ok(warp::reply::json(&bus))
}

#[derive(Debug, Deserialize)]
pub struct TotalRepPayload {
    pub total_rep: Option<i64>,
}

pub async fn update_total_rep(
    id: i64,
    body: TotalRepPayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let total_rep = body.total_rep.ok_or_else(|| {
        reject(ApiError::Validation(
            "Total repetition count is required".to_string(),
        ))
    })?;
    let bus = ad
        .store
        .set_total_rep(id, total_rep)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Bus not found".to_string())))?;
    Ok(warp::reply::json(&bus))
}

pub async fn delete_bus(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    if !ad.store.delete_bus(id).map_err(reject)? {
        return Err(reject(ApiError::NotFound("Bus not found".to_string())));
    }
    Ok(warp::reply::json(&json!({
        "message": "Bus deleted successfully",
        "id": id,
    })))
}

// ---- stops ----

pub async fn list_stops(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let stops = ad.store.stops_by_id().map_err(reject)?;
    Ok(warp::reply::json(&stops))
}

#[derive(Debug, Deserialize)]
pub struct StopPayload {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

fn stop_fields(body: StopPayload) -> Result<(String, f64, f64), Rejection> {
    match (body.name, body.latitude, body.longitude) {
        (Some(name), Some(lat), Some(lon)) => Ok((name, lat, lon)),
        _ => Err(reject(ApiError::Validation(
            "Name, latitude and longitude are required".to_string(),
        ))),
    }
}

pub async fn add_stop(body: StopPayload, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let (name, latitude, longitude) = stop_fields(body)?;
    let stop = ad
        .store
        .add_stop(&name, latitude, longitude)
        .map_err(reject)?;
    Ok(created(&stop))
}

pub async fn update_stop(
    id: i64,
    body: StopPayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (name, latitude, longitude) = stop_fields(body)?;
    let stop = ad
        .store
        .update_stop(id, &name, latitude, longitude)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Bus stop not found".to_string())))?;
    Ok(warp::reply::json(&stop))
}

pub async fn delete_stop(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    if ad.store.stop_route_references(id).map_err(reject)? > 0 {
        return Err(reject(ApiError::InvalidState(
            "Cannot delete this bus stop as it is used in one or more routes. \
             Please remove it from all routes first."
                .to_string(),
        )));
    }
    if !ad.store.delete_stop(id).map_err(reject)? {
        return Err(reject(ApiError::NotFound("Bus stop not found".to_string())));
    }
    Ok(warp::reply::json(&json!({
        "message": "Bus stop deleted successfully",
        "id": id,
    })))
}

// ---- route entries ----

pub async fn list_routes(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let routes = ad.store.all_route_entries().map_err(reject)?;
    Ok(warp::reply::json(&routes))
}

pub async fn list_bus_routes(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let routes = ad.store.route_entries_for_bus(bus_id).map_err(reject)?;
    Ok(warp::reply::json(&routes))
}

#[derive(Debug, Deserialize)]
pub struct RoutePayload {
    pub bus_id: Option<i64>,
    pub bus_stop_id: Option<i64>,
    pub stop_order: Option<i64>,
    pub time_from_start: Option<f64>,
}

pub async fn add_route(body: RoutePayload, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let (bus_id, bus_stop_id, stop_order) =
        match (body.bus_id, body.bus_stop_id, body.stop_order) {
            (Some(b), Some(s), Some(o)) => (b, s, o),
            _ => {
                return Err(reject(ApiError::Validation(
                    "Bus ID, stop ID and stop order are required".to_string(),
                )))
            }
        };
    if ad.store.bus(bus_id).map_err(reject)?.is_none() {
        return Err(reject(ApiError::NotFound(format!(
            "Bus with ID {bus_id} not found"
        ))));
    }
    if ad.store.stop(bus_stop_id).map_err(reject)?.is_none() {
        return Err(reject(ApiError::NotFound("Bus stop not found".to_string())));
    }
    let entry = ad
        .store
        .add_route_entry(bus_id, bus_stop_id, stop_order, body.time_from_start.unwrap_or(0.0))
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Bus stop not found".to_string())))?;
    Ok(created(&entry))
}

#[derive(Debug, Deserialize)]
pub struct RouteUpdatePayload {
    pub bus_stop_id: Option<i64>,
    pub stop_order: Option<i64>,
    pub time_from_start: Option<f64>,
}

pub async fn update_route(
    id: i64,
    body: RouteUpdatePayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    if body.bus_stop_id.is_none() && body.stop_order.is_none() && body.time_from_start.is_none() {
        return Err(reject(ApiError::Validation(
            "No update parameters provided".to_string(),
        )));
    }
    if let Some(stop_id) = body.bus_stop_id {
        if ad.store.stop(stop_id).map_err(reject)?.is_none() {
            return Err(reject(ApiError::NotFound("Bus stop not found".to_string())));
        }
    }
    let entry = ad
        .store
        .update_route_entry(id, body.bus_stop_id, body.stop_order, body.time_from_start)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Route not found".to_string())))?;
    Ok(warp::reply::json(&entry))
}

pub async fn delete_route(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    if !ad.store.delete_route_entry(id).map_err(reject)? {
        return Err(reject(ApiError::NotFound("Route not found".to_string())));
    }
    Ok(warp::reply::json(&json!({
        "message": "Route deleted successfully",
        "id": id,
    })))
}

// ---- scheduled start times ----

pub async fn list_start_times(bus_id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let times = ad.store.start_times(bus_id).map_err(reject)?;
    Ok(warp::reply::json(&times))
}

#[derive(Debug, Deserialize)]
pub struct StartTimePayload {
    pub rep_no: Option<i64>,
    pub start_time: Option<String>,
}

fn parse_start_literal(raw: &str) -> Result<String, Rejection> {
    schedule::parse_start_time(raw)
        .map(schedule::format_start_time)
        .ok_or_else(|| {
            reject(ApiError::Validation(format!(
                "'{raw}' is not a valid time; HH:MM:SS format is expected."
            )))
        })
}

pub async fn add_start_time(
    bus_id: i64,
    body: StartTimePayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let raw = body.start_time.ok_or_else(|| {
        reject(ApiError::Validation("Start time is required".to_string()))
    })?;
    let start_time = parse_start_literal(&raw)?;

    if ad.store.bus(bus_id).map_err(reject)?.is_none() {
        return Err(reject(ApiError::NotFound(format!(
            "Bus with ID {bus_id} not found"
        ))));
    }
    let rep_no = body.rep_no.unwrap_or(1);
    if ad.store.has_start_time(bus_id, rep_no).map_err(reject)? {
        return Err(reject(ApiError::InvalidState(format!(
            "Start time for repetition {rep_no} already exists"
        ))));
    }

    let row = ad
        .store
        .add_start_time(bus_id, rep_no, &start_time)
        .map_err(reject)?;
    Ok(created(&row))
}

pub async fn update_start_time(
    id: i64,
    body: StartTimePayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let raw = body.start_time.ok_or_else(|| {
        reject(ApiError::Validation("Start time is required".to_string()))
    })?;
    let start_time = parse_start_literal(&raw)?;
    let row = ad
        .store
        .update_start_time(id, &start_time)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Start time not found".to_string())))?;
    Ok(warp::reply::json(&row))
}

pub async fn delete_start_time(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let row = ad
        .store
        .delete_start_time(id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Start time not found".to_string())))?;
    Ok(warp::reply::json(&row))
}

// ---- drivers ----

pub async fn list_drivers(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let drivers = ad.store.drivers_with_buses().map_err(reject)?;
    Ok(warp::reply::json(&drivers))
}

#[derive(Debug, Deserialize)]
pub struct DriverPayload {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub bus_id: Option<i64>,
}

pub async fn add_driver(body: DriverPayload, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let (name, email, password) = match (body.name, body.email, body.password) {
        (Some(n), Some(e), Some(p)) => (n, e, p),
        _ => {
            return Err(reject(ApiError::Validation(
                "Name, email and password are required".to_string(),
            )))
        }
    };
    let digest = hash_password(&password);
    let driver = ad
        .store
        .add_driver(&name, &email, &digest, body.bus_id)
        .map_err(map_account_err)?;
    Ok(created(&driver))
}

pub async fn update_driver(
    id: i64,
    body: DriverPayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let (name, email) = match (body.name, body.email) {
        (Some(n), Some(e)) => (n, e),
        _ => {
            return Err(reject(ApiError::Validation(
                "Name and email are required".to_string(),
            )))
        }
    };
    let digest = password_digest(body.password);
    let driver = ad
        .store
        .update_driver(id, &name, &email, digest.as_deref(), body.bus_id)
        .map_err(map_account_err)?
        .ok_or_else(|| reject(ApiError::NotFound("Driver not found".to_string())))?;
    Ok(warp::reply::json(&driver))
}

pub async fn delete_driver(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    if !ad.store.delete_driver(id).map_err(reject)? {
        return Err(reject(ApiError::NotFound("Driver not found".to_string())));
    }
    Ok(warp::reply::json(&json!({
        "message": "Driver deleted successfully",
        "id": id,
    })))
}

// ---- users ----

pub async fn list_users(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let users = ad.store.all_users().map_err(reject)?;
    Ok(warp::reply::json(&users))
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

pub async fn add_user(body: UserPayload, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let role = role_field(body.role.as_deref())?;
    let (username, email, password) = match (body.username, body.email, body.password) {
        (Some(u), Some(e), Some(p)) => (u, e, p),
        _ => {
            return Err(reject(ApiError::Validation(
                "Username, email and password are required".to_string(),
            )))
        }
    };
    let digest = hash_password(&password);
    let user = ad
        .store
        .insert_user(&username, &email, &digest, role)
        .map_err(map_account_err)?;
    Ok(created(&user))
}

pub async fn get_user(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let user = ad
        .store
        .user_public(id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    Ok(warp::reply::json(&user))
}

pub async fn update_user(
    id: i64,
    body: UserPayload,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let role = role_field(body.role.as_deref())?;
    let (username, email) = match (body.username, body.email) {
        (Some(u), Some(e)) => (u, e),
        _ => {
            return Err(reject(ApiError::Validation(
                "Username and email are required".to_string(),
            )))
        }
    };
    let digest = password_digest(body.password);
    let user = ad
        .store
        .update_user(id, &username, &email, role, digest.as_deref())
        .map_err(map_account_err)?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    Ok(warp::reply::json(&user))
}

pub async fn delete_user(id: i64, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let role = ad
        .store
        .user_role(id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    if role == Role::Admin {
        return Err(reject(ApiError::Forbidden(
            "Cannot delete admin accounts.".to_string(),
        )));
    }
    ad.store.delete_user_cascade(id).map_err(reject)?;
    Ok(warp::reply::json(&json!({
        "message": "User deleted successfully",
        "id": id,
    })))
}

// ---- dashboard ----

pub async fn get_statistics(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let stats = ad.store.statistics(3600).map_err(reject)?;
    Ok(warp::reply::json(&stats))
}

pub async fn list_user_locations(ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let locations = ad.store.all_user_locations().map_err(reject)?;
    Ok(warp::reply::json(&locations))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_field_rejects_missing_and_unknown() {
        assert!(role_field(None).is_err());
        assert!(role_field(Some("superuser")).is_err());
        assert_eq!(role_field(Some("driver")).ok(), Some(Role::Driver));
    }

    #[test]
    fn blank_password_means_unchanged() {
        assert_eq!(password_digest(None), None);
        assert_eq!(password_digest(Some(String::new())), None);
        assert_eq!(password_digest(Some("   ".to_string())), None);
        assert!(password_digest(Some("hunter2".to_string())).is_some());
    }
}
