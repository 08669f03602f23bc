//! HTTP wiring: one filter per route, grouped by audience, sharing the store
//! through an `Arc<AppData>` injected into every handler.

use std::convert::Infallible;
use std::sync::Arc;

use log::info;
use warp::Filter;

use crate::auth::{self, Role};
use crate::configuration::Configuration;
use crate::store::SqliteStore;
use crate::{admin, driver, error, eta, location, profile, stops};

pub struct AppData {
    pub store: SqliteStore,
    pub config: Configuration,
}

pub fn with_appdata(
    ad: Arc<AppData>,
) -> impl Filter<Extract = (Arc<AppData>,), Error = Infallible> + Clone {
    warp::any().map(move || ad.clone())
}

pub async fn main(ad: Arc<AppData>) {
    let cors_policy = warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "Access-Control-Allow-Origin",
            "Origin",
            "Accept",
            "X-Requested-With",
            "Content-Type",
            "Authorization",
        ])
        .allow_methods(["GET", "POST", "PUT", "DELETE"]);

    let log = warp::log("warp");

    // Accounts and sessions.
    let signup = warp::post()
        .and(warp::path!("signup"))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(auth::signup);
    let login = warp::post()
        .and(warp::path!("login"))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(auth::login);
    let authenticate = warp::get()
        .and(warp::path!("authenticate"))
        .and(warp::header::optional::<String>("authorization"))
        .and(with_appdata(ad.clone()))
        .and_then(auth::authenticate);
    let logout = warp::post()
        .and(warp::path!("logout"))
        .and(warp::header::optional::<String>("authorization"))
        .and(with_appdata(ad.clone()))
        .and_then(auth::logout);
    let account_api = signup.or(login).or(authenticate).or(logout);

    // Rider endpoints.
    let list_buses = warp::get()
        .and(warp::path!("buses"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(eta::list_buses);
    let bus_location = warp::get()
        .and(warp::path!("buses" / i64 / "location"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(location::get_bus_location);
    let bus_route = warp::get()
        .and(warp::path!("buses" / i64 / "route"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(eta::get_bus_route);
    let bus_info = warp::get()
        .and(warp::path!("buses" / i64 / "info"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(eta::get_bus_info);
    let bus_schedule = warp::get()
        .and(warp::path!("buses" / i64 / "schedule"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(eta::get_bus_schedule);
    let list_stops = warp::get()
        .and(warp::path!("stops"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(stops::list_stops);
    let connections = warp::get()
        .and(warp::path!("stops" / "connections"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(warp::query::<stops::ConnectionsQuery>())
        .and(with_appdata(ad.clone()))
        .and_then(stops::get_connections);
    let fleet = warp::get()
        .and(warp::path!("riders" / "buses"))
        .and(auth::require_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(location::get_fleet_locations);
    let push_rider_location = warp::post()
        .and(warp::path!("riders" / "location"))
        .and(auth::with_role(ad.clone(), Role::User))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(location::record_rider_location);
    let rider_location = warp::get()
        .and(warp::path!("riders" / "location"))
        .and(auth::with_role(ad.clone(), Role::User))
        .and(with_appdata(ad.clone()))
        .and_then(location::get_rider_location);
    let rider_api = list_buses
        .or(bus_location)
        .or(bus_route)
        .or(bus_info)
        .or(bus_schedule)
        .or(list_stops)
        .or(connections)
        .or(fleet)
        .or(push_rider_location)
        .or(rider_location);

    // Driver endpoints.
    let my_bus = warp::get()
        .and(warp::path!("driver" / "bus"))
        .and(auth::with_role(ad.clone(), Role::Driver))
        .and(with_appdata(ad.clone()))
        .and_then(driver::my_bus);
    let push_bus_location = warp::post()
        .and(warp::path!("driver" / "location"))
        .and(auth::with_role(ad.clone(), Role::Driver))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(driver::update_location);
    let clear_stop = warp::post()
        .and(warp::path!("driver" / "clear-stop"))
        .and(auth::with_role(ad.clone(), Role::Driver))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(driver::clear_stop);
    let trip_options = warp::get()
        .and(warp::path!("driver" / "trip-options" / i64))
        .and(auth::with_role(ad.clone(), Role::Driver))
        .and(with_appdata(ad.clone()))
        .and_then(driver::trip_options);
    let initialize_trip = warp::post()
        .and(warp::path!("driver" / "initialize-trip"))
        .and(auth::with_role(ad.clone(), Role::Driver))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(driver::initialize_trip);
    let driver_api = my_bus
        .or(push_bus_location)
        .or(clear_stop)
        .or(trip_options)
        .or(initialize_trip);

    // Profile endpoints, open to any authenticated role.
    let get_profile = warp::get()
        .and(warp::path!("profile" / i64))
        .and(auth::with_auth(ad.clone()))
        .and(with_appdata(ad.clone()))
        .and_then(profile::get_profile);
    let update_profile = warp::put()
        .and(warp::path!("profile" / i64))
        .and(auth::with_auth(ad.clone()))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(profile::update_profile);
    let change_password = warp::post()
        .and(warp::path!("profile" / i64 / "password"))
        .and(auth::with_auth(ad.clone()))
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(profile::change_password);
    let profile_api = get_profile.or(update_profile).or(change_password);

    // Admin endpoints.
    let admin_gate = || auth::require_role(ad.clone(), Role::Admin);

    let admin_buses = warp::get()
        .and(warp::path!("admin" / "buses"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_buses);
    let admin_get_bus = warp::get()
        .and(warp::path!("admin" / "buses" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::get_bus);
    let admin_add_bus = warp::post()
        .and(warp::path!("admin" / "buses"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_bus);
    let admin_update_bus = warp::put()
        .and(warp::path!("admin" / "buses" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_bus);
    let admin_total_rep = warp::put()
        .and(warp::path!("admin" / "buses" / i64 / "total-reps"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_total_rep);
    let admin_delete_bus = warp::delete()
        .and(warp::path!("admin" / "buses" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_bus);

    let admin_stops = warp::get()
        .and(warp::path!("admin" / "stops"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_stops);
    let admin_add_stop = warp::post()
        .and(warp::path!("admin" / "stops"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_stop);
    let admin_update_stop = warp::put()
        .and(warp::path!("admin" / "stops" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_stop);
    let admin_delete_stop = warp::delete()
        .and(warp::path!("admin" / "stops" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_stop);

    let admin_routes = warp::get()
        .and(warp::path!("admin" / "routes"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_routes);
    let admin_bus_routes = warp::get()
        .and(warp::path!("admin" / "routes" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_bus_routes);
    let admin_add_route = warp::post()
        .and(warp::path!("admin" / "routes"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_route);
    let admin_update_route = warp::put()
        .and(warp::path!("admin" / "routes" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_route);
    let admin_delete_route = warp::delete()
        .and(warp::path!("admin" / "routes" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_route);

    let admin_start_times = warp::get()
        .and(warp::path!("admin" / "buses" / i64 / "start-times"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_start_times);
    let admin_add_start_time = warp::post()
        .and(warp::path!("admin" / "buses" / i64 / "start-times"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_start_time);
    let admin_update_start_time = warp::put()
        .and(warp::path!("admin" / "start-times" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_start_time);
    let admin_delete_start_time = warp::delete()
        .and(warp::path!("admin" / "start-times" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_start_time);

    let admin_drivers = warp::get()
        .and(warp::path!("admin" / "drivers"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_drivers);
    let admin_add_driver = warp::post()
        .and(warp::path!("admin" / "drivers"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_driver);
    let admin_update_driver = warp::put()
        .and(warp::path!("admin" / "drivers" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_driver);
    let admin_delete_driver = warp::delete()
        .and(warp::path!("admin" / "drivers" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_driver);

    let admin_users = warp::get()
        .and(warp::path!("admin" / "users"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_users);
    let admin_get_user = warp::get()
        .and(warp::path!("admin" / "users" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::get_user);
    let admin_add_user = warp::post()
        .and(warp::path!("admin" / "users"))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::add_user);
    let admin_update_user = warp::put()
        .and(warp::path!("admin" / "users" / i64))
        .and(admin_gate())
        .and(warp::body::json())
        .and(with_appdata(ad.clone()))
        .and_then(admin::update_user);
    let admin_delete_user = warp::delete()
        .and(warp::path!("admin" / "users" / i64))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::delete_user);
    let admin_user_locations = warp::get()
        .and(warp::path!("admin" / "users" / "locations"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::list_user_locations);
    let admin_statistics = warp::get()
        .and(warp::path!("admin" / "statistics"))
        .and(admin_gate())
        .and(with_appdata(ad.clone()))
        .and_then(admin::get_statistics);

    let admin_api = admin_buses
        .or(admin_get_bus)
        .or(admin_add_bus)
        .or(admin_update_bus)
        .or(admin_total_rep)
        .or(admin_delete_bus)
        .or(admin_stops)
        .or(admin_add_stop)
        .or(admin_update_stop)
        .or(admin_delete_stop)
        .or(admin_routes)
        .or(admin_bus_routes)
        .or(admin_add_route)
        .or(admin_update_route)
        .or(admin_delete_route)
        .or(admin_start_times)
        .or(admin_add_start_time)
        .or(admin_update_start_time)
        .or(admin_delete_start_time)
        .or(admin_drivers)
        .or(admin_add_driver)
        .or(admin_update_driver)
        .or(admin_delete_driver)
        .or(admin_user_locations)
        .or(admin_users)
        .or(admin_get_user)
        .or(admin_add_user)
        .or(admin_update_user)
        .or(admin_delete_user)
        .or(admin_statistics);

    let routes = account_api
        .or(rider_api)
        .or(driver_api)
        .or(profile_api)
        .or(admin_api)
        .recover(error::handle_rejection)
        .with(cors_policy)
        .with(log);

    let port = ad.config.port;
    info!("listening on port {port}");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}
