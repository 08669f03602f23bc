mod admin;
mod auth;
mod configuration;
mod driver;
mod error;
mod eta;
mod geo;
mod location;
mod profile;
mod progress;
mod route;
mod schedule;
mod stops;
mod store;
mod web;

use std::sync::Arc;

use anyhow::Context;
use log::info;

use crate::configuration::Configuration;
use crate::store::SqliteStore;
use crate::web::AppData;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Configuration::from_env();
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    auth::ensure_admin_user(&store, &config).context("seeding admin account")?;
    info!("database ready at {}", config.database_path);

    let ad = Arc::new(AppData { store, config });

    let rt = tokio::runtime::Runtime::new()?;
    rt.spawn(location::run_retention_sweep(ad.clone()));
    rt.block_on(web::main(ad));
    Ok(())
}
