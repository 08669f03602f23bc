use log::warn;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Runtime settings, read once at startup from the environment (a local
/// `.env` file is loaded first). Every knob has a default so a dev run needs
/// no configuration at all.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub port: u16,
    pub database_path: String,
    /// Bus location samples older than this are deleted by the sweep.
    pub location_retention_secs: i64,
    pub cleanup_interval_secs: u64,
    pub session_ttl_secs: i64,
    pub admin_email: String,
    pub admin_password: String,
}

impl Configuration {
    pub fn from_env() -> Configuration {
        Configuration {
            port: parsed("PORT", 3030),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "shuttletrack.db".to_string()),
            location_retention_secs: parsed("LOCATION_RETENTION_SECS", 3600),
            cleanup_interval_secs: parsed("CLEANUP_INTERVAL_SECS", 1800),
            session_ttl_secs: parsed("SESSION_TTL_SECS", 7200),
            admin_email: env::var("ADMIN_EMAIL")
                .unwrap_or_else(|_| "admin@shuttletrack.local".to_string()),
            admin_password: env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "Admin@123".to_string()),
        }
    }
}

#[cfg(test)]
impl Configuration {
    pub fn default_for_tests() -> Configuration {
        Configuration {
            port: 0,
            database_path: ":memory:".to_string(),
            location_retention_secs: 3600,
            cleanup_interval_secs: 1800,
            session_ttl_secs: 7200,
            admin_email: "admin@shuttletrack.local".to_string(),
            admin_password: "Admin@123".to_string(),
        }
    }
}

fn parsed<T: FromStr + Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{key}={raw} is not valid, using default {default}");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        assert_eq!(parsed("SHUTTLETRACK_TEST_UNSET_KEY", 42_i64), 42);
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        env::set_var("SHUTTLETRACK_TEST_BAD_PORT", "not-a-port");
        assert_eq!(parsed("SHUTTLETRACK_TEST_BAD_PORT", 3030_u16), 3030);
        env::remove_var("SHUTTLETRACK_TEST_BAD_PORT");
    }
}
