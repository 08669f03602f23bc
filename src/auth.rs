//! Accounts, sessions, and the role gates in front of the route groups.
//!
//! Passwords are stored as `salt$digest` with a SHA-256 digest; session
//! tokens are random 32-byte hex strings resolved through the sessions
//! table, so restarting the server keeps everyone logged in.

use std::fmt;
use std::sync::Arc;

use log::info;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::configuration::Configuration;
use crate::error::{reject, ApiError};
use crate::store::SqliteStore;
use crate::web::{with_appdata, AppData};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Driver,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "driver" => Some(Role::Driver),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Role::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

/// The authenticated caller, as resolved from a session token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn hash_password(password: &str) -> String {
    let salt = to_hex(&rand::random::<[u8; 8]>());
    let digest = digest_with_salt(&salt, password);
    format!("{salt}${digest}")
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => digest_with_salt(salt, password) == digest,
        None => false,
    }
}

fn new_token() -> String {
    to_hex(&rand::random::<[u8; 32]>())
}

fn bearer_token(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header)
}

/// Resolve the Authorization header to a live session, rejecting otherwise.
pub fn with_auth(
    ad: Arc<AppData>,
) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_appdata(ad))
        .and_then(resolve_session)
}

async fn resolve_session(
    header: Option<String>,
    ad: Arc<AppData>,
) -> Result<AuthUser, Rejection> {
    let header = header.ok_or_else(|| {
        reject(ApiError::Unauthorized("Authentication required".to_string()))
    })?;
    let token = bearer_token(&header);
    match ad.store.session_user(token).map_err(reject)? {
        Some(user) => Ok(user),
        None => {
            let message = if ad.store.session_expired(token).map_err(reject)? {
                "Token expired"
            } else {
                "Authentication required"
            };
            Err(reject(ApiError::Unauthorized(message.to_string())))
        }
    }
}

fn forbidden_message(role: Role) -> &'static str {
    match role {
        Role::User => "Access denied. User privileges required.",
        Role::Driver => "Access denied. Driver privileges required.",
        Role::Admin => "Access denied. Admin privileges required.",
    }
}

/// Authenticated caller holding exactly the given role.
pub fn with_role(
    ad: Arc<AppData>,
    role: Role,
) -> impl Filter<Extract = (AuthUser,), Error = Rejection> + Clone {
    with_auth(ad).and_then(move |user: AuthUser| async move {
        if user.role == role {
            Ok(user)
        } else {
            Err(reject(ApiError::Forbidden(
                forbidden_message(role).to_string(),
            )))
        }
    })
}

/// Role gate for handlers that do not need the caller itself.
pub fn require_role(
    ad: Arc<AppData>,
    role: Role,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    with_role(ad, role).map(|_user: AuthUser| ()).untuple_one()
}

fn required(value: Option<String>, message: &str) -> Result<String, Rejection> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| reject(ApiError::Validation(message.to_string())))
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn signup(body: SignupRequest, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let username = required(body.username, "Name is required")?;
    let email = required(body.email, "Email is required")?;
    let password = required(body.password, "Password is required")?;

    let digest = hash_password(&password);
    let user = ad
        .store
        .insert_user(&username, &email, &digest, Role::User)
        .map_err(|err| {
            if crate::store::is_unique_violation(&err) {
                reject(ApiError::Conflict(
                    "Unable to create user, user already exists".to_string(),
                ))
            } else {
                reject(err)
            }
        })?;

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": "user created", "userId": user.id })),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn login(body: LoginRequest, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    let email = required(body.email, "Email is required")?;
    let password = required(body.password, "Password is required")?;

    let account = ad
        .store
        .user_by_email(&email)
        .map_err(reject)?
        .filter(|account| verify_password(&account.password, &password))
        .ok_or_else(|| {
            reject(ApiError::Unauthorized(
                "Invalid email or password".to_string(),
            ))
        })?;

    let token = new_token();
    ad.store
        .insert_session(&token, account.id, ad.config.session_ttl_secs)
        .map_err(reject)?;

    Ok(warp::reply::json(&json!({
        "message": "Auth successful",
        "token": token,
        "user": {
            "id": account.id,
            "username": account.username,
            "email": account.email,
            "role": account.role,
        },
    })))
}

/// Token introspection for clients restoring a session. A session that
/// expired but has not been swept yet is reported distinctly so clients can
/// prompt for a fresh login instead of treating the token as garbage.
pub async fn authenticate(
    header: Option<String>,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    let header = header.ok_or_else(|| {
        reject(ApiError::Unauthorized(
            "Authentication Failed - No token provided".to_string(),
        ))
    })?;
    let token = bearer_token(&header);
    let session = match ad.store.session_user(token).map_err(reject)? {
        Some(session) => session,
        None => {
            if ad.store.session_expired(token).map_err(reject)? {
                return Ok(warp::reply::with_status(
                    warp::reply::json(&json!({
                        "message": "Authentication Failed - Token expired",
                        "expired": true,
                    })),
                    StatusCode::UNAUTHORIZED,
                ));
            }
            return Err(reject(ApiError::Unauthorized(
                "Authentication Failed - Invalid token".to_string(),
            )));
        }
    };
    let user = ad
        .store
        .user_public(session.id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "user": user })),
        StatusCode::OK,
    ))
}

pub async fn logout(header: Option<String>, ad: Arc<AppData>) -> Result<impl Reply, Rejection> {
    if let Some(header) = header {
        ad.store
            .delete_session(bearer_token(&header))
            .map_err(reject)?;
    }
    Ok(warp::reply::json(&json!({
        "success": true,
        "message": "Successfully logged out",
    })))
}

/// Seed the configured admin account on first start.
pub fn ensure_admin_user(store: &SqliteStore, config: &Configuration) -> rusqlite::Result<()> {
    if store.admin_exists(&config.admin_email)? {
        return Ok(());
    }
    let digest = hash_password(&config.admin_password);
    let admin = store.insert_user("admin", &config.admin_email, &digest, Role::Admin)?;
    info!("created default admin account {} (id {})", admin.email, admin.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let stored = hash_password("S3cret!");
        assert!(verify_password(&stored, "S3cret!"));
        assert!(!verify_password(&stored, "s3cret!"));
    }

    #[test]
    fn each_hash_gets_its_own_salt() {
        let a = hash_password("same");
        let b = hash_password("same");
        assert_ne!(a, b);
        assert!(verify_password(&a, "same"));
        assert!(verify_password(&b, "same"));
    }

    #[test]
    fn malformed_stored_digest_never_verifies() {
        assert!(!verify_password("notadigest", "anything"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn tokens_are_hex_and_distinct() {
        let t = new_token();
        assert_eq!(t.len(), 64);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, new_token());
    }

    #[test]
    fn role_names_roundtrip() {
        for role in [Role::User, Role::Driver, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
        assert_eq!(serde_json::to_string(&Role::Driver).unwrap(), "\"driver\"");
    }

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(bearer_token("Bearer abc123"), "abc123");
        assert_eq!(bearer_token("abc123"), "abc123");
    }

    #[test]
    fn blank_request_fields_are_rejected() {
        assert!(required(None, "Name is required").is_err());
        assert!(required(Some("   ".to_string()), "Name is required").is_err());
        assert_eq!(
            required(Some("asha".to_string()), "Name is required").unwrap(),
            "asha"
        );
    }

    #[test]
    fn admin_seed_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let config = Configuration::default_for_tests();
        ensure_admin_user(&store, &config).unwrap();
        ensure_admin_user(&store, &config).unwrap();
        let admins: Vec<_> = store
            .all_users()
            .unwrap()
            .into_iter()
            .filter(|u| u.role == Role::Admin)
            .collect();
        assert_eq!(admins.len(), 1);

        let account = store.user_by_email(&config.admin_email).unwrap().unwrap();
        assert!(verify_password(&account.password, &config.admin_password));
    }
}
