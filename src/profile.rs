//! Profile endpoints. Any authenticated account can manage its own profile;
//! admins can manage anyone's.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::{Rejection, Reply};

use crate::auth::{hash_password, AuthUser, Role};
use crate::error::{reject, ApiError};
use crate::store::is_unique_violation;
use crate::web::AppData;

fn ensure_self_or_admin(user: &AuthUser, user_id: i64) -> Result<(), Rejection> {
    if user.id == user_id || user.role == Role::Admin {
        Ok(())
    } else {
        Err(reject(ApiError::Forbidden("Access denied.".to_string())))
    }
}

pub async fn get_profile(
    user_id: i64,
    user: AuthUser,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    ensure_self_or_admin(&user, user_id)?;
    let profile = ad
        .store
        .user_public(user_id)
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;
    Ok(warp::reply::json(&profile))
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
}

pub async fn update_profile(
    user_id: i64,
    user: AuthUser,
    body: ProfileUpdate,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    ensure_self_or_admin(&user, user_id)?;
    if let Some(email) = &body.email {
        if ad
            .store
            .email_taken_by_other(email, user_id)
            .map_err(reject)?
        {
            return Err(reject(ApiError::InvalidState(
                "Email is already in use by another account".to_string(),
            )));
        }
    }

    let updated = ad
        .store
        .update_profile(user_id, body.username.as_deref(), body.email.as_deref())
        .map_err(|err| {
            if is_unique_violation(&err) {
                reject(ApiError::InvalidState(
                    "Email is already in use by another account".to_string(),
                ))
            } else {
                reject(err)
            }
        })?
        .ok_or_else(|| reject(ApiError::NotFound("User not found".to_string())))?;

    Ok(warp::reply::json(&json!({
        "message": "User profile updated successfully",
        "user": updated,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub new_password: Option<String>,
}

pub async fn change_password(
    user_id: i64,
    user: AuthUser,
    body: PasswordChange,
    ad: Arc<AppData>,
) -> Result<impl Reply, Rejection> {
    ensure_self_or_admin(&user, user_id)?;
    let new = body.new_password.filter(|p| !p.is_empty()).ok_or_else(|| {
        reject(ApiError::Validation("New password is required".to_string()))
    })?;

    if !ad
        .store
        .set_password(user_id, &hash_password(&new))
        .map_err(reject)?
    {
        return Err(reject(ApiError::NotFound("User not found".to_string())));
    }
    Ok(warp::reply::json(&json!({
        "message": "Password changed successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(id: i64, role: Role) -> AuthUser {
        AuthUser {
            id,
            username: "who".to_string(),
            email: "who@campus.edu".to_string(),
            role,
        }
    }

    #[test]
    fn profiles_are_self_or_admin_only() {
        assert!(ensure_self_or_admin(&caller(7, Role::User), 7).is_ok());
        assert!(ensure_self_or_admin(&caller(1, Role::Admin), 7).is_ok());
        assert!(ensure_self_or_admin(&caller(8, Role::User), 7).is_err());
        assert!(ensure_self_or_admin(&caller(8, Role::Driver), 7).is_err());
    }
}
