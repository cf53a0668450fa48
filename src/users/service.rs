//! Account and session flows. Handlers stay thin; every rule about
//! validation, credential checks and refresh-token rotation lives here,
//! against the store and media seams so the same code runs in tests.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, FilePart, LoginData, LoginRequest, PublicUser, RegisterForm, TokenPair,
    UpdateAccountRequest,
};
use super::repo::{NewUser, User};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::storage::media_key;

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn jwt_keys(st: &AppState) -> JwtKeys {
    JwtKeys::from_config(&st.config.jwt)
}

pub async fn register(st: &AppState, mut form: RegisterForm) -> ApiResult<PublicUser> {
    form.username = form.username.trim().to_lowercase();
    form.email = form.email.trim().to_lowercase();
    form.full_name = form.full_name.trim().to_string();

    // Each field is checked on its own so the response can name all of them.
    let mut missing = Vec::new();
    if form.username.is_empty() {
        missing.push("username is required".to_string());
    }
    if form.email.is_empty() {
        missing.push("email is required".to_string());
    }
    if form.full_name.is_empty() {
        missing.push("fullName is required".to_string());
    }
    if form.password.trim().is_empty() {
        missing.push("password is required".to_string());
    }
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }

    if !is_valid_email(&form.email) {
        return Err(ApiError::validation("Invalid email address"));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    let avatar = form
        .avatar
        .take()
        .ok_or_else(|| ApiError::validation("Avatar file is required"))?;
    if avatar.bytes.is_empty() {
        return Err(ApiError::validation("Avatar file is empty"));
    }

    if st
        .users
        .username_or_email_exists(&form.username, &form.email)
        .await?
    {
        warn!(username = %form.username, "registration rejected, username or email taken");
        return Err(ApiError::conflict("User with email or username already exists"));
    }

    // The account must never exist without a hosted avatar, so the upload
    // happens before the insert and a failure aborts the whole flow.
    let avatar_key = media_key("avatars", &avatar.content_type);
    let avatar_url = match st
        .media
        .upload(&avatar_key, avatar.bytes, &avatar.content_type)
        .await
    {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "avatar upload failed");
            return Err(ApiError::upload("Avatar upload failed"));
        }
    };

    // Browsers send a zero-byte part for an unselected file input; treat
    // that the same as no cover at all.
    let cover_image_url = match form.cover_image.take().filter(|c| !c.bytes.is_empty()) {
        Some(cover) => {
            let key = media_key("covers", &cover.content_type);
            match st.media.upload(&key, cover.bytes, &cover.content_type).await {
                Ok(url) => Some(url),
                Err(e) => {
                    // The cover is optional, so a host failure degrades to
                    // registering without one.
                    warn!(error = %e, "cover image upload failed, continuing without it");
                    None
                }
            }
        }
        None => None,
    };

    let password_hash = hash_password(&form.password)?;
    let user = st
        .users
        .create(NewUser {
            username: form.username,
            email: form.email,
            full_name: form.full_name,
            password_hash,
            avatar_url,
            cover_image_url,
        })
        .await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(PublicUser::from(user))
}

pub async fn login(st: &AppState, req: LoginRequest) -> ApiResult<LoginData> {
    let identifier = [req.username, req.email]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_lowercase())
        .find(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("username or email is required"))?;

    let user = st
        .users
        .find_by_login(&identifier)
        .await?
        .ok_or_else(|| ApiError::not_found("User does not exist"))?;

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let keys = jwt_keys(st);
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    // Overwrites whatever token was stored before: logging in on a second
    // device ends the first session.
    st.users
        .set_refresh_token(user.id, Some(&refresh_token))
        .await?;

    info!(user_id = %user.id, "user logged in");
    Ok(LoginData {
        user: PublicUser::from(user),
        access_token,
        refresh_token,
    })
}

/// Idempotent: clearing an already-cleared token is still a success.
pub async fn logout(st: &AppState, user_id: Uuid) -> ApiResult<()> {
    st.users.set_refresh_token(user_id, None).await?;
    info!(user_id = %user_id, "user logged out");
    Ok(())
}

pub async fn refresh_session(st: &AppState, incoming: Option<String>) -> ApiResult<TokenPair> {
    let incoming = incoming
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    // Bad signature, expiry and malformed input all collapse into one
    // answer; callers learn nothing about which check failed.
    let keys = jwt_keys(st);
    let claims = keys
        .verify_refresh(&incoming)
        .map_err(|_| ApiError::invalid_token("Invalid refresh token"))?;

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::invalid_token("Invalid refresh token"))?;

    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    // Rotation is a conditional swap keyed on the presented token. Two
    // concurrent refreshes with the same stale token race here and exactly
    // one of them wins; the loser's freshly minted pair is discarded.
    if !st
        .users
        .swap_refresh_token(user.id, &incoming, &refresh_token)
        .await?
    {
        warn!(user_id = %user.id, "stale or replayed refresh token");
        return Err(ApiError::invalid_token("Refresh token expired or already used"));
    }

    info!(user_id = %user.id, "session refreshed");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Replaces the password hash. The stored refresh token is left alone, so
/// the current session keeps working after the change.
pub async fn change_password(
    st: &AppState,
    user: &User,
    req: ChangePasswordRequest,
) -> ApiResult<()> {
    let mut missing = Vec::new();
    if req.old_password.is_empty() {
        missing.push("oldPassword is required".to_string());
    }
    if req.new_password.is_empty() {
        missing.push("newPassword is required".to_string());
    }
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }

    if req.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    if !verify_password(&req.old_password, &user.password_hash)? {
        warn!(user_id = %user.id, "password change with wrong old password");
        return Err(ApiError::unauthorized("Old password is incorrect"));
    }

    let password_hash = hash_password(&req.new_password)?;
    st.users.set_password_hash(user.id, &password_hash).await?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

pub async fn update_account(
    st: &AppState,
    user: &User,
    req: UpdateAccountRequest,
) -> ApiResult<PublicUser> {
    let full_name = req.new_full_name.trim().to_string();
    let username = req.username.trim().to_lowercase();

    let mut missing = Vec::new();
    if full_name.is_empty() {
        missing.push("newFullName is required".to_string());
    }
    if username.is_empty() {
        missing.push("username is required".to_string());
    }
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }

    if st.users.username_taken(&username, user.id).await? {
        warn!(user_id = %user.id, username = %username, "username already taken");
        return Err(ApiError::conflict("Username is already taken"));
    }

    let updated = st
        .users
        .update_account(user.id, &full_name, &username)
        .await?
        .ok_or_else(|| ApiError::not_found("User no longer exists"))?;

    info!(user_id = %user.id, "account details updated");
    Ok(PublicUser::from(updated))
}

pub async fn update_avatar(
    st: &AppState,
    user: &User,
    file: Option<FilePart>,
) -> ApiResult<PublicUser> {
    let file = file.ok_or_else(|| ApiError::validation("Avatar file is missing"))?;
    if file.bytes.is_empty() {
        return Err(ApiError::validation("Avatar file is empty"));
    }

    let key = media_key("avatars", &file.content_type);
    let url = match st.media.upload(&key, file.bytes, &file.content_type).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, user_id = %user.id, "avatar upload failed");
            return Err(ApiError::upload("Avatar upload failed"));
        }
    };

    let updated = st
        .users
        .set_avatar_url(user.id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("User no longer exists"))?;

    // The record already points at the new object; losing the cleanup of
    // the old one only leaks an orphan on the media host.
    if let Err(e) = st.media.remove(&user.avatar_url).await {
        warn!(error = %e, user_id = %user.id, "could not remove replaced avatar");
    }

    info!(user_id = %user.id, "avatar updated");
    Ok(PublicUser::from(updated))
}

pub async fn update_cover_image(
    st: &AppState,
    user: &User,
    file: Option<FilePart>,
) -> ApiResult<PublicUser> {
    let file = file.ok_or_else(|| ApiError::validation("Cover image file is missing"))?;
    if file.bytes.is_empty() {
        return Err(ApiError::validation("Cover image file is empty"));
    }

    let key = media_key("covers", &file.content_type);
    let url = match st.media.upload(&key, file.bytes, &file.content_type).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, user_id = %user.id, "cover image upload failed");
            return Err(ApiError::upload("Cover image upload failed"));
        }
    };

    let updated = st
        .users
        .set_cover_image_url(user.id, &url)
        .await?
        .ok_or_else(|| ApiError::not_found("User no longer exists"))?;

    if let Some(old) = &user.cover_image_url {
        if let Err(e) = st.media.remove(old).await {
            warn!(error = %e, user_id = %user.id, "could not remove replaced cover image");
        }
    }

    info!(user_id = %user.id, "cover image updated");
    Ok(PublicUser::from(updated))
}
