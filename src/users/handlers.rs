use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, State,
    },
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::instrument;

use super::dto::{
    ChangePasswordRequest, FilePart, LoginRequest, PublicUser, RefreshRequest, RegisterForm,
    UpdateAccountRequest,
};
use super::service;
use crate::auth::cookies::{clear_session_cookies, set_session_cookies, REFRESH_TOKEN_COOKIE};
use crate::auth::extractors::CurrentUser;
use crate::auth::jwt::JwtKeys;
use crate::error::{ApiError, ApiResult};
use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/update-avatar", post(update_avatar))
        .route("/update-cover-image", post(update_cover_image))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB for image uploads
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-current-user-password", post(change_password))
        .route("/get-current-user", post(get_current_user))
        .route("/update-account-details", post(update_account_details))
}

#[instrument(skip_all)]
async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = stage_register_form(multipart).await?;
    let user = service::register(&state, form).await?;
    Ok(ApiResponse::created(user, "User registered successfully"))
}

#[instrument(skip_all)]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let data = service::login(&state, payload).await?;
    let keys = JwtKeys::from_config(&state.config.jwt);
    let jar = set_session_cookies(
        jar,
        &keys,
        data.access_token.clone(),
        data.refresh_token.clone(),
    );
    Ok((jar, ApiResponse::ok(data, "User logged in successfully")))
}

#[instrument(skip_all)]
async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> ApiResult<impl IntoResponse> {
    service::logout(&state, user.id).await?;
    Ok((
        clear_session_cookies(jar),
        ApiResponse::ok(serde_json::json!({}), "User logged out"),
    ))
}

/// The refresh token is read from the cookie first, then from the optional
/// JSON body, so both browser and API clients can rotate.
#[instrument(skip_all)]
async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> ApiResult<impl IntoResponse> {
    let from_body = payload.and_then(|Json(req)| req.refresh_token);
    let incoming = jar
        .get(REFRESH_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or(from_body);

    let pair = service::refresh_session(&state, incoming).await?;
    let keys = JwtKeys::from_config(&state.config.jwt);
    let jar = set_session_cookies(
        jar,
        &keys,
        pair.access_token.clone(),
        pair.refresh_token.clone(),
    );
    Ok((jar, ApiResponse::ok(pair, "Access token refreshed")))
}

#[instrument(skip_all)]
async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    service::change_password(&state, &user, payload).await?;
    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}

#[instrument(skip_all)]
async fn get_current_user(CurrentUser(user): CurrentUser) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Current user fetched successfully",
    ))
}

#[instrument(skip_all)]
async fn update_account_details(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    let updated = service::update_account(&state, &user, payload).await?;
    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

#[instrument(skip_all)]
async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let file = stage_single_file(multipart, "avatar").await?;
    let updated = service::update_avatar(&state, &user, file).await?;
    Ok(ApiResponse::ok(updated, "Avatar image updated successfully"))
}

#[instrument(skip_all)]
async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let file = stage_single_file(multipart, "coverImage").await?;
    let updated = service::update_cover_image(&state, &user, file).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

async fn stage_register_form(mut multipart: Multipart) -> ApiResult<RegisterForm> {
    let mut form = RegisterForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };
        match name.as_str() {
            "username" => form.username = field.text().await.map_err(bad_part)?,
            "email" => form.email = field.text().await.map_err(bad_part)?,
            "fullName" => form.full_name = field.text().await.map_err(bad_part)?,
            "password" => form.password = field.text().await.map_err(bad_part)?,
            "avatar" => form.avatar = Some(stage_file(field).await?),
            "coverImage" => form.cover_image = Some(stage_file(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Stages the first part named `field_name`, draining the rest of the body.
async fn stage_single_file(
    mut multipart: Multipart,
    field_name: &str,
) -> ApiResult<Option<FilePart>> {
    let mut staged = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        if field.name() == Some(field_name) && staged.is_none() {
            staged = Some(stage_file(field).await?);
        }
    }
    Ok(staged)
}

async fn stage_file(field: Field<'_>) -> ApiResult<FilePart> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let bytes = field.bytes().await.map_err(bad_part)?;
    Ok(FilePart {
        bytes,
        content_type,
    })
}

fn bad_part(e: MultipartError) -> ApiError {
    ApiError::validation(format!("Malformed multipart body: {e}"))
}
