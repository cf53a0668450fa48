use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;

use super::cookies::ACCESS_TOKEN_COOKIE;
use super::jwt::JwtKeys;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::repo::User;

/// Guard for protected routes. Pulls the access token from the session
/// cookie, falling back to an `Authorization: Bearer` header, and resolves
/// it to the full account record.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .or_else(|| bearer_token(parts).map(str::to_string))
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys
            .verify_access(&token)
            .map_err(|_| ApiError::invalid_token("Invalid access token"))?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| ApiError::invalid_token("Invalid access token"))?;

        Ok(CurrentUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo::NewUser;
    use axum::http::Request;

    async fn state_with_user() -> (AppState, User, String) {
        let state = AppState::fake();
        let user = state
            .users
            .create(NewUser {
                username: "mira".into(),
                email: "mira@example.com".into(),
                full_name: "Mira Voss".into(),
                password_hash: "hash".into(),
                avatar_url: "https://media.test/cliptube-media/avatars/m.jpg".into(),
                cover_image_url: None,
            })
            .await
            .unwrap();
        let token = JwtKeys::from_ref(&state).sign_access(&user).unwrap();
        (state, user, token)
    }

    fn parts_with_headers(headers: &[(&str, String)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/users/get-current-user");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = AppState::fake();
        let mut parts = parts_with_headers(&[]);
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn cookie_token_resolves_the_account() {
        let (state, user, token) = state_with_user().await;
        let mut parts = parts_with_headers(&[("cookie", format!("accessToken={token}"))]);
        let CurrentUser(found) = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn bearer_header_is_accepted_as_fallback() {
        let (state, user, token) = state_with_user().await;
        let mut parts = parts_with_headers(&[("authorization", format!("Bearer {token}"))]);
        let CurrentUser(found) = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let (state, _, _) = state_with_user().await;
        let mut parts = parts_with_headers(&[("cookie", "accessToken=not-a-jwt".to_string())]);
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn token_for_a_deleted_account_is_rejected() {
        let (state, user, _) = state_with_user().await;
        // Token signed for an id the store has never seen.
        let ghost = User::sample("ghost", "ghost@example.com");
        let token = JwtKeys::from_ref(&state).sign_access(&ghost).unwrap();
        assert_ne!(ghost.id, user.id);

        let mut parts = parts_with_headers(&[("cookie", format!("accessToken={token}"))]);
        let err = CurrentUser::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::InvalidToken(_)));
    }
}
