//! Session cookie plumbing shared by login, refresh and logout.

use axum_extra::extract::cookie::{Cookie, CookieJar};
use time::Duration;

use super::jwt::JwtKeys;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

fn session_cookie(name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Attach both session cookies, scoped to the whole site and unreadable
/// from script.
pub fn set_session_cookies(
    jar: CookieJar,
    keys: &JwtKeys,
    access_token: String,
    refresh_token: String,
) -> CookieJar {
    let access_age = Duration::seconds(keys.access_ttl.as_secs() as i64);
    let refresh_age = Duration::seconds(keys.refresh_ttl.as_secs() as i64);
    jar.add(session_cookie(ACCESS_TOKEN_COOKIE, access_token, access_age))
        .add(session_cookie(REFRESH_TOKEN_COOKIE, refresh_token, refresh_age))
}

/// Expire both session cookies. Attributes must match the ones they were
/// set with or browsers keep the originals.
pub fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    let expired = |name: &'static str| {
        Cookie::build((name, ""))
            .http_only(true)
            .secure(true)
            .path("/")
            .max_age(Duration::ZERO)
            .build()
    };
    jar.add(expired(ACCESS_TOKEN_COOKIE))
        .add(expired(REFRESH_TOKEN_COOKIE))
}
