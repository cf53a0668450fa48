//! Request and response shapes for the account routes. Wire names are
//! camelCase; blank-vs-missing is normalized by `serde(default)` so the
//! validation layer sees one case, not two.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::User;

/// One staged file from a multipart request, already read into memory.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Registration form as staged out of the multipart body.
#[derive(Debug, Default)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub avatar: Option<FilePart>,
    pub cover_image: Option<FilePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateAccountRequest {
    pub new_full_name: String,
    pub username: String,
}

/// Sanitized account projection. This is the only user shape that ever
/// reaches a response body; the hash and refresh token have no field here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar_url,
            cover_image: user.cover_image_url,
            created_at: user.created_at,
        }
    }
}

/// Payload of a successful login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Payload of a successful token refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_user_uses_wire_names_and_leaks_nothing() {
        let mut user = User::sample("lena", "lena@example.com");
        user.password_hash = "super-secret-hash".into();
        user.refresh_token = Some("super-secret-token".into());

        let json = serde_json::to_string(&PublicUser::from(user)).unwrap();
        assert!(json.contains("\"fullName\""));
        assert!(json.contains("\"avatar\""));
        assert!(json.contains("\"coverImage\""));
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("super-secret-hash"));
        assert!(!json.contains("super-secret-token"));
        assert!(!json.contains("password"));
        assert!(!json.contains("refresh"));
    }

    #[test]
    fn blank_and_missing_body_fields_read_the_same() {
        let req: ChangePasswordRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.old_password, "");
        assert_eq!(req.new_password, "");

        let req: UpdateAccountRequest =
            serde_json::from_str(r#"{"newFullName":"Lena Orn"}"#).unwrap();
        assert_eq!(req.new_full_name, "Lena Orn");
        assert_eq!(req.username, "");
    }
}
