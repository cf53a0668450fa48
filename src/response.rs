use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Success envelope: `{ statusCode, data, message, success }`, rendered with
/// the matching HTTP status. `success` is derived from the code so the two
/// can never disagree.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.as_u16() < 400,
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_keys() {
        let body = ApiResponse::ok(serde_json::json!({"id": 1}), "done");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["message"], "done");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["id"], 1);
    }

    #[test]
    fn created_sets_201_and_success() {
        let body = ApiResponse::created((), "made");
        assert_eq!(body.status_code, 201);
        assert!(body.success);
    }
}
