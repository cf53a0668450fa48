use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base under which uploaded objects are publicly reachable; object URLs
    /// persisted on user records are `{public_url}/{bucket}/{key}`.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub cors_origin: String,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn optional_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let server = ServerConfig {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("APP_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(8080),
        };

        let database_url = required("DATABASE_URL")?;

        let jwt = JwtConfig {
            access_secret: required("JWT_ACCESS_SECRET")?,
            refresh_secret: required("JWT_REFRESH_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cliptube".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cliptube-users".into()),
            access_ttl_minutes: optional_i64("JWT_ACCESS_TTL_MINUTES", 60),
            refresh_ttl_minutes: optional_i64("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let endpoint = required("MEDIA_ENDPOINT")?;
        let media = MediaConfig {
            public_url: std::env::var("MEDIA_PUBLIC_URL").unwrap_or_else(|_| endpoint.clone()),
            endpoint,
            bucket: std::env::var("MEDIA_BUCKET").unwrap_or_else(|_| "cliptube-media".into()),
            access_key: required("MEDIA_ACCESS_KEY")?,
            secret_key: required("MEDIA_SECRET_KEY")?,
            region: std::env::var("MEDIA_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let cors_origin = std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into());

        Ok(Self {
            server,
            database_url,
            jwt,
            media,
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_i64_falls_back_on_garbage() {
        std::env::remove_var("CONFIG_TEST_MISSING");
        assert_eq!(optional_i64("CONFIG_TEST_MISSING", 42), 42);

        std::env::set_var("CONFIG_TEST_GARBAGE", "not-a-number");
        assert_eq!(optional_i64("CONFIG_TEST_GARBAGE", 7), 7);

        std::env::set_var("CONFIG_TEST_OK", "120");
        assert_eq!(optional_i64("CONFIG_TEST_OK", 7), 120);
    }

    #[test]
    fn required_reports_the_variable_name() {
        std::env::remove_var("CONFIG_TEST_REQUIRED");
        let err = required("CONFIG_TEST_REQUIRED").unwrap_err();
        assert!(err.to_string().contains("CONFIG_TEST_REQUIRED"));
    }
}
