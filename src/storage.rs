use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::MediaConfig;

/// Media host seam. `upload` returns the durable public URL that gets
/// persisted on the account record; `remove` takes that same URL back.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String>;
    async fn remove(&self, url: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct MediaStorage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl MediaStorage {
    pub async fn new(cfg: &MediaConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                cfg.access_key.clone(),
                cfg.secret_key.clone(),
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_url, self.bucket, key)
    }

    fn key_from_url<'a>(&self, url: &'a str) -> anyhow::Result<&'a str> {
        let prefix = format!("{}/{}/", self.public_url, self.bucket);
        url.strip_prefix(prefix.as_str())
            .filter(|key| !key.is_empty())
            .with_context(|| format!("url not served from media host: {url}"))
    }
}

#[async_trait]
impl MediaStore for MediaStorage {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;
        Ok(self.object_url(key))
    }

    async fn remove(&self, url: &str) -> anyhow::Result<()> {
        let key = self.key_from_url(url)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {key}"))?;
        Ok(())
    }
}

/// Fresh object key under `folder`, extension derived from the mime type.
pub fn media_key(folder: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}/{}.{}", folder, Uuid::new_v4(), ext)
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_ext_from_mime() {
        assert_eq!(super::ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(super::ext_from_mime("image/png"), Some("png"));
        assert_eq!(super::ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(super::ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(super::ext_from_mime("application/octet-stream"), None);
        assert_eq!(super::ext_from_mime("whatever/else"), None);
    }

    #[test]
    fn test_media_key_shape() {
        let key = super::media_key("avatars", "image/png");
        assert!(key.starts_with("avatars/"));
        assert!(key.ends_with(".png"));

        let fallback = super::media_key("covers", "text/plain");
        assert!(fallback.ends_with(".bin"));
    }
}
