pub mod ledger;
pub mod sigv4;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::airquality::types::StationReading;
use crate::config::StorageConfig;
use crate::error::AlertError;
use crate::formatter::format_index;
use crate::render::Screenshot;
use sigv4::{sha256_hex, uri_encode_path, AwsCredentials, SigV4Signer};

#[derive(Debug, Clone, Serialize)]
pub struct PublishedImage {
    pub url: String,
    #[serde(skip)]
    pub key: String,
    pub size: usize,
}

/// Persists a rendered panel and hands back a public URL.
#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    async fn publish(
        &self,
        image: &Screenshot,
        station: &StationReading,
        at: DateTime<Utc>,
    ) -> Result<PublishedImage, AlertError>;
}

/// `{prefix}/alert-{stationId}-{epochMillis}.jpg`
pub fn object_key(prefix: &str, station_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/alert-{}-{}.jpg",
        prefix.trim_end_matches('/'),
        station_id,
        at.timestamp_millis()
    )
}

/// Fold a tag value to printable ASCII: decompose, drop marks and anything else
/// outside ASCII, collapse whitespace.
pub fn normalize_tag(value: &str) -> String {
    let folded: String = value
        .nfkd()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Descriptive metadata attached to every uploaded image.
pub fn metadata_tags(station: &StationReading, at: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("station-id", normalize_tag(&station.station_id)),
        ("station-name", normalize_tag(&station.station_name)),
        ("ias", format_index(station.score())),
        ("category", normalize_tag(station.ias.category.label())),
        ("timestamp", at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    ]
}

pub struct S3Publisher {
    http: Client,
    signer: SigV4Signer,
    bucket: String,
    region: String,
    key_prefix: String,
    cdn_base_url: Option<String>,
}

impl S3Publisher {
    pub fn new(config: &StorageConfig, credentials: AwsCredentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            signer: SigV4Signer::new(credentials, &config.region, "s3"),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            key_prefix: config.key_prefix.clone(),
            cdn_base_url: config.cdn_base_url.clone(),
        })
    }

    fn host(&self) -> String {
        if self.region == "us-east-1" {
            format!("{}.s3.amazonaws.com", self.bucket)
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    /// CDN URL when one is configured, otherwise the bucket's virtual-host URL.
    pub fn public_url(&self, key: &str) -> String {
        public_url(self.cdn_base_url.as_deref(), &self.bucket, key)
    }

    async fn put_object(
        &self,
        key: &str,
        body: &[u8],
        content_type: &str,
        tags: &[(&'static str, String)],
    ) -> Result<()> {
        let host = self.host();
        let path = format!("/{}", uri_encode_path(key));

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("content-type".to_string(), content_type.to_string()),
            ("cache-control".to_string(), "public, max-age=3600".to_string()),
        ];
        for (name, value) in tags {
            headers.push((format!("x-amz-meta-{}", name), value.clone()));
        }
        let signed = self
            .signer
            .sign("PUT", &path, "", &headers, &sha256_hex(body), Utc::now());

        let url = format!("https://{}{}", host, path);
        let mut req = self.http.put(&url).body(body.to_vec());
        for (k, v) in &signed {
            req = req.header(k, v);
        }

        let resp = req.send().await.context("HTTP PUT failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("PUT {} returned {}: {}", key, status, body);
        }
        debug!(key = key, "Object stored");
        Ok(())
    }
}

pub fn public_url(cdn_base_url: Option<&str>, bucket: &str, key: &str) -> String {
    match cdn_base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
    }
}

#[async_trait]
impl ArtifactPublisher for S3Publisher {
    async fn publish(
        &self,
        image: &Screenshot,
        station: &StationReading,
        at: DateTime<Utc>,
    ) -> Result<PublishedImage, AlertError> {
        let key = object_key(&self.key_prefix, &normalize_tag(&station.station_id), at);
        let tags = metadata_tags(station, at);
        info!(
            bucket = %self.bucket,
            key = %key,
            bytes = image.bytes.len(),
            "Uploading panel image"
        );

        self.put_object(&key, &image.bytes, image.content_type, &tags)
            .await
            .with_context(|| format!("Upload to bucket {} failed", self.bucket))
            .map_err(AlertError::Storage)?;

        Ok(PublishedImage {
            url: self.public_url(&key),
            key,
            size: image.bytes.len(),
        })
    }
}
