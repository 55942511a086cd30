use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::storage::sigv4::AwsCredentials;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub poller: PollerConfig,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_current_url")]
    pub current_url: String,
    /// `{station_id}` is substituted per request.
    #[serde(default = "default_historical_url")]
    pub historical_url: String,
    #[serde(default = "default_historical_variable")]
    pub historical_variable: String,
    #[serde(default = "default_historical_hours")]
    pub historical_hours: u32,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_current_url() -> String {
    "https://y4zwdmw7vf.execute-api.us-east-1.amazonaws.com/prod/api/air-quality/ias/current".into()
}
fn default_historical_url() -> String {
    "https://y4zwdmw7vf.execute-api.us-east-1.amazonaws.com/prod/api/air-quality/satation/{station_id}/historical".into()
}
fn default_historical_variable() -> String { "ias".into() }
fn default_historical_hours() -> u32 { 36 }
fn default_http_timeout_secs() -> u64 { 15 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            current_url: default_current_url(),
            historical_url: default_historical_url(),
            historical_variable: default_historical_variable(),
            historical_hours: default_historical_hours(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PanelConfig {
    #[serde(default = "default_panel_url")]
    pub url: String,
    #[serde(default = "default_panel_selector")]
    pub selector: String,
    /// Element whose text must leave the placeholder before capture.
    #[serde(default = "default_ready_element_id")]
    pub ready_element_id: String,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: u32,
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
}

fn default_panel_url() -> String { "https://whatsairegpt.netlify.app".into() }
fn default_panel_selector() -> String { ".whatsapp-alert-panel".into() }
fn default_ready_element_id() -> String { "iasValue".into() }
fn default_placeholder() -> String { "--".into() }
fn default_width() -> u32 { 480 }
fn default_height() -> u32 { 1200 }
fn default_scale_factor() -> u32 { 2 }
fn default_selector_timeout_ms() -> u64 { 10_000 }
fn default_ready_timeout_ms() -> u64 { 15_000 }
fn default_settle_ms() -> u64 { 2_000 }
fn default_render_timeout_secs() -> u64 { 45 }

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: default_panel_url(),
            selector: default_panel_selector(),
            ready_element_id: default_ready_element_id(),
            placeholder: default_placeholder(),
            width: default_width(),
            height: default_height(),
            scale_factor: default_scale_factor(),
            selector_timeout_ms: default_selector_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            settle_ms: default_settle_ms(),
            timeout_secs: default_render_timeout_secs(),
            chrome_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Public base URL (CDN) placed in front of the bucket.
    #[serde(default)]
    pub cdn_base_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

fn default_bucket() -> String { "smability-whatsapp-alerts".into() }
fn default_region() -> String { "us-east-1".into() }
fn default_key_prefix() -> String { "alertas".into() }
fn default_ledger_path() -> PathBuf { PathBuf::from("data/alerts.md") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            cdn_base_url: None,
            key_prefix: default_key_prefix(),
            ledger_path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: default_telegram_api(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_max_caption_chars")]
    pub max_caption_chars: usize,
    #[serde(default = "default_map_url")]
    pub map_url: Option<String>,
    /// WhatsApp chat link closing the caption.
    #[serde(default = "default_cta_url")]
    pub cta_url: Option<String>,
}

fn default_max_caption_chars() -> usize { 780 }
fn default_map_url() -> Option<String> {
    Some("https://smability.io/airegpt/network/map.html".into())
}
fn default_cta_url() -> Option<String> {
    Some("https://wa.me/525519566483".into())
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_caption_chars: default_max_caption_chars(),
            map_url: default_map_url(),
            cta_url: default_cta_url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollerConfig {
    /// Minute of the hour at which the panel refreshes.
    #[serde(default = "default_update_minute")]
    pub minute: u32,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// Also run the full alert pipeline at each refresh mark.
    #[serde(default)]
    pub run_alerts: bool,
}

fn default_update_minute() -> u32 { 20 }
fn default_check_interval_secs() -> u64 { 60 }
fn default_snapshot_path() -> PathBuf { PathBuf::from("data/panel.json") }
fn default_utc_offset_hours() -> i32 { -6 }

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            minute: default_update_minute(),
            check_interval_secs: default_check_interval_secs(),
            snapshot_path: default_snapshot_path(),
            utc_offset_hours: default_utc_offset_hours(),
            run_alerts: false,
        }
    }
}

impl Config {
    /// Load `.env`, then `config.toml` if present, then environment overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = Path::new("config.toml");
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .context("Failed to read config.toml")?;
            Self::from_toml_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Overlay the named environment variables. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("API_URL") {
            self.api.current_url = v;
        }
        if let Some(v) = var("HISTORICAL_URL") {
            self.api.historical_url = v;
        }
        if let Some(v) = var("PANEL_URL") {
            self.panel.url = v;
        }
        if let Some(v) = var("CHROME_PATH") {
            self.panel.chrome_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("S3_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = var("AWS_REGION") {
            self.storage.region = v;
        }
        if let Some(v) = var("CLOUDFRONT_URL") {
            self.storage.cdn_base_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = var("MAX_CAPTION_CHARS") {
            self.alert.max_caption_chars = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_CAPTION_CHARS is not a number: {}", v))?;
        }
        Ok(())
    }
}

pub fn aws_credentials() -> Result<AwsCredentials> {
    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .context("AWS_ACCESS_KEY_ID not set in environment or .env")?;
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .context("AWS_SECRET_ACCESS_KEY not set in environment or .env")?;
    let session_token = std::env::var("AWS_SESSION_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.storage.bucket, "smability-whatsapp-alerts");
        assert_eq!(config.panel.url, "https://whatsairegpt.netlify.app");
        assert_eq!(config.panel.width, 480);
        assert_eq!(config.panel.height, 1200);
        assert_eq!(config.alert.max_caption_chars, 780);
        assert_eq!(config.api.historical_hours, 36);
        assert_eq!(config.poller.minute, 20);
        assert!(config.storage.cdn_base_url.is_none());
        assert!(config.telegram.bot_token.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [panel]
            settle_ms = 500

            [poller]
            minute = 45
            run_alerts = true
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.panel.settle_ms, 500);
        assert_eq!(config.panel.selector, ".whatsapp-alert-panel");
        assert_eq!(config.poller.minute, 45);
        assert!(config.poller.run_alerts);
        assert_eq!(config.poller.check_interval_secs, 60);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("S3_BUCKET", "other-bucket"),
            ("CLOUDFRONT_URL", "https://cdn.example.com/"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_CHAT_ID", "   "),
            ("MAX_CAPTION_CHARS", "1024"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.storage.bucket, "other-bucket");
        assert_eq!(
            config.storage.cdn_base_url.as_deref(),
            Some("https://cdn.example.com")
        );
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:abc"));
        assert!(config.telegram.chat_id.is_none(), "blank values are ignored");
        assert_eq!(config.alert.max_caption_chars, 1024);
    }

    #[test]
    fn test_bad_caption_limit_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "MAX_CAPTION_CHARS").then(|| "lots".to_string()));
        assert!(result.is_err());
    }
}
