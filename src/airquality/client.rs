use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::types::*;
use super::StationSource;
use crate::config::ApiConfig;
use crate::error::AlertError;

#[derive(Clone)]
pub struct AirQualityClient {
    http: Client,
    current_url: String,
    historical_url: String,
}

impl AirQualityClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            current_url: config.current_url.clone(),
            historical_url: config.historical_url.clone(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .http
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("HTTP GET {} failed", url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GET {} returned {}: {}", url, status, body);
        }
        resp.json::<T>().await.context("Failed to parse response")
    }

    /// All stations currently reporting.
    pub async fn list_current(&self) -> Result<Vec<StationReading>> {
        let url = Url::parse(&self.current_url)
            .with_context(|| format!("Invalid current-readings URL: {}", self.current_url))?;
        let resp: CurrentResponse = self.get(url).await?;
        let stations = resp.into_stations();
        debug!("Fetched {} stations", stations.len());
        Ok(stations)
    }

    /// Historical series for one station.
    pub async fn list_historical(
        &self,
        station_id: &str,
        variable: &str,
        hours: u32,
    ) -> Result<Vec<HistoricalPoint>> {
        let url = historical_url(&self.historical_url, station_id, variable, hours)?;
        let resp: HistoricalResponse = self.get(url).await?;
        debug!("Fetched {} historical points for {}", resp.data.len(), station_id);
        Ok(resp.data)
    }
}

/// Fill the `{station_id}` placeholder and append the query parameters.
pub fn historical_url(template: &str, station_id: &str, variable: &str, hours: u32) -> Result<Url> {
    let mut url = Url::parse(&template.replace("{station_id}", station_id))
        .with_context(|| format!("Invalid historical URL template: {}", template))?;
    url.query_pairs_mut()
        .append_pair("variable", variable)
        .append_pair("hours", &hours.to_string());
    Ok(url)
}

#[async_trait]
impl StationSource for AirQualityClient {
    async fn current_readings(&self) -> Result<Vec<StationReading>, AlertError> {
        self.list_current().await.map_err(AlertError::Network)
    }

    async fn historical(
        &self,
        station_id: &str,
        variable: &str,
        hours: u32,
    ) -> Result<Vec<HistoricalPoint>, AlertError> {
        self.list_historical(station_id, variable, hours)
            .await
            .map_err(AlertError::Network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_historical_url_substitutes_station() {
        let url = historical_url(
            "https://api.example.com/prod/station/{station_id}/historical",
            "TUL",
            "ias",
            36,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/prod/station/TUL/historical?variable=ias&hours=36"
        );
    }

    #[test]
    fn test_historical_url_rejects_garbage() {
        assert!(historical_url("not a url {station_id}", "X", "ias", 1).is_err());
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let client = AirQualityClient::new(&ApiConfig::default()).unwrap();
        assert!(client.current_url.ends_with("/ias/current"));
    }
}
