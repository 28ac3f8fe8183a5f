use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::AprsConfig;

const NO_DATA_TEXT: &str = "No data available for this station.";

/// One entry from an aprs.fi response. The API mixes strings and numbers
/// across fields (and across stations), so entries stay as raw field maps
/// and the report renders whatever is there.
type Entry = Map<String, Value>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("aprs.fi request timed out")]
    Timeout,
    #[error("HTTP request failed with status: {0}")]
    Http(StatusCode),
    #[error("aprs.fi rejected the lookup: {0}")]
    Api(String),
    #[error(transparent)]
    Network(reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    entries: Vec<Entry>,
}

impl LookupResponse {
    // aprs.fi answers HTTP 200 with result = "fail" for bad keys and
    // malformed queries; only result = "ok" carries entries.
    fn into_entries(self) -> Result<Vec<Entry>, FetchError> {
        if self.result != "ok" {
            return Err(FetchError::Api(
                self.description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(self.entries)
    }
}

/// Client for the aprs.fi lookup API
pub struct AprsClient {
    client: reqwest::Client,
    config: AprsConfig,
}

impl AprsClient {
    pub fn new(config: AprsConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    /// Fetch location and weather for `station` and render them as one
    /// report. Every failure path collapses into deliverable text — the
    /// caller sends whatever comes back, and the next tick retries.
    pub async fn fetch_report(&self, station: &str) -> String {
        match self.fetch_entries(station).await {
            Ok(Some((loc, wx))) => render_report(&loc, &wx),
            Ok(None) => NO_DATA_TEXT.to_string(),
            Err(e) => format!("Error fetching data: {e}"),
        }
    }

    async fn fetch_entries(&self, station: &str) -> Result<Option<(Entry, Entry)>, FetchError> {
        let loc = self.lookup(station, "loc").await?.into_entries()?;
        let wx = self.lookup(station, "wx").await?.into_entries()?;

        match (loc.into_iter().next(), wx.into_iter().next()) {
            (Some(loc), Some(wx)) => Ok(Some((loc, wx))),
            _ => Ok(None),
        }
    }

    async fn lookup(&self, station: &str, what: &str) -> Result<LookupResponse, FetchError> {
        debug!("Requesting {} data for {}", what, station);

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("name", station),
                ("what", what),
                ("apikey", self.config.api_key.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(wrap_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status));
        }

        response.json().await.map_err(wrap_reqwest_error)
    }
}

fn wrap_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

fn render_report(loc: &Entry, wx: &Entry) -> String {
    format!(
        "\u{1F30D} Station: {}\n\
         \u{1F551} Last packet: {} epoch\n\
         \u{1F4CD} Latitude: {}\n\
         \u{1F4CD} Longitude: {}\n\
         \u{1F3D4} Altitude: {} m\n\
         \u{1F4E1} Path: {}\n\
         \u{1F4AC} Comment: {}\n\
         --- \u{1F327} Weather Data ---\n\
         \u{1F321} Temperature: {} °C\n\
         \u{1F4A7} Humidity: {}%\n\
         \u{1F535} Pressure: {} hPa\n\
         \u{1F32C} Wind Speed: {} km/h\n\
         \u{1F9ED} Wind Direction: {}°",
        field(loc, "name"),
        field(loc, "time"),
        field(loc, "lat"),
        field(loc, "lng"),
        field(loc, "altitude"),
        field(loc, "path"),
        field(loc, "comment"),
        field(wx, "temp"),
        field(wx, "humidity"),
        field(wx, "pressure"),
        field(wx, "wind_speed"),
        field(wx, "wind_direction"),
    )
}

fn field(entry: &Entry, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "N/A".to_string(),
    }
}
