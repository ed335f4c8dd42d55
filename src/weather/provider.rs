//! Weather data source boundary and the Open-Meteo HTTP client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::{ForecastPoint, GeoLocation};

/// A single call: hourly forecast for a location, or failure. The resilience
/// service classifies every failure as transient.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn fetch_forecast(
        &self,
        location: &GeoLocation,
        horizon_hours: u32,
    ) -> Result<Vec<ForecastPoint>>;
}

/// Open-Meteo forecast API client (no API key required).
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("open-outlet-controller/0.2")
            .build()
            .context("failed to build weather HTTP client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoClient {
    async fn fetch_forecast(
        &self,
        location: &GeoLocation,
        horizon_hours: u32,
    ) -> Result<Vec<ForecastPoint>> {
        let url = format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}\
             &hourly=temperature_2m,precipitation_probability\
             &temperature_unit=fahrenheit&timeformat=unixtime&forecast_hours={}",
            self.base_url.trim_end_matches('/'),
            location.latitude,
            location.longitude,
            horizon_hours
        );
        debug!(%url, "fetching weather forecast");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("weather GET failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("weather API error: HTTP {status}");
        }

        let raw: OpenMeteoResponse = response
            .json()
            .await
            .context("weather JSON parse failed")?;
        let points = parse_hourly(raw)?;
        info!(
            latitude = location.latitude,
            longitude = location.longitude,
            points = points.len(),
            "weather forecast fetched"
        );
        Ok(points)
    }
}

fn parse_hourly(raw: OpenMeteoResponse) -> Result<Vec<ForecastPoint>> {
    let hourly = raw.hourly;
    if hourly.time.len() != hourly.temperature_2m.len() {
        anyhow::bail!(
            "weather response misaligned: {} timestamps vs {} temperatures",
            hourly.time.len(),
            hourly.temperature_2m.len()
        );
    }

    let mut points = Vec::with_capacity(hourly.time.len());
    for (i, unix) in hourly.time.iter().enumerate() {
        let timestamp: DateTime<Utc> = Utc
            .timestamp_opt(*unix, 0)
            .single()
            .with_context(|| format!("invalid forecast timestamp {unix}"))?;
        points.push(ForecastPoint {
            timestamp,
            temperature_f: hourly.temperature_2m[i],
            precipitation_probability: hourly
                .precipitation_probability
                .as_ref()
                .and_then(|v| v.get(i).copied())
                .unwrap_or(0.0),
        });
    }
    points.sort_by_key(|p| p.timestamp);
    Ok(points)
}

// Open-Meteo API response structures
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<i64>,
    temperature_2m: Vec<f64>,
    precipitation_probability: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn boston() -> GeoLocation {
        GeoLocation {
            latitude: 42.36,
            longitude: -71.06,
            timezone: chrono_tz::America::New_York,
        }
    }

    #[tokio::test]
    async fn test_fetch_and_parse_forecast() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "hourly": {
                "time": [1_767_000_000, 1_767_003_600, 1_767_007_200],
                "temperature_2m": [30.2, 31.5, 33.0],
                "precipitation_probability": [10.0, 60.0, 5.0]
            }
        });
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let points = client.fetch_forecast(&boston(), 3).await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].temperature_f, 30.2);
        assert_eq!(points[1].precipitation_probability, 60.0);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_server_error_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            OpenMeteoClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        assert!(client.fetch_forecast(&boston(), 12).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_precipitation_defaults_to_zero() {
        let raw = OpenMeteoResponse {
            hourly: OpenMeteoHourly {
                time: vec![1_767_000_000],
                temperature_2m: vec![40.0],
                precipitation_probability: None,
            },
        };
        let points = parse_hourly(raw).unwrap();
        assert_eq!(points[0].precipitation_probability, 0.0);
    }

    #[tokio::test]
    async fn test_misaligned_response_rejected() {
        let raw = OpenMeteoResponse {
            hourly: OpenMeteoHourly {
                time: vec![1_767_000_000, 1_767_003_600],
                temperature_2m: vec![40.0],
                precipitation_probability: None,
            },
        };
        assert!(parse_hourly(raw).is_err());
    }
}
