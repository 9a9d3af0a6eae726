use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::geo::Coordinates;

/// Best-effort reverse geocoding. Any failure is `None`.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, point: Coordinates) -> Option<String>;
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Client for a Nominatim-compatible `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, point: Coordinates) -> Result<Option<String>, reqwest::Error> {
        let response: ReverseResponse = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", point.latitude.to_string()),
                ("lon", point.longitude.to_string()),
            ])
            .header("User-Agent", concat!("nearwatch/", env!("CARGO_PKG_VERSION")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.display_name.filter(|name| !name.trim().is_empty()))
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, point: Coordinates) -> Option<String> {
        if self.base_url.is_empty() {
            return None;
        }
        match self.lookup(point).await {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(error = %e, "reverse geocoding failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_geocoder_returns_none() {
        let geocoder = NominatimGeocoder::new(Client::new(), "");
        assert_eq!(geocoder.reverse(Coordinates::new(40.0, -74.0)).await, None);
    }

    #[tokio::test]
    async fn unreachable_geocoder_returns_none() {
        let geocoder = NominatimGeocoder::new(Client::new(), "http://127.0.0.1:9/");
        assert_eq!(geocoder.reverse(Coordinates::new(40.0, -74.0)).await, None);
    }
}
