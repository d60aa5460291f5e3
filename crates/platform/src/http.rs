//! REST implementation of [`PlatformClient`] over [`reqwest`].
//!
//! Wraps the manager backend's device/entity endpoints. Paths are
//! versioned under `/api/v1`; authentication is an optional bearer
//! token supplied at construction.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use presman_core::zones::{ZonePolygon, ZoneRect};

use crate::client::{PlatformClient, PlatformError};
use crate::types::{
    AvailableUpdate, DeviceConfigInfo, DeviceMapping, DeviceReadiness, EntityState,
    PreparedFirmware, ReadinessQuery, UpdateEntityStatus,
};

/// HTTP client for the platform REST API.
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPlatformClient {
    /// Create a new client for the given base URL, e.g.
    /// `http://host:8123`.
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling).
    pub fn with_client(client: reqwest::Client, base_url: String, token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`PlatformError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Check for success and deserialize the JSON body.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PlatformError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Check for success, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), PlatformError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_device_config(
        &self,
        model: &str,
        firmware_version: &str,
        device_id: &str,
    ) -> Result<DeviceConfigInfo, PlatformError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/devices/{device_id}/config"),
            )
            .query(&[("model", model), ("firmware_version", firmware_version)])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn get_available_updates(
        &self,
        model: &str,
        firmware_version: &str,
        device_id: &str,
    ) -> Result<Vec<AvailableUpdate>, PlatformError> {
        #[derive(serde::Deserialize)]
        struct UpdatesResponse {
            updates: Vec<AvailableUpdate>,
        }

        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/devices/{device_id}/updates"),
            )
            .query(&[("model", model), ("firmware_version", firmware_version)])
            .send()
            .await?;
        let parsed: UpdatesResponse = Self::parse_response(response).await?;
        Ok(parsed.updates)
    }

    async fn fetch_entity_state(
        &self,
        entity_id: &str,
    ) -> Result<Option<EntityState>, PlatformError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/entities/{entity_id}/state"),
            )
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::parse_response(response).await?))
    }

    async fn fetch_device_readiness(
        &self,
        device_id: &str,
        query: &ReadinessQuery,
    ) -> Result<DeviceReadiness, PlatformError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/devices/{device_id}/readiness"),
            )
            .json(query)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_rect_zones(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
    ) -> Result<Vec<ZoneRect>, PlatformError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/devices/{device_id}/zones/rect"),
            )
            .query(&[("profile_id", profile_id), ("entity_prefix", entity_prefix)])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn fetch_polygon_zones(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
    ) -> Result<Vec<ZonePolygon>, PlatformError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/devices/{device_id}/zones/polygon"),
            )
            .query(&[("profile_id", profile_id), ("entity_prefix", entity_prefix)])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn write_polygon_zone(
        &self,
        device_id: &str,
        profile_id: &str,
        entity_prefix: &str,
        polygon: &ZonePolygon,
    ) -> Result<(), PlatformError> {
        let body = json!({
            "profile_id": profile_id,
            "entity_prefix": entity_prefix,
            "zone": polygon,
        });
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/api/v1/devices/{device_id}/zones/polygon"),
            )
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn prepare_firmware(
        &self,
        device_id: &str,
        manifest_source: &str,
    ) -> Result<PreparedFirmware, PlatformError> {
        let body = json!({ "manifest_source": manifest_source });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/devices/{device_id}/firmware/prepare"),
            )
            .json(&body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn trigger_update(&self, device_id: &str, token: &str) -> Result<(), PlatformError> {
        let body = json!({ "token": token });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/devices/{device_id}/firmware/install"),
            )
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn read_update_status(
        &self,
        device_id: &str,
    ) -> Result<UpdateEntityStatus, PlatformError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/devices/{device_id}/firmware/status"),
            )
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn discover_and_save_mapping(
        &self,
        device_id: &str,
        profile_id: &str,
        device_name: &str,
    ) -> Result<Option<DeviceMapping>, PlatformError> {
        #[derive(serde::Deserialize)]
        struct MappingResponse {
            mapping: Option<DeviceMapping>,
        }

        let body = json!({
            "profile_id": profile_id,
            "device_name": device_name,
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v1/devices/{device_id}/mapping"),
            )
            .json(&body)
            .send()
            .await?;
        let parsed: MappingResponse = Self::parse_response(response).await?;
        Ok(parsed.mapping)
    }
}
