//! HTTP client for the citizen-reporting backend API.
//!
//! Every call is bounded by the configured timeout; a timeout, a network
//! error, and a non-2xx application rejection all surface as
//! `QalaError::Backend`, which the engine treats uniformly.

use async_trait::async_trait;
use qalabot_core::{
    config::BackendConfig,
    error::QalaError,
    traits::{BackendApi, EventSummary, NewReport},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// reqwest-based implementation of `BackendApi`.
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    first_name: &'a str,
    last_name: &'a str,
    phone_number: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    phone_number: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct UserResponse {
    user_id: i64,
}

#[derive(Deserialize)]
struct ReportResponse {
    report_id: i64,
}

impl BackendClient {
    /// Create a client from config. The per-call timeout lives on the
    /// reqwest client so every adapter call is bounded.
    pub fn new(config: &BackendConfig) -> Result<Self, QalaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QalaError::Backend(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self.client.request(method, url);
        if !self.api_token.is_empty() {
            req = req.bearer_auth(&self.api_token);
        }
        req
    }

    /// Check the response status and decode the JSON body.
    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        what: &str,
    ) -> Result<T, QalaError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QalaError::Backend(format!("{what} returned {status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| QalaError::Backend(format!("{what}: failed to parse response: {e}")))
    }
}

#[async_trait]
impl BackendApi for BackendClient {
    async fn register(
        &self,
        first_name: &str,
        last_name: &str,
        phone_number: &str,
    ) -> Result<i64, QalaError> {
        debug!("backend: POST /api/auth/register for {phone_number}");
        let resp = self
            .request(reqwest::Method::POST, "/api/auth/register")
            .json(&RegisterRequest {
                first_name,
                last_name,
                phone_number,
            })
            .send()
            .await
            .map_err(|e| QalaError::Backend(format!("register request failed: {e}")))?;

        let user: UserResponse = Self::decode(resp, "register").await?;
        Ok(user.user_id)
    }

    async fn login(&self, phone_number: &str, password: &str) -> Result<i64, QalaError> {
        debug!("backend: POST /api/auth/login for {phone_number}");
        let resp = self
            .request(reqwest::Method::POST, "/api/auth/login")
            .json(&LoginRequest {
                phone_number,
                password,
            })
            .send()
            .await
            .map_err(|e| QalaError::Backend(format!("login request failed: {e}")))?;

        let user: UserResponse = Self::decode(resp, "login").await?;
        Ok(user.user_id)
    }

    async fn create_report(&self, report: &NewReport) -> Result<i64, QalaError> {
        debug!(
            "backend: POST /api/reports category={}",
            report.category.slug()
        );
        let resp = self
            .request(reqwest::Method::POST, "/api/reports")
            .json(report)
            .send()
            .await
            .map_err(|e| QalaError::Backend(format!("create_report request failed: {e}")))?;

        let created: ReportResponse = Self::decode(resp, "create_report").await?;
        Ok(created.report_id)
    }

    async fn list_events(&self) -> Result<Vec<EventSummary>, QalaError> {
        debug!("backend: GET /api/events");
        let resp = self
            .request(reqwest::Method::GET, "/api/events")
            .send()
            .await
            .map_err(|e| QalaError::Backend(format!("list_events request failed: {e}")))?;

        Self::decode(resp, "list_events").await
    }

    async fn join_event(&self, user_id: Option<i64>, event_id: i64) -> Result<(), QalaError> {
        debug!("backend: POST /api/events/{event_id}/join");
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/api/events/{event_id}/join"),
            )
            .json(&serde_json::json!({ "user_id": user_id }))
            .send()
            .await
            .map_err(|e| QalaError::Backend(format!("join_event request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QalaError::Backend(format!(
                "join_event returned {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qalabot_core::validate::ReportCategory;

    #[test]
    fn test_new_report_wire_shape() {
        let report = NewReport {
            category: ReportCategory::Garbage,
            description: "Overflowing bin on Main St".into(),
            latitude: 43.238,
            longitude: 76.889,
            photo_url: None,
            address: None,
            user_id: Some(7),
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["category"], "garbage");
        assert_eq!(json["description"], "Overflowing bin on Main St");
        assert_eq!(json["latitude"], 43.238);
        assert_eq!(json["user_id"], 7);
        // Absent optionals stay off the wire entirely.
        assert!(json.get("photo_url").is_none());
        assert!(json.get("address").is_none());
    }

    #[test]
    fn test_event_summary_decodes_without_start() {
        let event: EventSummary =
            serde_json::from_str(r#"{"id": 3, "title": "Park cleanup"}"#).unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.title, "Park cleanup");
        assert!(event.starts_at.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BackendClient::new(&BackendConfig {
            base_url: "http://localhost:8000/".into(),
            api_token: String::new(),
            timeout_secs: 15,
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:8000");
    }
}
