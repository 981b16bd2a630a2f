//! HTTP calls made while negotiating a session.

use monitor_core::GroupLayout;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{LinkError, LinkResult};

/// Header carrying the session token on HTTP requests
pub const SESSION_HEADER: &str = "sess";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "l")]
    login: &'a str,
    #[serde(rename = "p")]
    password: &'a str,
}

/// Thin wrapper over the login and topology endpoints
#[derive(Debug, Clone, Default)]
pub struct AuthClient {
    http: reqwest::Client,
}

impl AuthClient {
    /// Reuse an existing HTTP client
    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange credentials for a session token
    pub async fn login(&self, endpoint: &str, login: &str, password: &str) -> LinkResult<String> {
        debug!(endpoint, login, "Requesting session token");
        let response = self
            .http
            .post(endpoint)
            .json(&LoginRequest { login, password })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let token = response.text().await?;
                info!(login, "Session token issued");
                Ok(token)
            }
            StatusCode::UNAUTHORIZED => Err(LinkError::InvalidCredentials {
                login: login.to_string(),
            }),
            status => Err(LinkError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// Fetch the group/unit topology visible to `token`
    pub async fn layout(&self, endpoint: &str, token: &str) -> LinkResult<GroupLayout> {
        let response = self
            .http
            .get(endpoint)
            .header(SESSION_HEADER, token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let layout: GroupLayout = response.json().await?;
                debug!(groups = layout.len(), "Topology received");
                Ok(layout)
            }
            StatusCode::UNAUTHORIZED => Err(LinkError::Unauthorized),
            status => Err(LinkError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
