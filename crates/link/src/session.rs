//! Session negotiation.
//!
//! A [`Session`] is the immutable result of validating the backend
//! address, obtaining a token and fetching the topology. It is built once
//! and then handed to a [`LinkClient`](crate::LinkClient).

use monitor_core::{GroupLayout, LinkConfig};
use tracing::{info, warn};
use url::Url;

use crate::auth::AuthClient;
use crate::error::{LinkError, LinkResult};

/// Every URL the link talks to, derived from one `host:port[/path]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// `POST` credentials → token
    pub login: String,
    /// Streaming socket
    pub ws: String,
    /// Group/unit topology
    pub wplace: String,
    /// Last-value snapshot
    pub wplace_last: String,
    /// History pages
    pub hist: String,
}

impl Endpoints {
    /// Build the endpoint set for a validated URI
    pub fn new(uri: &str, secure: bool) -> Self {
        let (http, ws) = if secure {
            ("https", "wss")
        } else {
            ("http", "ws")
        };
        Self {
            login: format!("{http}://{uri}/login"),
            ws: format!("{ws}://{uri}/ws"),
            wplace: format!("{http}://{uri}/wplace"),
            wplace_last: format!("{http}://{uri}/wplace-last"),
            hist: format!("{http}://{uri}/hist"),
        }
    }
}

/// Validate a scheme-less `host:port[/path]` and drop a trailing slash
pub fn normalize_uri(uri: &str) -> LinkResult<String> {
    let invalid = |reason: &str| LinkError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = uri.strip_suffix('/').unwrap_or(uri);
    if trimmed.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if trimmed.contains("://") {
        return Err(invalid("must not include a scheme"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }

    let authority = match trimmed.split_once('/') {
        Some((authority, _)) => authority,
        None => trimmed,
    };
    let Some((host, port)) = authority.rsplit_once(':') else {
        return Err(invalid("port is required"));
    };
    if host.is_empty() {
        return Err(invalid("host is required"));
    }
    if port.parse::<u16>().is_err() {
        return Err(invalid("port must be a number between 0 and 65535"));
    }

    let parsed =
        Url::parse(&format!("http://{trimmed}")).map_err(|e| invalid(&e.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(invalid("host is required"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("must not carry user info"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment"));
    }

    Ok(trimmed.to_string())
}

/// Negotiated session: address, token and topology
#[derive(Debug, Clone)]
pub struct Session {
    uri: String,
    secure: bool,
    token: String,
    endpoints: Endpoints,
    layout: GroupLayout,
    http: reqwest::Client,
}

impl Session {
    /// Assemble a session from parts that were negotiated elsewhere
    pub fn from_parts(uri: &str, secure: bool, token: impl Into<String>, layout: GroupLayout) -> LinkResult<Self> {
        let uri = normalize_uri(uri)?;
        Ok(Self {
            endpoints: Endpoints::new(&uri, secure),
            uri,
            secure,
            token: token.into(),
            layout,
            http: reqwest::Client::new(),
        })
    }

    /// Normalized `host:port[/path]`
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether TLS schemes are used
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Session token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Derived endpoint URLs
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Topology fetched at negotiation
    pub fn layout(&self) -> &GroupLayout {
        &self.layout
    }

    /// HTTP client shared by every request of the session
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Builds a [`Session`]
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    uri: String,
    secure: bool,
    token: Option<String>,
    credentials: Option<(String, String)>,
    http: Option<reqwest::Client>,
}

impl SessionBuilder {
    /// Start from a scheme-less `host:port[/path]`
    pub fn new(uri: impl AsRef<str>) -> LinkResult<Self> {
        Ok(Self {
            uri: normalize_uri(uri.as_ref())?,
            secure: true,
            token: None,
            credentials: None,
            http: None,
        })
    }

    /// Seed a builder from the `[endpoint]` and `[auth]` sections
    pub fn from_config(config: &LinkConfig) -> LinkResult<Self> {
        config.validate()?;
        let mut builder = Self::new(&config.endpoint.uri)?.secure(config.endpoint.secure);
        if let Some(token) = &config.auth.token {
            builder = builder.token(token.clone());
        }
        if let Some((login, password)) = config.auth.credentials() {
            builder = builder.credentials(login, password);
        }
        Ok(builder)
    }

    /// Use an existing session token
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Log in with these credentials, or fall back to them once when the
    /// token turns out to be stale
    pub fn credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((login.into(), password.into()));
        self
    }

    /// Choose `https`/`wss` (default) or `http`/`ws`
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Share an HTTP client
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Obtain a token if needed and fetch the topology
    pub async fn finalize(self) -> LinkResult<Session> {
        let endpoints = Endpoints::new(&self.uri, self.secure);
        let auth = AuthClient::with_http(self.http.unwrap_or_default());

        let (token, layout) = match (self.token, self.credentials) {
            (None, None) => return Err(LinkError::MissingCredentials),
            (None, Some((login, password))) => {
                let token = auth.login(&endpoints.login, &login, &password).await?;
                let layout = auth.layout(&endpoints.wplace, &token).await?;
                (token, layout)
            }
            (Some(token), credentials) => match auth.layout(&endpoints.wplace, &token).await {
                Ok(layout) => (token, layout),
                Err(err) => {
                    let Some((login, password)) = credentials else {
                        return Err(err);
                    };
                    warn!(error = %err, "Session token rejected, logging in again");
                    let token = auth.login(&endpoints.login, &login, &password).await?;
                    let layout = auth.layout(&endpoints.wplace, &token).await?;
                    (token, layout)
                }
            },
        };

        info!(
            uri = %self.uri,
            groups = layout.len(),
            units = layout.values().map(Vec::len).sum::<usize>(),
            "Session established"
        );

        Ok(Session {
            uri: self.uri,
            secure: self.secure,
            token,
            endpoints,
            layout,
            http: auth.http().clone(),
        })
    }
}
