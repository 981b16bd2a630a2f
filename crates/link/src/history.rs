//! History access for gap repair and snapshot priming.

use std::fmt;
use std::future::Future;

use monitor_core::HistoryItem;
use reqwest::StatusCode;
use tracing::debug;

use crate::auth::SESSION_HEADER;
use crate::error::HistoryError;
use crate::protocol::SnapshotMap;
use crate::session::Session;

/// One page request: inclusive index range of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Group name
    pub group: String,
    /// Unit name
    pub unit: String,
    /// Lowest index, inclusive
    pub from: u64,
    /// Highest index, inclusive
    pub to: u64,
}

impl fmt::Display for HistoryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} [{}..={}]", self.group, self.unit, self.from, self.to)
    }
}

/// Source of historical items
pub trait HistorySource: Send + Sync + 'static {
    /// Fetch the items of one page. The backend may return fewer items
    /// than the range spans.
    fn fetch(
        &self,
        query: &HistoryQuery,
    ) -> impl Future<Output = Result<Vec<HistoryItem>, HistoryError>> + Send;

    /// Fetch the last item of every unit
    fn fetch_last(&self) -> impl Future<Output = Result<SnapshotMap, HistoryError>> + Send {
        async { Ok(SnapshotMap::new()) }
    }
}

/// History over the backend's HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpHistory {
    http: reqwest::Client,
    hist: String,
    last: String,
    token: String,
}

impl HttpHistory {
    /// Use the session's endpoints and token
    pub fn from_session(session: &Session) -> Self {
        Self {
            http: session.http_client().clone(),
            hist: session.endpoints().hist.clone(),
            last: session.endpoints().wplace_last.clone(),
            token: session.token().to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, HistoryError> {
        let response = request
            .header(SESSION_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| HistoryError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| HistoryError::Decode(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(HistoryError::Unauthorized),
            status => Err(HistoryError::Status(status.as_u16())),
        }
    }
}

impl HistorySource for HttpHistory {
    async fn fetch(&self, query: &HistoryQuery) -> Result<Vec<HistoryItem>, HistoryError> {
        debug!(%query, "Requesting history page");
        let request = self.http.get(&self.hist).query(&[
            ("i", query.from.to_string()),
            ("a", query.to.to_string()),
            ("g", query.group.clone()),
            ("u", query.unit.clone()),
        ]);
        self.get_json(request).await
    }

    async fn fetch_last(&self) -> Result<SnapshotMap, HistoryError> {
        debug!("Requesting last-value snapshot");
        self.get_json(self.http.get(&self.last)).await
    }
}
