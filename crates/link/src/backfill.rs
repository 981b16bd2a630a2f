//! Gap repair worker.
//!
//! The worker owns nothing but the cursor of the gap it is repairing.
//! It asks the connection task for the next gap, fetches that gap's pages
//! one after another (newest first) and hands every page back, so all
//! tracker and observer work stays on the connection task. When the
//! queue is empty the worker exits; the connection task starts a new one
//! the next time a gap is found.

use std::sync::Arc;
use std::time::Duration;

use monitor_core::DataItem;
use monitor_stream::{GapCursor, GapRecord, PageSpan};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::Command;
use crate::history::{HistoryQuery, HistorySource};

/// Build the history request for one page of a gap
pub fn page_query(record: &GapRecord, page: PageSpan) -> HistoryQuery {
    HistoryQuery {
        group: record.group.clone(),
        unit: record.unit.clone(),
        from: page.from,
        to: page.to,
    }
}

pub(crate) struct BackfillWorker<H> {
    history: Arc<H>,
    mailbox: mpsc::Sender<Command>,
    retry_delay: Duration,
}

impl<H: HistorySource> BackfillWorker<H> {
    pub(crate) fn new(history: Arc<H>, mailbox: mpsc::Sender<Command>, retry_delay: Duration) -> Self {
        Self {
            history,
            mailbox,
            retry_delay,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        debug!("Backfill started");
        loop {
            let (reply, next) = oneshot::channel();
            if self.mailbox.send(Command::NextGap { reply }).await.is_err() {
                return;
            }
            let Ok(Some(record)) = next.await else {
                debug!("Backfill queue drained");
                return;
            };
            if !self.repair(record).await {
                return;
            }
        }
    }

    /// Fetch every page of one gap. Returns false when the worker must stop.
    async fn repair(&self, record: GapRecord) -> bool {
        info!(
            group = %record.group,
            unit = %record.unit,
            min = record.min_index,
            max = record.max_index,
            "Repairing gap"
        );

        let mut cursor = GapCursor::new(record);
        while let Some(page) = cursor.current_page() {
            let query = page_query(cursor.record(), page);
            let Some(items) = self.fetch_page(&query).await else {
                return false;
            };

            let group = &cursor.record().group;
            let unit = &cursor.record().unit;
            let items: Vec<DataItem> = items
                .into_iter()
                .map(|item| item.into_data(group.as_str(), unit.as_str()))
                .collect();
            debug!(%query, received = items.len(), "History page received");

            if self.mailbox.send(Command::BackfillPage { items }).await.is_err() {
                return false;
            }
            cursor.advance();
        }
        true
    }

    /// Retry one page until it succeeds. `None` means the session is no
    /// longer authorized.
    async fn fetch_page(&self, query: &HistoryQuery) -> Option<Vec<monitor_core::HistoryItem>> {
        loop {
            match self.history.fetch(query).await {
                Ok(items) => return Some(items),
                Err(err) if err.is_fatal() => {
                    error!(%query, "History rejected the session token");
                    let _ = self.mailbox.send(Command::BackfillUnauthorized).await;
                    return None;
                }
                Err(err) => {
                    warn!(%query, error = %err, "History page failed, retrying");
                    if self.retry_delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }
}
