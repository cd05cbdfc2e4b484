use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db;
use crate::fetch::{self, Announcement, FetchOptions, NoticeOutcome, PageSource};
use crate::notifier::Notifier;
use crate::parser::Classifier;

/// Counts for one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub relevant: usize,
    pub skipped: usize,
    pub new: usize,
}

pub struct Poller<S> {
    source: Arc<S>,
    classifier: Classifier,
    index_url: String,
    options: FetchOptions,
}

impl<S> Poller<S>
where
    S: PageSource + Send + Sync + 'static,
{
    pub fn new(source: S, classifier: Classifier, index_url: impl Into<String>, options: FetchOptions) -> Self {
        Poller {
            source: Arc::new(source),
            classifier,
            index_url: index_url.into(),
            options,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<NoticeOutcome>, fetch::FetchError> {
        fetch::fetch_notices(
            Arc::clone(&self.source),
            &self.index_url,
            &self.classifier,
            &self.options,
        )
        .await
    }

    pub async fn fetch_announcements(&self) -> Result<Vec<Announcement>, fetch::FetchError> {
        fetch::fetch_and_parse(
            Arc::clone(&self.source),
            &self.index_url,
            &self.classifier,
            &self.options,
        )
        .await
    }

    /// Fetch, then notify and record every relevant announcement not seen
    /// before. An announcement whose notification fails stays unrecorded so
    /// the next cycle retries it.
    pub async fn poll_once(&self, conn: &Connection, notifier: &Arc<dyn Notifier>) -> Result<CycleSummary> {
        let outcomes = self.fetch().await?;
        let mut summary = CycleSummary {
            scanned: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            let announcement = match outcome {
                NoticeOutcome::Relevant(a) => a,
                NoticeOutcome::Skipped { .. } => {
                    summary.skipped += 1;
                    continue;
                }
                NoticeOutcome::Irrelevant { .. } => continue,
            };
            summary.relevant += 1;

            if db::is_notified(conn, &announcement.link)? {
                continue;
            }
            if let Err(e) = deliver(notifier, &announcement).await {
                warn!("Notification failed for {}: {:#}", announcement.link, e);
                continue;
            }
            summary.new += 1;
            if let Err(e) = db::save_notified(conn, &announcement) {
                warn!("Failed to save notified link {}: {:#}", announcement.link, e);
            }
        }

        if summary.new == 0 {
            info!("No new relevant announcements.");
        }
        info!(
            "Cycle done: {} notices ({} relevant, {} skipped, {} new)",
            summary.scanned, summary.relevant, summary.skipped, summary.new
        );
        Ok(summary)
    }
}

async fn deliver(notifier: &Arc<dyn Notifier>, announcement: &Announcement) -> Result<()> {
    let notifier = Arc::clone(notifier);
    let announcement = announcement.clone();
    tokio::task::spawn_blocking(move || notifier.notify(&announcement))
        .await
        .context("notify task failed")?
}

/// Poll, sleep, repeat until Ctrl-C. A failed cycle is logged and the loop
/// carries on.
pub async fn run_forever<S>(
    poller: &Poller<S>,
    conn: &Connection,
    notifier: &Arc<dyn Notifier>,
    interval: Duration,
) -> Result<()>
where
    S: PageSource + Send + Sync + 'static,
{
    run_until(poller, conn, notifier, interval, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// The poll loop, stopped by `shutdown`. The shutdown future lives for the
/// whole loop so a signal that lands mid-cycle is not lost; an in-flight
/// cycle is abandoned.
pub async fn run_until<S, F>(
    poller: &Poller<S>,
    conn: &Connection,
    notifier: &Arc<dyn Notifier>,
    interval: Duration,
    shutdown: F,
) -> Result<()>
where
    S: PageSource + Send + Sync + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        info!("Polling {}...", poller.index_url);
        tokio::select! {
            result = poller.poll_once(conn, notifier) => {
                if let Err(e) = result {
                    warn!("Error fetching notices: {:#}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted during poll, shutting down");
                return Ok(());
            }
        }

        let next = chrono::Duration::from_std(interval)
            .map(|d| (chrono::Local::now() + d).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| "-".into());
        info!(
            "Sleeping for {}m (next poll at {})",
            interval.as_secs() / 60,
            next
        );
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        }
    }
}
