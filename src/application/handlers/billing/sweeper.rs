//! ReconciliationSweeper - Daily pass that re-derives time-based deal stages.
//!
//! Webhooks only move a deal when Stripe says something happened. Stages
//! that depend on the calendar (a week out, two days out, started) are
//! corrected here instead, independently of webhook delivery. Closed deals
//! are never touched.
//!
//! ## Lease
//!
//! One sweep runs at a time per process. A trigger that finds the lease
//! taken is skipped and logged.
//!
//! ## Graceful Shutdown
//!
//! [`ReconciliationSweeper::run`] waits for the next scheduled hour or a
//! shutdown signal, whichever comes first. A sweep in progress finishes.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;

use crate::config::SweeperConfig;
use crate::domain::billing::DealStage;
use crate::domain::foundation::DomainError;
use crate::ports::{DealSnapshot, WebhookEventRepository};

use super::crm_sync::{CrmSyncError, CrmSynchronizer};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Crm(#[from] CrmSyncError),

    #[error("Failed to prune webhook events: {0}")]
    Prune(#[from] DomainError),
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub corrected: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// False when a page of the deal listing could not be fetched.
    pub listing_complete: bool,
    pub pruned_events: u64,
}

enum DealCheck {
    Corrected,
    Unchanged,
}

pub struct ReconciliationSweeper {
    crm: Arc<CrmSynchronizer>,
    events: Arc<dyn WebhookEventRepository>,
    config: SweeperConfig,
    running: AtomicBool,
}

/// Releases the lease on drop.
struct LeaseGuard<'a>(&'a AtomicBool);

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReconciliationSweeper {
    pub fn new(
        crm: Arc<CrmSynchronizer>,
        events: Arc<dyn WebhookEventRepository>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            crm,
            events,
            config,
            running: AtomicBool::new(false),
        }
    }

    fn try_acquire(&self) -> Option<LeaseGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LeaseGuard(&self.running))
    }

    /// Run the daily schedule until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let wait = until_next_run(Utc::now(), self.config.run_hour_utc);
            tracing::info!(
                wait_secs = wait.as_secs(),
                run_hour_utc = self.config.run_hour_utc,
                "Next reconciliation sweep scheduled"
            );

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Reconciliation sweeper stopped");
                        return;
                    }
                }
                _ = time::sleep(wait) => {
                    self.run_once(Utc::now().date_naive()).await;
                }
            }
        }
    }

    /// One full sweep against `today`.
    ///
    /// Returns `None` when another sweep holds the lease.
    pub async fn run_once(&self, today: NaiveDate) -> Option<SweepReport> {
        let Some(_lease) = self.try_acquire() else {
            tracing::warn!("Reconciliation sweep already running; trigger skipped");
            return None;
        };

        tracing::info!(%today, "Reconciliation sweep started");
        let (deals, listing_complete) = self.fetch_all_deals().await;

        let mut report = SweepReport {
            listing_complete,
            ..SweepReport::default()
        };

        for deal in &deals {
            report.examined += 1;
            match self.check_deal(deal, today).await {
                Ok(DealCheck::Corrected) => report.corrected += 1,
                Ok(DealCheck::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(deal_id = %deal.id, error = %e, "Deal stage correction failed");
                }
            }
        }

        match self.prune_events().await {
            Ok(pruned) => report.pruned_events = pruned,
            Err(e) => tracing::warn!(error = %e, "Webhook event pruning failed"),
        }

        tracing::info!(
            examined = report.examined,
            corrected = report.corrected,
            unchanged = report.unchanged,
            failed = report.failed,
            listing_complete = report.listing_complete,
            pruned_events = report.pruned_events,
            "Reconciliation sweep finished"
        );

        Some(report)
    }

    /// Pages through every deal. A failed page ends the listing; the deals
    /// fetched before it are still returned.
    async fn fetch_all_deals(&self) -> (Vec<DealSnapshot>, bool) {
        let mut deals = Vec::new();
        let mut after: Option<String> = None;

        loop {
            match self.crm.list_deals(after.as_deref()).await {
                Ok(page) => {
                    deals.extend(page.deals);
                    match page.next_after {
                        Some(next) => after = Some(next),
                        None => return (deals, true),
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        fetched = deals.len(),
                        error = %e,
                        "Deal listing interrupted; sweeping fetched deals only"
                    );
                    return (deals, false);
                }
            }
        }
    }

    async fn check_deal(&self, deal: &DealSnapshot, today: NaiveDate) -> Result<DealCheck, SweepError> {
        let current = deal.stage.as_deref().and_then(|s| s.parse::<DealStage>().ok());
        if current.is_some_and(|stage| stage.is_closed()) {
            return Ok(DealCheck::Unchanged);
        }

        let Some(expected) = deal
            .first_subscription_date
            .as_deref()
            .and_then(parse_start_date)
            .and_then(|start| DealStage::expected_for_start_date(start, today))
        else {
            return Ok(DealCheck::Unchanged);
        };

        if deal.stage.as_deref() == Some(expected.as_str()) {
            return Ok(DealCheck::Unchanged);
        }

        self.crm.correct_stage(&deal.id, expected).await?;
        tracing::info!(
            deal_id = %deal.id,
            from = deal.stage.as_deref().unwrap_or("none"),
            to = %expected,
            "Deal stage corrected"
        );
        Ok(DealCheck::Corrected)
    }

    async fn prune_events(&self) -> Result<u64, SweepError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.event_retention_days);
        Ok(self.events.delete_before(cutoff).await?)
    }
}

/// Accepts `YYYY-MM-DD` and datetime strings that start with one.
fn parse_start_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Time from `now` until the next `hour:00` UTC.
fn until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let Some(today_run) = now.date_naive().and_hms_opt(hour, 0, 0) else {
        return Duration::from_secs(24 * 60 * 60);
    };
    let next = if today_run > now.naive_utc() {
        today_run
    } else {
        today_run + ChronoDuration::days(1)
    };
    (next - now.naive_utc()).to_std().unwrap_or(Duration::ZERO)
}
