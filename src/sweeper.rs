//! Background maintenance
//!
//! Expires sessions nobody touched, drops closed sessions created before the
//! retention cutoff and prunes the activity log and resolved alerts.

use crate::error::SessionError;
use crate::models::SessionStatus;
use crate::service::SessionManager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// What one sweep changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub deleted: usize,
    pub activities_pruned: usize,
    pub alerts_pruned: usize,
    pub failed_logins_pruned: usize,
    pub locks_pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl SessionManager {
    /// Run one maintenance pass
    pub async fn sweep(&self) -> Result<SweepReport, SessionError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let retention_cutoff = now - self.config.session_retention();
        for session in self.store.list_all().await? {
            if session.is_active() {
                if session.is_overdue(now, self.config.inactivity_timeout())
                    && self
                        .close_session(session.id, SessionStatus::Expired, "sweep")
                        .await?
                {
                    report.expired += 1;
                }
            } else if session.created_at < retention_cutoff {
                let _session_guard = self.session_locks.lock(session.id).await;
                // A refresh may have revived it since the listing
                let still_closed = self
                    .store
                    .get(session.id)
                    .await?
                    .map_or(false, |s| !s.is_active() && s.created_at < retention_cutoff);
                if still_closed {
                    self.store.delete(session.id).await?;
                    report.deleted += 1;
                }
            }
        }

        report.activities_pruned = self
            .activities
            .prune(now - self.config.activity_retention())
            .await?;
        report.alerts_pruned = self
            .alerts
            .prune_resolved(now - self.config.resolved_alert_retention())
            .await?;
        report.failed_logins_pruned = self
            .failed_logins
            .prune(now - self.config.brute_force_window());
        report.locks_pruned = self.user_locks.prune() + self.session_locks.prune();

        if report.is_empty() {
            debug!("Sweep found nothing to do");
        } else {
            info!(
                "Sweep expired {} sessions, deleted {}, pruned {} activities and {} alerts",
                report.expired, report.deleted, report.activities_pruned, report.alerts_pruned
            );
        }

        Ok(report)
    }
}

/// Run [`SessionManager::sweep`] every `sweep_interval_secs` until the
/// handle is aborted
pub fn spawn_sweeper(manager: Arc<SessionManager>) -> JoinHandle<()> {
    let period = manager.config().sweep_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = manager.sweep().await {
                warn!("Session sweep failed: {:?}", e);
            }
        }
    })
}
