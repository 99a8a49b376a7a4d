//! Background auto-renewal.
//!
//! Each pass looks at active auto-renew documents whose period ends within the
//! renewal window and asks the contract to pull the next payment. A document
//! is claimed for one chain period (`renewed_period`) through a revision
//! checked write before the charge is sent, so two monitors, or two passes
//! racing each other, never charge the same period twice. A claim carries its
//! time; one older than `renewal_claim_lease_secs` was left by a pass that
//! died mid-charge and is taken over. The contract refuses a second charge
//! for a period that is already paid, so retaking a claim cannot double-charge.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::config::MirrorConfig;
use crate::error::{ChainError, MirrorError, Result, StoreError};
use crate::model::{DocStatus, Stored, SubscriptionDoc, USER_SUBSCRIPTIONS};
use crate::reconcile::{apply_chain_state, update_with_refresh};
use crate::store::{query_typed, update_typed, DocumentStore, Filter};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewalReport {
    pub scanned: usize,
    pub renewed: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: Vec<(String, String)>,
}

enum Attempt {
    Renewed,
    Skipped,
    Expired,
}

pub struct RenewalMonitor {
    store: Arc<dyn DocumentStore>,
    chain: Arc<dyn ChainClient>,
    config: MirrorConfig,
}

impl RenewalMonitor {
    pub fn new(store: Arc<dyn DocumentStore>, chain: Arc<dyn ChainClient>, config: MirrorConfig) -> Self {
        Self { store, chain, config }
    }

    /// Inside the window and not yet over.
    pub fn is_due(&self, doc: &SubscriptionDoc, now: u64) -> bool {
        doc.end_time > now && doc.end_time - now <= self.config.renewal_window_secs
    }

    /// A claim without a timestamp predates leases and counts as abandoned.
    fn claim_is_live(&self, doc: &SubscriptionDoc, now: u64) -> bool {
        doc.renewal_claimed_at
            .is_some_and(|at| now < at.saturating_add(self.config.renewal_claim_lease_secs))
    }

    pub async fn run_once(&self, now: u64) -> Result<RenewalReport> {
        let docs: Vec<Stored<SubscriptionDoc>> = query_typed(
            self.store.as_ref(),
            USER_SUBSCRIPTIONS,
            &[
                Filter::eq("autoRenew", true),
                Filter::eq("status", "active"),
                Filter::eq("isCancelled", false),
            ],
        )
        .await?;

        let mut report = RenewalReport {
            scanned: docs.len(),
            ..RenewalReport::default()
        };
        for stored in docs {
            let doc_id = stored.id.clone();
            match self.process(stored, now).await {
                Ok(Attempt::Renewed) => report.renewed += 1,
                Ok(Attempt::Expired) => report.expired += 1,
                Ok(Attempt::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(doc_id = %doc_id, error = %e, "auto-renewal failed");
                    report.failed.push((doc_id, e.to_string()));
                }
            }
        }

        if report.renewed > 0 || report.expired > 0 || !report.failed.is_empty() {
            info!(
                scanned = report.scanned,
                renewed = report.renewed,
                expired = report.expired,
                failed = report.failed.len(),
                "renewal pass finished"
            );
        } else {
            debug!(scanned = report.scanned, "renewal pass finished");
        }
        Ok(report)
    }

    async fn process(&self, mut stored: Stored<SubscriptionDoc>, now: u64) -> Result<Attempt> {
        let Some(chain_id) = stored.data.subscription_id else {
            return Ok(Attempt::Skipped);
        };

        if stored.data.end_time <= now {
            // Period over without a renewal; let the chain decide the status.
            let chain = self
                .chain
                .get_subscription(chain_id)
                .await?
                .ok_or_else(|| MirrorError::NotOnChain(stored.id.clone()))?;
            update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                apply_chain_state(doc, &chain, now)
            })
            .await?;
            return Ok(if stored.data.status == DocStatus::Expired {
                Attempt::Expired
            } else {
                Attempt::Skipped
            });
        }
        if !self.is_due(&stored.data, now) {
            return Ok(Attempt::Skipped);
        }

        let chain = self
            .chain
            .get_subscription(chain_id)
            .await?
            .ok_or_else(|| MirrorError::NotOnChain(stored.id.clone()))?;

        if chain.end_time() > stored.data.end_time {
            // Renewed elsewhere; catch the document up.
            update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                apply_chain_state(doc, &chain, now)
            })
            .await?;
            return Ok(Attempt::Skipped);
        }
        if stored.data.renewed_period == Some(chain.periods_paid) {
            if self.claim_is_live(&stored.data, now) {
                debug!(doc_id = %stored.id, chain_id, "period already attempted");
                return Ok(Attempt::Skipped);
            }
            warn!(
                doc_id = %stored.id,
                chain_id,
                claimed_at = ?stored.data.renewal_claimed_at,
                "renewal claim expired, retrying"
            );
        }

        // Claim this period. Losing the race means another pass owns it.
        stored.data.renewed_period = Some(chain.periods_paid);
        stored.data.renewal_claimed_at = Some(now);
        match update_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, &mut stored).await {
            Ok(()) => {}
            Err(MirrorError::Store(StoreError::Conflict { .. })) => {
                debug!(doc_id = %stored.id, chain_id, "renewal claimed by another writer");
                return Ok(Attempt::Skipped);
            }
            Err(e) => return Err(e),
        }

        match self.chain.charge_renewal(chain_id).await {
            Ok(receipt) => {
                let renewed = self
                    .chain
                    .get_subscription(chain_id)
                    .await?
                    .ok_or_else(|| MirrorError::NotOnChain(stored.id.clone()))?;
                let tx_hash = receipt.tx_hash;
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    apply_chain_state(doc, &renewed, now);
                    doc.last_renewal_time = Some(now);
                    doc.transaction_hash = Some(tx_hash.clone());
                    doc.last_error = None;
                    doc.updated_at = Utc::now();
                    true
                })
                .await?;
                info!(
                    doc_id = %stored.id,
                    chain_id,
                    end_time = stored.data.end_time,
                    "subscription auto-renewed"
                );
                Ok(Attempt::Renewed)
            }
            Err(ChainError::Contract(ChainError::RENEWAL_NOT_DUE)) => {
                // The contract window is narrower than ours; try again next pass.
                let period = chain.periods_paid;
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    if doc.renewed_period != Some(period) {
                        return false;
                    }
                    doc.renewed_period = None;
                    doc.renewal_claimed_at = None;
                    true
                })
                .await?;
                debug!(doc_id = %stored.id, chain_id, "contract reports renewal not yet due");
                Ok(Attempt::Skipped)
            }
            Err(e) if e.is_transient() => {
                let period = chain.periods_paid;
                let message = e.to_string();
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    if doc.renewed_period == Some(period) {
                        doc.renewed_period = None;
                        doc.renewal_claimed_at = None;
                    }
                    doc.last_error = Some(message.clone());
                    doc.updated_at = Utc::now();
                    true
                })
                .await?;
                Err(e.into())
            }
            Err(e) => {
                let message = MirrorError::from(e.clone()).user_message();
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    doc.auto_renew = false;
                    doc.last_error = Some(message.clone());
                    doc.updated_at = Utc::now();
                    true
                })
                .await?;
                warn!(doc_id = %stored.id, chain_id, error = %e, "auto-renew disabled after failed charge");
                Err(e.into())
            }
        }
    }

    /// Run passes every `poll_interval` until `shutdown` turns true or its
    /// sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                poll_interval_secs = self.config.poll_interval_secs,
                window_secs = self.config.renewal_window_secs,
                "renewal monitor started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
                        if let Err(e) = self.run_once(now).await {
                            error!(error = %e, "renewal pass aborted");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("renewal monitor stopped");
        })
    }
}
