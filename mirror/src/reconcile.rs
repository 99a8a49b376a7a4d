//! Chain-to-document reconciliation.
//!
//! The contract owns lifecycle state (status, period timing, price, duration).
//! Documents own presentation metadata (service, plan, auto-renew). Reconciling
//! copies the former onto the latter and never the other way round.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainStatus, ChainSubscription};
use crate::error::{MirrorError, Result, StoreError};
use crate::model::{normalize_wallet, DocStatus, Stored, SubscriptionDoc, USER_SUBSCRIPTIONS};
use crate::store::{query_typed, require_typed, update_typed, DocumentStore, Filter};

pub fn doc_status(status: ChainStatus) -> DocStatus {
    match status {
        ChainStatus::Pending => DocStatus::Pending,
        ChainStatus::Active => DocStatus::Active,
        ChainStatus::Expired => DocStatus::Expired,
        ChainStatus::Cancelled => DocStatus::Cancelled,
    }
}

/// Copy chain-owned fields onto `doc`. Returns whether anything changed.
pub fn apply_chain_state(doc: &mut SubscriptionDoc, chain: &ChainSubscription, now: u64) -> bool {
    let before = doc.clone();

    doc.subscription_id = Some(chain.id);
    doc.price = chain.price;
    doc.duration = chain.duration;
    doc.start_time = chain.start_time;
    doc.end_time = chain.end_time();
    doc.status = doc_status(chain.effective_status(now));
    doc.is_cancelled = doc.status == DocStatus::Cancelled;
    if doc.is_cancelled {
        doc.auto_renew = false;
    }

    let changed = *doc != before;
    if changed {
        doc.updated_at = Utc::now();
    }
    changed
}

/// Apply `mutate` and write the document back. If another writer got there
/// first, re-read once and apply again on top of their version.
pub(crate) async fn update_with_refresh<F>(
    store: &dyn DocumentStore,
    stored: &mut Stored<SubscriptionDoc>,
    mut mutate: F,
) -> Result<bool>
where
    F: FnMut(&mut SubscriptionDoc) -> bool,
{
    if !mutate(&mut stored.data) {
        return Ok(false);
    }
    match update_typed(store, USER_SUBSCRIPTIONS, stored).await {
        Ok(()) => Ok(true),
        Err(MirrorError::Store(StoreError::Conflict { .. })) => {
            debug!(doc_id = %stored.id, "revision conflict, retrying on fresh copy");
            *stored = require_typed(store, USER_SUBSCRIPTIONS, &stored.id).await?;
            if !mutate(&mut stored.data) {
                return Ok(false);
            }
            update_typed(store, USER_SUBSCRIPTIONS, stored).await?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unchanged,
    Updated { from: DocStatus, to: DocStatus },
    /// The document points at a chain id the contract does not know.
    Missing,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub missing: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    chain: Arc<dyn ChainClient>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, chain: Arc<dyn ChainClient>) -> Self {
        Self { store, chain }
    }

    pub async fn reconcile_doc(
        &self,
        stored: &mut Stored<SubscriptionDoc>,
        now: u64,
    ) -> Result<ReconcileOutcome> {
        let Some(chain_id) = stored.data.subscription_id else {
            // Not on chain yet; nothing to compare against.
            return Ok(ReconcileOutcome::Unchanged);
        };

        let Some(chain) = self.chain.get_subscription(chain_id).await? else {
            warn!(doc_id = %stored.id, chain_id, "document references unknown chain subscription");
            return Ok(ReconcileOutcome::Missing);
        };

        let from = stored.data.status;
        let changed =
            update_with_refresh(self.store.as_ref(), stored, |doc| apply_chain_state(doc, &chain, now))
                .await?;
        if !changed {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let to = stored.data.status;
        if from != to {
            info!(doc_id = %stored.id, chain_id, %from, %to, "subscription status reconciled");
        } else {
            debug!(doc_id = %stored.id, chain_id, "subscription timing reconciled");
        }
        Ok(ReconcileOutcome::Updated { from, to })
    }

    /// Reconcile every document of one wallet. Per-document failures are
    /// collected rather than aborting the run.
    pub async fn reconcile_user(&self, wallet: &str, now: u64) -> Result<ReconcileReport> {
        let user_id = normalize_wallet(wallet);
        let docs: Vec<Stored<SubscriptionDoc>> = query_typed(
            self.store.as_ref(),
            USER_SUBSCRIPTIONS,
            &[Filter::eq("userId", user_id.as_str())],
        )
        .await?;

        let mut report = ReconcileReport::default();
        for mut stored in docs {
            report.checked += 1;
            match self.reconcile_doc(&mut stored, now).await {
                Ok(ReconcileOutcome::Unchanged) => {}
                Ok(ReconcileOutcome::Updated { .. }) => report.updated += 1,
                Ok(ReconcileOutcome::Missing) => report.missing.push(stored.id.clone()),
                Err(e) => {
                    warn!(doc_id = %stored.id, error = %e, "reconcile failed");
                    report.failed.push((stored.id.clone(), e.to_string()));
                }
            }
        }
        info!(
            user_id = %user_id,
            checked = report.checked,
            updated = report.updated,
            missing = report.missing.len(),
            failed = report.failed.len(),
            "reconcile finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(status: ChainStatus, start: u64) -> ChainSubscription {
        ChainSubscription {
            id: 3,
            subscriber: "GABC".into(),
            price: 500,
            duration: 100,
            start_time: start,
            status,
            periods_paid: 1,
        }
    }

    fn doc() -> SubscriptionDoc {
        let now = Utc::now();
        SubscriptionDoc {
            user_id: "gabc".into(),
            subscription_id: Some(3),
            service_id: 1,
            plan_id: "p".into(),
            service_name: "Nation Media".into(),
            plan_name: "Monthly".into(),
            price: 500,
            duration: 100,
            start_time: 0,
            end_time: 100,
            status: DocStatus::Active,
            auto_renew: true,
            is_cancelled: false,
            created_at: now,
            updated_at: now,
            last_renewal_time: None,
            transaction_hash: None,
            renewed_period: None,
            renewal_claimed_at: None,
            last_error: None,
        }
    }

    #[test]
    fn unchanged_when_in_sync() {
        let mut d = doc();
        assert!(!apply_chain_state(&mut d, &chain(ChainStatus::Active, 0), 50));
    }

    #[test]
    fn expiry_is_derived_from_time() {
        let mut d = doc();
        assert!(apply_chain_state(&mut d, &chain(ChainStatus::Active, 0), 100));
        assert_eq!(d.status, DocStatus::Expired);
        // Metadata is untouched.
        assert!(d.auto_renew);
        assert_eq!(d.plan_name, "Monthly");
    }

    #[test]
    fn cancellation_disables_auto_renew() {
        let mut d = doc();
        assert!(apply_chain_state(&mut d, &chain(ChainStatus::Cancelled, 0), 10));
        assert_eq!(d.status, DocStatus::Cancelled);
        assert!(d.is_cancelled);
        assert!(!d.auto_renew);
    }

    #[test]
    fn renewal_moves_the_period() {
        let mut d = doc();
        assert!(apply_chain_state(&mut d, &chain(ChainStatus::Active, 100), 90));
        assert_eq!((d.start_time, d.end_time), (100, 200));
        assert_eq!(d.status, DocStatus::Active);
    }
}
