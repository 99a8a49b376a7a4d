//! User-facing subscription operations.
//!
//! Every operation that changes lifecycle state goes to the chain first and
//! then refreshes the document from the chain record, so a failed chain call
//! never leaves a document claiming a state the contract does not have.
//!
//! Creating a subscription first takes the (user, service) slot in
//! `openSubscriptions` with an insert-if-absent write. Two creates racing for
//! the same service cannot both hold it, so at most one reaches the chain. A
//! slot whose subscription is no longer open, or whose create never finished
//! within `reservation_lease_secs`, is taken over.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::catalog::{find_service, PlanDoc};
use crate::chain::ChainClient;
use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result, StoreError};
use crate::model::{
    normalize_wallet, reservation_id, DocStatus, Reservation, Stored, SubscriptionDoc, UserDoc,
    OPEN_SUBSCRIPTIONS, SUBSCRIPTION_PLANS, USER_SUBSCRIPTIONS, USERS,
};
use crate::reconcile::{apply_chain_state, update_with_refresh, Reconciler};
use crate::store::{
    create_typed, get_typed, insert_typed, query_typed, require_typed, set_merge_typed,
    update_typed, DocumentStore, Filter,
};

/// Document id used for subscriptions created directly on chain. Deriving it
/// from the chain id makes save retries idempotent.
pub fn chain_doc_id(subscription_id: u32) -> String {
    format!("sub-{subscription_id}")
}

fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn ensure_owner(stored: &Stored<SubscriptionDoc>, wallet: &str) -> Result<()> {
    if normalize_wallet(wallet) != stored.data.user_id {
        return Err(MirrorError::NotOwner {
            doc_id: stored.id.clone(),
            wallet: wallet.trim().to_string(),
        });
    }
    Ok(())
}

fn slot_taken(user_id: &str, service_id: u32, status: DocStatus) -> MirrorError {
    MirrorError::DuplicateSubscription {
        user_id: user_id.to_string(),
        service_id,
        status,
    }
}

pub struct SubscriptionService {
    store: Arc<dyn DocumentStore>,
    chain: Arc<dyn ChainClient>,
    reconciler: Reconciler,
    config: MirrorConfig,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn DocumentStore>, chain: Arc<dyn ChainClient>, config: MirrorConfig) -> Self {
        let reconciler = Reconciler::new(store.clone(), chain.clone());
        Self {
            store,
            chain,
            reconciler,
            config,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Record a wallet connection.
    pub async fn connect_user(&self, wallet: &str) -> Result<UserDoc> {
        let user = UserDoc {
            wallet_address: normalize_wallet(wallet),
            last_connected: Utc::now(),
        };
        set_merge_typed(self.store.as_ref(), USERS, &user.wallet_address, &user).await?;
        info!(wallet = %user.wallet_address, "user connected");
        Ok(user)
    }

    async fn load_plan(&self, service_id: u32, plan_id: &str) -> Result<PlanDoc> {
        let plan: Option<Stored<PlanDoc>> = get_typed(self.store.as_ref(), SUBSCRIPTION_PLANS, plan_id).await?;
        match plan {
            Some(p) if p.data.service_id == service_id => Ok(p.data),
            _ => Err(MirrorError::UnknownPlan {
                service_id,
                plan_id: plan_id.to_string(),
            }),
        }
    }

    /// Take the (user, service) slot, or fail with `DuplicateSubscription`
    /// while an open subscription or an unfinished create holds it.
    async fn reserve(&self, user_id: &str, service_id: u32, now: u64) -> Result<Stored<Reservation>> {
        let key = reservation_id(user_id, service_id);
        let fresh = Reservation {
            user_id: user_id.to_string(),
            service_id,
            holder: None,
            reserved_at: now,
        };
        match create_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, &key, fresh.clone()).await {
            Err(MirrorError::Store(StoreError::AlreadyExists { .. })) => {}
            other => return other,
        }

        let current: Option<Stored<Reservation>> =
            get_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, &key).await?;
        let Some(mut current) = current else {
            // Released between the two calls.
            return create_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, &key, fresh)
                .await
                .map_err(|e| match e {
                    MirrorError::Store(StoreError::AlreadyExists { .. }) => {
                        slot_taken(user_id, service_id, DocStatus::Pending)
                    }
                    other => other,
                });
        };
        if let Some(status) = self.live_holder(&current.data, now).await? {
            return Err(slot_taken(user_id, service_id, status));
        }

        debug!(reservation = %key, holder = ?current.data.holder, "taking over stale reservation");
        current.data = fresh;
        match update_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, &mut current).await {
            Ok(()) => Ok(current),
            Err(MirrorError::Store(StoreError::Conflict { .. })) => {
                Err(slot_taken(user_id, service_id, DocStatus::Pending))
            }
            Err(e) => Err(e),
        }
    }

    /// Status of whatever still holds `reservation`, or `None` if it is stale.
    async fn live_holder(&self, reservation: &Reservation, now: u64) -> Result<Option<DocStatus>> {
        let Some(doc_id) = &reservation.holder else {
            let expires = reservation
                .reserved_at
                .saturating_add(self.config.reservation_lease_secs);
            return Ok((now < expires).then_some(DocStatus::Pending));
        };
        let doc: Option<Stored<SubscriptionDoc>> =
            get_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc_id).await?;
        let Some(mut stored) = doc else {
            return Ok(None);
        };
        if stored.data.status.is_open() {
            self.reconciler.reconcile_doc(&mut stored, now).await?;
        }
        Ok(stored.data.status.is_open().then_some(stored.data.status))
    }

    async fn set_holder(&self, reservation: &mut Stored<Reservation>, doc_id: &str) {
        reservation.data.holder = Some(doc_id.to_string());
        if let Err(e) = update_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, reservation).await {
            // The slot falls back to its lease; the open-document scan still blocks duplicates.
            warn!(reservation = %reservation.id, doc_id, error = %e, "could not record reservation holder");
        }
    }

    /// Free the slot if `holder` still holds it. `None` means an unfinished create.
    async fn release(&self, key: &str, holder: Option<&str>) {
        let result: Result<()> = async {
            let current: Option<Stored<Reservation>> =
                get_typed(self.store.as_ref(), OPEN_SUBSCRIPTIONS, key).await?;
            match current {
                Some(r) if r.data.holder.as_deref() == holder => {
                    match self.store.delete(OPEN_SUBSCRIPTIONS, key).await {
                        Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
                        Err(e) => Err(e.into()),
                    }
                }
                _ => Ok(()),
            }
        }
        .await;
        if let Err(e) = result {
            warn!(reservation = %key, error = %e, "could not release reservation");
        }
    }

    /// Refuse a second open subscription to the same service. Open documents
    /// are reconciled first so one that quietly expired does not block.
    async fn ensure_no_open_subscription(&self, user_id: &str, service_id: u32, now: u64) -> Result<()> {
        let docs: Vec<Stored<SubscriptionDoc>> = query_typed(
            self.store.as_ref(),
            USER_SUBSCRIPTIONS,
            &[Filter::eq("userId", user_id), Filter::eq("serviceId", service_id)],
        )
        .await?;

        for mut stored in docs.into_iter().filter(|d| d.data.status.is_open()) {
            self.reconciler.reconcile_doc(&mut stored, now).await?;
            if stored.data.status.is_open() {
                return Err(MirrorError::DuplicateSubscription {
                    user_id: user_id.to_string(),
                    service_id,
                    status: stored.data.status,
                });
            }
        }
        Ok(())
    }

    fn new_doc(user_id: String, service_id: u32, plan_id: &str, plan: &PlanDoc, auto_renew: bool) -> Result<SubscriptionDoc> {
        let service = find_service(service_id).ok_or(MirrorError::UnknownService(service_id))?;
        let now = Utc::now();
        Ok(SubscriptionDoc {
            user_id,
            subscription_id: None,
            service_id,
            plan_id: plan_id.to_string(),
            service_name: service.name.to_string(),
            plan_name: plan.name.clone(),
            price: plan.price,
            duration: plan.duration,
            start_time: 0,
            end_time: 0,
            status: DocStatus::Pending,
            auto_renew,
            is_cancelled: false,
            created_at: now,
            updated_at: now,
            last_renewal_time: None,
            transaction_hash: None,
            renewed_period: None,
            renewal_claimed_at: None,
            last_error: None,
        })
    }

    /// Subscribe and pay the first period on chain, then save the mirror document.
    pub async fn create_subscription(
        &self,
        wallet: &str,
        service_id: u32,
        plan_id: &str,
        auto_renew: bool,
    ) -> Result<Stored<SubscriptionDoc>> {
        find_service(service_id).ok_or(MirrorError::UnknownService(service_id))?;
        let user_id = normalize_wallet(wallet);
        let plan = self.load_plan(service_id, plan_id).await?;
        let now = now_secs();
        let mut reservation = self.reserve(&user_id, service_id, now).await?;
        if let Err(e) = self.ensure_no_open_subscription(&user_id, service_id, now).await {
            self.release(&reservation.id, None).await;
            return Err(e);
        }

        let receipt = match self
            .chain
            .subscribe(wallet.trim(), plan.price, plan.duration)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.release(&reservation.id, None).await;
                return Err(e.into());
            }
        };
        let id = chain_doc_id(receipt.subscription_id);
        self.set_holder(&mut reservation, &id).await;

        let chain = self
            .chain
            .get_subscription(receipt.subscription_id)
            .await?
            .ok_or_else(|| MirrorError::NotOnChain(chain_doc_id(receipt.subscription_id)))?;

        let mut doc = Self::new_doc(user_id, service_id, plan_id, &plan, auto_renew)?;
        apply_chain_state(&mut doc, &chain, now);
        doc.transaction_hash = Some(receipt.tx_hash);

        let revision = self.save_with_retry(&id, &doc).await.inspect_err(|e| {
            error!(
                chain_id = receipt.subscription_id,
                error = %e,
                "subscription is on chain but its document could not be saved"
            );
        })?;
        info!(doc_id = %id, chain_id = receipt.subscription_id, service_id, "subscription created");
        Ok(Stored {
            id,
            revision,
            data: doc,
        })
    }

    async fn save_with_retry(&self, id: &str, doc: &SubscriptionDoc) -> Result<u64> {
        let mut attempt = 1;
        loop {
            match set_merge_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, id, doc).await {
                Ok(revision) => return Ok(revision),
                Err(e) if attempt < self.config.save_retries => {
                    warn!(doc_id = %id, attempt, error = %e, "save failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Save a pending document without touching the chain. Paid later with
    /// [`pay_pending`](Self::pay_pending).
    pub async fn create_pending(
        &self,
        wallet: &str,
        service_id: u32,
        plan_id: &str,
        auto_renew: bool,
    ) -> Result<Stored<SubscriptionDoc>> {
        find_service(service_id).ok_or(MirrorError::UnknownService(service_id))?;
        let user_id = normalize_wallet(wallet);
        let plan = self.load_plan(service_id, plan_id).await?;
        let doc = Self::new_doc(user_id.clone(), service_id, plan_id, &plan, auto_renew)?;
        let now = now_secs();
        let mut reservation = self.reserve(&user_id, service_id, now).await?;

        let checked = self.ensure_no_open_subscription(&user_id, service_id, now).await;
        let inserted = match checked {
            Ok(()) => insert_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc).await,
            Err(e) => Err(e),
        };
        let stored = match inserted {
            Ok(stored) => stored,
            Err(e) => {
                self.release(&reservation.id, None).await;
                return Err(e);
            }
        };
        self.set_holder(&mut reservation, &stored.id).await;
        info!(doc_id = %stored.id, service_id, "pending subscription saved");
        Ok(stored)
    }

    /// Create the chain record (once) and pay the first period for a pending
    /// document. Only the wallet that owns the document may pay it.
    pub async fn pay_pending(&self, doc_id: &str, wallet: &str) -> Result<Stored<SubscriptionDoc>> {
        let mut stored: Stored<SubscriptionDoc> =
            require_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc_id).await?;
        ensure_owner(&stored, wallet)?;
        if stored.data.status != DocStatus::Pending {
            return Err(MirrorError::InvalidState {
                status: stored.data.status,
                message: "only pending subscriptions can be paid here".into(),
            });
        }

        let chain_id = match stored.data.subscription_id {
            Some(id) => id,
            None => {
                let receipt = self
                    .chain
                    .create_subscription(wallet.trim(), stored.data.price, stored.data.duration)
                    .await?;
                // Persist the chain id before paying so a retry reuses it.
                let id = receipt.subscription_id;
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    doc.subscription_id = Some(id);
                    doc.updated_at = Utc::now();
                    true
                })
                .await?;
                id
            }
        };

        let receipt = self
            .chain
            .process_payment(chain_id, wallet.trim(), stored.data.price)
            .await?;
        let chain = self
            .chain
            .get_subscription(chain_id)
            .await?
            .ok_or_else(|| MirrorError::NotOnChain(stored.id.clone()))?;

        let now = now_secs();
        let tx_hash = receipt.tx_hash;
        update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
            apply_chain_state(doc, &chain, now);
            doc.transaction_hash = Some(tx_hash.clone());
            true
        })
        .await?;
        info!(doc_id = %stored.id, chain_id, "pending subscription paid");
        Ok(stored)
    }

    pub async fn list_subscriptions(
        &self,
        wallet: &str,
        service_id: Option<u32>,
    ) -> Result<Vec<Stored<SubscriptionDoc>>> {
        let user_id = normalize_wallet(wallet);
        let mut filters = vec![Filter::eq("userId", user_id.as_str())];
        if let Some(service_id) = service_id {
            filters.push(Filter::eq("serviceId", service_id));
        }
        query_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, &filters).await
    }

    pub async fn set_auto_renew(
        &self,
        doc_id: &str,
        wallet: &str,
        enabled: bool,
    ) -> Result<Stored<SubscriptionDoc>> {
        let mut stored: Stored<SubscriptionDoc> =
            require_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc_id).await?;
        ensure_owner(&stored, wallet)?;
        if !stored.data.can_toggle_auto_renew() {
            return Err(MirrorError::InvalidState {
                status: stored.data.status,
                message: "auto-renew can only be toggled for active subscriptions".into(),
            });
        }

        update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
            if doc.auto_renew == enabled || !doc.can_toggle_auto_renew() {
                return false;
            }
            doc.auto_renew = enabled;
            // A fresh opt-in gets a fresh renewal attempt.
            doc.renewed_period = None;
            doc.renewal_claimed_at = None;
            doc.last_error = None;
            doc.updated_at = Utc::now();
            true
        })
        .await?;
        info!(doc_id, enabled, "auto-renew updated");
        Ok(stored)
    }

    /// Cancel on chain, then mirror. Access continues until `end_time`, but
    /// the service is free for a new subscription straight away.
    pub async fn cancel(&self, doc_id: &str, wallet: &str) -> Result<Stored<SubscriptionDoc>> {
        let mut stored: Stored<SubscriptionDoc> =
            require_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc_id).await?;
        ensure_owner(&stored, wallet)?;
        if stored.data.status == DocStatus::Cancelled {
            return Ok(stored);
        }

        match stored.data.subscription_id {
            Some(chain_id) => {
                self.chain.cancel_subscription(chain_id, wallet.trim()).await?;
                let chain = self
                    .chain
                    .get_subscription(chain_id)
                    .await?
                    .ok_or_else(|| MirrorError::NotOnChain(stored.id.clone()))?;
                let now = now_secs();
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    apply_chain_state(doc, &chain, now)
                })
                .await?;
            }
            None => {
                update_with_refresh(self.store.as_ref(), &mut stored, |doc| {
                    doc.status = DocStatus::Cancelled;
                    doc.is_cancelled = true;
                    doc.auto_renew = false;
                    doc.updated_at = Utc::now();
                    true
                })
                .await?;
            }
        }
        let key = reservation_id(&stored.data.user_id, stored.data.service_id);
        self.release(&key, Some(doc_id)).await;
        info!(doc_id, end_time = stored.data.end_time, "subscription cancelled");
        Ok(stored)
    }

    /// Remove one of `wallet`'s documents. Refused while it still mirrors a
    /// live chain record.
    pub async fn delete(&self, doc_id: &str, wallet: &str) -> Result<()> {
        let stored: Stored<SubscriptionDoc> =
            require_typed(self.store.as_ref(), USER_SUBSCRIPTIONS, doc_id).await?;
        ensure_owner(&stored, wallet)?;
        let live = match stored.data.status {
            DocStatus::Active => true,
            DocStatus::Pending => stored.data.subscription_id.is_some(),
            DocStatus::Expired | DocStatus::Cancelled => false,
        };
        if live {
            return Err(MirrorError::InvalidState {
                status: stored.data.status,
                message: "cancel the subscription before deleting it".into(),
            });
        }
        self.store.delete(USER_SUBSCRIPTIONS, doc_id).await?;
        let key = reservation_id(&stored.data.user_id, stored.data.service_id);
        self.release(&key, Some(doc_id)).await;
        info!(doc_id, "subscription document deleted");
        Ok(())
    }
}
