#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use subscription_mirror::catalog::{get_service_plans, seed_subscription_plans};
use subscription_mirror::chain::{SubscribeReceipt, TxReceipt};
use subscription_mirror::{
    ChainClient, ChainError, ChainStatus, ChainSubscription, MemoryStore, MirrorConfig,
    RenewalMonitor, SubscriptionService,
};

pub const ADMIN: &str = "GADMIN";
pub const WALLET: &str = "GUSER1";

#[derive(Default)]
struct FakeState {
    now: u64,
    window: u64,
    next_id: u32,
    subs: BTreeMap<u32, ChainSubscription>,
    balances: HashMap<String, i128>,
    allowances: HashMap<String, i128>,
    failures: VecDeque<ChainError>,
    tx_count: u64,
    charge_calls: usize,
}

impl FakeState {
    fn tx(&mut self) -> String {
        self.tx_count += 1;
        format!("tx-{:04}", self.tx_count)
    }

    fn injected(&mut self) -> Result<(), ChainError> {
        match self.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn sub_mut(&mut self, id: u32) -> Result<&mut ChainSubscription, ChainError> {
        self.subs.get_mut(&id).ok_or(ChainError::Contract(404))
    }

    fn create(&mut self, subscriber: &str, price: i128, duration: u64) -> Result<u32, ChainError> {
        if price <= 0 {
            return Err(ChainError::Contract(1001));
        }
        if duration == 0 {
            return Err(ChainError::Contract(1002));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.subs.insert(
            id,
            ChainSubscription {
                id,
                subscriber: subscriber.to_string(),
                price,
                duration,
                start_time: self.now,
                status: ChainStatus::Pending,
                periods_paid: 0,
            },
        );
        Ok(id)
    }

    fn advance(sub: &mut ChainSubscription, now: u64) {
        sub.start_time = if sub.effective_status(now) == ChainStatus::Active {
            sub.end_time()
        } else {
            now
        };
        sub.status = ChainStatus::Active;
        sub.periods_paid += 1;
    }

    fn pay(&mut self, id: u32, payer: &str, amount: i128) -> Result<(), ChainError> {
        let now = self.now;
        let price = {
            let sub = self.sub_mut(id)?;
            if sub.status == ChainStatus::Cancelled {
                return Err(ChainError::Contract(ChainError::SUBSCRIPTION_CANCELLED));
            }
            if amount != sub.price {
                return Err(ChainError::Contract(ChainError::INCORRECT_PAYMENT_AMOUNT));
            }
            sub.price
        };
        let balance = self.balances.entry(payer.to_string()).or_default();
        if *balance < price {
            return Err(ChainError::Contract(ChainError::INSUFFICIENT_FUNDS));
        }
        *balance -= price;
        Self::advance(self.sub_mut(id)?, now);
        Ok(())
    }
}

/// In-memory stand-in for the deployed contract, with the same rules for
/// payments, renewal windows and cancellation.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(now: u64, window: u64) -> Self {
        let chain = Self::default();
        {
            let mut st = chain.state.lock().unwrap();
            st.now = now;
            st.window = window;
        }
        chain
    }

    pub fn set_time(&self, now: u64) {
        self.state.lock().unwrap().now = now;
    }

    pub fn fund(&self, wallet: &str, balance: i128) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(wallet.to_string(), balance);
    }

    pub fn approve(&self, wallet: &str, allowance: i128) {
        self.state
            .lock()
            .unwrap()
            .allowances
            .insert(wallet.to_string(), allowance);
    }

    pub fn balance(&self, wallet: &str) -> i128 {
        *self.state.lock().unwrap().balances.get(wallet).unwrap_or(&0)
    }

    pub fn fail_next(&self, error: ChainError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    pub fn charge_calls(&self) -> usize {
        self.state.lock().unwrap().charge_calls
    }

    pub fn subscription(&self, id: u32) -> Option<ChainSubscription> {
        self.state.lock().unwrap().subs.get(&id).cloned()
    }

    /// Pay a period directly on chain, bypassing the mirror.
    pub fn pay_directly(&self, id: u32, payer: &str) {
        let mut st = self.state.lock().unwrap();
        let price = st.subs[&id].price;
        st.pay(id, payer, price).unwrap();
    }

    pub fn cancel_directly(&self, id: u32) {
        let mut st = self.state.lock().unwrap();
        st.sub_mut(id).unwrap().status = ChainStatus::Cancelled;
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn subscribe(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError> {
        let mut st = self.state.lock().unwrap();
        st.injected()?;
        let balance = *st.balances.get(subscriber).unwrap_or(&0);
        if balance < price {
            return Err(ChainError::Contract(ChainError::INSUFFICIENT_FUNDS));
        }
        let id = st.create(subscriber, price, duration)?;
        st.pay(id, subscriber, price)?;
        Ok(SubscribeReceipt {
            subscription_id: id,
            tx_hash: st.tx(),
        })
    }

    async fn create_subscription(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError> {
        let mut st = self.state.lock().unwrap();
        st.injected()?;
        let id = st.create(subscriber, price, duration)?;
        Ok(SubscribeReceipt {
            subscription_id: id,
            tx_hash: st.tx(),
        })
    }

    async fn process_payment(
        &self,
        subscription_id: u32,
        payer: &str,
        amount: i128,
    ) -> Result<TxReceipt, ChainError> {
        let mut st = self.state.lock().unwrap();
        st.injected()?;
        st.pay(subscription_id, payer, amount)?;
        Ok(TxReceipt { tx_hash: st.tx() })
    }

    async fn charge_renewal(&self, subscription_id: u32) -> Result<TxReceipt, ChainError> {
        let mut st = self.state.lock().unwrap();
        st.charge_calls += 1;
        st.injected()?;
        let (now, window) = (st.now, st.window);
        let sub = st.sub_mut(subscription_id)?;
        match sub.status {
            ChainStatus::Cancelled => {
                return Err(ChainError::Contract(ChainError::SUBSCRIPTION_CANCELLED))
            }
            ChainStatus::Pending => return Err(ChainError::Contract(400)),
            ChainStatus::Expired => return Err(ChainError::Contract(ChainError::SUBSCRIPTION_EXPIRED)),
            ChainStatus::Active => {}
        }
        let end = sub.end_time();
        if now >= end {
            return Err(ChainError::Contract(ChainError::SUBSCRIPTION_EXPIRED));
        }
        // Next period already paid, or not yet inside the window.
        if sub.start_time > now || end - now > window {
            return Err(ChainError::Contract(ChainError::RENEWAL_NOT_DUE));
        }
        let (subscriber, price) = (sub.subscriber.clone(), sub.price);

        let allowance = *st.allowances.get(&subscriber).unwrap_or(&0);
        let balance = *st.balances.get(&subscriber).unwrap_or(&0);
        if allowance < price || balance < price {
            return Err(ChainError::Contract(ChainError::INSUFFICIENT_FUNDS));
        }
        st.allowances.insert(subscriber.clone(), allowance - price);
        st.balances.insert(subscriber, balance - price);
        FakeState::advance(st.sub_mut(subscription_id)?, now);
        Ok(TxReceipt { tx_hash: st.tx() })
    }

    async fn cancel_subscription(
        &self,
        subscription_id: u32,
        authorizer: &str,
    ) -> Result<TxReceipt, ChainError> {
        let mut st = self.state.lock().unwrap();
        st.injected()?;
        let sub = st.sub_mut(subscription_id)?;
        if sub.status != ChainStatus::Cancelled {
            if authorizer != sub.subscriber && authorizer != ADMIN {
                return Err(ChainError::Contract(401));
            }
            sub.status = ChainStatus::Cancelled;
        }
        Ok(TxReceipt { tx_hash: st.tx() })
    }

    async fn get_subscription(
        &self,
        subscription_id: u32,
    ) -> Result<Option<ChainSubscription>, ChainError> {
        Ok(self.state.lock().unwrap().subs.get(&subscription_id).cloned())
    }
}

/// Yields to the scheduler before every call, as a real RPC round-trip would,
/// so tasks joined together actually interleave at chain calls.
pub struct Yielding(pub Arc<FakeChain>);

#[async_trait]
impl ChainClient for Yielding {
    async fn subscribe(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError> {
        tokio::task::yield_now().await;
        self.0.subscribe(subscriber, price, duration).await
    }

    async fn create_subscription(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError> {
        tokio::task::yield_now().await;
        self.0.create_subscription(subscriber, price, duration).await
    }

    async fn process_payment(
        &self,
        subscription_id: u32,
        payer: &str,
        amount: i128,
    ) -> Result<TxReceipt, ChainError> {
        tokio::task::yield_now().await;
        self.0.process_payment(subscription_id, payer, amount).await
    }

    async fn charge_renewal(&self, subscription_id: u32) -> Result<TxReceipt, ChainError> {
        tokio::task::yield_now().await;
        self.0.charge_renewal(subscription_id).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: u32,
        authorizer: &str,
    ) -> Result<TxReceipt, ChainError> {
        tokio::task::yield_now().await;
        self.0.cancel_subscription(subscription_id, authorizer).await
    }

    async fn get_subscription(
        &self,
        subscription_id: u32,
    ) -> Result<Option<ChainSubscription>, ChainError> {
        tokio::task::yield_now().await;
        self.0.get_subscription(subscription_id).await
    }
}

pub struct Harness {
    /// Chain time at setup, taken from the wall clock because the service
    /// stamps reconciles with the current time.
    pub t0: u64,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<FakeChain>,
    pub config: MirrorConfig,
    pub service: SubscriptionService,
}

impl Harness {
    pub async fn new() -> Self {
        let config = MirrorConfig {
            retry_delay_ms: 1,
            token_decimals: 0,
            ..MirrorConfig::default()
        };
        Self::with_config(config).await
    }

    pub async fn with_config(config: MirrorConfig) -> Self {
        let t0 = u64::try_from(chrono::Utc::now().timestamp()).unwrap();
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(FakeChain::new(t0, 30));
        chain.fund(WALLET, 10_000);
        seed_subscription_plans(store.as_ref(), config.token_decimals)
            .await
            .unwrap();
        let service = SubscriptionService::new(store.clone(), chain.clone(), config.clone());
        Self {
            t0,
            store,
            chain,
            config,
            service,
        }
    }

    pub fn monitor(&self) -> RenewalMonitor {
        RenewalMonitor::new(self.store.clone(), self.chain.clone(), self.config.clone())
    }

    /// Service over the same store and chain whose chain calls yield.
    pub fn yielding_service(&self) -> SubscriptionService {
        let chain = Arc::new(Yielding(self.chain.clone()));
        SubscriptionService::new(self.store.clone(), chain, self.config.clone())
    }

    pub fn yielding_monitor(&self) -> RenewalMonitor {
        let chain = Arc::new(Yielding(self.chain.clone()));
        RenewalMonitor::new(self.store.clone(), chain, self.config.clone())
    }

    /// Store id of the plan called `name` for `service_id`.
    pub async fn plan_id(&self, service_id: u32, name: &str) -> String {
        get_service_plans(self.store.as_ref(), service_id)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.data.name == name)
            .map(|p| p.id)
            .unwrap()
    }
}
