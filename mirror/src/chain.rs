//! Client-side view of the subscription manager contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Stored contract status, same discriminants as the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    Pending = 0,
    Active = 1,
    Expired = 2,
    Cancelled = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSubscription {
    pub id: u32,
    pub subscriber: String,
    pub price: i128,
    pub duration: u64,
    pub start_time: u64,
    pub status: ChainStatus,
    pub periods_paid: u32,
}

impl ChainSubscription {
    pub fn end_time(&self) -> u64 {
        self.start_time.saturating_add(self.duration)
    }

    /// Mirrors the contract's read path: a stored `Active` record past its end reads as `Expired`.
    pub fn effective_status(&self, now: u64) -> ChainStatus {
        if self.status == ChainStatus::Active && now >= self.end_time() {
            ChainStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeReceipt {
    pub subscription_id: u32,
    pub tx_hash: String,
}

/// Submits contract calls and waits for confirmation. Implementations wrap a
/// wallet/RPC connection; errors carry the contract error code when the call
/// reverted.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn subscribe(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError>;

    async fn create_subscription(
        &self,
        subscriber: &str,
        price: i128,
        duration: u64,
    ) -> Result<SubscribeReceipt, ChainError>;

    async fn process_payment(
        &self,
        subscription_id: u32,
        payer: &str,
        amount: i128,
    ) -> Result<TxReceipt, ChainError>;

    async fn charge_renewal(&self, subscription_id: u32) -> Result<TxReceipt, ChainError>;

    async fn cancel_subscription(
        &self,
        subscription_id: u32,
        authorizer: &str,
    ) -> Result<TxReceipt, ChainError>;

    async fn get_subscription(
        &self,
        subscription_id: u32,
    ) -> Result<Option<ChainSubscription>, ChainError>;
}
