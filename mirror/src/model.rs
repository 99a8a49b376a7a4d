//! Document shapes stored in the mirror collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const USERS: &str = "users";
pub const USER_SUBSCRIPTIONS: &str = "userSubscriptions";
pub const SUBSCRIPTION_PLANS: &str = "subscriptionPlans";
/// One reservation per (user, service) with an open subscription.
pub const OPEN_SUBSCRIPTIONS: &str = "openSubscriptions";

/// Wallet addresses are compared case-insensitively; documents key on the lowercase form.
pub fn normalize_wallet(wallet: &str) -> String {
    wallet.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl DocStatus {
    /// Blocks a second subscription to the same service.
    pub fn is_open(self) -> bool {
        matches!(self, DocStatus::Pending | DocStatus::Active)
    }
}

impl fmt::Display for DocStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocStatus::Pending => "pending",
            DocStatus::Active => "active",
            DocStatus::Expired => "expired",
            DocStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Token amounts are kept as decimal strings so they survive JSON stores that
/// only have 64-bit floats.
pub mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub wallet_address: String,
    pub last_connected: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDoc {
    pub user_id: String,
    /// On-chain id; `None` until the chain record exists.
    pub subscription_id: Option<u32>,
    pub service_id: u32,
    pub plan_id: String,
    pub service_name: String,
    pub plan_name: String,
    #[serde(with = "amount")]
    pub price: i128,
    /// Seconds.
    pub duration: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub status: DocStatus,
    pub auto_renew: bool,
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_renewal_time: Option<u64>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Chain `periods_paid` the last renewal attempt was made for.
    #[serde(default)]
    pub renewed_period: Option<u32>,
    /// When `renewed_period` was claimed. A claim without a timestamp, or one
    /// older than the lease, no longer blocks a retry.
    #[serde(default)]
    pub renewal_claimed_at: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SubscriptionDoc {
    pub fn time_remaining(&self, now: u64) -> u64 {
        match self.status {
            DocStatus::Active | DocStatus::Cancelled => self.end_time.saturating_sub(now),
            DocStatus::Pending | DocStatus::Expired => 0,
        }
    }

    /// Auto-renew may only be toggled on a running, non-cancelled subscription.
    pub fn can_toggle_auto_renew(&self) -> bool {
        self.status == DocStatus::Active && !self.is_cancelled
    }
}

/// Holds the (user, service) slot while a subscription is open or being
/// created. `holder` is the subscription document id once it is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub user_id: String,
    pub service_id: u32,
    #[serde(default)]
    pub holder: Option<String>,
    pub reserved_at: u64,
}

pub fn reservation_id(user_id: &str, service_id: u32) -> String {
    format!("{user_id}:{service_id}")
}

/// A document together with its store id and revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: String,
    pub revision: u64,
    pub data: T,
}
