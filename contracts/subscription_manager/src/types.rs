//! Contract types: errors, storage keys, subscription records and views.

use soroban_sdk::{contracterror, contracttype, Address};

/// Renewal window applied by `init` until the admin changes it.
pub const DEFAULT_RENEWAL_WINDOW: u64 = 30;

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    InvalidStatusTransition = 400,
    Unauthorized = 401,
    NotFound = 404,
    AlreadyInitialized = 409,
    InvalidPrice = 1001,
    InvalidDuration = 1002,
    IncorrectPaymentAmount = 1003,
    SubscriptionCancelled = 1004,
    RenewalNotDue = 1005,
    Overflow = 1006,
    NotInitialized = 1007,
    InvalidAmount = 1008,
    InsufficientRevenue = 1009,
    SubscriptionExpired = 1010,
    InsufficientFunds = 1011,
}

impl Error {
    pub fn to_code(self) -> u32 {
        self as u32
    }
}

#[contracttype]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum SubscriptionStatus {
    /// Created, no period paid yet.
    Pending = 0,
    Active = 1,
    Expired = 2,
    /// Terminal.
    Cancelled = 3,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subscription {
    pub id: u32,
    pub subscriber: Address,
    pub price: i128,
    pub duration: u64,
    /// Start of the current (or last) paid period.
    pub start_time: u64,
    pub status: SubscriptionStatus,
    pub periods_paid: u32,
}

impl Subscription {
    pub fn end_time(&self) -> Result<u64, Error> {
        self.start_time
            .checked_add(self.duration)
            .ok_or(Error::Overflow)
    }

    /// Status as seen at `now`: a stored `Active` record past its end reads as `Expired`.
    pub fn effective_status(&self, now: u64) -> Result<SubscriptionStatus, Error> {
        if self.status == SubscriptionStatus::Active && now >= self.end_time()? {
            return Ok(SubscriptionStatus::Expired);
        }
        Ok(self.status)
    }
}

/// Read-only status view returned by `get_subscription_status`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionState {
    pub status: SubscriptionStatus,
    pub is_active: bool,
    pub is_cancelled: bool,
    pub is_expired: bool,
    pub time_remaining: u64,
    pub end_time: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchResult {
    pub id: u32,
    pub success: bool,
    pub error_code: u32,
}

#[contracttype]
pub enum DataKey {
    // --- instance() ---
    Admin,
    Token,
    RenewalWindow,
    /// Number of subscriptions ever created; also the last issued id.
    Count,
    /// Collected payments not yet withdrawn by the admin.
    Revenue,
    // --- persistent() ---
    Subscription(u32),
    BySubscriber(Address),
}
