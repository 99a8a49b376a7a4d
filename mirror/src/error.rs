use thiserror::Error;

use crate::model::DocStatus;

/// Failures reported by a [`ChainClient`](crate::chain::ChainClient).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transaction was rejected by the signer")]
    Rejected,

    #[error("contract error code {0}")]
    Contract(u32),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction confirmation timed out")]
    Timeout,
}

impl ChainError {
    pub const INCORRECT_PAYMENT_AMOUNT: u32 = 1003;
    pub const SUBSCRIPTION_CANCELLED: u32 = 1004;
    pub const RENEWAL_NOT_DUE: u32 = 1005;
    pub const SUBSCRIPTION_EXPIRED: u32 = 1010;
    pub const INSUFFICIENT_FUNDS: u32 = 1011;

    /// Worth retrying later without user involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_) | ChainError::Timeout)
    }
}

/// Failures reported by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} changed concurrently (expected revision {expected}, found {found})")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("unknown service {0}")]
    UnknownService(u32),

    #[error("unknown plan {plan_id} for service {service_id}")]
    UnknownPlan { service_id: u32, plan_id: String },

    #[error("user {user_id} already has a {status} subscription to service {service_id}")]
    DuplicateSubscription {
        user_id: String,
        service_id: u32,
        status: DocStatus,
    },

    #[error("operation not allowed while subscription is {status}: {message}")]
    InvalidState { status: DocStatus, message: String },

    #[error("wallet {wallet} does not own subscription {doc_id}")]
    NotOwner { doc_id: String, wallet: String },

    #[error("subscription {0} has no on-chain record")]
    NotOnChain(String),
}

impl MirrorError {
    /// Short message suitable for showing to the wallet holder.
    pub fn user_message(&self) -> String {
        match self {
            MirrorError::Chain(ChainError::Rejected) => "Transaction was rejected by user".into(),
            MirrorError::Chain(ChainError::Timeout) => {
                "Transaction is taking longer than expected. Please check your wallet for status.".into()
            }
            MirrorError::Chain(ChainError::Transport(_)) => {
                "Network error. Please try again or check your wallet connection.".into()
            }
            MirrorError::Chain(ChainError::Contract(ChainError::INSUFFICIENT_FUNDS)) => {
                "Insufficient balance or allowance for this payment.".into()
            }
            MirrorError::Chain(ChainError::Contract(ChainError::INCORRECT_PAYMENT_AMOUNT)) => {
                "Invalid transaction parameters. Please check the amount and try again.".into()
            }
            MirrorError::DuplicateSubscription { status, .. } => {
                format!("You already have a {status} subscription to this service.")
            }
            MirrorError::InvalidState { message, .. } => message.clone(),
            MirrorError::NotOwner { .. } => "This subscription belongs to another wallet.".into(),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
