//! Off-chain mirror for the subscription manager contract.
//!
//! Keeps Firestore-shaped subscription documents in step with the contract,
//! prevents duplicate subscriptions per service, and drives auto-renewal.

pub mod catalog;
pub mod chain;
pub mod config;
pub mod countdown;
pub mod error;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod reconcile;
pub mod service;
pub mod store;

pub use chain::{ChainClient, ChainStatus, ChainSubscription};
pub use config::MirrorConfig;
pub use error::{ChainError, MirrorError, Result, StoreError};
pub use model::{DocStatus, Stored, SubscriptionDoc};
pub use monitor::{RenewalMonitor, RenewalReport};
pub use reconcile::{ReconcileOutcome, ReconcileReport, Reconciler};
pub use service::SubscriptionService;
pub use store::{DocumentStore, MemoryStore};
