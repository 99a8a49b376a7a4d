#![no_std]

mod admin;
mod charge_core;
mod queries;
mod state_machine;
mod subscription;
mod types;

use soroban_sdk::{contract, contractimpl, Address, Env, Vec};

pub use state_machine::{can_transition, get_allowed_transitions, validate_status_transition};
pub use types::{
    BatchResult, DataKey, Error, Subscription, SubscriptionState, SubscriptionStatus,
    DEFAULT_RENEWAL_WINDOW, PERSISTENT_BUMP_LEDGERS,
};

#[contract]
pub struct SubscriptionManager;

#[contractimpl]
impl SubscriptionManager {
    /// Initialize the contract with its admin (renewal keeper) and payment token.
    pub fn init(env: Env, admin: Address, token: Address) -> Result<(), Error> {
        admin::do_init(&env, admin, token)
    }

    pub fn get_admin(env: Env) -> Result<Address, Error> {
        admin::do_get_admin(&env)
    }

    pub fn rotate_admin(env: Env, current_admin: Address, new_admin: Address) -> Result<(), Error> {
        admin::do_rotate_admin(&env, current_admin, new_admin)
    }

    /// Seconds before the end of a period during which `charge_renewal` may run.
    pub fn set_renewal_window(env: Env, admin: Address, seconds: u64) -> Result<(), Error> {
        admin::do_set_renewal_window(&env, admin, seconds)
    }

    pub fn get_renewal_window(env: Env) -> u64 {
        admin::get_renewal_window(&env)
    }

    /// Create a subscription agreement. It stays `Pending` until the first payment.
    pub fn create_subscription(
        env: Env,
        subscriber: Address,
        price: i128,
        duration: u64,
    ) -> Result<u32, Error> {
        subscription::do_create_subscription(&env, subscriber, price, duration)
    }

    /// Create a subscription and pay its first period in one call.
    pub fn subscribe(
        env: Env,
        subscriber: Address,
        price: i128,
        duration: u64,
    ) -> Result<u32, Error> {
        subscription::do_subscribe(&env, subscriber, price, duration)
    }

    /// Pay one period. `amount` must equal the subscription price.
    pub fn process_payment(
        env: Env,
        subscription_id: u32,
        payer: Address,
        amount: i128,
    ) -> Result<(), Error> {
        payer.require_auth();
        charge_core::process_payment_core(&env, subscription_id, &payer, amount)
    }

    /// Keeper renews one subscription from the subscriber's token allowance.
    pub fn charge_renewal(env: Env, subscription_id: u32) -> Result<(), Error> {
        let admin = admin::require_admin(&env)?;
        admin.require_auth();
        charge_core::charge_renewal_one(&env, subscription_id, env.ledger().timestamp())
    }

    pub fn batch_renew(env: Env, subscription_ids: Vec<u32>) -> Result<Vec<BatchResult>, Error> {
        admin::do_batch_renew(&env, &subscription_ids)
    }

    /// Subscriber or admin cancels. The paid period stays visible through `end_time`.
    pub fn cancel_subscription(
        env: Env,
        subscription_id: u32,
        authorizer: Address,
    ) -> Result<(), Error> {
        subscription::do_cancel_subscription(&env, subscription_id, authorizer)
    }

    pub fn expire_subscription(env: Env, subscription_id: u32) -> Result<SubscriptionStatus, Error> {
        charge_core::expire_one(&env, subscription_id, env.ledger().timestamp())
    }

    pub fn batch_expire(env: Env, subscription_ids: Vec<u32>) -> Vec<BatchResult> {
        admin::do_batch_expire(&env, &subscription_ids)
    }

    pub fn get_revenue(env: Env) -> i128 {
        admin::get_revenue(&env)
    }

    pub fn withdraw_revenue(
        env: Env,
        admin: Address,
        recipient: Address,
        amount: i128,
    ) -> Result<(), Error> {
        admin::do_withdraw_revenue(&env, admin, recipient, amount)
    }

    /// Read subscription by id (for indexing and the mirror).
    pub fn get_subscription(env: Env, subscription_id: u32) -> Result<Subscription, Error> {
        queries::get_subscription(&env, subscription_id)
    }

    pub fn get_subscription_status(
        env: Env,
        subscription_id: u32,
    ) -> Result<SubscriptionState, Error> {
        queries::get_subscription_status(&env, subscription_id)
    }

    pub fn subscription_count(env: Env) -> u32 {
        queries::subscription_count(&env)
    }

    pub fn get_subscriptions_by_subscriber(env: Env, subscriber: Address) -> Vec<u32> {
        queries::subscriptions_by_subscriber(&env, &subscriber)
    }
}
