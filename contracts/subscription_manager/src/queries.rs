//! Storage access and read-only views.
//!
//! **PRs that only change how subscriptions are read or indexed should edit this file only.**

use crate::types::{
    DataKey, Error, Subscription, SubscriptionState, SubscriptionStatus, PERSISTENT_BUMP_LEDGERS,
};
use soroban_sdk::{Address, Env, Vec};

pub fn get_subscription(env: &Env, subscription_id: u32) -> Result<Subscription, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Subscription(subscription_id))
        .ok_or(Error::NotFound)
}

pub fn save_subscription(env: &Env, sub: &Subscription) {
    let key = DataKey::Subscription(sub.id);
    env.storage().persistent().set(&key, sub);
    env.storage()
        .persistent()
        .extend_ttl(&key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

pub fn subscription_count(env: &Env) -> u32 {
    env.storage().instance().get(&DataKey::Count).unwrap_or(0)
}

/// Reserve the next subscription id. Ids start at 1.
pub fn next_id(env: &Env) -> Result<u32, Error> {
    let id = subscription_count(env)
        .checked_add(1)
        .ok_or(Error::Overflow)?;
    env.storage().instance().set(&DataKey::Count, &id);
    Ok(id)
}

pub fn subscriptions_by_subscriber(env: &Env, subscriber: &Address) -> Vec<u32> {
    env.storage()
        .persistent()
        .get(&DataKey::BySubscriber(subscriber.clone()))
        .unwrap_or_else(|| Vec::new(env))
}

pub fn index_subscription(env: &Env, subscriber: &Address, subscription_id: u32) {
    let key = DataKey::BySubscriber(subscriber.clone());
    let mut ids = subscriptions_by_subscriber(env, subscriber);
    ids.push_back(subscription_id);
    env.storage().persistent().set(&key, &ids);
    env.storage()
        .persistent()
        .extend_ttl(&key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

pub fn get_subscription_status(env: &Env, subscription_id: u32) -> Result<SubscriptionState, Error> {
    let sub = get_subscription(env, subscription_id)?;
    let now = env.ledger().timestamp();
    let status = sub.effective_status(now)?;
    let end_time = sub.end_time()?;

    // A pending record has no paid period, so nothing remains.
    let time_remaining = if sub.status == SubscriptionStatus::Pending {
        0
    } else {
        end_time.saturating_sub(now)
    };

    Ok(SubscriptionState {
        status,
        is_active: status == SubscriptionStatus::Active,
        is_cancelled: status == SubscriptionStatus::Cancelled,
        is_expired: status == SubscriptionStatus::Expired,
        time_remaining,
        end_time,
    })
}
