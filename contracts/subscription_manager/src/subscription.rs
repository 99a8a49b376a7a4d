//! Subscriber entrypoints: create, subscribe, cancel.
//!
//! **PRs that only change the subscription lifecycle should edit this file only.**

use crate::admin::require_admin;
use crate::charge_core::process_payment_core;
use crate::queries::{get_subscription, index_subscription, next_id, save_subscription};
use crate::state_machine::validate_status_transition;
use crate::types::{Error, Subscription, SubscriptionStatus};
use soroban_sdk::{Address, Env, Symbol};

pub fn do_create_subscription(
    env: &Env,
    subscriber: Address,
    price: i128,
    duration: u64,
) -> Result<u32, Error> {
    subscriber.require_auth();
    require_admin(env)?;

    if price <= 0 {
        return Err(Error::InvalidPrice);
    }
    if duration == 0 {
        return Err(Error::InvalidDuration);
    }

    let id = next_id(env)?;
    let sub = Subscription {
        id,
        subscriber: subscriber.clone(),
        price,
        duration,
        start_time: env.ledger().timestamp(),
        status: SubscriptionStatus::Pending,
        periods_paid: 0,
    };
    save_subscription(env, &sub);
    index_subscription(env, &subscriber, id);

    env.events().publish(
        (Symbol::new(env, "sub_created"), id),
        (subscriber, price, duration),
    );
    Ok(id)
}

pub fn do_subscribe(
    env: &Env,
    subscriber: Address,
    price: i128,
    duration: u64,
) -> Result<u32, Error> {
    let id = do_create_subscription(env, subscriber.clone(), price, duration)?;
    process_payment_core(env, id, &subscriber, price)?;
    Ok(id)
}

pub fn do_cancel_subscription(
    env: &Env,
    subscription_id: u32,
    authorizer: Address,
) -> Result<(), Error> {
    authorizer.require_auth();

    let mut sub = get_subscription(env, subscription_id)?;

    if sub.status == SubscriptionStatus::Cancelled {
        return Ok(());
    }

    let admin = require_admin(env)?;
    if authorizer != sub.subscriber && authorizer != admin {
        return Err(Error::Unauthorized);
    }

    validate_status_transition(&sub.status, &SubscriptionStatus::Cancelled)?;
    sub.status = SubscriptionStatus::Cancelled;
    save_subscription(env, &sub);

    env.events().publish(
        (Symbol::new(env, "cancelled"), subscription_id),
        (authorizer, sub.end_time()?),
    );
    Ok(())
}
