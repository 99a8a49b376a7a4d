//! Payment, renewal and expiry logic (no auth). Used by the entrypoints and batch calls.
//!
//! **PRs that only change how one subscription is paid or renewed should edit this file only.**

use crate::admin::{add_revenue, get_renewal_window, get_token};
use crate::queries::{get_subscription, save_subscription};
use crate::state_machine::validate_status_transition;
use crate::types::{Error, Subscription, SubscriptionStatus};
use soroban_sdk::{token, Address, Env, Symbol};

/// Start a new paid period. If the current period is still running the new one
/// begins at its end, so early payments stack instead of overlapping.
fn advance_period(sub: &mut Subscription, now: u64) -> Result<(), Error> {
    let start = if sub.effective_status(now)? == SubscriptionStatus::Active {
        sub.end_time()?
    } else {
        now
    };
    // Guard the new end before committing the start.
    start.checked_add(sub.duration).ok_or(Error::Overflow)?;

    validate_status_transition(&sub.status, &SubscriptionStatus::Active)?;
    sub.start_time = start;
    sub.status = SubscriptionStatus::Active;
    sub.periods_paid = sub.periods_paid.checked_add(1).ok_or(Error::Overflow)?;
    Ok(())
}

pub fn process_payment_core(
    env: &Env,
    subscription_id: u32,
    payer: &Address,
    amount: i128,
) -> Result<(), Error> {
    let mut sub = get_subscription(env, subscription_id)?;

    if sub.status == SubscriptionStatus::Cancelled {
        return Err(Error::SubscriptionCancelled);
    }
    if amount != sub.price {
        return Err(Error::IncorrectPaymentAmount);
    }

    let token_client = token::Client::new(env, &get_token(env)?);
    if token_client.balance(payer) < sub.price {
        return Err(Error::InsufficientFunds);
    }

    let now = env.ledger().timestamp();
    advance_period(&mut sub, now)?;
    add_revenue(env, sub.price)?;
    save_subscription(env, &sub);

    token_client.transfer(payer, &env.current_contract_address(), &sub.price);

    env.events().publish(
        (Symbol::new(env, "payment"), subscription_id),
        (payer.clone(), amount, sub.start_time),
    );
    Ok(())
}

/// Pull one period's price from the subscriber's allowance. Callable once per
/// period: a renewal starts the next period in the future, and while the
/// current `start_time` is ahead of `now` the next period is already paid.
/// This holds even when `duration` is shorter than the renewal window.
pub fn charge_renewal_one(env: &Env, subscription_id: u32, now: u64) -> Result<(), Error> {
    let mut sub = get_subscription(env, subscription_id)?;

    match sub.status {
        SubscriptionStatus::Cancelled => return Err(Error::SubscriptionCancelled),
        SubscriptionStatus::Pending => return Err(Error::InvalidStatusTransition),
        SubscriptionStatus::Expired => return Err(Error::SubscriptionExpired),
        SubscriptionStatus::Active => {}
    }

    let end = sub.end_time()?;
    if now >= end {
        return Err(Error::SubscriptionExpired);
    }
    if sub.start_time > now || end - now > get_renewal_window(env) {
        return Err(Error::RenewalNotDue);
    }

    // Checked up front so a batch can report the failure instead of aborting.
    let token_client = token::Client::new(env, &get_token(env)?);
    let contract = env.current_contract_address();
    if token_client.allowance(&sub.subscriber, &contract) < sub.price
        || token_client.balance(&sub.subscriber) < sub.price
    {
        return Err(Error::InsufficientFunds);
    }

    advance_period(&mut sub, now)?;
    add_revenue(env, sub.price)?;
    save_subscription(env, &sub);

    token_client.transfer_from(&contract, &sub.subscriber, &contract, &sub.price);

    env.events().publish(
        (Symbol::new(env, "renewed"), subscription_id),
        (sub.price, sub.start_time, sub.periods_paid),
    );
    Ok(())
}

/// Persist `Active -> Expired` once the period has ended. Returns the resulting status.
pub fn expire_one(env: &Env, subscription_id: u32, now: u64) -> Result<SubscriptionStatus, Error> {
    let mut sub = get_subscription(env, subscription_id)?;
    let effective = sub.effective_status(now)?;
    if effective != sub.status {
        validate_status_transition(&sub.status, &effective)?;
        sub.status = effective;
        save_subscription(env, &sub);
        env.events()
            .publish((Symbol::new(env, "expired"), subscription_id), now);
    }
    Ok(sub.status)
}
