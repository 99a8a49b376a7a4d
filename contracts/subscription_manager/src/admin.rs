//! Admin and config: init, renewal window, revenue, batch operations.
//!
//! **PRs that only change admin or batch behavior should edit this file only.**

use crate::charge_core::{charge_renewal_one, expire_one};
use crate::types::{BatchResult, DataKey, Error, DEFAULT_RENEWAL_WINDOW};
use soroban_sdk::{token, Address, Env, Symbol, Vec};

pub fn do_init(env: &Env, admin: Address, token: Address) -> Result<(), Error> {
    let instance = env.storage().instance();
    if instance.has(&DataKey::Admin) {
        return Err(Error::AlreadyInitialized);
    }
    instance.set(&DataKey::Admin, &admin);
    instance.set(&DataKey::Token, &token);
    instance.set(&DataKey::RenewalWindow, &DEFAULT_RENEWAL_WINDOW);
    instance.set(&DataKey::Revenue, &0i128);
    env.events()
        .publish((Symbol::new(env, "initialized"),), (admin, token));
    Ok(())
}

pub fn require_admin(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)
}

/// Require `caller` to be the stored admin and to have signed the invocation.
fn check_admin(env: &Env, caller: &Address) -> Result<(), Error> {
    caller.require_auth();
    let stored = require_admin(env)?;
    if *caller != stored {
        return Err(Error::Unauthorized);
    }
    Ok(())
}

pub fn get_token(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Token)
        .ok_or(Error::NotInitialized)
}

pub fn do_get_admin(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotFound)
}

pub fn do_rotate_admin(env: &Env, current_admin: Address, new_admin: Address) -> Result<(), Error> {
    check_admin(env, &current_admin)?;

    env.storage().instance().set(&DataKey::Admin, &new_admin);

    env.events().publish(
        (Symbol::new(env, "admin_rotation"), current_admin.clone()),
        (current_admin, new_admin, env.ledger().timestamp()),
    );

    Ok(())
}

pub fn do_set_renewal_window(env: &Env, admin: Address, seconds: u64) -> Result<(), Error> {
    check_admin(env, &admin)?;
    env.storage()
        .instance()
        .set(&DataKey::RenewalWindow, &seconds);
    env.events()
        .publish((Symbol::new(env, "renewal_window_updated"),), seconds);
    Ok(())
}

pub fn get_renewal_window(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::RenewalWindow)
        .unwrap_or(DEFAULT_RENEWAL_WINDOW)
}

pub fn get_revenue(env: &Env) -> i128 {
    env.storage().instance().get(&DataKey::Revenue).unwrap_or(0)
}

pub fn add_revenue(env: &Env, amount: i128) -> Result<(), Error> {
    let total = get_revenue(env)
        .checked_add(amount)
        .ok_or(Error::Overflow)?;
    env.storage().instance().set(&DataKey::Revenue, &total);
    Ok(())
}

pub fn do_withdraw_revenue(
    env: &Env,
    admin: Address,
    recipient: Address,
    amount: i128,
) -> Result<(), Error> {
    check_admin(env, &admin)?;

    if amount <= 0 {
        return Err(Error::InvalidAmount);
    }
    let revenue = get_revenue(env);
    if amount > revenue {
        return Err(Error::InsufficientRevenue);
    }

    env.storage()
        .instance()
        .set(&DataKey::Revenue, &(revenue - amount));

    let token_client = token::Client::new(env, &get_token(env)?);
    token_client.transfer(&env.current_contract_address(), &recipient, &amount);

    env.events().publish(
        (Symbol::new(env, "revenue_withdrawn"), admin),
        (recipient, amount),
    );
    Ok(())
}

fn to_batch_result(id: u32, r: Result<(), Error>) -> BatchResult {
    match r {
        Ok(()) => BatchResult {
            id,
            success: true,
            error_code: 0,
        },
        Err(e) => BatchResult {
            id,
            success: false,
            error_code: e.to_code(),
        },
    }
}

pub fn do_batch_renew(env: &Env, subscription_ids: &Vec<u32>) -> Result<Vec<BatchResult>, Error> {
    let auth_admin = require_admin(env)?;
    auth_admin.require_auth();

    let now = env.ledger().timestamp();
    let mut results = Vec::new(env);
    for id in subscription_ids.iter() {
        results.push_back(to_batch_result(id, charge_renewal_one(env, id, now)));
    }
    Ok(results)
}

pub fn do_batch_expire(env: &Env, subscription_ids: &Vec<u32>) -> Vec<BatchResult> {
    let now = env.ledger().timestamp();
    let mut results = Vec::new(env);
    for id in subscription_ids.iter() {
        let r = expire_one(env, id, now).map(|_| ());
        results.push_back(to_batch_result(id, r));
    }
    results
}
