mod common;

use anyhow::Result;
use common::{Harness, WALLET};
use subscription_mirror::model::USER_SUBSCRIPTIONS;
use subscription_mirror::store::{require_typed, update_typed};
use subscription_mirror::{
    ChainClient, ChainError, DocStatus, MirrorConfig, Stored, SubscriptionDoc,
};

/// Two Minutes plan with auto-renew on and enough allowance for `periods` renewals.
async fn two_minute_subscription(h: &Harness, periods: i128) -> Result<Stored<SubscriptionDoc>> {
    let plan = h.plan_id(6, "Two Minutes").await;
    let created = h.service.create_subscription(WALLET, 6, &plan, true).await?;
    h.chain.approve(WALLET, periods);
    Ok(created)
}

async fn load(h: &Harness, id: &str) -> Result<Stored<SubscriptionDoc>> {
    Ok(require_typed(h.store.as_ref(), USER_SUBSCRIPTIONS, id).await?)
}

#[tokio::test]
async fn renews_inside_window() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    let now = h.t0 + 100;
    h.chain.set_time(now);

    let report = h.monitor().run_once(now).await?;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.renewed, 1);
    assert!(report.failed.is_empty());

    let doc = load(&h, &sub.id).await?;
    assert_eq!(doc.data.status, DocStatus::Active);
    assert_eq!(doc.data.start_time, h.t0 + 120);
    assert_eq!(doc.data.end_time, h.t0 + 240);
    assert_eq!(doc.data.last_renewal_time, Some(now));
    assert_eq!(doc.data.renewed_period, Some(1));
    assert!(doc.data.last_error.is_none());
    assert_ne!(doc.data.transaction_hash, sub.data.transaction_hash);

    let chain = h.chain.subscription(1).unwrap();
    assert_eq!(chain.periods_paid, 2);
    assert_eq!(h.chain.balance(WALLET), 10_000 - 2);
    Ok(())
}

#[tokio::test]
async fn nothing_happens_outside_window() -> Result<()> {
    let h = Harness::new().await;
    two_minute_subscription(&h, 5).await?;

    let report = h.monitor().run_once(h.t0 + 10).await?;
    assert_eq!((report.scanned, report.renewed, report.skipped), (1, 0, 1));
    assert_eq!(h.chain.charge_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn repeated_passes_charge_each_period_once() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    let monitor = h.monitor();

    for now in [h.t0 + 95, h.t0 + 100, h.t0 + 119] {
        h.chain.set_time(now);
        monitor.run_once(now).await?;
    }
    assert_eq!(h.chain.charge_calls(), 1);

    // The next period renews on its own schedule.
    h.chain.set_time(h.t0 + 230);
    let report = monitor.run_once(h.t0 + 230).await?;
    assert_eq!(report.renewed, 1);
    assert_eq!(h.chain.charge_calls(), 2);
    assert_eq!(load(&h, &sub.id).await?.data.end_time, h.t0 + 360);
    Ok(())
}

#[tokio::test]
async fn concurrent_monitors_do_not_double_charge() -> Result<()> {
    let h = Harness::new().await;
    two_minute_subscription(&h, 5).await?;
    let now = h.t0 + 100;
    h.chain.set_time(now);

    // Yielding chain calls let the two passes interleave between reading the
    // document and claiming it.
    let (a, b) = (h.yielding_monitor(), h.yielding_monitor());
    let (ra, rb) = tokio::join!(a.run_once(now), b.run_once(now));
    let (ra, rb) = (ra?, rb?);
    assert_eq!(ra.renewed + rb.renewed, 1);
    assert_eq!(ra.skipped + rb.skipped, 1);
    assert_eq!(h.chain.charge_calls(), 1);
    assert_eq!(h.chain.subscription(1).unwrap().periods_paid, 2);
    Ok(())
}

#[tokio::test]
async fn claimed_period_is_not_charged_again() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;

    let now = h.t0 + 100;

    // Another pass claimed this period a moment ago.
    let mut doc = load(&h, &sub.id).await?;
    doc.data.renewed_period = Some(1);
    doc.data.renewal_claimed_at = Some(now - 5);
    update_typed(h.store.as_ref(), USER_SUBSCRIPTIONS, &mut doc).await?;

    h.chain.set_time(now);
    let report = h.monitor().run_once(now).await?;
    assert_eq!((report.renewed, report.skipped), (0, 1));
    assert_eq!(h.chain.charge_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn abandoned_claim_is_retaken_after_its_lease() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    let now = h.t0 + 100;

    // A pass claimed the period and died before charging.
    let mut doc = load(&h, &sub.id).await?;
    doc.data.renewed_period = Some(1);
    doc.data.renewal_claimed_at = Some(now - h.config.renewal_claim_lease_secs);
    update_typed(h.store.as_ref(), USER_SUBSCRIPTIONS, &mut doc).await?;

    h.chain.set_time(now);
    let report = h.monitor().run_once(now).await?;
    assert_eq!(report.renewed, 1);
    assert_eq!(h.chain.charge_calls(), 1);

    let doc = load(&h, &sub.id).await?;
    assert_eq!(doc.data.end_time, h.t0 + 240);
    assert_eq!(doc.data.renewal_claimed_at, Some(now));
    Ok(())
}

#[tokio::test]
async fn claim_without_timestamp_does_not_block_renewal() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;

    let mut doc = load(&h, &sub.id).await?;
    doc.data.renewed_period = Some(1);
    update_typed(h.store.as_ref(), USER_SUBSCRIPTIONS, &mut doc).await?;

    let now = h.t0 + 100;
    h.chain.set_time(now);
    assert_eq!(h.monitor().run_once(now).await?.renewed, 1);
    Ok(())
}

#[tokio::test]
async fn contract_refuses_a_second_charge_for_a_paid_period() -> Result<()> {
    let h = Harness::new().await;
    two_minute_subscription(&h, 5).await?;
    let now = h.t0 + 100;
    h.chain.set_time(now);
    assert_eq!(h.monitor().run_once(now).await?.renewed, 1);

    // Even a direct retry for the same window is turned away.
    let err = h.chain.charge_renewal(1).await.unwrap_err();
    assert_eq!(err, ChainError::Contract(ChainError::RENEWAL_NOT_DUE));
    assert_eq!(h.chain.subscription(1).unwrap().periods_paid, 2);
    Ok(())
}

#[tokio::test]
async fn renewal_paid_elsewhere_is_picked_up_without_charging() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    h.chain.pay_directly(1, WALLET);

    let now = h.t0 + 100;
    h.chain.set_time(now);
    let report = h.monitor().run_once(now).await?;
    assert_eq!(report.renewed, 0);
    assert_eq!(h.chain.charge_calls(), 0);
    assert_eq!(load(&h, &sub.id).await?.data.end_time, h.t0 + 240);
    Ok(())
}

#[tokio::test]
async fn missing_allowance_disables_auto_renew() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 0).await?;
    let monitor = h.monitor();
    let now = h.t0 + 100;
    h.chain.set_time(now);

    let report = monitor.run_once(now).await?;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, sub.id);

    let doc = load(&h, &sub.id).await?;
    assert!(!doc.data.auto_renew);
    assert_eq!(doc.data.status, DocStatus::Active);
    assert!(doc.data.last_error.as_deref().unwrap().contains("Insufficient"));

    // No longer picked up.
    let report = monitor.run_once(now + 5).await?;
    assert_eq!(report.scanned, 0);
    assert_eq!(h.chain.charge_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_failure_keeps_auto_renew_and_retries() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    let monitor = h.monitor();
    let now = h.t0 + 100;
    h.chain.set_time(now);

    h.chain.fail_next(ChainError::Timeout);
    let report = monitor.run_once(now).await?;
    assert_eq!(report.failed.len(), 1);

    let doc = load(&h, &sub.id).await?;
    assert!(doc.data.auto_renew);
    assert_eq!(doc.data.renewed_period, None);
    assert!(doc.data.last_error.is_some());

    let report = monitor.run_once(now + 5).await?;
    assert_eq!(report.renewed, 1);
    let doc = load(&h, &sub.id).await?;
    assert!(doc.data.last_error.is_none());
    assert_eq!(doc.data.end_time, h.t0 + 240);
    Ok(())
}

#[tokio::test]
async fn wider_local_window_waits_for_the_contract() -> Result<()> {
    let config = MirrorConfig {
        renewal_window_secs: 60,
        retry_delay_ms: 1,
        token_decimals: 0,
        ..MirrorConfig::default()
    };
    let h = Harness::with_config(config).await;
    let sub = two_minute_subscription(&h, 5).await?;
    let monitor = h.monitor();

    // Due locally (50 s left) but outside the contract's 30 s window.
    h.chain.set_time(h.t0 + 70);
    let report = monitor.run_once(h.t0 + 70).await?;
    assert_eq!((report.renewed, report.skipped), (0, 1));
    let doc = load(&h, &sub.id).await?;
    assert_eq!(doc.data.renewed_period, None);
    assert!(doc.data.auto_renew);

    h.chain.set_time(h.t0 + 100);
    let report = monitor.run_once(h.t0 + 100).await?;
    assert_eq!(report.renewed, 1);
    Ok(())
}

#[tokio::test]
async fn lapsed_subscription_is_marked_expired() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;

    let report = h.monitor().run_once(h.t0 + 125).await?;
    assert_eq!(report.expired, 1);
    assert_eq!(h.chain.charge_calls(), 0);
    assert_eq!(load(&h, &sub.id).await?.data.status, DocStatus::Expired);
    Ok(())
}

#[tokio::test]
async fn cancelled_and_opted_out_subscriptions_are_ignored() -> Result<()> {
    let h = Harness::new().await;
    let sub = two_minute_subscription(&h, 5).await?;
    h.chain.fund("GUSER2", 100);
    h.chain.approve("GUSER2", 100);
    let plan = h.plan_id(6, "Two Minutes").await;
    let other = h.service.create_subscription("GUSER2", 6, &plan, true).await?;

    h.service.cancel(&sub.id, WALLET).await?;
    h.service.set_auto_renew(&other.id, "GUSER2", false).await?;

    let now = h.t0 + 100;
    h.chain.set_time(now);
    let report = h.monitor().run_once(now).await?;
    assert_eq!(report.scanned, 0);
    assert_eq!(h.chain.charge_calls(), 0);
    Ok(())
}
