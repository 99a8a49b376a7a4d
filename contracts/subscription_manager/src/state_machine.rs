//! Subscription status transitions.
//!
//! Pending -> Active | Cancelled
//! Active  -> Expired | Cancelled
//! Expired -> Active | Cancelled
//! Cancelled is terminal. Staying in the same status is always allowed.

use crate::types::{Error, SubscriptionStatus};

pub fn validate_status_transition(
    from: &SubscriptionStatus,
    to: &SubscriptionStatus,
) -> Result<(), Error> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(Error::InvalidStatusTransition)
    }
}

pub fn can_transition(from: &SubscriptionStatus, to: &SubscriptionStatus) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (SubscriptionStatus::Pending, SubscriptionStatus::Active)
            | (SubscriptionStatus::Pending, SubscriptionStatus::Cancelled)
            | (SubscriptionStatus::Active, SubscriptionStatus::Expired)
            | (SubscriptionStatus::Active, SubscriptionStatus::Cancelled)
            | (SubscriptionStatus::Expired, SubscriptionStatus::Active)
            | (SubscriptionStatus::Expired, SubscriptionStatus::Cancelled)
    )
}

pub fn get_allowed_transitions(from: &SubscriptionStatus) -> &'static [SubscriptionStatus] {
    match from {
        SubscriptionStatus::Pending => &[SubscriptionStatus::Active, SubscriptionStatus::Cancelled],
        SubscriptionStatus::Active => &[SubscriptionStatus::Expired, SubscriptionStatus::Cancelled],
        SubscriptionStatus::Expired => &[SubscriptionStatus::Active, SubscriptionStatus::Cancelled],
        SubscriptionStatus::Cancelled => &[],
    }
}
