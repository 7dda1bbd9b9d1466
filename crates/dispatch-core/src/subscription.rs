//! `SubscriptionCheck` — §4.7: a pure predicate over a user's quota document.
//! No I/O, no async; callers are responsible for fetching the JSON blob via
//! `PersistenceAPI::getUserSubscriptionLimites` and handing it here.

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

/// Structured subscription failure, surfaced both to the caller and to the
/// `NotificationBus` with `event = subscription`, `target = <code>` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionCode {
    #[error("no subscription on file")]
    NoSubscription,
    #[error("subscription expired")]
    SubscriptionExpired,
    /// Reserved for parity with §7's structured taxonomy; the pure predicate
    /// in §4.7 folds this case into `InsufficientBalance` — see DESIGN.md.
    #[error("message limit exceeded")]
    MessageLimitExceeded,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("subscription data is malformed")]
    InvalidSubscriptionData,
}

/// Raw quota document shape, as read from `PersistenceAPI::getUserSubscriptionLimites`.
#[derive(Debug, Deserialize)]
struct SubscriptionDoc {
    balance: f64,
    #[serde(rename = "MessageCost")]
    message_cost: f64,
    #[serde(rename = "EndDate")]
    end_date: String,
    #[serde(rename = "MessageLimit")]
    message_limit: u64,
    #[serde(rename = "MessagesUsed")]
    messages_used: u64,
}

/// Evaluate a user's subscription document against `now`.
///
/// `raw` is `None` when `PersistenceAPI::getUserSubscriptionLimites` returned
/// no rows — that's `NoSubscription`, not an error path.
///
/// Evaluation order, exactly as §4.7 specifies (earlier checks short-circuit
/// later ones):
///   1. absent                              → `NoSubscription`
///   2. malformed JSON / unparseable EndDate → `InvalidSubscriptionData`
///   3. `EndDate < now`                      → `SubscriptionExpired`
///   4. `MessagesUsed >= MessageLimit && Balance <= MessageCost` → `InsufficientBalance`
///   5. otherwise                            → `Ok(())`
pub fn check_subscription(
    raw: Option<&str>,
    now: NaiveDate,
) -> Result<(), SubscriptionCode> {
    let raw = match raw {
        Some(r) => r,
        None => return Err(SubscriptionCode::NoSubscription),
    };

    let doc: SubscriptionDoc =
        serde_json::from_str(raw).map_err(|_| SubscriptionCode::InvalidSubscriptionData)?;

    let end_date = NaiveDate::parse_from_str(&doc.end_date, "%Y-%m-%d")
        .map_err(|_| SubscriptionCode::InvalidSubscriptionData)?;

    if end_date < now {
        return Err(SubscriptionCode::SubscriptionExpired);
    }

    if doc.messages_used >= doc.message_limit && doc.balance <= doc.message_cost {
        return Err(SubscriptionCode::InsufficientBalance);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn absent_document_is_no_subscription() {
        assert_eq!(
            check_subscription(None, date(2026, 1, 1)),
            Err(SubscriptionCode::NoSubscription)
        );
    }

    #[test]
    fn malformed_json_is_invalid() {
        let raw = "{not json";
        assert_eq!(
            check_subscription(Some(raw), date(2026, 1, 1)),
            Err(SubscriptionCode::InvalidSubscriptionData)
        );
    }

    #[test]
    fn unparseable_end_date_is_invalid() {
        let raw = r#"{"balance":10,"MessageCost":1,"EndDate":"not-a-date","MessageLimit":100,"MessagesUsed":1}"#;
        assert_eq!(
            check_subscription(Some(raw), date(2026, 1, 1)),
            Err(SubscriptionCode::InvalidSubscriptionData)
        );
    }

    #[test]
    fn past_end_date_is_expired() {
        let raw = r#"{"balance":10,"MessageCost":1,"EndDate":"2020-01-01","MessageLimit":100,"MessagesUsed":1}"#;
        assert_eq!(
            check_subscription(Some(raw), date(2026, 1, 1)),
            Err(SubscriptionCode::SubscriptionExpired)
        );
    }

    #[test]
    fn exhausted_limit_and_balance_is_insufficient() {
        let raw = r#"{"balance":0.5,"MessageCost":1,"EndDate":"2099-01-01","MessageLimit":100,"MessagesUsed":100}"#;
        assert_eq!(
            check_subscription(Some(raw), date(2026, 1, 1)),
            Err(SubscriptionCode::InsufficientBalance)
        );
    }

    #[test]
    fn exhausted_limit_but_enough_balance_is_ok() {
        let raw = r#"{"balance":50,"MessageCost":1,"EndDate":"2099-01-01","MessageLimit":100,"MessagesUsed":100}"#;
        assert_eq!(check_subscription(Some(raw), date(2026, 1, 1)), Ok(()));
    }

    #[test]
    fn under_limit_is_ok_regardless_of_balance() {
        let raw = r#"{"balance":0,"MessageCost":1,"EndDate":"2099-01-01","MessageLimit":100,"MessagesUsed":5}"#;
        assert_eq!(check_subscription(Some(raw), date(2026, 1, 1)), Ok(()));
    }
}
