//! Token-ledger constraint rules.
//!
//! Four independently callable rules keep the purchase/contribution chain
//! gap-free and token-conserving: one contribution per purchase, no
//! over-consumption of the previous purchase's tokens, no new purchase
//! while an older one is unfunded, and latest-only deletion. Admin
//! overrides apply exactly where noted on each rule.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::snapshot::LedgerSnapshot;
use crate::domain::violation::{LedgerViolation, ValidationOutcome};
use crate::storage::Connection;

/// Rule: at most one contribution may reference a purchase.
pub fn check_single_contribution(
    purchase_id: &str,
    snapshot: &LedgerSnapshot,
) -> Result<(), LedgerViolation> {
    match snapshot.contribution_for_purchase(purchase_id) {
        Some(existing) => Err(LedgerViolation::DuplicateContribution {
            purchase_id: purchase_id.to_string(),
            contribution_id: existing.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Rule: a purchase that already has a contribution may not be edited or
/// deleted, unless the caller is an admin.
pub fn check_purchase_mutable(
    purchase_id: &str,
    snapshot: &LedgerSnapshot,
    admin_override: bool,
) -> Result<(), LedgerViolation> {
    if admin_override {
        return Ok(());
    }
    match snapshot.contribution_for_purchase(purchase_id) {
        Some(existing) => Err(LedgerViolation::PurchaseHasContribution {
            purchase_id: purchase_id.to_string(),
            contribution_id: existing.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Rule: a contribution may not consume more tokens than the previous
/// purchase left available.
///
/// The consumption baseline is the previous purchase's meter reading, or
/// the owning purchase's own reading when it is the first in the ledger
/// (in which case the tokens draw on the purchase itself). Returns the
/// derived `tokens_consumed` on success. `exclude_contribution` skips the
/// contribution being edited when counting what is already consumed.
pub fn check_token_availability(
    purchase_id: &str,
    proposed_reading: Decimal,
    exclude_contribution: Option<&str>,
    snapshot: &LedgerSnapshot,
) -> Result<Decimal, LedgerViolation> {
    let purchase = snapshot
        .purchase(purchase_id)
        .ok_or_else(|| LedgerViolation::PurchaseNotFound { purchase_id: purchase_id.to_string() })?;

    let (source, baseline) = match snapshot.previous_purchase(purchase_id) {
        Some(previous) => (previous, previous.meter_reading),
        None => (purchase, purchase.meter_reading),
    };
    let tokens_consumed = proposed_reading - baseline;

    let already_consumed = snapshot
        .contribution_for_purchase(purchase_id)
        .filter(|c| Some(c.id.as_str()) != exclude_contribution)
        .map(|c| c.tokens_consumed)
        .unwrap_or(Decimal::ZERO);
    let available = source.total_tokens - already_consumed;

    if tokens_consumed > available {
        return Err(LedgerViolation::TokensExceedAvailable {
            requested: tokens_consumed,
            available,
            previous_purchase_id: source.id.clone(),
        });
    }
    Ok(tokens_consumed)
}

/// Rule: a new purchase cannot be recorded while an earlier purchase
/// still lacks its contribution, unless the caller is an admin.
pub fn check_sequential_order(
    new_purchase_date: DateTime<Utc>,
    snapshot: &LedgerSnapshot,
    admin_override: bool,
) -> Result<(), LedgerViolation> {
    if admin_override {
        return Ok(());
    }
    let unfunded = snapshot
        .purchases
        .iter()
        .filter(|p| p.purchase_date < new_purchase_date)
        .find(|p| snapshot.contribution_for_purchase(&p.id).is_none());
    match unfunded {
        Some(purchase) => Err(LedgerViolation::PreviousPurchaseUnfunded {
            purchase_id: purchase.id.clone(),
            purchase_date: purchase.purchase_date.date_naive(),
        }),
        None => Ok(()),
    }
}

/// Rule: only the most recently created purchase may be deleted, and only
/// if it has no contribution (admin override lifts the contribution
/// restriction, never the latest-only restriction).
pub fn check_deletion(
    purchase_id: &str,
    snapshot: &LedgerSnapshot,
    admin_override: bool,
) -> Result<(), LedgerViolation> {
    if snapshot.purchase(purchase_id).is_none() {
        return Err(LedgerViolation::PurchaseNotFound { purchase_id: purchase_id.to_string() });
    }
    if let Some(latest) = snapshot.latest_created_purchase() {
        if latest.id != purchase_id {
            return Err(LedgerViolation::NotLatestPurchase {
                purchase_id: purchase_id.to_string(),
                latest_id: latest.id.clone(),
            });
        }
    }
    check_purchase_mutable(purchase_id, snapshot, admin_override)
}

/// Service wrapper exposing the rules over fresh durable-state snapshots.
#[derive(Clone)]
pub struct LedgerRulesService<C: Connection> {
    reading_repository: C::ReadingRepository,
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
}

impl<C: Connection> LedgerRulesService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            reading_repository: connection.create_reading_repository(),
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
        }
    }

    fn load_snapshot(&self) -> Result<LedgerSnapshot> {
        LedgerSnapshot::load(
            &self.reading_repository,
            &self.purchase_repository,
            &self.contribution_repository,
        )
    }

    pub fn can_contribute(&self, purchase_id: &str) -> Result<ValidationOutcome> {
        let snapshot = self.load_snapshot()?;
        Ok(check_single_contribution(purchase_id, &snapshot).into())
    }

    pub fn can_record_purchase(
        &self,
        purchase_date: DateTime<Utc>,
        admin_override: bool,
    ) -> Result<ValidationOutcome> {
        let snapshot = self.load_snapshot()?;
        let outcome: ValidationOutcome =
            check_sequential_order(purchase_date, &snapshot, admin_override).into();
        if let Some(violation) = &outcome.violation {
            info!("Purchase dated {} rejected: {}", purchase_date, violation);
        }
        Ok(outcome)
    }

    pub fn can_delete_purchase(
        &self,
        purchase_id: &str,
        admin_override: bool,
    ) -> Result<ValidationOutcome> {
        let snapshot = self.load_snapshot()?;
        Ok(check_deletion(purchase_id, &snapshot, admin_override).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TokenPurchase, UserContribution};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn purchase(id: &str, tokens: Decimal, meter: Decimal, date: &str, seq: i64) -> TokenPurchase {
        TokenPurchase {
            id: id.to_string(),
            total_tokens: tokens,
            total_payment: dec!(100),
            meter_reading: meter,
            purchase_date: Utc
                .from_utc_datetime(&format!("{}T09:00:00", date).parse().unwrap()),
            is_emergency: false,
            created_by: "alice".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            receipt: None,
        }
    }

    fn contribution(id: &str, purchase_id: &str, meter: Decimal, tokens: Decimal) -> UserContribution {
        UserContribution {
            id: id.to_string(),
            purchase_id: purchase_id.to_string(),
            user_id: "alice".to_string(),
            contribution_amount: dec!(50),
            meter_reading: meter,
            tokens_consumed: tokens,
            created_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        }
    }

    #[test]
    fn rejects_second_contribution_on_same_purchase() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1)],
            contributions: vec![contribution("c1", "p1", dec!(5200), dec!(200))],
        };
        assert!(matches!(
            check_single_contribution("p1", &snapshot),
            Err(LedgerViolation::DuplicateContribution { contribution_id, .. })
                if contribution_id == "c1"
        ));
    }

    #[test]
    fn derives_tokens_consumed_from_previous_purchase_reading() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![
                purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2),
            ],
            contributions: vec![],
        };
        // Contribution to p2 at reading 5800 draws 800 from p1's tokens
        let tokens = check_token_availability("p2", dec!(5800), None, &snapshot).unwrap();
        assert_eq!(tokens, dec!(800));
    }

    #[test]
    fn rejects_consuming_more_than_previous_purchase_tokens() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![
                purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("p2", dec!(800), dec!(6100), "2024-02-01", 2),
            ],
            contributions: vec![],
        };
        // 6100 - 5000 = 1100 > 1000 available from p1
        assert!(matches!(
            check_token_availability("p2", dec!(6100), None, &snapshot),
            Err(LedgerViolation::TokensExceedAvailable { requested, available, .. })
                if requested == dec!(1100) && available == dec!(1000)
        ));
    }

    #[test]
    fn first_purchase_draws_on_its_own_tokens() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1)],
            contributions: vec![],
        };
        let tokens = check_token_availability("p1", dec!(5200), None, &snapshot).unwrap();
        assert_eq!(tokens, dec!(200));

        assert!(check_token_availability("p1", dec!(6100), None, &snapshot).is_err());
    }

    #[test]
    fn editing_a_contribution_excludes_itself_from_availability() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![
                purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2),
            ],
            contributions: vec![contribution("c2", "p2", dec!(5900), dec!(900))],
        };
        // Re-validating c2 itself must not double count its 900 tokens
        let tokens = check_token_availability("p2", dec!(5950), Some("c2"), &snapshot).unwrap();
        assert_eq!(tokens, dec!(950));
    }

    #[test]
    fn sequential_rule_blocks_purchase_after_unfunded_one() {
        // A funded, B unfunded: recording C must be rejected.
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![
                purchase("a", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("b", dec!(800), dec!(6000), "2024-02-01", 2),
            ],
            contributions: vec![contribution("c1", "a", dec!(5200), dec!(200))],
        };
        let c_date = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert!(matches!(
            check_sequential_order(c_date, &snapshot, false),
            Err(LedgerViolation::PreviousPurchaseUnfunded { purchase_id, .. })
                if purchase_id == "b"
        ));

        // Admin bypass lets it through
        assert!(check_sequential_order(c_date, &snapshot, true).is_ok());
    }

    #[test]
    fn only_latest_created_purchase_is_deletable() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![
                purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2),
            ],
            contributions: vec![],
        };
        assert!(matches!(
            check_deletion("p1", &snapshot, false),
            Err(LedgerViolation::NotLatestPurchase { latest_id, .. }) if latest_id == "p2"
        ));
        assert!(check_deletion("p2", &snapshot, false).is_ok());
    }

    proptest! {
        // Token conservation: whatever reading is proposed, an accepted
        // contribution never draws more than the source purchase held.
        #[test]
        fn accepted_draw_never_exceeds_source_tokens(
            total in 1i64..5_000,
            delta in 0i64..10_000,
        ) {
            let snapshot = LedgerSnapshot {
                readings: vec![],
                purchases: vec![
                    purchase("p1", Decimal::from(total), dec!(5000), "2024-01-01", 1),
                    purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2),
                ],
                contributions: vec![],
            };
            let proposed = Decimal::from(5000 + delta);
            match check_token_availability("p2", proposed, None, &snapshot) {
                Ok(tokens) => prop_assert!(tokens <= Decimal::from(total)),
                Err(_) => prop_assert!(Decimal::from(delta) > Decimal::from(total)),
            }
        }
    }

    #[test]
    fn funded_latest_purchase_needs_admin_to_delete() {
        let snapshot = LedgerSnapshot {
            readings: vec![],
            purchases: vec![purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1)],
            contributions: vec![contribution("c1", "p1", dec!(5200), dec!(200))],
        };
        assert!(matches!(
            check_deletion("p1", &snapshot, false),
            Err(LedgerViolation::PurchaseHasContribution { .. })
        ));
        assert!(check_deletion("p1", &snapshot, true).is_ok());
    }
}
