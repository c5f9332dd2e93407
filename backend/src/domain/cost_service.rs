//! Proportional cost allocation.
//!
//! "True cost" spreads a purchase's total cost over its tokens, so each
//! member pays for exactly what they consumed. The running account
//! balance accumulates (amount paid - true cost) in strict chronological
//! purchase order, matching the physical token-depletion sequence.

use anyhow::Result;
use log::info;
use rust_decimal::Decimal;
use shared::{AccountBalance, BalanceEntry, CostBreakdown};
use std::sync::Arc;

use crate::domain::models::{TokenPurchase, UserContribution};
use crate::storage::{Connection, ContributionStorage, PurchaseStorage};

/// Proportional cost of `tokens_used` out of a purchase of
/// `total_tokens` costing `total_cost`. Zero-token purchases cost zero.
/// Rounded to 2 decimal places.
pub fn true_cost(tokens_used: Decimal, total_tokens: Decimal, total_cost: Decimal) -> Decimal {
    if total_tokens.is_zero() {
        return Decimal::ZERO;
    }
    (tokens_used / total_tokens * total_cost).round_dp(2)
}

/// A contribution joined with the purchase it references.
pub type ContributionEntry = (UserContribution, TokenPurchase);

/// Aggregate a user's contributions into a cost/efficiency summary.
pub fn user_summary(user_id: &str, entries: &[ContributionEntry]) -> CostBreakdown {
    let mut total_tokens = Decimal::ZERO;
    let mut total_paid = Decimal::ZERO;
    let mut total_true = Decimal::ZERO;
    let mut regular_tokens = Decimal::ZERO;
    let mut regular_true = Decimal::ZERO;
    let mut emergency_tokens = Decimal::ZERO;
    let mut emergency_true = Decimal::ZERO;

    for (contribution, purchase) in entries {
        let cost = true_cost(
            contribution.tokens_consumed,
            purchase.total_tokens,
            purchase.total_payment,
        );
        total_tokens += contribution.tokens_consumed;
        total_paid += contribution.contribution_amount;
        total_true += cost;
        if purchase.is_emergency {
            emergency_tokens += contribution.tokens_consumed;
            emergency_true += cost;
        } else {
            regular_tokens += contribution.tokens_consumed;
            regular_true += cost;
        }
    }

    let per_kwh = |cost: Decimal, tokens: Decimal| {
        if tokens.is_zero() {
            Decimal::ZERO
        } else {
            (cost / tokens).round_dp(4)
        }
    };

    let regular_cost_per_kwh = per_kwh(regular_true, regular_tokens);
    let emergency_cost_per_kwh = per_kwh(emergency_true, emergency_tokens);

    // The premium only exists relative to a regular-rate baseline
    let emergency_premium = if regular_tokens.is_zero() || emergency_tokens.is_zero() {
        Decimal::ZERO
    } else {
        (emergency_true - emergency_tokens * regular_cost_per_kwh).round_dp(2)
    };

    let efficiency_percent = if total_paid.is_zero() {
        Decimal::ZERO
    } else {
        (total_true / total_paid * Decimal::from(100)).round_dp(2)
    };

    CostBreakdown {
        user_id: user_id.to_string(),
        total_tokens_consumed: total_tokens,
        total_amount_paid: total_paid.round_dp(2),
        total_true_cost: total_true.round_dp(2),
        average_cost_per_kwh: per_kwh(total_true, total_tokens),
        efficiency_percent,
        regular_tokens,
        regular_true_cost: regular_true.round_dp(2),
        regular_cost_per_kwh,
        emergency_tokens,
        emergency_true_cost: emergency_true.round_dp(2),
        emergency_cost_per_kwh,
        emergency_premium,
    }
}

/// Chronological running balance across a user's contributions.
///
/// Entries are re-sorted by (purchase date, purchase creation) before
/// accumulating, so the result is identical for any input ordering. The
/// system's very first purchase is charged zero effective consumption —
/// there is no prior meter reading to measure its consumption from.
pub fn running_balance(
    user_id: &str,
    entries: &[ContributionEntry],
    first_purchase_id: Option<&str>,
) -> AccountBalance {
    let mut ordered: Vec<&ContributionEntry> = entries.iter().collect();
    ordered.sort_by(|(_, a), (_, b)| {
        a.purchase_date
            .cmp(&b.purchase_date)
            .then(a.created_at.cmp(&b.created_at))
    });

    let mut accumulator = Decimal::ZERO;
    let mut balance_entries = Vec::with_capacity(ordered.len());
    for (contribution, purchase) in ordered {
        let effective_tokens = if Some(purchase.id.as_str()) == first_purchase_id {
            Decimal::ZERO
        } else {
            contribution.tokens_consumed
        };
        let cost = true_cost(effective_tokens, purchase.total_tokens, purchase.total_payment);
        accumulator += contribution.contribution_amount - cost;
        balance_entries.push(BalanceEntry {
            purchase_id: purchase.id.clone(),
            purchase_date: purchase.purchase_date.to_rfc3339(),
            amount_paid: contribution.contribution_amount.round_dp(2),
            effective_tokens,
            true_cost: cost,
            running_balance: accumulator.round_dp(2),
        });
    }

    AccountBalance {
        user_id: user_id.to_string(),
        balance: accumulator.round_dp(2),
        entries: balance_entries,
    }
}

/// Service wrapper joining contributions with their purchases from storage.
#[derive(Clone)]
pub struct CostService<C: Connection> {
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
}

impl<C: Connection> CostService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
        }
    }

    /// A user's contributions joined with their purchases, in storage order.
    pub fn contribution_entries(&self, user_id: &str) -> Result<Vec<ContributionEntry>> {
        let contributions = self.contribution_repository.list_contributions_for_user(user_id)?;
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        let mut entries = Vec::with_capacity(contributions.len());
        for contribution in contributions {
            if let Some(purchase) = purchases.iter().find(|p| p.id == contribution.purchase_id) {
                entries.push((contribution, purchase.clone()));
            } else {
                log::warn!(
                    "Contribution {} references missing purchase {}",
                    contribution.id,
                    contribution.purchase_id
                );
            }
        }
        Ok(entries)
    }

    pub fn user_summary(&self, user_id: &str) -> Result<CostBreakdown> {
        let entries = self.contribution_entries(user_id)?;
        Ok(user_summary(user_id, &entries))
    }

    pub fn account_balance(&self, user_id: &str) -> Result<AccountBalance> {
        let entries = self.contribution_entries(user_id)?;
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        let first_purchase_id = purchases.first().map(|p| p.id.clone());
        let balance = running_balance(user_id, &entries, first_purchase_id.as_deref());
        info!(
            "Account balance for {}: {} over {} contributions",
            user_id,
            balance.balance,
            balance.entries.len()
        );
        Ok(balance)
    }
}
