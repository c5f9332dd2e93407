//! Dual-currency reconciliation.
//!
//! Members pay each other in the internal currency, but the utility's
//! official receipt is denominated in the official currency. Each
//! receipted purchase implies its own exchange rate, which is the only
//! rate ever used for that purchase — there is no market feed. Purchases
//! without receipts degrade to `None`/zero-confidence results instead of
//! failing; most of the ledger can legitimately lack receipts.

use anyhow::Result;
use log::info;
use rust_decimal::Decimal;
use shared::{
    CostForecast, CurrencySummary, ForecastConfidence, ForecastTrend, OfficialCostComponents,
    PricingTrendPoint, PurchaseReconciliation, RateTrend, ReconciliationVerdict,
};
use std::sync::Arc;

use crate::domain::cost_service::{self, ContributionEntry};
use crate::domain::models::TokenPurchase;
use crate::storage::{Connection, ContributionStorage, PurchaseStorage};

/// Official-currency units per 1 internal-currency unit, inferred from a
/// purchase and its receipt. 4 decimal places.
pub fn implied_exchange_rate(official_total: Decimal, internal_payment: Decimal) -> Decimal {
    if internal_payment.is_zero() {
        return Decimal::ZERO;
    }
    (official_total / internal_payment).round_dp(4)
}

/// Convert an official-currency amount into the internal currency.
pub fn convert_official_to_internal(amount: Decimal, rate: Decimal) -> Decimal {
    if rate.is_zero() {
        return Decimal::ZERO;
    }
    (amount / rate).round_dp(2)
}

/// Convert an internal-currency amount into the official currency.
pub fn convert_internal_to_official(amount: Decimal, rate: Decimal) -> Decimal {
    (amount * rate).round_dp(2)
}

/// Reconcile one contribution against its purchase's official receipt.
/// `None` when the purchase has no receipt (or a degenerate zero-kWh one).
pub fn reconcile_entry(entry: &ContributionEntry) -> Option<PurchaseReconciliation> {
    let (contribution, purchase) = entry;
    let receipt = purchase.receipt.as_ref()?;
    if receipt.kwh_purchased.is_zero() {
        return None;
    }

    let tokens = contribution.tokens_consumed;
    let proportion = tokens / receipt.kwh_purchased;
    let official_share = |component: Decimal| (proportion * component).round_dp(2);

    let internal_true_cost =
        cost_service::true_cost(tokens, purchase.total_tokens, purchase.total_payment);
    let official_true_cost = official_share(receipt.total_amount);
    let rate = implied_exchange_rate(receipt.total_amount, purchase.total_payment);
    let official_cost_in_internal = convert_official_to_internal(official_true_cost, rate);
    let variance = (internal_true_cost - official_cost_in_internal).round_dp(2);

    let tolerance = Decimal::new(1, 2);
    let verdict = if variance > tolerance {
        ReconciliationVerdict::Overpaid
    } else if variance < -tolerance {
        ReconciliationVerdict::Underpaid
    } else {
        ReconciliationVerdict::Exact
    };

    Some(PurchaseReconciliation {
        purchase_id: purchase.id.clone(),
        tokens_consumed: tokens,
        internal_true_cost,
        official_true_cost,
        official_components: OfficialCostComponents {
            energy_cost: official_share(receipt.energy_cost),
            debt: official_share(receipt.debt),
            rea_levy: official_share(receipt.rea_levy),
            vat: official_share(receipt.vat),
        },
        implied_exchange_rate: rate,
        official_cost_in_internal,
        variance,
        verdict,
    })
}

/// Trend of a chronological rate series: second-half mean more than 5%
/// above/below the first-half mean.
fn rate_trend(rates: &[Decimal]) -> RateTrend {
    if rates.len() < 2 {
        return RateTrend::Stable;
    }
    let half = rates.len() / 2;
    let mean = |slice: &[Decimal]| {
        slice.iter().copied().sum::<Decimal>() / Decimal::from(slice.len())
    };
    let first = mean(&rates[..half]);
    let second = mean(&rates[half..]);
    if first.is_zero() {
        return RateTrend::Stable;
    }
    let five_percent = Decimal::new(5, 2);
    if second > first * (Decimal::ONE + five_percent) {
        RateTrend::Increasing
    } else if second < first * (Decimal::ONE - five_percent) {
        RateTrend::Decreasing
    } else {
        RateTrend::Stable
    }
}

/// Aggregate a user's dual-currency picture: average implied rate, rate
/// trend, and how complete the receipt coverage is.
pub fn user_currency_summary(user_id: &str, entries: &[ContributionEntry]) -> CurrencySummary {
    let mut ordered: Vec<&ContributionEntry> = entries.iter().collect();
    ordered.sort_by(|(_, a), (_, b)| a.purchase_date.cmp(&b.purchase_date));

    let rates: Vec<Decimal> = ordered
        .iter()
        .filter_map(|(_, purchase)| {
            purchase
                .receipt
                .as_ref()
                .map(|r| implied_exchange_rate(r.total_amount, purchase.total_payment))
        })
        .collect();

    let average = if rates.is_empty() {
        Decimal::ZERO
    } else {
        (rates.iter().copied().sum::<Decimal>() / Decimal::from(rates.len())).round_dp(4)
    };

    let completeness = if entries.is_empty() {
        Decimal::ZERO
    } else {
        (Decimal::from(rates.len()) / Decimal::from(entries.len()) * Decimal::from(100)).round_dp(2)
    };

    CurrencySummary {
        user_id: user_id.to_string(),
        average_exchange_rate: average,
        rate_trend: rate_trend(&rates),
        receipts_available: rates.len(),
        total_contributions: entries.len(),
        completeness_percent: completeness,
    }
}

/// Time-ordered pricing series for every receipted purchase.
pub fn extract_pricing_trends(purchases: &[TokenPurchase]) -> Vec<PricingTrendPoint> {
    let mut points: Vec<PricingTrendPoint> = purchases
        .iter()
        .filter_map(|purchase| {
            let receipt = purchase.receipt.as_ref()?;
            if receipt.kwh_purchased.is_zero() || purchase.total_tokens.is_zero() {
                return None;
            }
            Some(PricingTrendPoint {
                date: purchase.purchase_date.date_naive(),
                official_per_kwh: (receipt.total_amount / receipt.kwh_purchased).round_dp(4),
                internal_per_kwh: (purchase.total_payment / purchase.total_tokens).round_dp(4),
                exchange_rate: implied_exchange_rate(receipt.total_amount, purchase.total_payment),
                kwh_purchased: receipt.kwh_purchased,
            })
        })
        .collect();
    points.sort_by(|a, b| a.date.cmp(&b.date));
    points
}

/// Forecast the near-future official unit cost with a trend-adjusted
/// moving average over the last six receipted purchases.
pub fn forecast(purchases: &[TokenPurchase], horizon_days: u32) -> CostForecast {
    let points = extract_pricing_trends(purchases);
    let sample_size = points.len();

    if points.is_empty() {
        return CostForecast {
            official_per_kwh: Decimal::ZERO,
            internal_per_kwh: Decimal::ZERO,
            trend: ForecastTrend::Stable,
            confidence: ForecastConfidence::Low,
            sample_size: 0,
            horizon_days,
        };
    }

    let window_start = points.len().saturating_sub(6);
    let window = &points[window_start..];
    let mean = |values: &[Decimal]| {
        values.iter().copied().sum::<Decimal>() / Decimal::from(values.len())
    };
    let official_rates: Vec<Decimal> = window.iter().map(|p| p.official_per_kwh).collect();
    let average = mean(&official_rates);

    let half = official_rates.len() / 2;
    let trend = if half == 0 {
        ForecastTrend::Stable
    } else {
        let first = mean(&official_rates[..half]);
        let second = mean(&official_rates[half..]);
        let ten_percent = Decimal::new(1, 1);
        if first.is_zero() {
            ForecastTrend::Stable
        } else if second > first * (Decimal::ONE + ten_percent) {
            ForecastTrend::Rising
        } else if second < first * (Decimal::ONE - ten_percent) {
            ForecastTrend::Falling
        } else {
            ForecastTrend::Stable
        }
    };

    // Flat 5% adjustment in the trend's direction
    let five_percent = Decimal::new(5, 2);
    let adjusted = match trend {
        ForecastTrend::Rising => average * (Decimal::ONE + five_percent),
        ForecastTrend::Falling => average * (Decimal::ONE - five_percent),
        ForecastTrend::Stable => average,
    }
    .round_dp(4);

    let window_rate = mean(&window.iter().map(|p| p.exchange_rate).collect::<Vec<_>>());
    let internal = if window_rate.is_zero() {
        Decimal::ZERO
    } else {
        (adjusted / window_rate).round_dp(4)
    };

    let confidence = if sample_size >= 10 {
        ForecastConfidence::High
    } else if sample_size >= 5 {
        ForecastConfidence::Medium
    } else {
        ForecastConfidence::Low
    };

    CostForecast {
        official_per_kwh: adjusted,
        internal_per_kwh: internal,
        trend,
        confidence,
        sample_size,
        horizon_days,
    }
}

/// Service wrapper reading fresh ledger state per report.
#[derive(Clone)]
pub struct ReconciliationService<C: Connection> {
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
}

impl<C: Connection> ReconciliationService<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
        }
    }

    fn entries_for_user(&self, user_id: &str) -> Result<Vec<ContributionEntry>> {
        let contributions = self.contribution_repository.list_contributions_for_user(user_id)?;
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        Ok(contributions
            .into_iter()
            .filter_map(|c| {
                purchases
                    .iter()
                    .find(|p| p.id == c.purchase_id)
                    .map(|p| (c, p.clone()))
            })
            .collect())
    }

    /// Per-contribution reconciliations for a user; unreceipted purchases
    /// are simply absent from the result.
    pub fn reconcile_user(&self, user_id: &str) -> Result<Vec<PurchaseReconciliation>> {
        let entries = self.entries_for_user(user_id)?;
        Ok(entries.iter().filter_map(reconcile_entry).collect())
    }

    pub fn user_currency_summary(&self, user_id: &str) -> Result<CurrencySummary> {
        let entries = self.entries_for_user(user_id)?;
        let summary = user_currency_summary(user_id, &entries);
        info!(
            "Currency summary for {}: avg rate {}, {}/{} receipted",
            user_id, summary.average_exchange_rate, summary.receipts_available, summary.total_contributions
        );
        Ok(summary)
    }

    pub fn pricing_trends(&self) -> Result<Vec<PricingTrendPoint>> {
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        Ok(extract_pricing_trends(&purchases))
    }

    pub fn forecast(&self, horizon_days: u32) -> Result<CostForecast> {
        let purchases = self.purchase_repository.list_purchases_chronological()?;
        Ok(forecast(&purchases, horizon_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ReceiptData, UserContribution};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn receipt(kwh: Decimal, total: Decimal) -> ReceiptData {
        ReceiptData {
            id: "rc1".to_string(),
            purchase_id: Some("p1".to_string()),
            kwh_purchased: kwh,
            energy_cost: total,
            debt: Decimal::ZERO,
            rea_levy: Decimal::ZERO,
            vat: Decimal::ZERO,
            total_amount: total,
            transaction_datetime: "2024-01-01T08:30:00".parse().unwrap(),
            token_number: None,
            account_number: None,
        }
    }

    fn receipted_purchase(
        id: &str,
        tokens: Decimal,
        payment: Decimal,
        kwh: Decimal,
        total_official: Decimal,
        date: &str,
        seq: i64,
    ) -> TokenPurchase {
        TokenPurchase {
            id: id.to_string(),
            total_tokens: tokens,
            total_payment: payment,
            meter_reading: dec!(5000),
            purchase_date: Utc
                .from_utc_datetime(&format!("{}T09:00:00", date).parse().unwrap()),
            is_emergency: false,
            created_by: "alice".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            receipt: Some(ReceiptData {
                id: format!("receipt-{}", id),
                purchase_id: Some(id.to_string()),
                ..receipt(kwh, total_official)
            }),
        }
    }

    fn contribution(purchase_id: &str, amount: Decimal, tokens: Decimal) -> UserContribution {
        UserContribution {
            id: format!("c-{}", purchase_id),
            purchase_id: purchase_id.to_string(),
            user_id: "alice".to_string(),
            contribution_amount: amount,
            meter_reading: dec!(5100),
            tokens_consumed: tokens,
            created_at: Utc.timestamp_opt(1_700_000_500, 0).unwrap(),
        }
    }

    #[test]
    fn reconciles_receipted_purchase_to_an_exact_verdict() {
        // 1580.99 official for a 20.00 internal payment: 79.0495 per unit
        let purchase = receipted_purchase(
            "p1",
            dec!(203.21),
            dec!(20.00),
            dec!(203.21),
            dec!(1580.99),
            "2024-01-01",
            1,
        );
        let entry = (contribution("p1", dec!(20), dec!(100)), purchase);
        let reconciliation = reconcile_entry(&entry).unwrap();

        assert_eq!(reconciliation.implied_exchange_rate, dec!(79.0495));
        assert_eq!(reconciliation.internal_true_cost, dec!(9.84));
        assert_eq!(reconciliation.official_true_cost, dec!(778.01));
        assert_eq!(reconciliation.official_cost_in_internal, dec!(9.84));
        assert_eq!(reconciliation.variance, Decimal::ZERO);
        assert_eq!(reconciliation.verdict, ReconciliationVerdict::Exact);
    }

    #[test]
    fn component_breakdown_is_proportional_per_component() {
        let mut purchase = receipted_purchase(
            "p1",
            dec!(1000),
            dec!(20),
            dec!(1000),
            dec!(970),
            "2024-01-01",
            1,
        );
        let receipt = purchase.receipt.as_mut().unwrap();
        receipt.energy_cost = dec!(800);
        receipt.debt = dec!(0);
        receipt.rea_levy = dec!(50);
        receipt.vat = dec!(120);

        let entry = (contribution("p1", dec!(10), dec!(500)), purchase);
        let reconciliation = reconcile_entry(&entry).unwrap();
        assert_eq!(reconciliation.official_components.energy_cost, dec!(400.00));
        assert_eq!(reconciliation.official_components.rea_levy, dec!(25.00));
        assert_eq!(reconciliation.official_components.vat, dec!(60.00));
        assert_eq!(reconciliation.official_true_cost, dec!(485.00));
    }

    #[test]
    fn unreceipted_purchase_reconciles_to_none() {
        let mut purchase = receipted_purchase(
            "p1",
            dec!(1000),
            dec!(20),
            dec!(1000),
            dec!(970),
            "2024-01-01",
            1,
        );
        purchase.receipt = None;
        let entry = (contribution("p1", dec!(10), dec!(500)), purchase);
        assert!(reconcile_entry(&entry).is_none());
    }

    #[test]
    fn currency_summary_detects_increasing_rates() {
        let entries: Vec<ContributionEntry> = (0..6)
            .map(|i| {
                // Official totals climb from 400 to 900 on a flat 20 payment
                let total = Decimal::from(400 + i * 100);
                let id = format!("p{}", i);
                let purchase = receipted_purchase(
                    &id,
                    dec!(100),
                    dec!(20),
                    dec!(100),
                    total,
                    &format!("2024-0{}-01", i + 1),
                    i as i64,
                );
                (contribution(&id, dec!(20), dec!(50)), purchase)
            })
            .collect();

        let summary = user_currency_summary("alice", &entries);
        assert_eq!(summary.rate_trend, RateTrend::Increasing);
        assert_eq!(summary.receipts_available, 6);
        assert_eq!(summary.completeness_percent, dec!(100.00));
    }

    #[test]
    fn completeness_reflects_missing_receipts() {
        let receipted = receipted_purchase(
            "p1",
            dec!(100),
            dec!(20),
            dec!(100),
            dec!(500),
            "2024-01-01",
            1,
        );
        let mut bare = receipted_purchase(
            "p2",
            dec!(100),
            dec!(20),
            dec!(100),
            dec!(500),
            "2024-02-01",
            2,
        );
        bare.receipt = None;
        let entries = vec![
            (contribution("p1", dec!(20), dec!(50)), receipted),
            (contribution("p2", dec!(20), dec!(50)), bare),
        ];
        let summary = user_currency_summary("alice", &entries);
        assert_eq!(summary.completeness_percent, dec!(50.00));
        assert_eq!(summary.rate_trend, RateTrend::Stable);
    }

    #[test]
    fn forecast_with_no_receipts_is_explicit_zero() {
        let result = forecast(&[], 30);
        assert_eq!(result.official_per_kwh, Decimal::ZERO);
        assert_eq!(result.confidence, ForecastConfidence::Low);
        assert_eq!(result.trend, ForecastTrend::Stable);
        assert_eq!(result.sample_size, 0);
    }

    #[test]
    fn forecast_applies_flat_adjustment_in_trend_direction() {
        // Six receipted purchases, official per-kWh doubling over time
        let purchases: Vec<TokenPurchase> = (0..6)
            .map(|i| {
                let total = Decimal::from(500 + i * 100);
                receipted_purchase(
                    &format!("p{}", i),
                    dec!(100),
                    dec!(20),
                    dec!(100),
                    total,
                    &format!("2024-0{}-01", i + 1),
                    i as i64,
                )
            })
            .collect();

        let result = forecast(&purchases, 30);
        // Window per-kWh rates: 5,6,7,8,9,10 -> mean 7.5, second half >10% above first
        assert_eq!(result.trend, ForecastTrend::Rising);
        assert_eq!(result.official_per_kwh, dec!(7.8750));
        assert_eq!(result.confidence, ForecastConfidence::Medium);
        assert_eq!(result.sample_size, 6);
    }

    #[test]
    fn official_round_trip_survives_conversion() {
        let rate = dec!(79.0495);
        let amount = dec!(123.45);
        let converted = convert_official_to_internal(convert_internal_to_official(amount, rate), rate);
        assert!((converted - amount).abs() <= dec!(0.01));
    }

    proptest! {
        #[test]
        fn conversion_round_trip_stays_within_a_cent(
            amount_cents in 1i64..10_000_000,
            rate_basis in 10_000i64..1_000_000,
        ) {
            // Rates from 1.0000 to 100.0000 official units per internal unit
            let amount = Decimal::new(amount_cents, 2);
            let rate = Decimal::new(rate_basis, 4);
            let converted =
                convert_official_to_internal(convert_internal_to_official(amount, rate), rate);
            prop_assert!((converted - amount).abs() <= dec!(0.01));
        }
    }
}
