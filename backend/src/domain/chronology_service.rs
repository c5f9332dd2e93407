//! Chronology validation for meter readings.
//!
//! The shared meter only ever counts upwards, so every reading — whether
//! entered on its own or recorded on a purchase — must slot into the
//! date-ordered sequence without breaking monotonicity. All checks run
//! against a fresh snapshot read at validation time; nothing is cached.

use anyhow::Result;
use chrono::NaiveDate;
use log::{info, warn};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::models::ReadingPoint;
use crate::domain::snapshot::{LedgerSnapshot, ValidationScope};
use crate::domain::violation::{LedgerViolation, ValidationOutcome};
use crate::storage::Connection;

/// Tuning for the optional consumption-spike anomaly check.
#[derive(Debug, Clone)]
pub struct ChronologyConfig {
    /// When true, anomalously high consumption is a hard rejection.
    pub anomaly_check: bool,
    /// How many prior readings feed the historical daily-rate statistics.
    pub anomaly_window: usize,
    /// Daily consumption floor below which a spike is never flagged (kWh/day).
    pub min_daily_floor: Decimal,
}

impl Default for ChronologyConfig {
    fn default() -> Self {
        Self {
            anomaly_check: false,
            anomaly_window: 10,
            min_daily_floor: Decimal::from(50),
        }
    }
}

/// A proposed reading, standalone or embedded in a purchase/contribution.
#[derive(Debug, Clone)]
pub struct ReadingCandidate {
    pub reading: Decimal,
    pub date: NaiveDate,
    /// Record to ignore during edit-revalidation
    pub exclude_id: Option<String>,
    /// Purchase-linked readings additionally respect the cumulative-token ceiling
    pub purchase_linked: bool,
}

impl ReadingCandidate {
    pub fn standalone(reading: Decimal, date: NaiveDate) -> Self {
        Self { reading, date, exclude_id: None, purchase_linked: false }
    }

    pub fn purchase_linked(reading: Decimal, date: NaiveDate) -> Self {
        Self { reading, date, exclude_id: None, purchase_linked: true }
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }
}

/// Validate a candidate reading against the full reading sequence.
///
/// Checks, in order: same-date floor, prior-reading floor, next-reading
/// ceiling, cumulative-purchased-tokens ceiling (purchase-linked only),
/// and the optional consumption-spike check. The first failing check
/// returns immediately with the conflicting reading identified.
pub fn validate_reading(
    candidate: &ReadingCandidate,
    snapshot: &LedgerSnapshot,
    scope: &ValidationScope,
    config: &ChronologyConfig,
) -> Result<(), LedgerViolation> {
    let points = snapshot.reading_points(scope);
    let exclude = candidate.exclude_id.as_deref();

    if let Some(same_day) = LedgerSnapshot::max_reading_on_date(&points, candidate.date, exclude) {
        if candidate.reading < same_day.reading {
            return Err(LedgerViolation::ReadingBelowSameDate {
                candidate: candidate.reading,
                highest: same_day.reading,
                date: candidate.date,
                conflicting_id: same_day.id.clone(),
            });
        }
    }

    if let Some(prior) = LedgerSnapshot::latest_point_before(&points, candidate.date, exclude) {
        if candidate.reading < prior.reading {
            return Err(LedgerViolation::ReadingBelowPrior {
                candidate: candidate.reading,
                prior: prior.reading,
                prior_date: prior.date,
                conflicting_id: prior.id.clone(),
            });
        }
    }

    if let Some(next) = LedgerSnapshot::earliest_point_after(&points, candidate.date, exclude) {
        if candidate.reading > next.reading {
            return Err(LedgerViolation::ReadingAboveNext {
                candidate: candidate.reading,
                next: next.reading,
                next_date: next.date,
                conflicting_id: next.id.clone(),
            });
        }
    }

    if candidate.purchase_linked {
        if let Some(ceiling) = snapshot.meter_ceiling(candidate.date) {
            if candidate.reading > ceiling {
                return Err(LedgerViolation::ReadingExceedsPurchasedTokens {
                    candidate: candidate.reading,
                    ceiling,
                    date: candidate.date,
                });
            }
        }
    }

    check_consumption_anomaly(candidate, &points, config)
}

/// Compare the candidate's implied daily consumption against historical
/// statistics; reject only when the configured hard check is on.
fn check_consumption_anomaly(
    candidate: &ReadingCandidate,
    points: &[ReadingPoint],
    config: &ChronologyConfig,
) -> Result<(), LedgerViolation> {
    let exclude = candidate.exclude_id.as_deref();
    let prior: Vec<_> = points
        .iter()
        .filter(|p| p.date < candidate.date && Some(p.id.as_str()) != exclude)
        .collect();

    let latest = match prior.last() {
        Some(p) => *p,
        None => return Ok(()),
    };

    let elapsed = (candidate.date - latest.date).num_days().max(1);
    let candidate_rate = (candidate.reading - latest.reading) / Decimal::from(elapsed);

    let window_start = prior.len().saturating_sub(config.anomaly_window);
    let window = &prior[window_start..];
    let mut rates = Vec::new();
    for pair in window.windows(2) {
        let days = (pair[1].date - pair[0].date).num_days().max(1);
        rates.push((pair[1].reading - pair[0].reading) / Decimal::from(days));
    }
    // Too little history to call anything anomalous
    if rates.len() < 3 {
        return Ok(());
    }

    let mean = rates.iter().copied().sum::<Decimal>() / Decimal::from(rates.len());
    let mut sorted = rates.clone();
    sorted.sort();
    let median = sorted[sorted.len() / 2];
    let historical_max = *sorted.last().unwrap();

    let threshold = [
        Decimal::from(3) * mean,
        Decimal::from(4) * median,
        Decimal::new(15, 1) * historical_max,
        config.min_daily_floor,
    ]
    .into_iter()
    .max()
    .unwrap();

    if candidate_rate > Decimal::from(2) * mean {
        warn!(
            "Consumption of {} kWh/day is above twice the historical mean ({})",
            candidate_rate.round_dp(2),
            mean.round_dp(2)
        );
    }

    if config.anomaly_check && candidate_rate > threshold {
        return Err(LedgerViolation::AnomalousConsumption {
            daily_rate: candidate_rate.round_dp(2),
            threshold: threshold.round_dp(2),
        });
    }
    Ok(())
}

/// Service wrapper that reads a fresh snapshot per validation.
#[derive(Clone)]
pub struct ChronologyService<C: Connection> {
    reading_repository: C::ReadingRepository,
    purchase_repository: C::PurchaseRepository,
    contribution_repository: C::ContributionRepository,
    config: ChronologyConfig,
}

impl<C: Connection> ChronologyService<C> {
    pub fn new(connection: Arc<C>, config: ChronologyConfig) -> Self {
        Self {
            reading_repository: connection.create_reading_repository(),
            purchase_repository: connection.create_purchase_repository(),
            contribution_repository: connection.create_contribution_repository(),
            config,
        }
    }

    pub fn load_snapshot(&self) -> Result<LedgerSnapshot> {
        LedgerSnapshot::load(
            &self.reading_repository,
            &self.purchase_repository,
            &self.contribution_repository,
        )
    }

    pub fn config(&self) -> &ChronologyConfig {
        &self.config
    }

    /// Validate a candidate against the current durable state.
    pub fn validate(
        &self,
        candidate: &ReadingCandidate,
        scope: &ValidationScope,
    ) -> Result<ValidationOutcome> {
        let snapshot = self.load_snapshot()?;
        let outcome: ValidationOutcome =
            validate_reading(candidate, &snapshot, scope, &self.config).into();
        if let Some(violation) = &outcome.violation {
            info!("Reading {} on {} rejected: {}", candidate.reading, candidate.date, violation);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MeterReading, TokenPurchase};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn reading(id: &str, user: &str, value: Decimal, date: &str, seq: i64) -> MeterReading {
        MeterReading {
            id: id.to_string(),
            user_id: user.to_string(),
            reading: value,
            reading_date: date.parse().unwrap(),
            notes: None,
            created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
        }
    }

    fn purchase(id: &str, tokens: Decimal, meter: Decimal, date: &str, seq: i64) -> TokenPurchase {
        TokenPurchase {
            id: id.to_string(),
            total_tokens: tokens,
            total_payment: dec!(10),
            meter_reading: meter,
            purchase_date: Utc
                .from_utc_datetime(&format!("{}T12:00:00", date).parse().unwrap()),
            is_emergency: false,
            created_by: "alice".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            receipt: None,
        }
    }

    fn snapshot(readings: Vec<MeterReading>, purchases: Vec<TokenPurchase>) -> LedgerSnapshot {
        LedgerSnapshot { readings, purchases, contributions: vec![] }
    }

    fn validate(candidate: &ReadingCandidate, snap: &LedgerSnapshot) -> Result<(), LedgerViolation> {
        validate_reading(candidate, snap, &ValidationScope::GlobalMeter, &ChronologyConfig::default())
    }

    #[test]
    fn accepts_reading_in_order() {
        let snap = snapshot(
            vec![
                reading("r1", "alice", dec!(5000), "2024-01-01", 1),
                reading("r2", "bob", dec!(5100), "2024-01-05", 2),
            ],
            vec![],
        );
        let candidate = ReadingCandidate::standalone(dec!(5150), "2024-01-08".parse().unwrap());
        assert!(validate(&candidate, &snap).is_ok());
    }

    #[test]
    fn rejects_reading_below_same_date_maximum() {
        let snap = snapshot(vec![reading("r1", "alice", dec!(5100), "2024-01-05", 1)], vec![]);
        let candidate = ReadingCandidate::standalone(dec!(5050), "2024-01-05".parse().unwrap());
        match validate(&candidate, &snap) {
            Err(LedgerViolation::ReadingBelowSameDate { highest, conflicting_id, .. }) => {
                assert_eq!(highest, dec!(5100));
                assert_eq!(conflicting_id, "r1");
            }
            other => panic!("expected same-date rejection, got {:?}", other),
        }
    }

    #[test]
    fn rejects_reading_below_most_recent_prior() {
        let snap = snapshot(vec![reading("r1", "alice", dec!(5100), "2024-01-05", 1)], vec![]);
        let candidate = ReadingCandidate::standalone(dec!(5000), "2024-01-10".parse().unwrap());
        assert!(matches!(
            validate(&candidate, &snap),
            Err(LedgerViolation::ReadingBelowPrior { prior, .. }) if prior == dec!(5100)
        ));
    }

    #[test]
    fn rejects_reading_above_next_chronological() {
        let snap = snapshot(vec![reading("r1", "alice", dec!(5200), "2024-01-20", 1)], vec![]);
        let candidate = ReadingCandidate::standalone(dec!(5300), "2024-01-10".parse().unwrap());
        assert!(matches!(
            validate(&candidate, &snap),
            Err(LedgerViolation::ReadingAboveNext { next, .. }) if next == dec!(5200)
        ));
    }

    #[test]
    fn excluded_record_does_not_conflict() {
        let snap = snapshot(vec![reading("r1", "alice", dec!(5100), "2024-01-05", 1)], vec![]);
        let candidate = ReadingCandidate::standalone(dec!(5050), "2024-01-05".parse().unwrap())
            .excluding("r1");
        assert!(validate(&candidate, &snap).is_ok());
    }

    #[test]
    fn purchase_readings_participate_in_the_sequence() {
        let snap = snapshot(
            vec![],
            vec![purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1)],
        );
        let candidate = ReadingCandidate::standalone(dec!(4900), "2024-01-10".parse().unwrap());
        assert!(matches!(
            validate(&candidate, &snap),
            Err(LedgerViolation::ReadingBelowPrior { conflicting_id, .. }) if conflicting_id == "p1"
        ));
    }

    #[test]
    fn purchase_linked_reading_cannot_exceed_cumulative_tokens() {
        // Ceiling: 5000 + 1000 + 800 = 6800
        let snap = snapshot(
            vec![],
            vec![
                purchase("p1", dec!(1000), dec!(5000), "2024-01-01", 1),
                purchase("p2", dec!(800), dec!(6000), "2024-02-01", 2),
            ],
        );
        let over = ReadingCandidate::purchase_linked(dec!(6900), "2024-03-01".parse().unwrap());
        assert!(matches!(
            validate(&over, &snap),
            Err(LedgerViolation::ReadingExceedsPurchasedTokens { ceiling, .. }) if ceiling == dec!(6800)
        ));

        let within = ReadingCandidate::purchase_linked(dec!(6700), "2024-03-01".parse().unwrap());
        assert!(validate(&within, &snap).is_ok());
    }

    #[test]
    fn user_scope_ignores_other_users_standalone_readings() {
        let snap = snapshot(
            vec![reading("r1", "bob", dec!(5100), "2024-01-05", 1)],
            vec![],
        );
        let candidate = ReadingCandidate::standalone(dec!(5000), "2024-01-10".parse().unwrap());
        assert!(validate_reading(
            &candidate,
            &snap,
            &ValidationScope::User("alice".to_string()),
            &ChronologyConfig::default(),
        )
        .is_ok());
    }

    #[test]
    fn anomalous_spike_rejected_when_check_enabled() {
        // Steady ~10 kWh/day history, then a 1000 kWh jump in one day.
        let snap = snapshot(
            vec![
                reading("r1", "alice", dec!(5000), "2024-01-01", 1),
                reading("r2", "alice", dec!(5010), "2024-01-02", 2),
                reading("r3", "alice", dec!(5020), "2024-01-03", 3),
                reading("r4", "alice", dec!(5030), "2024-01-04", 4),
                reading("r5", "alice", dec!(5040), "2024-01-05", 5),
            ],
            vec![],
        );
        let config = ChronologyConfig {
            anomaly_check: true,
            anomaly_window: 10,
            min_daily_floor: dec!(50),
        };
        let candidate = ReadingCandidate::standalone(dec!(6040), "2024-01-06".parse().unwrap());
        assert!(matches!(
            validate_reading(&candidate, &snap, &ValidationScope::GlobalMeter, &config),
            Err(LedgerViolation::AnomalousConsumption { .. })
        ));

        // Same spike passes when the check is disabled (default config).
        assert!(validate(&candidate, &snap).is_ok());
    }

    proptest! {
        // Whatever mix of candidates gets thrown at the validator, the
        // accepted subset stays monotone in date order.
        #[test]
        fn accepted_readings_are_always_monotone(
            candidates in proptest::collection::vec((0u32..10_000, 0i64..28), 1..40)
        ) {
            let start = "2024-01-01".parse::<chrono::NaiveDate>().unwrap();
            let mut accepted: Vec<MeterReading> = Vec::new();

            for (seq, (value, day_offset)) in candidates.into_iter().enumerate() {
                let snap = LedgerSnapshot {
                    readings: accepted.clone(),
                    purchases: vec![],
                    contributions: vec![],
                };
                let candidate = ReadingCandidate::standalone(
                    Decimal::from(value),
                    start + Duration::days(day_offset),
                );
                if validate(&candidate, &snap).is_ok() {
                    accepted.push(reading(
                        &format!("r{}", seq),
                        "alice",
                        candidate.reading,
                        &candidate.date.to_string(),
                        seq as i64,
                    ));
                }
            }

            let mut ordered = accepted;
            ordered.sort_by(|a, b| {
                a.reading_date
                    .cmp(&b.reading_date)
                    .then(a.created_at.cmp(&b.created_at))
            });
            for pair in ordered.windows(2) {
                prop_assert!(pair[0].reading <= pair[1].reading);
            }
        }
    }
}
