//! Immutable snapshot of the ledger taken at validation time.
//!
//! Every validation-then-write operation reads a fresh snapshot and runs
//! its checks purely against it; nothing here is cached across calls.
//! Predecessor/successor relationships between purchases are position
//! lookups over the date-ordered sequence, never stored pointers.

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::models::{MeterReading, ReadingPoint, TokenPurchase, UserContribution};
use crate::storage::{ContributionStorage, PurchaseStorage, ReadingStorage};

/// Which reading points a chronology check runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationScope {
    /// The whole shared meter: standalone readings plus purchase readings
    GlobalMeter,
    /// Only one user's standalone readings (purchase readings included,
    /// since the physical meter is shared)
    User(String),
}

/// A consistent read of the full ledger, ordered chronologically.
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    /// Standalone readings ordered by (date, created_at)
    pub readings: Vec<MeterReading>,
    /// Purchases ordered by (purchase_date, created_at)
    pub purchases: Vec<TokenPurchase>,
    /// All contributions, unordered
    pub contributions: Vec<UserContribution>,
}

impl LedgerSnapshot {
    /// Read a fresh snapshot from the durable store.
    pub fn load(
        readings: &impl ReadingStorage,
        purchases: &impl PurchaseStorage,
        contributions: &impl ContributionStorage,
    ) -> Result<Self> {
        Ok(Self {
            readings: readings.list_readings_chronological()?,
            purchases: purchases.list_purchases_chronological()?,
            contributions: contributions.list_contributions()?,
        })
    }

    /// Every reading data point in scope, ordered by (date, recorded_at).
    pub fn reading_points(&self, scope: &ValidationScope) -> Vec<ReadingPoint> {
        let mut points: Vec<ReadingPoint> = self
            .readings
            .iter()
            .filter(|r| match scope {
                ValidationScope::GlobalMeter => true,
                ValidationScope::User(user_id) => &r.user_id == user_id,
            })
            .map(ReadingPoint::from_reading)
            .collect();
        points.extend(self.purchases.iter().map(ReadingPoint::from_purchase));
        points.sort_by(|a, b| a.date.cmp(&b.date).then(a.recorded_at.cmp(&b.recorded_at)));
        points
    }

    /// Highest reading recorded on `date`, excluding `exclude_id`.
    pub fn max_reading_on_date<'a>(
        points: &'a [ReadingPoint],
        date: NaiveDate,
        exclude_id: Option<&str>,
    ) -> Option<&'a ReadingPoint> {
        points
            .iter()
            .filter(|p| p.date == date && Some(p.id.as_str()) != exclude_id)
            .max_by(|a, b| a.reading.cmp(&b.reading))
    }

    /// Most recent reading strictly before `date`, excluding `exclude_id`.
    pub fn latest_point_before<'a>(
        points: &'a [ReadingPoint],
        date: NaiveDate,
        exclude_id: Option<&str>,
    ) -> Option<&'a ReadingPoint> {
        points
            .iter()
            .filter(|p| p.date < date && Some(p.id.as_str()) != exclude_id)
            .last()
    }

    /// Earliest reading strictly after `date`, excluding `exclude_id`.
    pub fn earliest_point_after<'a>(
        points: &'a [ReadingPoint],
        date: NaiveDate,
        exclude_id: Option<&str>,
    ) -> Option<&'a ReadingPoint> {
        points
            .iter()
            .find(|p| p.date > date && Some(p.id.as_str()) != exclude_id)
    }

    /// The chronologically first purchase in the ledger.
    pub fn first_purchase(&self) -> Option<&TokenPurchase> {
        self.purchases.first()
    }

    /// A purchase's position in the date-ordered sequence.
    fn purchase_position(&self, purchase_id: &str) -> Option<usize> {
        self.purchases.iter().position(|p| p.id == purchase_id)
    }

    pub fn purchase(&self, purchase_id: &str) -> Option<&TokenPurchase> {
        self.purchases.iter().find(|p| p.id == purchase_id)
    }

    /// The purchase chronologically preceding `purchase_id`.
    pub fn previous_purchase(&self, purchase_id: &str) -> Option<&TokenPurchase> {
        let pos = self.purchase_position(purchase_id)?;
        if pos == 0 {
            None
        } else {
            self.purchases.get(pos - 1)
        }
    }

    /// The purchase chronologically following `purchase_id`.
    pub fn next_purchase(&self, purchase_id: &str) -> Option<&TokenPurchase> {
        let pos = self.purchase_position(purchase_id)?;
        self.purchases.get(pos + 1)
    }

    /// The purchase created most recently, regardless of purchase date.
    pub fn latest_created_purchase(&self) -> Option<&TokenPurchase> {
        self.purchases.iter().max_by_key(|p| p.created_at)
    }

    /// The single contribution referencing `purchase_id`, if any.
    pub fn contribution_for_purchase(&self, purchase_id: &str) -> Option<&UserContribution> {
        self.contributions.iter().find(|c| c.purchase_id == purchase_id)
    }

    /// Cumulative tokens ever purchased as of `date` (inclusive), on top
    /// of the first purchase's meter reading. The physical meter can
    /// never read higher than this.
    pub fn meter_ceiling(&self, date: NaiveDate) -> Option<Decimal> {
        let first = self.first_purchase()?;
        let purchased: Decimal = self
            .purchases
            .iter()
            .filter(|p| p.purchase_date.date_naive() <= date)
            .map(|p| p.total_tokens)
            .sum();
        Some(first.meter_reading + purchased)
    }

    /// The baseline meter reading a contribution to `purchase_id` is
    /// measured from: the previous purchase's reading, or the purchase's
    /// own reading when it is the first in the ledger.
    pub fn consumption_baseline(&self, purchase_id: &str) -> Option<Decimal> {
        match self.previous_purchase(purchase_id) {
            Some(previous) => Some(previous.meter_reading),
            None => self.purchase(purchase_id).map(|p| p.meter_reading),
        }
    }
}
