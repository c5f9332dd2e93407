//! Tagged merged view of every meter-reading data point in the ledger.
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{MeterReading, TokenPurchase};

/// Where a reading data point came from. Chronology checks match on this
/// exhaustively so "which table did this row come from" is never a
/// stringly-typed convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingSource {
    /// A standalone reading entered by a user
    Standalone { user_id: String },
    /// The reading recorded on a purchase
    Purchase,
}

/// One point of the global meter sequence, regardless of which record
/// type it was recorded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPoint {
    pub source: ReadingSource,
    /// ID of the originating record
    pub id: String,
    pub reading: Decimal,
    pub date: NaiveDate,
    /// Insertion order, used as the same-date tie-break
    pub recorded_at: DateTime<Utc>,
}

impl ReadingPoint {
    pub fn from_reading(reading: &MeterReading) -> Self {
        Self {
            source: ReadingSource::Standalone { user_id: reading.user_id.clone() },
            id: reading.id.clone(),
            reading: reading.reading,
            date: reading.reading_date,
            recorded_at: reading.created_at,
        }
    }

    pub fn from_purchase(purchase: &TokenPurchase) -> Self {
        Self {
            source: ReadingSource::Purchase,
            id: purchase.id.clone(),
            reading: purchase.meter_reading,
            date: purchase.purchase_date.date_naive(),
            recorded_at: purchase.created_at,
        }
    }
}
