//! Domain model for a standalone meter reading.
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reading taken off the shared physical meter.
///
/// Readings are day-granularity and globally monotonic: for any two
/// readings, the one with the later date may never show a smaller value.
/// Same-date readings are tie-broken by `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub id: String,
    pub user_id: String,
    pub reading: Decimal,
    pub reading_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MeterReading {
    /// Generate a unique reading ID.
    /// Format: reading-<uuid>
    pub fn generate_id() -> String {
        format!("reading-{}", Uuid::new_v4())
    }
}
