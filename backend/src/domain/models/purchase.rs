//! Domain model for a token purchase.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::receipt::ReceiptData;

/// One prepaid token purchase loaded onto the shared meter.
///
/// Purchases ordered by `purchase_date` (tie-break `created_at`) form the
/// chronological backbone of the ledger: their meter readings must be
/// non-decreasing, and each purchase may carry at most one contribution
/// and at most one official receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPurchase {
    pub id: String,
    /// Tokens (kWh) bought in this purchase
    pub total_tokens: Decimal,
    /// Amount paid in the internal currency
    pub total_payment: Decimal,
    /// Meter reading recorded at purchase time
    pub meter_reading: Decimal,
    pub purchase_date: DateTime<Utc>,
    pub is_emergency: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub receipt: Option<ReceiptData>,
}

impl TokenPurchase {
    /// Generate a unique purchase ID.
    /// Format: purchase-<uuid>
    pub fn generate_id() -> String {
        format!("purchase-{}", Uuid::new_v4())
    }
}
