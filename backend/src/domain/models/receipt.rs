//! Domain model for official utility receipt data.
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tolerance for the receipt component sum check: 0.02 official-currency units.
pub fn component_sum_tolerance() -> Decimal {
    Decimal::new(2, 2)
}

/// The official/government receipt attached to a purchase, denominated in
/// the official currency. At most one receipt per purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptData {
    pub id: String,
    pub purchase_id: Option<String>,
    pub kwh_purchased: Decimal,
    pub energy_cost: Decimal,
    pub debt: Decimal,
    pub rea_levy: Decimal,
    pub vat: Decimal,
    pub total_amount: Decimal,
    pub transaction_datetime: NaiveDateTime,
    pub token_number: Option<String>,
    pub account_number: Option<String>,
}

impl ReceiptData {
    /// Generate a unique receipt ID.
    /// Format: receipt-<uuid>
    pub fn generate_id() -> String {
        format!("receipt-{}", Uuid::new_v4())
    }

    /// Whether the four cost components sum to the receipt total within
    /// the import tolerance.
    pub fn components_sum_to_total(&self) -> bool {
        let sum = self.energy_cost + self.debt + self.rea_levy + self.vat;
        (sum - self.total_amount).abs() <= component_sum_tolerance()
    }
}
