//! Write-path command structs.
//!
//! Commands carry everything a validate-then-write operation needs,
//! including the admin-override flag where a rule grants one.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct CreateReadingCommand {
    pub user_id: String,
    pub reading: Decimal,
    pub reading_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePurchaseCommand {
    pub total_tokens: Decimal,
    pub total_payment: Decimal,
    pub meter_reading: Decimal,
    pub purchase_date: DateTime<Utc>,
    pub is_emergency: bool,
    pub created_by: String,
    /// Admins may record a purchase while an older one is still unfunded
    pub admin_override: bool,
}

#[derive(Debug, Clone)]
pub struct CreateContributionCommand {
    pub purchase_id: String,
    pub user_id: String,
    pub contribution_amount: Decimal,
    /// Meter reading taken at contribution time
    pub meter_reading: Decimal,
    pub reading_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct DeletePurchaseCommand {
    pub purchase_id: String,
    /// Admins may delete the latest purchase even when it is funded
    pub admin_override: bool,
}

#[derive(Debug, Clone)]
pub struct EditPurchaseCommand {
    pub purchase_id: String,
    pub new_meter_reading: Option<Decimal>,
    pub new_total_tokens: Option<Decimal>,
    /// Admins may edit a funded purchase; the cascade recomputes its dependents
    pub admin_override: bool,
}
