//! Domain model for a user contribution.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A member's payment against exactly one purchase, together with the
/// meter reading taken at contribution time.
///
/// `tokens_consumed` is derived: the contribution's meter reading minus
/// the chronologically previous purchase's meter reading (or minus the
/// owning purchase's own reading when it is the first purchase in the
/// ledger). It may never exceed the tokens that were available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContribution {
    pub id: String,
    pub purchase_id: String,
    pub user_id: String,
    /// Amount paid in the internal currency
    pub contribution_amount: Decimal,
    pub meter_reading: Decimal,
    pub tokens_consumed: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UserContribution {
    /// Generate a unique contribution ID.
    /// Format: contribution-<uuid>
    pub fn generate_id() -> String {
        format!("contribution-{}", Uuid::new_v4())
    }
}
