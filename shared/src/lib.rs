use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-user cost summary across all of their contributions.
///
/// "True cost" is the proportional share of each purchase's total cost
/// attributable to the tokens the user actually consumed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub user_id: String,
    /// Total kWh consumed across all contributions
    pub total_tokens_consumed: Decimal,
    /// Total amount the user actually paid (internal currency)
    pub total_amount_paid: Decimal,
    /// Total proportional cost of the tokens consumed (internal currency)
    pub total_true_cost: Decimal,
    /// Average cost per kWh consumed (4 decimal places)
    pub average_cost_per_kwh: Decimal,
    /// True cost as a percentage of amount paid; 100 = paid exactly true cost
    pub efficiency_percent: Decimal,
    /// Tokens consumed from regular (non-emergency) purchases
    pub regular_tokens: Decimal,
    pub regular_true_cost: Decimal,
    pub regular_cost_per_kwh: Decimal,
    /// Tokens consumed from emergency purchases
    pub emergency_tokens: Decimal,
    pub emergency_true_cost: Decimal,
    pub emergency_cost_per_kwh: Decimal,
    /// Extra cost attributable solely to buying at emergency rates.
    /// Zero when there is no regular baseline to compare against.
    pub emergency_premium: Decimal,
}

/// One step of a user's chronological running balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub purchase_id: String,
    /// Purchase date (RFC 3339)
    pub purchase_date: String,
    pub amount_paid: Decimal,
    /// Tokens actually charged for this entry. Forced to zero for the
    /// first purchase in the ledger, whose consumption is unattributable.
    pub effective_tokens: Decimal,
    pub true_cost: Decimal,
    /// Cumulative (amount paid - true cost) up to and including this entry
    pub running_balance: Decimal,
}

/// A user's account balance: cumulative overpayment (+) or debt (-)
/// across their contributions in strict chronological purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub user_id: String,
    pub balance: Decimal,
    pub entries: Vec<BalanceEntry>,
}

/// Verdict of a dual-currency reconciliation for one contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationVerdict {
    /// Internal-currency cost exceeds the official cost by more than 0.01
    Overpaid,
    /// Internal-currency cost falls short of the official cost by more than 0.01
    Underpaid,
    /// Within 0.01 either way
    Exact,
}

/// Proportional official-currency cost split into the receipt's components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficialCostComponents {
    pub energy_cost: Decimal,
    pub debt: Decimal,
    pub rea_levy: Decimal,
    pub vat: Decimal,
}

/// Reconciliation of one contribution against its purchase's official receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReconciliation {
    pub purchase_id: String,
    pub tokens_consumed: Decimal,
    /// True cost in the internal (payment) currency
    pub internal_true_cost: Decimal,
    /// True cost in the official (receipt) currency
    pub official_true_cost: Decimal,
    pub official_components: OfficialCostComponents,
    /// Official-currency units per 1 internal-currency unit (4 decimal places)
    pub implied_exchange_rate: Decimal,
    /// Official true cost converted back into the internal currency
    pub official_cost_in_internal: Decimal,
    /// internal_true_cost - official_cost_in_internal
    pub variance: Decimal,
    pub verdict: ReconciliationVerdict,
}

/// Direction of the implied exchange-rate series over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Per-user dual-currency aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencySummary {
    pub user_id: String,
    /// Mean of the per-purchase implied exchange rates (4 decimal places)
    pub average_exchange_rate: Decimal,
    pub rate_trend: RateTrend,
    /// Contributions whose purchase carries official receipt data
    pub receipts_available: usize,
    pub total_contributions: usize,
    pub completeness_percent: Decimal,
}

/// One point of the official/internal pricing time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTrendPoint {
    pub date: NaiveDate,
    pub official_per_kwh: Decimal,
    pub internal_per_kwh: Decimal,
    pub exchange_rate: Decimal,
    pub kwh_purchased: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastTrend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastConfidence {
    High,
    Medium,
    Low,
}

/// Near-future unit-cost forecast from a trend-adjusted moving average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    /// Forecast official-currency cost per kWh (4 decimal places)
    pub official_per_kwh: Decimal,
    /// Same forecast converted into the internal currency
    pub internal_per_kwh: Decimal,
    pub trend: ForecastTrend,
    pub confidence: ForecastConfidence,
    /// Receipted purchases available as history
    pub sample_size: usize,
    pub horizon_days: u32,
}

/// One row of an imported official receipt export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRow {
    pub transaction_datetime: NaiveDateTime,
    pub kwh_purchased: Decimal,
    pub energy_cost: Decimal,
    pub debt: Decimal,
    pub rea_levy: Decimal,
    pub vat: Decimal,
    pub total_amount: Decimal,
    pub tendered: Decimal,
    pub token_number: Option<String>,
    pub account_number: Option<String>,
}

/// Per-row import failure; never aborts the rest of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRowError {
    /// 1-based line number within the imported file
    pub line: usize,
    pub message: String,
}

/// Result of parsing and validating a receipt import batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub rows: Vec<ReceiptRow>,
    pub errors: Vec<ImportRowError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Confidence band for a fuzzy receipt-to-purchase match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchConfidence {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchConfidence::High => write!(f, "high"),
            MatchConfidence::Medium => write!(f, "medium"),
            MatchConfidence::Low => write!(f, "low"),
            MatchConfidence::None => write!(f, "none"),
        }
    }
}

/// Outcome of matching one imported receipt row against the purchase pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptMatch {
    /// Index of the row in the original import batch
    pub row_index: usize,
    pub matched_purchase_id: Option<String>,
    pub confidence: MatchConfidence,
    /// Additive score out of 100 (date proximity up to 50, kWh similarity up to 50)
    pub score: u32,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

/// Before/after payload handed to the audit collaborator whenever a
/// cascading recalculation mutates a ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Kind of row that changed ("token_purchase", "user_contribution")
    pub entity: String,
    pub entity_id: String,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    /// What caused the change, e.g. "admin_purchase_edit"
    pub trigger: String,
}

/// Mirror of the validation contract `{valid, error?}` for callers that
/// only need a yes/no plus a user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub valid: bool,
    pub error: Option<String>,
}

impl ValidationSummary {
    pub fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { valid: false, error: Some(message.into()) }
    }
}
