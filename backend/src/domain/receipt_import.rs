//! Receipt import-row parsing and validation.
//!
//! The utility's export uses `dd/mm/yy hh:mm:ss` timestamps and one row
//! per vend. Rows are validated independently: a malformed date or a
//! component sum that misses the total never aborts the rest of the
//! batch, it just lands in the per-row error list.

use anyhow::Result;
use chrono::NaiveDateTime;
use log::info;
use rust_decimal::Decimal;
use shared::{ImportReport, ImportRowError, ReceiptRow};
use std::io::Read;

use crate::domain::models::receipt::component_sum_tolerance;

const IMPORT_DATETIME_FORMAT: &str = "%d/%m/%y %H:%M:%S";

/// Validate one parsed row: the required amounts must be positive and the
/// four cost components must sum to the total within tolerance.
pub fn validate_row(row: &ReceiptRow) -> Result<(), String> {
    for (field, value) in [
        ("totalAmount", row.total_amount),
        ("kwhPurchased", row.kwh_purchased),
        ("tendered", row.tendered),
    ] {
        if value <= Decimal::ZERO {
            return Err(format!("{} must be positive, got {}", field, value));
        }
    }

    let sum = row.energy_cost + row.debt + row.rea_levy + row.vat;
    let difference = (sum - row.total_amount).abs();
    if difference > component_sum_tolerance() {
        return Err(format!(
            "cost components sum to {} but totalAmount is {} (difference {})",
            sum, row.total_amount, difference
        ));
    }
    Ok(())
}

/// Parse a receipt export into rows plus a per-row error report.
///
/// Expected header: transactionDateTime,kwhPurchased,energyCost,debt,rea,vat,totalAmount,tendered
/// with optional trailing tokenNumber and accountNumber columns.
pub fn parse_receipt_rows<R: Read>(reader: R) -> Result<ImportReport> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let datetime_col = column("transactionDateTime");
    let kwh_col = column("kwhPurchased");
    let energy_col = column("energyCost");
    let debt_col = column("debt");
    let rea_col = column("rea");
    let vat_col = column("vat");
    let total_col = column("totalAmount");
    let tendered_col = column("tendered");
    let token_col = column("tokenNumber");
    let account_col = column("accountNumber");

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, result) in csv_reader.records().enumerate() {
        // Header is line 1, first record line 2
        let line = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                errors.push(ImportRowError { line, message: format!("unreadable row: {}", e) });
                continue;
            }
        };

        let field = |col: Option<usize>| col.and_then(|i| record.get(i)).unwrap_or("").trim();

        let datetime = match NaiveDateTime::parse_from_str(field(datetime_col), IMPORT_DATETIME_FORMAT)
        {
            Ok(dt) => dt,
            Err(_) => {
                errors.push(ImportRowError {
                    line,
                    message: format!(
                        "invalid transactionDateTime '{}', expected dd/mm/yy hh:mm:ss",
                        field(datetime_col)
                    ),
                });
                continue;
            }
        };

        let mut parse_failure = None;
        let mut decimal_field = |name: &str, col: Option<usize>| {
            let raw = field(col);
            match raw.parse::<Decimal>() {
                Ok(value) => value,
                Err(_) => {
                    if parse_failure.is_none() {
                        parse_failure = Some(format!("invalid {} '{}'", name, raw));
                    }
                    Decimal::ZERO
                }
            }
        };

        let row = ReceiptRow {
            transaction_datetime: datetime,
            kwh_purchased: decimal_field("kwhPurchased", kwh_col),
            energy_cost: decimal_field("energyCost", energy_col),
            debt: decimal_field("debt", debt_col),
            rea_levy: decimal_field("rea", rea_col),
            vat: decimal_field("vat", vat_col),
            total_amount: decimal_field("totalAmount", total_col),
            tendered: decimal_field("tendered", tendered_col),
            token_number: {
                let value = field(token_col);
                if value.is_empty() { None } else { Some(value.to_string()) }
            },
            account_number: {
                let value = field(account_col);
                if value.is_empty() { None } else { Some(value.to_string()) }
            },
        };

        if let Some(message) = parse_failure {
            errors.push(ImportRowError { line, message });
            continue;
        }
        if let Err(message) = validate_row(&row) {
            errors.push(ImportRowError { line, message });
            continue;
        }
        rows.push(row);
    }

    info!("Parsed {} receipt rows, {} rejected", rows.len(), errors.len());
    Ok(ImportReport { rows, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HEADER: &str =
        "transactionDateTime,kwhPurchased,energyCost,debt,rea,vat,totalAmount,tendered\n";

    #[test]
    fn parses_well_formed_rows() {
        let data = format!(
            "{}{}",
            HEADER, "15/01/24 08:30:00,203.21,1380.99,0,80.00,120.00,1580.99,1600.00\n"
        );
        let report = parse_receipt_rows(data.as_bytes()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.kwh_purchased, dec!(203.21));
        assert_eq!(row.total_amount, dec!(1580.99));
        assert_eq!(
            row.transaction_datetime,
            "2024-01-15T08:30:00".parse().unwrap()
        );
    }

    #[test]
    fn rejects_component_sum_mismatch_without_blocking_batch() {
        // 800 + 0 + 50 + 120 = 970, off by 5 from the declared 975
        let data = format!(
            "{}{}{}",
            HEADER,
            "15/01/24 08:30:00,100.00,800,0,50,120,975,1000\n",
            "16/01/24 09:00:00,100.00,800,0,50,120,970,1000\n"
        );
        let report = parse_receipt_rows(data.as_bytes()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].line, 2);
        assert!(report.errors[0].message.contains("components sum"));
    }

    #[test]
    fn rejects_malformed_dates_per_row() {
        let data = format!(
            "{}{}{}",
            HEADER,
            "not-a-date,100.00,800,0,50,120,970,1000\n",
            "16/01/24 09:00:00,100.00,800,0,50,120,970,1000\n"
        );
        let report = parse_receipt_rows(data.as_bytes()).unwrap();
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("transactionDateTime"));
    }

    #[test]
    fn rejects_non_positive_required_fields() {
        let data = format!("{}{}", HEADER, "15/01/24 08:30:00,0,800,0,50,120,970,1000\n");
        let report = parse_receipt_rows(data.as_bytes()).unwrap();
        assert!(report.rows.is_empty());
        assert!(report.errors[0].message.contains("kwhPurchased"));
    }

    #[test]
    fn small_sum_drift_within_tolerance_is_accepted() {
        let data = format!(
            "{}{}",
            HEADER, "15/01/24 08:30:00,100.00,800,0,50,120.01,970,1000\n"
        );
        let report = parse_receipt_rows(data.as_bytes()).unwrap();
        assert!(report.is_clean());
    }
}
