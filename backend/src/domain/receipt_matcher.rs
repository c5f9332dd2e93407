//! Fuzzy matching of imported receipt rows onto purchases.
//!
//! Imported paper receipts rarely carry anything that joins them to a
//! purchase record directly, so candidates are scored on date proximity
//! and kWh-quantity similarity. Matching is greedy in date order and a
//! purchase leaves the candidate pool only once a high-confidence row
//! claims it; medium/low matches stay available for manual confirmation.

use log::info;
use rust_decimal::Decimal;
use shared::{MatchConfidence, ReceiptMatch, ReceiptRow};

use crate::domain::models::TokenPurchase;

/// Score one receipt row against one purchase. Additive out of 100:
/// date proximity contributes up to 50, kWh similarity up to 50.
fn score_candidate(row: &ReceiptRow, purchase: &TokenPurchase) -> (u32, Vec<String>, Vec<String>) {
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    let day_delta = (row.transaction_datetime.date() - purchase.purchase_date.date_naive())
        .num_days()
        .abs();
    let date_score: u32 = if day_delta <= 1 {
        50
    } else if day_delta <= 3 {
        35
    } else if day_delta <= 7 {
        20
    } else {
        0
    };
    if date_score > 0 {
        reasons.push(format!("purchase date within {} day(s)", day_delta));
    } else {
        warnings.push(format!("purchase date {} days away", day_delta));
    }

    let mean = (row.kwh_purchased + purchase.total_tokens) / Decimal::from(2);
    let similarity = if mean.is_zero() {
        Decimal::ZERO
    } else {
        Decimal::from(100)
            - ((row.kwh_purchased - purchase.total_tokens).abs() / mean) * Decimal::from(100)
    };
    let kwh_score: u32 = if similarity >= Decimal::from(99) {
        50
    } else if similarity >= Decimal::from(95) {
        40
    } else if similarity >= Decimal::from(90) {
        25
    } else if similarity >= Decimal::from(80) {
        10
    } else {
        0
    };
    if kwh_score > 0 {
        reasons.push(format!("kWh quantity {}% similar", similarity.round_dp(1)));
    } else {
        warnings.push(format!(
            "kWh mismatch: receipt {} vs purchase {}",
            row.kwh_purchased, purchase.total_tokens
        ));
    }

    (date_score + kwh_score, reasons, warnings)
}

fn confidence_for(score: u32) -> MatchConfidence {
    if score >= 80 {
        MatchConfidence::High
    } else if score >= 50 {
        MatchConfidence::Medium
    } else if score >= 20 {
        MatchConfidence::Low
    } else {
        MatchConfidence::None
    }
}

/// Match one receipt row against a pool of candidate purchases. Only
/// purchases without existing receipt data should be offered as
/// candidates; the highest-scoring one wins.
pub fn match_receipt(row_index: usize, row: &ReceiptRow, candidates: &[&TokenPurchase]) -> ReceiptMatch {
    let mut best: Option<(u32, &TokenPurchase, Vec<String>, Vec<String>)> = None;
    for purchase in candidates {
        let (score, reasons, warnings) = score_candidate(row, purchase);
        let better = match &best {
            Some((best_score, ..)) => score > *best_score,
            None => true,
        };
        if better {
            best = Some((score, purchase, reasons, warnings));
        }
    }

    match best {
        Some((score, purchase, reasons, warnings)) => {
            let confidence = confidence_for(score);
            ReceiptMatch {
                row_index,
                matched_purchase_id: if confidence == MatchConfidence::None {
                    None
                } else {
                    Some(purchase.id.clone())
                },
                confidence,
                score,
                reasons,
                warnings,
            }
        }
        None => ReceiptMatch {
            row_index,
            matched_purchase_id: None,
            confidence: MatchConfidence::None,
            score: 0,
            reasons: vec![],
            warnings: vec!["no unreceipted purchases to match against".to_string()],
        },
    }
}

/// Match a whole import batch, greedily and in ascending date order.
///
/// A purchase is removed from the pool only when a row matches it with
/// high confidence, so later rows cannot claim it twice. Medium and low
/// matches intentionally leave the purchase available: only confident
/// matches are treated as consumed.
pub fn match_all(rows: &[ReceiptRow], purchases: &[TokenPurchase]) -> Vec<ReceiptMatch> {
    let mut pool: Vec<&TokenPurchase> = purchases.iter().filter(|p| p.receipt.is_none()).collect();

    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| rows[i].transaction_datetime);

    let mut matches = Vec::with_capacity(rows.len());
    for row_index in order {
        let row = &rows[row_index];
        let result = match_receipt(row_index, row, &pool);
        if result.confidence == MatchConfidence::High {
            if let Some(winner) = &result.matched_purchase_id {
                pool.retain(|p| &p.id != winner);
            }
        }
        matches.push(result);
    }

    let high = matches.iter().filter(|m| m.confidence == MatchConfidence::High).count();
    info!("Matched {} of {} receipt rows with high confidence", high, rows.len());
    matches
}
