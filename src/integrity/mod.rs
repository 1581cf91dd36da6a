//! Client-side integrity scoring
//!
//! Pure functions over a product's logs, recomputed on demand. These scores
//! are for display before the server verdicts arrive; the per-log fraud
//! score from the server stays authoritative.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::{Product, RiskFactors, RiskScore, Stage};

const GPS_PENALTY: i32 = 20;
const PHOTO_PENALTY: i32 = 30;
const CHRONOLOGY_PENALTY: i32 = 50;

/// Assumed effort for a Creation log without a stated duration
const DEFAULT_CREATION_MINUTES: u64 = 240;

fn duration_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    // "4h 30m", "4h", "45m"
    PATTERN
        .get_or_init(|| Regex::new(r"(\d+)h\s*(\d*)m?|(\d+)m").ok())
        .as_ref()
}

/// Minutes stated in a free-text description, if any
pub fn parse_duration_minutes(description: &str) -> Option<u64> {
    let caps = duration_pattern()?.captures(description)?;
    let number = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<u64>().ok())
    };

    let hours = number(1).unwrap_or(0);
    let minutes = number(2).or_else(|| number(3)).unwrap_or(0);
    Some(hours * 60 + minutes)
}

/// Great-circle distance between the Intake and Finishing locations, in
/// whole kilometers; 0 when either is missing
pub fn material_kilometers(product: &Product) -> u64 {
    let intake = product
        .first_log(Stage::Intake)
        .and_then(|l| l.location.as_ref());
    let finishing = product
        .first_log(Stage::Finishing)
        .and_then(|l| l.location.as_ref());

    match (intake, finishing) {
        (Some(a), Some(b)) => a.distance_km(b).round() as u64,
        _ => 0,
    }
}

/// Production hours stated across logs, rounded to one decimal
pub fn production_hours(product: &Product) -> f64 {
    let total_minutes: u64 = product
        .logs
        .iter()
        .map(|log| match parse_duration_minutes(&log.description) {
            Some(minutes) => minutes,
            None if log.stage == Stage::Creation => DEFAULT_CREATION_MINUTES,
            None => 0,
        })
        .sum();

    (total_minutes as f64 / 60.0 * 10.0).round() / 10.0
}

/// Data-integrity score in `0..=100`
pub fn integrity_score(product: &Product) -> RiskScore {
    let mut score: i32 = 100;
    let mut factors = RiskFactors::default();

    let mut critical = product.logs.iter().filter(|l| l.stage.is_critical()).peekable();
    if critical.peek().is_some() && !critical.all(|l| l.has_verified_location()) {
        score -= GPS_PENALTY;
        factors.gps_verified = false;
    }

    if !product.logs.is_empty() && !product.logs.iter().any(|l| l.has_photo()) {
        score -= PHOTO_PENALTY;
        factors.photo_verified = false;
    }

    // Every backwards step costs; equal timestamps are fine
    for pair in product.logs.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            score -= CHRONOLOGY_PENALTY;
            factors.chronology_valid = false;
        }
    }

    RiskScore {
        product_id: product.id.clone(),
        score: score.clamp(0, 100) as u8,
        factors,
    }
}

/// A server-flagged log, for review lists
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudAlert {
    pub product_id: String,
    pub product_name: String,
    pub log_id: String,
    pub stage: Stage,
    pub fraud_score: u32,
    pub flag_reason: Option<String>,
}

/// Totals across a portfolio of products
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub product_count: usize,
    pub completed_count: usize,
    pub total_production_hours: f64,
    pub total_material_kilometers: u64,
    /// 100 for an empty portfolio
    pub average_integrity: u8,
    pub fraud_alerts: Vec<FraudAlert>,
}

pub fn portfolio_summary(products: &[Product]) -> PortfolioSummary {
    let total_production_hours = products.iter().map(production_hours).sum();
    let total_material_kilometers = products.iter().map(material_kilometers).sum();

    let average_integrity = if products.is_empty() {
        100
    } else {
        let sum: u64 = products
            .iter()
            .map(|p| integrity_score(p).score as u64)
            .sum();
        (sum as f64 / products.len() as f64).round() as u8
    };

    let fraud_alerts = products
        .iter()
        .flat_map(|p| {
            p.logs
                .iter()
                .filter(|l| l.is_flagged == Some(true))
                .map(move |l| FraudAlert {
                    product_id: p.id.clone(),
                    product_name: p.name.clone(),
                    log_id: l.id.clone(),
                    stage: l.stage,
                    fraud_score: l.fraud_score.unwrap_or(0),
                    flag_reason: l.flag_reason.clone(),
                })
        })
        .collect();

    PortfolioSummary {
        product_count: products.len(),
        completed_count: products.iter().filter(|p| p.is_completed()).count(),
        total_production_hours,
        total_material_kilometers,
        average_integrity,
        fraud_alerts,
    }
}
