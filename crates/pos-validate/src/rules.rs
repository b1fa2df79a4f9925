//! Position validation rule bundle.
//!
//! Per-position rules, cross-position rules, and day-over-day rules over
//! normalized positions. The caller decides fatality: in strict mode any
//! error aborts; `PRICE_SERVICE_DOWN` aborts regardless.

use std::collections::HashMap;

use pos_schemas::Snapshot;

use crate::normalizer::{normalize, NormalizedPosition};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the strict rule bundle. Defaults match production.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Treat every error as fatal (the caller enforces this).
    pub strict: bool,
    /// Zero-price ratio (percent) above which `PRICE_SERVICE_DOWN` trips.
    pub zero_price_threshold_pct: u32,
    /// Quantity magnitude soft cap; above it a warning is raised.
    pub max_abs_quantity_micros: i64,
    /// Price soft cap; above it a warning is raised.
    pub max_price_micros: i64,
    /// Day-over-day quantity change (percent) above which a warning is raised.
    pub max_quantity_jump_pct: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            strict: true,
            zero_price_threshold_pct: 10,
            // 1e9 units
            max_abs_quantity_micros: 1_000_000_000 * 1_000_000,
            // 1e6 units per share
            max_price_micros: 1_000_000 * 1_000_000,
            max_quantity_jump_pct: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCode {
    MalformedPosition,
    MissingProductId,
    InvalidCurrency,
    ZeroPrice,
    QuantityLimit,
    PriceLimit,
    MarketValueMismatch,
    InvalidTicker,
    BlacklistedTicker,
    DuplicateProduct,
    PriceServiceDown,
    Concentration,
    QuantityJump,
    PriceDroppedToZero,
}

impl RuleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCode::MalformedPosition => "MALFORMED_POSITION",
            RuleCode::MissingProductId => "MISSING_PRODUCT_ID",
            RuleCode::InvalidCurrency => "INVALID_CURRENCY",
            RuleCode::ZeroPrice => "ZERO_PRICE",
            RuleCode::QuantityLimit => "QUANTITY_LIMIT",
            RuleCode::PriceLimit => "PRICE_LIMIT",
            RuleCode::MarketValueMismatch => "MARKET_VALUE_MISMATCH",
            RuleCode::InvalidTicker => "INVALID_TICKER",
            RuleCode::BlacklistedTicker => "BLACKLISTED_TICKER",
            RuleCode::DuplicateProduct => "DUPLICATE_PRODUCT",
            RuleCode::PriceServiceDown => "PRICE_SERVICE_DOWN",
            RuleCode::Concentration => "CONCENTRATION",
            RuleCode::QuantityJump => "QUANTITY_JUMP",
            RuleCode::PriceDroppedToZero => "PRICE_DROPPED_TO_ZERO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub code: RuleCode,
    pub severity: Severity,
    pub product_id: Option<String>,
    pub message: String,
}

/// Outcome of validating one snapshot.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<RuleViolation>,
    pub warnings: Vec<RuleViolation>,
}

impl ValidationReport {
    pub fn has_code(&self, code: RuleCode) -> bool {
        self.errors.iter().any(|v| v.code == code)
            || self.warnings.iter().any(|v| v.code == code)
    }

    /// Whether the caller must abort: any error in strict mode, otherwise
    /// only a `PRICE_SERVICE_DOWN` trip.
    pub fn fatal(&self, strict: bool) -> bool {
        if strict && !self.errors.is_empty() {
            return true;
        }
        self.errors
            .iter()
            .any(|v| v.code == RuleCode::PriceServiceDown)
    }

    fn error(&mut self, code: RuleCode, product_id: Option<&str>, message: String) {
        self.errors.push(RuleViolation {
            code,
            severity: Severity::Error,
            product_id: product_id.map(str::to_string),
            message,
        });
    }

    fn warning(&mut self, code: RuleCode, product_id: Option<&str>, message: String) {
        self.warnings.push(RuleViolation {
            code,
            severity: Severity::Warning,
            product_id: product_id.map(str::to_string),
            message,
        });
    }
}

/// Validation result: the surviving normalized positions plus the report.
///
/// Positions that fail structural normalization are filtered out of
/// `positions`; rule violations keep the position in the set and the caller
/// decides whether to load it.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub positions: Vec<NormalizedPosition>,
    pub report: ValidationReport,
}

// ---------------------------------------------------------------------------
// Rule bundle
// ---------------------------------------------------------------------------

const TICKER_BLACKLIST: &[&str] = &["NULL", "N/A", "TEST", "DUMMY"];
const TICKER_MAX_LEN: usize = 20;
const MARKET_VALUE_TOLERANCE_PCT: i128 = 1;
const CONCENTRATION_PCT: i128 = 50;

/// Validate a snapshot, normalizing positions on the way.
///
/// `prior` is yesterday's accepted position set for the same account, used
/// by the day-over-day rules when present.
pub fn validate_snapshot(
    snapshot: &Snapshot,
    prior: Option<&[NormalizedPosition]>,
    cfg: &ValidationConfig,
) -> ValidationOutcome {
    let mut report = ValidationReport::default();
    let mut positions = Vec::with_capacity(snapshot.positions.len());

    for raw in &snapshot.positions {
        match normalize(raw) {
            Ok(p) => positions.push(p),
            Err(e) => {
                let code = if raw.product_id.trim().is_empty() {
                    RuleCode::MissingProductId
                } else {
                    RuleCode::MalformedPosition
                };
                report.error(code, Some(raw.product_id.trim()), e.to_string());
            }
        }
    }

    for p in &positions {
        check_position(p, cfg, &mut report);
    }

    check_duplicates(&positions, cfg, &mut report);
    check_zero_price_ratio(&positions, cfg, &mut report);
    check_concentration(&positions, &mut report);

    if let Some(prior) = prior {
        check_day_over_day(&positions, prior, cfg, &mut report);
    }

    ValidationOutcome { positions, report }
}

fn check_position(p: &NormalizedPosition, cfg: &ValidationConfig, report: &mut ValidationReport) {
    let pid = Some(p.product_id.as_str());

    if !is_valid_currency(&p.currency) {
        report.error(
            RuleCode::InvalidCurrency,
            pid,
            format!("currency must be a 3-letter code, got '{}'", p.currency),
        );
    }

    if p.price_micros <= 0 {
        report.error(
            RuleCode::ZeroPrice,
            pid,
            "price must be present and strictly positive".to_string(),
        );
    }

    if p.quantity_micros.unsigned_abs() > cfg.max_abs_quantity_micros.unsigned_abs() {
        report.warning(
            RuleCode::QuantityLimit,
            pid,
            format!("quantity magnitude {} exceeds cap", p.quantity_micros),
        );
    }

    if p.price_micros > cfg.max_price_micros {
        report.warning(
            RuleCode::PriceLimit,
            pid,
            format!("price {} exceeds cap", p.price_micros),
        );
    }

    if let Some(provided) = p.provided_market_value_micros {
        let computed = crate::normalizer::mul_micros(p.quantity_micros, p.price_micros)
            .unwrap_or(i64::MAX);
        if !within_tolerance(provided, computed) {
            report.error(
                RuleCode::MarketValueMismatch,
                pid,
                format!(
                    "market value {provided} differs from quantity × price {computed} \
                     by more than {MARKET_VALUE_TOLERANCE_PCT}%"
                ),
            );
        }
    }

    if let Some(ticker) = p.ticker.as_deref() {
        if TICKER_BLACKLIST.contains(&ticker) {
            report.error(
                RuleCode::BlacklistedTicker,
                pid,
                format!("ticker '{ticker}' is blacklisted"),
            );
        } else if !is_valid_ticker(ticker) {
            report.error(
                RuleCode::InvalidTicker,
                pid,
                format!("ticker '{ticker}' fails charset/length check"),
            );
        }
    }
}

fn check_duplicates(
    positions: &[NormalizedPosition],
    cfg: &ValidationConfig,
    report: &mut ValidationReport,
) {
    let mut seen: HashMap<(&str, &str), u32> = HashMap::new();
    for p in positions {
        *seen
            .entry((p.product_id.as_str(), p.position_type.as_str()))
            .or_insert(0) += 1;
    }
    for ((product, ptype), count) in seen {
        if count > 1 {
            let msg = format!("product '{product}' ({ptype}) appears {count} times in snapshot");
            if cfg.strict {
                report.error(RuleCode::DuplicateProduct, Some(product), msg);
            } else {
                report.warning(RuleCode::DuplicateProduct, Some(product), msg);
            }
        }
    }
}

fn check_zero_price_ratio(
    positions: &[NormalizedPosition],
    cfg: &ValidationConfig,
    report: &mut ValidationReport,
) {
    if positions.is_empty() {
        return;
    }
    let zero = positions.iter().filter(|p| p.price_micros <= 0).count();

    // zero/total > threshold/100, in integers
    if (zero as u64) * 100 > (positions.len() as u64) * cfg.zero_price_threshold_pct as u64 {
        report.error(
            RuleCode::PriceServiceDown,
            None,
            format!(
                "{zero} of {} positions priced at zero exceeds {}% threshold",
                positions.len(),
                cfg.zero_price_threshold_pct
            ),
        );
    }
}

fn check_concentration(positions: &[NormalizedPosition], report: &mut ValidationReport) {
    if positions.len() < 2 {
        return;
    }
    let total_abs: i128 = positions
        .iter()
        .map(|p| (p.market_value_micros as i128).abs())
        .sum();
    if total_abs == 0 {
        return;
    }
    for p in positions {
        let abs = (p.market_value_micros as i128).abs();
        if abs * 100 > total_abs * CONCENTRATION_PCT {
            report.warning(
                RuleCode::Concentration,
                Some(&p.product_id),
                format!(
                    "position contributes more than {CONCENTRATION_PCT}% of absolute exposure"
                ),
            );
        }
    }
}

fn check_day_over_day(
    positions: &[NormalizedPosition],
    prior: &[NormalizedPosition],
    cfg: &ValidationConfig,
    report: &mut ValidationReport,
) {
    let prior_by_key: HashMap<(&str, &str), &NormalizedPosition> = prior
        .iter()
        .map(|p| ((p.product_id.as_str(), p.position_type.as_str()), p))
        .collect();

    for p in positions {
        let Some(old) = prior_by_key.get(&(p.product_id.as_str(), p.position_type.as_str()))
        else {
            continue;
        };

        if old.price_micros > 0 && p.price_micros == 0 {
            report.error(
                RuleCode::PriceDroppedToZero,
                Some(&p.product_id),
                format!(
                    "price was {} yesterday and is zero today",
                    old.price_micros
                ),
            );
        }

        if old.quantity_micros != 0 {
            let diff = (p.quantity_micros as i128 - old.quantity_micros as i128).abs();
            let base = (old.quantity_micros as i128).abs();
            if diff * 100 > base * cfg.max_quantity_jump_pct as i128 {
                report.warning(
                    RuleCode::QuantityJump,
                    Some(&p.product_id),
                    format!(
                        "quantity moved from {} to {} (> {}%)",
                        old.quantity_micros, p.quantity_micros, cfg.max_quantity_jump_pct
                    ),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Field checks
// ---------------------------------------------------------------------------

fn is_valid_currency(c: &str) -> bool {
    c.len() == 3 && c.chars().all(|ch| ch.is_ascii_uppercase())
}

fn is_valid_ticker(t: &str) -> bool {
    !t.is_empty()
        && t.len() <= TICKER_MAX_LEN
        && t.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '/' | '-'))
}

fn within_tolerance(provided: i64, computed: i64) -> bool {
    let provided = provided as i128;
    let computed = computed as i128;
    if computed == 0 {
        return provided == 0;
    }
    (provided - computed).abs() * 100 <= computed.abs() * MARKET_VALUE_TOLERANCE_PCT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(product: &str, qty: i64, price: i64) -> NormalizedPosition {
        NormalizedPosition {
            product_id: product.to_string(),
            position_type: "SETTLED".to_string(),
            quantity_micros: qty,
            price_micros: price,
            currency: "USD".to_string(),
            market_value_micros: crate::normalizer::mul_micros(qty, price).unwrap(),
            provided_market_value_micros: None,
            ticker: None,
        }
    }

    #[test]
    fn currency_check_is_exactly_three_uppercase() {
        assert!(is_valid_currency("USD"));
        assert!(!is_valid_currency("usd"));
        assert!(!is_valid_currency("US"));
        assert!(!is_valid_currency("USDT"));
    }

    #[test]
    fn ticker_charset() {
        assert!(is_valid_ticker("BRK.B"));
        assert!(is_valid_ticker("RDS-A/X"));
        assert!(!is_valid_ticker("brk.b"));
        assert!(!is_valid_ticker(""));
        assert!(!is_valid_ticker(&"A".repeat(21)));
    }

    #[test]
    fn zero_price_ratio_trips_above_threshold_only() {
        let cfg = ValidationConfig::default();

        // 2 of 20 = 10% — not above the 10% threshold
        let mut positions: Vec<_> = (0..18).map(|i| pos(&format!("P{i}"), 1_000_000, 1_000_000)).collect();
        positions.push(pos("Z1", 1_000_000, 0));
        positions.push(pos("Z2", 1_000_000, 0));
        let mut report = ValidationReport::default();
        check_zero_price_ratio(&positions, &cfg, &mut report);
        assert!(!report.has_code(RuleCode::PriceServiceDown));

        // 4 of 20 = 20% — trips
        positions.pop();
        positions.pop();
        positions.truncate(16);
        for i in 0..4 {
            positions.push(pos(&format!("Z{i}"), 1_000_000, 0));
        }
        let mut report = ValidationReport::default();
        check_zero_price_ratio(&positions, &cfg, &mut report);
        assert!(report.has_code(RuleCode::PriceServiceDown));
    }

    #[test]
    fn price_service_down_is_fatal_even_when_lenient() {
        let mut report = ValidationReport::default();
        report.error(RuleCode::PriceServiceDown, None, "trip".to_string());
        assert!(report.fatal(false));
        assert!(report.fatal(true));

        let mut report = ValidationReport::default();
        report.error(RuleCode::ZeroPrice, Some("P1"), "zero".to_string());
        assert!(!report.fatal(false));
        assert!(report.fatal(true));
    }

    #[test]
    fn market_value_tolerance_is_one_percent() {
        assert!(within_tolerance(100_000_000, 100_000_000));
        assert!(within_tolerance(100_500_000, 100_000_000));
        assert!(!within_tolerance(102_000_000, 100_000_000));
        assert!(within_tolerance(0, 0));
        assert!(!within_tolerance(1, 0));
    }

    #[test]
    fn price_dropped_to_zero_detected() {
        let cfg = ValidationConfig::default();
        let today = vec![pos("P1", 1_000_000, 0)];
        let yesterday = vec![pos("P1", 1_000_000, 5_000_000)];
        let mut report = ValidationReport::default();
        check_day_over_day(&today, &yesterday, &cfg, &mut report);
        assert!(report.has_code(RuleCode::PriceDroppedToZero));
    }
}
