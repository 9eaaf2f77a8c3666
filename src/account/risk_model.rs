//! Pure risk functions. No I/O, no state.
//!
//! | Health factor | Tier |
//! |---------------|------|
//! | >= 2.0 | Safe |
//! | [1.5, 2.0) | Moderate |
//! | [1.1, 1.5) | High |
//! | < 1.1 | Critical |

use serde::Serialize;
use std::fmt;

pub const SAFE_THRESHOLD: f64 = 2.0;
pub const MODERATE_THRESHOLD: f64 = 1.5;
pub const HIGH_THRESHOLD: f64 = 1.1;

/// Ordered from least to most risky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Safe,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Safe => write!(f, "safe"),
            RiskTier::Moderate => write!(f, "moderate"),
            RiskTier::High => write!(f, "high"),
            RiskTier::Critical => write!(f, "critical"),
        }
    }
}

/// `(supplied × lt) / borrowed`, `+∞` when nothing is borrowed.
pub fn health_factor(supplied_usd: f64, borrowed_usd: f64, liquidation_threshold: f64) -> f64 {
    if borrowed_usd <= 0.0 {
        return f64::INFINITY;
    }
    (supplied_usd * liquidation_threshold) / borrowed_usd
}

/// `borrowed / supplied`, 0 when nothing is supplied.
pub fn loan_to_value(supplied_usd: f64, borrowed_usd: f64) -> f64 {
    if supplied_usd <= 0.0 {
        return 0.0;
    }
    borrowed_usd / supplied_usd
}

pub fn risk_tier(health_factor: f64) -> RiskTier {
    if health_factor >= SAFE_THRESHOLD {
        RiskTier::Safe
    } else if health_factor >= MODERATE_THRESHOLD {
        RiskTier::Moderate
    } else if health_factor >= HIGH_THRESHOLD {
        RiskTier::High
    } else {
        // Includes NaN: an unreadable health factor is never reported as safe.
        RiskTier::Critical
    }
}

/// Collateral-weighted liquidation threshold of a set of `(supplied_usd, lt)` pairs.
pub fn weighted_liquidation_threshold(collateral: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let (weighted, total) = collateral
        .into_iter()
        .filter(|(supplied, _)| *supplied > 0.0)
        .fold((0.0, 0.0), |(w, t), (supplied, lt)| (w + supplied * lt, t + supplied));
    if total <= 0.0 {
        0.0
    } else {
        weighted / total
    }
}

/// Borrowing power of collateral: `supplied × cf`.
pub fn borrow_power(supplied_usd: f64, collateral_factor: f64) -> f64 {
    supplied_usd * collateral_factor
}

/// Percentage of `limit` in use.
///
/// A zero limit with debt is fully used; a zero limit without debt is unused.
pub fn borrow_limit_used_pct(borrowed_usd: f64, limit_usd: f64) -> f64 {
    if limit_usd <= 0.0 {
        return if borrowed_usd > 0.0 { 100.0 } else { 0.0 };
    }
    borrowed_usd / limit_usd * 100.0
}

/// Remaining borrowing capacity, never negative.
pub fn available_to_borrow(limit_usd: f64, borrowed_usd: f64) -> f64 {
    (limit_usd - borrowed_usd).max(0.0)
}

/// Which estimate the effective borrow limit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowLimitSource {
    /// Comptroller liquidity plus current debt
    Protocol,
    /// Sum of supplied value times collateral factor
    Computed,
    /// Account is underwater: limit pinned to current debt
    Shortfall,
}

/// Both borrow-limit estimates, kept side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BorrowLimitEstimate {
    /// Effective limit in USD
    pub limit_usd: f64,
    pub source: BorrowLimitSource,
    /// `liquidity + borrowed` as reported by the comptroller, if readable
    pub protocol_usd: Option<f64>,
    /// Collateral-factor-derived borrow power
    pub computed_usd: f64,
    /// `protocol - computed`, if both are known
    pub discrepancy_usd: Option<f64>,
    /// Comptroller shortfall, if readable
    pub shortfall_usd: Option<f64>,
}

impl BorrowLimitEstimate {
    /// `|protocol - computed|` relative to the larger of the two.
    pub fn relative_discrepancy(&self) -> Option<f64> {
        let protocol = self.protocol_usd?;
        let scale = protocol.abs().max(self.computed_usd.abs());
        if scale <= 0.0 {
            return Some(0.0);
        }
        Some((protocol - self.computed_usd).abs() / scale)
    }
}

/// Reconcile the protocol-reported and computed borrow limits.
///
/// - shortfall > 0: the limit is the current debt (100% used)
/// - otherwise: the larger of `liquidity + borrowed` and `computed_usd`
/// - no readable liquidity: `computed_usd`
///
/// `liquidity` is the comptroller's `(liquidity, shortfall)` in USD.
pub fn borrow_limit(
    borrowed_usd: f64,
    computed_usd: f64,
    liquidity: Option<(f64, f64)>,
) -> BorrowLimitEstimate {
    let Some((liquidity_usd, shortfall_usd)) = liquidity else {
        return BorrowLimitEstimate {
            limit_usd: computed_usd,
            source: BorrowLimitSource::Computed,
            protocol_usd: None,
            computed_usd,
            discrepancy_usd: None,
            shortfall_usd: None,
        };
    };

    let protocol_usd = liquidity_usd + borrowed_usd;
    let (limit_usd, source) = if shortfall_usd > 0.0 {
        (borrowed_usd, BorrowLimitSource::Shortfall)
    } else if protocol_usd >= computed_usd {
        (protocol_usd, BorrowLimitSource::Protocol)
    } else {
        (computed_usd, BorrowLimitSource::Computed)
    };

    BorrowLimitEstimate {
        limit_usd,
        source,
        protocol_usd: Some(protocol_usd),
        computed_usd,
        discrepancy_usd: Some(protocol_usd - computed_usd),
        shortfall_usd: Some(shortfall_usd),
    }
}
