use alloy::primitives::U256;
use serde::Serialize;

/// One oracle reading for a market's underlying asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceEntry {
    /// Market symbol the price was read for
    pub symbol: String,
    /// USD price, 1e18 mantissa
    pub price: U256,
    /// Last feed update (unix seconds), if metadata was readable
    pub updated_at: Option<u64>,
    /// Freshness flag from the oracle metadata (`true` = stale)
    pub is_stale: Option<bool>,
    /// Feed health flag
    pub is_healthy: Option<bool>,
    pub health_reason: Option<String>,
    /// Whether the oracle is serving an admin-set emergency price
    pub emergency_override: bool,
    pub emergency_price: Option<U256>,
}

impl PriceEntry {
    /// Whether the admin-set emergency price replaces the feed price.
    pub fn uses_emergency_price(&self) -> bool {
        self.emergency_override && self.emergency_price.is_some_and(|p| !p.is_zero())
    }

    /// The price the protocol is actually using.
    pub fn effective_price(&self) -> U256 {
        match self.emergency_price {
            Some(p) if self.uses_emergency_price() => p,
            _ => self.price,
        }
    }

    /// Whether this reading may be used for risk calculations.
    ///
    /// A zero price, a stale feed or an unhealthy feed is never
    /// authoritative. With `require_health_check`, an unknown health
    /// flag is treated as unhealthy.
    pub fn is_authoritative(&self, require_health_check: bool) -> bool {
        if self.effective_price().is_zero() {
            return false;
        }
        if self.is_stale == Some(true) {
            return false;
        }
        match self.is_healthy {
            Some(healthy) => healthy,
            None => !require_health_check,
        }
    }

    /// Why this reading is not authoritative, for display.
    pub fn rejection_reason(&self, require_health_check: bool) -> Option<String> {
        if self.effective_price().is_zero() {
            return Some("oracle price not set".to_string());
        }
        if self.is_stale == Some(true) {
            return Some("oracle price is stale".to_string());
        }
        match self.is_healthy {
            Some(false) => Some(format!(
                "price feed unhealthy: {}",
                self.health_reason.as_deref().unwrap_or("no reason given")
            )),
            None if require_health_check => Some("price feed health unknown".to_string()),
            _ => None,
        }
    }
}

/// How a market's USD price was resolved.
///
/// Fallback use is always visible to consumers; `Unknown` means USD
/// values for the market cannot be computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceResolution {
    Live { price_usd: f64, emergency: bool },
    Fallback { price_usd: f64, reason: String },
    Unknown { reason: String },
}

impl PriceResolution {
    pub fn usd(&self) -> Option<f64> {
        match self {
            PriceResolution::Live { price_usd, .. } | PriceResolution::Fallback { price_usd, .. } => {
                Some(*price_usd)
            }
            PriceResolution::Unknown { .. } => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PriceResolution::Fallback { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PriceResolution::Unknown { .. })
    }
}
