use std::str::FromStr;

use common::config::TaxConfig;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::StoreError;
use crate::model::round_money;
use crate::storage::StoreStorage;

/// Resolves the tax rate for a checkout: an exact region match from the
/// `tax_rates` table, else the configured default rate.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxPolicy {
    pub default_rate: Decimal,
    pub default_region: String,
}

impl TaxPolicy {
    pub fn new(default_rate: Decimal, default_region: impl Into<String>) -> Self {
        Self {
            default_rate,
            default_region: default_region.into(),
        }
    }

    pub fn from_config(config: &TaxConfig) -> Result<Self, StoreError> {
        let default_rate = Decimal::from_str(config.default_rate.trim()).map_err(|e| {
            StoreError::Config(format!("tax.default_rate {:?}: {}", config.default_rate, e))
        })?;
        if default_rate.is_sign_negative() || default_rate >= Decimal::ONE {
            return Err(StoreError::Config(format!(
                "tax.default_rate must be in [0, 1), got {}",
                default_rate
            )));
        }
        Ok(Self::new(default_rate, config.default_region.clone()))
    }

    pub async fn resolve_rate(
        &self,
        storage: &dyn StoreStorage,
        region: Option<&str>,
    ) -> Result<Decimal, StoreError> {
        let region = region.unwrap_or(&self.default_region);
        match storage.find_tax_rate(region).await? {
            Some(rate) => {
                debug!(region, %rate, "Using regional tax rate");
                Ok(rate)
            }
            None => {
                debug!(region, rate = %self.default_rate, "No regional tax rate, using default");
                Ok(self.default_rate)
            }
        }
    }
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self::new(Decimal::new(8, 2), "default")
    }
}

pub fn compute_tax(total_price: Decimal, rate: Decimal) -> Decimal {
    round_money(total_price * rate)
}

/// Tax is derived exactly once: an existing non-zero amount is kept as is.
pub fn ensure_tax_amount(current: Option<Decimal>, total_price: Decimal, rate: Decimal) -> Decimal {
    match current {
        Some(amount) if !amount.is_zero() => amount,
        _ => compute_tax(total_price, rate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn computes_tax_on_total() {
        assert_eq!(compute_tax(dec("25.00"), dec("0.08")), dec("2.00"));
        assert_eq!(compute_tax(dec("10.10"), dec("0.005")), dec("0.05"));
    }

    #[test]
    fn existing_tax_is_never_recomputed() {
        assert_eq!(ensure_tax_amount(Some(dec("3.00")), dec("25.00"), dec("0.08")), dec("3.00"));
        assert_eq!(ensure_tax_amount(Some(Decimal::ZERO), dec("25.00"), dec("0.08")), dec("2.00"));
        assert_eq!(ensure_tax_amount(None, dec("25.00"), dec("0.08")), dec("2.00"));
    }

    #[test]
    fn policy_from_config_rejects_bad_rates() {
        let ok = TaxConfig {
            default_rate: "0.08".to_string(),
            default_region: "default".to_string(),
        };
        assert_eq!(TaxPolicy::from_config(&ok).unwrap().default_rate, dec("0.08"));

        let bad = TaxConfig {
            default_rate: "eight".to_string(),
            default_region: "default".to_string(),
        };
        assert!(TaxPolicy::from_config(&bad).is_err());

        let too_big = TaxConfig {
            default_rate: "1.5".to_string(),
            default_region: "default".to_string(),
        };
        assert!(TaxPolicy::from_config(&too_big).is_err());
    }
}
