//! Billing configuration

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Tunables for bill creation and payment recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Require an override amount to equal the selected items' total
    pub strict_amount_mode: bool,
    /// Days between bill date and due date when no due date is given
    pub default_due_days: u32,
    /// Prefix of human-readable bill numbers
    pub bill_number_prefix: String,
    /// Prefix of human-readable receipt numbers
    pub receipt_number_prefix: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            strict_amount_mode: false,
            default_due_days: 30,
            bill_number_prefix: "BILL".to_string(),
            receipt_number_prefix: "RCT".to_string(),
        }
    }
}

impl BillingConfig {
    /// Default configuration with strict override checking turned on
    pub fn strict() -> Self {
        Self {
            strict_amount_mode: true,
            ..Self::default()
        }
    }

    /// Due date used when the caller does not supply one
    pub fn default_due_date(&self, bill_date: NaiveDate) -> NaiveDate {
        bill_date
            .checked_add_days(Days::new(u64::from(self.default_due_days)))
            .unwrap_or(bill_date)
    }

    /// Checks the configuration is usable
    pub fn validate(&self) -> Result<(), BillingError> {
        for (field, prefix) in [
            ("bill_number_prefix", &self.bill_number_prefix),
            ("receipt_number_prefix", &self.receipt_number_prefix),
        ] {
            if prefix.trim().is_empty() {
                return Err(BillingError::validation(format!("{} must not be empty", field)));
            }
        }
        if self.bill_number_prefix == self.receipt_number_prefix {
            return Err(BillingError::validation(
                "bill and receipt number prefixes must differ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_due_date() {
        let config = BillingConfig::default();
        let bill_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            config.default_due_date(bill_date),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_blank_and_clashing_prefixes() {
        let blank = BillingConfig {
            bill_number_prefix: " ".to_string(),
            ..BillingConfig::default()
        };
        assert!(blank.validate().is_err());

        let clash = BillingConfig {
            receipt_number_prefix: "BILL".to_string(),
            ..BillingConfig::default()
        };
        assert!(clash.validate().is_err());

        assert!(BillingConfig::strict().validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: BillingConfig = serde_json::from_str(r#"{"strict_amount_mode": true}"#).unwrap();
        assert!(config.strict_amount_mode);
        assert_eq!(config.default_due_days, 30);
    }
}
