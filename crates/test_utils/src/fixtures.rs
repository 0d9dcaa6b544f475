//! Pre-built Test Fixtures
//!
//! Ready-to-use clinic billing data. Amounts and names are fixed so tests can
//! assert exact totals.

use chrono::{Days, NaiveDate, Utc};
use core_kernel::{Money, PatientId, VisitId};
use rust_decimal_macros::dec;

use domain_billing::{NewLineItem, PatientRef, PaymentMethod, PaymentRequest};

/// Fixture for patients
pub struct PatientFixtures;

impl PatientFixtures {
    /// An outpatient with a fresh ID
    pub fn outpatient() -> PatientRef {
        PatientRef::new(PatientId::new(), "Abena Owusu")
    }

    /// A patient billed for a specific visit
    pub fn with_visit() -> PatientRef {
        PatientRef::new(PatientId::new(), "Kwame Asante").with_visit(VisitId::new())
    }
}

/// Fixture for line items
pub struct LineItemFixtures;

impl LineItemFixtures {
    /// Consultation 100.00
    pub fn consultation() -> NewLineItem {
        NewLineItem::new("Consultation", Money::new(dec!(100.00)))
    }

    /// Lab test 50.00
    pub fn lab_test() -> NewLineItem {
        NewLineItem::new("Lab test", Money::new(dec!(50.00)))
    }

    /// X-ray 80.00
    pub fn x_ray() -> NewLineItem {
        NewLineItem::new("X-ray", Money::new(dec!(80.00)))
    }

    /// Two units of medication at 12.50
    pub fn medication() -> NewLineItem {
        NewLineItem::new("Amoxicillin 500mg", Money::new(dec!(12.50))).with_quantity(dec!(2))
    }

    /// Consultation, lab test and X-ray; total 230.00
    pub fn standard_visit() -> Vec<NewLineItem> {
        vec![Self::consultation(), Self::lab_test(), Self::x_ray()]
    }

    /// Items at the given prices, named by position
    pub fn priced(prices: &[Money]) -> Vec<NewLineItem> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| NewLineItem::new(format!("Service {}", i + 1), *price))
            .collect()
    }
}

/// Fixture for dates
pub struct DateFixtures;

impl DateFixtures {
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Thirty days from today
    pub fn due_in_30_days() -> NaiveDate {
        Self::today() + Days::new(30)
    }
}

/// Fixture for payment requests
pub struct PaymentFixtures;

impl PaymentFixtures {
    /// Cash payment at the front desk for the given items
    pub fn cash(bill_id: core_kernel::BillId, indexes: &[usize]) -> PaymentRequest {
        PaymentRequest::new(bill_id, PaymentMethod::Cash, "front-desk").with_indexes(indexes.iter().copied())
    }

    /// General payment of a fixed amount with no item selection
    pub fn general(bill_id: core_kernel::BillId, amount: Money) -> PaymentRequest {
        PaymentRequest::new(bill_id, PaymentMethod::Card, "front-desk").with_override(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_visit_total() {
        let total: Money = LineItemFixtures::standard_visit()
            .iter()
            .map(|item| item.total_price().unwrap())
            .sum();
        assert_eq!(total.amount(), dec!(230.00));
    }

    #[test]
    fn test_medication_quantity() {
        assert_eq!(LineItemFixtures::medication().total_price().unwrap().amount(), dec!(25.00));
    }
}
