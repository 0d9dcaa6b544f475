//! Line item ingress
//!
//! Charges reach the billing core from several collaborators: the intake
//! desk, the service catalog, and visit or lab-request records. They do not
//! agree on field names (`serviceName`, `service_name`, `name`, ...), so this
//! module accepts the variants and turns them into one [`NewLineItem`] shape.
//! Nothing past this boundary knows about the aliases.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{Money, ServiceId};
use crate::bill::NewLineItem;
use crate::error::BillingError;

/// A line item as submitted by an upstream form or service
///
/// Serializes under the canonical field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItemInput {
    #[serde(alias = "serviceName", alias = "service_name", alias = "description")]
    pub name: String,
    #[serde(default, alias = "qty")]
    pub quantity: Option<Decimal>,
    #[serde(alias = "unitPrice", alias = "price")]
    pub unit_price: Decimal,
    #[serde(default, alias = "serviceId")]
    pub service_id: Option<ServiceId>,
}

impl TryFrom<LineItemInput> for NewLineItem {
    type Error = BillingError;

    fn try_from(input: LineItemInput) -> Result<Self, Self::Error> {
        let item = NewLineItem {
            name: input.name.trim().to_string(),
            quantity: input.quantity.unwrap_or(Decimal::ONE),
            unit_price: Money::new(input.unit_price),
            service_id: input.service_id,
        };
        item.validate()?;
        Ok(item)
    }
}

/// Normalizes a batch of submitted items, failing on the first bad one
pub fn normalize_items(inputs: Vec<LineItemInput>) -> Result<Vec<NewLineItem>, BillingError> {
    inputs.into_iter().map(NewLineItem::try_from).collect()
}

/// An entry from the clinic's service/price catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogService {
    pub service_id: ServiceId,
    pub name: String,
    pub price: Money,
}

impl CatalogService {
    /// Builds a line item billing `quantity` units of this service
    pub fn to_line_item(&self, quantity: Decimal) -> NewLineItem {
        NewLineItem::new(self.name.clone(), self.price)
            .with_quantity(quantity)
            .with_service(self.service_id)
    }
}

/// An opaque `(name, quantity, unit price)` charge seeded from a visit or lab request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCharge(pub String, pub Decimal, pub Money);

impl From<SourceCharge> for NewLineItem {
    fn from(SourceCharge(name, quantity, unit_price): SourceCharge) -> Self {
        NewLineItem::new(name, unit_price).with_quantity(quantity)
    }
}
