//! Value objects for the order domain.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// Default street address used when the customer supplied none.
pub const DEFAULT_ADDRESS: &str = "Customer Address";
/// Default city.
pub const DEFAULT_CITY: &str = "City";
/// Default state.
pub const DEFAULT_STATE: &str = "State";
/// Default zip code.
pub const DEFAULT_ZIP_CODE: &str = "000000";
/// Default country.
pub const DEFAULT_COUNTRY: &str = "Country";
/// Default phone number.
pub const DEFAULT_PHONE: &str = "0000000000";

/// A line item in an order.
///
/// The unit price is a snapshot taken at checkout and never re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit at checkout time.
    pub unit_price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the line subtotal (quantity * unit price), or `None` if it
    /// does not fit in an `i64` of cents.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Delivery parameters supplied at checkout. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryParameters {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
}

impl DeliveryParameters {
    /// Fills every missing field with its default.
    pub fn resolve(self) -> ShippingAddress {
        fn or_default(value: Option<String>, default: &str) -> String {
            value
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        }

        ShippingAddress {
            address: or_default(self.address, DEFAULT_ADDRESS),
            city: or_default(self.city, DEFAULT_CITY),
            state: or_default(self.state, DEFAULT_STATE),
            zip_code: or_default(self.zip_code, DEFAULT_ZIP_CODE),
            country: or_default(self.country, DEFAULT_COUNTRY),
            phone: or_default(self.phone, DEFAULT_PHONE),
        }
    }
}

/// A fully resolved shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub phone: String,
}

impl Default for ShippingAddress {
    fn default() -> Self {
        DeliveryParameters::default().resolve()
    }
}

/// A saga step whose result event has an external side effect.
///
/// The order records each step once its result was applied, so a redelivered
/// result is recognized and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    Payment,
    InventoryReservation,
    Shipping,
    Refund,
}

impl SagaStep {
    /// Returns the step name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Payment => "PAYMENT",
            SagaStep::InventoryReservation => "INVENTORY_RESERVATION",
            SagaStep::Shipping => "SHIPPING",
            SagaStep::Refund => "REFUND",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Version of a stored order, used for optimistic concurrency control.
///
/// A freshly built order has version 0; the store assigns 1 on insert and
/// increments on every commit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of an order that was never stored.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
