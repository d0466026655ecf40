use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Unavailable,
    OutOfStock,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Unavailable => "unavailable",
            AvailabilityStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl FromStr for AvailabilityStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(AvailabilityStatus::Available),
            "unavailable" => Ok(AvailabilityStatus::Unavailable),
            "out_of_stock" => Ok(AvailabilityStatus::OutOfStock),
            other => Err(UnknownVariant::new("availability status", other)),
        }
    }
}

/// Lifecycle of a placed order.
///
/// ```text
/// Processing -> Confirmed -> Shipped -> Delivered
///      |            |
///      +------------+------> Cancelled
/// ```
///
/// `Delivered` and `Cancelled` are terminal. Moving to the current status is
/// not a transition and is rejected like any other illegal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    Processing,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Processing,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Processing => "Processing",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (*self, next),
            (Processing, Confirmed)
                | (Confirmed, Shipped)
                | (Shipped, Delivered)
                | (Processing, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    /// Accepts the canonical spelling case-insensitively ("shipped", "SHIPPED").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVariant::new("order status", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    /// Payment is simulated: cash on delivery stays pending, anything else
    /// is treated as settled at checkout.
    pub fn for_method(method: &str) -> Self {
        if method.eq_ignore_ascii_case("cod") {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Completed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RentalUnit {
    Hour,
    Day,
    Week,
    Month,
}

impl RentalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalUnit::Hour => "hour",
            RentalUnit::Day => "day",
            RentalUnit::Week => "week",
            RentalUnit::Month => "month",
        }
    }

    pub fn length(&self) -> Duration {
        match self {
            RentalUnit::Hour => Duration::hours(1),
            RentalUnit::Day => Duration::days(1),
            RentalUnit::Week => Duration::weeks(1),
            RentalUnit::Month => Duration::days(30),
        }
    }

    /// Billable units covering `start..end`, rounded up. `None` unless `end > start`.
    pub fn units_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<i64> {
        let span = (end - start).num_seconds();
        if span <= 0 {
            return None;
        }
        let unit = self.length().num_seconds();
        Some((span + unit - 1) / unit)
    }
}

impl FromStr for RentalUnit {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(RentalUnit::Hour),
            "day" => Ok(RentalUnit::Day),
            "week" => Ok(RentalUnit::Week),
            "month" => Ok(RentalUnit::Month),
            other => Err(UnknownVariant::new("rental unit", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub sellable: bool,
    pub rentable: bool,
    pub sale_price: Option<i64>,
    pub rental_price: Option<i64>,
    pub rental_unit: Option<RentalUnit>,
    pub rental_available_from: Option<DateTime<Utc>>,
    pub rental_available_until: Option<DateTime<Utc>>,
    pub quantity: i32,
    pub availability_status: AvailabilityStatus,
    pub shipping_eligible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shipping address snapshot stored with the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfo {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: i64,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    #[schema(value_type = Option<Object>)]
    pub payment_info: Option<serde_json::Value>,
    pub shipping_info: ShippingInfo,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
    pub rental_start: Option<DateTime<Utc>>,
    pub rental_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
