use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Order, OrderItem, ShippingInfo},
};

pub const MAX_ORDER_LINES: usize = 100;

/// Body of `POST /api/orders` as sent by the browser.
///
/// Every field is optional at the serde level so that a missing field is
/// reported by name instead of as a generic decode failure. Call
/// [`PlaceOrderRequest::validate`] to obtain a [`PlaceOrderCommand`].
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub products: Option<Vec<OrderLineRequest>>,
    pub shipping_info: Option<ShippingInfoPayload>,
    pub payment_method: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub payment_info: Option<serde_json::Value>,
    /// Ignored beyond a consistency log line; the server computes the total.
    pub total_amount: Option<i64>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    #[serde(alias = "product")]
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
    /// Client-side price snapshot. Never used for billing.
    pub price: Option<i64>,
    pub name: Option<String>,
    pub rental_start: Option<DateTime<Utc>>,
    pub rental_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfoPayload {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(alias = "zipCode", alias = "pincode")]
    pub postal_code: Option<String>,
}

/// Fully validated checkout input.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderCommand {
    pub lines: Vec<OrderLine>,
    pub shipping: ShippingInfo,
    pub payment_method: String,
    pub payment_info: Option<serde_json::Value>,
    pub client_total: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub rental: Option<RentalPeriod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentalPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PlaceOrderRequest {
    /// Line items are checked before the shipping address, then the payment method.
    pub fn validate(self) -> AppResult<PlaceOrderCommand> {
        let lines = validate_lines(self.products)?;
        let shipping = self
            .shipping_info
            .ok_or_else(|| AppError::invalid("shippingInfo", "is required"))?
            .validate()?;
        let payment_method = required_text("paymentMethod", self.payment_method)?.to_lowercase();

        Ok(PlaceOrderCommand {
            lines,
            shipping,
            payment_method,
            payment_info: self.payment_info,
            client_total: self.total_amount,
        })
    }
}

fn validate_lines(products: Option<Vec<OrderLineRequest>>) -> AppResult<Vec<OrderLine>> {
    let products = products.unwrap_or_default();
    if products.is_empty() {
        return Err(AppError::invalid(
            "products",
            "at least one line item is required",
        ));
    }
    if products.len() > MAX_ORDER_LINES {
        return Err(AppError::invalid(
            "products",
            format!("at most {MAX_ORDER_LINES} line items are allowed"),
        ));
    }

    products
        .into_iter()
        .enumerate()
        .map(|(index, line)| line.validate(index))
        .collect()
}

impl OrderLineRequest {
    fn validate(self, index: usize) -> AppResult<OrderLine> {
        let field = |name: &str| format!("products[{index}].{name}");

        let raw_id = self
            .product_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid(field("productId"), "is required"))?;
        let product_id = Uuid::parse_str(raw_id)
            .map_err(|_| AppError::invalid(field("productId"), "is not a valid identifier"))?;

        let quantity = self
            .quantity
            .ok_or_else(|| AppError::invalid(field("quantity"), "is required"))?;
        let quantity = i32::try_from(quantity)
            .ok()
            .filter(|q| *q >= 1)
            .ok_or_else(|| {
                AppError::invalid(field("quantity"), "must be a whole number of at least 1")
            })?;

        let rental = match (self.rental_start, self.rental_end) {
            (None, None) => None,
            (Some(start), Some(end)) if end > start => Some(RentalPeriod { start, end }),
            (Some(_), Some(_)) => {
                return Err(AppError::invalid(
                    field("rentalEnd"),
                    "must be after rentalStart",
                ));
            }
            (None, Some(_)) => {
                return Err(AppError::invalid(field("rentalStart"), "is required"));
            }
            (Some(_), None) => {
                return Err(AppError::invalid(field("rentalEnd"), "is required"));
            }
        };

        Ok(OrderLine {
            product_id,
            quantity,
            rental,
        })
    }
}

impl ShippingInfoPayload {
    fn validate(self) -> AppResult<ShippingInfo> {
        let info = ShippingInfo {
            full_name: required_text("fullName", self.full_name)?,
            email: required_text("email", self.email)?,
            phone: required_text("phone", self.phone)?,
            address: required_text("address", self.address)?,
            city: required_text("city", self.city)?,
            state: required_text("state", self.state)?,
            postal_code: required_text("postalCode", self.postal_code)?,
        };

        if !looks_like_email(&info.email) {
            return Err(AppError::invalid("email", "is not a valid email address"));
        }
        let digits = info.phone.chars().filter(char::is_ascii_digit).count();
        let phone_chars_ok = info
            .phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
        if !phone_chars_ok || !(7..=15).contains(&digits) {
            return Err(AppError::invalid("phone", "is not a valid phone number"));
        }
        if !info.postal_code.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
            return Err(AppError::invalid("postalCode", "is not a valid postal code"));
        }

        Ok(info)
    }
}

fn required_text(field: &str, value: Option<String>) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::invalid(field, "is required"))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
