//! Buyer-side shopping cart.
//!
//! The cart lives with the client and is only sent to the server as the
//! `products` array of a checkout request. Prices it carries are display
//! snapshots; the server re-prices every line against the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{dto::orders::OrderLineRequest, models::RentalUnit};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub unit: RentalUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    /// Price shown when the line was added, in paise.
    pub unit_price: i64,
    pub quantity: u32,
    pub rental: Option<RentalWindow>,
}

/// Identifies a line: the product plus, for rentals, the exact date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineKey {
    pub product_id: Uuid,
    pub rental: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl CartLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            product_id: self.product_id,
            rental: self.rental.as_ref().map(|r| (r.start, r.end)),
        }
    }

    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

/// Length of `[]`.
const EMPTY_PAYLOAD_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("storage cap of {max_bytes} bytes cannot hold a cart")]
    CapTooSmall { max_bytes: usize },

    #[error("cart serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of serializing the cart under a size cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub payload: String,
    /// Oldest lines dropped to fit the cap, in the order they were removed.
    pub evicted: Vec<CartLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add a line, merging quantities into an existing line with the same key.
    /// Lines with a zero quantity are ignored.
    pub fn add(&mut self, line: CartLine) {
        if line.quantity == 0 {
            return;
        }
        let key = line.key();
        match self.lines.iter_mut().find(|existing| existing.key() == key) {
            Some(existing) => {
                existing.quantity = existing.quantity.saturating_add(line.quantity);
            }
            None => self.lines.push(line),
        }
    }

    pub fn remove(&mut self, key: &LineKey) -> Option<CartLine> {
        let index = self.lines.iter().position(|line| line.key() == *key)?;
        Some(self.lines.remove(index))
    }

    /// Set a line's quantity; zero or less removes it. Returns false if no line matched.
    pub fn set_quantity(&mut self, key: &LineKey, quantity: i64) -> bool {
        if quantity <= 0 {
            return self.remove(key).is_some();
        }
        match self.lines.iter_mut().find(|line| line.key() == *key) {
            Some(line) => {
                line.quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn total(&self) -> i64 {
        self.lines
            .iter()
            .fold(0_i64, |sum, line| sum.saturating_add(line.line_total()))
    }

    /// Number of units across all lines.
    pub fn count(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Serialize for local storage, dropping the oldest lines until the
    /// payload fits in `max_bytes`. Dropped lines are returned so the caller
    /// can tell the buyer. Fails without touching the cart when the cap cannot
    /// even hold an empty cart.
    pub fn snapshot(&mut self, max_bytes: usize) -> Result<Snapshot, CartError> {
        if max_bytes < EMPTY_PAYLOAD_LEN {
            return Err(CartError::CapTooSmall { max_bytes });
        }

        let sizes = self
            .lines
            .iter()
            .map(|line| serde_json::to_string(line).map(|json| json.len()))
            .collect::<Result<Vec<_>, _>>()?;
        // Compact array: brackets plus one comma between elements.
        let mut len =
            EMPTY_PAYLOAD_LEN + sizes.iter().sum::<usize>() + sizes.len().saturating_sub(1);

        let mut drop_count = 0;
        while len > max_bytes && drop_count < sizes.len() {
            let remaining = sizes.len() - drop_count;
            len -= sizes[drop_count] + usize::from(remaining > 1);
            drop_count += 1;
        }

        let evicted: Vec<CartLine> = self.lines.drain(..drop_count).collect();
        let payload = serde_json::to_string(&self.lines)?;
        if !evicted.is_empty() {
            tracing::warn!(
                evicted = evicted.len(),
                kept = self.lines.len(),
                max_bytes,
                "cart exceeded storage cap; oldest lines dropped"
            );
        }
        Ok(Snapshot { payload, evicted })
    }

    pub fn restore(payload: &str) -> Result<Self, serde_json::Error> {
        let lines: Vec<CartLine> = serde_json::from_str(payload)?;
        let mut cart = Cart::new();
        for line in lines {
            cart.add(line);
        }
        Ok(cart)
    }

    /// Lines in the shape `POST /api/orders` expects.
    pub fn checkout_lines(&self) -> Vec<OrderLineRequest> {
        self.lines
            .iter()
            .map(|line| OrderLineRequest {
                product_id: Some(line.product_id.to_string()),
                quantity: Some(i64::from(line.quantity)),
                price: Some(line.unit_price),
                name: Some(line.name.clone()),
                rental_start: line.rental.as_ref().map(|r| r.start),
                rental_end: line.rental.as_ref().map(|r| r.end),
            })
            .collect()
    }
}
