use serde::{Deserialize, Serialize};

/// Source price at which the resale factor switches from 0.5 to 0.6.
pub const HIGH_VALUE_THRESHOLD: f64 = 250.0;

const STANDARD_FACTOR: f64 = 0.5;
const HIGH_VALUE_FACTOR: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResaleQuote {
    pub source_price: f64,
    pub resale_price: f64,
    pub discount_percent: f64,
}

impl ResaleQuote {
    pub fn savings(&self) -> f64 {
        round_two(self.source_price - self.resale_price)
    }
}

/// Price an item for resale. Items under 250 go out at half the source
/// price; at 250 and above the factor softens to 0.6. Callers validate that
/// the source price is positive before quoting.
pub fn quote(source_price: f64) -> ResaleQuote {
    let factor = if source_price < HIGH_VALUE_THRESHOLD {
        STANDARD_FACTOR
    } else {
        HIGH_VALUE_FACTOR
    };
    let resale_price = round_two(source_price * factor);
    let discount_percent = round_one((1.0 - resale_price / source_price) * 100.0);
    ResaleQuote {
        source_price,
        resale_price,
        discount_percent,
    }
}

// Bankers' rounding, matching how the stored records were produced.
pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

pub fn round_one(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}
