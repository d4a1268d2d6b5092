//! Time & schema primitives: IANA timezone arithmetic, product/hour validation,
//! and sample-column naming shared by the store and the engine.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const FORECAST_HORIZON_HOURS: i64 = 72;
pub const PROBABILISTIC_SAMPLE_COUNT: usize = 100;
pub const SCHEDULE_TIMEZONE: Tz = chrono_tz::America::Chicago;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "PascalCase")]
pub enum Product {
    #[serde(rename = "DALMP")]
    Dalmp,
    #[serde(rename = "RTLMP")]
    Rtlmp,
    RegUp,
    RegDown,
    Rrs,
    Nsrs,
}

/// Fixed dispatch order used when writing a cycle's artifacts, so index
/// entries appear in a deterministic sequence regardless of fan-out order.
pub const ALL_PRODUCTS: [Product; 6] = [
    Product::Dalmp,
    Product::Rtlmp,
    Product::RegUp,
    Product::RegDown,
    Product::Rrs,
    Product::Nsrs,
];

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Dalmp => "DALMP",
            Product::Rtlmp => "RTLMP",
            Product::RegUp => "RegUp",
            Product::RegDown => "RegDown",
            Product::Rrs => "RRS",
            Product::Nsrs => "NSRS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_PRODUCTS.iter().copied().find(|p| p.as_str() == s)
    }

    /// Energy products may be negative; ancillary products must be >= 0.
    pub fn is_ancillary(&self) -> bool {
        !matches!(self, Product::Dalmp | Product::Rtlmp)
    }

    pub fn uncertainty_adjustment_factor(&self) -> f64 {
        match self {
            Product::Dalmp => 1.0,
            Product::Rtlmp => 1.2,
            Product::RegUp => 0.8,
            Product::RegDown => 0.8,
            Product::Rrs => 0.7,
            Product::Nsrs => 0.7,
        }
    }

    pub fn fixed_uncertainty_stddev(&self) -> f64 {
        match self {
            Product::Dalmp => 5.0,
            Product::Rtlmp => 8.0,
            Product::RegUp => 3.0,
            Product::RegDown => 3.0,
            Product::Rrs => 2.5,
            Product::Nsrs => 2.0,
        }
    }

    pub fn cold_start_default_price(&self) -> f64 {
        match self {
            Product::Dalmp => 30.0,
            Product::Rtlmp => 35.0,
            Product::RegUp => 10.0,
            Product::RegDown => 7.0,
            Product::Rrs => 8.0,
            Product::Nsrs => 5.0,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    #[error("invalid product {0:?}: must be one of {ALL_PRODUCTS:?}")]
    InvalidProduct(String),
    #[error("invalid hour {0}: must be in [0, 23]")]
    InvalidHour(i64),
}

/// Validates an hour-of-day, returning a precise error rather than panicking.
pub fn validate_hour(hour: i64) -> Result<u8, TimeError> {
    if (0..=23).contains(&hour) {
        Ok(hour as u8)
    } else {
        Err(TimeError::InvalidHour(hour))
    }
}

pub fn validate_product(product: &str) -> Result<Product, TimeError> {
    Product::parse(product).ok_or_else(|| TimeError::InvalidProduct(product.to_string()))
}

/// Zero-padded sample column names: `sample_001 .. sample_NNN`.
pub fn sample_column_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sample_{:03}", i)).collect()
}

/// Current wall-clock time in the given IANA zone.
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    tz.from_utc_datetime(&chrono::Utc::now().naive_utc())
}

/// Attaches a zone to a naive timestamp, resolving ambiguous/DST-gap times
/// by preferring the earlier valid instant (`LocalResult::single` falls back
/// to `earliest`), matching how a cron-style scheduler treats a nominal
/// wall-clock time that does not exist or occurs twice.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _latest) => earliest,
        chrono::LocalResult::None => {
            // Spring-forward gap: nudge forward an hour and retry once.
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .single()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_round_trips_through_str() {
        for p in ALL_PRODUCTS {
            assert_eq!(Product::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn unknown_product_rejected() {
        assert!(validate_product("XYZ").is_err());
    }

    #[test]
    fn hour_bounds() {
        assert!(validate_hour(0).is_ok());
        assert!(validate_hour(23).is_ok());
        assert!(validate_hour(24).is_err());
        assert!(validate_hour(-1).is_err());
    }

    #[test]
    fn sample_columns_are_zero_padded() {
        let cols = sample_column_names(3);
        assert_eq!(cols, vec!["sample_001", "sample_002", "sample_003"]);
    }

    #[test]
    fn ancillary_classification() {
        assert!(!Product::Dalmp.is_ancillary());
        assert!(!Product::Rtlmp.is_ancillary());
        assert!(Product::RegUp.is_ancillary());
        assert!(Product::Nsrs.is_ancillary());
    }
}
