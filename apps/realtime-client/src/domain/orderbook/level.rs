//! Price Level Types
//!
//! Level records stored by the book sides. Each variant deserializes from the
//! JSON array form venues use on the wire, `[price, size, ...extra]`, with
//! numbers or numeric strings accepted for every numeric field.

use std::fmt::Debug;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Common view of a stored level.
pub trait BookLevel: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Level price.
    fn price(&self) -> Decimal;

    /// Aggregated size at the price.
    fn size(&self) -> Decimal;

    /// Whether storing this level removes it from the side instead.
    fn is_deletion(&self) -> bool {
        self.size().is_zero()
    }
}

/// Error converting a wire array into a level.
#[derive(Debug, thiserror::Error)]
pub enum LevelError {
    /// Fewer elements than the variant needs.
    #[error("level needs at least {expected} elements, got {actual}")]
    TooShort {
        /// Required element count.
        expected: usize,
        /// Received element count.
        actual: usize,
    },

    /// An element could not be read as a decimal.
    #[error("level element {index} is not numeric: {value}")]
    NotNumeric {
        /// Position in the array.
        index: usize,
        /// Offending value.
        value: String,
    },

    /// Order identifier missing or not a string/number.
    #[error("level element {0} is not a valid order id")]
    InvalidId(usize),
}

fn require(raw: &[Value], expected: usize) -> Result<(), LevelError> {
    if raw.len() < expected {
        return Err(LevelError::TooShort {
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

fn decimal_at(raw: &[Value], index: usize) -> Result<Decimal, LevelError> {
    let not_numeric = || LevelError::NotNumeric {
        index,
        value: raw[index].to_string(),
    };
    let text = match &raw[index] {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        _ => return Err(not_numeric()),
    };
    // serde_json renders small floats in exponent form (1e-7)
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| not_numeric())
}

// =============================================================================
// Plain
// =============================================================================

/// `[price, size]` level. Extra elements on the wire are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregated size.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl BookLevel for PriceLevel {
    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }
}

impl TryFrom<Vec<Value>> for PriceLevel {
    type Error = LevelError;

    fn try_from(raw: Vec<Value>) -> Result<Self, Self::Error> {
        require(&raw, 2)?;
        Ok(Self::new(decimal_at(&raw, 0)?, decimal_at(&raw, 1)?))
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.size)
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        Self::new(price, size)
    }
}

// =============================================================================
// Counted
// =============================================================================

/// `[price, size, count]` level where `count` is the number of resting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "(Decimal, Decimal, u64)")]
pub struct CountedLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregated size.
    pub size: Decimal,
    /// Number of orders at the price.
    pub count: u64,
}

impl CountedLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal, count: u64) -> Self {
        Self { price, size, count }
    }
}

impl BookLevel for CountedLevel {
    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    /// A level whose order count reaches zero is gone whatever its size says.
    fn is_deletion(&self) -> bool {
        self.count == 0 || self.size.is_zero()
    }
}

impl TryFrom<Vec<Value>> for CountedLevel {
    type Error = LevelError;

    fn try_from(raw: Vec<Value>) -> Result<Self, Self::Error> {
        require(&raw, 3)?;
        let count = decimal_at(&raw, 2)?;
        let count = u64::try_from(count).map_err(|_| LevelError::NotNumeric {
            index: 2,
            value: count.to_string(),
        })?;
        Ok(Self::new(decimal_at(&raw, 0)?, decimal_at(&raw, 1)?, count))
    }
}

impl From<CountedLevel> for (Decimal, Decimal, u64) {
    fn from(level: CountedLevel) -> Self {
        (level.price, level.size, level.count)
    }
}

// =============================================================================
// Indexed
// =============================================================================

/// `[price, size, id]` level keyed by venue order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Value>", into = "(Decimal, Decimal, String)")]
pub struct IndexedLevel {
    /// Order price.
    pub price: Decimal,
    /// Order size.
    pub size: Decimal,
    /// Venue order identifier.
    pub id: String,
}

impl IndexedLevel {
    /// Create a level.
    #[must_use]
    pub fn new(price: Decimal, size: Decimal, id: impl Into<String>) -> Self {
        Self {
            price,
            size,
            id: id.into(),
        }
    }
}

impl BookLevel for IndexedLevel {
    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }
}

impl TryFrom<Vec<Value>> for IndexedLevel {
    type Error = LevelError;

    fn try_from(raw: Vec<Value>) -> Result<Self, Self::Error> {
        require(&raw, 3)?;
        let id = match &raw[2] {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return Err(LevelError::InvalidId(2)),
        };
        Ok(Self::new(decimal_at(&raw, 0)?, decimal_at(&raw, 1)?, id))
    }
}

impl From<IndexedLevel> for (Decimal, Decimal, String) {
    fn from(level: IndexedLevel) -> Self {
        (level.price, level.size, level.id)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    #[test_case(r#"[100, 1]"#, dec!(100), dec!(1) ; "numbers")]
    #[test_case(r#"["100.5", "0.25"]"#, dec!(100.5), dec!(0.25) ; "strings")]
    #[test_case(r#"[100, 1, 7, "extra"]"#, dec!(100), dec!(1) ; "extra elements ignored")]
    fn plain_level_from_wire(json: &str, price: Decimal, size: Decimal) {
        let level: PriceLevel = serde_json::from_str(json).unwrap();
        assert_eq!(level, PriceLevel::new(price, size));
    }

    #[test]
    fn plain_level_too_short() {
        let result: Result<PriceLevel, _> = serde_json::from_str("[100]");
        assert!(result.is_err());
    }

    #[test]
    fn plain_level_rejects_non_numeric() {
        let result: Result<PriceLevel, _> = serde_json::from_str(r#"["abc", 1]"#);
        assert!(result.is_err());
    }

    #[test]
    fn counted_level_deletion_by_count() {
        let level: CountedLevel = serde_json::from_str(r#"["10", "3", 0]"#).unwrap();
        assert_eq!(level.count, 0);
        assert!(level.is_deletion());

        let alive = CountedLevel::new(dec!(10), dec!(3), 2);
        assert!(!alive.is_deletion());
    }

    #[test]
    fn indexed_level_accepts_numeric_id() {
        let level: IndexedLevel = serde_json::from_str(r#"[10, 2, 12345]"#).unwrap();
        assert_eq!(level.id, "12345");
    }

    #[test]
    fn plain_level_serializes_as_pair() {
        let json = serde_json::to_value(PriceLevel::new(dec!(1.5), dec!(2))).unwrap();
        assert!(json.is_array());
        assert_eq!(json.as_array().unwrap().len(), 2);
    }
}
