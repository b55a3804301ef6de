//! Domain primitives that enforce validity at construction time.
//!
//! Persistence rows keep raw `Uuid`/`i32`/`BigDecimal` columns; these types
//! guard the service boundary so invalid values never reach a transaction.

use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("quantity must be positive")]
    NonPositiveQuantity,
    #[error("money amount cannot be negative")]
    NegativeAmount,
    #[error("money amount is not a valid decimal")]
    MalformedAmount,
    #[error("idempotency key must be 1..=255 characters")]
    InvalidIdempotencyKey,
    #[error("order must contain at least one item")]
    EmptyOrder,
    #[error("invalid {kind} id")]
    InvalidId { kind: &'static str },
}

macro_rules! uuid_id {
    ($name:ident, $kind:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(value: Uuid) -> Self {
                Self(value)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(value: &str) -> Result<Self, ValidationError> {
                Uuid::parse_str(value)
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidId { kind: $kind })
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(HoldId, "hold");
uuid_id!(OrderId, "order");
uuid_id!(EventId, "event");
uuid_id!(SessionId, "session");
uuid_id!(TicketTypeId, "ticket type");

/// Validated customer email. Stored and transmitted as its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        let (local, host) = value.split_once('@').ok_or(ValidationError::InvalidEmail)?;
        if local.is_empty()
            || host.is_empty()
            || host.contains('@')
            || value.chars().any(char::is_whitespace)
        {
            return Err(ValidationError::InvalidEmail);
        }
        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Strictly positive ticket count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Quantity(i32);

impl Quantity {
    pub fn new(value: i32) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::NonPositiveQuantity);
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Quantity {
    type Error = ValidationError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i32 {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Non-negative monetary amount. Serialized as a decimal string ("50.00").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Money(BigDecimal);

impl Money {
    pub fn new(amount: BigDecimal) -> Result<Self, ValidationError> {
        if amount < BigDecimal::zero() {
            return Err(ValidationError::NegativeAmount);
        }
        Ok(Self(amount))
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let amount =
            BigDecimal::from_str(value.trim()).map_err(|_| ValidationError::MalformedAmount)?;
        Self::new(amount)
    }

    pub fn zero() -> Self {
        Self(BigDecimal::zero())
    }

    pub fn amount(&self) -> &BigDecimal {
        &self.0
    }

    pub fn into_amount(self) -> BigDecimal {
        self.0
    }

    /// Line total for `quantity` units at this unit price.
    pub fn times(&self, quantity: Quantity) -> Money {
        Money(&self.0 * BigDecimal::from(quantity.get()))
    }

    pub fn plus(&self, other: &Money) -> Money {
        Money(&self.0 + &other.0)
    }
}

impl TryFrom<String> for Money {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Caller-supplied key collapsing retries of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        if value.is_empty() || value.len() > 255 {
            return Err(ValidationError::InvalidIdempotencyKey);
        }
        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
