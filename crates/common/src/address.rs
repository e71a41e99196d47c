//! Postal addresses attached to orders.

use serde::{Deserialize, Serialize};

/// A shipping or billing address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

impl Address {
    /// Creates a minimal address with the required fields.
    pub fn new(
        line1: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            line1: line1.into(),
            line2: None,
            city: city.into(),
            state: None,
            postal_code: None,
            country: country.into(),
        }
    }
}
