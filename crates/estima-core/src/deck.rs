//! Card decks and the values a participant can play.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::SessionError;

/// The "unsure" card. Counts toward mode and consensus, never toward the average.
pub const UNSURE: &str = "?";

const FIBONACCI: &[&str] = &["0", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89", UNSURE];
const MODIFIED_FIBONACCI: &[&str] = &["0", "0.5", "1", "2", "3", "5", "8", "13", "20", "40", "100", UNSURE];
const TSHIRT: &[&str] = &["XS", "S", "M", "L", "XL", "XXL", UNSURE];

/// The enumerated set of decks a session can play with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeckKind {
    Fibonacci,
    ModifiedFibonacci,
    Tshirt,
}

impl DeckKind {
    pub const ALL: [DeckKind; 3] = [Self::Fibonacci, Self::ModifiedFibonacci, Self::Tshirt];

    /// Wire name of the deck.
    pub fn name(self) -> &'static str {
        match self {
            Self::Fibonacci => "fibonacci",
            Self::ModifiedFibonacci => "modifiedFibonacci",
            Self::Tshirt => "tshirt",
        }
    }

    /// Ordered card values of the deck.
    pub fn values(self) -> &'static [&'static str] {
        match self {
            Self::Fibonacci => FIBONACCI,
            Self::ModifiedFibonacci => MODIFIED_FIBONACCI,
            Self::Tshirt => TSHIRT,
        }
    }

    pub fn contains(self, value: &CardValue) -> bool {
        self.values().contains(&value.as_str())
    }
}

impl Default for DeckKind {
    fn default() -> Self {
        Self::ModifiedFibonacci
    }
}

impl fmt::Display for DeckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeckKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|deck| deck.name() == s)
            .ok_or_else(|| SessionError::UnknownDeck(s.to_string()))
    }
}

/// A single card value as played by a participant.
///
/// Values travel as strings. Clients that send JSON numbers (`13`, `0.5`)
/// are normalised to the decimal string of that number.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CardValue(String);

impl CardValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unsure(&self) -> bool {
        self.0 == UNSURE
    }

    /// Numeric reading of the card, `None` for "?" and non-numeric decks.
    pub fn as_number(&self) -> Option<f64> {
        if self.is_unsure() {
            return None;
        }
        self.0.parse::<f64>().ok().filter(|n| n.is_finite())
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardValue {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for CardValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(number_text(&n)),
        })
    }
}

/// Whole floats collapse to integer text so `5.0` lands on the `"5"` card.
fn number_text(n: &serde_json::Number) -> String {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < EXACT => format!("{}", f as i64),
        _ => n.to_string(),
    }
}
