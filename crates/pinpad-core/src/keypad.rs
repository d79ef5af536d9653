use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of digits in a PIN.
pub const PIN_LENGTH: usize = 4;

/// Wire name of the backspace key.
pub const BACKSPACE: &str = "backspace";

/// A single decimal digit, 0 through 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digit(u8);

impl Digit {
    pub fn new(value: u8) -> Option<Self> {
        (value <= 9).then_some(Self(value))
    }

    pub fn from_char(c: char) -> Option<Self> {
        c.to_digit(10).map(|d| Self(d as u8))
    }

    pub fn as_char(self) -> char {
        (b'0' + self.0) as char
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A token emitted by the keypad.
///
/// On the wire a key is a plain string: `"0"`..`"9"` or `"backspace"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Key {
    Digit(Digit),
    Backspace,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown key '{0}': expected a digit 0-9 or 'backspace'")]
pub struct KeyParseError(pub String);

impl Key {
    pub fn digit(value: u8) -> Option<Self> {
        Digit::new(value).map(Key::Digit)
    }

    /// Split a digit string like `"1234"` into keys. Fails on the first
    /// non-digit character.
    pub fn parse_digits(s: &str) -> Result<Vec<Key>, KeyParseError> {
        s.chars()
            .map(|c| {
                Digit::from_char(c)
                    .map(Key::Digit)
                    .ok_or_else(|| KeyParseError(c.to_string()))
            })
            .collect()
    }
}

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(BACKSPACE) {
            return Ok(Key::Backspace);
        }
        let mut chars = trimmed.chars();
        match (chars.next().and_then(Digit::from_char), chars.next()) {
            (Some(d), None) => Ok(Key::Digit(d)),
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Key {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Digit(d) => write!(f, "{}", d),
            Key::Backspace => f.write_str(BACKSPACE),
        }
    }
}
