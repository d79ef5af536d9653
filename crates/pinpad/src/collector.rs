use pinpad_core::keypad::{Digit, PIN_LENGTH};

/// Bounded digit buffer fed by the keypad.
///
/// Holds at most [`PIN_LENGTH`] digits. Only [`Digit`]s can be pushed, so the
/// contents are always a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collector {
    value: String,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a digit. Returns false (and changes nothing) when full.
    pub fn push(&mut self, digit: Digit) -> bool {
        if self.is_full() {
            return false;
        }
        self.value.push(digit.as_char());
        true
    }

    /// Remove the last digit. Returns false on an empty buffer.
    pub fn pop(&mut self) -> bool {
        self.value.pop().is_some()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_full(&self) -> bool {
        self.value.len() >= PIN_LENGTH
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }
}
