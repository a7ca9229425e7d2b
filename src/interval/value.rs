//! State values held by intervals

use std::fmt;

/// Type tag for [`StateValue::Null`]
pub const TYPE_NULL: u8 = 0xFF;
/// Type tag for [`StateValue::Int`]
pub const TYPE_INT: u8 = 0;
/// Type tag for [`StateValue::String`]
pub const TYPE_STRING: u8 = 1;
/// Type tag for [`StateValue::Long`]
pub const TYPE_LONG: u8 = 2;
/// Type tag for [`StateValue::Double`]
pub const TYPE_DOUBLE: u8 = 3;

/// Longest string payload the one-byte length prefix can describe
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Value of an attribute during an interval
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum StateValue {
    /// No value
    Null,
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Double-precision float
    Double(f64),
    /// UTF-8 string, stored in the node's strings section
    String(String),
}

impl StateValue {
    /// On-disk type tag
    pub fn type_tag(&self) -> u8 {
        match self {
            StateValue::Null => TYPE_NULL,
            StateValue::Int(_) => TYPE_INT,
            StateValue::Long(_) => TYPE_LONG,
            StateValue::Double(_) => TYPE_DOUBLE,
            StateValue::String(_) => TYPE_STRING,
        }
    }

    /// Whether the value is stored in the strings section
    pub fn is_variable_width(&self) -> bool {
        matches!(self, StateValue::String(_))
    }

    /// Bytes this value occupies in the strings section
    ///
    /// One length byte, the payload and a zero sentinel for strings, nothing
    /// for values stored inline.
    pub fn strings_entry_size(&self) -> usize {
        match self {
            StateValue::String(s) => s.len() + 2,
            _ => 0,
        }
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    /// The `Int` payload, if any
    pub fn as_int(&self) -> Option<i32> {
        match self {
            StateValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an `i64`, widening `Int`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            StateValue::Long(v) => Some(*v),
            StateValue::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// The `String` payload, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => write!(f, "null"),
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Long(v) => write!(f, "{}L", v),
            StateValue::Double(v) => write!(f, "{}", v),
            StateValue::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Long(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Double(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(StateValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_entry_size() {
        assert_eq!(StateValue::Null.strings_entry_size(), 0);
        assert_eq!(StateValue::Int(3).strings_entry_size(), 0);
        assert_eq!(StateValue::Double(1.5).strings_entry_size(), 0);
        assert_eq!(StateValue::from("hello").strings_entry_size(), 7);
        assert_eq!(StateValue::from("").strings_entry_size(), 2);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(StateValue::from(Some(4)), StateValue::Int(4));
        assert_eq!(StateValue::from(None::<i64>), StateValue::Null);
        assert_eq!(StateValue::Int(9).as_long(), Some(9));
        assert_eq!(StateValue::from("x").as_str(), Some("x"));
        assert!(StateValue::Null.is_null());
    }

    #[test]
    fn test_display() {
        assert_eq!(StateValue::Null.to_string(), "null");
        assert_eq!(StateValue::Long(5).to_string(), "5L");
        assert_eq!(StateValue::from("run").to_string(), "\"run\"");
    }
}
