//! Property values for vertices and edges.
//!
//! [`PropertyValue`] is the dynamic type that can hold any property value -
//! nulls, booleans, numbers, strings, lists, and maps. Equality is
//! structural; ordering is only defined between values of the same kind.

use arcstr::ArcStr;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically-typed property value.
///
/// # Examples
///
/// ```
/// use quiver_common::types::PropertyValue;
///
/// let name = PropertyValue::from("Alice");
/// let age = PropertyValue::from(30i64);
///
/// assert_eq!(name.as_str(), Some("Alice"));
/// assert_eq!(age.as_int(), Some(30));
/// ```
#[derive(Clone, PartialEq)]
pub enum PropertyValue {
    /// Null/missing value.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating point.
    Double(f64),

    /// UTF-8 string (uses ArcStr for cheap cloning).
    String(ArcStr),

    /// Ordered list of values.
    List(Vec<PropertyValue>),

    /// Key-value map (BTreeMap for deterministic ordering).
    Map(BTreeMap<ArcStr, PropertyValue>),
}

impl PropertyValue {
    /// Returns `true` if this value is null.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Returns the boolean value if this is a Bool, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value if this is an Int, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value if this is a Double, otherwise None.
    #[inline]
    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the string value if this is a String, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list value if this is a List, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the map value if this is a Map, otherwise None.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<ArcStr, PropertyValue>> {
        match self {
            PropertyValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the type name of this value.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "NULL",
            PropertyValue::Bool(_) => "BOOL",
            PropertyValue::Int(_) => "INT",
            PropertyValue::Double(_) => "DOUBLE",
            PropertyValue::String(_) => "STRING",
            PropertyValue::List(_) => "LIST",
            PropertyValue::Map(_) => "MAP",
        }
    }

    /// Compares two values of the same kind.
    ///
    /// Returns `None` when the kinds differ (ordering is undefined across
    /// kinds) or when comparing NaN doubles.
    #[must_use]
    pub fn partial_cmp_same_kind(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (PropertyValue::Null, PropertyValue::Null) => Some(Ordering::Equal),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => Some(a.cmp(b)),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => Some(a.cmp(b)),
            (PropertyValue::Double(a), PropertyValue::Double(b)) => a.partial_cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Default for PropertyValue {
    fn default() -> Self {
        PropertyValue::Null
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "Null"),
            PropertyValue::Bool(b) => write!(f, "Bool({b})"),
            PropertyValue::Int(i) => write!(f, "Int({i})"),
            PropertyValue::Double(d) => write!(f, "Double({d})"),
            PropertyValue::String(s) => write!(f, "String({s:?})"),
            PropertyValue::List(l) => write!(f, "List({l:?})"),
            PropertyValue::Map(m) => write!(f, "Map({m:?})"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<f64> for PropertyValue {
    fn from(d: f64) -> Self {
        PropertyValue::Double(d)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.into())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s.into())
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(l: Vec<PropertyValue>) -> Self {
        PropertyValue::List(l)
    }
}
