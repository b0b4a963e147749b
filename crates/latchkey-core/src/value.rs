//! Call arguments and their canonical string forms.
//!
//! Keys must be identical across calls and across processes for identical
//! inputs, so every value has exactly one rendering:
//!
//! | value        | rendering                 |
//! |--------------|---------------------------|
//! | string       | as-is                     |
//! | number/bool  | natural form (`42`, `true`) |
//! | enum variant | symbolic name (`LEADER`)  |
//! | date-time    | `yyyy-MM-dd HH:mm:ss`     |
//! | list         | `[e1,e2,...]`             |
//! | map          | `{k1=v1,k2=v2,...}` in iteration order |
//! | null         | `null` (only inside collections) |

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;

use indexmap::IndexMap;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// A single argument value of an intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// Enumeration variant, rendered by its symbolic name.
    Enum(String),
    DateTime(PrimitiveDateTime),
    List(Vec<ArgValue>),
    /// Key/value pairs in iteration order.
    Map(Vec<(ArgValue, ArgValue)>),
}

/// Enumerations that take part in keys by their symbolic name.
///
/// ```
/// use latchkey_core::value::{ArgValue, KeyVariant};
///
/// enum Role { Leader, Member }
///
/// impl KeyVariant for Role {
///     fn variant_name(&self) -> &'static str {
///         match self {
///             Role::Leader => "LEADER",
///             Role::Member => "MEMBER",
///         }
///     }
/// }
///
/// assert_eq!(ArgValue::from_variant(&Role::Member).canonical(), "MEMBER");
/// ```
pub trait KeyVariant {
    fn variant_name(&self) -> &'static str;
}

impl ArgValue {
    /// Enumeration variant by symbolic name (never by ordinal).
    pub fn variant(name: impl Into<String>) -> Self {
        ArgValue::Enum(name.into())
    }

    pub fn from_variant<V: KeyVariant + ?Sized>(value: &V) -> Self {
        ArgValue::Enum(value.variant_name().to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    /// Looks up a map entry whose key renders as `name`.
    pub fn field(&self, name: &str) -> Option<&ArgValue> {
        match self {
            ArgValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.canonical() == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Renders the canonical string form.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    /// Appends the canonical string form to `out`.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            ArgValue::Null => out.push_str("null"),
            ArgValue::Str(s) | ArgValue::Enum(s) => out.push_str(s),
            ArgValue::Int(n) => {
                let _ = write!(out, "{n}");
            }
            ArgValue::UInt(n) => {
                let _ = write!(out, "{n}");
            }
            ArgValue::Float(n) => {
                let _ = write!(out, "{n}");
            }
            ArgValue::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            ArgValue::DateTime(dt) => out.push_str(&format_date_time(dt)),
            ArgValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            ArgValue::Map(entries) => {
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    k.write_canonical(out);
                    out.push('=');
                    v.write_canonical(out);
                }
                out.push('}');
            }
        }
    }
}

fn format_date_time(dt: &PrimitiveDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for ArgValue {
            fn from(v: $t) -> Self {
                ArgValue::Int(v as i64)
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for ArgValue {
            fn from(v: $t) -> Self {
                ArgValue::UInt(v as u64)
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64, isize);
impl_from_unsigned!(u8, u16, u32, u64, usize);

impl From<f32> for ArgValue {
    fn from(v: f32) -> Self {
        ArgValue::Float(f64::from(v))
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<&String> for ArgValue {
    fn from(v: &String) -> Self {
        ArgValue::Str(v.clone())
    }
}

impl From<PrimitiveDateTime> for ArgValue {
    fn from(v: PrimitiveDateTime) -> Self {
        ArgValue::DateTime(v)
    }
}

/// Offset date-times render their local wall-clock fields; the offset is dropped.
impl From<OffsetDateTime> for ArgValue {
    fn from(v: OffsetDateTime) -> Self {
        ArgValue::DateTime(PrimitiveDateTime::new(v.date(), v.time()))
    }
}

impl From<Date> for ArgValue {
    fn from(v: Date) -> Self {
        ArgValue::DateTime(PrimitiveDateTime::new(v, Time::MIDNIGHT))
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ArgValue::Null, Into::into)
    }
}

impl<T: Into<ArgValue>> From<Vec<T>> for ArgValue {
    fn from(v: Vec<T>) -> Self {
        ArgValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<ArgValue>> From<&[T]> for ArgValue {
    fn from(v: &[T]) -> Self {
        ArgValue::List(v.iter().cloned().map(Into::into).collect())
    }
}

impl<K: Into<ArgValue>, V: Into<ArgValue>> From<IndexMap<K, V>> for ArgValue {
    fn from(v: IndexMap<K, V>) -> Self {
        ArgValue::Map(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<ArgValue>, V: Into<ArgValue>> From<BTreeMap<K, V>> for ArgValue {
    fn from(v: BTreeMap<K, V>) -> Self {
        ArgValue::Map(v.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<serde_json::Value> for ArgValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ArgValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    ArgValue::UInt(u)
                } else {
                    ArgValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => ArgValue::Str(s),
            Value::Array(items) => ArgValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => ArgValue::Map(
                map.into_iter()
                    .map(|(k, v)| (ArgValue::Str(k), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Named arguments of an intercepted call, in declaration order.
///
/// Order matters: cache keys without an explicit id argument append every
/// argument value in this order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyArgs {
    values: IndexMap<String, ArgValue>,
}

impl KeyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding of one argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Binds an argument, replacing a previous binding of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn values(&self) -> impl Iterator<Item = &ArgValue> {
        self.values.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for KeyArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = KeyArgs::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}
