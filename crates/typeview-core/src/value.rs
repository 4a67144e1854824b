//! Host-side values crossing the view boundary.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::layout::TypeId;
use crate::view::View;

/// A dynamically typed host value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// Integers of up to 64 bits.
    Int(i128),
    /// Integers wider than 64 bits.
    BigInt(BigInt),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Keyed input, in insertion order.
    Record(Vec<(String, Value)>),
    View(View),
    Enum(EnumItem),
    Error(ForeignError),
}

impl Value {
    /// Keyed value from `(name, value)` pairs.
    pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Record(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Short description used in error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(b) => format!("boolean {b}"),
            Self::Int(i) => format!("integer {i}"),
            Self::BigInt(i) => format!("integer {i}"),
            Self::Float(f) => format!("number {f}"),
            Self::String(s) => format!("string {s:?}"),
            Self::Bytes(b) => format!("{} byte(s)", b.len()),
            Self::List(items) => format!("list of {}", items.len()),
            Self::Record(_) => "record".into(),
            Self::View(view) => format!("object of type {}", view.type_name()),
            Self::Enum(item) => format!("enum item {item}"),
            Self::Error(err) => format!("error {}", err.name()),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer content, for values representable as `i128`.
    #[must_use]
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Self::Int(i) => Some(*i),
            Self::BigInt(i) => i.to_i128(),
            Self::Bool(b) => Some(i128::from(*b)),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => f.to_i128(),
            Self::Enum(item) => Some(item.value()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_big(&self) -> Option<BigInt> {
        match self {
            Self::BigInt(i) => Some(i.clone()),
            other => other.as_int().map(BigInt::from),
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::BigInt(i) => i.to_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_view(&self) -> Option<&View> {
        match self {
            Self::View(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&ForeignError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Int(a), Self::BigInt(b)) | (Self::BigInt(b), Self::Int(a)) => {
                &BigInt::from(*a) == b
            }
            (Self::Float(a), Self::Float(b)) => a == b || a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::View(a), Self::View(b)) => a.same_object(b),
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Self::Int(i128::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, i128);

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(v as i128)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Self::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<View> for Value {
    fn from(v: View) -> Self {
        Self::View(v)
    }
}

impl From<&View> for Value {
    fn from(v: &View) -> Self {
        Self::View(v.clone())
    }
}

impl From<EnumItem> for Value {
    fn from(v: EnumItem) -> Self {
        Self::Enum(v)
    }
}

impl From<ForeignError> for Value {
    fn from(v: ForeignError) -> Self {
        Self::Error(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug)]
struct EnumItemInner {
    type_id: TypeId,
    name: Option<String>,
    value: i128,
}

/// An enumeration item. Identity compared: two handles are equal only when
/// they were handed out for the same item of the same type.
#[derive(Debug, Clone)]
pub struct EnumItem(Rc<EnumItemInner>);

impl EnumItem {
    pub(crate) fn new(type_id: TypeId, name: Option<String>, value: i128) -> Self {
        Self(Rc::new(EnumItemInner {
            type_id,
            name,
            value,
        }))
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    /// Declared name; `None` for items synthesized for unseen values.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    #[must_use]
    pub fn value(&self) -> i128 {
        self.0.value
    }
}

impl PartialEq for EnumItem {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EnumItem {}

impl fmt::Display for EnumItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.name {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0.value),
        }
    }
}

#[derive(Debug)]
struct ForeignErrorInner {
    number: u32,
    name: String,
    message: String,
}

/// A foreign error value with process-stable identity.
#[derive(Debug, Clone)]
pub struct ForeignError(Rc<ForeignErrorInner>);

impl ForeignError {
    pub(crate) fn new(number: u32, name: &str) -> Self {
        Self(Rc::new(ForeignErrorInner {
            number,
            name: name.to_owned(),
            message: decamelize(name),
        }))
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.0.number
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Human readable message derived from the name.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// True when both handles are the same canonical error object.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ForeignError {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for ForeignError {}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.message)
    }
}

impl std::error::Error for ForeignError {}

/// `SystemIsOnFire` -> `System is on fire`, `OutOfMemory` -> `Out of memory`.
///
/// Runs of capitals are kept as one word (`HTTPError` -> `HTTP error`).
#[must_use]
pub fn decamelize(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        let boundary = c.is_uppercase()
            && match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
        if (boundary || c == '_') && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        if c != '_' {
            current.push(c);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let acronym = word.chars().count() > 1 && word.chars().all(|c| !c.is_lowercase());
        if i == 0 {
            out.push_str(word);
        } else {
            out.push(' ');
            if acronym {
                out.push_str(word);
            } else {
                out.push_str(&word.to_lowercase());
            }
        }
    }
    out
}
