//! Purpose: Runtime type descriptors for every element kind the library can store.
//! Exports: `Type`, `Element`, `Scalar`, `infer_from_string`, `infer_from_window`.
//! Role: Type-erasure engine; copy, cast, text and equality operations over tagged `Buffer`s.
//! Invariants: One `TypeInfo` per Rust type for the process lifetime; `Type` compares by identity.
//! Invariants: Descriptors are never mutated after first construction.
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::core::buffer::{Buffer, Storage};
use crate::core::error::{Error, ErrorKind};

/// Intermediate value used when converting between element kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

/// Conversion family of a kind; casts are defined within numeric families and text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Family {
    Numeric,
    Text,
    Opaque,
}

/// A concrete value kind that can live behind a `Type`.
///
/// Numeric kinds and `String` are built in. Aggregate kinds (for example an
/// `Image` stored inside an `Object`) implement this with the defaults, which
/// makes them copyable and comparable but not castable or byte-encodable.
pub trait Element: Any + Clone + Default + PartialEq + fmt::Debug + Send + Sync {
    const NAME: &'static str;
    const IS_POD: bool = false;
    const FAMILY: Family = Family::Opaque;

    fn to_scalar(&self) -> Option<Scalar> {
        None
    }

    fn from_scalar(_value: Scalar) -> Option<Self> {
        None
    }

    fn write_text(&self, out: &mut String);

    fn parse_text(_token: &str) -> Option<Self> {
        None
    }

    fn encode_le(&self, _out: &mut [u8]) -> bool {
        false
    }

    fn decode_le(_bytes: &[u8]) -> Option<Self> {
        None
    }
}

macro_rules! numeric_element {
    ($ty:ty, $name:literal, $variant:ident, $wide:ty) => {
        impl Element for $ty {
            const NAME: &'static str = $name;
            const IS_POD: bool = true;
            const FAMILY: Family = Family::Numeric;

            fn to_scalar(&self) -> Option<Scalar> {
                Some(Scalar::$variant(*self as $wide))
            }

            fn from_scalar(value: Scalar) -> Option<Self> {
                match value {
                    Scalar::Int(v) => Some(v as $ty),
                    Scalar::UInt(v) => Some(v as $ty),
                    Scalar::Float(v) => Some(v as $ty),
                    Scalar::Text(_) => None,
                }
            }

            fn write_text(&self, out: &mut String) {
                use std::fmt::Write as _;
                let _ = write!(out, "{}", self);
            }

            fn parse_text(token: &str) -> Option<Self> {
                token.parse::<$ty>().ok()
            }

            fn encode_le(&self, out: &mut [u8]) -> bool {
                let bytes = self.to_le_bytes();
                match out.get_mut(..bytes.len()) {
                    Some(slot) => {
                        slot.copy_from_slice(&bytes);
                        true
                    }
                    None => false,
                }
            }

            fn decode_le(bytes: &[u8]) -> Option<Self> {
                let raw = bytes.get(..std::mem::size_of::<$ty>())?;
                Some(<$ty>::from_le_bytes(raw.try_into().ok()?))
            }
        }
    };
}

numeric_element!(i8, "int8", Int, i64);
numeric_element!(u8, "uint8", UInt, u64);
numeric_element!(i16, "int16", Int, i64);
numeric_element!(u16, "uint16", UInt, u64);
numeric_element!(i32, "int32", Int, i64);
numeric_element!(u32, "uint32", UInt, u64);
numeric_element!(i64, "int64", Int, i64);
numeric_element!(u64, "uint64", UInt, u64);
numeric_element!(f32, "float", Float, f64);
numeric_element!(f64, "double", Float, f64);

impl Element for String {
    const NAME: &'static str = "string";
    const FAMILY: Family = Family::Text;

    fn to_scalar(&self) -> Option<Scalar> {
        Some(Scalar::Text(self.clone()))
    }

    fn from_scalar(value: Scalar) -> Option<Self> {
        match value {
            Scalar::Text(text) => Some(text),
            _ => None,
        }
    }

    fn write_text(&self, out: &mut String) {
        out.push_str(self);
    }

    fn parse_text(token: &str) -> Option<Self> {
        Some(token.to_string())
    }
}

/// Static description of one kind plus the constructor for its storage.
pub struct TypeInfo {
    name: &'static str,
    size: usize,
    is_pod: bool,
    family: Family,
    rust_type: Option<TypeId>,
    new_storage: Option<fn(usize) -> Box<dyn Storage>>,
}

impl TypeInfo {
    fn of<T: Element>() -> Self {
        Self {
            name: T::NAME,
            size: std::mem::size_of::<T>(),
            is_pod: T::IS_POD,
            family: T::FAMILY,
            rust_type: Some(TypeId::of::<T>()),
            new_storage: Some(new_storage::<T>),
        }
    }
}

fn new_storage<T: Element>(count: usize) -> Box<dyn Storage> {
    Box::new(vec![T::default(); count])
}

static NULL_INFO: TypeInfo = TypeInfo {
    name: "null",
    size: 0,
    is_pod: false,
    family: Family::Opaque,
    rust_type: None,
    new_storage: None,
};

fn registry() -> &'static RwLock<HashMap<TypeId, &'static TypeInfo>> {
    static TYPES: OnceLock<RwLock<HashMap<TypeId, &'static TypeInfo>>> = OnceLock::new();
    TYPES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Handle to the process-wide descriptor of one element kind.
#[derive(Clone, Copy)]
pub struct Type(&'static TypeInfo);

impl Type {
    /// Singleton for `T`, created on first use.
    pub fn get<T: Element>() -> Type {
        let id = TypeId::of::<T>();
        if let Some(info) = registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Type(*info);
        }
        let mut types = registry().write().unwrap_or_else(PoisonError::into_inner);
        let info = types
            .entry(id)
            .or_insert_with(|| &*Box::leak(Box::new(TypeInfo::of::<T>())));
        Type(*info)
    }

    /// The "no type yet" descriptor.
    pub fn null() -> Type {
        Type(&NULL_INFO)
    }

    pub fn int8() -> Type {
        Self::get::<i8>()
    }

    pub fn uint8() -> Type {
        Self::get::<u8>()
    }

    pub fn int16() -> Type {
        Self::get::<i16>()
    }

    pub fn uint16() -> Type {
        Self::get::<u16>()
    }

    pub fn int32() -> Type {
        Self::get::<i32>()
    }

    pub fn uint32() -> Type {
        Self::get::<u32>()
    }

    pub fn int64() -> Type {
        Self::get::<i64>()
    }

    pub fn uint64() -> Type {
        Self::get::<u64>()
    }

    pub fn float() -> Type {
        Self::get::<f32>()
    }

    pub fn double() -> Type {
        Self::get::<f64>()
    }

    pub fn string() -> Type {
        Self::get::<String>()
    }

    /// Resolve a registered kind by name; built-in kinds are always resolvable.
    pub fn by_name(name: &str) -> Option<Type> {
        if name == NULL_INFO.name {
            return Some(Self::null());
        }
        let builtin = [
            Self::int8(),
            Self::uint8(),
            Self::int16(),
            Self::uint16(),
            Self::int32(),
            Self::uint32(),
            Self::int64(),
            Self::uint64(),
            Self::float(),
            Self::double(),
            Self::string(),
        ];
        if let Some(ty) = builtin.into_iter().find(|ty| ty.name() == name) {
            return Some(ty);
        }
        registry()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|info| info.name == name)
            .map(|info| Type(*info))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn is_pod(&self) -> bool {
        self.0.is_pod
    }

    pub fn is_null(&self) -> bool {
        std::ptr::eq(self.0, &NULL_INFO)
    }

    pub fn family(&self) -> Family {
        self.0.family
    }

    /// True when `self` is the descriptor of the Rust type `T`.
    pub fn is<T: Element>(&self) -> bool {
        self.0.rust_type == Some(TypeId::of::<T>())
    }

    /// Whether values of `from` can be cast into this kind.
    pub fn can_cast_from(&self, from: Type) -> bool {
        if *self == from {
            return !self.is_null();
        }
        matches!(
            (self.family(), from.family()),
            (Family::Numeric, Family::Numeric) | (Family::Text, Family::Text)
        )
    }

    /// Owned buffer of `count` default-constructed elements of this kind.
    pub fn allocate(&self, count: usize) -> Buffer {
        match self.0.new_storage {
            Some(build) => Buffer::from_storage(*self, build(count)),
            None => Buffer::null(),
        }
    }

    /// Copy `count` elements between two buffers of this kind.
    pub fn copy(&self, src: &Buffer, dst: &mut Buffer, count: usize) -> Result<(), Error> {
        self.expect_kind(src)?;
        self.expect_kind(dst)?;
        check_count(src, dst, count)?;
        let (Some(from), Some(to)) = (src.storage(), dst.storage_mut()) else {
            return Ok(());
        };
        if from.copy_into(to, count) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Internal).with_message("storage kind drifted from its type"))
        }
    }

    /// Cast `count` elements of `src` (any kind) into `dst` (this kind).
    pub fn cast_from(&self, src: &Buffer, dst: &mut Buffer, count: usize) -> Result<(), Error> {
        self.expect_kind(dst)?;
        let from = src.ty();
        if from == *self {
            return self.copy(src, dst, count);
        }
        if !self.can_cast_from(from) {
            return Err(unsupported(from, *self));
        }
        check_count(src, dst, count)?;
        let (Some(input), Some(output)) = (src.storage(), dst.storage_mut()) else {
            return Ok(());
        };
        for i in 0..count {
            let converted = input
                .scalar_at(i)
                .map(|value| output.set_scalar(i, value))
                .unwrap_or(false);
            if !converted {
                return Err(unsupported(from, *self).with_index(i));
            }
        }
        Ok(())
    }

    /// Cast `count` elements of `src` (this kind) into `dst` (any kind).
    pub fn cast_to(&self, src: &Buffer, dst: &mut Buffer, count: usize) -> Result<(), Error> {
        self.expect_kind(src)?;
        dst.ty().cast_from(src, dst, count)
    }

    /// Write `count` elements as whitespace-separated text.
    pub fn to_stream(&self, src: &Buffer, count: usize, out: &mut String) -> Result<(), Error> {
        self.expect_kind(src)?;
        if count > src.len() {
            return Err(out_of_range(count, src.len()));
        }
        if let Some(storage) = src.storage() {
            storage.write_text(count, out);
        }
        Ok(())
    }

    /// Parse `count` whitespace-separated tokens into `dst`, consuming them from `tokens`.
    pub fn from_stream<'a, I>(&self, tokens: &mut I, dst: &mut Buffer, count: usize) -> Result<(), Error>
    where
        I: Iterator<Item = &'a str>,
    {
        self.expect_kind(dst)?;
        if count > dst.len() {
            return Err(out_of_range(count, dst.len()));
        }
        let Some(storage) = dst.storage_mut() else {
            return Ok(());
        };
        for i in 0..count {
            let token = tokens.next().ok_or_else(|| {
                Error::new(ErrorKind::TypeMismatch)
                    .with_message(format!("expected {count} {} tokens, found {i}", self.name()))
            })?;
            if !storage.parse_at(i, token) {
                return Err(Error::new(ErrorKind::TypeMismatch)
                    .with_message(format!("token `{token}` is not a valid {}", self.name()))
                    .with_index(i));
            }
        }
        Ok(())
    }

    /// Compare the first `count` elements of two buffers of this kind.
    pub fn equals(&self, a: &Buffer, b: &Buffer, count: usize) -> Result<bool, Error> {
        self.expect_kind(a)?;
        self.expect_kind(b)?;
        check_count(a, b, count)?;
        Ok(match (a.storage(), b.storage()) {
            (Some(left), Some(right)) => left.eq_prefix(right, count),
            _ => true,
        })
    }

    fn expect_kind(&self, buffer: &Buffer) -> Result<(), Error> {
        if buffer.ty() == *self {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "buffer holds {} but {} was expected",
                buffer.ty(),
                self
            )))
        }
    }
}

fn check_count(src: &Buffer, dst: &Buffer, count: usize) -> Result<(), Error> {
    let available = src.len().min(dst.len());
    if count > available {
        return Err(out_of_range(count, available));
    }
    Ok(())
}

fn out_of_range(count: usize, available: usize) -> Error {
    Error::new(ErrorKind::IndexOutOfRange)
        .with_message(format!("{count} elements requested, {available} available"))
}

fn unsupported(from: Type, to: Type) -> Error {
    Error::new(ErrorKind::UnsupportedConversion)
        .with_message(format!("no conversion from {from} to {to}"))
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state);
    }
}

impl Default for Type {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Most specific kind among int32, float and string matching `text`.
///
/// Anything other than exactly one token is a string.
pub fn infer_from_string(text: &str) -> Type {
    let mut tokens = text.split_whitespace();
    let (Some(token), None) = (tokens.next(), tokens.next()) else {
        return Type::string();
    };
    if token.parse::<i32>().is_ok() {
        return Type::int32();
    }
    let numeric_shape = token.bytes().any(|b| b.is_ascii_digit())
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'));
    if numeric_shape && token.parse::<f32>().is_ok() {
        return Type::float();
    }
    Type::string()
}

/// `infer_from_string` over the `len` bytes starting at `start`.
pub fn infer_from_window(text: &str, start: usize, len: usize) -> Type {
    match start
        .checked_add(len)
        .and_then(|end| text.get(start..end))
    {
        Some(window) => infer_from_string(window),
        None => Type::string(),
    }
}
