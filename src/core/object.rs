//! Purpose: A single dynamically typed value with sticky type semantics.
//! Exports: `Object`, `ObjectDict`.
//! Role: Cell type for table rows and image headers.
//! Invariants: Once non-null, the type changes only through `set_type`.
//! Invariants: Assignments into a typed object convert through `Type::cast_from`.
use std::collections::BTreeMap;
use std::fmt;

use crate::core::buffer::Buffer;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{Element, Scalar, Type};

/// Ordered name to value map used for per-image headers.
pub type ObjectDict = BTreeMap<String, Object>;

#[derive(Clone, Default, PartialEq)]
pub struct Object {
    value: Buffer,
}

impl Object {
    pub fn null() -> Self {
        Self::default()
    }

    /// A default value of `ty`.
    pub fn of_type(ty: Type) -> Self {
        Self {
            value: ty.allocate(1),
        }
    }

    pub fn new<T: Element>(value: T) -> Self {
        Self {
            value: Buffer::from_vec(vec![value]),
        }
    }

    pub fn ty(&self) -> Type {
        self.value.ty()
    }

    pub fn is_null(&self) -> bool {
        self.ty().is_null()
    }

    /// Rebind the type, discarding the current value.
    pub fn set_type(&mut self, ty: Type) {
        self.value = ty.allocate(1);
    }

    /// Assign a native value; converts into the established type when there is one.
    pub fn set<T: Element>(&mut self, value: T) -> Result<(), Error> {
        if self.is_null() || self.ty().is::<T>() {
            self.value = Buffer::from_vec(vec![value]);
            return Ok(());
        }
        let source = Buffer::from_vec(vec![value]);
        self.ty().cast_from(&source, &mut self.value, 1)
    }

    /// Assign another object's value with the same sticky-type rules as `set`.
    pub fn assign(&mut self, other: &Object) -> Result<(), Error> {
        if self.is_null() || self.ty() == other.ty() {
            self.value = other.value.clone();
            return Ok(());
        }
        if other.is_null() {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("cannot assign a null value into {}", self.ty())));
        }
        self.ty().cast_from(&other.value, &mut self.value, 1)
    }

    /// Assign from the conversion intermediate, keeping the established type.
    pub fn set_scalar(&mut self, value: Scalar) -> Result<(), Error> {
        if self.is_null() {
            *self = match value {
                Scalar::Int(v) => Object::new(v),
                Scalar::UInt(v) => Object::new(v),
                Scalar::Float(v) => Object::new(v),
                Scalar::Text(v) => Object::new(v),
            };
            return Ok(());
        }
        let source = match value {
            Scalar::Int(v) => Buffer::from_vec(vec![v]),
            Scalar::UInt(v) => Buffer::from_vec(vec![v]),
            Scalar::Float(v) => Buffer::from_vec(vec![v]),
            Scalar::Text(v) => Buffer::from_vec(vec![v]),
        };
        self.ty().cast_from(&source, &mut self.value, 1)
    }

    /// The value converted into `T`.
    pub fn get<T: Element>(&self) -> Result<T, Error> {
        if let Some(value) = self.value.get::<T>(0) {
            return Ok(value.clone());
        }
        let target = Type::get::<T>();
        let mut out = target.allocate(1);
        target.cast_from(&self.value, &mut out, 1)?;
        out.into_vec::<T>()
            .and_then(|mut values| values.pop())
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("cast produced no value"))
    }

    /// Borrow the value without conversion.
    pub fn value<T: Element>(&self) -> Option<&T> {
        self.value.get::<T>(0)
    }

    pub fn scalar(&self) -> Option<Scalar> {
        self.value.scalar(0)
    }

    pub fn buffer(&self) -> &Buffer {
        &self.value
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.value
    }

    /// Equality that refuses to compare values of different types.
    pub fn try_eq(&self, other: &Object) -> Result<bool, Error> {
        if self.ty() != other.ty() {
            return Err(Error::new(ErrorKind::TypeMismatch).with_message(format!(
                "cannot compare {} with {}",
                self.ty(),
                other.ty()
            )));
        }
        if self.is_null() {
            return Ok(true);
        }
        self.ty().equals(&self.value, &other.value, 1)
    }

    /// Parse the value from text, keeping the current type.
    pub fn from_string(&mut self, text: &str) -> Result<(), Error> {
        if self.is_null() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("cannot parse into an object without a type"));
        }
        let ty = self.ty();
        if ty.is::<String>() {
            self.value = Buffer::from_vec(vec![text.to_string()]);
            return Ok(());
        }
        ty.from_stream(&mut text.split_whitespace(), &mut self.value, 1)
    }
}

impl<T: Element> From<T> for Object {
    fn from(value: T) -> Self {
        Object::new(value)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return Ok(());
        }
        let mut text = String::new();
        if self.ty().to_stream(&self.value, 1, &mut text).is_err() {
            return Err(fmt::Error);
        }
        f.write_str(&text)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object<{}>({})", self.ty(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::Object;
    use crate::core::error::ErrorKind;
    use crate::core::types::Type;

    #[test]
    fn null_object_adopts_first_type() {
        let mut object = Object::null();
        assert!(object.is_null());
        object.set(1i32).expect("set");
        assert_eq!(object.ty(), Type::int32());

        object.set(2.2f32).expect("set");
        assert_eq!(object.ty(), Type::int32());
        assert_eq!(object.get::<i32>().expect("get"), 2);
    }

    #[test]
    fn set_type_rebinds() {
        let mut object = Object::new(3.5f64);
        assert_eq!(object.ty(), Type::double());
        object.set_type(Type::float());
        assert_eq!(object.ty(), Type::float());
        object.set(1.3f64).expect("set");
        assert_eq!(object.ty(), Type::float());
        assert_eq!(object.get::<f32>().expect("get"), 1.3f32);
    }

    #[test]
    fn strings_do_not_convert_to_numbers() {
        let mut object = Object::new(7i16);
        let err = object.set("seven".to_string()).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::UnsupportedConversion);
        assert_eq!(object.get::<i16>().expect("unchanged"), 7);
    }

    #[test]
    fn assign_keeps_existing_type() {
        let mut target = Object::of_type(Type::uint8());
        target.assign(&Object::new(300i32)).expect("assign");
        assert_eq!(target.ty(), Type::uint8());
        assert_eq!(target.get::<u8>().expect("get"), 44);

        let mut fresh = Object::null();
        fresh.assign(&Object::new("text".to_string())).expect("assign");
        assert_eq!(fresh.ty(), Type::string());
    }

    #[test]
    fn copies_are_independent_and_moves_leave_null() {
        let mut original = Object::new("One string".to_string());
        let copy = original.clone();
        assert!(copy.try_eq(&original).expect("same type"));
        original.set("Other".to_string()).expect("set");
        assert!(!copy.try_eq(&original).expect("same type"));

        let moved = std::mem::take(&mut original);
        assert!(original.is_null());
        assert_eq!(moved.value::<String>().map(String::as_str), Some("Other"));
    }

    #[test]
    fn comparing_different_types_fails() {
        let err = Object::new(1i32)
            .try_eq(&Object::new(1.0f32))
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn parses_and_prints_text() {
        let mut object = Object::new(0.0f64);
        object.from_string("3.14159").expect("parse");
        assert_eq!(object.get::<f64>().expect("get"), 3.14159);
        assert_eq!(object.to_string(), "3.14159");

        let mut untyped = Object::null();
        let err = untyped.from_string("1").expect_err("no type");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
