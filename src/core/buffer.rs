// Owned, kind-tagged element storage; replaces raw pointer + count pairs.
use std::any::Any;
use std::fmt;

use crate::core::error::{Error, ErrorKind};
use crate::core::types::{Element, Scalar, Type};

/// Erased operations over a `Vec<T>` of one element kind.
pub(crate) trait Storage: Send + Sync {
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn clone_box(&self) -> Box<dyn Storage>;
    fn resize(&mut self, count: usize);
    fn scalar_at(&self, index: usize) -> Option<Scalar>;
    fn set_scalar(&mut self, index: usize, value: Scalar) -> bool;
    fn parse_at(&mut self, index: usize, token: &str) -> bool;
    fn write_text(&self, count: usize, out: &mut String);
    fn copy_into(&self, dst: &mut dyn Storage, count: usize) -> bool;
    fn eq_prefix(&self, other: &dyn Storage, count: usize) -> bool;
    fn encode(&self, count: usize, elem_size: usize, out: &mut [u8]) -> bool;
    fn decode(&mut self, count: usize, elem_size: usize, bytes: &[u8]) -> bool;
    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T: Element> Storage for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn clone_box(&self) -> Box<dyn Storage> {
        Box::new(self.clone())
    }

    fn resize(&mut self, count: usize) {
        Vec::resize(self, count, T::default());
    }

    fn scalar_at(&self, index: usize) -> Option<Scalar> {
        self.get(index)?.to_scalar()
    }

    fn set_scalar(&mut self, index: usize, value: Scalar) -> bool {
        match (self.get_mut(index), T::from_scalar(value)) {
            (Some(slot), Some(converted)) => {
                *slot = converted;
                true
            }
            _ => false,
        }
    }

    fn parse_at(&mut self, index: usize, token: &str) -> bool {
        match (self.get_mut(index), T::parse_text(token)) {
            (Some(slot), Some(parsed)) => {
                *slot = parsed;
                true
            }
            _ => false,
        }
    }

    fn write_text(&self, count: usize, out: &mut String) {
        for (i, value) in self.iter().take(count).enumerate() {
            if i > 0 {
                out.push(' ');
            }
            value.write_text(out);
        }
    }

    fn copy_into(&self, dst: &mut dyn Storage, count: usize) -> bool {
        let Some(dst) = dst.as_any_mut().downcast_mut::<Vec<T>>() else {
            return false;
        };
        dst[..count].clone_from_slice(&self[..count]);
        true
    }

    fn eq_prefix(&self, other: &dyn Storage, count: usize) -> bool {
        match other.as_any().downcast_ref::<Vec<T>>() {
            Some(other) => self[..count] == other[..count],
            None => false,
        }
    }

    fn encode(&self, count: usize, elem_size: usize, out: &mut [u8]) -> bool {
        self.iter()
            .take(count)
            .zip(out.chunks_exact_mut(elem_size))
            .all(|(value, chunk)| value.encode_le(chunk))
    }

    fn decode(&mut self, count: usize, elem_size: usize, bytes: &[u8]) -> bool {
        for (slot, chunk) in self.iter_mut().take(count).zip(bytes.chunks_exact(elem_size)) {
            match T::decode_le(chunk) {
                Some(value) => *slot = value,
                None => return false,
            }
        }
        true
    }

    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Elements of one `Type`, owned and freed with the buffer.
pub struct Buffer {
    ty: Type,
    data: Option<Box<dyn Storage>>,
}

impl Buffer {
    pub fn null() -> Self {
        Self {
            ty: Type::null(),
            data: None,
        }
    }

    /// `count` default elements of `ty`.
    pub fn new(ty: Type, count: usize) -> Self {
        ty.allocate(count)
    }

    pub fn from_vec<T: Element>(values: Vec<T>) -> Self {
        Self {
            ty: Type::get::<T>(),
            data: Some(Box::new(values)),
        }
    }

    pub(crate) fn from_storage(ty: Type, data: Box<dyn Storage>) -> Self {
        Self {
            ty,
            data: Some(data),
        }
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the element data in bytes when encoded on disk.
    pub fn byte_len(&self) -> usize {
        self.len() * self.ty.size()
    }

    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.data
            .as_ref()?
            .as_any()
            .downcast_ref::<Vec<T>>()
            .map(Vec::as_slice)
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        self.data
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<Vec<T>>()
            .map(Vec::as_mut_slice)
    }

    pub fn into_vec<T: Element>(self) -> Option<Vec<T>> {
        self.data?
            .into_any()
            .downcast::<Vec<T>>()
            .ok()
            .map(|values| *values)
    }

    pub fn get<T: Element>(&self, index: usize) -> Option<&T> {
        self.as_slice::<T>()?.get(index)
    }

    pub fn scalar(&self, index: usize) -> Option<Scalar> {
        self.data.as_ref()?.scalar_at(index)
    }

    /// Keep the kind, change the element count; new slots are default values.
    pub fn resize(&mut self, count: usize) {
        if let Some(data) = self.data.as_mut() {
            data.resize(count);
        }
    }

    /// Reallocate as `count` elements of `ty`, discarding current contents unless the kind is unchanged.
    pub fn reshape(&mut self, ty: Type, count: usize) {
        if ty == self.ty {
            self.resize(count);
        } else {
            *self = ty.allocate(count);
        }
    }

    /// Little-endian bytes of the first `count` elements.
    pub fn encode(&self, count: usize, out: &mut [u8]) -> Result<(), Error> {
        let size = self.pod_size()?;
        if count > self.len() || out.len() < count * size {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("cannot encode {count} {} elements", self.ty)));
        }
        match self.data.as_ref() {
            Some(data) if data.encode(count, size, out) => Ok(()),
            _ => Err(not_encodable(self.ty)),
        }
    }

    /// Fill the first `count` elements from little-endian bytes.
    pub fn decode(&mut self, count: usize, bytes: &[u8]) -> Result<(), Error> {
        let size = self.pod_size()?;
        if count > self.len() || bytes.len() < count * size {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("cannot decode {count} {} elements", self.ty)));
        }
        let ty = self.ty;
        match self.data.as_mut() {
            Some(data) => {
                if data.decode(count, size, bytes) {
                    Ok(())
                } else {
                    Err(not_encodable(ty))
                }
            }
            None => Err(not_encodable(ty)),
        }
    }

    fn pod_size(&self) -> Result<usize, Error> {
        if self.ty.is_pod() {
            Ok(self.ty.size())
        } else {
            Err(not_encodable(self.ty))
        }
    }

    pub(crate) fn storage(&self) -> Option<&dyn Storage> {
        self.data.as_deref()
    }

    pub(crate) fn storage_mut(&mut self) -> Option<&mut (dyn Storage + 'static)> {
        self.data.as_deref_mut()
    }
}

fn not_encodable(ty: Type) -> Error {
    Error::new(ErrorKind::UnsupportedConversion)
        .with_message(format!("{ty} elements have no binary layout"))
}

impl Default for Buffer {
    fn default() -> Self {
        Self::null()
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty,
            data: self.data.as_ref().map(|data| data.clone_box()),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        if self.ty != other.ty || self.len() != other.len() {
            return false;
        }
        match (self.data.as_ref(), other.data.as_ref()) {
            (Some(left), Some(right)) => left.eq_prefix(right.as_ref(), self.len()),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer<{}>", self.ty)?;
        match self.data.as_ref() {
            Some(data) => data.debug_fmt(f),
            None => f.write_str("[]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;
    use crate::core::error::ErrorKind;
    use crate::core::types::Type;

    #[test]
    fn allocate_uses_default_elements() {
        let buffer = Type::string().allocate(3);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.ty(), Type::string());
        assert_eq!(buffer.as_slice::<String>(), Some(&[String::new(), String::new(), String::new()][..]));
        assert!(buffer.as_slice::<i32>().is_none());
    }

    #[test]
    fn clone_is_independent() {
        let mut original = Buffer::from_vec(vec![1u16, 2, 3]);
        let copy = original.clone();
        if let Some(values) = original.as_mut_slice::<u16>() {
            values[0] = 9;
        }
        assert_eq!(copy.as_slice::<u16>(), Some(&[1, 2, 3][..]));
        assert_ne!(original, copy);
    }

    #[test]
    fn encode_decode_little_endian() {
        let source = Buffer::from_vec(vec![1.5f32, -2.0]);
        let mut bytes = vec![0u8; source.byte_len()];
        source.encode(2, &mut bytes).expect("encode");
        assert_eq!(&bytes[..4], &1.5f32.to_le_bytes());

        let mut target = Type::float().allocate(2);
        target.decode(2, &bytes).expect("decode");
        assert_eq!(source, target);
    }

    #[test]
    fn strings_have_no_binary_layout() {
        let source = Buffer::from_vec(vec!["a".to_string()]);
        let mut bytes = vec![0u8; 16];
        let err = source.encode(1, &mut bytes).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::UnsupportedConversion);
    }

    #[test]
    fn reshape_reallocates_on_kind_change() {
        let mut buffer = Buffer::from_vec(vec![1i32, 2]);
        buffer.reshape(Type::int32(), 4);
        assert_eq!(buffer.as_slice::<i32>(), Some(&[1, 2, 0, 0][..]));
        buffer.reshape(Type::double(), 1);
        assert_eq!(buffer.as_slice::<f64>(), Some(&[0.0][..]));
    }
}
