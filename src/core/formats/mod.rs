// Built-in image and table formats plus their registration.
use std::sync::{Arc, Once};

use crate::core::error::{Error, ErrorKind};
use crate::core::image_io::{ImageFormat, ImageIo};
use crate::core::table_io::{TableFormat, TableIo};

pub mod em;
pub mod mrc;
pub mod star;

/// Register every built-in format; later calls are no-ops.
pub fn register_builtin() {
    static BUILTIN: Once = Once::new();
    BUILTIN.call_once(|| {
        ImageIo::register_impl(Arc::new(|| Box::new(em::EmFormat::default()) as Box<dyn ImageFormat>));
        ImageIo::register_impl(Arc::new(|| Box::new(mrc::MrcFormat::default()) as Box<dyn ImageFormat>));
        TableIo::register_impl(Arc::new(|| Box::new(star::StarFormat) as Box<dyn TableFormat>));
        tracing::debug!("registered built-in formats");
    });
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(read_4(buf, offset))
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(read_4(buf, offset))
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// NUL-terminated ASCII field, trailing padding trimmed.
fn read_text(buf: &[u8], offset: usize, len: usize) -> String {
    let raw = &buf[offset..offset + len];
    let end = raw.iter().position(|b| *b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).trim_end().to_string()
}

fn write_text(buf: &mut [u8], offset: usize, len: usize, text: &str) {
    let bytes = text.as_bytes();
    let n = bytes.len().min(len);
    buf[offset..offset + n].copy_from_slice(&bytes[..n]);
}

/// Header dimension as a positive count.
fn dimension(value: i32, name: &str) -> Result<usize, Error> {
    usize::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            Error::new(ErrorKind::HeaderParse)
                .with_message(format!("invalid {name} dimension {value}"))
        })
}

#[cfg(test)]
mod tests {
    use super::{read_i32, read_text, register_builtin, write_i32, write_text};
    use crate::core::image_io::ImageIo;
    use crate::core::table_io::TableIo;

    #[test]
    fn builtin_keys_are_registered() {
        register_builtin();
        register_builtin();
        for key in ["em", "mrc", "mrcs", "map", "st"] {
            assert!(ImageIo::has_impl(key), "{key}");
        }
        for key in ["star", "xmd"] {
            assert!(TableIo::has_impl(key), "{key}");
        }
    }

    #[test]
    fn header_fields_round_trip() {
        let mut buf = [0u8; 32];
        write_i32(&mut buf, 4, -7);
        write_text(&mut buf, 8, 8, "MAP");
        assert_eq!(read_i32(&buf, 4), -7);
        assert_eq!(read_text(&buf, 8, 8), "MAP");
    }
}
