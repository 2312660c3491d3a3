// TOM/EM image files: 512-byte little-endian header, items packed without padding.
//
// Layout: byte 0 machine (6 = little-endian PC), byte 3 data type code,
// int32 nx/ny/nz at 4/8/12, 80-byte comment at 16. The `nz` sections are
// exposed as a stack of 2D items.
use std::fs::File;
use std::path::Path;

use crate::core::error::{Error, ErrorKind, usage};
use crate::core::file;
use crate::core::formats::{dimension, read_i32, read_text, write_i32, write_text};
use crate::core::image::ArrayDim;
use crate::core::image_io::{ImageFormat, ImageHeader};
use crate::core::object::{Object, ObjectDict};
use crate::core::types::Type;

const HEADER_SIZE: usize = 512;
const MACHINE_LE: u8 = 6;
const COMMENT_OFFSET: usize = 16;
const COMMENT_LEN: usize = 80;

#[derive(Debug, Default)]
pub struct EmFormat;

fn type_for_code(code: u8) -> Option<Type> {
    match code {
        1 => Some(Type::int8()),
        2 => Some(Type::int16()),
        4 => Some(Type::int32()),
        5 => Some(Type::float()),
        9 => Some(Type::double()),
        _ => None,
    }
}

fn code_for_type(ty: Type) -> Option<u8> {
    [1u8, 2, 4, 5, 9]
        .into_iter()
        .find(|code| type_for_code(*code) == Some(ty))
}

impl ImageFormat for EmFormat {
    fn name(&self) -> &'static str {
        "em"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["em"]
    }

    fn read_header(&mut self, file: &mut File, path: &Path) -> Result<ImageHeader, Error> {
        let mut buf = [0u8; HEADER_SIZE];
        file::read_exact_at(file, path, 0, &mut buf).map_err(|err| {
            Error::new(ErrorKind::HeaderParse)
                .with_message("file is shorter than an EM header")
                .with_path(path)
                .with_source(err)
        })?;
        let parse_error = |message: String| {
            Error::new(ErrorKind::HeaderParse)
                .with_message(message)
                .with_path(path)
        };
        if buf[0] != MACHINE_LE {
            return Err(parse_error(format!(
                "unsupported EM machine code {}; only little-endian (6) files are read",
                buf[0]
            )));
        }
        let code = buf[3];
        let ty = type_for_code(code)
            .ok_or_else(|| parse_error(format!("unsupported EM data type code {code}")))?;
        let nx = dimension(read_i32(&buf, 4), "x").map_err(|err| err.with_path(path))?;
        let ny = dimension(read_i32(&buf, 8), "y").map_err(|err| err.with_path(path))?;
        let nz = dimension(read_i32(&buf, 12), "z").map_err(|err| err.with_path(path))?;

        let mut values = ObjectDict::new();
        values.insert("type_code".into(), Object::new(i32::from(code)));
        let comment = read_text(&buf, COMMENT_OFFSET, COMMENT_LEN);
        if !comment.is_empty() {
            values.insert("comment".into(), Object::new(comment));
        }
        Ok(ImageHeader {
            dim: ArrayDim::new(nx, ny, 1, nz),
            ty,
            values,
        })
    }

    fn write_header(&mut self, file: &mut File, path: &Path, dim: ArrayDim, ty: Type) -> Result<(), Error> {
        if dim.z > 1 && dim.n > 1 {
            return Err(usage("EM files hold one volume or one stack of 2D images, not both")
                .with_path(path));
        }
        let code = code_for_type(ty).ok_or_else(|| {
            Error::new(ErrorKind::UnsupportedConversion)
                .with_message(format!("EM files cannot store {ty} elements"))
                .with_path(path)
        })?;
        let nz = if dim.n > 1 { dim.n } else { dim.z };
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = MACHINE_LE;
        buf[3] = code;
        for (offset, value) in [(4, dim.x), (8, dim.y), (12, nz)] {
            let value = i32::try_from(value)
                .map_err(|_| usage(format!("dimension {value} does not fit an EM header")))?;
            write_i32(&mut buf, offset, value);
        }
        write_text(&mut buf, COMMENT_OFFSET, COMMENT_LEN, "written by emio");
        file::write_all_at(file, path, 0, &buf)
    }

    fn header_size(&self) -> u64 {
        HEADER_SIZE as u64
    }

    fn supports_type(&self, ty: Type) -> bool {
        code_for_type(ty).is_some()
    }
}
