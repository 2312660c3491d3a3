// MRC2014 image files (`mrc`, `mrcs`, `map`, `st`): 1024-byte header plus optional extended header.
use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::core::error::{Error, ErrorKind, usage};
use crate::core::file;
use crate::core::formats::{dimension, read_f32, read_i32, read_text, write_f32, write_i32, write_text};
use crate::core::image::ArrayDim;
use crate::core::image_io::{ImageFormat, ImageHeader};
use crate::core::object::{Object, ObjectDict};
use crate::core::types::Type;

const HEADER_SIZE: usize = 1024;
const MAP_TAG: &[u8; 4] = b"MAP ";
const MACHINE_LE: [u8; 4] = [0x44, 0x44, 0x00, 0x00];
const MACHINE_BE_MARK: u8 = 0x11;
const VERSION: i32 = 20140;
const LABEL_LEN: usize = 80;

// Word offsets in bytes.
const NX: usize = 0;
const NY: usize = 4;
const NZ: usize = 8;
const MODE: usize = 12;
const MX: usize = 28;
const CELLA: usize = 40;
const CELLB: usize = 52;
const MAPC: usize = 64;
const DMIN: usize = 76;
const DMAX: usize = 80;
const DMEAN: usize = 84;
const ISPG: usize = 88;
const NSYMBT: usize = 92;
const NVERSION: usize = 108;
const MAP: usize = 208;
const MACHST: usize = 212;
const NLABL: usize = 220;
const LABELS: usize = 224;

#[derive(Debug, Default)]
pub struct MrcFormat {
    extended: u64,
}

fn type_for_mode(mode: i32) -> Option<Type> {
    match mode {
        0 => Some(Type::int8()),
        1 => Some(Type::int16()),
        2 => Some(Type::float()),
        6 => Some(Type::uint16()),
        _ => None,
    }
}

fn mode_for_type(ty: Type) -> Option<i32> {
    [0, 1, 2, 6].into_iter().find(|mode| type_for_mode(*mode) == Some(ty))
}

impl ImageFormat for MrcFormat {
    fn name(&self) -> &'static str {
        "mrc"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mrc", "mrcs", "map", "st"]
    }

    fn read_header(&mut self, file: &mut File, path: &Path) -> Result<ImageHeader, Error> {
        let mut buf = [0u8; HEADER_SIZE];
        file::read_exact_at(file, path, 0, &mut buf).map_err(|err| {
            Error::new(ErrorKind::HeaderParse)
                .with_message("file is shorter than an MRC header")
                .with_path(path)
                .with_source(err)
        })?;
        let parse_error = |message: String| {
            Error::new(ErrorKind::HeaderParse)
                .with_message(message)
                .with_path(path)
        };
        if buf[MACHST] == MACHINE_BE_MARK {
            return Err(parse_error("big-endian MRC files are not supported".to_string()));
        }
        if &buf[MAP..MAP + 4] != MAP_TAG {
            debug!(path = %path.display(), "MRC header has no MAP tag; reading as pre-2000 layout");
        }
        let mode = read_i32(&buf, MODE);
        let ty = type_for_mode(mode).ok_or_else(|| parse_error(format!("unsupported MRC mode {mode}")))?;
        let nx = dimension(read_i32(&buf, NX), "x").map_err(|err| err.with_path(path))?;
        let ny = dimension(read_i32(&buf, NY), "y").map_err(|err| err.with_path(path))?;
        let nz = dimension(read_i32(&buf, NZ), "z").map_err(|err| err.with_path(path))?;
        let ispg = read_i32(&buf, ISPG);
        let nsymbt = read_i32(&buf, NSYMBT);
        self.extended = u64::try_from(nsymbt)
            .map_err(|_| parse_error(format!("negative extended header size {nsymbt}")))?;

        let dim = if ispg == 0 && nz > 1 {
            ArrayDim::new(nx, ny, 1, nz)
        } else {
            ArrayDim::new(nx, ny, nz, 1)
        };

        let mut values = ObjectDict::new();
        values.insert("mode".into(), Object::new(mode));
        values.insert("ispg".into(), Object::new(ispg));
        values.insert("dmin".into(), Object::new(read_f32(&buf, DMIN)));
        values.insert("dmax".into(), Object::new(read_f32(&buf, DMAX)));
        values.insert("dmean".into(), Object::new(read_f32(&buf, DMEAN)));
        let mx = read_i32(&buf, MX);
        if mx > 0 {
            values.insert("sampling".into(), Object::new(read_f32(&buf, CELLA) / mx as f32));
        }
        let nlabl = usize::try_from(read_i32(&buf, NLABL)).unwrap_or(0).min(10);
        if nlabl > 0 {
            values.insert("label".into(), Object::new(read_text(&buf, LABELS, LABEL_LEN)));
        }
        Ok(ImageHeader { dim, ty, values })
    }

    fn write_header(&mut self, file: &mut File, path: &Path, dim: ArrayDim, ty: Type) -> Result<(), Error> {
        if dim.z > 1 && dim.n > 1 {
            return Err(usage("volume stacks are not supported in MRC files").with_path(path));
        }
        let mode = mode_for_type(ty).ok_or_else(|| {
            Error::new(ErrorKind::UnsupportedConversion)
                .with_message(format!("MRC files cannot store {ty} elements"))
                .with_path(path)
        })?;
        let stack = dim.n > 1;
        let (nz, mz, ispg) = if stack {
            (dim.n, 1, 0)
        } else {
            (dim.z, dim.z, i32::from(dim.z > 1))
        };
        let fit = |value: usize| {
            i32::try_from(value).map_err(|_| usage(format!("dimension {value} does not fit an MRC header")))
        };
        let (nx, ny, nz, mz) = (fit(dim.x)?, fit(dim.y)?, fit(nz)?, fit(mz)?);

        let mut buf = [0u8; HEADER_SIZE];
        write_i32(&mut buf, NX, nx);
        write_i32(&mut buf, NY, ny);
        write_i32(&mut buf, NZ, nz);
        write_i32(&mut buf, MODE, mode);
        for (i, value) in [nx, ny, mz].into_iter().enumerate() {
            write_i32(&mut buf, MX + 4 * i, value);
            write_f32(&mut buf, CELLA + 4 * i, value as f32);
            write_f32(&mut buf, CELLB + 4 * i, 90.0);
            write_i32(&mut buf, MAPC + 4 * i, i as i32 + 1);
        }
        write_i32(&mut buf, ISPG, ispg);
        write_i32(&mut buf, NVERSION, VERSION);
        buf[MAP..MAP + 4].copy_from_slice(MAP_TAG);
        buf[MACHST..MACHST + 4].copy_from_slice(&MACHINE_LE);
        write_i32(&mut buf, NLABL, 1);
        write_text(&mut buf, LABELS, LABEL_LEN, "written by emio");
        self.extended = 0;
        file::write_all_at(file, path, 0, &buf)
    }

    fn header_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.extended
    }

    fn supports_type(&self, ty: Type) -> bool {
        mode_for_type(ty).is_some()
    }
}
