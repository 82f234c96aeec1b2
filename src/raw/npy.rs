//! NumPy `.npy` (format version 1.0) serialization.

use std::io::Write;

use crate::error::{Error, Result};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const VERSION: [u8; 2] = [1, 0];
/// Header blocks are padded to this alignment.
const ALIGN: usize = 16;
/// Magic, version and the u16 length field.
const PREAMBLE: usize = MAGIC.len() + VERSION.len() + 2;

/// Element data of an array to serialize.
#[derive(Debug, Clone, Copy)]
pub enum RawData<'a> {
    Float32(&'a [f32]),
    Uint8(&'a [u8]),
}

impl RawData<'_> {
    /// NumPy dtype descriptor.
    #[must_use]
    pub fn descr(&self) -> &'static str {
        match self {
            Self::Float32(_) => "<f4",
            Self::Uint8(_) => "|u1",
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(d) => d.len(),
            Self::Uint8(d) => d.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn shape_tuple(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({single},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(ToString::to_string).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// The padded header dictionary, newline included.
fn header(descr: &str, shape: &[usize]) -> String {
    let mut dict = format!(
        "{{'descr': '{descr}', 'fortran_order': False, 'shape': {}, }}",
        shape_tuple(shape)
    );
    let unpadded = PREAMBLE + dict.len() + 1;
    let pad = (ALIGN - unpadded % ALIGN) % ALIGN;
    dict.extend(std::iter::repeat(' ').take(pad));
    dict.push('\n');
    dict
}

/// Stream a C-order array to `writer`.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] when `shape` does not cover `data`, or
/// an I/O error from the writer.
pub fn write_npy_to<W: Write>(writer: &mut W, shape: &[usize], data: RawData<'_>) -> Result<()> {
    let count: usize = shape.iter().product();
    if count != data.len() {
        return Err(Error::ShapeMismatch {
            expected: format!("{shape:?} ({count} values)"),
            actual: format!("{} values", data.len()),
        });
    }

    let header = header(data.descr(), shape);
    let header_len = u16::try_from(header.len()).map_err(|_| {
        Error::UnsupportedFormat(format!("npy header of {} bytes is too long", header.len()))
    })?;

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION)?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;

    match data {
        RawData::Float32(values) => {
            for v in values {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        RawData::Uint8(bytes) => writer.write_all(bytes)?,
    }
    Ok(())
}

/// Serialize an array to an in-memory `.npy` buffer.
///
/// # Errors
///
/// See [`write_npy_to`].
pub fn npy_bytes(shape: &[usize], data: RawData<'_>) -> Result<Vec<u8>> {
    let elem = match data {
        RawData::Float32(_) => 4,
        RawData::Uint8(_) => 1,
    };
    let mut buf = Vec::with_capacity(128 + data.len() * elem);
    write_npy_to(&mut buf, shape, data)?;
    Ok(buf)
}
