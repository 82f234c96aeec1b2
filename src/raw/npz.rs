//! Uncompressed `.npz` archives: a stored ZIP of `.npy` members.

use std::io::Write;

use crate::error::{Error, Result};

use super::npy::{npy_bytes, RawData};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
/// ZIP 2.0, the minimum for stored entries with directories.
const ZIP_VERSION: u16 = 20;
const METHOD_STORED: u16 = 0;
/// 1980-01-01 00:00:00 in MS-DOS format.
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;

struct Member {
    name: String,
    crc: u32,
    size: u32,
    offset: u32,
}

fn u32_field(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::UnsupportedFormat(format!("npz {what} exceeds the 4 GiB ZIP limit")))
}

/// Streaming `.npz` writer. Call [`NpzWriter::finish`] to write the
/// central directory.
pub struct NpzWriter<W: Write> {
    writer: W,
    offset: usize,
    members: Vec<Member>,
}

impl<W: Write> NpzWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            offset: 0,
            members: Vec::new(),
        }
    }

    /// Append one array as `<name>.npy`.
    ///
    /// # Errors
    ///
    /// Returns an error for shape mismatches, oversized members, or I/O failures.
    pub fn add_array(&mut self, name: &str, shape: &[usize], data: RawData<'_>) -> Result<()> {
        let entry_name = format!("{name}.npy");
        let payload = npy_bytes(shape, data)?;
        let crc = crc32fast::hash(&payload);
        let size = u32_field(payload.len(), "member size")?;
        let offset = u32_field(self.offset, "offset")?;
        let name_len = u16::try_from(entry_name.len()).map_err(|_| {
            Error::UnsupportedFormat(format!("npz member name '{name}' is too long"))
        })?;

        let mut header = Vec::with_capacity(30 + entry_name.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&ZIP_VERSION.to_le_bytes());
        header.extend_from_slice(&0_u16.to_le_bytes()); // flags
        header.extend_from_slice(&METHOD_STORED.to_le_bytes());
        header.extend_from_slice(&DOS_TIME.to_le_bytes());
        header.extend_from_slice(&DOS_DATE.to_le_bytes());
        header.extend_from_slice(&crc.to_le_bytes());
        header.extend_from_slice(&size.to_le_bytes()); // compressed
        header.extend_from_slice(&size.to_le_bytes()); // uncompressed
        header.extend_from_slice(&name_len.to_le_bytes());
        header.extend_from_slice(&0_u16.to_le_bytes()); // extra
        header.extend_from_slice(entry_name.as_bytes());

        self.writer.write_all(&header)?;
        self.writer.write_all(&payload)?;
        self.offset += header.len() + payload.len();

        tracing::trace!("npz member {entry_name}: {size} bytes, crc {crc:08x}");
        self.members.push(Member {
            name: entry_name,
            crc,
            size,
            offset,
        });
        Ok(())
    }

    /// Write the central directory and return the inner writer.
    ///
    /// # Errors
    ///
    /// Returns an error for too many members or I/O failures.
    pub fn finish(mut self) -> Result<W> {
        let cd_start = u32_field(self.offset, "central directory offset")?;
        let count = u16::try_from(self.members.len())
            .map_err(|_| Error::UnsupportedFormat("npz holds too many members".to_string()))?;

        let mut directory = Vec::new();
        for m in &self.members {
            // lengths were range-checked in add_array
            #[allow(clippy::cast_possible_truncation)]
            let name_len = m.name.len() as u16;
            directory.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            directory.extend_from_slice(&ZIP_VERSION.to_le_bytes()); // made by
            directory.extend_from_slice(&ZIP_VERSION.to_le_bytes()); // needed
            directory.extend_from_slice(&0_u16.to_le_bytes()); // flags
            directory.extend_from_slice(&METHOD_STORED.to_le_bytes());
            directory.extend_from_slice(&DOS_TIME.to_le_bytes());
            directory.extend_from_slice(&DOS_DATE.to_le_bytes());
            directory.extend_from_slice(&m.crc.to_le_bytes());
            directory.extend_from_slice(&m.size.to_le_bytes());
            directory.extend_from_slice(&m.size.to_le_bytes());
            directory.extend_from_slice(&name_len.to_le_bytes());
            directory.extend_from_slice(&0_u16.to_le_bytes()); // extra
            directory.extend_from_slice(&0_u16.to_le_bytes()); // comment
            directory.extend_from_slice(&0_u16.to_le_bytes()); // disk
            directory.extend_from_slice(&0_u16.to_le_bytes()); // internal attrs
            directory.extend_from_slice(&0_u32.to_le_bytes()); // external attrs
            directory.extend_from_slice(&m.offset.to_le_bytes());
            directory.extend_from_slice(m.name.as_bytes());
        }
        let cd_size = u32_field(directory.len(), "central directory")?;

        directory.extend_from_slice(&END_OF_CENTRAL_SIG.to_le_bytes());
        directory.extend_from_slice(&0_u16.to_le_bytes()); // this disk
        directory.extend_from_slice(&0_u16.to_le_bytes()); // directory disk
        directory.extend_from_slice(&count.to_le_bytes());
        directory.extend_from_slice(&count.to_le_bytes());
        directory.extend_from_slice(&cd_size.to_le_bytes());
        directory.extend_from_slice(&cd_start.to_le_bytes());
        directory.extend_from_slice(&0_u16.to_le_bytes()); // comment

        self.writer.write_all(&directory)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Build a single-member `.npz` archive in memory.
///
/// # Errors
///
/// See [`NpzWriter::add_array`].
pub fn npz_bytes(name: &str, shape: &[usize], data: RawData<'_>) -> Result<Vec<u8>> {
    let mut npz = NpzWriter::new(Vec::new());
    npz.add_array(name, shape, data)?;
    npz.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    use npyz::NpyFile;

    #[test]
    fn test_signature_and_embedded_npy() {
        let bytes = npz_bytes("arr0", &[4], RawData::Uint8(&[0, 1, 2, 3])).unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");
        assert!(bytes.windows(6).any(|w| w == b"\x93NUMPY"));
        assert!(bytes.windows(8).any(|w| w == b"arr0.npy"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let a = npz_bytes("arr0", &[2, 2], RawData::Float32(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        let b = npz_bytes("arr0", &[2, 2], RawData::Float32(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zip_reader_accepts_archive() {
        let data = [0.5_f32, 1.5, -2.0, 4.0, 8.0, 16.0];
        let mut npz = NpzWriter::new(Vec::new());
        npz.add_array("arr0", &[1, 2, 3], RawData::Float32(&data)).unwrap();
        npz.add_array("mask", &[2, 3], RawData::Uint8(&[1, 0, 1, 0, 1, 0])).unwrap();
        let bytes = npz.finish().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut member = archive.by_name("arr0.npy").unwrap();
        let mut payload = Vec::new();
        member.read_to_end(&mut payload).unwrap();
        drop(member);

        let npy = NpyFile::new(&payload[..]).unwrap();
        assert_eq!(npy.shape(), &[1, 2, 3]);
        let back: Vec<f32> = npy.into_vec().unwrap();
        assert_eq!(back, data);

        assert!(archive.by_name("mask.npy").is_ok());
    }

    #[test]
    fn test_crc_matches_payload() {
        let bytes = npz_bytes("x", &[3], RawData::Uint8(&[7, 8, 9])).unwrap();
        let npy = npy_bytes(&[3], RawData::Uint8(&[7, 8, 9])).unwrap();
        let crc = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
        assert_eq!(crc, crc32fast::hash(&npy));
    }
}
