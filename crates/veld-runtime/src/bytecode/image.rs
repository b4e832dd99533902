//! Executable image format
//!
//! The compiler and the VM are separate processes in a full deployment; a
//! linked executable travels between them as a small binary image:
//!
//! ```text
//! magic "VELDBC\0"  (7 bytes)
//! version           (u16 LE, BYTECODE_VERSION)
//! code length       (u32 LE)
//! code bytes
//! crc32 of code     (u32 LE)
//! ```
//!
//! The loader rejects wrong magic, wrong version, truncation, and checksum
//! mismatches before any byte reaches the VM.

use super::{Bytecode, Executable, BYTECODE_VERSION};
use thiserror::Error;

const MAGIC: &[u8; 7] = b"VELDBC\0";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a veld bytecode image")]
    BadMagic,

    #[error("unsupported bytecode version {found} (expected {expected})")]
    BadVersion { found: u16, expected: u16 },

    #[error("image is truncated")]
    Truncated,

    #[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    BadChecksum { stored: u32, computed: u32 },
}

/// Serialize an executable to its image bytes.
pub fn to_bytes(exe: &Executable) -> Vec<u8> {
    let code = exe.code.as_slice();
    let mut out = Vec::with_capacity(MAGIC.len() + 2 + 4 + code.len() + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
    out.extend_from_slice(&(code.len() as u32).to_le_bytes());
    out.extend_from_slice(code);
    out.extend_from_slice(&crc32fast::hash(code).to_le_bytes());
    out
}

/// Parse an image produced by [`to_bytes`].
pub fn from_bytes(bytes: &[u8]) -> Result<Executable, ImageError> {
    fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], ImageError> {
        if *at + n > bytes.len() {
            return Err(ImageError::Truncated);
        }
        let slice = &bytes[*at..*at + n];
        *at += n;
        Ok(slice)
    }

    let mut at = 0;
    if take(bytes, &mut at, MAGIC.len())? != MAGIC {
        return Err(ImageError::BadMagic);
    }

    let version = u16::from_le_bytes(take(bytes, &mut at, 2)?.try_into().unwrap());
    if version != BYTECODE_VERSION {
        return Err(ImageError::BadVersion {
            found: version,
            expected: BYTECODE_VERSION,
        });
    }

    let len = u32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap()) as usize;
    let code = take(bytes, &mut at, len)?.to_vec();
    let stored = u32::from_le_bytes(take(bytes, &mut at, 4)?.try_into().unwrap());
    let computed = crc32fast::hash(&code);
    if stored != computed {
        return Err(ImageError::BadChecksum { stored, computed });
    }

    Ok(Executable::new(Bytecode::from_bytes(code)))
}

/// Write an executable image to a file.
pub fn save(exe: &Executable, path: &std::path::Path) -> Result<(), ImageError> {
    std::fs::write(path, to_bytes(exe))?;
    Ok(())
}

/// Read an executable image from a file.
pub fn load(path: &std::path::Path) -> Result<Executable, ImageError> {
    from_bytes(&std::fs::read(path)?)
}
