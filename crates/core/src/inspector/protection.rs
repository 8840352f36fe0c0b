//! Password protection detection for common attachment containers.
//!
//! Only the container metadata is examined; nothing is decrypted or decompressed.

use serde::{Deserialize, Serialize};

const ZIP_LOCAL: &[u8] = b"PK\x03\x04";
const ZIP_CENTRAL: &[u8] = b"PK\x01\x02";
const ZIP_END: &[u8] = b"PK\x05\x06";
const ZIP_LOCAL_HEADER_LEN: usize = 30;
const ZIP_FLAG_ENCRYPTED: u16 = 0x0001;
const ZIP_FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const PDF_MAGIC: &[u8] = b"%PDF-";
const PDF_ENCRYPT: &[u8] = b"/Encrypt";

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const OLE_HEADER_LEN: usize = 512;

/// Container formats that can carry a password.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    Zip,
    Pdf,
    /// OLE compound file (legacy Office, or an encrypted OOXML wrapper).
    OfficeCompound,
}

/// Verdict for one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Encrypted(ContainerFormat),
    /// Not password protected. `None` when the format is not a known container.
    Unencrypted(Option<ContainerFormat>),
}

impl Protection {
    pub fn is_protected(&self) -> bool {
        matches!(self, Protection::Encrypted(_))
    }

    pub fn container(&self) -> Option<ContainerFormat> {
        match self {
            Protection::Encrypted(format) => Some(*format),
            Protection::Unencrypted(format) => *format,
        }
    }
}

/// Classify attachment bytes.
///
/// Returns `Err` with a reason when the bytes carry a known container signature
/// but the container is truncated or otherwise unreadable.
pub fn detect_protection(bytes: &[u8]) -> Result<Protection, String> {
    if bytes.starts_with(ZIP_LOCAL) || bytes.starts_with(ZIP_END) {
        return zip_is_encrypted(bytes).map(|encrypted| {
            if encrypted {
                Protection::Encrypted(ContainerFormat::Zip)
            } else {
                Protection::Unencrypted(Some(ContainerFormat::Zip))
            }
        });
    }

    if bytes.starts_with(PDF_MAGIC) {
        if bytes.len() <= PDF_MAGIC.len() + 3 {
            return Err("PDF header without a body".to_string());
        }
        return Ok(if contains(bytes, PDF_ENCRYPT) {
            Protection::Encrypted(ContainerFormat::Pdf)
        } else {
            Protection::Unencrypted(Some(ContainerFormat::Pdf))
        });
    }

    if bytes.starts_with(OLE_MAGIC) {
        if bytes.len() < OLE_HEADER_LEN {
            return Err(format!(
                "compound file header truncated at {} bytes",
                bytes.len()
            ));
        }
        let encrypted = contains(bytes, &utf16le("EncryptionInfo"))
            || contains(bytes, &utf16le("EncryptedPackage"));
        return Ok(if encrypted {
            Protection::Encrypted(ContainerFormat::OfficeCompound)
        } else {
            Protection::Unencrypted(Some(ContainerFormat::OfficeCompound))
        });
    }

    Ok(Protection::Unencrypted(None))
}

fn zip_is_encrypted(bytes: &[u8]) -> Result<bool, String> {
    if bytes.starts_with(ZIP_END) {
        // Empty archive: only the end-of-central-directory record.
        return Ok(false);
    }
    if bytes.len() < ZIP_LOCAL_HEADER_LEN {
        return Err("truncated local file header".to_string());
    }

    // Walk local file headers while their sizes are known up front.
    let mut offset = 0usize;
    while offset + ZIP_LOCAL_HEADER_LEN <= bytes.len() && bytes[offset..].starts_with(ZIP_LOCAL) {
        let flags = read_u16(bytes, offset + 6);
        if flags & ZIP_FLAG_ENCRYPTED != 0 {
            return Ok(true);
        }
        if flags & ZIP_FLAG_DATA_DESCRIPTOR != 0 {
            break;
        }
        let compressed = read_u32(bytes, offset + 18) as usize;
        let name_len = read_u16(bytes, offset + 26) as usize;
        let extra_len = read_u16(bytes, offset + 28) as usize;
        match ZIP_LOCAL_HEADER_LEN
            .checked_add(name_len)
            .and_then(|n| n.checked_add(extra_len))
            .and_then(|n| n.checked_add(compressed))
            .and_then(|n| n.checked_add(offset))
        {
            Some(next) => offset = next,
            None => break,
        }
    }

    // The central directory repeats the flags for every entry.
    let mut pos = 0usize;
    while let Some(found) = find(&bytes[pos..], ZIP_CENTRAL) {
        let start = pos + found;
        if start + 10 <= bytes.len() && read_u16(bytes, start + 8) & ZIP_FLAG_ENCRYPTED != 0 {
            return Ok(true);
        }
        pos = start + ZIP_CENTRAL.len();
    }

    Ok(false)
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}
