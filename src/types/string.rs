use crate::types::{error::DatabaseError, read_u16};

pub const SHORT_STRING_MAX_LEN: usize = 126;
pub const LONG_ASCII_KIND: u8 = 0x40;
pub const LONG_UTF16_KIND: u8 = 0x90;
pub const LONG_HEADER_SIZE: usize = 4;

/// Encoding variant of a DeviceSQL string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    ShortAscii,
    LongAscii,
    LongUtf16,
}

/// A decoded DeviceSQL string: where it sits and how many bytes it claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceString {
    pub kind: StringKind,
    pub offset: usize,
    /// Total bytes including the length prefix.
    pub total_len: usize,
    pub text: String,
}

impl DeviceString {
    pub fn end(&self) -> usize {
        self.offset + self.total_len
    }
}

/// Read the length prefix at `offset` without touching the payload.
/// Returns the kind and the total byte length the prefix claims.
pub fn peek_prefix(bytes: &[u8], offset: usize) -> Result<(StringKind, usize), DatabaseError> {
    let Some(&flags) = bytes.get(offset) else {
        return Err(DatabaseError::InvalidString {
            offset,
            reason: "prefix beyond buffer".to_string(),
        });
    };

    if flags & 0x01 == 1 {
        let total = (flags >> 1) as usize;
        if total == 0 {
            return Err(DatabaseError::InvalidString {
                offset,
                reason: "short string with zero length".to_string(),
            });
        }
        return Ok((StringKind::ShortAscii, total));
    }

    let kind = match flags {
        LONG_ASCII_KIND => StringKind::LongAscii,
        LONG_UTF16_KIND => StringKind::LongUtf16,
        other => {
            return Err(DatabaseError::InvalidString {
                offset,
                reason: format!("unknown string kind {:#04x}", other),
            });
        }
    };
    if offset + LONG_HEADER_SIZE > bytes.len() {
        return Err(DatabaseError::InvalidString {
            offset,
            reason: "long string header truncated".to_string(),
        });
    }
    let total = read_u16(bytes, offset + 1) as usize;
    if total < LONG_HEADER_SIZE {
        return Err(DatabaseError::InvalidString {
            offset,
            reason: format!("long string length {} shorter than its header", total),
        });
    }
    Ok((kind, total))
}

/// Decode the string at `offset`, refusing anything that runs past `limit`.
pub fn decode(bytes: &[u8], offset: usize, limit: usize) -> Result<DeviceString, DatabaseError> {
    let (kind, total_len) = peek_prefix(bytes, offset)?;
    let limit = limit.min(bytes.len());
    if offset + total_len > limit {
        return Err(DatabaseError::InvalidString {
            offset,
            reason: format!("length {} overruns boundary {}", total_len, limit),
        });
    }

    let text = match kind {
        StringKind::ShortAscii => {
            String::from_utf8_lossy(&bytes[offset + 1..offset + total_len]).into_owned()
        }
        StringKind::LongAscii => {
            String::from_utf8_lossy(&bytes[offset + LONG_HEADER_SIZE..offset + total_len])
                .into_owned()
        }
        StringKind::LongUtf16 => {
            let units: Vec<u16> = bytes[offset + LONG_HEADER_SIZE..offset + total_len]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
    };

    Ok(DeviceString {
        kind,
        offset,
        total_len,
        text,
    })
}

/// Encode `text` the way exports do: short ASCII when it fits, long ASCII for
/// longer ASCII, UTF-16LE otherwise.
pub fn encode(text: &str) -> Vec<u8> {
    if text.is_ascii() && text.len() <= SHORT_STRING_MAX_LEN {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.push((((text.len() + 1) << 1) | 1) as u8);
        bytes.extend_from_slice(text.as_bytes());
        return bytes;
    }

    let (kind, payload) = if text.is_ascii() {
        (LONG_ASCII_KIND, text.as_bytes().to_vec())
    } else {
        let payload: Vec<u8> = text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect();
        (LONG_UTF16_KIND, payload)
    };
    let total = (payload.len() + LONG_HEADER_SIZE) as u16;
    let mut bytes = Vec::with_capacity(total as usize);
    bytes.push(kind);
    bytes.extend_from_slice(&total.to_le_bytes());
    bytes.push(0);
    bytes.extend_from_slice(&payload);
    bytes
}

/// Length prefix for a string of `kind` spanning exactly `total_len` bytes.
/// Returns `None` when a short string cannot be that long.
pub fn prefix_for(kind: StringKind, total_len: usize) -> Option<Vec<u8>> {
    match kind {
        StringKind::ShortAscii => {
            if total_len == 0 || total_len > SHORT_STRING_MAX_LEN + 1 {
                return None;
            }
            Some(vec![((total_len << 1) | 1) as u8])
        }
        StringKind::LongAscii | StringKind::LongUtf16 => {
            if total_len < LONG_HEADER_SIZE || total_len > u16::MAX as usize {
                return None;
            }
            let kind_byte = if kind == StringKind::LongAscii {
                LONG_ASCII_KIND
            } else {
                LONG_UTF16_KIND
            };
            let mut prefix = vec![kind_byte];
            prefix.extend_from_slice(&(total_len as u16).to_le_bytes());
            Some(prefix)
        }
    }
}
