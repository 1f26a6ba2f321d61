//! Commit log framing.
//!
//! Every engine commit appends exactly one batch record:
//!
//! ```text
//! | magic "KVLG" (4) | version (2) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it. The
//! payload is a canonical CBOR array of operations.

use crate::error::{CoreError, CoreResult};
use kindb_codec::{CanonicalDecoder, CanonicalEncoder};
use kindb_storage::StorageError;

/// Magic bytes at the start of every batch record.
pub const LOG_MAGIC: [u8; 4] = *b"KVLG";

/// Current batch record version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;

const OP_PUT: u64 = 0;
const OP_DELETE: u64 = 1;
const OP_PUT_DUP: u64 = 2;
const OP_DELETE_DUP: u64 = 3;
const OP_CLEAR: u64 = 4;

/// One logged mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Insert or replace a key in a unique table.
    Put {
        /// Table name.
        table: &'static str,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key from a unique table.
    Delete {
        /// Table name.
        table: &'static str,
        /// Key bytes.
        key: Vec<u8>,
    },
    /// Add one value under a key of a duplicate-key table.
    PutDup {
        /// Table name.
        table: &'static str,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove one value under a key of a duplicate-key table.
    DeleteDup {
        /// Table name.
        table: &'static str,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove every entry of a table.
    Clear {
        /// Table name.
        table: &'static str,
    },
}

impl KvOp {
    /// The table this operation mutates.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            KvOp::Put { table, .. }
            | KvOp::Delete { table, .. }
            | KvOp::PutDup { table, .. }
            | KvOp::DeleteDup { table, .. }
            | KvOp::Clear { table } => table,
        }
    }
}

/// Encodes a batch of operations as a CBOR payload.
pub(crate) fn encode_batch(ops: &[KvOp]) -> Vec<u8> {
    let mut enc = CanonicalEncoder::new();
    enc.array(ops.len());
    for op in ops {
        match op {
            KvOp::Put { table, key, value } => {
                enc.array(4).uint(OP_PUT).text(table).bytes(key).bytes(value);
            }
            KvOp::Delete { table, key } => {
                enc.array(3).uint(OP_DELETE).text(table).bytes(key);
            }
            KvOp::PutDup { table, key, value } => {
                enc.array(4).uint(OP_PUT_DUP).text(table).bytes(key).bytes(value);
            }
            KvOp::DeleteDup { table, key, value } => {
                enc.array(4)
                    .uint(OP_DELETE_DUP)
                    .text(table)
                    .bytes(key)
                    .bytes(value);
            }
            KvOp::Clear { table } => {
                enc.array(2).uint(OP_CLEAR).text(table);
            }
        }
    }
    enc.into_bytes()
}

/// Decodes a batch payload. `resolve` maps a stored table name to the
/// engine's table name and rejects unknown tables.
pub(crate) fn decode_batch(
    payload: &[u8],
    resolve: impl Fn(&str) -> Option<&'static str>,
) -> CoreResult<Vec<KvOp>> {
    let mut dec = CanonicalDecoder::new(payload);
    let count = dec.read_array_len()?;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let len = dec.read_array_len()?;
        let code = dec.read_uint()?;
        let name = dec.read_text()?;
        let table = resolve(name).ok_or_else(|| {
            CoreError::Storage(StorageError::corrupted(format!(
                "log references unknown table {name:?}"
            )))
        })?;
        let op = match (code, len) {
            (OP_PUT, 4) => KvOp::Put {
                table,
                key: dec.read_bytes()?.to_vec(),
                value: dec.read_bytes()?.to_vec(),
            },
            (OP_DELETE, 3) => KvOp::Delete {
                table,
                key: dec.read_bytes()?.to_vec(),
            },
            (OP_PUT_DUP, 4) => KvOp::PutDup {
                table,
                key: dec.read_bytes()?.to_vec(),
                value: dec.read_bytes()?.to_vec(),
            },
            (OP_DELETE_DUP, 4) => KvOp::DeleteDup {
                table,
                key: dec.read_bytes()?.to_vec(),
                value: dec.read_bytes()?.to_vec(),
            },
            (OP_CLEAR, 2) => KvOp::Clear { table },
            _ => {
                return Err(CoreError::Storage(StorageError::corrupted(format!(
                    "invalid log operation {code} with {len} fields"
                ))))
            }
        };
        ops.push(op);
    }
    dec.finish()?;
    Ok(ops)
}

/// Wraps a payload in the batch record envelope.
pub(crate) fn frame(payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("commit batch exceeds 4 GiB"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&LOG_MAGIC);
    data.extend_from_slice(&LOG_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning a log image.
#[derive(Debug)]
pub(crate) struct LogScan<'a> {
    /// Payloads of all complete, verified records in order.
    pub payloads: Vec<&'a [u8]>,
    /// Length of the verified prefix.
    pub valid_len: u64,
}

/// Splits a log image into verified payloads.
///
/// A trailing partial record is a torn write and ends the scan; the caller
/// truncates the log to `valid_len`. A complete record with a bad magic,
/// version or checksum is corruption.
pub(crate) fn scan(data: &[u8]) -> CoreResult<LogScan<'_>> {
    let mut payloads = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < HEADER_SIZE {
            break;
        }
        if rest[..4] != LOG_MAGIC {
            return Err(corrupted(offset, "bad magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != LOG_VERSION {
            return Err(corrupted(offset, &format!("unsupported version {version}")));
        }
        let len = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]) as usize;
        let total = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }

        let body = &rest[..HEADER_SIZE + len];
        let stored = u32::from_le_bytes([
            rest[HEADER_SIZE + len],
            rest[HEADER_SIZE + len + 1],
            rest[HEADER_SIZE + len + 2],
            rest[HEADER_SIZE + len + 3],
        ]);
        let actual = compute_crc32(body);
        if stored != actual {
            return Err(corrupted(
                offset,
                &format!("checksum mismatch: expected {stored:08x}, got {actual:08x}"),
            ));
        }

        payloads.push(&body[HEADER_SIZE..]);
        offset += total;
    }

    Ok(LogScan {
        payloads,
        valid_len: offset as u64,
    })
}

fn corrupted(offset: usize, what: &str) -> CoreError {
    CoreError::Storage(StorageError::corrupted(format!(
        "commit log record at offset {offset}: {what}"
    )))
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
