//! On-disk layout of the task log.
//!
//! ```text
//! header:  version u8 | live_count u64
//! record:  tombstone u8 | body_len u32 | retry_count u32
//!          | type_len u32 | type bytes | payload_len u32 | payload bytes
//! ```
//!
//! All integers are big-endian. `body_len` counts every byte after the
//! `body_len` field itself, so a reader can skip a record after reading only
//! its five-byte prefix. Records never move except during compaction; only
//! the tombstone byte, the retry count and the header are rewritten in place.

use crate::domain::{QueueError, Task};

pub(crate) const FORMAT_VERSION: u8 = 1;

pub(crate) const HEADER_LEN: u64 = 1 + 8;

/// `tombstone` + `body_len`.
pub(crate) const PREFIX_LEN: u64 = 1 + 4;

/// Offset of `retry_count` from the start of a record.
pub(crate) const RETRY_COUNT_OFFSET: u64 = PREFIX_LEN;

pub(crate) const ALIVE: u8 = 0;
pub(crate) const TOMBSTONED: u8 = 1;

/// Fixed part of a body: retry_count, type_len, payload_len.
const BODY_FIXED_LEN: usize = 4 + 4 + 4;

pub(crate) fn encode_header(live_count: u64) -> [u8; HEADER_LEN as usize] {
    let mut buf = [0u8; HEADER_LEN as usize];
    buf[0] = FORMAT_VERSION;
    buf[1..].copy_from_slice(&live_count.to_be_bytes());
    buf
}

/// Decode a header and return its live count.
pub(crate) fn decode_header(buf: &[u8; HEADER_LEN as usize]) -> Result<u64, QueueError> {
    if buf[0] != FORMAT_VERSION {
        return Err(QueueError::UnsupportedVersion(buf[0]));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&buf[1..]);
    Ok(u64::from_be_bytes(count))
}

/// Serialize a fresh (alive, never retried) record.
pub(crate) fn encode_record(task: &Task) -> Result<Vec<u8>, QueueError> {
    let task_type = task.task_type().as_bytes();
    let payload = task.payload().as_bytes();

    let type_len = u32::try_from(task_type.len()).map_err(|_| QueueError::RecordTooLarge {
        field: "task type",
        len: task_type.len(),
    })?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| QueueError::RecordTooLarge {
        field: "payload",
        len: payload.len(),
    })?;
    let body_len = BODY_FIXED_LEN
        .checked_add(task_type.len())
        .and_then(|n| n.checked_add(payload.len()))
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(QueueError::RecordTooLarge {
            field: "record body",
            len: task_type.len().saturating_add(payload.len()),
        })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN as usize + body_len as usize);
    buf.push(ALIVE);
    buf.extend_from_slice(&body_len.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&type_len.to_be_bytes());
    buf.extend_from_slice(task_type);
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// The five bytes every reader looks at first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordPrefix {
    pub tombstoned: bool,
    pub body_len: u32,
}

impl RecordPrefix {
    /// Total size of the record this prefix belongs to.
    pub fn record_len(&self) -> u64 {
        PREFIX_LEN + u64::from(self.body_len)
    }
}

pub(crate) fn decode_prefix(
    buf: &[u8; PREFIX_LEN as usize],
    offset: u64,
) -> Result<RecordPrefix, QueueError> {
    let tombstoned = match buf[0] {
        ALIVE => false,
        TOMBSTONED => true,
        other => {
            return Err(QueueError::corrupted(
                offset,
                format!("invalid tombstone byte {other:#04x}"),
            ));
        }
    };
    let body_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if (body_len as usize) < BODY_FIXED_LEN {
        return Err(QueueError::corrupted(
            offset,
            format!("body length {body_len} is shorter than the fixed fields"),
        ));
    }
    Ok(RecordPrefix {
        tombstoned,
        body_len,
    })
}

/// Decode a record body (everything after the prefix) into its retry count
/// and task. `offset` is the record offset, used in error messages.
pub(crate) fn decode_body(body: &[u8], offset: u64) -> Result<(u32, Task), QueueError> {
    let mut cursor = BodyCursor { body, pos: 0, offset };
    let retry_count = cursor.u32()?;
    let type_len = cursor.u32()? as usize;
    let task_type = cursor.utf8(type_len, "task type")?;
    let payload_len = cursor.u32()? as usize;
    let payload = cursor.utf8(payload_len, "payload")?;
    if cursor.pos != body.len() {
        return Err(QueueError::corrupted(
            offset,
            format!(
                "body length {} disagrees with field lengths ({} bytes used)",
                body.len(),
                cursor.pos
            ),
        ));
    }
    Ok((retry_count, Task::new(task_type, payload)))
}

struct BodyCursor<'a> {
    body: &'a [u8],
    pos: usize,
    offset: u64,
}

impl<'a> BodyCursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], QueueError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| {
                QueueError::corrupted(
                    self.offset,
                    format!("field of {len} bytes overruns the record body"),
                )
            })?;
        let bytes = &self.body[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, QueueError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn utf8(&mut self, len: usize, field: &str) -> Result<String, QueueError> {
        let offset = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| QueueError::corrupted(offset, format!("{field} is not UTF-8: {e}")))
    }
}
