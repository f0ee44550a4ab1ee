//! Low-level FCIO wire layout.
//!
//! Byte offsets and sizes of every fixed-size structure in the stream, plus
//! bounds-checked little-endian field readers used by the record decoders.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FcioError, Result};

/// Size of one waveform sample on the wire.
pub const SAMPLE_SIZE: usize = 2;

// ============================================================================
// Record header
// [0..4] i32 tag | [4..8] u32 payload length
// ============================================================================

pub const RECORD_HEADER_SIZE: usize = 8;

// ============================================================================
// Config
// 11 x i32 geometry fields, then (nadcs + ntriggers) x u32 tracemap
// ============================================================================

pub const CONFIG_FIELDS: usize = 11;
pub const CONFIG_HEADER_SIZE: usize = CONFIG_FIELDS * 4;

// ============================================================================
// Event header (Event and SparseEvent)
// [0] i32 type | [4] f32 pulser | [8] 10 x i32 timeoffset
// [48] 10 x i32 timestamp | [88] 10 x i32 deadregion
// ============================================================================

/// Slots reserved on the wire for each of timeoffset, timestamp and deadregion.
pub const EVENT_ARRAY_SLOTS: usize = 10;
pub const EVENT_TYPE_OFFSET: usize = 0;
pub const EVENT_PULSER_OFFSET: usize = 4;
pub const EVENT_TIMEOFFSET_OFFSET: usize = 8;
pub const EVENT_TIMESTAMP_OFFSET: usize = EVENT_TIMEOFFSET_OFFSET + EVENT_ARRAY_SLOTS * 4;
pub const EVENT_DEADREGION_OFFSET: usize = EVENT_TIMESTAMP_OFFSET + EVENT_ARRAY_SLOTS * 4;
pub const EVENT_HEADER_SIZE: usize = EVENT_DEADREGION_OFFSET + EVENT_ARRAY_SLOTS * 4;

/// Meaningful entries of the three event header arrays.
pub const TIMEOFFSET_LEN: usize = 7;
pub const TIMESTAMP_LEN: usize = 4;
pub const DEADREGION_LEN: usize = 5;

/// Size of the `numtraces` prefix of a sparse event body.
pub const SPARSE_COUNT_SIZE: usize = 4;

// ============================================================================
// Status
// [0] i32 status | [4] 5 x i32 statustime | [24] i32 cards | [28] i32 size
// ============================================================================

pub const STATUSTIME_SLOTS: usize = 5;
pub const STATUSTIME_LEN: usize = 4;
pub const STATUS_HEADER_SIZE: usize = 4 + STATUSTIME_SLOTS * 4 + 4 + 4;

// ============================================================================
// CardStatus
// 16 x u32 header, then u16 environment[numenv], ctierrors[numctilinks],
// linkerrors[numlinks], enverrors[numlinks]
// ============================================================================

pub const CARD_HEADER_WORDS: usize = 16;
pub const CARD_HEADER_SIZE: usize = CARD_HEADER_WORDS * 4;
pub const CARD_OTHER_ERRORS: usize = 5;

/// Word indices of the card header fields.
pub mod card {
    pub const REQID: usize = 0;
    pub const STATUS: usize = 1;
    pub const EVENTNO: usize = 2;
    pub const PPS: usize = 3;
    pub const TICKS: usize = 4;
    pub const MAXTICKS: usize = 5;
    pub const NUMENV: usize = 6;
    pub const NUMCTILINKS: usize = 7;
    pub const NUMLINKS: usize = 8;
    pub const DUMMY: usize = 9;
    pub const TOTALERRORS: usize = 10;
    pub const OTHERERRORS: usize = 11;
}

/// Byte size of one channel slot holding `nsamples` waveform samples.
#[inline]
pub fn channel_stride(nsamples: usize) -> usize {
    (nsamples + 2) * SAMPLE_SIZE
}

/// Bytes taken by one card with the given array counts.
#[inline]
pub fn card_size(numenv: usize, numctilinks: usize, numlinks: usize) -> usize {
    CARD_HEADER_SIZE + (numenv + numctilinks + 2 * numlinks) * SAMPLE_SIZE
}

// ============================================================================
// Field readers
// ============================================================================

fn field<'a>(buf: &'a [u8], offset: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| {
            FcioError::framing(format!(
                "{what} at offset {offset} exceeds payload of {} bytes",
                buf.len()
            ))
        })
}

/// Reads an `i32` at `offset`.
#[inline]
pub fn read_i32(buf: &[u8], offset: usize, what: &str) -> Result<i32> {
    field(buf, offset, 4, what).map(LittleEndian::read_i32)
}

/// Reads a `u32` at `offset`.
#[inline]
pub fn read_u32(buf: &[u8], offset: usize, what: &str) -> Result<u32> {
    field(buf, offset, 4, what).map(LittleEndian::read_u32)
}

/// Reads an `f32` at `offset`.
#[inline]
pub fn read_f32(buf: &[u8], offset: usize, what: &str) -> Result<f32> {
    field(buf, offset, 4, what).map(LittleEndian::read_f32)
}

/// Reads `N` consecutive `i32` values starting at `offset`.
pub fn read_i32_array<const N: usize>(buf: &[u8], offset: usize, what: &str) -> Result<[i32; N]> {
    let bytes = field(buf, offset, N * 4, what)?;
    let mut out = [0i32; N];
    LittleEndian::read_i32_into(bytes, &mut out);
    Ok(out)
}

/// Reads a count field and rejects negative values.
pub fn read_count(buf: &[u8], offset: usize, what: &str) -> Result<usize> {
    let value = read_i32(buf, offset, what)?;
    usize::try_from(value).map_err(|_| FcioError::framing(format!("negative {what}: {value}")))
}

/// Reads element `index` of a `u16` array starting at `offset` whose
/// elements are `stride` bytes apart.
///
/// Callers validate the array bounds up front; this is the unchecked hot path
/// behind every sample view.
#[inline]
pub fn sample_at(buf: &[u8], offset: usize, stride: usize, index: usize) -> u16 {
    let at = offset + index * stride;
    LittleEndian::read_u16(&buf[at..at + SAMPLE_SIZE])
}
