//! Record framing: tag and length header, then exactly `length` payload bytes.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, Level};

use crate::error::{FcioError, Result};
use crate::options::{SessionOptions, Verbosity};
use crate::parser::RECORD_HEADER_SIZE;
use crate::transport::Transport;
use crate::types::Tag;

/// Tag and payload length of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: Tag,
    pub length: usize,
}

/// A framed record whose payload borrows the framer's scratch buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    pub tag: Tag,
    pub payload: &'a [u8],
}

/// Splits a transport byte stream into records.
///
/// A header whose payload read timed out is kept, and the next call resumes
/// with that payload instead of reading a new header.
#[derive(Debug)]
pub struct Framer {
    max_record_size: usize,
    pending: Option<RecordHeader>,
    scratch: Vec<u8>,
    verbosity: Verbosity,
}

impl Framer {
    pub fn new(options: &SessionOptions) -> Self {
        Self {
            max_record_size: options.max_record_size,
            pending: None,
            scratch: Vec::new(),
            verbosity: options.verbosity(),
        }
    }

    /// Returns true if a header was read but its payload was not.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Forgets any partially read record.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Reads the next record header.
    ///
    /// Returns `None` at a clean end of stream: either the source ended
    /// exactly at a record boundary or the producer wrote a tag `<= 0`.
    pub fn read_header(&mut self, transport: &mut Transport) -> Result<Option<RecordHeader>> {
        if let Some(header) = self.pending {
            return Ok(Some(header));
        }

        transport.set_record_boundary(true);
        let fields = transport.read_exact(RECORD_HEADER_SIZE).map(|bytes| {
            (
                LittleEndian::read_i32(&bytes[0..4]),
                LittleEndian::read_u32(&bytes[4..8]) as usize,
            )
        });
        let (tag, length) = match fields {
            Ok(fields) => fields,
            Err(FcioError::Eof) => {
                let partial = transport.buffered();
                if partial == 0 {
                    return Ok(None);
                }
                return Err(FcioError::framing(format!(
                    "stream ended mid-record: {partial} of {RECORD_HEADER_SIZE} header bytes"
                )));
            }
            Err(err) => return Err(err),
        };

        if tag <= 0 {
            if self.verbosity.enabled(Level::DEBUG) {
                debug!(tag, "end-of-stream tag");
            }
            return Ok(None);
        }
        if length > self.max_record_size {
            return Err(FcioError::framing(format!(
                "record tag {tag} declares {length} bytes, limit is {}",
                self.max_record_size
            )));
        }

        let header = RecordHeader {
            tag: Tag::from_i32(tag),
            length,
        };
        if self.verbosity.enabled(Level::TRACE) {
            trace!(tag, length, "record header");
        }
        self.pending = Some(header);
        transport.set_record_boundary(false);
        Ok(Some(header))
    }

    /// Reads the payload announced by `header` into `out`, replacing its contents.
    pub fn read_payload(
        &mut self,
        transport: &mut Transport,
        header: &RecordHeader,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let copied = transport.read_exact(header.length).map(|bytes| {
            out.clear();
            out.extend_from_slice(bytes);
        });
        match copied {
            Ok(()) => {
                self.pending = None;
                transport.set_record_boundary(true);
                Ok(())
            }
            Err(FcioError::Eof) => {
                self.pending = None;
                Err(FcioError::framing(format!(
                    "stream ended mid-record: tag {} declares {} bytes, {} available",
                    header.tag.as_i32(),
                    header.length,
                    transport.buffered()
                )))
            }
            Err(err) => Err(err),
        }
    }

    /// Reads one whole record into the framer's own buffer.
    pub fn next_record(&mut self, transport: &mut Transport) -> Result<Option<RawRecord<'_>>> {
        let Some(header) = self.read_header(transport)? else {
            return Ok(None);
        };
        let mut scratch = std::mem::take(&mut self.scratch);
        let result = self.read_payload(transport, &header, &mut scratch);
        self.scratch = scratch;
        result?;
        Ok(Some(RawRecord {
            tag: header.tag,
            payload: &self.scratch,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, ErrorKind, Read};

    fn record(tag: i32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn setup(bytes: Vec<u8>) -> (Framer, Transport) {
        let opts = SessionOptions::new().with_debug(0);
        (
            Framer::new(&opts),
            Transport::from_reader(Cursor::new(bytes), &opts),
        )
    }

    #[test]
    fn test_reads_records_in_order() {
        let mut bytes = record(1, &[1, 2, 3, 4]);
        bytes.extend(record(42, &[9]));
        let (mut framer, mut transport) = setup(bytes);

        let first = framer.next_record(&mut transport).unwrap().unwrap();
        assert_eq!(first.tag, Tag::Config);
        assert_eq!(first.payload, &[1, 2, 3, 4]);

        let second = framer.next_record(&mut transport).unwrap().unwrap();
        assert_eq!(second.tag, Tag::Unknown(42));
        assert_eq!(second.payload, &[9]);

        assert!(framer.next_record(&mut transport).unwrap().is_none());
    }

    #[test]
    fn test_empty_stream_ends_cleanly() {
        let (mut framer, mut transport) = setup(Vec::new());
        assert!(framer.next_record(&mut transport).unwrap().is_none());
    }

    #[test]
    fn test_non_positive_tag_ends_stream() {
        let mut bytes = record(0, &[]);
        bytes.extend(record(3, &[1]));
        let (mut framer, mut transport) = setup(bytes);
        assert!(framer.next_record(&mut transport).unwrap().is_none());
    }

    #[test]
    fn test_truncated_payload_is_framing_error() {
        let mut bytes = record(3, &[0; 100]);
        bytes.truncate(8 + 40);
        let (mut framer, mut transport) = setup(bytes);
        let err = framer.next_record(&mut transport).unwrap_err();
        assert!(matches!(err, FcioError::Framing(ref m) if m.contains("mid-record")));
    }

    #[test]
    fn test_truncated_header_is_framing_error() {
        let (mut framer, mut transport) = setup(vec![3, 0, 0]);
        assert!(matches!(
            framer.next_record(&mut transport),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_header_eof_distinguishes_boundary_from_partial() {
        let (mut framer, mut transport) = setup(record(1, &[7]));
        framer.next_record(&mut transport).unwrap().unwrap();
        assert_eq!(framer.read_header(&mut transport).unwrap(), None);

        let mut bytes = record(1, &[7]);
        bytes.extend_from_slice(&[3, 0, 0, 0, 5]);
        let (mut framer, mut transport) = setup(bytes);
        framer.next_record(&mut transport).unwrap().unwrap();
        let err = framer.read_header(&mut transport).unwrap_err();
        assert!(matches!(err, FcioError::Framing(ref m) if m.contains("5 of 8")));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3i32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let opts = SessionOptions::new()
            .with_debug(0)
            .with_max_record_size(1024);
        let mut framer = Framer::new(&opts);
        let mut transport = Transport::from_reader(Cursor::new(bytes), &opts);
        assert!(matches!(
            framer.next_record(&mut transport),
            Err(FcioError::Framing(_))
        ));
    }

    /// Delivers its data in two halves with a timeout in between.
    struct SlowSource {
        parts: Vec<Vec<u8>>,
        stalled: bool,
    }

    impl Read for SlowSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.stalled && self.parts.len() == 1 {
                self.stalled = true;
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            if self.parts.is_empty() {
                return Ok(0);
            }
            let part = self.parts.remove(0);
            buf[..part.len()].copy_from_slice(&part);
            Ok(part.len())
        }
    }

    #[test]
    fn test_payload_timeout_resumes() {
        let bytes = record(4, &[7; 16]);
        let opts = SessionOptions::new().with_debug(0);
        let source = SlowSource {
            parts: vec![bytes[..12].to_vec(), bytes[12..].to_vec()],
            stalled: false,
        };
        let mut transport = Transport::from_reader(source, &opts);
        let mut framer = Framer::new(&opts);

        let err = framer.next_record(&mut transport).unwrap_err();
        assert!(matches!(err, FcioError::Timeout { .. }));
        assert!(framer.has_pending());

        let rec = framer.next_record(&mut transport).unwrap().unwrap();
        assert_eq!(rec.tag, Tag::Status);
        assert_eq!(rec.payload, &[7; 16]);
        assert!(!framer.has_pending());
    }
}
