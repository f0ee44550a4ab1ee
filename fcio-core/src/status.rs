//! Status records and their per-card sub-records.
//!
//! A card sub-record is decoded in two phases: the fixed 16-word header
//! first, then the four trailing arrays sized by counts from that header.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FcioError, Result};
use crate::event::ticks_to_ns;
use crate::parser::{
    self, card, CARD_HEADER_SIZE, CARD_HEADER_WORDS, CARD_OTHER_ERRORS, SAMPLE_SIZE,
    STATUSTIME_LEN, STATUSTIME_SLOTS, STATUS_HEADER_SIZE,
};
use crate::view::Samples;

/// One card's status as laid out on the wire.
#[derive(Clone, Copy)]
pub struct CardStatus<'a> {
    bytes: &'a [u8],
    header: [u32; CARD_HEADER_WORDS],
}

impl<'a> CardStatus<'a> {
    /// Parses the card at the start of `bytes` and returns it with its size.
    fn parse(bytes: &'a [u8], index: usize) -> Result<(Self, usize)> {
        if bytes.len() < CARD_HEADER_SIZE {
            return Err(FcioError::framing(format!(
                "card {index} header needs {CARD_HEADER_SIZE} bytes, {} left",
                bytes.len()
            )));
        }
        let mut header = [0u32; CARD_HEADER_WORDS];
        LittleEndian::read_u32_into(&bytes[..CARD_HEADER_SIZE], &mut header);

        let count = |word: usize| header[word] as usize;
        let size = count(card::NUMENV)
            .checked_add(count(card::NUMCTILINKS))
            .and_then(|n| n.checked_add(count(card::NUMLINKS).checked_mul(2)?))
            .and_then(|n| n.checked_mul(SAMPLE_SIZE))
            .and_then(|n| n.checked_add(CARD_HEADER_SIZE))
            .filter(|&n| n <= bytes.len())
            .ok_or_else(|| {
                FcioError::framing(format!(
                    "card {index} counts (env {}, cti {}, links {}) exceed the {} bytes left",
                    header[card::NUMENV],
                    header[card::NUMCTILINKS],
                    header[card::NUMLINKS],
                    bytes.len()
                ))
            })?;

        Ok((
            Self {
                bytes: &bytes[..size],
                header,
            },
            size,
        ))
    }

    pub fn reqid(&self) -> u32 {
        self.header[card::REQID]
    }

    pub fn status(&self) -> u32 {
        self.header[card::STATUS]
    }

    pub fn eventno(&self) -> u32 {
        self.header[card::EVENTNO]
    }

    pub fn pps(&self) -> u32 {
        self.header[card::PPS]
    }

    pub fn ticks(&self) -> u32 {
        self.header[card::TICKS]
    }

    pub fn maxticks(&self) -> u32 {
        self.header[card::MAXTICKS]
    }

    pub fn numenv(&self) -> usize {
        self.header[card::NUMENV] as usize
    }

    pub fn numctilinks(&self) -> usize {
        self.header[card::NUMCTILINKS] as usize
    }

    pub fn numlinks(&self) -> usize {
        self.header[card::NUMLINKS] as usize
    }

    pub fn dummy(&self) -> u32 {
        self.header[card::DUMMY]
    }

    pub fn totalerrors(&self) -> u32 {
        self.header[card::TOTALERRORS]
    }

    pub fn othererrors(&self) -> [u32; CARD_OTHER_ERRORS] {
        let mut out = [0; CARD_OTHER_ERRORS];
        out.copy_from_slice(&self.header[card::OTHERERRORS..]);
        out
    }

    /// Card clock time in nanoseconds.
    pub fn runtime_ns(&self) -> i64 {
        ticks_to_ns(self.pps().into(), self.ticks().into(), self.maxticks().into())
    }

    /// Environment sensor readings.
    pub fn environment(&self) -> Samples<'a> {
        Samples::contiguous(self.bytes, CARD_HEADER_SIZE, self.numenv())
    }

    pub fn ctierrors(&self) -> Samples<'a> {
        let offset = CARD_HEADER_SIZE + self.numenv() * SAMPLE_SIZE;
        Samples::contiguous(self.bytes, offset, self.numctilinks())
    }

    pub fn linkerrors(&self) -> Samples<'a> {
        let offset = CARD_HEADER_SIZE + (self.numenv() + self.numctilinks()) * SAMPLE_SIZE;
        Samples::contiguous(self.bytes, offset, self.numlinks())
    }

    pub fn enverrors(&self) -> Samples<'a> {
        let offset = CARD_HEADER_SIZE
            + (self.numenv() + self.numctilinks() + self.numlinks()) * SAMPLE_SIZE;
        Samples::contiguous(self.bytes, offset, self.numlinks())
    }

    /// Bytes this card occupies in the status payload.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for CardStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardStatus")
            .field("reqid", &self.reqid())
            .field("status", &self.status())
            .field("eventno", &self.eventno())
            .field("numenv", &self.numenv())
            .field("numctilinks", &self.numctilinks())
            .field("numlinks", &self.numlinks())
            .finish()
    }
}

/// Zero-copy view of a Status payload.
///
/// The card sub-records are validated when the view is built, so
/// [`cards`](Self::cards) yields every card without further checks.
#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    payload: &'a [u8],
    meta: StatusMeta,
}

/// The decoded fixed header of a status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatusMeta {
    status: i32,
    statustime: [i32; STATUSTIME_SLOTS],
    cards: usize,
    size: i32,
}

impl StatusMeta {
    pub(crate) fn view(self, payload: &[u8]) -> StatusView<'_> {
        StatusView {
            payload,
            meta: self,
        }
    }
}

impl<'a> StatusView<'a> {
    pub fn decode(payload: &'a [u8]) -> Result<Self> {
        let status = parser::read_i32(payload, 0, "status")?;
        let statustime = parser::read_i32_array(payload, 4, "statustime")?;
        let cards = parser::read_count(payload, 24, "cards")?;
        let size = parser::read_i32(payload, 28, "size")?;

        let mut offset = STATUS_HEADER_SIZE;
        for index in 0..cards {
            let (_, len) = CardStatus::parse(&payload[offset..], index)?;
            offset += len;
        }
        if offset != payload.len() {
            return Err(FcioError::framing(format!(
                "{} trailing bytes after {cards} cards",
                payload.len() - offset
            )));
        }

        Ok(Self {
            payload,
            meta: StatusMeta {
                status,
                statustime,
                cards,
                size,
            },
        })
    }

    /// Overall status code (1 = no errors).
    pub fn status(&self) -> i32 {
        self.meta.status
    }

    /// `[pps, ticks, unix sec, unix usec]` of the status readout.
    pub fn statustime(&self) -> [i32; STATUSTIME_LEN] {
        let mut out = [0; STATUSTIME_LEN];
        out.copy_from_slice(&self.meta.statustime[..STATUSTIME_LEN]);
        out
    }

    /// Number of card sub-records.
    pub fn num_cards(&self) -> usize {
        self.meta.cards
    }

    /// Largest card record size as declared by the producer.
    pub fn size(&self) -> i32 {
        self.meta.size
    }

    /// The card sub-records in wire order.
    pub fn cards(&self) -> CardIter<'a> {
        CardIter {
            rest: &self.payload[STATUS_HEADER_SIZE..],
            index: 0,
            cards: self.meta.cards,
        }
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Copies the status out of the session buffers.
    pub fn snapshot(&self) -> StatusRecord {
        StatusRecord {
            payload: self.payload.to_vec(),
            meta: self.meta,
        }
    }

    pub(crate) fn meta(&self) -> StatusMeta {
        self.meta
    }
}

/// Lazily parses the card sub-records of a [`StatusView`].
#[derive(Debug, Clone)]
pub struct CardIter<'a> {
    rest: &'a [u8],
    index: usize,
    cards: usize,
}

impl<'a> Iterator for CardIter<'a> {
    type Item = CardStatus<'a>;

    fn next(&mut self) -> Option<CardStatus<'a>> {
        if self.index >= self.cards {
            return None;
        }
        let (card, len) = CardStatus::parse(self.rest, self.index).ok()?;
        self.rest = &self.rest[len..];
        self.index += 1;
        Some(card)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cards - self.index;
        (left, Some(left))
    }
}

impl ExactSizeIterator for CardIter<'_> {}

/// An owned status snapshot.
#[derive(Debug, Clone)]
pub struct StatusRecord {
    payload: Vec<u8>,
    meta: StatusMeta,
}

impl StatusRecord {
    pub fn view(&self) -> StatusView<'_> {
        self.meta.view(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_bytes(reqid: u32, numenv: u32, numcti: u32, numlinks: u32) -> Vec<u8> {
        let mut header = [0u32; CARD_HEADER_WORDS];
        header[card::REQID] = reqid;
        header[card::STATUS] = 1;
        header[card::PPS] = 5;
        header[card::TICKS] = 50;
        header[card::MAXTICKS] = 99;
        header[card::NUMENV] = numenv;
        header[card::NUMCTILINKS] = numcti;
        header[card::NUMLINKS] = numlinks;
        header[card::OTHERERRORS + 4] = 9;

        let mut out: Vec<u8> = header.iter().flat_map(|v| v.to_le_bytes()).collect();
        let values = numenv + numcti + 2 * numlinks;
        for i in 0..values {
            out.extend_from_slice(&(i as u16 + 100).to_le_bytes());
        }
        out
    }

    fn status_bytes(cards: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1i32.to_le_bytes());
        for t in [10, 20, 1_700_000_000, 500, 0] {
            out.extend_from_slice(&(t as i32).to_le_bytes());
        }
        out.extend_from_slice(&(cards.len() as i32).to_le_bytes());
        let size = cards.iter().map(Vec::len).max().unwrap_or(0);
        out.extend_from_slice(&(size as i32).to_le_bytes());
        for c in cards {
            out.extend_from_slice(c);
        }
        out
    }

    #[test]
    fn test_card_array_lengths() {
        let payload = status_bytes(&[card_bytes(7, 3, 2, 4)]);
        let status = StatusView::decode(&payload).unwrap();
        let card = status.cards().next().unwrap();

        assert_eq!(card.environment().len(), 3);
        assert_eq!(card.ctierrors().len(), 2);
        assert_eq!(card.linkerrors().len(), 4);
        assert_eq!(card.enverrors().len(), 4);
        assert_eq!(card.byte_len(), CARD_HEADER_SIZE + (3 + 2 + 4 + 4) * SAMPLE_SIZE);

        assert_eq!(card.environment().to_vec(), vec![100, 101, 102]);
        assert_eq!(card.ctierrors().to_vec(), vec![103, 104]);
        assert_eq!(card.linkerrors().to_vec(), vec![105, 106, 107, 108]);
        assert_eq!(card.enverrors().to_vec(), vec![109, 110, 111, 112]);
    }

    #[test]
    fn test_status_header() {
        let payload = status_bytes(&[card_bytes(1, 0, 0, 0), card_bytes(2, 1, 1, 1)]);
        let status = StatusView::decode(&payload).unwrap();

        assert_eq!(status.status(), 1);
        assert_eq!(status.statustime(), [10, 20, 1_700_000_000, 500]);
        assert_eq!(status.num_cards(), 2);
        assert_eq!(status.size(), (CARD_HEADER_SIZE + 4 * SAMPLE_SIZE) as i32);

        let reqids: Vec<u32> = status.cards().map(|c| c.reqid()).collect();
        assert_eq!(reqids, vec![1, 2]);
        assert_eq!(status.cards().len(), 2);
    }

    #[test]
    fn test_card_header_fields() {
        let payload = status_bytes(&[card_bytes(3, 0, 0, 0)]);
        let status = StatusView::decode(&payload).unwrap();
        let card = status.cards().next().unwrap();

        assert_eq!(card.status(), 1);
        assert_eq!(card.pps(), 5);
        assert_eq!(card.othererrors(), [0, 0, 0, 0, 9]);
        assert_eq!(card.runtime_ns(), 5_500_000_000);
    }

    #[test]
    fn test_no_cards() {
        let payload = status_bytes(&[]);
        let status = StatusView::decode(&payload).unwrap();
        assert_eq!(status.cards().count(), 0);
    }

    #[test]
    fn test_count_exceeding_payload() {
        let mut payload = status_bytes(&[card_bytes(1, 3, 2, 4)]);
        payload.truncate(payload.len() - 2);
        assert!(matches!(
            StatusView::decode(&payload),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_cards_field_exceeding_payload() {
        let mut payload = status_bytes(&[card_bytes(1, 0, 0, 0)]);
        payload[24..28].copy_from_slice(&2i32.to_le_bytes());
        assert!(matches!(
            StatusView::decode(&payload),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = status_bytes(&[card_bytes(1, 1, 0, 0)]);
        payload.extend_from_slice(&[0, 0]);
        assert!(matches!(
            StatusView::decode(&payload),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_huge_counts_do_not_overflow() {
        let mut bytes = card_bytes(1, 0, 0, 0);
        let at = card::NUMLINKS * 4;
        bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let payload = status_bytes(&[bytes]);
        assert!(StatusView::decode(&payload).is_err());
    }

    #[test]
    fn test_snapshot() {
        let payload = status_bytes(&[card_bytes(4, 1, 1, 1)]);
        let record = StatusView::decode(&payload).unwrap().snapshot();
        drop(payload);
        let view = record.view();
        assert_eq!(view.cards().next().unwrap().reqid(), 4);
    }
}
