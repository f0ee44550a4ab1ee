//! Tag dispatch of framed records.
//!
//! The decoder remembers the most recent `Config` and uses its layout for
//! every event that follows until another `Config` replaces it.

use std::sync::Arc;

use tracing::{debug, info, Level};

use crate::error::{FcioError, Result};
use crate::event::EventView;
use crate::options::Verbosity;
use crate::status::StatusView;
use crate::types::{Config, Tag};

/// One decoded record, borrowing the session buffers.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Config(&'a Config),
    Event(EventView<'a>),
    SparseEvent(EventView<'a>),
    Status(StatusView<'a>),
    Unknown { tag: i32, payload: &'a [u8] },
}

impl Record<'_> {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Config(_) => Tag::Config,
            Self::Event(_) => Tag::Event,
            Self::SparseEvent(_) => Tag::SparseEvent,
            Self::Status(_) => Tag::Status,
            Self::Unknown { tag, .. } => Tag::Unknown(*tag),
        }
    }
}

/// Number of records decoded, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub configs: u64,
    pub events: u64,
    pub sparse_events: u64,
    pub statuses: u64,
    pub unknown: u64,
}

impl RecordCounts {
    pub fn total(&self) -> u64 {
        self.configs + self.events + self.sparse_events + self.statuses + self.unknown
    }

    fn count(&mut self, tag: Tag) {
        match tag {
            Tag::Config => self.configs += 1,
            Tag::Event => self.events += 1,
            Tag::SparseEvent => self.sparse_events += 1,
            Tag::Status => self.statuses += 1,
            Tag::Unknown(_) => self.unknown += 1,
        }
    }
}

/// Stateful record decoder.
#[derive(Debug)]
pub struct RecordDecoder {
    config: Option<Arc<Config>>,
    counts: RecordCounts,
    verbosity: Verbosity,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::with_verbosity(Verbosity::from_level(crate::options::debug_level()))
    }

    pub(crate) fn with_verbosity(verbosity: Verbosity) -> Self {
        Self {
            config: None,
            counts: RecordCounts::default(),
            verbosity,
        }
    }

    /// The Config currently in force.
    pub fn config(&self) -> Option<&Arc<Config>> {
        self.config.as_ref()
    }

    pub fn counts(&self) -> RecordCounts {
        self.counts
    }

    /// Forgets the current Config and the counters.
    pub fn reset(&mut self) {
        self.config = None;
        self.counts = RecordCounts::default();
    }

    /// Decodes `payload` as a record of kind `tag`.
    ///
    /// A `Config` replaces the current layout. Events and statuses before any
    /// `Config` are protocol errors.
    pub fn decode<'a>(&'a mut self, tag: Tag, payload: &'a [u8]) -> Result<Record<'a>> {
        let record = match tag {
            Tag::Config => {
                let config = Config::decode(payload)?;
                if self.verbosity.enabled(Level::INFO) {
                    info!(
                        nadcs = config.nadcs,
                        ntriggers = config.ntriggers,
                        nsamples = config.nsamples,
                        blprecision = config.blprecision,
                        telid = config.telid,
                        "config record"
                    );
                }
                let config: &'a Arc<Config> = self.config.insert(Arc::new(config));
                Record::Config(config.as_ref())
            }
            Tag::Event | Tag::SparseEvent => {
                let config = self.config.as_ref().ok_or_else(|| {
                    FcioError::protocol("event record before any config record")
                })?;
                let event = EventView::decode(tag, payload, config)?;
                if self.verbosity.enabled(Level::DEBUG) {
                    debug!(
                        sparse = event.is_sparse(),
                        eventnumber = event.header().eventnumber(),
                        numtraces = event.numtraces(),
                        runtime_ns = event.runtime_ns(),
                        "event record"
                    );
                }
                if tag == Tag::Event {
                    Record::Event(event)
                } else {
                    Record::SparseEvent(event)
                }
            }
            Tag::Status => {
                if self.config.is_none() {
                    return Err(FcioError::protocol("status record before any config record"));
                }
                let status = StatusView::decode(payload)?;
                if self.verbosity.enabled(Level::DEBUG) {
                    debug!(
                        status = status.status(),
                        cards = status.num_cards(),
                        "status record"
                    );
                }
                Record::Status(status)
            }
            Tag::Unknown(tag) => Record::Unknown { tag, payload },
        };
        self.counts.count(tag);
        Ok(record)
    }
}
