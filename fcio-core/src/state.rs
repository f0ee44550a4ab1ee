//! Bounded history of decoding states.
//!
//! A [`State`] is what was in force right after one record was read: the
//! Config, the last event and the last status. A [`StateReader`] keeps the
//! most recent states so a consumer can look back at earlier events without
//! copying them itself, e.g. to compare an event with its predecessors.
//!
//! # Example
//!
//! ```no_run
//! use fcio_core::{Session, SessionOptions, StateReader, Tag};
//!
//! let session = Session::open_with("run0001.fcio", SessionOptions::new()).unwrap();
//! let mut reader = StateReader::new(session, 8);
//! reader.deselect_all();
//! reader.select_tag(Tag::Event).unwrap();
//!
//! while reader.next_event().unwrap().is_some() {
//!     let current = reader.lookback(0).unwrap();
//!     if let Some(previous) = reader.lookback(1) {
//!         let dt = current.event().unwrap().view().runtime_ns()
//!             - previous.event().unwrap().view().runtime_ns();
//!         println!("{dt} ns since the previous event");
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, Level};

use crate::error::{FcioError, Result};
use crate::event::EventRecord;
use crate::options::{SessionOptions, Verbosity};
use crate::session::Session;
use crate::status::StatusRecord;
use crate::types::{Config, Tag};

/// The Config, event and status in force after one record.
///
/// Records between two states share their snapshots, so keeping a deep
/// history costs one copy per event or status record, not per state.
#[derive(Debug, Clone)]
pub struct State {
    tag: Tag,
    config: Arc<Config>,
    event: Option<Arc<EventRecord>>,
    status: Option<Arc<StatusRecord>>,
}

impl State {
    /// Tag of the record that produced this state.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The last event read up to and including this record.
    pub fn event(&self) -> Option<&EventRecord> {
        self.event.as_deref()
    }

    /// The last status read up to and including this record.
    pub fn status(&self) -> Option<&StatusRecord> {
        self.status.as_deref()
    }
}

const ALL_TAGS: u8 = 0b1111;

/// Bit of a state-carrying tag. Unknown records never produce a state.
fn tag_bit(tag: Tag) -> Option<u8> {
    match tag {
        Tag::Config => Some(1),
        Tag::Event => Some(1 << 1),
        Tag::Status => Some(1 << 2),
        Tag::SparseEvent => Some(1 << 3),
        Tag::Unknown(_) => None,
    }
}

fn unselectable(tag: Tag) -> FcioError {
    FcioError::protocol(format!(
        "tag {} carries no state; only Config, Event, SparseEvent and Status can be selected",
        tag.as_i32()
    ))
}

/// Reads a session and keeps the last `depth + 1` selected states.
///
/// Only records whose tag is selected add a state; all tags are selected
/// initially. Unselected records still update the Config, event and status
/// that the next selected state carries.
#[derive(Debug)]
pub struct StateReader {
    session: Session,
    states: VecDeque<State>,
    capacity: usize,
    selected: u8,
    config: Option<Arc<Config>>,
    event: Option<Arc<EventRecord>>,
    status: Option<Arc<StatusRecord>>,
    verbosity: Verbosity,
}

impl StateReader {
    /// Wraps an open session, keeping `depth` states behind the current one.
    ///
    /// The Config read while opening becomes the first state.
    pub fn new(session: Session, depth: usize) -> Self {
        let verbosity = session.options().verbosity();
        let mut reader = Self {
            states: VecDeque::with_capacity(depth + 1),
            capacity: depth + 1,
            selected: ALL_TAGS,
            config: session.config().cloned(),
            event: None,
            status: None,
            session,
            verbosity,
        };
        if reader.config.is_some() {
            reader.push(Tag::Config);
        }
        reader
    }

    /// Opens `source` and wraps the session, see [`Session::open_with`].
    pub fn open_with(source: &str, options: SessionOptions, depth: usize) -> Result<Self> {
        Ok(Self::new(Session::open_with(source, options)?, depth))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// How many states behind the current one can be looked up.
    pub fn depth(&self) -> usize {
        self.capacity - 1
    }

    /// States currently kept, the current one included.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_selected(&self, tag: Tag) -> bool {
        tag_bit(tag).is_some_and(|bit| self.selected & bit != 0)
    }

    /// Lets records with `tag` add states.
    pub fn select_tag(&mut self, tag: Tag) -> Result<()> {
        let bit = tag_bit(tag).ok_or_else(|| unselectable(tag))?;
        self.selected |= bit;
        Ok(())
    }

    /// Stops records with `tag` from adding states.
    pub fn deselect_tag(&mut self, tag: Tag) -> Result<()> {
        let bit = tag_bit(tag).ok_or_else(|| unselectable(tag))?;
        self.selected &= !bit;
        Ok(())
    }

    pub fn select_all(&mut self) {
        self.selected = ALL_TAGS;
    }

    pub fn deselect_all(&mut self) {
        self.selected = 0;
    }

    /// The state `back` selected records before the current one, or `None`
    /// if it has already left the history or never existed.
    pub fn lookback(&self, back: usize) -> Option<&State> {
        if back >= self.states.len() {
            if self.verbosity.enabled(Level::TRACE) {
                trace!(back, kept = self.states.len(), "state not in history");
            }
            return None;
        }
        self.states.get(self.states.len() - 1 - back)
    }

    /// Looks up a state relative to the current one.
    ///
    /// `0` is the current state and `-n` is [`lookback(n)`](Self::lookback).
    /// A positive `n` reads on until `n` more selected records arrived and
    /// returns the new current state, or `None` at end of stream. Records
    /// read before an error stay in the history.
    pub fn get_state(&mut self, offset: i32) -> Result<Option<&State>> {
        if offset <= 0 {
            return Ok(self.lookback(offset.unsigned_abs() as usize));
        }

        let mut outstanding = offset;
        while let Some(tag) = self.read_next()? {
            if self.is_selected(tag) {
                outstanding -= 1;
                if outstanding == 0 {
                    return Ok(self.states.back());
                }
            }
        }
        if self.verbosity.enabled(Level::DEBUG) {
            debug!(outstanding, "end of stream before the requested state");
        }
        Ok(None)
    }

    /// Reads on to the next selected record, see [`get_state`](Self::get_state).
    pub fn next_state(&mut self) -> Result<Option<&State>> {
        self.get_state(1)
    }

    /// Reads on to the next selected Event or SparseEvent and returns its state.
    ///
    /// Fails with [`FcioError::Protocol`] when neither event tag is selected,
    /// since no record could ever satisfy the call.
    pub fn next_event(&mut self) -> Result<Option<&State>> {
        if !self.is_selected(Tag::Event) && !self.is_selected(Tag::SparseEvent) {
            return Err(FcioError::protocol(
                "next_event needs Event or SparseEvent records selected",
            ));
        }
        while let Some(tag) = self.read_next()? {
            if tag.is_event() && self.is_selected(tag) {
                return Ok(self.states.back());
            }
        }
        Ok(None)
    }

    /// Advances the session by one record and records its state.
    fn read_next(&mut self) -> Result<Option<Tag>> {
        let Some(tag) = self.session.advance()? else {
            return Ok(None);
        };
        match tag {
            Tag::Config => self.config = self.session.config().cloned(),
            Tag::Event | Tag::SparseEvent => {
                self.event = self.session.event().map(|event| Arc::new(event.snapshot()));
            }
            Tag::Status => {
                self.status = self.session.status().map(|status| Arc::new(status.snapshot()));
            }
            Tag::Unknown(_) => {}
        }
        if self.is_selected(tag) {
            self.push(tag);
        }
        Ok(Some(tag))
    }

    fn push(&mut self, tag: Tag) {
        let Some(config) = self.config.clone() else {
            return;
        };
        if self.states.len() == self.capacity {
            self.states.pop_front();
        }
        self.states.push_back(State {
            tag,
            config,
            event: self.event.clone(),
            status: self.status.clone(),
        });
    }
}
