//! The reading session: one transport, one framer, one decoder.
//!
//! A [`Session`] moves through `Closed -> Opening -> Ready -> Closed`.
//! Opening reads up to and including the first `Config` record, so every
//! record handed out afterwards can be decoded.
//!
//! # Example
//!
//! ```no_run
//! use fcio_core::{Session, SessionOptions};
//!
//! let mut session = Session::open_with("run0001.fcio", SessionOptions::new()).unwrap();
//! let mut events = session.events();
//! while let Some(event) = events.next().unwrap() {
//!     println!("{} {:?}", event.runtime_imprecise(), event.daqenergy());
//! }
//! ```

use std::io::Read;
use std::sync::Arc;

use tracing::{error, info, Level};

use crate::decoder::{Record, RecordCounts, RecordDecoder};
use crate::error::{FcioError, Result};
use crate::event::{EventMeta, EventView};
use crate::framer::Framer;
use crate::options::{SessionOptions, Verbosity};
use crate::status::{StatusMeta, StatusView};
use crate::transport::{Endpoint, ShutdownHandle, Transport};
use crate::types::{Config, Tag};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Ready,
}

/// A stream of FCIO records with its decoding state.
///
/// Views handed out by the session borrow its buffers and are only valid
/// until the next read; the borrow checker enforces this. Event and status
/// records go to separate buffers, so reading a status keeps the last event
/// available through [`event`](Self::event) and vice versa.
///
/// A session is `Send` but not meant to be shared: callers that read from
/// several threads must wrap it in a lock themselves.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    state: SessionState,
    transport: Option<Transport>,
    framer: Framer,
    decoder: RecordDecoder,
    record_buf: Vec<u8>,
    event_buf: Vec<u8>,
    status_buf: Vec<u8>,
    current: Option<Tag>,
    last_event: Option<EventMeta>,
    last_status: Option<StatusMeta>,
    ended: bool,
    fault: Option<String>,
    verbosity: Verbosity,
}

impl Session {
    /// Creates a closed session.
    pub fn new(options: SessionOptions) -> Self {
        let verbosity = options.verbosity();
        Self {
            framer: Framer::new(&options),
            decoder: RecordDecoder::with_verbosity(verbosity),
            options,
            state: SessionState::Closed,
            transport: None,
            record_buf: Vec::new(),
            event_buf: Vec::new(),
            status_buf: Vec::new(),
            current: None,
            last_event: None,
            last_status: None,
            ended: false,
            fault: None,
            verbosity,
        }
    }

    /// Creates a session and opens `source` (see [`Endpoint`] for the syntax).
    pub fn open_with(source: &str, options: SessionOptions) -> Result<Self> {
        let mut session = Self::new(options);
        session.open(source)?;
        Ok(session)
    }

    /// Opens `source` and reads up to the first `Config` record.
    ///
    /// An already open session is closed first.
    pub fn open(&mut self, source: &str) -> Result<()> {
        let endpoint = source.parse::<Endpoint>()?;
        self.open_endpoint(endpoint)
    }

    pub fn open_endpoint(&mut self, endpoint: Endpoint) -> Result<()> {
        self.close();
        self.state = SessionState::Opening;
        match Transport::open(endpoint, &self.options) {
            Ok(transport) => self.start(transport),
            Err(err) => {
                self.state = SessionState::Closed;
                Err(err)
            }
        }
    }

    /// Opens a session over an arbitrary reader.
    pub fn open_reader<R: Read + Send + 'static>(&mut self, reader: R) -> Result<()> {
        self.close();
        self.state = SessionState::Opening;
        let transport = Transport::from_reader(reader, &self.options);
        self.start(transport)
    }

    fn start(&mut self, transport: Transport) -> Result<()> {
        self.transport = Some(transport);
        match self.read_until_config() {
            Ok(()) => {
                self.state = SessionState::Ready;
                if self.verbosity.enabled(Level::INFO) {
                    let endpoint = self.transport.as_ref().and_then(Transport::endpoint);
                    info!(?endpoint, "session ready");
                }
                Ok(())
            }
            Err(err) => {
                if self.verbosity.enabled(Level::ERROR) {
                    error!(error = %err, "failed to open session");
                }
                self.close();
                Err(err)
            }
        }
    }

    fn read_until_config(&mut self) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| FcioError::protocol("session has no transport"))?;
        loop {
            let Some(header) = self.framer.read_header(transport)? else {
                return Err(FcioError::protocol("no config record found"));
            };
            self.framer
                .read_payload(transport, &header, &mut self.record_buf)?;
            if header.tag == Tag::Config {
                self.decoder.decode(Tag::Config, &self.record_buf)?;
                self.current = Some(Tag::Config);
                return Ok(());
            }
        }
    }

    /// Releases the transport and forgets all decoded state. Safe to call
    /// any number of times.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.framer.reset();
        self.decoder.reset();
        self.current = None;
        self.last_event = None;
        self.last_status = None;
        self.ended = false;
        self.fault = None;
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The Config currently in force.
    pub fn config(&self) -> Option<&Arc<Config>> {
        self.decoder.config()
    }

    /// Records decoded since the session was opened.
    pub fn counts(&self) -> RecordCounts {
        self.decoder.counts()
    }

    /// The last Event or SparseEvent read.
    pub fn event(&self) -> Option<EventView<'_>> {
        self.last_event.as_ref().map(|meta| meta.view(&self.event_buf))
    }

    /// The last Status read.
    pub fn status(&self) -> Option<StatusView<'_>> {
        self.last_status.map(|meta| meta.view(&self.status_buf))
    }

    /// The most recently read record.
    pub fn record(&self) -> Option<Record<'_>> {
        let record = match self.current? {
            Tag::Config => Record::Config(self.decoder.config()?.as_ref()),
            Tag::Event => Record::Event(self.event()?),
            Tag::SparseEvent => Record::SparseEvent(self.event()?),
            Tag::Status => Record::Status(self.status()?),
            Tag::Unknown(tag) => Record::Unknown {
                tag,
                payload: &self.record_buf,
            },
        };
        Some(record)
    }

    /// Handle that makes a blocked read fail from another thread.
    pub fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        self.transport.as_ref().map(Transport::shutdown_handle)
    }

    /// Reads and decodes the next record and returns its tag.
    ///
    /// Returns `None` at end of stream. After a fatal error every further
    /// call fails with [`FcioError::Protocol`] until the session is reopened.
    pub fn advance(&mut self) -> Result<Option<Tag>> {
        if let Some(reason) = &self.fault {
            return Err(FcioError::protocol(format!(
                "session stopped after an earlier error ({reason}); reopen to continue"
            )));
        }
        if self.state != SessionState::Ready {
            return Err(FcioError::protocol("session is not open"));
        }
        if self.ended {
            return Ok(None);
        }

        match self.read_and_decode() {
            Ok(tag) => {
                if tag.is_none() {
                    self.ended = true;
                }
                Ok(tag)
            }
            Err(err) => {
                if err.is_fatal() {
                    if self.verbosity.enabled(Level::ERROR) {
                        error!(error = %err, "stream is no longer readable");
                    }
                    self.fault = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    fn read_and_decode(&mut self) -> Result<Option<Tag>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| FcioError::protocol("session has no transport"))?;
        let Some(header) = self.framer.read_header(transport)? else {
            return Ok(None);
        };

        let buf = match header.tag {
            Tag::Event | Tag::SparseEvent => &mut self.event_buf,
            Tag::Status => &mut self.status_buf,
            Tag::Config | Tag::Unknown(_) => &mut self.record_buf,
        };
        // A failed decode must not leave a view pointing at overwritten bytes.
        match header.tag {
            Tag::Event | Tag::SparseEvent => self.last_event = None,
            Tag::Status => self.last_status = None,
            _ => {}
        }
        self.current = None;
        self.framer.read_payload(transport, &header, buf)?;

        match self.decoder.decode(header.tag, buf)? {
            Record::Event(event) | Record::SparseEvent(event) => {
                self.last_event = Some(event.meta());
            }
            Record::Status(status) => self.last_status = Some(status.meta()),
            Record::Config(_) | Record::Unknown { .. } => {}
        }
        self.current = Some(header.tag);
        Ok(Some(header.tag))
    }

    /// Reads the next record.
    pub fn next_record(&mut self) -> Result<Option<Record<'_>>> {
        match self.advance()? {
            Some(_) => Ok(self.record()),
            None => Ok(None),
        }
    }

    /// Cursor over all records.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            session: self,
            done: false,
        }
    }

    /// Cursor over Event and SparseEvent records.
    pub fn events(&mut self) -> Events<'_> {
        Events {
            session: self,
            done: false,
        }
    }

    /// Cursor over Status records.
    pub fn statuses(&mut self) -> Statuses<'_> {
        Statuses {
            session: self,
            done: false,
        }
    }

    /// Advances to the next record whose tag matches `wanted`.
    fn advance_to(&mut self, wanted: impl Fn(Tag) -> bool) -> Result<bool> {
        while let Some(tag) = self.advance()? {
            if wanted(tag) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fuses a cursor after end of stream or an error.
fn fuse<T>(
    done: &mut bool,
    result: Result<bool>,
    item: impl FnOnce() -> Option<T>,
) -> Result<Option<T>> {
    match result {
        Ok(true) => Ok(item()),
        Ok(false) => {
            *done = true;
            Ok(None)
        }
        Err(err) => {
            *done = true;
            Err(err)
        }
    }
}

/// Lending cursor over every record of a session.
///
/// All three cursor kinds move the same stream position: records consumed
/// through one are not seen by another.
#[derive(Debug)]
pub struct Records<'s> {
    session: &'s mut Session,
    done: bool,
}

impl Records<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Record<'_>>> {
        if self.done {
            return Ok(None);
        }
        let result = self.session.advance().map(|tag| tag.is_some());
        let session = &*self.session;
        fuse(&mut self.done, result, || session.record())
    }
}

/// Lending cursor over the events of a session.
#[derive(Debug)]
pub struct Events<'s> {
    session: &'s mut Session,
    done: bool,
}

impl Events<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<EventView<'_>>> {
        if self.done {
            return Ok(None);
        }
        let result = self.session.advance_to(Tag::is_event);
        let session = &*self.session;
        fuse(&mut self.done, result, || session.event())
    }
}

/// Lending cursor over the status records of a session.
#[derive(Debug)]
pub struct Statuses<'s> {
    session: &'s mut Session,
    done: bool,
}

impl Statuses<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<StatusView<'_>>> {
        if self.done {
            return Ok(None);
        }
        let result = self.session.advance_to(|tag| tag == Tag::Status);
        let session = &*self.session;
        fuse(&mut self.done, result, || session.status())
    }
}
