//! Streaming decoder for FlashCam FCIO data.
//!
//! FCIO is the tagged, length-prefixed record stream written by the FlashCam
//! digitizer readout. A stream starts with a `Config` record declaring the
//! channel geometry, followed by `Event`, `SparseEvent` and `Status`
//! records whose layout depends on that geometry.
//!
//! # Example
//!
//! ```no_run
//! use fcio_core::{Record, Session, SessionOptions};
//!
//! let options = SessionOptions::new().with_timeout_ms(1000);
//! let mut session = Session::open_with("tcp://connect/3000/daq01", options).unwrap();
//!
//! let mut records = session.records();
//! while let Some(record) = records.next().unwrap() {
//!     match record {
//!         Record::Event(event) => println!("event {:?}", event.baseline()),
//!         Record::Status(status) => println!("status {}", status.status()),
//!         _ => {}
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - Files, standard input and TCP sources with timeouts and reconnects
//! - Zero-copy strided views of baselines, integrators and waveforms
//! - Exact nanosecond timing derived from the PPS clock
//! - A bounded history of past events and statuses ([`StateReader`])
//! - A record writer producing the same format

pub mod decoder;
pub mod error;
pub mod event;
pub mod framer;
pub mod options;
pub mod parser;
pub mod session;
pub mod state;
pub mod status;
pub mod transport;
pub mod types;
pub mod view;
pub mod writer;

// Re-export commonly used types
pub use decoder::{Record, RecordCounts, RecordDecoder};
pub use error::{FcioError, Result};
pub use event::{EventHeader, EventRecord, EventView};
pub use options::{debug_level, set_debug_level, ReconnectPolicy, SessionOptions};
pub use session::{Events, Records, Session, SessionState, Statuses};
pub use state::{State, StateReader};
pub use status::{CardStatus, StatusRecord, StatusView};
pub use transport::{Endpoint, ShutdownHandle, Transport};
pub use types::{Config, Layout, Tag};
pub use view::{Samples, TraceList, TraceMatrix};
pub use writer::{CardStatusData, ChannelData, EventData, RecordWriter, StatusData, WriteError};
