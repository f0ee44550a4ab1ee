//! Session options and the process-wide debug level.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::Level;

/// Default transport read buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Default upper bound for a single record payload (64 MiB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Debug level used when a session does not set its own (warnings on).
pub const DEFAULT_DEBUG_LEVEL: u8 = 2;

static DEBUG_LEVEL: AtomicU8 = AtomicU8::new(DEFAULT_DEBUG_LEVEL);

/// Sets the process-wide debug level and returns the previous one.
///
/// Levels: 0 = off, 1 = errors, 2 = warnings, 3 = info, 4 = debug, 5+ = trace.
/// Sessions opened with [`SessionOptions::debug`] set ignore this value.
pub fn set_debug_level(level: u8) -> u8 {
    DEBUG_LEVEL.swap(level, Ordering::Relaxed)
}

/// Returns the process-wide debug level.
pub fn debug_level() -> u8 {
    DEBUG_LEVEL.load(Ordering::Relaxed)
}

/// Maps a numeric debug level to a `tracing` level filter.
pub fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Gate for the `tracing` events a session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Verbosity(LevelFilter);

impl Verbosity {
    pub(crate) fn from_level(level: u8) -> Self {
        Self(level_filter(level))
    }

    #[inline]
    pub(crate) fn enabled(self, level: Level) -> bool {
        self.0 >= level
    }
}

/// Reconnect behaviour for socket sources that time out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Number of reconnect attempts before the timeout is reported.
    pub attempts: u32,
    /// Pause before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Options applied when a session opens its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Read timeout; `None` blocks indefinitely.
    pub timeout: Option<Duration>,
    /// Initial capacity of the transport read buffer in bytes.
    pub buffer_size: usize,
    /// Largest record payload accepted by the framer.
    pub max_record_size: usize,
    /// Reconnect policy for `tcp://connect` sources.
    pub reconnect: Option<ReconnectPolicy>,
    /// Wait for a file to grow instead of ending at its current size.
    pub follow: bool,
    /// Per-session debug level, overriding [`debug_level`].
    pub debug: Option<u8>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            reconnect: None,
            follow: false,
            debug: None,
        }
    }
}

impl SessionOptions {
    /// Creates options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout in milliseconds; 0 blocks indefinitely.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        self
    }

    /// Sets the read buffer size in kilobytes; 0 keeps the default.
    pub fn with_buffer_kb(mut self, kb: usize) -> Self {
        if kb > 0 {
            self.buffer_size = kb * 1024;
        }
        self
    }

    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn with_debug(mut self, level: u8) -> Self {
        self.debug = Some(level);
        self
    }

    /// Options from the positional `(timeout, buffersize, debug)` arguments
    /// of the classic open call. A 0 selects the default of each; for
    /// `debug` that means following the process-wide level.
    pub fn from_open_args(timeout_ms: u64, buffer_kb: usize, debug: u8) -> Self {
        let opts = Self::new()
            .with_timeout_ms(timeout_ms)
            .with_buffer_kb(buffer_kb);
        if debug > 0 {
            opts.with_debug(debug)
        } else {
            opts
        }
    }

    /// The timeout in milliseconds, 0 meaning "block indefinitely".
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.map_or(0, |t| t.as_millis() as u64)
    }

    /// The debug level in force for a session opened with these options.
    pub fn effective_debug_level(&self) -> u8 {
        self.debug.unwrap_or_else(debug_level)
    }

    pub(crate) fn verbosity(&self) -> Verbosity {
        Verbosity::from_level(self.effective_debug_level())
    }
}
