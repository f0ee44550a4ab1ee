//! Buffered byte sources for FCIO streams.
//!
//! A [`Transport`] owns one file, socket or reader plus a read buffer and
//! hands out exact-length byte slices. Bytes that were already received are
//! kept across timeouts, so a slow or live-growing source can be read again
//! after a [`FcioError::Timeout`] without losing data.

use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn, Level};

use crate::error::{FcioError, Result};
use crate::options::{ReconnectPolicy, SessionOptions, Verbosity};

/// Sleep between polls of a growing file or a pending accept.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Smallest read buffer a transport is created with.
const MIN_BUFFER_SIZE: usize = 4096;

/// A named data source.
///
/// Parsed from the endpoint strings used by the DAQ tools:
///
/// - `tcp://connect/PORT[/HOST]` connects to a server (HOST defaults to localhost)
/// - `tcp://listen/PORT[/IFACE]` listens and accepts one peer
/// - `-` reads standard input
/// - `file://PATH` or any other string is a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    File(PathBuf),
    Stdin,
    TcpConnect { host: String, port: u16 },
    TcpListen { iface: Option<String>, port: u16 },
}

impl Endpoint {
    fn is_socket(&self) -> bool {
        matches!(self, Self::TcpConnect { .. } | Self::TcpListen { .. })
    }
}

impl FromStr for Endpoint {
    type Err = FcioError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "-" {
            return Ok(Self::Stdin);
        }
        if let Some(path) = s.strip_prefix("file://") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        let Some(rest) = s.strip_prefix("tcp://") else {
            return Ok(Self::File(PathBuf::from(s)));
        };

        let invalid = |why: &str| FcioError::Open {
            endpoint: s.to_string(),
            source: io::Error::new(ErrorKind::InvalidInput, why.to_string()),
        };

        let mut parts = rest.splitn(3, '/');
        let mode = parts.next().unwrap_or_default();
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(|| invalid("missing or invalid port"))?;
        let host = parts.next().filter(|h| !h.is_empty()).map(str::to_string);

        match mode {
            "connect" => Ok(Self::TcpConnect {
                host: host.unwrap_or_else(|| "localhost".to_string()),
                port,
            }),
            "listen" => Ok(Self::TcpListen { iface: host, port }),
            _ => Err(invalid("expected tcp://connect/... or tcp://listen/...")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stdin => f.write_str("-"),
            Self::TcpConnect { host, port } => write!(f, "tcp://connect/{port}/{host}"),
            Self::TcpListen { iface: Some(iface), port } => {
                write!(f, "tcp://listen/{port}/{iface}")
            }
            Self::TcpListen { iface: None, port } => write!(f, "tcp://listen/{port}"),
        }
    }
}

enum Stream {
    File(File),
    Stdin(io::Stdin),
    Tcp(TcpStream),
    Reader(Box<dyn Read + Send>),
}

impl Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(f) => f.read(buf),
            Self::Stdin(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
            Self::Reader(r) => r.read(buf),
        }
    }

    fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    socket: Mutex<Option<TcpStream>>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_socket(&self, socket: Option<TcpStream>) {
        if let Ok(mut guard) = self.socket.lock() {
            *guard = socket;
        }
    }
}

/// Cancels blocked reads of a [`Transport`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Makes a pending or future read fail promptly with an IO error.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        if let Ok(guard) = self.shared.socket.lock() {
            if let Some(socket) = guard.as_ref() {
                let _ = socket.shutdown(Shutdown::Both);
            }
        }
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

/// Buffered reader over one data source.
pub struct Transport {
    endpoint: Option<Endpoint>,
    stream: Option<Stream>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    timeout: Option<Duration>,
    reconnect: Option<ReconnectPolicy>,
    follow: bool,
    at_boundary: bool,
    /// The socket was dropped for a reconnect that has not succeeded yet.
    disconnected: bool,
    consumed: u64,
    shared: Arc<Shared>,
    verbosity: Verbosity,
}

impl Transport {
    /// Opens `endpoint` with the timeout, buffer size and reconnect policy of `options`.
    pub fn open(endpoint: Endpoint, options: &SessionOptions) -> Result<Self> {
        let mut transport = Self::with_options(Some(endpoint.clone()), options);
        let stream = transport.connect(&endpoint)?;
        transport.stream = Some(stream);
        Ok(transport)
    }

    /// Wraps an arbitrary reader, e.g. an in-memory buffer or a pipe.
    ///
    /// `WouldBlock` and `TimedOut` errors from the reader are reported as
    /// [`FcioError::Timeout`].
    pub fn from_reader<R: Read + Send + 'static>(reader: R, options: &SessionOptions) -> Self {
        let mut transport = Self::with_options(None, options);
        transport.stream = Some(Stream::Reader(Box::new(reader)));
        transport
    }

    fn with_options(endpoint: Option<Endpoint>, options: &SessionOptions) -> Self {
        Self {
            endpoint,
            stream: None,
            buf: vec![0; options.buffer_size.max(MIN_BUFFER_SIZE)],
            start: 0,
            end: 0,
            timeout: options.timeout,
            reconnect: options.reconnect,
            follow: options.follow,
            at_boundary: true,
            disconnected: false,
            consumed: 0,
            shared: Arc::new(Shared::default()),
            verbosity: options.verbosity(),
        }
    }

    /// The endpoint this transport was opened on, if any.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Returns true until [`close`](Self::close) is called.
    pub fn is_open(&self) -> bool {
        self.stream.is_some() || self.disconnected
    }

    /// Number of bytes received but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Total number of bytes handed out by [`read_exact`](Self::read_exact).
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Handle for cancelling blocked reads from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Tells the transport whether the next read starts a new record.
    ///
    /// Reconnects are only attempted at a record boundary.
    pub fn set_record_boundary(&mut self, at_boundary: bool) {
        self.at_boundary = at_boundary;
    }

    /// Reads exactly `n` bytes.
    ///
    /// Blocks up to the configured timeout. On `Timeout` the bytes received so
    /// far stay buffered for the next call. `Eof` means the source ended with
    /// fewer than `n` bytes available; those bytes remain in [`buffered`](Self::buffered).
    pub fn read_exact(&mut self, n: usize) -> Result<&[u8]> {
        self.fill(n)?;
        let range = self.start..self.start + n;
        self.start += n;
        self.consumed += n as u64;
        Ok(&self.buf[range])
    }

    /// Releases the source. Safe to call any number of times.
    pub fn close(&mut self) {
        self.disconnected = false;
        if let Some(stream) = self.stream.take() {
            if let Stream::Tcp(socket) = &stream {
                let _ = socket.shutdown(Shutdown::Both);
            }
            drop(stream);
            self.shared.set_socket(None);
            self.start = 0;
            self.end = 0;
            if self.verbosity.enabled(Level::DEBUG) {
                debug!(endpoint = ?self.endpoint, "transport closed");
            }
        }
    }

    fn fill(&mut self, n: usize) -> Result<()> {
        let mut reconnects_left = self.reconnect.map_or(0, |p| p.attempts);
        let mut idle_since: Option<Instant> = None;

        while self.buffered() < n {
            if self.shared.is_closed() {
                return Err(closed_error());
            }
            if self.stream.is_none() && self.disconnected {
                self.reconnect(&mut reconnects_left)?;
                continue;
            }
            self.reserve(n);

            let (result, is_file) = match self.stream.as_mut() {
                Some(stream) => (stream.read(&mut self.buf[self.end..]), stream.is_file()),
                None => return Err(closed_error()),
            };

            match result {
                Ok(0) if self.shared.is_closed() => return Err(closed_error()),
                Ok(0) if self.follow && is_file => {
                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if self.timeout.is_some_and(|t| since.elapsed() >= t) {
                        return Err(self.timeout_error());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Ok(0) => return Err(FcioError::Eof),
                Ok(read) => {
                    self.end += read;
                    idle_since = None;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self.shared.is_closed() {
                        return Err(closed_error());
                    }
                    if reconnects_left > 0 && self.can_reconnect() {
                        self.stream = None;
                        self.shared.set_socket(None);
                        self.disconnected = true;
                        self.reconnect(&mut reconnects_left)?;
                        continue;
                    }
                    return Err(self.timeout_error());
                }
                Err(_) if self.shared.is_closed() => return Err(closed_error()),
                Err(err) => return Err(FcioError::Io(err)),
            }
        }
        Ok(())
    }

    /// Makes room for `n` contiguous bytes starting at `start`.
    fn reserve(&mut self, n: usize) {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        if self.buf.len() - self.start < n {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.buf.len() < n {
            self.buf.resize(n, 0);
        }
    }

    fn can_reconnect(&self) -> bool {
        self.at_boundary
            && self.buffered() == 0
            && self.endpoint.as_ref().is_some_and(Endpoint::is_socket)
    }

    /// Tries to reconnect until it succeeds or `attempts` runs out.
    ///
    /// Running out is a `Timeout`; the transport stays disconnected and the
    /// next read starts another round of attempts.
    fn reconnect(&mut self, attempts: &mut u32) -> Result<()> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(closed_error());
        };
        let delay = self.reconnect.map_or(Duration::ZERO, |p| p.delay);

        while *attempts > 0 {
            *attempts -= 1;
            if self.shared.is_closed() {
                return Err(closed_error());
            }
            if self.verbosity.enabled(Level::WARN) {
                warn!(%endpoint, ?delay, attempts_left = *attempts, "reconnecting");
            }
            std::thread::sleep(delay);

            match self.connect(&endpoint) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.disconnected = false;
                    return Ok(());
                }
                Err(FcioError::Open { source, .. }) => {
                    if self.verbosity.enabled(Level::WARN) {
                        warn!(%endpoint, error = %source, "reconnect failed");
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(self.timeout_error())
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<Stream> {
        let open_error = |source: io::Error| FcioError::Open {
            endpoint: endpoint.to_string(),
            source,
        };

        let stream = match endpoint {
            Endpoint::File(path) => Stream::File(File::open(path).map_err(open_error)?),
            Endpoint::Stdin => Stream::Stdin(io::stdin()),
            Endpoint::TcpConnect { host, port } => {
                let socket = self.connect_tcp(host, *port).map_err(open_error)?;
                self.install_socket(socket).map_err(open_error)?
            }
            Endpoint::TcpListen { iface, port } => {
                let socket = self
                    .accept_tcp(iface.as_deref().unwrap_or("0.0.0.0"), *port)
                    .map_err(open_error)?;
                self.install_socket(socket).map_err(open_error)?
            }
        };

        if self.verbosity.enabled(Level::INFO) {
            info!(%endpoint, "connected to data source");
        }
        Ok(stream)
    }

    fn connect_tcp(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_err = io::Error::new(ErrorKind::NotFound, "host resolved to no addresses");
        for addr in (host, port).to_socket_addrs()? {
            let attempt = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(socket) => return Ok(socket),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    fn accept_tcp(&self, iface: &str, port: u16) -> io::Result<TcpStream> {
        let listener = TcpListener::bind((iface, port))?;
        if self.verbosity.enabled(Level::INFO) {
            info!(iface, port, "waiting for peer");
        }
        let Some(timeout) = self.timeout else {
            return listener.accept().map(|(socket, _)| socket);
        };

        listener.set_nonblocking(true)?;
        let started = Instant::now();
        loop {
            match listener.accept() {
                Ok((socket, _)) => {
                    socket.set_nonblocking(false)?;
                    return Ok(socket);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if self.shared.is_closed() {
                        return Err(io::Error::new(ErrorKind::Interrupted, "transport closed"));
                    }
                    if started.elapsed() >= timeout {
                        return Err(io::Error::new(ErrorKind::TimedOut, "no peer connected"));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn install_socket(&self, socket: TcpStream) -> io::Result<Stream> {
        socket.set_read_timeout(self.timeout)?;
        socket.set_nodelay(true)?;
        self.shared.set_socket(Some(socket.try_clone()?));
        Ok(Stream::Tcp(socket))
    }

    fn timeout_error(&self) -> FcioError {
        FcioError::Timeout {
            timeout_ms: self.timeout.map_or(0, |t| t.as_millis() as u64),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .field("buffered", &self.buffered())
            .field("consumed", &self.consumed)
            .finish()
    }
}

fn closed_error() -> FcioError {
    FcioError::Io(io::Error::new(ErrorKind::NotConnected, "transport closed"))
}
