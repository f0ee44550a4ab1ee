//! Python bindings for the FCIO record-stream decoder.
//!
//! Records are snapshotted out of the session before they are handed to
//! Python, so `Event` and `Status` objects stay valid while reading goes on.
//! Array fields are copied into fresh numpy arrays on every access; keep the
//! returned array instead of re-reading the attribute in a tight loop.

use std::sync::Arc;

use fcio_core::{
    CardStatus as CoreCardStatus, Config as CoreConfig, EventRecord, FcioError, Session,
    SessionOptions, StatusRecord, Tag,
};
use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::level_filters::LevelFilter;

/// Routes decoder diagnostics to stderr. Each session gates its own messages
/// by its debug level, so the subscriber lets everything through.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::TRACE)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn to_py_err(err: FcioError) -> PyErr {
    let msg = err.to_string();
    match err {
        FcioError::Open { .. } | FcioError::Eof | FcioError::Io(_) => PyIOError::new_err(msg),
        FcioError::Timeout { .. } => PyTimeoutError::new_err(msg),
        FcioError::Framing(_) | FcioError::Layout(_) => PyValueError::new_err(msg),
        FcioError::Protocol(_) => PyRuntimeError::new_err(msg),
    }
}

fn matrix<'py>(
    py: Python<'py>,
    data: Vec<u16>,
    shape: (usize, usize),
) -> PyResult<&'py PyArray2<u16>> {
    data.into_pyarray(py).reshape([shape.0, shape.1])
}

/// Channel geometry of a stream.
#[pyclass(name = "Config")]
#[derive(Clone)]
pub struct PyConfig {
    inner: Arc<CoreConfig>,
}

#[pymethods]
impl PyConfig {
    #[getter]
    fn nadcs(&self) -> usize {
        self.inner.nadcs
    }

    #[getter]
    fn ntriggers(&self) -> usize {
        self.inner.ntriggers
    }

    #[getter]
    fn nsamples(&self) -> usize {
        self.inner.nsamples
    }

    #[getter]
    fn blprecision(&self) -> i32 {
        self.inner.blprecision
    }

    #[getter]
    fn sumlength(&self) -> i32 {
        self.inner.sumlength
    }

    #[getter]
    fn adcbits(&self) -> i32 {
        self.inner.adcbits
    }

    #[getter]
    fn mastercards(&self) -> i32 {
        self.inner.mastercards
    }

    #[getter]
    fn triggercards(&self) -> i32 {
        self.inner.triggercards
    }

    #[getter]
    fn adccards(&self) -> i32 {
        self.inner.adccards
    }

    #[getter]
    fn gps(&self) -> i32 {
        self.inner.gps
    }

    #[getter]
    fn telid(&self) -> i32 {
        self.inner.telid
    }

    /// Hardware address (`card << 16 | channel`) of every ADC and trigger channel.
    #[getter]
    fn tracemap<'py>(&self, py: Python<'py>) -> &'py PyArray1<u32> {
        self.inner.tracemap.clone().into_pyarray(py)
    }

    fn __repr__(&self) -> String {
        format!(
            "Config(nadcs={}, ntriggers={}, nsamples={}, blprecision={}, sumlength={})",
            self.inner.nadcs,
            self.inner.ntriggers,
            self.inner.nsamples,
            self.inner.blprecision,
            self.inner.sumlength
        )
    }
}

/// One full or sparse event.
#[pyclass]
pub struct Event {
    record: EventRecord,
}

#[pymethods]
impl Event {
    #[getter]
    fn config(&self) -> PyConfig {
        PyConfig {
            inner: Arc::clone(self.record.config()),
        }
    }

    #[getter]
    fn is_sparse(&self) -> bool {
        self.record.view().is_sparse()
    }

    #[getter]
    fn numtraces(&self) -> usize {
        self.record.view().numtraces()
    }

    /// ADC channel of each row of `traces`.
    #[getter]
    fn tracelist<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.record.view().tracelist().to_vec().into_pyarray(py)
    }

    /// Waveforms, shape `(numtraces, nsamples)`.
    #[getter]
    fn traces<'py>(&self, py: Python<'py>) -> PyResult<&'py PyArray2<u16>> {
        let traces = self.record.view().traces();
        matrix(py, traces.to_vec(), traces.shape())
    }

    /// Trigger-sum waveforms, shape `(ntriggers, nsamples)`.
    ///
    /// Raises ValueError for sparse events.
    #[getter]
    fn triggertraces<'py>(&self, py: Python<'py>) -> PyResult<&'py PyArray2<u16>> {
        let traces = self.record.view().triggertraces().map_err(to_py_err)?;
        matrix(py, traces.to_vec(), traces.shape())
    }

    /// Baselines in ADC units.
    #[getter]
    fn baseline<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.record.view().baseline().into_pyarray(py)
    }

    #[getter]
    fn integrator<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.record.view().integrator().to_vec().into_pyarray(py)
    }

    #[getter]
    fn daqenergy<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.record.view().daqenergy().into_pyarray(py)
    }

    #[getter]
    fn eventtype(&self) -> i32 {
        self.record.header().eventtype
    }

    #[getter]
    fn pulser(&self) -> f32 {
        self.record.header().pulser
    }

    #[getter]
    fn timestamp<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.record.header().timestamp().to_vec().into_pyarray(py)
    }

    #[getter]
    fn timeoffset<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.record.header().timeoffset().to_vec().into_pyarray(py)
    }

    #[getter]
    fn deadregion<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.record.header().deadregion().to_vec().into_pyarray(py)
    }

    #[getter]
    fn eventnumber(&self) -> i32 {
        self.record.header().eventnumber()
    }

    #[getter]
    fn timestamp_pps(&self) -> i32 {
        self.record.header().timestamp_pps()
    }

    #[getter]
    fn timestamp_ticks(&self) -> i32 {
        self.record.header().timestamp_ticks()
    }

    #[getter]
    fn timestamp_maxticks(&self) -> i32 {
        self.record.header().timestamp_maxticks()
    }

    #[getter]
    fn timeoffset_mu_sec(&self) -> i32 {
        self.record.header().timeoffset_mu_sec()
    }

    #[getter]
    fn timeoffset_mu_usec(&self) -> i32 {
        self.record.header().timeoffset_mu_usec()
    }

    #[getter]
    fn timeoffset_master_sec(&self) -> i32 {
        self.record.header().timeoffset_master_sec()
    }

    #[getter]
    fn timeoffset_dt_mu_usec(&self) -> i32 {
        self.record.header().timeoffset_dt_mu_usec()
    }

    #[getter]
    fn timeoffset_abs_mu_usec(&self) -> i32 {
        self.record.header().timeoffset_abs_mu_usec()
    }

    #[getter]
    fn timeoffset_start_sec(&self) -> i32 {
        self.record.header().timeoffset_start_sec()
    }

    #[getter]
    fn timeoffset_start_usec(&self) -> i32 {
        self.record.header().timeoffset_start_usec()
    }

    #[getter]
    fn deadregion_start_pps(&self) -> i32 {
        self.record.header().deadregion_start_pps()
    }

    #[getter]
    fn deadregion_start_ticks(&self) -> i32 {
        self.record.header().deadregion_start_ticks()
    }

    #[getter]
    fn deadregion_stop_pps(&self) -> i32 {
        self.record.header().deadregion_stop_pps()
    }

    #[getter]
    fn deadregion_stop_ticks(&self) -> i32 {
        self.record.header().deadregion_stop_ticks()
    }

    #[getter]
    fn deadregion_maxticks(&self) -> i32 {
        self.record.header().deadregion_maxticks()
    }

    #[getter]
    fn last_sample_period_ns(&self) -> f64 {
        self.record.header().sample_period_ns()
    }

    #[getter]
    fn runtime_ns(&self) -> i64 {
        self.record.header().runtime_ns()
    }

    /// Seconds since the start of the run.
    #[getter]
    fn runtime_imprecise(&self) -> f64 {
        self.record.header().runtime_imprecise()
    }

    #[getter]
    fn eventtime_ns(&self) -> i64 {
        self.record.header().eventtime_ns()
    }

    #[getter]
    fn eventtime_imprecise(&self) -> f64 {
        self.record.header().eventtime_imprecise()
    }

    #[getter]
    fn deadtime_ns(&self) -> i64 {
        self.record.header().deadtime_ns()
    }

    #[getter]
    fn deadtime_imprecise(&self) -> f64 {
        self.record.header().deadtime_imprecise()
    }

    fn __repr__(&self) -> String {
        let view = self.record.view();
        format!(
            "Event(eventnumber={}, numtraces={}, sparse={}, runtime={:.9})",
            view.header().eventnumber(),
            view.numtraces(),
            view.is_sparse(),
            view.runtime_imprecise()
        )
    }
}

/// Status of one readout card.
#[pyclass]
pub struct CardStatus {
    #[pyo3(get)]
    reqid: u32,
    #[pyo3(get)]
    status: u32,
    #[pyo3(get)]
    eventno: u32,
    #[pyo3(get)]
    pps: u32,
    #[pyo3(get)]
    ticks: u32,
    #[pyo3(get)]
    maxticks: u32,
    #[pyo3(get)]
    numenv: usize,
    #[pyo3(get)]
    numctilinks: usize,
    #[pyo3(get)]
    numlinks: usize,
    #[pyo3(get)]
    dummy: u32,
    #[pyo3(get)]
    totalerrors: u32,
    othererrors: Vec<u32>,
    environment: Vec<u16>,
    ctierrors: Vec<u16>,
    linkerrors: Vec<u16>,
    enverrors: Vec<u16>,
}

impl CardStatus {
    fn from_view(card: &CoreCardStatus<'_>) -> Self {
        Self {
            reqid: card.reqid(),
            status: card.status(),
            eventno: card.eventno(),
            pps: card.pps(),
            ticks: card.ticks(),
            maxticks: card.maxticks(),
            numenv: card.numenv(),
            numctilinks: card.numctilinks(),
            numlinks: card.numlinks(),
            dummy: card.dummy(),
            totalerrors: card.totalerrors(),
            othererrors: card.othererrors().to_vec(),
            environment: card.environment().to_vec(),
            ctierrors: card.ctierrors().to_vec(),
            linkerrors: card.linkerrors().to_vec(),
            enverrors: card.enverrors().to_vec(),
        }
    }
}

#[pymethods]
impl CardStatus {
    #[getter]
    fn othererrors<'py>(&self, py: Python<'py>) -> &'py PyArray1<u32> {
        self.othererrors.clone().into_pyarray(py)
    }

    #[getter]
    fn environment<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.environment.clone().into_pyarray(py)
    }

    #[getter]
    fn ctierrors<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.ctierrors.clone().into_pyarray(py)
    }

    #[getter]
    fn linkerrors<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.linkerrors.clone().into_pyarray(py)
    }

    #[getter]
    fn enverrors<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.enverrors.clone().into_pyarray(py)
    }

    fn __repr__(&self) -> String {
        format!(
            "CardStatus(reqid={:#x}, status={}, totalerrors={})",
            self.reqid, self.status, self.totalerrors
        )
    }
}

/// One status record.
#[pyclass]
pub struct Status {
    record: StatusRecord,
}

#[pymethods]
impl Status {
    #[getter]
    fn status(&self) -> i32 {
        self.record.view().status()
    }

    /// `[pps, ticks, unix sec, unix usec]`
    #[getter]
    fn statustime<'py>(&self, py: Python<'py>) -> &'py PyArray1<i32> {
        self.record.view().statustime().to_vec().into_pyarray(py)
    }

    /// Number of cards in the record.
    #[getter]
    fn cards(&self) -> usize {
        self.record.view().num_cards()
    }

    #[getter]
    fn size(&self) -> i32 {
        self.record.view().size()
    }

    /// The per-card statuses.
    #[getter]
    fn data(&self) -> Vec<CardStatus> {
        self.record
            .view()
            .cards()
            .map(|card| CardStatus::from_view(&card))
            .collect()
    }

    /// Returns the scalar fields as a dictionary.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let view = self.record.view();
        let dict = PyDict::new(py);
        dict.set_item("status", view.status())?;
        dict.set_item("statustime", view.statustime().to_vec().into_pyarray(py))?;
        dict.set_item("cards", view.num_cards())?;
        dict.set_item("size", view.size())?;
        Ok(dict.into())
    }

    fn __repr__(&self) -> String {
        let view = self.record.view();
        format!(
            "Status(status={}, statustime={:?}, cards={})",
            view.status(),
            view.statustime(),
            view.num_cards()
        )
    }
}

/// Reader of an FCIO stream.
///
/// Example:
///     >>> import fcio
///     >>> with fcio.FCIO("run0001.fcio") as io:
///     ...     for event in io.events:
///     ...         print(event.eventnumber, event.baseline)
#[pyclass(name = "FCIO")]
pub struct Fcio {
    #[pyo3(get)]
    filename: String,
    session: Session,
    options: SessionOptions,
}

impl Fcio {
    /// Reads the next record with the GIL released.
    fn advance(&mut self, py: Python<'_>) -> PyResult<Option<Tag>> {
        if !self.session.is_open() {
            return Err(PyIOError::new_err(format!(
                "File {} not opened.",
                self.filename
            )));
        }
        let session = &mut self.session;
        py.allow_threads(|| session.advance()).map_err(to_py_err)
    }

    fn event(&self) -> Option<Event> {
        self.session.event().map(|event| Event {
            record: event.snapshot(),
        })
    }

    fn status(&self) -> Option<Status> {
        self.session.status().map(|status| Status {
            record: status.snapshot(),
        })
    }
}

#[pymethods]
impl Fcio {
    /// Opens `filename`, a path, `-` or a `tcp://` address.
    ///
    /// `timeout` is in milliseconds (0 blocks), `buffersize` in KiB (0 keeps
    /// the default). `debug` sets the log level of this stream; 0 follows
    /// `fcio.set_debug_level`.
    #[new]
    #[pyo3(signature = (filename, timeout=0, buffersize=0, debug=0))]
    fn new(
        py: Python<'_>,
        filename: String,
        timeout: u64,
        buffersize: usize,
        debug: u8,
    ) -> PyResult<Self> {
        let options = SessionOptions::from_open_args(timeout, buffersize, debug);
        let mut io = Self {
            filename,
            session: Session::new(options.clone()),
            options,
        };
        io.open(py)?;
        Ok(io)
    }

    /// Opens the stream again from the start, closing it first if needed.
    fn open(&mut self, py: Python<'_>) -> PyResult<()> {
        let session = &mut self.session;
        let filename = self.filename.as_str();
        py.allow_threads(|| session.open(filename)).map_err(to_py_err)
    }

    fn close(&mut self) {
        self.session.close();
    }

    #[getter]
    fn is_open(&self) -> bool {
        self.session.is_open()
    }

    #[getter]
    fn timeout(&self) -> u64 {
        self.options.timeout_ms()
    }

    fn __enter__<'a>(mut slf: PyRefMut<'a, Self>, py: Python<'_>) -> PyResult<PyRefMut<'a, Self>> {
        if !slf.session.is_open() {
            slf.open(py)?;
        }
        Ok(slf)
    }

    fn __exit__(
        &mut self,
        _exc_type: Option<PyObject>,
        _exc_value: Option<PyObject>,
        _traceback: Option<PyObject>,
    ) -> bool {
        self.close();
        false
    }

    /// The Config currently in force.
    #[getter]
    fn config(&self) -> Option<PyConfig> {
        self.session.config().map(|inner| PyConfig {
            inner: Arc::clone(inner),
        })
    }

    /// The last event read.
    #[getter(event)]
    fn last_event(&self) -> Option<Event> {
        self.event()
    }

    /// The last status read.
    #[getter(status)]
    fn last_status(&self) -> Option<Status> {
        self.status()
    }

    /// Reads one record and returns its tag, or 0 at end of stream.
    fn get_record(&mut self, py: Python<'_>) -> PyResult<i32> {
        Ok(self.advance(py)?.map_or(0, Tag::as_i32))
    }

    /// Iterator over the tags of all remaining records.
    #[getter]
    fn records(slf: PyRef<'_, Self>) -> RecordIter {
        RecordIter { io: slf.into() }
    }

    /// Iterator over the remaining events and sparse events.
    #[getter]
    fn events(slf: PyRef<'_, Self>) -> EventIter {
        EventIter { io: slf.into() }
    }

    /// Iterator over the remaining status records.
    #[getter]
    fn statuses(slf: PyRef<'_, Self>) -> StatusIter {
        StatusIter { io: slf.into() }
    }

    fn __repr__(&self) -> String {
        format!(
            "FCIO(filename={:?}, open={}, records={})",
            self.filename,
            self.session.is_open(),
            self.session.counts().total()
        )
    }
}

#[pyclass]
pub struct RecordIter {
    io: Py<Fcio>,
}

#[pymethods]
impl RecordIter {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&self, py: Python<'_>) -> PyResult<Option<i32>> {
        let mut io = self.io.borrow_mut(py);
        Ok(io.advance(py)?.map(Tag::as_i32))
    }
}

#[pyclass]
pub struct EventIter {
    io: Py<Fcio>,
}

#[pymethods]
impl EventIter {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&self, py: Python<'_>) -> PyResult<Option<Event>> {
        let mut io = self.io.borrow_mut(py);
        while let Some(tag) = io.advance(py)? {
            if tag.is_event() {
                return Ok(io.event());
            }
        }
        Ok(None)
    }
}

#[pyclass]
pub struct StatusIter {
    io: Py<Fcio>,
}

#[pymethods]
impl StatusIter {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(&self, py: Python<'_>) -> PyResult<Option<Status>> {
        let mut io = self.io.borrow_mut(py);
        while let Some(tag) = io.advance(py)? {
            if tag == Tag::Status {
                return Ok(io.status());
            }
        }
        Ok(None)
    }
}

/// Sets the process-wide debug level and returns the previous one.
///
/// Applies to streams opened afterwards with `debug=0`. Messages go to stderr.
#[pyfunction]
fn set_debug_level(level: u8) -> u8 {
    fcio_core::set_debug_level(level)
}

/// FCIO stream decoder module for Python.
#[pymodule]
fn fcio(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    init_logging();
    m.add_function(wrap_pyfunction!(set_debug_level, m)?)?;
    m.add_class::<Fcio>()?;
    m.add_class::<PyConfig>()?;
    m.add_class::<Event>()?;
    m.add_class::<Status>()?;
    m.add_class::<CardStatus>()?;
    m.add("CONFIG", Tag::CONFIG)?;
    m.add("EVENT", Tag::EVENT)?;
    m.add("STATUS", Tag::STATUS)?;
    m.add("SPARSE_EVENT", Tag::SPARSE_EVENT)?;
    Ok(())
}
