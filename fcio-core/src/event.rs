//! Event and SparseEvent decoding.
//!
//! An event payload is a 128-byte header followed by channel slots of
//! `nsamples + 2` samples each (`[baseline, integrator, samples...]`). Full
//! events append `ntriggers` trigger-sum traces; sparse events prefix the
//! slots with a trace count and the list of channels present.

use std::sync::Arc;

use crate::error::{FcioError, Result};
use crate::parser::{
    self, DEADREGION_LEN, EVENT_ARRAY_SLOTS, EVENT_DEADREGION_OFFSET, EVENT_HEADER_SIZE,
    EVENT_PULSER_OFFSET, EVENT_TIMEOFFSET_OFFSET, EVENT_TIMESTAMP_OFFSET, EVENT_TYPE_OFFSET,
    SAMPLE_SIZE, SPARSE_COUNT_SIZE, TIMEOFFSET_LEN, TIMESTAMP_LEN,
};
use crate::types::{Config, Layout, Tag};
use crate::view::{Samples, TraceList, TraceMatrix};

const NS_PER_SEC: i128 = 1_000_000_000;

/// Nanoseconds for `pps` seconds plus `ticks` of a `maxticks + 1` tick clock.
///
/// A non-positive tick modulus is treated as 1.
pub fn ticks_to_ns(pps: i64, ticks: i64, maxticks: i64) -> i64 {
    let modulus = (maxticks as i128 + 1).max(1);
    let ns = pps as i128 * NS_PER_SEC + (ticks as i128 * NS_PER_SEC).div_euclid(modulus);
    ns.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn ticks_to_secs(pps: i64, ticks: i64, maxticks: i64) -> f64 {
    let modulus = (maxticks + 1).max(1);
    pps as f64 + ticks as f64 / modulus as f64
}

/// The fixed header shared by Event and SparseEvent records.
///
/// The arrays hold every slot on the wire; the accessors expose the
/// meaningful prefix only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventHeader {
    pub eventtype: i32,
    pub pulser: f32,
    pub timeoffset: [i32; EVENT_ARRAY_SLOTS],
    pub timestamp: [i32; EVENT_ARRAY_SLOTS],
    pub deadregion: [i32; EVENT_ARRAY_SLOTS],
}

impl EventHeader {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            eventtype: parser::read_i32(payload, EVENT_TYPE_OFFSET, "event type")?,
            pulser: parser::read_f32(payload, EVENT_PULSER_OFFSET, "pulser")?,
            timeoffset: parser::read_i32_array(payload, EVENT_TIMEOFFSET_OFFSET, "timeoffset")?,
            timestamp: parser::read_i32_array(payload, EVENT_TIMESTAMP_OFFSET, "timestamp")?,
            deadregion: parser::read_i32_array(payload, EVENT_DEADREGION_OFFSET, "deadregion")?,
        })
    }

    /// Appends the 128-byte wire form to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.eventtype.to_le_bytes());
        out.extend_from_slice(&self.pulser.to_le_bytes());
        for value in self
            .timeoffset
            .iter()
            .chain(&self.timestamp)
            .chain(&self.deadregion)
        {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Builds a header from the event number and the PPS clock.
    pub fn with_timestamp(eventnumber: i32, pps: i32, ticks: i32, maxticks: i32) -> Self {
        let mut header = Self::default();
        header.timestamp[..TIMESTAMP_LEN].copy_from_slice(&[eventnumber, pps, ticks, maxticks]);
        header
    }

    /// `[eventnumber, pps, ticks, maxticks]`
    pub fn timestamp(&self) -> [i32; TIMESTAMP_LEN] {
        prefix(&self.timestamp)
    }

    /// `[mu_sec, mu_usec, master_sec, dt_mu_usec, abs_mu_usec, start_sec, start_usec]`
    pub fn timeoffset(&self) -> [i32; TIMEOFFSET_LEN] {
        prefix(&self.timeoffset)
    }

    /// `[start_pps, start_ticks, stop_pps, stop_ticks, maxticks]`
    pub fn deadregion(&self) -> [i32; DEADREGION_LEN] {
        prefix(&self.deadregion)
    }

    pub fn eventnumber(&self) -> i32 {
        self.timestamp[0]
    }

    pub fn timestamp_pps(&self) -> i32 {
        self.timestamp[1]
    }

    pub fn timestamp_ticks(&self) -> i32 {
        self.timestamp[2]
    }

    pub fn timestamp_maxticks(&self) -> i32 {
        self.timestamp[3]
    }

    pub fn timeoffset_mu_sec(&self) -> i32 {
        self.timeoffset[0]
    }

    pub fn timeoffset_mu_usec(&self) -> i32 {
        self.timeoffset[1]
    }

    pub fn timeoffset_master_sec(&self) -> i32 {
        self.timeoffset[2]
    }

    pub fn timeoffset_dt_mu_usec(&self) -> i32 {
        self.timeoffset[3]
    }

    pub fn timeoffset_abs_mu_usec(&self) -> i32 {
        self.timeoffset[4]
    }

    pub fn timeoffset_start_sec(&self) -> i32 {
        self.timeoffset[5]
    }

    pub fn timeoffset_start_usec(&self) -> i32 {
        self.timeoffset[6]
    }

    pub fn deadregion_start_pps(&self) -> i32 {
        self.deadregion[0]
    }

    pub fn deadregion_start_ticks(&self) -> i32 {
        self.deadregion[1]
    }

    pub fn deadregion_stop_pps(&self) -> i32 {
        self.deadregion[2]
    }

    pub fn deadregion_stop_ticks(&self) -> i32 {
        self.deadregion[3]
    }

    pub fn deadregion_maxticks(&self) -> i32 {
        self.deadregion[4]
    }

    /// Length of one clock tick in nanoseconds.
    pub fn sample_period_ns(&self) -> f64 {
        1e9 / (self.timestamp_maxticks() as f64 + 1.0).max(1.0)
    }

    /// Time since the start of the run, exact to the nanosecond floor.
    pub fn runtime_ns(&self) -> i64 {
        ticks_to_ns(
            self.timestamp_pps().into(),
            self.timestamp_ticks().into(),
            self.timestamp_maxticks().into(),
        )
    }

    /// Time since the start of the run in seconds. Not for timing-critical use.
    pub fn runtime_imprecise(&self) -> f64 {
        ticks_to_secs(
            self.timestamp_pps().into(),
            self.timestamp_ticks().into(),
            self.timestamp_maxticks().into(),
        )
    }

    /// Absolute event time: master clock seconds plus [`runtime_ns`](Self::runtime_ns).
    pub fn eventtime_ns(&self) -> i64 {
        let master = i64::from(self.timeoffset_master_sec()) * NS_PER_SEC as i64;
        master.saturating_add(self.runtime_ns())
    }

    pub fn eventtime_imprecise(&self) -> f64 {
        self.timeoffset_master_sec() as f64 + self.runtime_imprecise()
    }

    /// Length of the dead-time window in nanoseconds.
    pub fn deadtime_ns(&self) -> i64 {
        let pps = i64::from(self.deadregion_stop_pps()) - i64::from(self.deadregion_start_pps());
        let ticks =
            i64::from(self.deadregion_stop_ticks()) - i64::from(self.deadregion_start_ticks());
        ticks_to_ns(pps, ticks, self.deadregion_maxticks().into())
    }

    pub fn deadtime_imprecise(&self) -> f64 {
        let pps = i64::from(self.deadregion_stop_pps()) - i64::from(self.deadregion_start_pps());
        let ticks =
            i64::from(self.deadregion_stop_ticks()) - i64::from(self.deadregion_start_ticks());
        ticks_to_secs(pps, ticks, self.deadregion_maxticks().into())
    }
}

fn prefix<const N: usize>(slots: &[i32; EVENT_ARRAY_SLOTS]) -> [i32; N] {
    let mut out = [0; N];
    out.copy_from_slice(&slots[..N]);
    out
}

/// Zero-copy view of one Event or SparseEvent payload.
///
/// Borrowed from the session buffers; call [`snapshot`](Self::snapshot) to
/// keep it past the next read.
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    sparse: bool,
    payload: &'a [u8],
    config: &'a Arc<Config>,
    layout: Layout,
    header: EventHeader,
    numtraces: usize,
}

impl<'a> EventView<'a> {
    /// Validates `payload` against the layout of `config` and builds a view.
    ///
    /// `tag` must be [`Tag::Event`] or [`Tag::SparseEvent`].
    pub fn decode(tag: Tag, payload: &'a [u8], config: &'a Arc<Config>) -> Result<Self> {
        let sparse = match tag {
            Tag::Event => false,
            Tag::SparseEvent => true,
            other => {
                return Err(FcioError::protocol(format!(
                    "record with tag {} is not an event",
                    other.as_i32()
                )))
            }
        };
        let header = EventHeader::decode(payload)?;
        let layout = config.layout();
        let body = &payload[EVENT_HEADER_SIZE..];

        let (numtraces, expected) = if sparse {
            let numtraces = parser::read_count(body, 0, "numtraces")?;
            if numtraces > layout.nadcs {
                return Err(FcioError::framing(format!(
                    "sparse event lists {numtraces} traces but config has {} adcs",
                    layout.nadcs
                )));
            }
            (numtraces, layout.sparse_body_size(numtraces))
        } else {
            (layout.nadcs, layout.event_body_size())
        };

        if body.len() != expected {
            return Err(FcioError::framing(format!(
                "event body is {} bytes, expected {expected} for {numtraces} traces of {} samples",
                body.len(),
                layout.nsamples
            )));
        }

        let view = Self::assemble(sparse, payload, config, header, numtraces);
        if let TraceList::Listed(list) = view.tracelist() {
            if let Some(bad) = list.iter().find(|&ch| usize::from(ch) >= layout.nadcs) {
                return Err(FcioError::framing(format!(
                    "tracelist entry {bad} out of range for {} adcs",
                    layout.nadcs
                )));
            }
        }
        Ok(view)
    }

    fn assemble(
        sparse: bool,
        payload: &'a [u8],
        config: &'a Arc<Config>,
        header: EventHeader,
        numtraces: usize,
    ) -> Self {
        Self {
            sparse,
            payload,
            config,
            layout: config.layout(),
            header,
            numtraces,
        }
    }

    pub fn tag(&self) -> Tag {
        if self.sparse {
            Tag::SparseEvent
        } else {
            Tag::Event
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// The Config this event was decoded under.
    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    /// Raw payload bytes, header included.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Number of channel slots carried by this event.
    pub fn numtraces(&self) -> usize {
        self.numtraces
    }

    /// Offset of the first channel slot within the payload.
    fn slots_offset(&self) -> usize {
        if self.sparse {
            EVENT_HEADER_SIZE + SPARSE_COUNT_SIZE + self.numtraces * SAMPLE_SIZE
        } else {
            EVENT_HEADER_SIZE
        }
    }

    /// ADC channel numbers of the traces, in slot order.
    pub fn tracelist(&self) -> TraceList<'a> {
        if self.sparse {
            TraceList::Listed(Samples::contiguous(
                self.payload,
                EVENT_HEADER_SIZE + SPARSE_COUNT_SIZE,
                self.numtraces,
            ))
        } else {
            TraceList::All(self.numtraces)
        }
    }

    /// Fixed-point baselines, one per trace.
    pub fn baseline_raw(&self) -> Samples<'a> {
        Samples::new(
            self.payload,
            self.slots_offset(),
            self.layout.stride_bytes,
            self.numtraces,
        )
    }

    /// Raw integrator values, one per trace.
    pub fn integrator(&self) -> Samples<'a> {
        Samples::new(
            self.payload,
            self.slots_offset() + SAMPLE_SIZE,
            self.layout.stride_bytes,
            self.numtraces,
        )
    }

    /// Waveforms, shape `(numtraces, nsamples)`.
    pub fn traces(&self) -> TraceMatrix<'a> {
        TraceMatrix::new(
            self.payload,
            self.slots_offset() + 2 * SAMPLE_SIZE,
            self.layout.stride_bytes,
            self.numtraces,
            self.layout.nsamples,
        )
    }

    /// Trigger-sum waveforms, shape `(ntriggers, nsamples)`.
    ///
    /// Sparse events do not carry trigger-sum channels and fail with
    /// [`FcioError::Layout`].
    pub fn triggertraces(&self) -> Result<TraceMatrix<'a>> {
        if self.sparse {
            return Err(FcioError::Layout(
                "sparse events do not carry trigger-sum traces".to_string(),
            ));
        }
        Ok(TraceMatrix::new(
            self.payload,
            EVENT_HEADER_SIZE + self.layout.adc_block_size(self.layout.nadcs),
            self.layout.nsamples * SAMPLE_SIZE,
            self.layout.ntriggers,
            self.layout.nsamples,
        ))
    }

    /// Baselines in ADC units (`raw / blprecision`).
    pub fn baseline(&self) -> Vec<f64> {
        let precision = f64::from(self.config.blprecision);
        self.baseline_raw()
            .iter()
            .map(|raw| f64::from(raw) / precision)
            .collect()
    }

    /// `(integrator - baseline) * sumlength / blprecision` per trace.
    pub fn daqenergy(&self) -> Vec<f64> {
        let scale = self.config.energy_scale();
        self.integrator()
            .iter()
            .zip(self.baseline_raw())
            .map(|(integ, bl)| (f64::from(integ) - f64::from(bl)) * scale)
            .collect()
    }

    pub fn eventtype(&self) -> i32 {
        self.header.eventtype
    }

    pub fn pulser(&self) -> f32 {
        self.header.pulser
    }

    pub fn timestamp(&self) -> [i32; TIMESTAMP_LEN] {
        self.header.timestamp()
    }

    pub fn timeoffset(&self) -> [i32; TIMEOFFSET_LEN] {
        self.header.timeoffset()
    }

    pub fn deadregion(&self) -> [i32; DEADREGION_LEN] {
        self.header.deadregion()
    }

    pub fn sample_period_ns(&self) -> f64 {
        self.header.sample_period_ns()
    }

    pub fn runtime_ns(&self) -> i64 {
        self.header.runtime_ns()
    }

    pub fn runtime_imprecise(&self) -> f64 {
        self.header.runtime_imprecise()
    }

    pub fn eventtime_ns(&self) -> i64 {
        self.header.eventtime_ns()
    }

    pub fn eventtime_imprecise(&self) -> f64 {
        self.header.eventtime_imprecise()
    }

    pub fn deadtime_ns(&self) -> i64 {
        self.header.deadtime_ns()
    }

    pub fn deadtime_imprecise(&self) -> f64 {
        self.header.deadtime_imprecise()
    }

    /// Copies the event out of the session buffers.
    pub fn snapshot(&self) -> EventRecord {
        EventRecord {
            payload: self.payload.to_vec(),
            meta: self.meta(),
        }
    }

    pub(crate) fn meta(&self) -> EventMeta {
        EventMeta {
            sparse: self.sparse,
            config: Arc::clone(self.config),
            header: self.header,
            numtraces: self.numtraces,
        }
    }
}

/// Everything a validated event view holds besides its payload.
#[derive(Debug, Clone)]
pub(crate) struct EventMeta {
    sparse: bool,
    config: Arc<Config>,
    header: EventHeader,
    numtraces: usize,
}

impl EventMeta {
    /// Rebuilds the view over the payload this metadata was taken from.
    pub(crate) fn view<'a>(&'a self, payload: &'a [u8]) -> EventView<'a> {
        EventView::assemble(
            self.sparse,
            payload,
            &self.config,
            self.header,
            self.numtraces,
        )
    }
}

/// An owned event snapshot that outlives the session buffers.
#[derive(Debug, Clone)]
pub struct EventRecord {
    payload: Vec<u8>,
    meta: EventMeta,
}

impl EventRecord {
    /// A view over the snapshot with the same accessors as the live event.
    pub fn view(&self) -> EventView<'_> {
        self.meta.view(&self.payload)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.meta.config
    }

    pub fn header(&self) -> &EventHeader {
        &self.meta.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nadcs: usize, ntriggers: usize, nsamples: usize) -> Arc<Config> {
        Arc::new(Config {
            nadcs,
            ntriggers,
            nsamples,
            blprecision: 4,
            sumlength: 8,
            adcbits: 12,
            mastercards: 1,
            triggercards: 1,
            adccards: 1,
            gps: 0,
            telid: 0,
            tracemap: vec![0; nadcs + ntriggers],
        })
    }

    fn push_u16(out: &mut Vec<u8>, values: &[u16]) {
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Full event: channel c has baseline 400+c, integrator 480+c, samples c*10+s.
    fn full_payload(header: &EventHeader, nadcs: usize, ntriggers: usize, nsamples: usize) -> Vec<u8> {
        let mut out = Vec::new();
        header.encode_into(&mut out);
        for c in 0..nadcs as u16 {
            push_u16(&mut out, &[400 + c, 480 + c]);
            let samples: Vec<u16> = (0..nsamples as u16).map(|s| c * 10 + s).collect();
            push_u16(&mut out, &samples);
        }
        for t in 0..ntriggers as u16 {
            let samples: Vec<u16> = (0..nsamples as u16).map(|s| 1000 + t * 100 + s).collect();
            push_u16(&mut out, &samples);
        }
        out
    }

    fn sparse_payload(header: &EventHeader, channels: &[u16], nsamples: usize) -> Vec<u8> {
        let mut out = Vec::new();
        header.encode_into(&mut out);
        out.extend_from_slice(&(channels.len() as i32).to_le_bytes());
        push_u16(&mut out, channels);
        for &c in channels {
            push_u16(&mut out, &[400 + c, 480 + c]);
            let samples: Vec<u16> = (0..nsamples as u16).map(|s| c * 10 + s).collect();
            push_u16(&mut out, &samples);
        }
        out
    }

    #[test]
    fn test_header_roundtrip_size() {
        let header = EventHeader::with_timestamp(7, 12, 500, 999);
        let mut buf = Vec::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), EVENT_HEADER_SIZE);
        assert_eq!(EventHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_full_event_views() {
        let cfg = config(3, 1, 4);
        let payload = full_payload(&EventHeader::default(), 3, 1, 4);
        let event = EventView::decode(Tag::Event, &payload, &cfg).unwrap();

        assert_eq!(event.numtraces(), 3);
        assert_eq!(event.baseline_raw().to_vec(), vec![400, 401, 402]);
        assert_eq!(event.integrator().to_vec(), vec![480, 481, 482]);
        assert_eq!(event.traces().shape(), (3, 4));
        assert_eq!(event.traces().row(2).unwrap().to_vec(), vec![20, 21, 22, 23]);
        assert_eq!(event.tracelist().to_vec(), vec![0, 1, 2]);

        let triggers = event.triggertraces().unwrap();
        assert_eq!(triggers.shape(), (1, 4));
        assert_eq!(triggers.to_vec(), vec![1000, 1001, 1002, 1003]);
    }

    #[test]
    fn test_baseline_and_energy() {
        let cfg = config(2, 0, 2);
        let payload = full_payload(&EventHeader::default(), 2, 0, 2);
        let event = EventView::decode(Tag::Event, &payload, &cfg).unwrap();

        assert_eq!(event.baseline(), vec![100.0, 100.25]);
        // (480 - 400) * 8 / 4
        assert_eq!(event.daqenergy(), vec![160.0, 160.0]);
    }

    #[test]
    fn test_sparse_event_views() {
        let cfg = config(4, 1, 3);
        let payload = sparse_payload(&EventHeader::default(), &[1, 3], 3);
        let event = EventView::decode(Tag::SparseEvent, &payload, &cfg).unwrap();

        assert!(event.is_sparse());
        assert_eq!(event.numtraces(), 2);
        assert_eq!(event.tracelist().to_vec(), vec![1, 3]);
        assert_eq!(event.baseline_raw().to_vec(), vec![401, 403]);
        assert_eq!(event.traces().row(1).unwrap().to_vec(), vec![30, 31, 32]);
        assert!(matches!(event.triggertraces(), Err(FcioError::Layout(_))));
        // Layout errors are local: the view stays usable.
        assert_eq!(event.integrator().len(), 2);
    }

    #[test]
    fn test_sparse_event_count_checks() {
        let cfg = config(2, 0, 3);
        let too_many = sparse_payload(&EventHeader::default(), &[0, 1, 1], 3);
        assert!(matches!(
            EventView::decode(Tag::SparseEvent, &too_many, &cfg),
            Err(FcioError::Framing(_))
        ));

        let out_of_range = sparse_payload(&EventHeader::default(), &[0, 5], 3);
        assert!(matches!(
            EventView::decode(Tag::SparseEvent, &out_of_range, &cfg),
            Err(FcioError::Framing(_))
        ));

        let mut negative = Vec::new();
        EventHeader::default().encode_into(&mut negative);
        negative.extend_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            EventView::decode(Tag::SparseEvent, &negative, &cfg),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_event_length_mismatch() {
        let cfg = config(2, 1, 4);
        let mut payload = full_payload(&EventHeader::default(), 2, 1, 4);
        payload.truncate(payload.len() - 2);
        assert!(matches!(
            EventView::decode(Tag::Event, &payload, &cfg),
            Err(FcioError::Framing(_))
        ));
        assert!(matches!(
            EventView::decode(Tag::Event, &payload[..64], &cfg),
            Err(FcioError::Framing(_))
        ));
    }

    #[test]
    fn test_runtime_ns() {
        let header = EventHeader::with_timestamp(1, 12, 125_000_000, 249_999_999);
        // 12 s + 125e6 ticks * 4 ns
        assert_eq!(header.runtime_ns(), 12_500_000_000);
        assert_eq!(header.sample_period_ns(), 4.0);
        assert!((header.runtime_imprecise() - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_runtime_ns_floors() {
        // 1 tick of a 3-tick clock is 333333333.33 ns.
        let header = EventHeader::with_timestamp(0, 0, 1, 2);
        assert_eq!(header.runtime_ns(), 333_333_333);
    }

    #[test]
    fn test_tick_modulus_clamped() {
        let header = EventHeader::with_timestamp(0, 3, 5, -1);
        assert_eq!(header.runtime_ns(), 3_000_000_000 + 5_000_000_000);
        assert!(header.sample_period_ns().is_finite());
    }

    #[test]
    fn test_eventtime_adds_master_seconds() {
        let mut header = EventHeader::with_timestamp(0, 2, 0, 99);
        header.timeoffset[2] = 1_700_000_000;
        assert_eq!(header.eventtime_ns(), 1_700_000_002 * 1_000_000_000);
        assert_eq!(header.eventtime_imprecise(), 1_700_000_002.0);
    }

    #[test]
    fn test_deadtime() {
        let mut header = EventHeader::default();
        header.deadregion[..5].copy_from_slice(&[10, 50, 11, 25, 99]);
        // 1 s - 25 ticks of 10 ms
        assert_eq!(header.deadtime_ns(), 750_000_000);
        assert!((header.deadtime_imprecise() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_named_accessors() {
        let mut header = EventHeader::with_timestamp(42, 3, 4, 5);
        header.timeoffset[..7].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(header.eventnumber(), 42);
        assert_eq!(header.timeoffset(), [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(header.timeoffset_start_usec(), 7);
        assert_eq!(header.timestamp(), [42, 3, 4, 5]);
    }

    #[test]
    fn test_snapshot_keeps_data() {
        let cfg = config(2, 1, 2);
        let payload = full_payload(&EventHeader::with_timestamp(9, 1, 0, 9), 2, 1, 2);
        let snapshot = {
            let event = EventView::decode(Tag::Event, &payload, &cfg).unwrap();
            event.snapshot()
        };
        drop(payload);

        let view = snapshot.view();
        assert_eq!(view.header().eventnumber(), 9);
        assert_eq!(view.baseline_raw().to_vec(), vec![400, 401]);
        assert_eq!(view.triggertraces().unwrap().shape(), (1, 2));
    }

    #[test]
    fn test_non_event_tag_rejected() {
        let cfg = config(1, 0, 1);
        assert!(EventView::decode(Tag::Status, &[], &cfg).is_err());
    }
}
