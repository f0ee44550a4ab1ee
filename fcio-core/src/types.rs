//! Record tags and the stream geometry declared by `Config` records.

use crate::error::{FcioError, Result};
use crate::parser::{self, CONFIG_FIELDS, CONFIG_HEADER_SIZE, SAMPLE_SIZE};

/// FCIO record tags.
///
/// The tag set is fixed by the FlashCam readout. Tags the decoder does not
/// interpret (calibration, reconstructed events, ...) are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Stream geometry (1)
    Config,
    /// Full event with all ADC and trigger channels (3)
    Event,
    /// Hardware status with per-card sub-records (4)
    Status,
    /// Event carrying only a subset of ADC channels (6)
    SparseEvent,
    /// Any other positive tag
    Unknown(i32),
}

impl Tag {
    pub const CONFIG: i32 = 1;
    pub const EVENT: i32 = 3;
    pub const STATUS: i32 = 4;
    pub const SPARSE_EVENT: i32 = 6;

    /// Maps a positive wire tag to a `Tag`.
    #[inline]
    pub fn from_i32(value: i32) -> Self {
        match value {
            Self::CONFIG => Self::Config,
            Self::EVENT => Self::Event,
            Self::STATUS => Self::Status,
            Self::SPARSE_EVENT => Self::SparseEvent,
            other => Self::Unknown(other),
        }
    }

    /// The wire value of this tag.
    #[inline]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Config => Self::CONFIG,
            Self::Event => Self::EVENT,
            Self::Status => Self::STATUS,
            Self::SparseEvent => Self::SPARSE_EVENT,
            Self::Unknown(other) => other,
        }
    }

    /// Returns true for `Event` and `SparseEvent`.
    #[inline]
    pub fn is_event(self) -> bool {
        matches!(self, Self::Event | Self::SparseEvent)
    }
}

/// Acquisition geometry for all following records.
///
/// Every stride and offset used to slice events is a pure function of these
/// values, see [`Config::layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of digitizer (ADC) channels
    pub nadcs: usize,
    /// Number of trigger-sum channels
    pub ntriggers: usize,
    /// Waveform samples per channel
    pub nsamples: usize,
    /// Fixed-point scale of the baseline
    pub blprecision: i32,
    /// Integrator window length in samples
    pub sumlength: i32,
    /// ADC resolution in bits
    pub adcbits: i32,
    pub mastercards: i32,
    pub triggercards: i32,
    pub adccards: i32,
    /// GPS mode flag (0 = off)
    pub gps: i32,
    /// Telescope id
    pub telid: i32,
    /// Hardware address per ADC then trigger channel: card address in the
    /// high 16 bits, channel in the low 16 bits.
    pub tracemap: Vec<u32>,
}

impl Config {
    /// Decodes a Config payload.
    ///
    /// Negative counts, a non-positive `blprecision` or a payload whose length
    /// does not match the declared channel counts are framing errors.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let nadcs = parser::read_count(payload, 0, "nadcs")?;
        let ntriggers = parser::read_count(payload, 4, "ntriggers")?;
        let nsamples = parser::read_count(payload, 8, "nsamples")?;
        let fields: [i32; CONFIG_FIELDS] = parser::read_i32_array(payload, 0, "config header")?;
        let [_, _, _, blprecision, sumlength, adcbits, mastercards, triggercards, adccards, gps, telid] =
            fields;

        if blprecision <= 0 {
            return Err(FcioError::framing(format!(
                "config blprecision must be positive, got {blprecision}"
            )));
        }

        let channels = nadcs
            .checked_add(ntriggers)
            .ok_or_else(|| FcioError::framing("config channel count overflows"))?;
        let expected = channels
            .checked_mul(4)
            .and_then(|n| n.checked_add(CONFIG_HEADER_SIZE))
            .ok_or_else(|| FcioError::framing("config channel count overflows"))?;
        if payload.len() != expected {
            return Err(FcioError::framing(format!(
                "config payload is {} bytes, expected {expected} for {nadcs} adcs and {ntriggers} triggers",
                payload.len()
            )));
        }

        let tracemap = (0..channels)
            .map(|i| parser::read_u32(payload, CONFIG_HEADER_SIZE + i * 4, "tracemap"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            nadcs,
            ntriggers,
            nsamples,
            blprecision,
            sumlength,
            adcbits,
            mastercards,
            triggercards,
            adccards,
            gps,
            telid,
            tracemap,
        })
    }

    /// Payload size of this Config on the wire.
    pub fn encoded_len(&self) -> usize {
        CONFIG_HEADER_SIZE + (self.nadcs + self.ntriggers) * 4
    }

    /// Slicing geometry derived from this Config.
    pub fn layout(&self) -> Layout {
        Layout {
            nadcs: self.nadcs,
            ntriggers: self.ntriggers,
            nsamples: self.nsamples,
            sample_size: SAMPLE_SIZE,
            stride_bytes: parser::channel_stride(self.nsamples),
        }
    }

    /// Energy scale applied to `integrator - baseline`.
    #[inline]
    pub fn energy_scale(&self) -> f64 {
        self.sumlength as f64 / self.blprecision as f64
    }

    /// Card address and channel of ADC or trigger channel `index`.
    pub fn channel_address(&self, index: usize) -> Option<(u16, u16)> {
        self.tracemap
            .get(index)
            .map(|&addr| ((addr >> 16) as u16, (addr & 0xFFFF) as u16))
    }
}

/// Byte geometry of event payloads under one Config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub nadcs: usize,
    pub ntriggers: usize,
    pub nsamples: usize,
    pub sample_size: usize,
    /// Bytes per channel slot: `(nsamples + 2) * sample_size`
    pub stride_bytes: usize,
}

impl Layout {
    /// Bytes of the ADC channel slots of a full event.
    #[inline]
    pub fn adc_block_size(&self, channels: usize) -> usize {
        channels * self.stride_bytes
    }

    /// Bytes of the trigger-sum traces of a full event.
    #[inline]
    pub fn trigger_block_size(&self) -> usize {
        self.ntriggers * self.sample_size * self.nsamples
    }

    /// Body length of a full event (after the event header).
    pub fn event_body_size(&self) -> usize {
        self.adc_block_size(self.nadcs) + self.trigger_block_size()
    }

    /// Body length of a sparse event carrying `numtraces` channels.
    pub fn sparse_body_size(&self, numtraces: usize) -> usize {
        parser::SPARSE_COUNT_SIZE + numtraces * self.sample_size + self.adc_block_size(numtraces)
    }
}
