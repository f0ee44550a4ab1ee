//! Record writer producing FCIO streams.
//!
//! Emits the same wire layout the session reads, so it doubles as a
//! producer for replay files and synthetic test streams.

use std::io::{BufWriter, Write};

use thiserror::Error;

use crate::event::EventHeader;
use crate::parser::{card_size, CARD_OTHER_ERRORS, STATUSTIME_LEN, STATUSTIME_SLOTS};
use crate::types::{Config, Tag};

/// Errors that can occur while writing records.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// One ADC channel slot of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelData {
    pub baseline: u16,
    pub integrator: u16,
    pub samples: Vec<u16>,
}

/// Input for [`RecordWriter::write_event`] and [`RecordWriter::write_sparse_event`].
#[derive(Debug, Clone, Default)]
pub struct EventData {
    pub header: EventHeader,
    /// ADC channel number of each entry in `channels` (sparse events only)
    pub tracelist: Vec<u16>,
    pub channels: Vec<ChannelData>,
    /// Trigger-sum traces (full events only)
    pub triggertraces: Vec<Vec<u16>>,
}

impl EventData {
    /// An event with every channel of `config` present and all samples zero.
    pub fn zeroed(config: &Config, header: EventHeader) -> Self {
        Self {
            header,
            tracelist: (0..config.nadcs as u16).collect(),
            channels: vec![
                ChannelData {
                    baseline: 0,
                    integrator: 0,
                    samples: vec![0; config.nsamples],
                };
                config.nadcs
            ],
            triggertraces: vec![vec![0; config.nsamples]; config.ntriggers],
        }
    }
}

/// Input for one card of a status record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardStatusData {
    pub reqid: u32,
    pub status: u32,
    pub eventno: u32,
    pub pps: u32,
    pub ticks: u32,
    pub maxticks: u32,
    pub totalerrors: u32,
    pub othererrors: [u32; CARD_OTHER_ERRORS],
    pub environment: Vec<u16>,
    pub ctierrors: Vec<u16>,
    /// Must have the same length as `enverrors`
    pub linkerrors: Vec<u16>,
    pub enverrors: Vec<u16>,
}

impl CardStatusData {
    fn encoded_len(&self) -> usize {
        card_size(
            self.environment.len(),
            self.ctierrors.len(),
            self.linkerrors.len(),
        )
    }
}

/// Input for [`RecordWriter::write_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusData {
    pub status: i32,
    pub statustime: [i32; STATUSTIME_LEN],
    pub cards: Vec<CardStatusData>,
}

/// Buffered writer of FCIO records.
pub struct RecordWriter<W: Write> {
    writer: BufWriter<W>,
    payload: Vec<u8>,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            payload: Vec::new(),
            records: 0,
        }
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn write_config(&mut self, config: &Config) -> Result<(), WriteError> {
        if config.blprecision <= 0 {
            return Err(WriteError::InvalidRecord(format!(
                "blprecision must be positive, got {}",
                config.blprecision
            )));
        }
        if config.tracemap.len() != config.nadcs + config.ntriggers {
            return Err(WriteError::InvalidRecord(format!(
                "tracemap has {} entries, expected {}",
                config.tracemap.len(),
                config.nadcs + config.ntriggers
            )));
        }

        self.payload.clear();
        let counts = [config.nadcs, config.ntriggers, config.nsamples];
        for count in counts {
            let count = i32::try_from(count)
                .map_err(|_| WriteError::InvalidRecord(format!("count {count} exceeds i32")))?;
            self.payload.extend_from_slice(&count.to_le_bytes());
        }
        for value in [
            config.blprecision,
            config.sumlength,
            config.adcbits,
            config.mastercards,
            config.triggercards,
            config.adccards,
            config.gps,
            config.telid,
        ] {
            self.payload.extend_from_slice(&value.to_le_bytes());
        }
        for addr in &config.tracemap {
            self.payload.extend_from_slice(&addr.to_le_bytes());
        }
        self.emit(Tag::CONFIG)
    }

    /// Writes a full event carrying every ADC channel and trigger trace.
    pub fn write_event(&mut self, config: &Config, event: &EventData) -> Result<(), WriteError> {
        if event.channels.len() != config.nadcs {
            return Err(WriteError::InvalidRecord(format!(
                "full event needs {} channels, got {}",
                config.nadcs,
                event.channels.len()
            )));
        }
        if event.triggertraces.len() != config.ntriggers {
            return Err(WriteError::InvalidRecord(format!(
                "full event needs {} trigger traces, got {}",
                config.ntriggers,
                event.triggertraces.len()
            )));
        }

        self.payload.clear();
        event.header.encode_into(&mut self.payload);
        self.push_channels(config, &event.channels)?;
        for trace in &event.triggertraces {
            check_samples(config, trace, "trigger trace")?;
            push_u16s(&mut self.payload, trace);
        }
        self.emit(Tag::EVENT)
    }

    /// Writes a sparse event carrying the channels named in `tracelist`.
    ///
    /// Trigger traces are not part of sparse events and are ignored.
    pub fn write_sparse_event(
        &mut self,
        config: &Config,
        event: &EventData,
    ) -> Result<(), WriteError> {
        if event.tracelist.len() != event.channels.len() || event.channels.len() > config.nadcs {
            return Err(WriteError::InvalidRecord(format!(
                "sparse event has {} list entries for {} channels (max {})",
                event.tracelist.len(),
                event.channels.len(),
                config.nadcs
            )));
        }
        if let Some(bad) = event
            .tracelist
            .iter()
            .find(|&&ch| usize::from(ch) >= config.nadcs)
        {
            return Err(WriteError::InvalidRecord(format!(
                "tracelist entry {bad} out of range for {} adcs",
                config.nadcs
            )));
        }

        self.payload.clear();
        event.header.encode_into(&mut self.payload);
        self.payload
            .extend_from_slice(&(event.channels.len() as i32).to_le_bytes());
        push_u16s(&mut self.payload, &event.tracelist);
        self.push_channels(config, &event.channels)?;
        self.emit(Tag::SPARSE_EVENT)
    }

    pub fn write_status(&mut self, status: &StatusData) -> Result<(), WriteError> {
        self.payload.clear();
        self.payload.extend_from_slice(&status.status.to_le_bytes());
        let mut statustime = [0i32; STATUSTIME_SLOTS];
        statustime[..STATUSTIME_LEN].copy_from_slice(&status.statustime);
        for value in statustime {
            self.payload.extend_from_slice(&value.to_le_bytes());
        }
        let size = status
            .cards
            .iter()
            .map(CardStatusData::encoded_len)
            .max()
            .unwrap_or(0);
        self.payload
            .extend_from_slice(&(status.cards.len() as i32).to_le_bytes());
        self.payload.extend_from_slice(&(size as i32).to_le_bytes());

        for card in &status.cards {
            if card.linkerrors.len() != card.enverrors.len() {
                return Err(WriteError::InvalidRecord(format!(
                    "card {}: {} linkerrors but {} enverrors",
                    card.reqid,
                    card.linkerrors.len(),
                    card.enverrors.len()
                )));
            }
            let words = [
                card.reqid,
                card.status,
                card.eventno,
                card.pps,
                card.ticks,
                card.maxticks,
                card.environment.len() as u32,
                card.ctierrors.len() as u32,
                card.linkerrors.len() as u32,
                0,
                card.totalerrors,
            ];
            for word in words.iter().chain(&card.othererrors) {
                self.payload.extend_from_slice(&word.to_le_bytes());
            }
            push_u16s(&mut self.payload, &card.environment);
            push_u16s(&mut self.payload, &card.ctierrors);
            push_u16s(&mut self.payload, &card.linkerrors);
            push_u16s(&mut self.payload, &card.enverrors);
        }
        self.emit(Tag::STATUS)
    }

    /// Writes an opaque record, e.g. a tag the reader passes through.
    pub fn write_raw(&mut self, tag: i32, payload: &[u8]) -> Result<(), WriteError> {
        if tag <= 0 {
            return Err(WriteError::InvalidRecord(format!(
                "tag {tag} is reserved for end of stream"
            )));
        }
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        self.emit(tag)
    }

    /// Writes the end-of-stream marker (tag 0).
    pub fn write_end(&mut self) -> Result<(), WriteError> {
        self.writer.write_all(&0i32.to_le_bytes())?;
        self.writer.write_all(&0u32.to_le_bytes())?;
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        self.writer.flush()?;
        Ok(())
    }

    fn push_channels(&mut self, config: &Config, channels: &[ChannelData]) -> Result<(), WriteError> {
        for channel in channels {
            check_samples(config, &channel.samples, "channel")?;
            push_u16s(&mut self.payload, &[channel.baseline, channel.integrator]);
            push_u16s(&mut self.payload, &channel.samples);
        }
        Ok(())
    }

    fn emit(&mut self, tag: i32) -> Result<(), WriteError> {
        let length = u32::try_from(self.payload.len()).map_err(|_| {
            WriteError::InvalidRecord(format!("payload of {} bytes", self.payload.len()))
        })?;
        self.writer.write_all(&tag.to_le_bytes())?;
        self.writer.write_all(&length.to_le_bytes())?;
        self.writer.write_all(&self.payload)?;
        self.records += 1;
        Ok(())
    }
}

fn check_samples(config: &Config, samples: &[u16], what: &str) -> Result<(), WriteError> {
    if samples.len() != config.nsamples {
        return Err(WriteError::InvalidRecord(format!(
            "{what} has {} samples, config declares {}",
            samples.len(),
            config.nsamples
        )));
    }
    Ok(())
}

fn push_u16s(out: &mut Vec<u8>, values: &[u16]) {
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
}
