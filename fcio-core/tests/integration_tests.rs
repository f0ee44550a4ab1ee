//! End-to-end tests: streams written with `RecordWriter`, read back through
//! files, in-memory readers and sockets.
//!
//! Run with: cargo test --test integration_tests

use std::io::{self, Cursor, ErrorKind, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fcio_core::{
    CardStatusData, ChannelData, Config, EventData, EventHeader, FcioError, Record, RecordDecoder,
    RecordWriter, Session, SessionOptions, SessionState, StateReader, StatusData, Tag,
};
use tempfile::NamedTempFile;

fn config(nadcs: usize, ntriggers: usize, nsamples: usize) -> Config {
    Config {
        nadcs,
        ntriggers,
        nsamples,
        blprecision: 4,
        sumlength: 8,
        adcbits: 12,
        mastercards: 1,
        triggercards: ntriggers.min(1) as i32,
        adccards: 1,
        gps: 0,
        telid: 0,
        tracemap: (0..(nadcs + ntriggers) as u32).collect(),
    }
}

/// Channel `c` has raw baseline `400 + 4c`, integrator `600 + c` and samples `c + s`.
fn event_data(cfg: &Config, header: EventHeader) -> EventData {
    let channels = (0..cfg.nadcs as u16)
        .map(|c| ChannelData {
            baseline: 400 + 4 * c,
            integrator: 600 + c,
            samples: (0..cfg.nsamples as u16).map(|s| c + s).collect(),
        })
        .collect();
    let triggertraces = (0..cfg.ntriggers as u16)
        .map(|t| (0..cfg.nsamples as u16).map(|s| 2000 + t + s).collect())
        .collect();
    EventData {
        header,
        tracelist: (0..cfg.nadcs as u16).collect(),
        channels,
        triggertraces,
    }
}

fn sparse_data(cfg: &Config, header: EventHeader, channels: &[u16]) -> EventData {
    let full = event_data(cfg, header);
    EventData {
        header,
        tracelist: channels.to_vec(),
        channels: channels
            .iter()
            .map(|&c| full.channels[c as usize].clone())
            .collect(),
        triggertraces: Vec::new(),
    }
}

fn write_stream(build: impl FnOnce(&mut RecordWriter<&mut Vec<u8>>)) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = RecordWriter::new(&mut bytes);
        build(&mut writer);
        writer.flush().unwrap();
    }
    bytes
}

fn temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn quiet() -> SessionOptions {
    SessionOptions::new().with_debug(0)
}

#[test]
fn test_end_to_end_full_event() {
    let cfg = config(4, 1, 100);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(1, 3, 0, 99)))
            .unwrap();
    });
    let file = temp_file(&bytes);

    let path = file.path().to_str().unwrap();
    let mut session = Session::open_with(path, quiet()).unwrap();
    let mut events = session.events();
    let event = events.next().unwrap().expect("one event");

    assert_eq!(event.numtraces(), 4);
    assert_eq!(event.baseline(), vec![100.0, 101.0, 102.0, 103.0]);
    assert_eq!(event.traces().shape(), (4, 100));
    assert_eq!(event.traces().get(3, 99), Some(102));

    // (integrator - baseline) * sumlength / blprecision
    let expected: Vec<f64> = (0..4)
        .map(|c| ((600 + c) as f64 - (400 + 4 * c) as f64) * 2.0)
        .collect();
    assert_eq!(event.daqenergy(), expected);

    let triggers = event.triggertraces().unwrap();
    assert_eq!(triggers.shape(), (1, 100));
    assert_eq!(triggers.row(0).unwrap().get(10), Some(2010));

    assert!(events.next().unwrap().is_none());
}

#[test]
fn test_sparse_event_layout_error_is_local() {
    let cfg = config(4, 1, 16);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_sparse_event(&cfg, &sparse_data(&cfg, EventHeader::default(), &[1, 3]))
            .unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::default()))
            .unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    {
        let mut events = session.events();
        let sparse = events.next().unwrap().unwrap();
        assert_eq!(sparse.tag(), Tag::SparseEvent);
        assert_eq!(sparse.numtraces(), 2);
        assert_eq!(sparse.tracelist().to_vec(), vec![1, 3]);
        assert_eq!(sparse.baseline_raw().to_vec(), vec![404, 412]);
        assert_eq!(sparse.traces().shape(), (2, 16));
        assert!(matches!(sparse.triggertraces(), Err(FcioError::Layout(_))));
    }

    let mut events = session.events();
    let full = events.next().unwrap().unwrap();
    assert_eq!(full.triggertraces().unwrap().shape(), (1, 16));
}

#[test]
fn test_card_status_arrays() {
    let cfg = config(1, 0, 4);
    let status = StatusData {
        status: 1,
        statustime: [5, 100, 1_700_000_000, 250],
        cards: vec![
            CardStatusData {
                reqid: 0x10,
                environment: vec![11, 12, 13],
                ctierrors: vec![21, 22],
                linkerrors: vec![31, 32, 33, 34],
                enverrors: vec![41, 42, 43, 44],
                ..Default::default()
            },
            CardStatusData {
                reqid: 0x20,
                environment: vec![1],
                ..Default::default()
            },
        ],
    };
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_status(&status).unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let mut statuses = session.statuses();
    let view = statuses.next().unwrap().unwrap();
    assert_eq!(view.status(), 1);
    assert_eq!(view.statustime(), [5, 100, 1_700_000_000, 250]);
    assert_eq!(view.num_cards(), 2);

    let cards: Vec<_> = view.cards().collect();
    assert_eq!(cards[0].reqid(), 0x10);
    assert_eq!(cards[0].environment().len(), 3);
    assert_eq!(cards[0].ctierrors().len(), 2);
    assert_eq!(cards[0].linkerrors().len(), 4);
    assert_eq!(cards[0].enverrors().len(), 4);
    assert_eq!(cards[0].byte_len(), 64 + (3 + 2 + 4 + 4) * 2);
    assert_eq!(cards[0].enverrors().to_vec(), vec![41, 42, 43, 44]);
    assert_eq!(cards[1].reqid(), 0x20);
    assert_eq!(cards[1].environment().to_vec(), vec![1]);
    assert!(cards[1].linkerrors().is_empty());
}

#[test]
fn test_truncated_stream_is_framing_error() {
    let cfg = config(2, 0, 50);
    let mut bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::default()))
            .unwrap();
    });
    bytes.truncate(bytes.len() - 30);
    let file = temp_file(&bytes);

    let mut session = Session::open_with(file.path().to_str().unwrap(), quiet()).unwrap();
    let err = session.events().next().unwrap_err();
    assert!(matches!(err, FcioError::Framing(_)), "got {err:?}");
    assert!(err.is_fatal());
    assert!(matches!(session.advance(), Err(FcioError::Protocol(_))));
}

#[test]
fn test_event_before_config() {
    let cfg = config(2, 0, 8);
    let bytes = write_stream(|w| {
        w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(1, 0, 0, 9)))
            .unwrap();
        w.write_config(&cfg).unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(2, 0, 0, 9)))
            .unwrap();
    });

    // The session skips everything ahead of the first config.
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes.clone())).unwrap();
    let mut events = session.events();
    assert_eq!(events.next().unwrap().unwrap().header().eventnumber(), 2);
    drop(events);
    assert_eq!(session.counts().events, 1);

    // Decoding directly without a config is refused.
    let mut decoder = RecordDecoder::new();
    let payload = &bytes[8..];
    let err = decoder.decode(Tag::Event, payload).unwrap_err();
    assert!(matches!(err, FcioError::Protocol(_)));
}

struct DropFlag {
    inner: Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl Read for DropFlag {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_reopen_closes_previous_transport() {
    let cfg = config(1, 0, 4);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::default()))
            .unwrap();
    });

    let first = Arc::new(AtomicBool::new(false));
    let second = Arc::new(AtomicBool::new(false));

    let mut session = Session::new(quiet());
    session
        .open_reader(DropFlag {
            inner: Cursor::new(bytes.clone()),
            dropped: Arc::clone(&first),
        })
        .unwrap();
    assert!(!first.load(Ordering::SeqCst));

    session
        .open_reader(DropFlag {
            inner: Cursor::new(bytes),
            dropped: Arc::clone(&second),
        })
        .unwrap();
    assert!(first.load(Ordering::SeqCst));
    assert!(!second.load(Ordering::SeqCst));
    assert_eq!(session.state(), SessionState::Ready);

    drop(session);
    assert!(second.load(Ordering::SeqCst));
}

#[test]
fn test_failed_open_releases_transport() {
    let dropped = Arc::new(AtomicBool::new(false));
    let mut session = Session::new(quiet());
    let err = session
        .open_reader(DropFlag {
            inner: Cursor::new(Vec::new()),
            dropped: Arc::clone(&dropped),
        })
        .unwrap_err();
    assert!(matches!(err, FcioError::Protocol(_)));
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_runtime_monotonic() {
    let cfg = config(2, 1, 8);
    let maxticks = 249_999_999;
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        for i in 0..50 {
            let pps = i / 10;
            let ticks = (i % 10) * 24_000_000 + 7;
            let header = EventHeader::with_timestamp(i, pps, ticks, maxticks);
            w.write_event(&cfg, &event_data(&cfg, header)).unwrap();
        }
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let mut last = i64::MIN;
    let mut count = 0;
    let mut events = session.events();
    while let Some(event) = events.next().unwrap() {
        let now = event.runtime_ns();
        assert!(now >= last, "runtime went back from {last} to {now}");
        assert!((event.runtime_imprecise() * 1e9 - now as f64).abs() < 10.0);
        last = now;
        count += 1;
    }
    assert_eq!(count, 50);
}

#[test]
fn test_baseline_roundtrip() {
    let mut cfg = config(1, 0, 2);
    for precision in [1, 4, 16, 1 << 10] {
        cfg.blprecision = precision;
        for raw in (0..=u16::MAX).step_by(97).chain([u16::MAX]) {
            let mut data = event_data(&cfg, EventHeader::default());
            data.channels[0].baseline = raw;
            let bytes = write_stream(|w| {
                w.write_config(&cfg).unwrap();
                w.write_event(&cfg, &data).unwrap();
            });
            let mut session = Session::new(quiet());
            session.open_reader(Cursor::new(bytes)).unwrap();
            let mut events = session.events();
            let event = events.next().unwrap().unwrap();
            let physical = event.baseline()[0];
            assert_eq!((physical * f64::from(precision)).round() as u16, raw);
        }
    }
}

/// Replays scripted reads; `None` entries report a timeout.
struct Scripted {
    steps: Vec<Option<Vec<u8>>>,
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.steps.is_empty() {
            return Ok(0);
        }
        match self.steps.remove(0) {
            None => Err(io::Error::from(ErrorKind::WouldBlock)),
            Some(mut data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.insert(0, Some(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

#[test]
fn test_timeout_mid_payload_resumes() {
    let cfg = config(2, 1, 8);
    let config_bytes = write_stream(|w| w.write_config(&cfg).unwrap());
    let event_bytes = write_stream(|w| {
        w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(7, 1, 2, 3)))
            .unwrap()
    });
    let (head, tail) = event_bytes.split_at(40);

    let mut session = Session::new(quiet());
    session
        .open_reader(Scripted {
            steps: vec![
                Some(config_bytes),
                Some(head.to_vec()),
                None,
                Some(tail.to_vec()),
            ],
        })
        .unwrap();

    let err = session.events().next().unwrap_err();
    assert!(matches!(err, FcioError::Timeout { .. }));
    assert!(!err.is_fatal());

    let mut events = session.events();
    let event = events.next().unwrap().expect("event after retry");
    assert_eq!(event.header().eventnumber(), 7);
    assert_eq!(event.baseline_raw().to_vec(), vec![400, 404]);
}

#[test]
fn test_snapshots_outlive_reads() {
    let cfg = config(2, 1, 8);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        for i in 0..3 {
            w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(i, i, 0, 9)))
                .unwrap();
        }
        w.write_status(&StatusData {
            status: 1,
            ..Default::default()
        })
        .unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let mut kept = Vec::new();
    let mut status = None;
    let mut records = session.records();
    while let Some(record) = records.next().unwrap() {
        match record {
            Record::Event(event) => kept.push(event.snapshot()),
            Record::Status(view) => status = Some(view.snapshot()),
            _ => {}
        }
    }
    session.close();

    let numbers: Vec<i32> = kept.iter().map(|e| e.view().header().eventnumber()).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert_eq!(kept[2].view().baseline_raw().to_vec(), vec![400, 404]);
    assert_eq!(kept[0].config().nadcs, 2);
    assert_eq!(status.unwrap().view().status(), 1);
}

#[test]
fn test_new_config_changes_layout() {
    let small = config(1, 0, 4);
    let large = config(3, 1, 10);
    let bytes = write_stream(|w| {
        w.write_config(&small).unwrap();
        w.write_event(&small, &event_data(&small, EventHeader::default()))
            .unwrap();
        w.write_config(&large).unwrap();
        w.write_event(&large, &event_data(&large, EventHeader::default()))
            .unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let first = session.events().next().unwrap().unwrap().snapshot();
    let mut records = session.records();
    assert!(matches!(records.next().unwrap(), Some(Record::Config(c)) if c.nadcs == 3));
    match records.next().unwrap() {
        Some(Record::Event(event)) => assert_eq!(event.traces().shape(), (3, 10)),
        other => panic!("expected event, got {:?}", other.map(|r| r.tag())),
    }
    drop(records);

    assert_eq!(first.view().traces().shape(), (1, 4));
    assert_eq!(session.counts().configs, 2);
}

#[test]
fn test_end_marker_stops_stream() {
    let cfg = config(1, 0, 4);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::default()))
            .unwrap();
        w.write_end().unwrap();
        w.write_event(&cfg, &event_data(&cfg, EventHeader::default()))
            .unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let mut events = session.events();
    assert!(events.next().unwrap().is_some());
    assert!(events.next().unwrap().is_none());
    drop(events);
    assert!(session.records().next().unwrap().is_none());
}

#[test]
fn test_unknown_records_pass_through() {
    let cfg = config(1, 0, 4);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        w.write_raw(5, b"reconstructed").unwrap();
    });
    let mut session = Session::new(quiet());
    session.open_reader(Cursor::new(bytes)).unwrap();

    let mut records = session.records();
    match records.next().unwrap() {
        Some(Record::Unknown { tag, payload }) => {
            assert_eq!(tag, 5);
            assert_eq!(payload, b"reconstructed");
        }
        other => panic!("expected unknown record, got {:?}", other.map(|r| r.tag())),
    }
}

#[test]
fn test_tcp_source() {
    let cfg = config(2, 1, 8);
    let bytes = write_stream(|w| {
        w.write_config(&cfg).unwrap();
        for i in 0..5 {
            w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(i, 0, i, 9)))
                .unwrap();
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        // Dribble the stream out so records straddle socket reads.
        for chunk in bytes.chunks(37) {
            socket.write_all(chunk).unwrap();
        }
    });

    let source = format!("tcp://connect/{port}/127.0.0.1");
    let mut session = Session::open_with(&source, quiet().with_timeout_ms(2_000)).unwrap();
    let mut events = session.events();
    let mut numbers = Vec::new();
    while let Some(event) = events.next().unwrap() {
        numbers.push(event.header().eventnumber());
    }
    assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    server.join().unwrap();
}

#[test]
fn test_follow_growing_file() {
    let cfg = config(1, 0, 4);
    let head = write_stream(|w| w.write_config(&cfg).unwrap());
    let tail = write_stream(|w| {
        w.write_event(&cfg, &event_data(&cfg, EventHeader::with_timestamp(3, 0, 0, 9)))
            .unwrap()
    });
    let file = temp_file(&head);

    let options = quiet().with_follow(true).with_timeout_ms(2_000);
    let mut session = Session::open_with(file.path().to_str().unwrap(), options).unwrap();

    let path = file.path().to_path_buf();
    let producer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(&tail).unwrap();
    });

    let mut events = session.events();
    let event = events.next().unwrap().expect("event appended later");
    assert_eq!(event.header().eventnumber(), 3);
    producer.join().unwrap();
}

#[test]
fn test_missing_file_is_open_error() {
    let err = Session::open_with("/nonexistent/run0001.fcio", quiet()).unwrap_err();
    assert!(matches!(err, FcioError::Open { .. }));
}

#[test]
fn test_state_history_across_config_change() {
    let small = config(1, 0, 4);
    let large = config(3, 1, 10);
    let bytes = write_stream(|w| {
        w.write_config(&small).unwrap();
        for n in 1..=3 {
            w.write_event(&small, &event_data(&small, EventHeader::with_timestamp(n, n, 0, 99)))
                .unwrap();
        }
        w.write_config(&large).unwrap();
        w.write_event(&large, &event_data(&large, EventHeader::with_timestamp(4, 4, 0, 99)))
            .unwrap();
    });
    let file = temp_file(&bytes);
    let path = file.path().to_str().unwrap();

    let mut reader = StateReader::open_with(path, quiet(), 2).unwrap();
    reader.deselect_tag(Tag::Config).unwrap();
    let mut eventnumbers = Vec::new();
    while let Some(state) = reader.next_event().unwrap() {
        eventnumbers.push(state.event().unwrap().header().eventnumber());
    }
    assert_eq!(eventnumbers, vec![1, 2, 3, 4]);

    let current = reader.lookback(0).unwrap();
    assert_eq!(current.config().nadcs, 3);
    assert_eq!(current.event().unwrap().view().traces().shape(), (3, 10));

    // event 2 still decodes with the geometry it was written with
    let earlier = reader.lookback(2).unwrap();
    assert_eq!(earlier.config().nadcs, 1);
    assert_eq!(earlier.event().unwrap().view().traces().shape(), (1, 4));
    assert!(reader.lookback(3).is_none());

    assert_eq!(reader.into_session().counts().configs, 2);
}
