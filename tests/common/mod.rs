#![allow(dead_code)]

use logweave::config::{arg_i64, ArgMap};
use logweave::env::ProcessorGen;
use logweave::pipeline::{Handler, SharedProcessor, SimpleProcessor};
use logweave::record::{Record, RecordValue};
use logweave::source::SourceInstance;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const BOOT_0: &str = "00000000-0000-0000-0000-000000000000";
pub const BOOT_1: &str = "11111111-1111-1111-1111-111111111111";

/// One trace-time-format logline with a monotonically increasing token and
/// trace time.
pub fn trace_line(boot: &str, token: i64, payload: &str) -> String {
    trace_line_tagged(boot, token, "TestTag", payload)
}

pub fn trace_line_tagged(boot: &str, token: i64, tag: &str, payload: &str) -> String {
    format!(
        "{boot} 2016-04-21 10:01:44.{:09} {token} [{:.6}] 100 200 I {tag}: {payload}",
        token % 1_000_000_000,
        token as f64 / 100.0
    )
}

/// Write a plain-text log of `lines` lines; every `thermal_every`-th payload
/// carries the thermal marker. Returns the number of marker lines written.
pub fn write_log(path: &Path, boot: &str, lines: usize, thermal_every: usize) -> usize {
    let mut text = String::new();
    let mut thermal = 0;
    for i in 0..lines {
        let token = (i + 1) as i64;
        let payload = if thermal_every > 0 && i % thermal_every == 0 {
            thermal += 1;
            "thermal_temp: sensor_id=3 temp=41".to_string()
        } else {
            format!("event number {i}")
        };
        text.push_str(&trace_line(boot, token, &payload));
        text.push('\n');
    }
    std::fs::write(path, text).unwrap();
    thermal
}

/// Write a gzip'd boot archive of `lines` lines starting at `start_token`.
pub fn write_log_gz(path: &Path, boot: &str, lines: usize, start_token: i64) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    for i in 0..lines {
        let token = start_token + i as i64;
        writeln!(encoder, "{}", trace_line(boot, token, "archived event")).unwrap();
    }
    encoder.finish().unwrap();
}

/// Per-context results reported by counting handlers on stream end.
pub type Counts = Arc<Mutex<HashMap<String, i64>>>;

pub fn new_counts() -> Counts {
    Arc::new(Mutex::new(HashMap::new()))
}

pub fn count_for(counts: &Counts, context: &str) -> i64 {
    counts.lock().unwrap().get(context).copied().unwrap_or(-1)
}

struct CountingHandler {
    context: String,
    count: i64,
    increment: i64,
    counts: Counts,
}

impl Handler for CountingHandler {
    fn handle(&mut self, _record: Record) -> Option<Record> {
        self.count += self.increment;
        None
    }

    fn finish(&mut self) {
        self.counts
            .lock()
            .unwrap()
            .insert(self.context.clone(), self.count);
    }
}

/// Counts records per source context; accepts an `increment` arg.
pub struct CountingGen {
    pub counts: Counts,
}

impl ProcessorGen for CountingGen {
    fn generate(&self, source: &SourceInstance, args: &ArgMap) -> SharedProcessor {
        Arc::new(SimpleProcessor::new(
            source.processor.clone(),
            CountingHandler {
                context: source.info.context(),
                count: 0,
                increment: arg_i64(args, "increment").unwrap_or(1),
                counts: self.counts.clone(),
            },
        ))
    }
}

struct SkipOddHandler {
    odd: bool,
}

impl Handler for SkipOddHandler {
    fn handle(&mut self, record: Record) -> Option<Record> {
        self.odd = !self.odd;
        self.odd.then_some(record)
    }
}

/// Drops every second record.
pub struct SkipOddGen;

impl ProcessorGen for SkipOddGen {
    fn generate(&self, source: &SourceInstance, _args: &ArgMap) -> SharedProcessor {
        Arc::new(SimpleProcessor::new(
            source.processor.clone(),
            SkipOddHandler { odd: false },
        ))
    }
}

struct PassHandler;

impl Handler for PassHandler {
    fn handle(&mut self, record: Record) -> Option<Record> {
        Some(record)
    }
}

/// Forwards everything untouched.
pub struct PassthroughGen;

impl ProcessorGen for PassthroughGen {
    fn generate(&self, source: &SourceInstance, _args: &ArgMap) -> SharedProcessor {
        Arc::new(SimpleProcessor::new(source.processor.clone(), PassHandler))
    }
}

struct CheckerHandler {
    context: String,
    count: i64,
    last: Option<(i64, f64)>,
    counts: Counts,
    violations: Arc<Mutex<usize>>,
}

impl Handler for CheckerHandler {
    fn handle(&mut self, record: Record) -> Option<Record> {
        let ll = record.as_logline().expect("checker expects loglines");
        self.count += 1;

        if let Some((last_token, last_trace)) = self.last {
            // Order contract over a stitched stream: consecutive records may
            // repeat, but never go backwards on both components at once.
            if !(ll.logcat_token >= last_token || ll.trace_time >= last_trace) {
                *self.violations.lock().unwrap() += 1;
            }
        }
        self.last = Some((ll.logcat_token, ll.trace_time));
        None
    }

    fn finish(&mut self) {
        self.counts
            .lock()
            .unwrap()
            .insert(self.context.clone(), self.count);
    }
}

/// Verifies stitched-stream ordering and counts records per context.
pub struct CheckerGen {
    pub counts: Counts,
    pub violations: Arc<Mutex<usize>>,
}

impl ProcessorGen for CheckerGen {
    fn generate(&self, source: &SourceInstance, _args: &ArgMap) -> SharedProcessor {
        Arc::new(SimpleProcessor::new(
            source.processor.clone(),
            CheckerHandler {
                context: source.info.context(),
                count: 0,
                last: None,
                counts: self.counts.clone(),
                violations: self.violations.clone(),
            },
        ))
    }
}

/// A typed record carrying a running line count; the count doubles as its
/// monotonic timestamp.
pub struct LineCount(pub i64);

impl RecordValue for LineCount {
    fn monotonic_timestamp(&self) -> f64 {
        self.0 as f64
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct LineCountHandler {
    count: i64,
}

impl Handler for LineCountHandler {
    fn handle(&mut self, _record: Record) -> Option<Record> {
        self.count += 1;
        Some(Record::value(LineCount(self.count)))
    }
}

/// Emits a [`LineCount`] for every input record.
pub struct LineCountGen;

impl ProcessorGen for LineCountGen {
    fn generate(&self, source: &SourceInstance, _args: &ArgMap) -> SharedProcessor {
        Arc::new(SimpleProcessor::new(
            source.processor.clone(),
            LineCountHandler { count: 0 },
        ))
    }
}
