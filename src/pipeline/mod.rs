pub mod mux;
pub mod timeweaver;

use crate::parser::LoglineParser;
use crate::record::Record;
use regex::Regex;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::warn;

pub use mux::{Demuxer, Muxer};
pub use timeweaver::{stitch, Timeweaver};

/// Pipeline channels have capacity one: a slow consumer stalls its producer
/// at the next send, which is how backpressure propagates upstream.
pub const CHANNEL_CAPACITY: usize = 1;

pub type RecordSender = mpsc::Sender<Record>;
pub type RecordReceiver = mpsc::Receiver<Record>;

pub(crate) fn record_channel() -> (RecordSender, RecordReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// A pull-stream of records.
///
/// Calling [`process`](Processor::process) spawns one producer task that
/// sends records until exhaustion; end-of-stream is signalled by the channel
/// closing. Calling `process` more than once is legal only when re-entering
/// the underlying source is cheap (file-backed sources re-open the file);
/// for sources that cannot replay, wrap them in a [`Muxer`].
pub trait Processor: Send + Sync {
    fn process(&self) -> RecordReceiver;
}

pub type SharedProcessor = Arc<dyn Processor>;

/// Callback invoked for every record a [`SimpleProcessor`] pulls from its
/// source. Returning `None` drops the record. `finish` runs once, after the
/// source stream has ended.
pub trait Handler: Send {
    fn handle(&mut self, record: Record) -> Option<Record>;

    fn finish(&mut self) {}
}

/// A linear pipe: records from `source` pass through a [`Handler`], and
/// non-`None` results are forwarded.
pub struct SimpleProcessor {
    source: SharedProcessor,
    handler: Arc<Mutex<Box<dyn Handler>>>,
}

impl SimpleProcessor {
    pub fn new<H: Handler + 'static>(source: SharedProcessor, handler: H) -> Self {
        Self {
            source,
            handler: Arc::new(Mutex::new(Box::new(handler))),
        }
    }
}

impl Processor for SimpleProcessor {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();
        let source = self.source.clone();
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let mut input = source.process();
            while let Some(record) = input.recv().await {
                let output = handler.lock().expect("handler mutex poisoned").handle(record);
                if let Some(output) = output {
                    if tx.send(output).await.is_err() {
                        break;
                    }
                }
            }
            handler.lock().expect("handler mutex poisoned").finish();
        });

        rx
    }
}

/// Predicate over raw line text.
pub type StringFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Substring-conjunction predicate: accepts a line when every condition is a
/// substring of it. This is the `a&&b&&c` filter from processor configs.
pub fn substring_filter(conditions: Vec<String>) -> StringFilter {
    Arc::new(move |line| conditions.iter().all(|cond| line.contains(cond.as_str())))
}

pub fn regex_filter(pattern: Regex) -> StringFilter {
    Arc::new(move |line| pattern.is_match(line))
}

struct StringFilterHandler {
    filters: Vec<StringFilter>,
}

impl Handler for StringFilterHandler {
    fn handle(&mut self, record: Record) -> Option<Record> {
        let pass = match record.as_line() {
            Some(line) => self.filters.iter().any(|filter| filter(line)),
            None => panic!("string filter received a non-line record"),
        };
        pass.then_some(record)
    }
}

/// Filter stage with union semantics: a line passes if any predicate accepts
/// it.
pub fn string_filter_processor(
    source: SharedProcessor,
    filters: Vec<StringFilter>,
) -> SharedProcessor {
    Arc::new(SimpleProcessor::new(source, StringFilterHandler { filters }))
}

struct LoglineHandler {
    parser: LoglineParser,
}

impl Handler for LoglineHandler {
    fn handle(&mut self, record: Record) -> Option<Record> {
        let line = match record.as_line() {
            Some(line) => line,
            None => panic!("parser stage received a non-line record"),
        };

        match self.parser.parse(line) {
            Ok(logline) => Some(Record::logline(logline)),
            Err(err) => {
                warn!(error = %err, "dropping unparseable line");
                None
            }
        }
    }
}

/// The parser stage: turns raw lines into [`Logline`](crate::record::Logline)
/// records, running any tag sub-parsers registered on `parser`. Lines the
/// top-level parser rejects are logged and skipped. The parser object is
/// owned by this stage's single task, so stateful sub-parsers are safe.
pub fn logline_processor(source: SharedProcessor, parser: LoglineParser) -> SharedProcessor {
    Arc::new(SimpleProcessor::new(source, LoglineHandler { parser }))
}

/// Replays a fixed record sequence. Every `process` call yields the full
/// sequence again, so it behaves like a file-backed source under re-entry.
pub struct VecProcessor {
    records: Vec<Record>,
}

impl VecProcessor {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }
}

impl Processor for VecProcessor {
    fn process(&self) -> RecordReceiver {
        let (tx, rx) = record_channel();
        let records = self.records.clone();
        tokio::spawn(async move {
            for record in records {
                if tx.send(record).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// `futures::Stream` adapter over a processor's output channel.
pub struct RecordStream {
    rx: RecordReceiver,
}

impl RecordStream {
    pub fn new(processor: &dyn Processor) -> Self {
        Self {
            rx: processor.process(),
        }
    }
}

impl futures::Stream for RecordStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
