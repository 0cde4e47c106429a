use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A typed value flowing through a pipeline that is neither a raw line nor a
/// parsed logline: sub-parser output riding in a [`Payload`], or a custom
/// record emitted by a user processor.
///
/// `monotonic_timestamp` is only required for values that pass through the
/// ordered merge; the default panics, which is the contract for wiring an
/// untimestamped stream into a timeweaver.
pub trait RecordValue: Any + Send + Sync {
    fn monotonic_timestamp(&self) -> f64 {
        panic!("record value does not carry a monotonic timestamp");
    }

    fn as_any(&self) -> &dyn Any;

    /// JSON rendering used by collectors. Values that never reach a collector
    /// can keep the default.
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// One element of a processor's output stream.
///
/// Records are cheap to clone; the broadcast muxer hands the same underlying
/// allocation to every subscriber.
#[derive(Clone)]
pub enum Record {
    /// An unparsed log line.
    Line(Arc<str>),
    /// A parsed logline.
    Logline(Arc<Logline>),
    /// A user-defined typed record.
    Value(Arc<dyn RecordValue>),
}

impl Record {
    pub fn line(text: impl Into<Arc<str>>) -> Self {
        Record::Line(text.into())
    }

    pub fn logline(ll: Logline) -> Self {
        Record::Logline(Arc::new(ll))
    }

    pub fn value<T: RecordValue>(value: T) -> Self {
        Record::Value(Arc::new(value))
    }

    pub fn as_line(&self) -> Option<&str> {
        match self {
            Record::Line(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_logline(&self) -> Option<&Logline> {
        match self {
            Record::Logline(ll) => Some(ll),
            _ => None,
        }
    }

    /// Downcast a [`Record::Value`] to a concrete type.
    pub fn downcast_value<T: RecordValue>(&self) -> Option<&T> {
        match self {
            Record::Value(value) => value.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The monotonic-timestamp contract used by the ordered merge.
    ///
    /// Panics for raw lines; ordering raw line streams is a wiring error.
    pub fn monotonic_timestamp(&self) -> f64 {
        match self {
            Record::Line(_) => panic!("raw line records have no monotonic timestamp"),
            Record::Logline(ll) => ll.monotonic_timestamp(),
            Record::Value(value) => value.monotonic_timestamp(),
        }
    }

    /// JSON rendering used by collectors.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Record::Line(text) => serde_json::Value::String(text.to_string()),
            Record::Logline(ll) => {
                serde_json::to_value(ll.as_ref()).unwrap_or(serde_json::Value::Null)
            }
            Record::Value(value) => value.to_json(),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Line(text) => f.debug_tuple("Line").field(text).finish(),
            Record::Logline(ll) => f.debug_tuple("Logline").field(&ll.line).finish(),
            Record::Value(_) => f.write_str("Value(..)"),
        }
    }
}

/// The payload of a logline: the raw string, replaced by a typed record once
/// a sub-parser for the line's tag has run.
#[derive(Clone)]
pub enum Payload {
    Raw(String),
    Typed(Arc<dyn RecordValue>),
}

impl Payload {
    pub fn raw(&self) -> Option<&str> {
        match self {
            Payload::Raw(text) => Some(text),
            Payload::Typed(_) => None,
        }
    }

    pub fn downcast<T: RecordValue>(&self) -> Option<&T> {
        match self {
            Payload::Typed(value) => value.as_any().downcast_ref::<T>(),
            Payload::Raw(_) => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(text) => f.debug_tuple("Raw").field(text).finish(),
            Payload::Typed(_) => f.write_str("Typed(..)"),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Raw(text) => serializer.serialize_str(text),
            Payload::Typed(value) => value.to_json().serialize(serializer),
        }
    }
}

/// A parsed logcat record.
///
/// Within one boot session the stream is non-decreasing on the composite
/// (`logcat_token`, `trace_time`).
#[derive(Debug, Clone, Serialize)]
pub struct Logline {
    /// The raw text line, byte for byte.
    pub line: String,
    /// Boot session identifier (36-char UUID).
    pub boot_id: String,
    /// Wall-clock time in the archive's fixed offset.
    pub datetime: DateTime<FixedOffset>,
    /// The raw nanosecond fraction of `datetime`.
    pub datetime_nanos: i64,
    /// Per-line monotonically increasing token.
    pub logcat_token: i64,
    /// Monotonic trace time, fractional seconds.
    pub trace_time: f64,
    pub pid: i32,
    pub tid: i32,
    pub level: char,
    pub tag: String,
    pub payload: Payload,
}

impl Logline {
    pub fn monotonic_timestamp(&self) -> f64 {
        self.trace_time
    }

    /// The payload as text, if no sub-parser has replaced it.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.raw()
    }

    /// Stream order: lexicographic on (boot id, logcat token), trace time as
    /// the tiebreaker for equal tokens.
    pub fn cmp_stream_order(&self, other: &Logline) -> Ordering {
        self.boot_id
            .cmp(&other.boot_id)
            .then_with(|| self.logcat_token.cmp(&other.logcat_token))
            .then_with(|| self.trace_time.total_cmp(&other.trace_time))
    }
}
