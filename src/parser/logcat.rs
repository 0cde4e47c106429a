use crate::record::{Logline, Payload};
use chrono::{FixedOffset, TimeZone, Timelike};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of input while reading field '{0}'")]
    UnexpectedEof(&'static str),

    #[error("field '{field}': expected length {expected}, got {actual} ('{data}')")]
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
        data: String,
    },

    #[error("field '{field}': invalid integer '{data}'")]
    BadInt { field: &'static str, data: String },

    #[error("field '{field}': invalid float '{data}'")]
    BadFloat { field: &'static str, data: String },

    #[error("invalid date component: {0}")]
    InvalidDate(String),

    #[error("unsupported logcat format (first token length {0})")]
    UnknownFormat(usize),

    #[error("field '{0}': stop sequence not found")]
    MissingStop(&'static str),

    #[error("payload does not match the {0} grammar")]
    PayloadGrammar(&'static str),
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Str,
    I32,
    I64,
    F64,
    /// Everything to end-of-line, leading whitespace skipped.
    Remainder,
}

#[derive(Debug, Clone, Copy)]
enum LengthPolicy {
    None,
    Fixed(usize),
    Max(usize),
}

#[derive(Debug, Clone, Copy)]
enum StopPolicy {
    /// Stop before the next space or tab.
    Whitespace,
    /// Stop after the given byte; it is part of the field.
    CharInclusive(u8),
    /// Stop before the given byte and skip past it.
    CharExclusive(u8),
    /// Stop before the given byte sequence and skip past it.
    SeqExclusive(&'static [u8]),
}

/// One entry of a wire-format field table. The scanner consumes whitespace,
/// matches until the stop condition, checks the length policy and converts —
/// in one pass, never backing up.
struct FieldSpec {
    name: &'static str,
    kind: FieldKind,
    length: LengthPolicy,
    stop: StopPolicy,
    skip: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, kind: FieldKind, length: LengthPolicy, stop: StopPolicy) -> Self {
        Self {
            name,
            kind,
            length,
            stop,
            skip: false,
        }
    }

    const fn skipped(name: &'static str, length: LengthPolicy, stop: StopPolicy) -> Self {
        Self {
            name,
            kind: FieldKind::Str,
            length,
            stop,
            skip: true,
        }
    }
}

#[derive(Debug)]
enum FieldValue<'a> {
    Skipped,
    Str(&'a str),
    I32(i32),
    I64(i64),
    F64(f64),
}

impl<'a> FieldValue<'a> {
    fn str(&self) -> &'a str {
        match self {
            FieldValue::Str(s) => s,
            other => unreachable!("field table mismatch: expected string, got {other:?}"),
        }
    }

    fn i32(&self) -> i32 {
        match self {
            FieldValue::I32(v) => *v,
            other => unreachable!("field table mismatch: expected i32, got {other:?}"),
        }
    }

    fn i64(&self) -> i64 {
        match self {
            FieldValue::I64(v) => *v,
            other => unreachable!("field table mismatch: expected i64, got {other:?}"),
        }
    }

    fn f64(&self) -> f64 {
        match self {
            FieldValue::F64(v) => *v,
            other => unreachable!("field table mismatch: expected f64, got {other:?}"),
        }
    }
}

fn is_field_space(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

struct Scanner<'a> {
    line: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            bytes: line.as_bytes(),
            pos: 0,
        }
    }

    fn advance(&mut self) {
        while self.pos < self.bytes.len() && is_field_space(self.bytes[self.pos]) {
            self.pos += 1;
        }
    }

    /// Length of the first whitespace-delimited token, without consuming it.
    /// This is the sole format discriminator.
    fn first_token_len(&mut self) -> Result<usize, ParseError> {
        self.advance();
        if self.pos >= self.bytes.len() {
            return Err(ParseError::UnexpectedEof("first token"));
        }
        let mut end = self.pos;
        while end < self.bytes.len() && !is_field_space(self.bytes[end]) {
            end += 1;
        }
        Ok(end - self.pos)
    }

    fn field(&mut self, spec: &FieldSpec) -> Result<FieldValue<'a>, ParseError> {
        self.advance();
        if self.pos >= self.bytes.len() {
            return Err(ParseError::UnexpectedEof(spec.name));
        }

        if matches!(spec.kind, FieldKind::Remainder) {
            let rest = &self.line[self.pos..];
            self.pos = self.bytes.len();
            return Ok(FieldValue::Str(rest));
        }

        let start = self.pos;
        let mut skip_after = 0usize;
        match spec.stop {
            StopPolicy::Whitespace => {
                while self.pos < self.bytes.len() && !is_field_space(self.bytes[self.pos]) {
                    self.pos += 1;
                }
            }
            StopPolicy::CharInclusive(stop) => {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != stop {
                    self.pos += 1;
                }
                if self.pos < self.bytes.len() {
                    self.pos += 1;
                }
            }
            StopPolicy::CharExclusive(stop) => {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != stop {
                    self.pos += 1;
                }
                skip_after = 1;
            }
            StopPolicy::SeqExclusive(seq) => {
                loop {
                    if self.pos + seq.len() > self.bytes.len() {
                        return Err(ParseError::MissingStop(spec.name));
                    }
                    if &self.bytes[self.pos..self.pos + seq.len()] == seq {
                        break;
                    }
                    self.pos += 1;
                }
                skip_after = seq.len();
            }
        }

        let data = &self.line[start..self.pos];
        if self.pos < self.bytes.len() {
            self.pos += skip_after;
        }

        match spec.length {
            LengthPolicy::None => {}
            LengthPolicy::Fixed(expected) if data.len() != expected => {
                return Err(ParseError::BadLength {
                    field: spec.name,
                    expected,
                    actual: data.len(),
                    data: data.to_string(),
                });
            }
            LengthPolicy::Max(max) if data.len() > max => {
                return Err(ParseError::BadLength {
                    field: spec.name,
                    expected: max,
                    actual: data.len(),
                    data: data.to_string(),
                });
            }
            _ => {}
        }

        if spec.skip {
            return Ok(FieldValue::Skipped);
        }

        match spec.kind {
            FieldKind::Str | FieldKind::Remainder => Ok(FieldValue::Str(data)),
            FieldKind::I32 => data
                .parse::<i32>()
                .map(FieldValue::I32)
                .map_err(|_| ParseError::BadInt {
                    field: spec.name,
                    data: data.to_string(),
                }),
            FieldKind::I64 => data
                .parse::<i64>()
                .map(FieldValue::I64)
                .map_err(|_| ParseError::BadInt {
                    field: spec.name,
                    data: data.to_string(),
                }),
            FieldKind::F64 => data
                .parse::<f64>()
                .map(FieldValue::F64)
                .map_err(|_| ParseError::BadFloat {
                    field: spec.name,
                    data: data.to_string(),
                }),
        }
    }
}

const WS: StopPolicy = StopPolicy::Whitespace;

/// `<bootid> <YYYY-MM-DD> <HH:MM:SS.nnnnnnnnn> <token> [<tracetime>] <pid>
/// <tid> <level> <tag>: <payload>`
const TRACE_FIELDS: [FieldSpec; 16] = [
    FieldSpec::new("boot_id", FieldKind::Str, LengthPolicy::Fixed(36), WS),
    FieldSpec::new("year", FieldKind::I32, LengthPolicy::Fixed(4), StopPolicy::CharExclusive(b'-')),
    FieldSpec::new("month", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b'-')),
    FieldSpec::new("day", FieldKind::I32, LengthPolicy::Fixed(2), WS),
    FieldSpec::new("hour", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b':')),
    FieldSpec::new("minute", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b':')),
    FieldSpec::new("second", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b'.')),
    FieldSpec::new("nanoseconds", FieldKind::Str, LengthPolicy::Max(9), WS),
    FieldSpec::new("logcat_token", FieldKind::I64, LengthPolicy::None, WS),
    FieldSpec::skipped("open_bracket", LengthPolicy::Fixed(1), StopPolicy::CharInclusive(b'[')),
    FieldSpec::new("trace_time", FieldKind::F64, LengthPolicy::None, StopPolicy::CharExclusive(b']')),
    FieldSpec::new("pid", FieldKind::I32, LengthPolicy::None, WS),
    FieldSpec::new("tid", FieldKind::I32, LengthPolicy::None, WS),
    FieldSpec::new("level", FieldKind::Str, LengthPolicy::Fixed(1), WS),
    FieldSpec::new("tag", FieldKind::Str, LengthPolicy::None, StopPolicy::SeqExclusive(b": ")),
    FieldSpec::new("payload", FieldKind::Remainder, LengthPolicy::None, WS),
];

/// `<deviceid> <ts1> <ts2> <bootid> <token> <tracetime> <YYYY-MM-DD>
/// <HH:MM:SS.nnn> <pid> <tid> <level> <tag> <payload>`
const PHONELAB_FIELDS: [FieldSpec; 18] = [
    FieldSpec::skipped("device_id", LengthPolicy::Fixed(40), WS),
    FieldSpec::skipped("timestamp", LengthPolicy::None, WS),
    FieldSpec::skipped("timestamp_sub", LengthPolicy::None, WS),
    FieldSpec::new("boot_id", FieldKind::Str, LengthPolicy::Fixed(36), WS),
    FieldSpec::new("logcat_token", FieldKind::I64, LengthPolicy::None, WS),
    FieldSpec::new("trace_time", FieldKind::F64, LengthPolicy::None, WS),
    FieldSpec::new("year", FieldKind::I32, LengthPolicy::Fixed(4), StopPolicy::CharExclusive(b'-')),
    FieldSpec::new("month", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b'-')),
    FieldSpec::new("day", FieldKind::I32, LengthPolicy::Fixed(2), WS),
    FieldSpec::new("hour", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b':')),
    FieldSpec::new("minute", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b':')),
    FieldSpec::new("second", FieldKind::I32, LengthPolicy::Fixed(2), StopPolicy::CharExclusive(b'.')),
    FieldSpec::new("nanoseconds", FieldKind::Str, LengthPolicy::Max(9), WS),
    FieldSpec::new("pid", FieldKind::I32, LengthPolicy::None, WS),
    FieldSpec::new("tid", FieldKind::I32, LengthPolicy::None, WS),
    FieldSpec::new("level", FieldKind::Str, LengthPolicy::Fixed(1), WS),
    FieldSpec::new("tag", FieldKind::Str, LengthPolicy::None, WS),
    FieldSpec::new("payload", FieldKind::Remainder, LengthPolicy::None, WS),
];

const TRACE_TOKEN_LEN: usize = 36;
const PHONELAB_TOKEN_LEN: usize = 40;

/// Single-pass logcat line parser.
///
/// Two wire formats are accepted, discriminated by the length of the first
/// whitespace-delimited token: 36 (a boot id; trace-time format) or 40 (a
/// device id; PhoneLab format). There is no in-file mode switching.
#[derive(Debug, Clone)]
pub struct LogcatParser {
    offset: FixedOffset,
}

impl Default for LogcatParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogcatParser {
    /// Parser with the dataset's historical UTC-5 wall-clock offset.
    pub fn new() -> Self {
        // Offset is fixed year-round; records straddling a DST boundary
        // drift by an hour relative to the device's local clock.
        Self {
            offset: FixedOffset::west_opt(5 * 3600).expect("static utc-5 offset"),
        }
    }

    /// Parser assembling wall-clock datetimes in a caller-chosen offset.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn parse(&self, line: &str) -> Result<Logline, ParseError> {
        let mut scanner = Scanner::new(line);
        match scanner.first_token_len()? {
            TRACE_TOKEN_LEN => {
                let values = scan_table(&mut scanner, &TRACE_FIELDS)?;
                self.build_trace(line, &values)
            }
            PHONELAB_TOKEN_LEN => {
                let values = scan_table(&mut scanner, &PHONELAB_FIELDS)?;
                self.build_phonelab(line, &values)
            }
            other => Err(ParseError::UnknownFormat(other)),
        }
    }

    fn build_trace(&self, line: &str, values: &[FieldValue<'_>]) -> Result<Logline, ParseError> {
        let (datetime, nanos) = self.datetime_parts(values, 1)?;
        Ok(Logline {
            line: line.to_string(),
            boot_id: values[0].str().to_string(),
            datetime,
            datetime_nanos: nanos,
            logcat_token: values[8].i64(),
            trace_time: values[10].f64(),
            pid: values[11].i32(),
            tid: values[12].i32(),
            level: level_char(values[13].str()),
            tag: values[14].str().trim().to_string(),
            payload: Payload::Raw(values[15].str().trim().to_string()),
        })
    }

    fn build_phonelab(&self, line: &str, values: &[FieldValue<'_>]) -> Result<Logline, ParseError> {
        let (datetime, nanos) = self.datetime_parts(values, 6)?;
        Ok(Logline {
            line: line.to_string(),
            boot_id: values[3].str().to_string(),
            datetime,
            datetime_nanos: nanos,
            logcat_token: values[4].i64(),
            trace_time: values[5].f64(),
            pid: values[13].i32(),
            tid: values[14].i32(),
            level: level_char(values[15].str()),
            tag: values[16].str().trim().to_string(),
            payload: Payload::Raw(values[17].str().trim().to_string()),
        })
    }

    fn datetime_parts(
        &self,
        values: &[FieldValue<'_>],
        first: usize,
    ) -> Result<(chrono::DateTime<FixedOffset>, i64), ParseError> {
        let year = values[first].i32();
        let month = values[first + 1].i32();
        let day = values[first + 2].i32();
        let hour = values[first + 3].i32();
        let minute = values[first + 4].i32();
        let second = values[first + 5].i32();
        let nanos = scale_nanos(values[first + 6].str())?;

        let datetime = self
            .offset
            .with_ymd_and_hms(
                year,
                month as u32,
                day as u32,
                hour as u32,
                minute as u32,
                second as u32,
            )
            .single()
            .ok_or_else(|| {
                ParseError::InvalidDate(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            })?
            .with_nanosecond(nanos as u32)
            .ok_or_else(|| ParseError::InvalidDate(format!("nanoseconds {nanos}")))?;

        Ok((datetime, nanos))
    }
}

/// Scale a 1..=9 digit fraction to integer nanoseconds.
fn scale_nanos(digits: &str) -> Result<i64, ParseError> {
    let mut nanos: i64 = digits.parse().map_err(|_| ParseError::BadInt {
        field: "nanoseconds",
        data: digits.to_string(),
    })?;
    for _ in 0..(9 - digits.len()) {
        nanos *= 10;
    }
    Ok(nanos)
}

fn level_char(data: &str) -> char {
    // Fixed(1) guarantees a single byte.
    data.as_bytes()[0] as char
}

fn scan_table<'a>(
    scanner: &mut Scanner<'a>,
    table: &[FieldSpec],
) -> Result<Vec<FieldValue<'a>>, ParseError> {
    let mut values = Vec::with_capacity(table.len());
    for spec in table {
        values.push(scanner.field(spec)?);
    }
    Ok(values)
}
