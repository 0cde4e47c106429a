pub mod known;
pub mod logcat;

pub use logcat::{LogcatParser, ParseError};

use crate::record::{Logline, Payload, RecordValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A sub-parser: consumes the payload text of one line and produces a typed
/// record. Sub-parsers may keep state; the parser stage guarantees each
/// instance is only touched from a single task.
pub trait PayloadParser: Send {
    fn parse(&mut self, payload: &str) -> Result<Arc<dyn RecordValue>, ParseError>;
}

/// The top-level line parser: runs [`LogcatParser`] on the whole line, then
/// dispatches the payload to the sub-parser registered for the line's tag,
/// if any.
///
/// Sub-parser failures do not lose the line: the error is logged and the
/// logline is returned with its raw payload intact.
pub struct LoglineParser {
    logcat: LogcatParser,
    tag_parsers: HashMap<String, Box<dyn PayloadParser>>,
}

impl Default for LoglineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LoglineParser {
    pub fn new() -> Self {
        Self::with_logcat(LogcatParser::new())
    }

    pub fn with_logcat(logcat: LogcatParser) -> Self {
        Self {
            logcat,
            tag_parsers: HashMap::new(),
        }
    }

    /// Register a sub-parser for a tag, replacing any previous one.
    pub fn set_parser(&mut self, tag: impl Into<String>, parser: Box<dyn PayloadParser>) {
        self.tag_parsers.insert(tag.into(), parser);
    }

    pub fn clear_parser(&mut self, tag: &str) {
        self.tag_parsers.remove(tag);
    }

    pub fn parse(&mut self, line: &str) -> Result<Logline, ParseError> {
        let mut logline = self.logcat.parse(line)?;

        if let Some(parser) = self.tag_parsers.get_mut(&logline.tag) {
            let outcome = match &logline.payload {
                Payload::Raw(text) => Some(parser.parse(text)),
                Payload::Typed(_) => None,
            };
            match outcome {
                Some(Ok(value)) => logline.payload = Payload::Typed(value),
                Some(Err(err)) => {
                    warn!(tag = %logline.tag, error = %err, "sub-parser failed, keeping raw payload");
                }
                None => {}
            }
        }

        Ok(logline)
    }
}
