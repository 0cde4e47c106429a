use crate::collector::{CollectorError, DataCollector};
use crate::config::ArgMap;
use crate::parser::known::{
    ActivityLifecycleRecord, KernelTraceParser, PowerBatteryRecord, PrintkParser, TypedJsonParser,
    TAG_POWER_BATTERY, TAG_PRINTK, TAG_QOE_LIFECYCLE, TAG_TRACE,
};
use crate::parser::PayloadParser;
use crate::pipeline::{SharedProcessor, StringFilter};
use crate::source::SourceInstance;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates a fresh sub-parser instance; each parser stage gets its own so
/// stateful parsers never cross streams.
pub type ParserGen = Arc<dyn Fn() -> Box<dyn PayloadParser> + Send + Sync>;

pub type CollectorGen =
    Arc<dyn Fn(&ArgMap) -> Result<Arc<dyn DataCollector>, CollectorError> + Send + Sync>;

/// Factory for user processors. `source` carries the already-stitched input
/// stream plus the source metadata; `args` comes from the config reference
/// that named this processor.
pub trait ProcessorGen: Send + Sync {
    fn generate(&self, source: &SourceInstance, args: &ArgMap) -> SharedProcessor;
}

/// What the engine knows how to create: sub-parsers by tag, processor
/// generators, filter predicates and data-collector generators, all by name.
///
/// The known tag parsers are registered on construction; host code registers
/// everything else before a run. The environment is read-only while a runner
/// executes (it is shared behind an `Arc`).
pub struct Environment {
    parsers: HashMap<String, ParserGen>,
    processors: HashMap<String, Arc<dyn ProcessorGen>>,
    filters: HashMap<String, StringFilter>,
    collectors: HashMap<String, CollectorGen>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        let mut env = Self {
            parsers: HashMap::new(),
            processors: HashMap::new(),
            filters: HashMap::new(),
            collectors: HashMap::new(),
        };
        env.register_known_parsers();
        env
    }

    fn register_known_parsers(&mut self) {
        self.register_parser(TAG_PRINTK, || Box::new(PrintkParser::new()));
        self.register_parser(TAG_TRACE, || Box::new(KernelTraceParser::new()));
        self.register_parser(TAG_POWER_BATTERY, || {
            Box::new(TypedJsonParser::<PowerBatteryRecord>::new())
        });
        self.register_parser(TAG_QOE_LIFECYCLE, || {
            Box::new(TypedJsonParser::<ActivityLifecycleRecord>::new())
        });
    }

    pub fn register_parser<F>(&mut self, tag: impl Into<String>, gen: F)
    where
        F: Fn() -> Box<dyn PayloadParser> + Send + Sync + 'static,
    {
        self.parsers.insert(tag.into(), Arc::new(gen));
    }

    pub fn register_processor(&mut self, name: impl Into<String>, gen: Arc<dyn ProcessorGen>) {
        self.processors.insert(name.into(), gen);
    }

    pub fn register_filter(&mut self, name: impl Into<String>, filter: StringFilter) {
        self.filters.insert(name.into(), filter);
    }

    pub fn register_collector(&mut self, name: impl Into<String>, gen: CollectorGen) {
        self.collectors.insert(name.into(), gen);
    }

    pub fn parser(&self, tag: &str) -> Option<&ParserGen> {
        self.parsers.get(tag)
    }

    pub fn processor(&self, name: &str) -> Option<&Arc<dyn ProcessorGen>> {
        self.processors.get(name)
    }

    pub fn filter(&self, name: &str) -> Option<&StringFilter> {
        self.filters.get(name)
    }

    pub fn collector(&self, name: &str) -> Option<&CollectorGen> {
        self.collectors.get(name)
    }
}
