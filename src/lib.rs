//! logweave is a log-stream analytics engine. It consumes semi-structured
//! device log archives, parses them into typed records, and routes them
//! through a user-declared acyclic graph of processors whose nodes run
//! concurrently, one pipeline per source (one file, or one device/boot
//! session).
//!
//! The moving parts:
//!
//! - [`config`]: the declarative YAML runner/processor configuration.
//! - [`builder`]: dependency resolution, cycle detection and per-source
//!   pipeline instantiation.
//! - [`pipeline`]: the pull-stream [`Processor`](pipeline::Processor)
//!   abstraction and its combinators (broadcast muxer, demuxer, ordered
//!   merge).
//! - [`parser`]: the logcat line parser and payload sub-parsers.
//! - [`source`]: text-file and device/boot-session source iterators.
//! - [`runner`] and [`collector`]: driving pipelines and delivering sink
//!   output.
//! - [`env`]: the registries of parsers, processors, filters and collectors
//!   a config can name.
//!
//! A minimal run wires these together:
//!
//! ```no_run
//! use logweave::config::RunnerConf;
//! use logweave::env::Environment;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let conf = RunnerConf::from_yaml(
//!     r#"
//! source:
//!   type: files
//!   sources: ["logs/*.log"]
//! processors:
//!   - name: counter
//!     has_logstream: true
//! sink:
//!   name: counter
//! "#,
//! )?;
//!
//! let mut env = Environment::new();
//! // env.register_processor("counter", ...);
//! let runner = conf.into_runner(Arc::new(env))?;
//! let errors = runner.run().await;
//! assert!(errors.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod collector;
pub mod config;
pub mod env;
pub mod fs;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod runner;
pub mod serialize;
pub mod source;

pub use builder::{BuildError, ConfPipelineBuilder, DepGraph, Pipeline, PipelineBuilder};
pub use collector::{CollectorError, DataCollector, DefaultCollector, NoopCollector};
pub use config::{ArgMap, ConfigError, ProcessorConf, ProcessorRef, RunnerConf};
pub use env::{CollectorGen, Environment, ParserGen, ProcessorGen};
pub use parser::{LogcatParser, LoglineParser, ParseError, PayloadParser};
pub use pipeline::{
    Demuxer, Handler, Muxer, Processor, RecordStream, SharedProcessor, SimpleProcessor,
    Timeweaver, VecProcessor,
};
pub use record::{Logline, Payload, Record, RecordValue};
pub use runner::{Runner, RunnerError};
pub use source::{
    ErrHandler, SourceError, SourceGenerator, SourceInfo, SourceInstance, StitchInfo,
};
