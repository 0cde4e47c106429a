use crate::builder::{BuildError, PipelineBuilder};
use crate::collector::DataCollector;
use crate::source::{ErrHandler, SourceError, SourceGenerator};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to build pipeline for source '{context}': {source}")]
    Build {
        context: String,
        #[source]
        source: BuildError,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("pipeline task for source '{context}' panicked")]
    Panicked { context: String },
}

/// Shared sink that source error handlers push into; drained by
/// [`Runner::run`].
pub type ErrorSink = Arc<Mutex<Vec<RunnerError>>>;

/// An [`ErrHandler`] that records errors instead of aborting.
pub fn collecting_handler(sink: ErrorSink) -> ErrHandler {
    Arc::new(move |err| {
        sink.lock().expect("error sink poisoned").push(RunnerError::Source(err));
    })
}

/// Drives the engine: builds one pipeline per source instance, pulls each
/// sink to exhaustion into the collector, then finishes the collector.
pub struct Runner {
    source: Arc<dyn SourceGenerator>,
    collector: Arc<dyn DataCollector>,
    builder: Arc<dyn PipelineBuilder>,
    max_concurrency: usize,
    errors: ErrorSink,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(
        source: Arc<dyn SourceGenerator>,
        collector: Arc<dyn DataCollector>,
        builder: Arc<dyn PipelineBuilder>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            source,
            collector,
            builder,
            max_concurrency,
            errors: ErrorSink::default(),
        }
    }

    /// Use an existing sink so source-side error handlers and the runner
    /// report through the same list.
    pub fn with_error_sink(mut self, errors: ErrorSink) -> Self {
        self.errors = errors;
        self
    }

    /// Run every source pipeline, at most `max_concurrency` at a time when
    /// that is non-zero. Per-source errors are collected and returned; they
    /// never abort sibling sources.
    pub async fn run(&self) -> Vec<RunnerError> {
        let semaphore = (self.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(self.max_concurrency)));

        let mut instances = self.source.instances();
        let mut pipelines: Vec<(String, JoinHandle<Result<(), RunnerError>>)> = Vec::new();

        while let Some(instance) = instances.recv().await {
            // Wait for a slot before starting the next pipeline.
            let permit = match &semaphore {
                Some(semaphore) => Some(
                    semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore closed"),
                ),
                None => None,
            };

            let builder = self.builder.clone();
            let collector = self.collector.clone();
            let context = instance.info.context();
            debug!(context = %context, "starting source pipeline");

            let task_context = context.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                let pipeline =
                    builder
                        .build_pipeline(&instance)
                        .map_err(|source| RunnerError::Build {
                            context: task_context,
                            source,
                        })?;

                let mut output = pipeline.last_hop.process();
                while let Some(record) = output.recv().await {
                    collector.on_data(record, &instance.info);
                }
                Ok(())
            });
            pipelines.push((context, handle));
        }

        let total = pipelines.len();
        let mut errors = Vec::new();
        for (context, handle) in pipelines {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(_) => errors.push(RunnerError::Panicked { context }),
            }
        }

        self.collector.finish();

        errors.extend(self.errors.lock().expect("error sink poisoned").drain(..));
        info!(sources = total, errors = errors.len(), "runner finished");
        errors
    }
}
