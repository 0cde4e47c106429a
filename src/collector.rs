use crate::config::ArgMap;
use crate::env::CollectorGen;
use crate::record::Record;
use crate::serialize::{self, SerializeError, Serializer};
use crate::source::SourceInfo;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("missing '{0}' argument")]
    MissingArg(&'static str),

    #[error("unexpected type for '{0}' argument")]
    BadArg(&'static str),

    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

/// Receives every record the sink emits, across all source pipelines, then a
/// single `finish` once the runner has drained everything. `on_data` is
/// called concurrently; implementations synchronize internally.
pub trait DataCollector: Send + Sync {
    fn on_data(&self, record: Record, info: &SourceInfo);

    fn finish(&self);
}

impl std::fmt::Debug for dyn DataCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn DataCollector").finish_non_exhaustive()
    }
}

/// Discards everything. Used when no collector is configured.
pub struct NoopCollector;

impl DataCollector for NoopCollector {
    fn on_data(&self, _record: Record, _info: &SourceInfo) {}

    fn finish(&self) {}
}

/// Persists records under `<path>/<context>.json` (or `.gz`), with the
/// serializer inferred from the path scheme. With `aggregate: true` all
/// records buffer in memory and one array is written on `finish` under the
/// first context seen.
pub struct DefaultCollector {
    path: String,
    compressed: bool,
    aggregate: bool,
    serializer: Arc<dyn Serializer>,
    state: Mutex<AggregateState>,
}

#[derive(Default)]
struct AggregateState {
    first_context: Option<String>,
    data: Vec<serde_json::Value>,
}

impl DefaultCollector {
    /// Build from config args: `path` (required), `compressed`/`compress`
    /// and `aggregate` (optional bools).
    pub fn from_args(args: &ArgMap) -> Result<Arc<dyn DataCollector>, CollectorError> {
        let path = match args.get("path") {
            Some(value) => value
                .as_str()
                .ok_or(CollectorError::BadArg("path"))?
                .to_string(),
            None => return Err(CollectorError::MissingArg("path")),
        };

        let mut compressed = false;
        for key in ["compress", "compressed"] {
            if let Some(value) = args.get(key) {
                compressed = value.as_bool().ok_or(CollectorError::BadArg("compressed"))?;
            }
        }

        let aggregate = match args.get("aggregate") {
            Some(value) => value.as_bool().ok_or(CollectorError::BadArg("aggregate"))?,
            None => false,
        };

        let serializer = serialize::detect(&path)?;

        Ok(Arc::new(Self {
            path,
            compressed,
            aggregate,
            serializer,
            state: Mutex::new(AggregateState::default()),
        }))
    }

    /// A generator suitable for
    /// [`Environment::register_collector`](crate::env::Environment::register_collector).
    pub fn generator() -> CollectorGen {
        Arc::new(Self::from_args)
    }

    fn make_out_path(&self, context: &str) -> String {
        let context = context.replace('/', "_");
        let extension = if self.compressed { "gz" } else { "json" };
        format!("{}/{}.{}", self.path.trim_end_matches('/'), context, extension)
    }
}

impl DataCollector for DefaultCollector {
    fn on_data(&self, record: Record, info: &SourceInfo) {
        if self.aggregate {
            let mut state = self.state.lock().expect("collector state poisoned");
            if state.first_context.is_none() {
                state.first_context = Some(info.context());
            }
            state.data.push(record.to_json());
        } else {
            let out_path = self.make_out_path(&info.context());
            if let Err(err) = self.serializer.serialize(&record.to_json(), &out_path) {
                error!(error = %err, path = %out_path, "failed to serialize record");
            }
        }
    }

    fn finish(&self) {
        if !self.aggregate {
            return;
        }

        let state = self.state.lock().expect("collector state poisoned");
        let context = state.first_context.clone().unwrap_or_default();
        let out_path = self.make_out_path(&context);
        let all = serde_json::Value::Array(state.data.clone());
        if let Err(err) = self.serializer.serialize(&all, &out_path) {
            error!(error = %err, path = %out_path, "failed to serialize aggregated records");
        }
    }
}
