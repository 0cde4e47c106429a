use crate::collector::{CollectorError, DataCollector, NoopCollector};
use crate::config::{
    arg_str, FilterKind, PipelineSourceConf, ProcessorConf, RunnerConf, SourceKind,
};
use crate::env::Environment;
use crate::fs::{FsError, FsHandle, LocalFs};
use crate::parser::LoglineParser;
use crate::pipeline::{
    logline_processor, regex_filter, stitch, string_filter_processor, substring_filter, Muxer,
    SharedProcessor, StringFilter,
};
use crate::runner::{collecting_handler, ErrorSink, Runner};
use crate::source::{
    device_paths_from_globs, DateRange, DateRangeError, ErrHandler, PhonelabSourceGenerator,
    SourceError, SourceGenerator, SourceInstance, TextFileSourceGenerator,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot find sink processor '{0}'")]
    MissingSink(String),

    #[error("cannot find processor conf for '{0}'")]
    MissingNode(String),

    #[error("cannot find input processor '{input}' for processor '{node}'")]
    DanglingInput { node: String, input: String },

    #[error("cycle detected in the pipeline dependency graph (involving: {0})")]
    Cycle(String),

    #[error("configuration errors:\n{}", .0.join("\n"))]
    Validation(Vec<String>),

    #[error("no source specified in runner conf")]
    NoSourceConf,

    #[error("missing sources specification in runner conf")]
    NoSources,

    #[error("invalid source file: empty name")]
    EmptySource,

    #[error("hdfsAddr is set but no hdfs filesystem driver was supplied")]
    NoHdfsDriver,

    #[error("unknown data collector '{0}'")]
    UnknownCollector(String),

    #[error("cannot find processor generator '{0}'")]
    UnknownGenerator(String),

    #[error("no inputs and no log stream for processor '{0}'")]
    NoInputs(String),

    #[error("invalid filter regex '{pattern}': {source}")]
    BadRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    DateRange(#[from] DateRangeError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

/// The processor dependency graph: nodes keyed by processor name, edges from
/// each dependent to its inputs, reachable from the sink.
#[derive(Debug)]
pub struct DepGraph {
    nodes: HashMap<String, ProcessorConf>,
    /// dependent -> input names, with multiplicity.
    edges: HashMap<String, Vec<String>>,
    /// name -> how many graph edges consume this node's output.
    consumers: HashMap<String, usize>,
}

impl DepGraph {
    /// Walk the config from the sink, resolving every named input. Inputs
    /// that resolve to no processor are an error.
    pub fn build(conf: &RunnerConf, sink: &str) -> Result<Self, BuildError> {
        let root = conf
            .find_processor(sink)
            .ok_or_else(|| BuildError::MissingSink(sink.to_string()))?;

        let mut graph = DepGraph {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            consumers: HashMap::new(),
        };
        graph.nodes.insert(root.name.clone(), root.clone());

        let mut to_process = vec![root.name.clone()];
        while let Some(name) = to_process.pop() {
            let inputs: Vec<String> = graph.nodes[&name]
                .inputs
                .iter()
                .map(|input| input.name.clone())
                .collect();

            for input in &inputs {
                if !graph.nodes.contains_key(input) {
                    let dep = conf.find_processor(input).ok_or_else(|| {
                        BuildError::DanglingInput {
                            node: name.clone(),
                            input: input.clone(),
                        }
                    })?;
                    graph.nodes.insert(dep.name.clone(), dep.clone());
                    to_process.push(dep.name.clone());
                }
                *graph.consumers.entry(input.clone()).or_insert(0) += 1;
            }
            graph.edges.insert(name, inputs);
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&ProcessorConf> {
        self.nodes.get(name)
    }

    /// How many downstream nodes consume this node's output. Duplicate edges
    /// count: a node referenced twice by one parent needs a fan-out of two.
    pub fn consumers(&self, name: &str) -> usize {
        self.consumers.get(name).copied().unwrap_or(0)
    }

    /// Kahn's algorithm, dependents first. A leftover node means a cycle.
    pub fn topo_sort(&self) -> Result<Vec<String>, BuildError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.keys().map(|name| (name.as_str(), 0)).collect();
        for inputs in self.edges.values() {
            for input in inputs {
                if let Some(degree) = in_degree.get_mut(input.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();
        queue.sort_unstable();

        let mut sorted = Vec::new();
        while let Some(name) = queue.pop() {
            sorted.push(name.to_string());
            if let Some(inputs) = self.edges.get(name) {
                for input in inputs {
                    if let Some(degree) = in_degree.get_mut(input.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(input);
                        }
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let mut remaining: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&name, _)| name)
                .collect();
            remaining.sort_unstable();
            return Err(BuildError::Cycle(remaining.join(", ")));
        }

        Ok(sorted)
    }
}

/// Validate one processor conf against the environment, accumulating errors
/// with node context. Inputs are validated separately, while building the
/// graph.
fn validate_processor(conf: &ProcessorConf, env: &Environment, errors: &mut Vec<String>) {
    let prefix = format!("processor '{}'", conf.name);

    let gen_name = conf.generator_name();
    if gen_name.trim().is_empty() {
        errors.push(format!("{prefix}: processor name cannot be empty"));
    } else if env.processor(gen_name).is_none() {
        errors.push(format!("{prefix}: unknown processor generator '{gen_name}'"));
    }

    for pre in &conf.preprocessors {
        if pre.name.is_empty() {
            errors.push(format!("{prefix}: preprocessor name cannot be empty"));
        } else if env.processor(&pre.name).is_none() {
            errors.push(format!("{prefix}: unknown preprocessor '{}'", pre.name));
        }
    }

    for filter in &conf.filters {
        if filter.filter.is_empty() {
            errors.push(format!("{prefix}: filter must not be empty"));
            continue;
        }
        match filter.kind {
            FilterKind::Simple => {}
            FilterKind::Regex => {
                if let Err(err) = Regex::new(&filter.filter) {
                    errors.push(format!(
                        "{prefix}: invalid filter regex '{}': {err}",
                        filter.filter
                    ));
                }
            }
            FilterKind::Custom => {
                if env.filter(&filter.filter).is_none() {
                    errors.push(format!(
                        "{prefix}: unknown custom filter '{}'",
                        filter.filter
                    ));
                }
            }
        }
    }

    for tag in &conf.parsers {
        if tag.is_empty() {
            errors.push(format!("{prefix}: parser tag cannot be empty"));
        } else if env.parser(tag).is_none() {
            errors.push(format!("{prefix}: unknown parser '{tag}'"));
        }
    }
}

/// A fully wired processor graph for one source; pull `last_hop` to run it.
pub struct Pipeline {
    pub last_hop: SharedProcessor,
}

/// Builds one concrete [`Pipeline`] per source instance.
pub trait PipelineBuilder: Send + Sync {
    fn build_pipeline(&self, source: &SourceInstance) -> Result<Pipeline, BuildError>;
}

/// Pipeline builder driven by a validated [`RunnerConf`]. Construction fails
/// fast on any configuration error, before any source I/O happens.
pub struct ConfPipelineBuilder {
    conf: RunnerConf,
    env: Arc<Environment>,
    graph: DepGraph,
}

impl std::fmt::Debug for ConfPipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfPipelineBuilder")
            .field("conf", &self.conf)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl ConfPipelineBuilder {
    pub fn new(conf: RunnerConf, env: Arc<Environment>) -> Result<Self, BuildError> {
        let graph = DepGraph::build(&conf, &conf.sink.name)?;
        graph.topo_sort()?;

        let mut errors = Vec::new();
        let mut names: Vec<&String> = graph.nodes.keys().collect();
        names.sort();
        for name in names {
            validate_processor(&graph.nodes[name], &env, &mut errors);
        }
        if !errors.is_empty() {
            return Err(BuildError::Validation(errors));
        }

        Ok(Self { conf, env, graph })
    }

    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    /// The recursive build rule: logline chain first (if declared), then
    /// every named input, stitched into one ordered stream, fed to the
    /// generator, and broadcast-wrapped when more than one downstream node
    /// consumes the output.
    fn build_processor(
        &self,
        name: &str,
        args: &crate::config::ArgMap,
        source: &SourceInstance,
        cache: &mut HashMap<String, SharedProcessor>,
    ) -> Result<SharedProcessor, BuildError> {
        if let Some(built) = cache.get(name) {
            return Ok(built.clone());
        }

        let node = self
            .graph
            .node(name)
            .ok_or_else(|| BuildError::MissingNode(name.to_string()))?;

        let mut inputs: Vec<SharedProcessor> = Vec::new();

        if node.has_logstream {
            inputs.push(self.build_logline_input(node, source)?);
        }

        for input in &node.inputs {
            inputs.push(self.build_processor(&input.name, &input.args, source, cache)?);
        }

        // Upstream processors may emit records out of order relative to the
        // raw stream, but each output is individually monotonic, so the
        // pairwise ordered merge keeps the stitched input globally ordered.
        let stitched = stitch(inputs).ok_or_else(|| BuildError::NoInputs(name.to_string()))?;

        let generator = self
            .env
            .processor(node.generator_name())
            .ok_or_else(|| BuildError::UnknownGenerator(node.generator_name().to_string()))?;

        let mut built = generator.generate(
            &SourceInstance {
                processor: stitched,
                info: source.info.clone(),
            },
            args,
        );

        let consumers = self.graph.consumers(name);
        if consumers > 1 {
            built = Arc::new(Muxer::new(built, consumers));
        }

        cache.insert(name.to_string(), built.clone());
        Ok(built)
    }

    /// The implicit logline input: raw source -> string filters -> parser
    /// stage -> preprocessor chain. Built fresh for every node that declares
    /// `has_logstream`, since file-backed sources re-open cheaply.
    fn build_logline_input(
        &self,
        node: &ProcessorConf,
        source: &SourceInstance,
    ) -> Result<SharedProcessor, BuildError> {
        let mut chain = source.processor.clone();

        let filters = self.build_filters(node)?;
        if !filters.is_empty() {
            chain = string_filter_processor(chain, filters);
        }

        let mut parser = LoglineParser::new();
        for tag in &node.parsers {
            if let Some(gen) = self.env.parser(tag) {
                parser.set_parser(tag.clone(), gen());
            }
        }
        chain = logline_processor(chain, parser);

        for pre in &node.preprocessors {
            let generator = self
                .env
                .processor(&pre.name)
                .ok_or_else(|| BuildError::UnknownGenerator(pre.name.clone()))?;
            chain = generator.generate(
                &SourceInstance {
                    processor: chain,
                    info: source.info.clone(),
                },
                &pre.args,
            );
        }

        Ok(chain)
    }

    fn build_filters(&self, node: &ProcessorConf) -> Result<Vec<StringFilter>, BuildError> {
        let mut filters = Vec::new();
        for conf in &node.filters {
            if conf.filter.is_empty() {
                continue;
            }
            match conf.kind {
                FilterKind::Simple => {
                    let conditions: Vec<String> = conf
                        .filter
                        .split("&&")
                        .filter(|cond| !cond.is_empty())
                        .map(String::from)
                        .collect();
                    if !conditions.is_empty() {
                        filters.push(substring_filter(conditions));
                    }
                }
                FilterKind::Regex => {
                    let pattern =
                        Regex::new(&conf.filter).map_err(|source| BuildError::BadRegex {
                            pattern: conf.filter.clone(),
                            source,
                        })?;
                    filters.push(regex_filter(pattern));
                }
                FilterKind::Custom => {
                    if let Some(filter) = self.env.filter(&conf.filter) {
                        filters.push(filter.clone());
                    }
                }
            }
        }
        Ok(filters)
    }
}

impl PipelineBuilder for ConfPipelineBuilder {
    fn build_pipeline(&self, source: &SourceInstance) -> Result<Pipeline, BuildError> {
        let mut cache = HashMap::new();
        let last_hop =
            self.build_processor(&self.conf.sink.name, &self.conf.sink.args, source, &mut cache)?;
        Ok(Pipeline { last_hop })
    }
}

fn source_generator(
    conf: &PipelineSourceConf,
    fs: FsHandle,
    err_handler: ErrHandler,
) -> Result<Box<dyn SourceGenerator>, BuildError> {
    if conf.sources.is_empty() {
        return Err(BuildError::NoSources);
    }
    if conf.sources.iter().any(|source| source.is_empty()) {
        return Err(BuildError::EmptySource);
    }

    match conf.kind {
        SourceKind::Files => {
            let mut files = Vec::new();
            for pattern in &conf.sources {
                files.extend(fs.glob(pattern)?);
            }
            Ok(Box::new(TextFileSourceGenerator::new(
                files,
                fs,
                Some(err_handler),
            )))
        }
        SourceKind::Phonelab => {
            let date_range = match arg_str(&conf.args, "daterange") {
                Some(text) => Some(DateRange::parse(text)?),
                None => None,
            };
            let device_paths = device_paths_from_globs(&fs, &conf.sources)?;
            Ok(Box::new(PhonelabSourceGenerator::new(
                device_paths,
                fs,
                date_range,
                Some(err_handler),
            )))
        }
    }
}

impl RunnerConf {
    /// Turn a validated config into a runnable [`Runner`] over the local
    /// filesystem.
    pub fn into_runner(self, env: Arc<Environment>) -> Result<Runner, BuildError> {
        if let Some(source) = &self.source {
            if source.hdfs_addr.is_some() {
                return Err(BuildError::NoHdfsDriver);
            }
        }
        self.into_runner_with_fs(env, LocalFs::handle())
    }

    /// Like [`into_runner`](Self::into_runner) but reading sources through a
    /// caller-supplied filesystem driver (e.g. HDFS).
    pub fn into_runner_with_fs(
        self,
        env: Arc<Environment>,
        fs: FsHandle,
    ) -> Result<Runner, BuildError> {
        let source_conf = self.source.clone().ok_or(BuildError::NoSourceConf)?;
        let collector_conf = self.data_collector.clone();
        let max_concurrency = self.max_concurrency;

        // Configuration errors fail fast, before any source I/O.
        let builder = ConfPipelineBuilder::new(self, env.clone())?;

        let collector: Arc<dyn DataCollector> = match &collector_conf {
            Some(conf) => {
                let generator = env
                    .collector(&conf.name)
                    .ok_or_else(|| BuildError::UnknownCollector(conf.name.clone()))?;
                generator(&conf.args)?
            }
            None => Arc::new(NoopCollector),
        };

        // Source-side errors collect into the runner's result instead of
        // aborting the process.
        let errors = ErrorSink::default();
        let handler = collecting_handler(errors.clone());
        let generator = source_generator(&source_conf, fs, handler)?;

        Ok(
            Runner::new(Arc::from(generator), collector, Arc::new(builder), max_concurrency)
                .with_error_sink(errors),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ProcessorGen;
    use crate::pipeline::{Handler, SimpleProcessor};
    use crate::record::Record;

    struct PassHandler;

    impl Handler for PassHandler {
        fn handle(&mut self, record: Record) -> Option<Record> {
            Some(record)
        }
    }

    struct PassthroughGen;

    impl ProcessorGen for PassthroughGen {
        fn generate(
            &self,
            source: &SourceInstance,
            _args: &crate::config::ArgMap,
        ) -> SharedProcessor {
            Arc::new(SimpleProcessor::new(source.processor.clone(), PassHandler))
        }
    }

    fn env_with_passthrough() -> Arc<Environment> {
        let mut env = Environment::new();
        env.register_processor("passthrough", Arc::new(PassthroughGen));
        Arc::new(env)
    }

    #[test]
    fn dependency_graph_walks_from_the_sink() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: proc1
    inputs: [{name: proc2}]
  - name: proc2
    inputs: [{name: proc3}]
  - name: proc3
    inputs: [{name: proc4}]
  - name: proc4
  - name: unreachable
sink:
  name: proc1
"#,
        )
        .unwrap();

        let graph = DepGraph::build(&conf, "proc1").unwrap();
        assert_eq!(graph.len(), 4);
        for name in ["proc1", "proc2", "proc3", "proc4"] {
            assert!(graph.contains(name));
        }
        assert!(!graph.contains("unreachable"));

        let order = graph.topo_sort().unwrap();
        assert_eq!(order, vec!["proc1", "proc2", "proc3", "proc4"]);
    }

    #[test]
    fn cycle_is_a_fatal_configuration_error() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: proc1
    inputs: [{name: proc2}]
  - name: proc2
    inputs: [{name: proc3}]
  - name: proc3
    inputs: [{name: proc4}]
  - name: proc4
    inputs: [{name: proc2}]
sink:
  name: proc1
"#,
        )
        .unwrap();

        let graph = DepGraph::build(&conf, "proc1").unwrap();
        assert_eq!(graph.len(), 4);
        let err = graph.topo_sort().unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));

        let err = ConfPipelineBuilder::new(conf, env_with_passthrough()).unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn missing_sink_is_rejected() {
        let conf = RunnerConf::from_yaml("processors: []\nsink:\n  name: ghost\n").unwrap();
        let err = DepGraph::build(&conf, "ghost").unwrap_err();
        assert!(matches!(err, BuildError::MissingSink(_)));
    }

    #[test]
    fn dangling_input_is_rejected() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: main
    inputs: [{name: ghost}]
sink:
  name: main
"#,
        )
        .unwrap();

        let err = DepGraph::build(&conf, "main").unwrap_err();
        match err {
            BuildError::DanglingInput { node, input } => {
                assert_eq!(node, "main");
                assert_eq!(input, "ghost");
            }
            other => panic!("expected DanglingInput, got {other:?}"),
        }
    }

    #[test]
    fn consumer_counts_include_duplicate_edges() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: fanned
  - name: left
    inputs: [{name: fanned}]
  - name: right
    inputs: [{name: fanned}]
  - name: main
    inputs: [{name: left}, {name: right}, {name: fanned}]
sink:
  name: main
"#,
        )
        .unwrap();

        let graph = DepGraph::build(&conf, "main").unwrap();
        assert_eq!(graph.consumers("fanned"), 3);
        assert_eq!(graph.consumers("left"), 1);
        assert_eq!(graph.consumers("main"), 0);
    }

    #[test]
    fn per_node_validation_accumulates_errors() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: sinknode
    generator: passthrough
    inputs: [{name: broken}]
  - name: broken
    generator: no_such_generator
    has_logstream: true
    preprocessors: [{name: also_missing}]
    filters:
      - type: custom
        filter: missing_filter
      - type: simple
        filter: ""
    parsers: ["NoSuchTag", ""]
sink:
  name: sinknode
"#,
        )
        .unwrap();

        let err = ConfPipelineBuilder::new(conf, env_with_passthrough()).unwrap_err();
        let BuildError::Validation(errors) = err else {
            panic!("expected validation errors");
        };

        let all = errors.join("\n");
        assert!(all.contains("unknown processor generator 'no_such_generator'"));
        assert!(all.contains("unknown preprocessor 'also_missing'"));
        assert!(all.contains("unknown custom filter 'missing_filter'"));
        assert!(all.contains("filter must not be empty"));
        assert!(all.contains("unknown parser 'NoSuchTag'"));
        assert!(all.contains("parser tag cannot be empty"));
        // All of them carry the node context.
        assert!(errors.iter().all(|e| e.starts_with("processor '")));
    }

    #[test]
    fn bad_regex_filter_fails_validation() {
        let conf = RunnerConf::from_yaml(
            r#"
processors:
  - name: main
    generator: passthrough
    has_logstream: true
    filters:
      - type: regex
        filter: "unclosed ["
sink:
  name: main
"#,
        )
        .unwrap();

        let err = ConfPipelineBuilder::new(conf, env_with_passthrough()).unwrap_err();
        let BuildError::Validation(errors) = err else {
            panic!("expected validation errors");
        };
        assert!(errors[0].contains("invalid filter regex"));
    }

    #[test]
    fn source_conf_errors() {
        let env = env_with_passthrough();

        let no_source = RunnerConf::from_yaml(
            "processors:\n  - name: main\n    generator: passthrough\n    has_logstream: true\nsink:\n  name: main\n",
        )
        .unwrap();
        assert!(matches!(
            no_source.into_runner(env.clone()).unwrap_err(),
            BuildError::NoSourceConf
        ));

        let empty_sources = RunnerConf::from_yaml(
            r#"
source:
  type: files
  sources: []
processors:
  - name: main
    generator: passthrough
    has_logstream: true
sink:
  name: main
"#,
        )
        .unwrap();
        assert!(matches!(
            empty_sources.into_runner(env.clone()).unwrap_err(),
            BuildError::NoSources
        ));

        let blank_source = RunnerConf::from_yaml(
            r#"
source:
  type: files
  sources: [""]
processors:
  - name: main
    generator: passthrough
    has_logstream: true
sink:
  name: main
"#,
        )
        .unwrap();
        assert!(matches!(
            blank_source.into_runner(env.clone()).unwrap_err(),
            BuildError::EmptySource
        ));

        let hdfs = RunnerConf::from_yaml(
            r#"
source:
  type: files
  sources: ["some/*.log"]
  hdfsAddr: "namenode:8020"
processors:
  - name: main
    generator: passthrough
    has_logstream: true
sink:
  name: main
"#,
        )
        .unwrap();
        assert!(matches!(
            hdfs.into_runner(env).unwrap_err(),
            BuildError::NoHdfsDriver
        ));
    }

    #[test]
    fn unknown_collector_is_rejected() {
        let conf = RunnerConf::from_yaml(
            r#"
data_collector:
  name: ghost
source:
  type: files
  sources: ["some/*.log"]
processors:
  - name: main
    generator: passthrough
    has_logstream: true
sink:
  name: main
"#,
        )
        .unwrap();

        let err = conf.into_runner(env_with_passthrough()).unwrap_err();
        assert!(matches!(err, BuildError::UnknownCollector(_)));
    }
}
