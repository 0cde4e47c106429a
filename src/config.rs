use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Free-form `args` maps handed to processor generators, collectors and
/// sources.
pub type ArgMap = HashMap<String, serde_yaml::Value>;

pub fn arg_str<'a>(args: &'a ArgMap, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub fn arg_bool(args: &ArgMap, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}

pub fn arg_i64(args: &ArgMap, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Declarative description of one runner: where records come from, the
/// processor graph, and where sink output goes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerConf {
    /// How many source pipelines may run at once; 0 means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,

    #[serde(default)]
    pub data_collector: Option<CollectorConf>,

    #[serde(default)]
    pub source: Option<PipelineSourceConf>,

    #[serde(default)]
    pub processors: Vec<ProcessorConf>,

    /// The terminal processor; its output is drained into the collector.
    pub sink: ProcessorRef,
}

impl RunnerConf {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn find_processor(&self, name: &str) -> Option<&ProcessorConf> {
        self.processors.iter().find(|proc| proc.name == name)
    }
}

/// A named reference to another processor (or the sink), with arguments for
/// its generator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorRef {
    pub name: String,
    #[serde(default)]
    pub args: ArgMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorConf {
    pub name: String,
    #[serde(default)]
    pub args: ArgMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A flat list of log files, one source per file.
    #[default]
    Files,
    /// Per-device boot-session archives discovered via stitch metadata.
    Phonelab,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSourceConf {
    #[serde(rename = "type")]
    pub kind: SourceKind,

    /// Glob patterns: log files for `files`, `info.json` paths for
    /// `phonelab`.
    #[serde(default)]
    pub sources: Vec<String>,

    /// When set, sources are read through an HDFS driver supplied by the
    /// host.
    #[serde(default, rename = "hdfsAddr")]
    pub hdfs_addr: Option<String>,

    /// Source-specific arguments, e.g. `daterange`.
    #[serde(default)]
    pub args: ArgMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Simple,
    Regex,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConf {
    #[serde(rename = "type")]
    pub kind: FilterKind,
    pub filter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConf {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Generator to instantiate; defaults to `name`.
    #[serde(default)]
    pub generator: String,

    /// Upstream processors whose output feeds this one.
    #[serde(default)]
    pub inputs: Vec<ProcessorRef>,

    /// Whether the parsed-logline stream is wired in as an implicit input.
    #[serde(default)]
    pub has_logstream: bool,

    /// Raw-line filters applied before parsing; union semantics.
    #[serde(default)]
    pub filters: Vec<FilterConf>,

    /// Handler chain applied after parsing, in order.
    #[serde(default)]
    pub preprocessors: Vec<ProcessorRef>,

    /// Tags whose sub-parsers should run in the parser stage.
    #[serde(default)]
    pub parsers: Vec<String>,
}

impl ProcessorConf {
    pub fn generator_name(&self) -> &str {
        if self.generator.is_empty() {
            &self.name
        } else {
            &self.generator
        }
    }

    /// Parse a processor-only document: either a single mapping or a list.
    pub fn list_from_yaml(text: &str) -> Result<Vec<ProcessorConf>, ConfigError> {
        if is_yaml_list(text) {
            Ok(serde_yaml::from_str(text)?)
        } else {
            let conf: ProcessorConf = serde_yaml::from_str(text)?;
            Ok(vec![conf])
        }
    }

    pub fn list_from_file(path: &Path) -> Result<Vec<ProcessorConf>, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::list_from_yaml(&text)
    }
}

/// A document is a list when its first non-whitespace, non-comment character
/// is `-`.
fn is_yaml_list(text: &str) -> bool {
    let mut in_comment = false;
    for ch in text.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
        } else if ch == '#' {
            in_comment = true;
        } else if ch == '-' {
            return true;
        } else if !ch.is_whitespace() {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_runner_conf_parses() {
        let text = r#"
max_concurrency: 5
data_collector:
  name: resultsCollector
source:
  type: files
  sources:
    - "path/to/some/file"
    - "path/to/some/other/file"
processors:
  - name: proc1
    description: "Test processor"
    inputs: []
    parsers: ["tag1", "tag2"]
    filters:
      - type: "simple"
        filter: "foo&&bar"
      - type: "custom"
        filter: "baz"
      - type: "regex"
        filter: "^sometext.*othertext.*$"
    has_logstream: true
sink:
  name: proc1
"#;

        let conf = RunnerConf::from_yaml(text).unwrap();
        assert_eq!(conf.max_concurrency, 5);
        assert_eq!(conf.data_collector.as_ref().unwrap().name, "resultsCollector");

        let source = conf.source.as_ref().unwrap();
        assert_eq!(source.kind, SourceKind::Files);
        assert_eq!(source.sources.len(), 2);

        assert_eq!(conf.processors.len(), 1);
        let proc = &conf.processors[0];
        assert_eq!(proc.name, "proc1");
        assert!(proc.has_logstream);
        assert_eq!(proc.parsers, vec!["tag1", "tag2"]);
        assert_eq!(proc.filters.len(), 3);
        assert_eq!(proc.filters[0].kind, FilterKind::Simple);
        assert_eq!(proc.filters[1].kind, FilterKind::Custom);
        assert_eq!(proc.filters[2].kind, FilterKind::Regex);
        assert_eq!(proc.generator_name(), "proc1");

        assert_eq!(conf.sink.name, "proc1");
    }

    #[test]
    fn generator_defaults_to_name() {
        let conf = ProcessorConf {
            name: "main".to_string(),
            generator: "counter".to_string(),
            ..Default::default()
        };
        assert_eq!(conf.generator_name(), "counter");

        let conf = ProcessorConf {
            name: "main".to_string(),
            ..Default::default()
        };
        assert_eq!(conf.generator_name(), "main");
    }

    #[test]
    fn bad_yaml_is_an_error() {
        let err = RunnerConf::from_yaml("sink:\n  name: foo\nprocessors missing colon").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));

        assert!(RunnerConf::from_file(Path::new("fooooo.yml")).is_err());
    }

    #[test]
    fn sink_args_are_preserved() {
        let text = r#"
sink:
  name: main
  args:
    arg1: 100
    arg2: foo
"#;
        let conf = RunnerConf::from_yaml(text).unwrap();
        assert_eq!(arg_i64(&conf.sink.args, "arg1"), Some(100));
        assert_eq!(arg_str(&conf.sink.args, "arg2"), Some("foo"));
    }

    #[test]
    fn processor_document_scalar_or_list() {
        let as_list = r#"
- name: "test"
  description: "A test processor"
  inputs:
    - name: A
      args:
        foo: 1
        bar: "baz"
    - name: B
  has_logstream: true
  parsers: ["Some-Tag", "Some-Other-Tag"]
"#;
        let as_scalar = r#"
name: "test"
description: "A test processor"
inputs:
  - name: A
    args:
      foo: 1
      bar: "baz"
  - name: B
has_logstream: true
parsers: ["Some-Tag", "Some-Other-Tag"]
"#;

        let from_list = ProcessorConf::list_from_yaml(as_list).unwrap();
        let from_scalar = ProcessorConf::list_from_yaml(as_scalar).unwrap();
        assert_eq!(from_list.len(), 1);
        assert_eq!(from_list, from_scalar);

        let proc = &from_list[0];
        assert_eq!(proc.inputs.len(), 2);
        assert_eq!(proc.inputs[0].name, "A");
        assert_eq!(arg_i64(&proc.inputs[0].args, "foo"), Some(1));
        assert_eq!(arg_str(&proc.inputs[0].args, "bar"), Some("baz"));
        assert!(proc.inputs[1].args.is_empty());
    }

    #[test]
    fn yaml_list_detection() {
        let cases = [
            ("foo: bar", false),
            ("- foo: bar", true),
            ("# this is a list\n- foo: bar", true),
            ("\n# this also\n# is a list\n- foo: bar", true),
            ("\n# But not this\nfoo: bar", false),
            ("\n# Or this", false),
        ];
        for (text, expected) in cases {
            assert_eq!(is_yaml_list(text), expected, "case: {text:?}");
        }
    }
}
