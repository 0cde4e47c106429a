//! Payload parsers for the well-known kernel log tags. The grammars here are
//! intentionally small; anything richer belongs in host-registered parsers.

use super::{ParseError, PayloadParser};
use crate::record::RecordValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;

pub const TAG_PRINTK: &str = "KernelPrintk";
pub const TAG_TRACE: &str = "Kernel-Trace";
pub const TAG_POWER_BATTERY: &str = "Power-Battery-PhoneLab";
pub const TAG_QOE_LIFECYCLE: &str = "Activity-LifeCycle-QoE";

/// A kernel printk payload: `<6>[   21.512807] msm_thermal: Allow Online CPU3 Temp: 66`
#[derive(Debug, Clone)]
pub struct PrintkRecord {
    /// The `<n>` syslog level prefix, when present.
    pub log_level: Option<i32>,
    /// Seconds since boot.
    pub timestamp: f64,
    pub message: String,
}

impl RecordValue for PrintkRecord {
    fn monotonic_timestamp(&self) -> f64 {
        self.timestamp
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "log_level": self.log_level,
            "timestamp": self.timestamp,
            "message": self.message,
        })
    }
}

pub struct PrintkParser {
    pattern: Regex,
}

impl Default for PrintkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PrintkParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(
                r"^(?:<(?P<level>\d+)>)?\s*\[\s*(?P<timestamp>\d+\.\d+)\]\s*(?P<message>.*)$",
            )
            .expect("static printk pattern"),
        }
    }
}

impl PayloadParser for PrintkParser {
    fn parse(&mut self, payload: &str) -> Result<Arc<dyn RecordValue>, ParseError> {
        let caps = self
            .pattern
            .captures(payload)
            .ok_or(ParseError::PayloadGrammar("printk"))?;

        let log_level = match caps.name("level") {
            Some(m) => Some(m.as_str().parse::<i32>().map_err(|_| ParseError::BadInt {
                field: "printk level",
                data: m.as_str().to_string(),
            })?),
            None => None,
        };
        let timestamp_str = &caps["timestamp"];
        let timestamp = timestamp_str.parse::<f64>().map_err(|_| ParseError::BadFloat {
            field: "printk timestamp",
            data: timestamp_str.to_string(),
        })?;

        Ok(Arc::new(PrintkRecord {
            log_level,
            timestamp,
            message: caps["message"].to_string(),
        }))
    }
}

/// A kernel trace payload:
/// `kworker/0:2-1691  [000] 23669.689809: sched_switch: prev=...`
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub task: String,
    pub pid: i32,
    pub cpu: i32,
    /// Seconds since boot.
    pub timestamp: f64,
    pub function: String,
    pub details: String,
}

impl RecordValue for TraceRecord {
    fn monotonic_timestamp(&self) -> f64 {
        self.timestamp
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "task": self.task,
            "pid": self.pid,
            "cpu": self.cpu,
            "timestamp": self.timestamp,
            "function": self.function,
            "details": self.details,
        })
    }
}

pub struct KernelTraceParser {
    pattern: Regex,
}

impl Default for KernelTraceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelTraceParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(
                r"^\s*(?P<task>.+)-(?P<pid>\d+)\s+\[(?P<cpu>\d+)\]\s+(?P<timestamp>\d+\.\d+): (?P<function>[^:]+):\s*(?P<details>.*)$",
            )
            .expect("static kernel-trace pattern"),
        }
    }
}

impl PayloadParser for KernelTraceParser {
    fn parse(&mut self, payload: &str) -> Result<Arc<dyn RecordValue>, ParseError> {
        let caps = self
            .pattern
            .captures(payload)
            .ok_or(ParseError::PayloadGrammar("kernel-trace"))?;

        let pid = caps["pid"].parse::<i32>().map_err(|_| ParseError::BadInt {
            field: "trace pid",
            data: caps["pid"].to_string(),
        })?;
        let cpu = caps["cpu"].parse::<i32>().map_err(|_| ParseError::BadInt {
            field: "trace cpu",
            data: caps["cpu"].to_string(),
        })?;
        let timestamp = caps["timestamp"]
            .parse::<f64>()
            .map_err(|_| ParseError::BadFloat {
                field: "trace timestamp",
                data: caps["timestamp"].to_string(),
            })?;

        Ok(Arc::new(TraceRecord {
            task: caps["task"].to_string(),
            pid,
            cpu,
            timestamp,
            function: caps["function"].trim().to_string(),
            details: caps["details"].to_string(),
        }))
    }
}

/// A payload that is itself a JSON document.
#[derive(Debug, Clone)]
pub struct JsonRecord(pub serde_json::Value);

impl RecordValue for JsonRecord {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        self.0.clone()
    }
}

/// Sub-parser for tags whose payload is a JSON object.
#[derive(Debug, Default)]
pub struct JsonPayloadParser;

impl PayloadParser for JsonPayloadParser {
    fn parse(&mut self, payload: &str) -> Result<Arc<dyn RecordValue>, ParseError> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|_| ParseError::PayloadGrammar("json"))?;
        Ok(Arc::new(JsonRecord(value)))
    }
}

/// Sub-parser for JSON payloads with a known shape: deserializes straight
/// into `T`.
pub struct TypedJsonParser<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for TypedJsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypedJsonParser<T> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> PayloadParser for TypedJsonParser<T>
where
    T: serde::de::DeserializeOwned + RecordValue,
{
    fn parse(&mut self, payload: &str) -> Result<Arc<dyn RecordValue>, ParseError> {
        let record: T =
            serde_json::from_str(payload).map_err(|_| ParseError::PayloadGrammar("typed json"))?;
        Ok(Arc::new(record))
    }
}

/// Fields carried by every JSON-bodied instrumentation payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentationMeta {
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, rename = "uptimeNanos")]
    pub uptime_nanos: u64,
    #[serde(default, rename = "LogFormat")]
    pub log_format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryProps {
    #[serde(default, rename = "chargerAcOnline")]
    pub charger_ac_online: bool,
    #[serde(default, rename = "chargerUsbOnline")]
    pub charger_usb_online: bool,
    #[serde(default, rename = "chargerWirelessOnline")]
    pub charger_wireless_online: bool,
    #[serde(default, rename = "Status")]
    pub status: i32,
    #[serde(default, rename = "Health")]
    pub health: i32,
    #[serde(default, rename = "Present")]
    pub present: bool,
    #[serde(default, rename = "Level")]
    pub level: i32,
    #[serde(default, rename = "Voltage")]
    pub voltage: i32,
    #[serde(default, rename = "Temperature")]
    pub temperature: i32,
    #[serde(default, rename = "Technology")]
    pub technology: String,
}

/// A battery state change payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerBatteryRecord {
    #[serde(flatten)]
    pub meta: InstrumentationMeta,
    #[serde(default, rename = "Action")]
    pub action: String,
    #[serde(default, rename = "Scale")]
    pub scale: i32,
    #[serde(default, rename = "BatteryProperties")]
    pub battery: BatteryProps,
}

impl RecordValue for PowerBatteryRecord {
    fn monotonic_timestamp(&self) -> f64 {
        self.meta.uptime_nanos as f64 / 1e9
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// An activity lifecycle transition payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityLifecycleRecord {
    #[serde(flatten)]
    pub meta: InstrumentationMeta,
    #[serde(default, rename = "Action")]
    pub action: String,
    #[serde(default, rename = "AppName")]
    pub app_name: String,
    #[serde(default, rename = "Pid")]
    pub pid: i32,
    #[serde(default, rename = "Uid")]
    pub uid: i32,
    #[serde(default, rename = "Tid")]
    pub tid: i32,
    #[serde(default, rename = "ActivityName")]
    pub activity_name: String,
    #[serde(default, rename = "ParentActivity")]
    pub parent_activity: String,
    #[serde(default, rename = "Time")]
    pub time_ms: u64,
    #[serde(default, rename = "UpTime")]
    pub uptime_ms: u64,
    #[serde(default, rename = "SessionID")]
    pub session_id: String,
}

impl RecordValue for ActivityLifecycleRecord {
    fn monotonic_timestamp(&self) -> f64 {
        self.meta.uptime_nanos as f64 / 1e9
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_as<T: RecordValue>(parser: &mut dyn PayloadParser, payload: &str) -> Arc<dyn RecordValue> {
        let value = parser.parse(payload).unwrap();
        assert!(value.as_any().is::<T>());
        value
    }

    #[test]
    fn printk_with_level_prefix() {
        let mut parser = PrintkParser::new();
        let value = parse_as::<PrintkRecord>(&mut parser, "<6>[   21.512807] msm_thermal: Allow Online CPU3 Temp: 66");
        let printk = value.as_any().downcast_ref::<PrintkRecord>().unwrap();
        assert_eq!(printk.log_level, Some(6));
        assert_eq!(printk.timestamp, 21.512807);
        assert_eq!(printk.message, "msm_thermal: Allow Online CPU3 Temp: 66");
        assert_eq!(value.monotonic_timestamp(), 21.512807);
    }

    #[test]
    fn printk_without_level_prefix() {
        let mut parser = PrintkParser::new();
        let value = parse_as::<PrintkRecord>(&mut parser, "[93341.687692] PM: suspend exit");
        let printk = value.as_any().downcast_ref::<PrintkRecord>().unwrap();
        assert_eq!(printk.log_level, None);
        assert_eq!(printk.message, "PM: suspend exit");
    }

    #[test]
    fn printk_rejects_garbage() {
        let mut parser = PrintkParser::new();
        assert!(parser.parse("no brackets here").is_err());
    }

    #[test]
    fn kernel_trace_payload() {
        let mut parser = KernelTraceParser::new();
        let value = parse_as::<TraceRecord>(
            &mut parser,
            "kworker/0:2-1691  [000] 23669.689809: sched_switch: prev_comm=swapper",
        );
        let trace = value.as_any().downcast_ref::<TraceRecord>().unwrap();
        assert_eq!(trace.task, "kworker/0:2");
        assert_eq!(trace.pid, 1691);
        assert_eq!(trace.cpu, 0);
        assert_eq!(trace.function, "sched_switch");
        assert_eq!(trace.details, "prev_comm=swapper");
    }

    #[test]
    fn json_payload_roundtrip() {
        let mut parser = JsonPayloadParser;
        let value = parse_as::<JsonRecord>(&mut parser, r#"{"temp": 30, "sensor": "tsens1"}"#);
        assert_eq!(value.to_json()["temp"], 30);
        assert!(parser.parse("not json").is_err());
    }

    #[test]
    fn power_battery_payload() {
        let payload = r#"{
            "Action": "android.intent.action.BATTERY_CHANGED",
            "Scale": 100,
            "BatteryProperties": {
                "chargerAcOnline": true,
                "Status": 2,
                "Health": 2,
                "Present": true,
                "Level": 87,
                "Voltage": 4286,
                "Temperature": 302,
                "Technology": "Li-ion"
            },
            "timestamp": 1488389074792,
            "uptimeNanos": 30472084570,
            "LogFormat": "1.1"
        }"#;

        let mut parser = TypedJsonParser::<PowerBatteryRecord>::new();
        let value = parse_as::<PowerBatteryRecord>(&mut parser, payload);
        let record = value.as_any().downcast_ref::<PowerBatteryRecord>().unwrap();
        assert_eq!(record.scale, 100);
        assert_eq!(record.battery.level, 87);
        assert!(record.battery.charger_ac_online);
        assert_eq!(record.meta.log_format, "1.1");
        assert_eq!(value.monotonic_timestamp(), 30472084570.0 / 1e9);
    }

    #[test]
    fn activity_lifecycle_payload() {
        let payload = r#"{
            "Action": "onStart",
            "AppName": "com.example.app",
            "Pid": 1836, "Uid": 10035, "Tid": 1836,
            "ParentActivity": "NULL",
            "ActivityName": "com.example.app/.Main",
            "Time": 1488389074792,
            "UpTime": 30472,
            "SessionID": "f8593374-df52-4a4f-a04c-6690d68d4026",
            "timestamp": 1488389074792,
            "uptimeNanos": 30472084570,
            "LogFormat": "1.1"
        }"#;

        let mut parser = TypedJsonParser::<ActivityLifecycleRecord>::new();
        let value = parse_as::<ActivityLifecycleRecord>(&mut parser, payload);
        let record = value
            .as_any()
            .downcast_ref::<ActivityLifecycleRecord>()
            .unwrap();
        assert_eq!(record.action, "onStart");
        assert_eq!(record.app_name, "com.example.app");
        assert_eq!(record.uptime_ms, 30472);
        assert_eq!(record.to_json()["Action"], "onStart");

        // Malformed payloads fail with a grammar error.
        assert!(parser.parse("[1, 2, 3]").is_err());
    }
}
