//! CPU-bound task bodies run inside offload workers.
//!
//! Tasks arrive as serialized JSON and results leave the same way, so a
//! worker never shares memory with the caller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::upstream::types::epoch_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Merge per-source payloads with per-source summaries and statistics.
    Aggregate,
    /// Stamp every record as processed.
    Transform,
    /// Keep records matching every criterion exactly.
    Filter,
    /// Unknown kinds hand the data back unchanged.
    #[serde(other)]
    Echo,
}

/// A unit of work for the offload pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffloadTask {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Map<String, Value>>,
}

impl OffloadTask {
    pub fn new(kind: TaskKind, data: Value) -> Self {
        Self {
            kind,
            data,
            criteria: None,
        }
    }

    pub fn with_criteria(mut self, criteria: Map<String, Value>) -> Self {
        self.criteria = Some(criteria);
        self
    }
}

/// Run a task.
pub fn run_task(task: OffloadTask) -> Result<Value, String> {
    match task.kind {
        TaskKind::Aggregate => aggregate(task.data),
        TaskKind::Transform => transform(task.data),
        TaskKind::Filter => filter(task.data, task.criteria.as_ref()),
        TaskKind::Echo => Ok(task.data),
    }
}

/// Worker entry point: decode a task message, run it, encode the result.
pub fn process_message(message: &str) -> Result<String, String> {
    let task: OffloadTask =
        serde_json::from_str(message).map_err(|e| format!("malformed task: {e}"))?;
    let result = run_task(task)?;
    serde_json::to_string(&result).map_err(|e| e.to_string())
}

fn records(data: Value, kind: &str) -> Result<Vec<Value>, String> {
    match data {
        Value::Array(items) => Ok(items),
        other => Err(format!("{kind} expects an array, got {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

fn aggregate(data: Value) -> Result<Value, String> {
    let items = records(data, "aggregate")?;
    let total_sources = items.len();

    let mut summary = Map::new();
    let mut all_data = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(mut item) = item else {
            return Err("aggregate expects objects with source and data".to_string());
        };
        let source = match item.remove("source") {
            Some(Value::String(source)) => source,
            _ => return Err("aggregate item is missing a source".to_string()),
        };
        let payload = item.remove("data").unwrap_or(Value::Null);
        let received_at = item.remove("timestamp").unwrap_or(Value::Null);

        let data_keys: Vec<Value> = match &payload {
            Value::Object(fields) => fields.keys().cloned().map(Value::String).collect(),
            _ => Vec::new(),
        };
        summary.insert(
            source.clone(),
            json!({ "receivedAt": received_at, "dataKeys": data_keys }),
        );

        let mut merged = Map::new();
        merged.insert("source".to_string(), Value::String(source));
        match payload {
            Value::Object(fields) => merged.extend(fields),
            other => {
                merged.insert("data".to_string(), other);
            }
        }
        all_data.push(Value::Object(merged));
    }

    let stats = stats(&all_data);
    Ok(json!({
        "totalSources": total_sources,
        "timestamp": epoch_millis(),
        "summary": summary,
        "allData": all_data,
        "stats": stats,
    }))
}

fn stats(all_data: &[Value]) -> Value {
    let mut seen = BTreeSet::new();
    let mut sources = Vec::new();
    for item in all_data {
        if let Some(source) = item.get("source").and_then(Value::as_str) {
            if seen.insert(source.to_string()) {
                sources.push(source.to_string());
            }
        }
    }
    let any = |key: &str| all_data.iter().any(|item| truthy(item.get(key)));

    json!({
        "totalItems": all_data.len(),
        "sources": sources,
        "hasUsers": any("users"),
        "hasPosts": any("posts"),
        "hasFacts": any("catFact") || any("dogFacts"),
    })
}

fn transform(data: Value) -> Result<Value, String> {
    let processed_at = epoch_millis();
    let items = records(data, "transform")?
        .into_iter()
        .map(|item| {
            let mut fields = match item {
                Value::Object(fields) => fields,
                other => {
                    let mut fields = Map::new();
                    fields.insert("value".to_string(), other);
                    fields
                }
            };
            fields.insert("processed".to_string(), Value::Bool(true));
            fields.insert("processedAt".to_string(), json!(processed_at));
            Value::Object(fields)
        })
        .collect();
    Ok(Value::Array(items))
}

fn filter(data: Value, criteria: Option<&Map<String, Value>>) -> Result<Value, String> {
    let Some(criteria) = criteria else {
        return Ok(data);
    };
    let items = records(data, "filter")?
        .into_iter()
        .filter(|item| criteria.iter().all(|(key, expected)| item.get(key) == Some(expected)))
        .collect();
    Ok(Value::Array(items))
}
