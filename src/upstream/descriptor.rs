//! Upstream descriptors and response shaping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::UpstreamConfig;
use crate::upstream::types::{UpstreamError, UpstreamResult};

/// Declarative shaping of an upstream JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeRule {
    /// Keep the body as-is.
    #[default]
    Identity,
    /// Keep the first `limit` elements of an array, wrapped under `into`.
    Take {
        into: String,
        /// JSON pointer to the array; the body itself when absent.
        #[serde(default)]
        from: Option<String>,
        limit: usize,
    },
    /// Pluck one value by JSON pointer, wrapped under `into`; missing values become null.
    Field { into: String, pointer: String },
}

impl ShapeRule {
    pub fn apply(&self, body: Value) -> UpstreamResult<Value> {
        match self {
            ShapeRule::Identity => Ok(body),
            ShapeRule::Take { into, from, limit } => {
                let target = match from {
                    Some(pointer) => body.pointer(pointer).cloned().unwrap_or(Value::Null),
                    None => body,
                };
                let Value::Array(items) = target else {
                    return Err(UpstreamError::InvalidBody(format!(
                        "expected an array for '{into}'"
                    )));
                };
                let taken = items.into_iter().take(*limit).collect();
                Ok(wrap(into, Value::Array(taken)))
            }
            ShapeRule::Field { into, pointer } => {
                let value = body.pointer(pointer).cloned().unwrap_or(Value::Null);
                Ok(wrap(into, value))
            }
        }
    }
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Function applied to every successful upstream body before caching.
pub type Shaper = Arc<dyn Fn(Value) -> UpstreamResult<Value> + Send + Sync>;

/// Immutable description of one upstream.
#[derive(Clone)]
pub struct UpstreamDescriptor {
    pub name: String,
    pub url: Url,
    pub shaper: Shaper,
    pub cache_ttl: Duration,
}

impl UpstreamDescriptor {
    pub fn new(name: impl Into<String>, url: Url, cache_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            url,
            shaper: Arc::new(|body: Value| -> UpstreamResult<Value> { Ok(body) }),
            cache_ttl,
        }
    }

    /// Replace the shaping function.
    pub fn with_shaper<F>(mut self, shaper: F) -> Self
    where
        F: Fn(Value) -> UpstreamResult<Value> + Send + Sync + 'static,
    {
        self.shaper = Arc::new(shaper);
        self
    }

    /// Build from configuration; `default_ttl` applies without an override.
    pub fn from_config(config: &UpstreamConfig, default_ttl: Duration) -> Result<Self, url::ParseError> {
        let url = Url::parse(&config.url)?;
        let ttl = config
            .cache_ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(default_ttl);
        let rule = config.shape.clone();
        Ok(Self::new(&config.name, url, ttl).with_shaper(move |body| rule.apply(body)))
    }

    pub fn shape(&self, body: Value) -> UpstreamResult<Value> {
        (self.shaper)(body)
    }
}

impl fmt::Debug for UpstreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamDescriptor")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}
