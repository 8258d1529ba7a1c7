use std::collections::{BTreeMap, HashMap};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::query::Query;
use crate::tags::TagSet;
use crate::{BridgeError, Result};

/// Raw samples of one series, keyed by millisecond timestamp.
pub type Series = BTreeMap<i64, f64>;

/// The value of one result: a scalar or a series, decided by the payload's first byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResultValue {
    /// Nothing was sent.
    #[default]
    Empty,
    Number(f64),
    Series(Series),
}

impl ResultValue {
    /// Decodes a raw JSON value.
    ///
    /// Empty input yields `Empty`, input starting with `{` is decoded as a series,
    /// anything else must parse as a float.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(ResultValue::Empty);
        }
        if raw.starts_with('{') {
            let series: Series = serde_json::from_str(raw)
                .map_err(|e| BridgeError::Decode(format!("bad series value: {}", e)))?;
            return Ok(ResultValue::Series(series));
        }
        raw.parse::<f64>()
            .map(ResultValue::Number)
            .map_err(|e| BridgeError::Decode(format!("bad number value {:?}: {}", raw, e)))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ResultValue::Empty)
    }
}

/// The producer writes nil maps and lists as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl<'de> Deserialize<'de> for ResultValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        ResultValue::from_raw(raw.get()).map_err(de::Error::custom)
    }
}

/// One step of the expression evaluation, echoed for debugging only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Computation {
    #[serde(alias = "Text", default)]
    pub text: String,
    #[serde(alias = "Value", default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResult {
    #[serde(alias = "Value", default)]
    pub value: ResultValue,
    #[serde(alias = "Group", default, deserialize_with = "null_as_default")]
    pub group: TagSet,
    #[serde(alias = "Computations", default, deserialize_with = "null_as_default")]
    pub computations: Vec<Computation>,
}

/// Body returned by the expression endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Response {
    #[serde(rename = "type", alias = "Type", default)]
    pub kind: String,
    #[serde(alias = "Results", default, deserialize_with = "null_as_default")]
    pub results: Vec<QueryResult>,
    #[serde(alias = "Queries", default, deserialize_with = "null_as_default")]
    pub queries: HashMap<String, Query>,
}

impl Response {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let mut response: Response = serde_json::from_slice(body)?;
        response.finish();
        Ok(response)
    }

    fn finish(&mut self) {
        for query in self.queries.values_mut() {
            query.sync_group_by();
        }
    }
}
