//! OpenTSDB-style query grammar.
//!
//! Parses and prints the textual form used in rules, e.g.
//! `sum:5m-avg:rate{counter,,1}:os.cpu{host=web*}{dc=literal_or(lga)}`.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tags::TagSet;
use crate::{BridgeError, Result};

lazy_static! {
    static ref FILTER_VALUE_RE: Regex = Regex::new(r"([a-z_]+)\((.*)\)$").unwrap();
    static ref QUERY_RE: Regex = Regex::new(concat!(
        r"^(?P<aggregator>\w+):",
        r"(?:(?P<downsample>\w+-\w+(?:-\w+)?):)?",
        r"(?:(?P<rate>rate(?:\{(?P<rate_options>[\w\s,]*)\})?):)?",
        r"(?P<metric>[\w./-]+)",
        r"(?P<braces>(?:\{[^}]*\})*)$",
    ))
    .unwrap();
    static ref BRACE_RE: Regex = Regex::new(r"\{([^}]*)\}").unwrap();
}

/// A predicate over one tag key, optionally also a grouping dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(rename = "tagk")]
    pub tag_key: String,
    pub filter: String,
    #[serde(rename = "groupBy", default)]
    pub group_by: bool,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}({})", self.tag_key, self.filter_type, self.filter)
    }
}

/// Ordered filter list of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(pub Vec<Filter>);

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }
}

impl From<Vec<Filter>> for Filters {
    fn from(filters: Vec<Filter>) -> Self {
        Filters(filters)
    }
}

impl fmt::Display for Filters {
    /// Grouping filters first, always braced; non-grouping filters braced only when present.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (grouping, plain): (Vec<&Filter>, Vec<&Filter>) =
            self.iter().partition(|filter| filter.group_by);

        write!(f, "{{{}}}", join(&grouping))?;
        if !plain.is_empty() {
            write!(f, "{{{}}}", join(&plain))?;
        }
        Ok(())
    }
}

fn join(filters: &[&Filter]) -> String {
    filters
        .iter()
        .map(|filter| filter.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Counter handling for a rate query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateOptions {
    #[serde(skip_serializing_if = "is_false")]
    pub counter: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub counter_max: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub reset_value: i64,
    #[serde(skip_serializing_if = "is_false")]
    pub drop_resets: bool,
}

impl FromStr for RateOptions {
    type Err = BridgeError;

    /// Parses `counter|dropcounter[,max[,reset]]`. Empty numeric fields keep their default.
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() > 3 {
            return Err(BridgeError::Grammar(format!(
                "too many fields in rate options: {}",
                s
            )));
        }

        let mut options = RateOptions::default();
        match fields[0].trim() {
            "counter" => options.counter = true,
            "dropcounter" => {
                options.counter = true;
                options.drop_resets = true;
            }
            other => {
                return Err(BridgeError::Grammar(format!(
                    "invalid rate counter option: {}",
                    other
                )))
            }
        }
        if let Some(max) = fields.get(1) {
            options.counter_max = parse_rate_int(max, "counter max")?;
        }
        if let Some(reset) = fields.get(2) {
            options.reset_value = parse_rate_int(reset, "reset value")?;
        }
        Ok(options)
    }
}

fn parse_rate_int(field: &str, what: &str) -> Result<i64> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse()
        .map_err(|e| BridgeError::Grammar(format!("bad rate {} {:?}: {}", what, field, e)))
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// One sub-query of an OpenTSDB request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Query {
    pub aggregator: String,
    pub metric: String,
    #[serde(skip_serializing_if = "is_false")]
    pub rate: bool,
    pub rate_options: RateOptions,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub downsample: String,
    #[serde(skip_serializing_if = "TagSet::is_empty")]
    pub tags: TagSet,
    #[serde(skip_serializing_if = "Filters::is_empty")]
    pub filters: Filters,
    /// Keys of the grouping filters; never on the wire.
    #[serde(skip)]
    pub group_by_tags: TagSet,
}

impl Query {
    /// Rebuilds `group_by_tags` from the grouping filters, e.g. after decoding from JSON.
    pub fn sync_group_by(&mut self) {
        self.group_by_tags = self
            .filters
            .iter()
            .filter(|filter| filter.group_by)
            .map(|filter| (filter.tag_key.as_str(), ""))
            .collect();
    }
}

/// Parses filters in the form `tagk=filterFunc(...),...`.
///
/// Values without a filter function are promoted the way OpenTSDB does it:
/// `*` becomes `wildcard`, anything else containing `*` becomes `iwildcard`,
/// the rest `literal_or`. A clause without `=` fails the whole list and leaves
/// `query` untouched.
pub fn parse_filters(raw_filters: &str, grouping: bool, query: &mut Query) -> Result<Vec<Filter>> {
    let mut filters = Vec::new();
    for raw_filter in raw_filters.split(',') {
        let (tag_key, value) = raw_filter.split_once('=').ok_or_else(|| {
            BridgeError::Grammar(format!("bad filter format: {}", raw_filter))
        })?;

        let (filter_type, filter) = match FILTER_VALUE_RE.captures(value) {
            Some(caps) => (caps[1].to_string(), caps[2].to_string()),
            None => {
                let filter_type = if value == "*" {
                    "wildcard"
                } else if value.contains('*') {
                    "iwildcard"
                } else {
                    "literal_or"
                };
                (filter_type.to_string(), value.to_string())
            }
        };

        filters.push(Filter {
            filter_type,
            tag_key: tag_key.to_string(),
            filter,
            group_by: grouping,
        });
    }

    if grouping {
        for filter in &filters {
            query.group_by_tags.insert(filter.tag_key.clone(), "");
        }
    }
    Ok(filters)
}

/// Parses `k=v,...` as written by `TagSet`'s `Display` without the braces.
fn parse_tags(raw: &str) -> Result<TagSet> {
    raw.split(',')
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| BridgeError::Grammar(format!("bad tag format: {}", pair)))
        })
        .collect()
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.aggregator)?;
        if !self.downsample.is_empty() {
            write!(f, "{}:", self.downsample)?;
        }
        if self.rate {
            f.write_str("rate")?;
            let ro = &self.rate_options;
            if ro.counter {
                f.write_str("{")?;
                f.write_str(if ro.drop_resets { "dropcounter" } else { "counter" })?;
                if ro.counter_max != 0 {
                    write!(f, ",{}", ro.counter_max)?;
                }
                if ro.reset_value != 0 {
                    // Legacy wire form: a zero max still gets its separator, so
                    // this renders `counter,,<reset>`.
                    if ro.counter_max == 0 {
                        f.write_str(",")?;
                    }
                    write!(f, ",{}", ro.reset_value)?;
                }
                f.write_str("}")?;
            }
            f.write_str(":")?;
        }
        f.write_str(&self.metric)?;
        if !self.tags.is_empty() {
            write!(f, "{}", self.tags)?;
        }
        if !self.filters.is_empty() {
            write!(f, "{}", self.filters)?;
        }
        Ok(())
    }
}

impl FromStr for Query {
    type Err = BridgeError;

    /// Parses the OpenTSDB 2.2 textual form.
    ///
    /// One or two brace groups hold grouping then non-grouping filters. Three
    /// groups are read as tags, grouping filters and non-grouping filters, the
    /// layout `Display` writes when both tags and filters are set. A query with
    /// tags but no filters prints a single group, which parses back as grouping
    /// filters.
    fn from_str(s: &str) -> Result<Self> {
        let caps = QUERY_RE
            .captures(s)
            .ok_or_else(|| BridgeError::Grammar(format!("query does not match: {}", s)))?;

        let mut query = Query {
            aggregator: caps["aggregator"].to_string(),
            metric: caps["metric"].to_string(),
            ..Default::default()
        };
        if let Some(downsample) = caps.name("downsample") {
            query.downsample = downsample.as_str().to_string();
        }
        if caps.name("rate").is_some() {
            query.rate = true;
            if let Some(options) = caps.name("rate_options") {
                query.rate_options = options.as_str().parse()?;
            }
        }

        let groups: Vec<&str> = BRACE_RE
            .captures_iter(&caps["braces"])
            .filter_map(|group| group.get(1))
            .map(|group| group.as_str())
            .collect();
        let (tags, grouping, plain) = match groups.as_slice() {
            [] => ("", "", ""),
            [grouping] => ("", *grouping, ""),
            [grouping, plain] => ("", *grouping, *plain),
            [tags, grouping, plain] => (*tags, *grouping, *plain),
            _ => {
                return Err(BridgeError::Grammar(format!(
                    "too many brace groups in query: {}",
                    s
                )))
            }
        };

        if !tags.is_empty() {
            query.tags = parse_tags(tags)?;
        }
        let mut filters = Vec::new();
        if !grouping.is_empty() {
            filters.extend(parse_filters(grouping, true, &mut query)?);
        }
        if !plain.is_empty() {
            filters.extend(parse_filters(plain, false, &mut query)?);
        }
        query.filters = Filters(filters);
        Ok(query)
    }
}
