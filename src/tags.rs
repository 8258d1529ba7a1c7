use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label pairs identifying one time series.
///
/// Backed by a `BTreeMap`, so iteration and every textual form are ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Returns an independent copy of the set.
    pub fn copy(&self) -> TagSet {
        self.clone()
    }

    /// Adds or overwrites every pair from `other` into `self` and returns `self`.
    ///
    /// Conflicting keys take `other`'s value. Copy first to keep the original.
    pub fn merge(&mut self, other: &TagSet) -> &mut TagSet {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    /// True if both sets hold exactly the same pairs.
    pub fn equal(&self, other: &TagSet) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter()
            .all(|(k, v)| other.0.get(k).is_some_and(|ov| ov == v))
    }

    /// True if every pair of `other` is present in `self`.
    pub fn subset(&self, other: &TagSet) -> bool {
        if other.len() > self.len() {
            return false;
        }
        other
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|tv| tv == v))
    }

    /// True if every key present in both sets carries the same value.
    pub fn compatible(&self, other: &TagSet) -> bool {
        other
            .iter()
            .all(|(k, v)| self.0.get(k).map_or(true, |tv| tv == v))
    }

    /// Pairs present in both sets with equal values.
    pub fn intersection(&self, other: &TagSet) -> TagSet {
        self.iter()
            .filter(|(k, v)| other.0.get(*k) == Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True if at least one shared key matches and no shared key conflicts.
    pub fn overlaps(&self, other: &TagSet) -> bool {
        let mut any_match = false;
        for (k, v) in self.iter() {
            match other.0.get(k) {
                None => continue,
                Some(ov) if ov != v => return false,
                Some(_) => any_match = true,
            }
        }
        any_match
    }

    /// `k=v` pairs joined by commas, ordered by key. `Display` adds the braces.
    pub fn tags(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Every non-empty combination of the set's `k=v` pairs.
    ///
    /// Produces `2^n - 1` entries for `n` keys, so wide sets get expensive fast;
    /// bound the key count before calling. Entries come out depth-first over the
    /// sorted keys: `a`, `a,b`, `a,b,c`, `a,c`, `b`, `b,c`, `c`.
    pub fn all_subsets(&self) -> Vec<String> {
        let pairs: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut out = Vec::new();
        collect_subsets(&pairs, "", 0, &mut out);
        out
    }
}

fn collect_subsets(pairs: &[String], base: &str, start: usize, out: &mut Vec<String>) {
    for i in start..pairs.len() {
        let part = if base.is_empty() {
            pairs[i].clone()
        } else {
            format!("{},{}", base, pairs[i])
        };
        out.push(part.clone());
        collect_subsets(pairs, &part, i + 1, out);
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.tags())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ts(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_merge_prefers_other_on_conflict() {
        let mut a = ts(&[("host", "a"), ("env", "prod")]);
        let b = ts(&[("host", "b"), ("zone", "x")]);
        a.merge(&b.copy());
        assert_eq!(a, ts(&[("env", "prod"), ("host", "b"), ("zone", "x")]));
    }

    #[test]
    fn test_copy_is_independent() {
        let a = ts(&[("host", "a")]);
        let mut b = a.copy();
        b.insert("host", "b");
        assert!(a.equal(&a.copy()));
        assert_eq!(a.get("host"), Some("a"));
    }

    #[test]
    fn test_equal_requires_same_cardinality() {
        let a = ts(&[("host", "a")]);
        let b = ts(&[("host", "a"), ("env", "p")]);
        assert!(!a.equal(&b));
        assert!(!b.equal(&a));
        assert!(TagSet::new().equal(&TagSet::new()));
    }

    #[test]
    fn test_subset_reflexive_and_transitive() {
        let a = ts(&[("host", "a"), ("env", "p"), ("zone", "x")]);
        let b = ts(&[("host", "a"), ("env", "p")]);
        let c = ts(&[("host", "a")]);
        assert!(a.subset(&a));
        assert!(a.subset(&b));
        assert!(b.subset(&c));
        assert!(a.subset(&c));
        assert!(!c.subset(&a));
        assert!(!b.subset(&ts(&[("host", "z")])));
    }

    #[test]
    fn test_compatible_ignores_disjoint_keys() {
        let a = ts(&[("host", "a"), ("env", "p")]);
        assert!(a.compatible(&ts(&[("host", "a"), ("zone", "x")])));
        assert!(a.compatible(&ts(&[("zone", "x")])));
        assert!(!a.compatible(&ts(&[("env", "q")])));
    }

    #[test]
    fn test_intersection() {
        let a = ts(&[("host", "a"), ("env", "p"), ("zone", "x")]);
        let b = ts(&[("host", "a"), ("env", "q")]);
        assert_eq!(a.intersection(&b), ts(&[("host", "a")]));
    }

    #[test]
    fn test_overlaps() {
        let host_a = ts(&[("host", "a")]);
        assert!(host_a.overlaps(&ts(&[("host", "a")])));
        assert!(!host_a.overlaps(&ts(&[("host", "b")])));
        assert!(!host_a.overlaps(&ts(&[("zone", "x")])));

        let a = ts(&[("host", "a"), ("env", "p")]);
        assert!(a.overlaps(&ts(&[("host", "a"), ("zone", "x")])));
        assert!(!a.overlaps(&ts(&[("host", "a"), ("env", "q")])));
    }

    #[test]
    fn test_string_forms_are_key_ordered() {
        let a = ts(&[("zone", "x"), ("host", "a"), ("env", "p")]);
        assert_eq!(a.tags(), "env=p,host=a,zone=x");
        assert_eq!(a.to_string(), "{env=p,host=a,zone=x}");
        assert_eq!(TagSet::new().to_string(), "{}");
    }

    #[test]
    fn test_all_subsets() {
        let two = ts(&[("b", "2"), ("a", "1")]);
        assert_eq!(two.all_subsets(), vec!["a=1", "a=1,b=2", "b=2"]);

        let three = ts(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert_eq!(
            three.all_subsets(),
            vec!["a=1", "a=1,b=2", "a=1,b=2,c=3", "a=1,c=3", "b=2", "b=2,c=3", "c=3"]
        );

        assert!(TagSet::new().all_subsets().is_empty());
    }

    #[test]
    fn test_json_is_a_plain_object() {
        let a: TagSet = serde_json::from_str(r#"{"host":"x","dc":"lga"}"#).unwrap();
        assert_eq!(a, ts(&[("dc", "lga"), ("host", "x")]));
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"dc":"lga","host":"x"}"#);
    }
}
