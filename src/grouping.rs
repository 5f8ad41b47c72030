//! Partition flat result/event collections into ordered, collapsible groups.
//!
//! Everything here is a pure function of the records plus the view controls:
//! groups borrow the records and never copy them, and running the same
//! grouping twice yields identical output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use time::{OffsetDateTime, UtcOffset};

use crate::timefmt::iso_date;
use crate::types::{ChangeEvent, ChangeType, ScanResult};

/// Attribute a collection is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GroupBy {
    #[default]
    Ip,
    Port,
    Date,
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(GroupBy::Ip),
            "port" => Ok(GroupBy::Port),
            "date" => Ok(GroupBy::Date),
            other => Err(format!("unknown group-by key: {other} (expected ip, port or date)")),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupBy::Ip => "ip",
            GroupBy::Port => "port",
            GroupBy::Date => "date",
        })
    }
}

/// `all | opened | closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeTypeFilter {
    #[default]
    All,
    Only(ChangeType),
}

impl ChangeTypeFilter {
    pub fn admits(self, ct: Option<ChangeType>) -> bool {
        match (self, ct) {
            (ChangeTypeFilter::All, _) => true,
            // Records that carry no change type are not subject to this filter.
            (ChangeTypeFilter::Only(_), None) => true,
            (ChangeTypeFilter::Only(want), Some(have)) => want == have,
        }
    }
}

impl FromStr for ChangeTypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ChangeTypeFilter::All),
            "opened" => Ok(ChangeTypeFilter::Only(ChangeType::Opened)),
            "closed" => Ok(ChangeTypeFilter::Only(ChangeType::Closed)),
            other => Err(format!("unknown change filter: {other} (expected all, opened or closed)")),
        }
    }
}

/// Filter applied before grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub change_type: ChangeTypeFilter,
    /// Case-sensitive substring of `ip_address`; empty matches everything.
    pub ip_contains: String,
}

impl RecordFilter {
    pub fn matches<R: Groupable>(&self, r: &R) -> bool {
        self.change_type.admits(r.change_type())
            && (self.ip_contains.is_empty() || r.ip_address().contains(self.ip_contains.as_str()))
    }
}

/// Records the engine knows how to partition.
pub trait Groupable {
    fn ip_address(&self) -> &str;
    fn port(&self) -> u16;
    /// Timestamp used for date grouping.
    fn timestamp(&self) -> OffsetDateTime;
    fn change_type(&self) -> Option<ChangeType> {
        None
    }
}

impl Groupable for ScanResult {
    fn ip_address(&self) -> &str {
        &self.ip_address
    }
    fn port(&self) -> u16 {
        self.port
    }
    fn timestamp(&self) -> OffsetDateTime {
        self.scanned_at
    }
}

impl Groupable for ChangeEvent {
    fn ip_address(&self) -> &str {
        &self.ip_address
    }
    fn port(&self) -> u16 {
        self.port
    }
    fn timestamp(&self) -> OffsetDateTime {
        self.detected_at
    }
    fn change_type(&self) -> Option<ChangeType> {
        Some(self.change_type)
    }
}

/// One named group of borrowed records, in input order.
#[derive(Debug, PartialEq, Eq)]
pub struct Group<'a, R> {
    pub key: String,
    pub records: Vec<&'a R>,
}

impl<R> Clone for Group<'_, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            records: self.records.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Text(String),
    Port(u16),
}

/// Filter `records`, then partition them by `by`.
///
/// Groups come out ordered lexicographically for ip and date keys and
/// numerically for ports. Within a group records keep their input order.
pub fn group_records<'a, R: Groupable>(
    records: &'a [R],
    by: GroupBy,
    filter: &RecordFilter,
    offset: UtcOffset,
) -> Vec<Group<'a, R>> {
    group_refs(records.iter().filter(|r| filter.matches(*r)), by, offset)
}

fn group_refs<'a, R: Groupable + 'a>(
    records: impl Iterator<Item = &'a R>,
    by: GroupBy,
    offset: UtcOffset,
) -> Vec<Group<'a, R>> {
    let mut buckets: BTreeMap<SortKey, Group<'a, R>> = BTreeMap::new();
    for r in records {
        let (sort, key) = match by {
            GroupBy::Ip => {
                let ip = r.ip_address().to_string();
                (SortKey::Text(ip.clone()), ip)
            }
            GroupBy::Port => (SortKey::Port(r.port()), r.port().to_string()),
            GroupBy::Date => {
                let d = iso_date(r.timestamp(), offset);
                (SortKey::Text(d.clone()), d)
            }
        };
        buckets
            .entry(sort)
            .or_insert_with(|| Group {
                key,
                records: Vec::new(),
            })
            .records
            .push(r);
    }
    buckets.into_values().collect()
}

/// Concatenate groups back into one flat list, group order first.
pub fn flatten<'a, R>(groups: &[Group<'a, R>]) -> Vec<&'a R> {
    groups
        .iter()
        .flat_map(|g| g.records.iter().copied())
        .collect()
}

/// Regroup an already grouped view; equal to the input for the same key.
pub fn regroup<'a, R: Groupable + 'a>(
    groups: &[Group<'a, R>],
    by: GroupBy,
    offset: UtcOffset,
) -> Vec<Group<'a, R>> {
    group_refs(flatten(groups).into_iter(), by, offset)
}

/// `1 port`, `3 ports`.
pub fn count_label(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Which groups are expanded, tracked by key so membership survives regrouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedSet {
    keys: BTreeSet<String>,
}

impl ExpandedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn expand(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn collapse(&mut self, key: &str) {
        self.keys.remove(key);
    }

    /// Flip one key; returns the new state.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.keys.remove(key) {
            false
        } else {
            self.keys.insert(key.to_string());
            true
        }
    }

    pub fn expand_all<R>(&mut self, groups: &[Group<'_, R>]) {
        self.keys = groups.iter().map(|g| g.key.clone()).collect();
    }

    pub fn collapse_all(&mut self) {
        self.keys.clear();
    }

    /// Drop keys whose group no longer exists; keep the rest.
    pub fn retain_present<R>(&mut self, groups: &[Group<'_, R>]) {
        let present: BTreeSet<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        self.keys.retain(|k| present.contains(k.as_str()));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortStatus;
    use time::macros::datetime;

    fn res(ip: &str, port: u16) -> ScanResult {
        ScanResult {
            id: None,
            target_id: None,
            ip_address: ip.into(),
            port,
            status: PortStatus::Open,
            response_time_ms: 1,
            scanned_at: datetime!(2026-10-19 12:00:00 UTC),
            first_discovered_at: None,
            target_description: None,
        }
    }

    #[test]
    fn ports_sort_numerically_not_lexically() {
        let rs = vec![res("a", 8080), res("a", 22), res("a", 443), res("a", 80)];
        let g = group_records(&rs, GroupBy::Port, &RecordFilter::default(), UtcOffset::UTC);
        let keys: Vec<_> = g.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["22", "80", "443", "8080"]);
    }

    #[test]
    fn ip_keys_sort_lexically() {
        let rs = vec![res("10.0.0.2", 1), res("10.0.0.10", 1), res("10.0.0.1", 1)];
        let g = group_records(&rs, GroupBy::Ip, &RecordFilter::default(), UtcOffset::UTC);
        let keys: Vec<_> = g.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["10.0.0.1", "10.0.0.10", "10.0.0.2"]);
    }

    #[test]
    fn within_group_order_is_input_order() {
        let rs = vec![res("h", 443), res("h", 22), res("h", 80)];
        let g = group_records(&rs, GroupBy::Ip, &RecordFilter::default(), UtcOffset::UTC);
        let ports: Vec<u16> = g[0].records.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![443, 22, 80]);
    }

    #[test]
    fn ip_filter_is_case_sensitive_substring() {
        let rs = vec![res("fe80::A", 1), res("fe80::a", 1), res("10.0.0.1", 1)];
        let f = RecordFilter {
            ip_contains: "::a".into(),
            ..Default::default()
        };
        let g = group_records(&rs, GroupBy::Ip, &f, UtcOffset::UTC);
        assert_eq!(g.len(), 1);
        assert_eq!(g[0].key, "fe80::a");
    }

    #[test]
    fn toggle_and_retain() {
        let rs = vec![res("10.0.0.1", 1), res("10.0.0.2", 1)];
        let mut ex = ExpandedSet::new();
        assert!(ex.toggle("10.0.0.1"));
        assert!(!ex.toggle("10.0.0.1"));
        let g = group_records(&rs, GroupBy::Ip, &RecordFilter::default(), UtcOffset::UTC);
        ex.expand_all(&g);
        assert_eq!(ex.len(), 2);
        ex.collapse_all();
        assert!(ex.is_empty());
    }

    #[test]
    fn count_label_pluralises() {
        assert_eq!(count_label(1, "port"), "1 port");
        assert_eq!(count_label(0, "port"), "0 ports");
        assert_eq!(count_label(3, "port"), "3 ports");
    }

    #[test]
    fn parse_controls() {
        assert_eq!("PORT".parse::<GroupBy>().unwrap(), GroupBy::Port);
        assert!("host".parse::<GroupBy>().is_err());
        assert_eq!(
            "opened".parse::<ChangeTypeFilter>().unwrap(),
            ChangeTypeFilter::Only(ChangeType::Opened)
        );
    }
}
