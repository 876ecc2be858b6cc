use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of a settings snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Leaf value as entered
    Text(String),
    /// Nested group
    Group(Settings),
}

/// Recursive name → string mapping persisted next to the grid.
///
/// Paths address nested groups with dots: `"cv.scan_rate"`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leaf value at a dotted path.
    pub fn get(&self, path: &str) -> Option<&str> {
        let (head, rest) = split_path(path);
        match (self.0.get(head)?, rest) {
            (SettingValue::Text(value), None) => Some(value),
            (SettingValue::Group(group), Some(rest)) => group.get(rest),
            _ => None,
        }
    }

    /// Nested group at a dotted path.
    pub fn group(&self, path: &str) -> Option<&Settings> {
        let (head, rest) = split_path(path);
        match (self.0.get(head)?, rest) {
            (SettingValue::Group(group), None) => Some(group),
            (SettingValue::Group(group), Some(rest)) => group.group(rest),
            _ => None,
        }
    }

    /// Store a leaf, creating groups along the path and replacing any leaf
    /// that stood where a group is needed.
    pub fn set(&mut self, path: &str, value: impl Into<String>) {
        let (head, rest) = split_path(path);
        match rest {
            None => {
                self.0
                    .insert(head.to_string(), SettingValue::Text(value.into()));
            }
            Some(rest) => {
                let entry = self
                    .0
                    .entry(head.to_string())
                    .or_insert_with(|| SettingValue::Group(Settings::new()));
                if let SettingValue::Text(_) = entry {
                    *entry = SettingValue::Group(Settings::new());
                }
                if let SettingValue::Group(group) = entry {
                    group.set(rest, value);
                }
            }
        }
    }

    /// Replace the group at `name` wholesale.
    pub fn insert_group(&mut self, name: &str, group: Settings) {
        self.0.insert(name.to_string(), SettingValue::Group(group));
    }

    /// All leaves as `(dotted path, value)` in key order.
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        for (key, value) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                SettingValue::Text(text) => out.push((path, text.clone())),
                SettingValue::Group(group) => group.flatten_into(&path, out),
            }
        }
    }
}

fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}
