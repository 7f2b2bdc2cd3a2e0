//! drift extraction from `terraform show -json` plan documents
use crate::error::{Error, Result};
use crate::value::{values_equal, Attrs};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Provider managed block that is never absorbed
const TIMEOUTS: &str = "timeouts";

#[derive(Deserialize, Debug)]
struct Plan {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Deserialize, Debug)]
struct ResourceChange {
    address: String,
    #[serde(default)]
    module_address: String,
    mode: String,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    index: Option<Index>,
    #[serde(default)]
    provider_name: String,
    change: Change,
}

#[derive(Deserialize, Debug)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    before: Value,
    #[serde(default)]
    after: Value,
}

/// Replication index of a resource instance
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum Index {
    /// `count` ordinal
    Count(u64),
    /// `for_each` key
    Key(String),
}

impl Index {
    /// Key of this instance in a lookup table
    pub fn key(&self) -> String {
        match self {
            Index::Count(ordinal) => ordinal.to_string(),
            Index::Key(key) => key.clone(),
        }
    }

    /// `count.index` or `each.key`
    pub fn reference(&self) -> hcl::Expression {
        let (root, attr) = match self {
            Index::Count(_) => ("count", "index"),
            Index::Key(_) => ("each", "key"),
        };

        hcl::Traversal::builder(hcl::Variable::unchecked(root))
            .attr(attr)
            .build()
            .into()
    }
}

/// Drift of a single resource instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriftChange {
    pub address: String,
    pub module_path: Vec<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub provider_name: String,
    pub mode: String,
    pub index: Option<Index>,
    /// Observed values of drifted fields
    pub changed_attrs: Attrs,
    /// Desired configuration
    pub before_attrs: Option<Attrs>,
}

impl DriftChange {
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// `type.name`
    pub fn resource_key(&self) -> String {
        format!("{}.{}", self.resource_type, self.resource_name)
    }
}

pub fn parse_plan_file(path: &Path) -> Result<Vec<DriftChange>> {
    let content = std::fs::read_to_string(path).map_err(Error::read(path))?;
    parse_plan(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Drifted resources of a plan
///
/// Only in-place updates of managed resources are considered. In `resource_changes` the `before`
/// value is the current remote state and `after` the desired configuration, so the observed
/// (`before`) values of every differing field are what gets absorbed.
pub fn parse_plan(content: &str) -> serde_json::Result<Vec<DriftChange>> {
    let plan: Plan = serde_json::from_str(content)?;

    let changes: Vec<_> = plan
        .resource_changes
        .into_iter()
        .filter(|rc| rc.change.actions == ["update"] && rc.mode == "managed")
        .filter_map(|rc| {
            let remote = as_attrs(rc.change.before);
            let desired = as_attrs(rc.change.after);

            let changed_attrs = drifted_attributes(desired.as_ref(), remote.as_ref());
            if changed_attrs.is_empty() {
                return None;
            }

            tracing::debug!(
                address = rc.address.as_str(),
                fields = changed_attrs.len(),
                "drift found"
            );

            Some(DriftChange {
                module_path: module_path(&rc.module_address),
                address: rc.address,
                resource_type: rc.resource_type,
                resource_name: rc.name,
                provider_name: rc.provider_name,
                mode: rc.mode,
                index: rc.index,
                changed_attrs,
                before_attrs: desired,
            })
        })
        .collect();

    Ok(changes)
}

fn as_attrs(value: Value) -> Option<Attrs> {
    match value {
        Value::Object(attrs) => Some(attrs),
        _ => None,
    }
}

/// Module call names of a module address: `module.a.module.b["x.y"]` → `[a, b]`
///
/// Instance keys of `count` / `for_each` module calls are dropped, all instances share the
/// sources of their module call.
pub fn module_path(module_address: &str) -> Vec<String> {
    let mut path = vec![];
    let mut segments = address_segments(module_address).into_iter();
    while let Some(segment) = segments.next() {
        if segment == "module" {
            if let Some(name) = segments.next() {
                let call = name.split_once('[').map_or(name, |(call, _)| call);
                path.push(call.to_string());
            }
        }
    }
    path
}

/// Splits an address on the dots outside of index brackets
fn address_segments(address: &str) -> Vec<&str> {
    let mut segments = vec![];
    let mut start = 0;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in address.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                segments.push(&address[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&address[start..]);

    segments
}

/// Remote values of every field that differs from the desired configuration
///
/// Fields that are null remotely are skipped, so removing an attribute remotely is not absorbed.
fn drifted_attributes(desired: Option<&Attrs>, remote: Option<&Attrs>) -> Attrs {
    let Some(remote) = remote else {
        return Attrs::new();
    };

    remote
        .iter()
        .filter(|(key, value)| !value.is_null() && *key != TIMEOUTS)
        .filter(|(key, value)| {
            desired
                .and_then(|desired| desired.get(*key))
                .map_or(true, |desired| !values_equal(desired, value))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
