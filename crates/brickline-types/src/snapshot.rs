//! Variable existence lattice and immutable scope snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How sure the analysis is that a variable is bound at a point.
///
/// Ordered so that `Maybe < Definitely`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Existence {
    /// Bound on some paths only.
    Maybe,
    /// Bound on every path reaching this point.
    Definitely,
}

impl Existence {
    /// Combine two facts about the same name. The weaker one wins.
    pub fn merge(self, other: Existence) -> Existence {
        self.min(other)
    }
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Existence::Maybe => "maybe",
            Existence::Definitely => "definitely",
        })
    }
}

/// Immutable mapping from variable name to [`Existence`].
///
/// A flat union: every visible name is stored directly, so consumers never
/// walk enclosing scopes. `@out.*` entries stand for unknown sub-paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    vars: BTreeMap<String, Existence>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy with `name` bound. An existing binding keeps the weaker value.
    pub fn with(mut self, name: impl Into<String>, existence: Existence) -> Snapshot {
        let name = name.into();
        let merged = match self.vars.get(&name) {
            Some(current) => current.merge(existence),
            None => existence,
        };
        self.vars.insert(name, merged);
        self
    }

    /// A copy with `name` bound to `existence`, replacing any inherited value.
    pub fn bind(mut self, name: impl Into<String>, existence: Existence) -> Snapshot {
        self.vars.insert(name.into(), existence);
        self
    }

    /// Union of both snapshots; names bound in both keep the weaker value.
    pub fn union(&self, other: &Snapshot) -> Snapshot {
        other
            .iter()
            .fold(self.clone(), |acc, (name, existence)| acc.with(name, existence))
    }

    /// Flatten a JSON-like context value under `root` into dotted paths.
    /// An object key contributes both `parent` and `parent.child`.
    pub fn from_context(root: &str, value: &Value, existence: Existence) -> Snapshot {
        let mut snapshot = Snapshot::new().with(root, existence);
        flatten_into(&mut snapshot, root, value, existence);
        snapshot
    }

    pub fn get(&self, name: &str) -> Option<Existence> {
        self.vars.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Existence)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Existence of a dotted variable path such as `@out.items.0`.
    ///
    /// An exact entry wins. Otherwise the deepest `prefix.*` wildcard makes
    /// the path `Maybe`. Anything else is absent.
    pub fn lookup(&self, path: &str) -> Option<Existence> {
        if let Some(existence) = self.get(path) {
            return Some(existence);
        }
        let parts: Vec<&str> = path.split('.').collect();
        (1..parts.len())
            .rev()
            .map(|i| format!("{}.*", parts[..i].join(".")))
            .find(|wildcard| self.contains(wildcard))
            .map(|_| Existence::Maybe)
    }
}

fn flatten_into(snapshot: &mut Snapshot, prefix: &str, value: &Value, existence: Existence) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let path = format!("{prefix}.{key}");
            *snapshot = std::mem::take(snapshot).with(path.clone(), existence);
            flatten_into(snapshot, &path, child, existence);
        }
    }
}

impl FromIterator<(String, Existence)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Existence)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Snapshot::new(), |acc, (name, existence)| acc.with(name, existence))
    }
}

/// Root variable of a dotted path: `@out.items.0` -> `@out`.
pub fn root_variable(path: &str) -> &str {
    path.split(['.', '[']).next().unwrap_or(path)
}
