//! Serde shapes for the machine configuration tree.
//!
//! The public input is a `serde_json::Value`; these types give it
//! structure. Declaration order is semantic (first child, branch
//! priority), which is why maps deserialize into `IndexMap` and the
//! crate enables `serde_json/preserve_order`.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// A single name or a list of names. Config accepts both
/// `"entry": "log"` and `"entry": ["log", "notify"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum StringList {
    One(String),
    Many(Vec<String>),
}

impl StringList {
    pub(crate) fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

pub(crate) fn names(list: Option<StringList>) -> Vec<String> {
    list.map(StringList::into_vec).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StateTypeConfig {
    Atomic,
    Compound,
    Parallel,
    Final,
}

/// One branch of a transition, object form.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BranchConfig {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub guards: Option<StringList>,
    #[serde(default)]
    pub actions: Option<StringList>,
    #[serde(default)]
    pub calculators: Option<StringList>,
    #[serde(default)]
    pub description: Option<String>,
}

/// The value under an event key in `on`. A bare string is shorthand
/// for a single unconditional branch; a list is a guarded
/// multi-branch transition. (A `null` value — the forbidden override
/// — is handled by the surrounding `Option`.)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum TransitionConfig {
    Target(String),
    Branches(Vec<BranchConfig>),
    Branch(BranchConfig),
}

/// A state's configuration subtree.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct StateConfig {
    #[serde(default)]
    pub initial: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<StateTypeConfig>,
    #[serde(default)]
    pub states: IndexMap<String, StateConfig>,
    #[serde(default)]
    pub on: IndexMap<String, Option<TransitionConfig>>,
    #[serde(default)]
    pub entry: Option<StringList>,
    #[serde(default)]
    pub exit: Option<StringList>,
    #[serde(default)]
    pub meta: Option<Value>,
}

/// The top of the configuration tree.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RootConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(flatten)]
    pub state: StateConfig,
}
