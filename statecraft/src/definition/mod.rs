//! The compiled machine definition — an immutable tree of states.
//!
//! States live in an arena (`Vec<StateNode>`) and refer to each other
//! by index; transition branches hold resolved target indices. The
//! whole graph is built once by the [`compiler`] and shared read-only
//! between the engine, the actor, and introspection.

pub mod compiler;
mod config;

use crate::behavior::Behaviors;
use crate::context::{Context, ContextSchema};
use crate::error::MachineError;
use indexmap::IndexMap;
use serde_json::Value;

/// What a state is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// A leaf state.
    Atomic,
    /// A state with children, exactly one of which is active.
    Compound,
    /// A state whose children are concurrently active regions.
    Parallel,
    /// A terminal leaf. Entering one completes the enclosing region.
    Final,
}

/// How `Machine::send` treats an event no active state handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnhandledEventPolicy {
    /// Silently no-op; nothing is recorded.
    #[default]
    Ignore,
    /// Surface `NoTransitionDefinitionFound`.
    Error,
}

/// One branch of a transition: taken when all its guards pass.
#[derive(Debug, Clone)]
pub struct TransitionBranch {
    /// Target state index. None makes the branch an internal
    /// transition — actions run, no state is exited or entered.
    pub target: Option<usize>,
    /// Guard names, all of which must pass.
    pub guards: Vec<String>,
    /// Action names, run in declaration order.
    pub actions: Vec<String>,
    /// Calculator names, run before any guard of the transition.
    pub calculators: Vec<String>,
    /// Optional human description.
    pub description: Option<String>,
}

/// A transition definition keyed under an event type.
#[derive(Debug, Clone)]
pub enum TransitionDef {
    /// An explicit null target: cancels any ancestor's transition for
    /// this event from leaves below the declaring state.
    Forbidden,
    /// Ordered branches, first passing branch wins.
    Branches(Vec<TransitionBranch>),
}

/// One node of the definition tree.
#[derive(Debug, Clone)]
pub struct StateNode {
    /// Arena index of this node.
    pub index: usize,
    /// Parent index; None for the root.
    pub parent: Option<usize>,
    /// Dot-delimited id from the root, e.g. `traffic.red.walk`.
    pub id: String,
    /// Local name within the parent.
    pub key: String,
    /// Node kind.
    pub kind: StateKind,
    /// Children in declaration order.
    pub children: Vec<usize>,
    /// Resolved initial descendant for compound states. May point
    /// deeper than a direct child when `initial` was a dotted path.
    pub initial: Option<usize>,
    /// Entry action names.
    pub entry: Vec<String>,
    /// Exit action names.
    pub exit: Vec<String>,
    /// Transitions keyed by event type, in declaration order.
    pub transitions: IndexMap<String, TransitionDef>,
    /// Free-form metadata from the config.
    pub meta: Option<Value>,
}

impl StateNode {
    /// Whether this node can hold no active descendants of its own.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }
}

/// Result of walking a leaf's ancestor chain for an event key.
#[derive(Debug, Clone, Copy)]
pub enum TransitionLookup<'d> {
    /// Nothing along the chain handles the event.
    Unhandled,
    /// A descendant forbade the event before an ancestor could match.
    Forbidden,
    /// `owner` declares branches for the event.
    Found {
        /// The state declaring the transition.
        owner: usize,
        /// Its branches.
        branches: &'d [TransitionBranch],
    },
}

/// A compiled, immutable machine definition.
#[derive(Debug)]
pub struct MachineDefinition {
    /// Machine id — the root state's id and the event namespace.
    pub id: String,
    /// Definition version stamped on lifecycle events.
    pub version: u32,
    /// Arena index of the root state.
    pub root: usize,
    /// All states, in document order.
    pub states: Vec<StateNode>,
    /// The behavior map.
    pub behaviors: Behaviors,
    /// Initial context value from the config.
    pub initial_context: Value,
    /// Optional context schema.
    pub schema: Option<ContextSchema>,
    /// Name of the result behavior, if one is configured.
    pub result_behavior: Option<String>,
    /// Policy for unhandled external events.
    pub unhandled_event_policy: UnhandledEventPolicy,
    /// Bound on consecutive eventless micro-steps per macro-step.
    pub eventless_limit: usize,
    ids: IndexMap<String, usize>,
}

impl MachineDefinition {
    /// Node by arena index.
    pub fn node(&self, index: usize) -> &StateNode {
        &self.states[index]
    }

    /// Node index by dotted id.
    pub fn state_index(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    /// Ancestor chain from a node up to and including the root.
    pub fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = self.states[index].parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.states[parent].parent;
        }
        chain
    }

    /// Path from the root down to a node, inclusive.
    pub fn path_from_root(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];
        let mut cursor = self.states[index].parent;
        while let Some(parent) = cursor {
            path.push(parent);
            cursor = self.states[parent].parent;
        }
        path.reverse();
        path
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `node`.
    pub fn is_ancestor_or_self(&self, ancestor: usize, node: usize) -> bool {
        let mut cursor = Some(node);
        while let Some(index) = cursor {
            if index == ancestor {
                return true;
            }
            cursor = self.states[index].parent;
        }
        false
    }

    /// Least common ancestor of two nodes.
    pub fn lca(&self, a: usize, b: usize) -> usize {
        let path_a = self.path_from_root(a);
        let path_b = self.path_from_root(b);
        let mut lca = self.root;
        for (x, y) in path_a.iter().zip(path_b.iter()) {
            if x == y {
                lca = *x;
            } else {
                break;
            }
        }
        lca
    }

    /// The ordered list of states entered when activating `index`
    /// from outside: the node itself, then — for compounds — the
    /// chain down to (and through) its initial descendant, or — for
    /// parallels — every region in declaration order.
    pub fn enter_order(&self, index: usize) -> Vec<usize> {
        let mut order = vec![index];
        match self.states[index].kind {
            StateKind::Atomic | StateKind::Final => {}
            StateKind::Compound => {
                if let Some(initial) = self.states[index].initial {
                    // `initial` may be a deep descendant; enter the
                    // intermediate chain first.
                    let path = self.path_from_root(initial);
                    let below = path
                        .iter()
                        .skip_while(|i| **i != index)
                        .skip(1)
                        .copied()
                        .collect::<Vec<_>>();
                    for (pos, node) in below.iter().enumerate() {
                        if pos + 1 == below.len() {
                            order.extend(self.enter_order(*node));
                        } else {
                            order.push(*node);
                        }
                    }
                }
            }
            StateKind::Parallel => {
                for child in &self.states[index].children {
                    order.extend(self.enter_order(*child));
                }
            }
        }
        order
    }

    /// The leaves that become active when `index` is entered.
    pub fn initial_leaves(&self, index: usize) -> Vec<usize> {
        self.enter_order(index)
            .into_iter()
            .filter(|i| self.states[*i].is_leaf())
            .collect()
    }

    /// Walk a leaf's ancestor chain (leaf first) looking for a
    /// transition keyed by `event_type`. A forbidden entry closer to
    /// the leaf cancels any ancestor's match.
    pub fn lookup_transition(&self, leaf: usize, event_type: &str) -> TransitionLookup<'_> {
        let mut cursor = Some(leaf);
        while let Some(index) = cursor {
            match self.states[index].transitions.get(event_type) {
                Some(TransitionDef::Forbidden) => return TransitionLookup::Forbidden,
                Some(TransitionDef::Branches(branches)) => {
                    return TransitionLookup::Found {
                        owner: index,
                        branches,
                    };
                }
                None => {}
            }
            cursor = self.states[index].parent;
        }
        TransitionLookup::Unhandled
    }

    /// Event types handled from a given leaf, walking the ancestor
    /// chain and honoring forbidden overrides. Reserved marker keys
    /// are excluded — they cannot be sent.
    pub fn accepted_from(&self, leaf: usize) -> Vec<String> {
        let mut accepted = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(index) = cursor {
            for key in self.states[index].transitions.keys() {
                if key.starts_with('@') || accepted.iter().any(|k| k == key) {
                    continue;
                }
                if matches!(
                    self.lookup_transition(leaf, key),
                    TransitionLookup::Found { .. }
                ) {
                    accepted.push(key.clone());
                }
            }
            cursor = self.states[index].parent;
        }
        accepted
    }

    /// Whether every region of a parallel state currently rests in a
    /// final leaf.
    pub fn parallel_done(&self, parallel: usize, active_leaves: &[usize]) -> bool {
        self.states[parallel].children.iter().all(|region| {
            active_leaves.iter().any(|leaf| {
                self.states[*leaf].kind == StateKind::Final
                    && self.is_ancestor_or_self(*region, *leaf)
            })
        })
    }

    /// Whether the machine as a whole is done: a final child of the
    /// root is active.
    pub fn machine_done(&self, active_leaves: &[usize]) -> bool {
        active_leaves.iter().any(|leaf| {
            self.states[*leaf].kind == StateKind::Final
                && self.states[*leaf].parent == Some(self.root)
        })
    }

    /// The initial context as a [`Context`], schema attached.
    pub fn build_initial_context(&self) -> Result<Context, MachineError> {
        let mut context = Context::from_config(&self.initial_context)?;
        if let Some(schema) = &self.schema {
            context = context.with_schema(schema.clone());
        }
        Ok(context)
    }

    /// Map leaf indices to their dotted ids.
    pub fn leaf_ids(&self, leaves: &[usize]) -> Vec<String> {
        leaves.iter().map(|i| self.states[*i].id.clone()).collect()
    }

    pub(crate) fn new_internal(
        id: String,
        version: u32,
        root: usize,
        states: Vec<StateNode>,
        ids: IndexMap<String, usize>,
        behaviors: Behaviors,
        initial_context: Value,
        schema: Option<ContextSchema>,
        result_behavior: Option<String>,
        unhandled_event_policy: UnhandledEventPolicy,
        eventless_limit: usize,
    ) -> Self {
        Self {
            id,
            version,
            root,
            states,
            behaviors,
            initial_context,
            schema,
            result_behavior,
            unhandled_event_policy,
            eventless_limit,
            ids,
        }
    }
}
