//! Configuration tree → immutable definition graph.
//!
//! Compilation is the only place structure is validated; the engine
//! assumes a well-formed graph. All failures here prevent machine
//! construction — none of them can surface at runtime.

use super::config::{names, BranchConfig, RootConfig, StateConfig, StateTypeConfig, TransitionConfig};
use super::{MachineDefinition, StateKind, StateNode, TransitionBranch, TransitionDef, UnhandledEventPolicy};
use crate::behavior::{BehaviorKind, Behaviors};
use crate::context::ContextSchema;
use crate::error::DefinitionError;
use indexmap::IndexMap;
use serde_json::Value;

/// Root id used when the config omits `id`.
pub const DEFAULT_MACHINE_ID: &str = "machine";

/// Default bound on consecutive eventless micro-steps.
pub const DEFAULT_EVENTLESS_LIMIT: usize = 32;

/// Compile-time knobs that don't belong in the config tree.
#[derive(Default)]
pub struct CompileOptions {
    /// Optional context schema.
    pub schema: Option<ContextSchema>,
    /// Policy for unhandled external events.
    pub unhandled_event_policy: UnhandledEventPolicy,
    /// Override of the eventless-step bound.
    pub eventless_limit: Option<usize>,
}

/// Compile a configuration tree against a behavior map, with default
/// options.
pub fn compile(config: &Value, behaviors: Behaviors) -> Result<MachineDefinition, DefinitionError> {
    compile_with(config, behaviors, CompileOptions::default())
}

/// Compile a configuration tree against a behavior map.
pub fn compile_with(
    config: &Value,
    behaviors: Behaviors,
    options: CompileOptions,
) -> Result<MachineDefinition, DefinitionError> {
    let root_config: RootConfig = serde_json::from_value(config.clone())
        .map_err(|e| DefinitionError::InvalidConfig(e.to_string()))?;
    let machine_id = root_config
        .id
        .clone()
        .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_owned());

    let mut builder = Builder {
        behaviors: &behaviors,
        states: Vec::new(),
        raw: Vec::new(),
        ids: IndexMap::new(),
    };
    let root = builder.add_state(machine_id.clone(), machine_id.clone(), None, &root_config.state)?;
    builder.resolve_initials()?;
    builder.build_transitions()?;

    if let Some(result) = &root_config.result {
        if !behaviors.contains(BehaviorKind::Result, result) {
            return Err(DefinitionError::BehaviorNotFound {
                kind: BehaviorKind::Result,
                name: result.clone(),
            });
        }
    }

    let Builder { states, ids, .. } = builder;
    Ok(MachineDefinition::new_internal(
        machine_id,
        root_config.version.unwrap_or(1),
        root,
        states,
        ids,
        behaviors,
        root_config.context.clone().unwrap_or(Value::Null),
        options.schema,
        root_config.result.clone(),
        options.unhandled_event_policy,
        options.eventless_limit.unwrap_or(DEFAULT_EVENTLESS_LIMIT),
    ))
}

struct Builder<'b> {
    behaviors: &'b Behaviors,
    states: Vec<StateNode>,
    raw: Vec<StateConfig>,
    ids: IndexMap<String, usize>,
}

impl Builder<'_> {
    fn add_state(
        &mut self,
        key: String,
        id: String,
        parent: Option<usize>,
        config: &StateConfig,
    ) -> Result<usize, DefinitionError> {
        let kind = match config.kind {
            Some(StateTypeConfig::Final) => StateKind::Final,
            Some(StateTypeConfig::Parallel) => StateKind::Parallel,
            Some(StateTypeConfig::Compound) => StateKind::Compound,
            Some(StateTypeConfig::Atomic) => StateKind::Atomic,
            None => {
                if config.states.is_empty() {
                    StateKind::Atomic
                } else {
                    StateKind::Compound
                }
            }
        };
        match kind {
            StateKind::Final if !config.states.is_empty() => {
                return Err(DefinitionError::InvalidFinalStateDefinition(id));
            }
            StateKind::Parallel if config.states.is_empty() => {
                return Err(DefinitionError::InvalidParallelStateDefinition {
                    id,
                    reason: "declares no child regions".to_owned(),
                });
            }
            StateKind::Parallel if config.initial.is_some() => {
                return Err(DefinitionError::InvalidParallelStateDefinition {
                    id,
                    reason: "must not declare an initial child".to_owned(),
                });
            }
            StateKind::Compound if config.states.is_empty() => {
                return Err(DefinitionError::InvalidConfig(format!(
                    "compound state {id} declares no children"
                )));
            }
            StateKind::Atomic if !config.states.is_empty() => {
                return Err(DefinitionError::InvalidConfig(format!(
                    "atomic state {id} must not declare children"
                )));
            }
            _ => {}
        }

        let index = self.states.len();
        if self.ids.insert(id.clone(), index).is_some() {
            return Err(DefinitionError::AmbiguousStateDefinitions(id));
        }
        for action in names(config.entry.clone())
            .iter()
            .chain(names(config.exit.clone()).iter())
        {
            if !self.behaviors.contains(BehaviorKind::Action, action) {
                return Err(DefinitionError::BehaviorNotFound {
                    kind: BehaviorKind::Action,
                    name: action.clone(),
                });
            }
        }
        self.states.push(StateNode {
            index,
            parent,
            id: id.clone(),
            key,
            kind,
            children: Vec::new(),
            initial: None,
            entry: names(config.entry.clone()),
            exit: names(config.exit.clone()),
            transitions: IndexMap::new(),
            meta: config.meta.clone(),
        });
        self.raw.push(config.clone());

        let mut children = Vec::with_capacity(config.states.len());
        for (child_key, child_config) in &config.states {
            let child_id = format!("{id}.{child_key}");
            children.push(self.add_state(child_key.clone(), child_id, Some(index), child_config)?);
        }
        self.states[index].children = children;
        Ok(index)
    }

    /// Resolve `initial` pointers: an explicit dotted path drills
    /// down through children; a compound without one takes its first
    /// declared child.
    fn resolve_initials(&mut self) -> Result<(), DefinitionError> {
        for index in 0..self.states.len() {
            if self.states[index].kind != StateKind::Compound {
                continue;
            }
            let initial = match &self.raw[index].initial {
                Some(path) => self.drill(index, path).ok_or_else(|| {
                    DefinitionError::InvalidConfig(format!(
                        "initial {path:?} of {} does not resolve to a descendant",
                        self.states[index].id
                    ))
                })?,
                None => self.states[index].children[0],
            };
            self.states[index].initial = Some(initial);
        }
        Ok(())
    }

    /// Follow a dotted path of child keys downward from `from`.
    fn drill(&self, from: usize, path: &str) -> Option<usize> {
        let mut cursor = from;
        for segment in path.split('.') {
            cursor = self.states[cursor]
                .children
                .iter()
                .copied()
                .find(|child| self.states[*child].key == segment)?;
        }
        Some(cursor)
    }

    /// A transition target resolves as, in order: a path relative to
    /// the source's parent (covers plain sibling keys), the full
    /// dotted id, or a path from the root.
    fn resolve_target(&self, source: usize, raw: &str) -> Result<usize, DefinitionError> {
        if let Some(parent) = self.states[source].parent {
            if let Some(found) = self.drill(parent, raw) {
                return Ok(found);
            }
        }
        if let Some(found) = self.ids.get(raw) {
            return Ok(*found);
        }
        if let Some(found) = self.drill(0, raw) {
            return Ok(found);
        }
        Err(DefinitionError::UnknownTargetState {
            state: self.states[source].id.clone(),
            target: raw.to_owned(),
        })
    }

    fn build_transitions(&mut self) -> Result<(), DefinitionError> {
        for index in 0..self.states.len() {
            let on = self.raw[index].on.clone();
            let mut transitions = IndexMap::with_capacity(on.len());
            for (event_type, config) in on {
                let def = match config {
                    None => TransitionDef::Forbidden,
                    Some(TransitionConfig::Target(target)) => {
                        TransitionDef::Branches(vec![TransitionBranch {
                            target: Some(self.resolve_target(index, &target)?),
                            guards: Vec::new(),
                            actions: Vec::new(),
                            calculators: Vec::new(),
                            description: None,
                        }])
                    }
                    Some(TransitionConfig::Branch(branch)) => TransitionDef::Branches(vec![
                        self.build_branch(index, &event_type, 0, branch)?,
                    ]),
                    Some(TransitionConfig::Branches(branches)) => {
                        let mut built = Vec::with_capacity(branches.len());
                        for (position, branch) in branches.into_iter().enumerate() {
                            built.push(self.build_branch(index, &event_type, position, branch)?);
                        }
                        TransitionDef::Branches(built)
                    }
                };
                transitions.insert(event_type, def);
            }
            self.states[index].transitions = transitions;
        }
        Ok(())
    }

    fn build_branch(
        &self,
        source: usize,
        event_type: &str,
        position: usize,
        config: BranchConfig,
    ) -> Result<TransitionBranch, DefinitionError> {
        let guards = names(config.guards);
        let actions = names(config.actions);
        let calculators = names(config.calculators);

        for guard in &guards {
            let Some(entry) = self.behaviors.guard_entry(guard) else {
                return Err(DefinitionError::BehaviorNotFound {
                    kind: BehaviorKind::Guard,
                    name: guard.clone(),
                });
            };
            // Validation guards abort the whole macro-step on failure,
            // which would shadow every later branch.
            if position > 0 && entry.is_validation() {
                return Err(DefinitionError::InvalidGuardedTransition {
                    guard: guard.clone(),
                    state: self.states[source].id.clone(),
                    event_type: event_type.to_owned(),
                });
            }
        }
        for action in &actions {
            if !self.behaviors.contains(BehaviorKind::Action, action) {
                return Err(DefinitionError::BehaviorNotFound {
                    kind: BehaviorKind::Action,
                    name: action.clone(),
                });
            }
        }
        for calculator in &calculators {
            if !self.behaviors.contains(BehaviorKind::Calculator, calculator) {
                return Err(DefinitionError::BehaviorNotFound {
                    kind: BehaviorKind::Calculator,
                    name: calculator.clone(),
                });
            }
        }

        let target = config
            .target
            .map(|raw| self.resolve_target(source, &raw))
            .transpose()?;
        Ok(TransitionBranch {
            target,
            guards,
            actions,
            calculators,
            description: config.description,
        })
    }
}
