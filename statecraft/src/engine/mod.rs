//! The transition engine — pure macro-step execution.
//!
//! Given an immutable definition, a prior state, and one event, the
//! engine computes the new state deterministically. It performs no
//! I/O and never awaits: everything observable is captured as
//! [`EventRecord`]s for the actor to persist.
//!
//! One macro-step is: the triggering event's micro-step, then
//! eventless (`@always` / `@done`) follow-ups until quiescence, then
//! the raised-event queue drained FIFO — each drained event running
//! its own micro-step plus follow-ups.

mod recorder;

pub use recorder::EventRecord;

use crate::behavior::{Exec, Trigger};
use crate::context::Context;
use crate::definition::{
    MachineDefinition, StateKind, TransitionBranch, TransitionDef, TransitionLookup,
    UnhandledEventPolicy,
};
use crate::error::MachineError;
use crate::lifecycle;
use crate::queue::EventQueue;
use keel::event::{ALWAYS_EVENT, DONE_EVENT, EventSource};
use recorder::Recorder;
use std::collections::HashSet;

/// Outcome of one macro-step.
///
/// On failure, `error` is set and `value`/`context` must be discarded
/// by the caller — `records` still holds everything captured up to
/// the failure, which is what gets persisted for non-transactional
/// events.
pub struct StepReport {
    /// Active leaf ids after the step.
    pub value: Vec<String>,
    /// Context after the step.
    pub context: Context,
    /// Every row the step produced, in order.
    pub records: Vec<EventRecord>,
    /// The failure that aborted the step, if any.
    pub error: Option<MachineError>,
    /// Whether a final child of the root is now active.
    pub done: bool,
}

/// The micro-step algorithm over one shared definition.
pub struct TransitionEngine<'d> {
    definition: &'d MachineDefinition,
}

impl<'d> TransitionEngine<'d> {
    /// An engine for one definition.
    pub fn new(definition: &'d MachineDefinition) -> Self {
        Self { definition }
    }

    /// Compute the initial state: enter the root's initial chain,
    /// running entry actions, then settle follow-ups and raised
    /// events. The first record is the machine's `<id>.start` event.
    pub fn start(&self) -> StepReport {
        let context = match self.definition.build_initial_context() {
            Ok(context) => context,
            Err(error) => {
                return StepReport {
                    value: Vec::new(),
                    context: Context::new(),
                    records: Vec::new(),
                    error: Some(error),
                    done: false,
                };
            }
        };
        let mut run = Run::new(self.definition, Vec::new(), context);
        let trigger = Trigger::internal(lifecycle::machine_start(&self.definition.id));
        let outcome = run.start(&trigger);
        run.into_report(outcome)
    }

    /// Execute one macro-step from the given active leaves + context.
    pub fn step(&self, value: &[String], context: Context, trigger: Trigger) -> StepReport {
        let mut leaves = Vec::with_capacity(value.len());
        for id in value {
            match self.definition.state_index(id) {
                Some(index) => leaves.push(index),
                None => {
                    return StepReport {
                        value: value.to_vec(),
                        context,
                        records: Vec::new(),
                        error: Some(MachineError::RestoringState(format!(
                            "active state {id:?} is not part of definition {}",
                            self.definition.id
                        ))),
                        done: false,
                    };
                }
            }
        }
        let mut run = Run::new(self.definition, leaves, context);
        let outcome = run.macro_step(&trigger);
        run.into_report(outcome)
    }
}

/// Mutable state of one macro-step in flight.
struct Run<'d> {
    def: &'d MachineDefinition,
    leaves: Vec<usize>,
    context: Context,
    recorder: Recorder<'d>,
    queue: EventQueue,
    eventless: usize,
    fired_done: HashSet<usize>,
    was_done: bool,
    done_emitted: bool,
}

impl<'d> Run<'d> {
    fn new(def: &'d MachineDefinition, leaves: Vec<usize>, mut context: Context) -> Self {
        context.clear_changes();
        let was_done = def.machine_done(&leaves);
        Self {
            def,
            leaves,
            context,
            recorder: Recorder::new(def),
            queue: EventQueue::new(),
            eventless: 0,
            fired_done: HashSet::new(),
            was_done,
            done_emitted: false,
        }
    }

    fn into_report(self, outcome: Result<(), MachineError>) -> StepReport {
        let done = self.def.machine_done(&self.leaves);
        StepReport {
            value: self.def.leaf_ids(&self.leaves),
            context: self.context,
            records: self.recorder.into_records(),
            error: outcome.err(),
            done,
        }
    }

    fn value_string(&self) -> String {
        self.def.leaf_ids(&self.leaves).join(",")
    }

    // --- Macro-step drivers ---

    fn start(&mut self, trigger: &Trigger) -> Result<(), MachineError> {
        let row = self.recorder.trigger(
            trigger.event_type.clone(),
            EventSource::Internal,
            None,
            None,
            self.def.version,
        );
        let entry_list = self.def.enter_order(self.def.root);
        let result = self.enter_states(&entry_list, trigger);
        // The start row snapshots its own entry micro-step only;
        // eventless follow-ups and raised events record their own
        // rows, exactly as they do for any other trigger.
        self.recorder.backfill(row, &self.leaves, &self.context);
        result?;
        self.settle()?;
        self.context.validate()
    }

    fn macro_step(&mut self, trigger: &Trigger) -> Result<(), MachineError> {
        self.process(trigger, false)?;
        self.settle()?;
        self.context.validate()
    }

    /// Eventless follow-ups, then the raised-event queue, until
    /// nothing is left to do.
    fn settle(&mut self) -> Result<(), MachineError> {
        self.followups()?;
        while let Some(raised) = self.queue.pop() {
            self.eventless = 0;
            let trigger = Trigger {
                event_type: raised.event_type,
                payload: raised.payload,
                version: 1,
                source: EventSource::Internal,
                meta: None,
            };
            self.process(&trigger, false)?;
            self.followups()?;
        }
        Ok(())
    }

    /// Evaluate `@always` transitions on the active configuration and
    /// synthesize `@done` for completed parallels, looping until no
    /// eventless transition fires.
    fn followups(&mut self) -> Result<(), MachineError> {
        loop {
            if self.process(&Trigger::internal(ALWAYS_EVENT), true)? {
                self.bump_eventless()?;
                continue;
            }
            if self.fire_done()? {
                self.bump_eventless()?;
                continue;
            }
            return Ok(());
        }
    }

    fn bump_eventless(&mut self) -> Result<(), MachineError> {
        self.eventless += 1;
        if self.eventless > self.def.eventless_limit {
            return Err(MachineError::EventlessCycle {
                state: self.value_string(),
                limit: self.def.eventless_limit,
            });
        }
        Ok(())
    }

    /// Fire the `@done` transition of the first completed parallel
    /// ancestor that declares one and hasn't fired this macro-step.
    fn fire_done(&mut self) -> Result<bool, MachineError> {
        let def = self.def;
        let mut candidates: Vec<usize> = Vec::new();
        for leaf in &self.leaves {
            for ancestor in def.ancestors(*leaf) {
                if def.node(ancestor).kind == StateKind::Parallel
                    && !candidates.contains(&ancestor)
                {
                    candidates.push(ancestor);
                }
            }
        }
        for parallel in candidates {
            if self.fired_done.contains(&parallel) {
                continue;
            }
            if !def.parallel_done(parallel, &self.leaves) {
                continue;
            }
            let Some(TransitionDef::Branches(branches)) =
                def.node(parallel).transitions.get(DONE_EVENT)
            else {
                continue;
            };
            let trigger = Trigger::internal(DONE_EVENT);
            if self.execute(&trigger, true, parallel, branches)? {
                // Marked only when taken, so an internal @done cannot
                // refire forever while its regions stay final.
                self.fired_done.insert(parallel);
                return Ok(true);
            }
        }
        Ok(false)
    }

    // --- One micro-step ---

    /// Resolve and execute one event. Returns whether a branch was
    /// taken. `quiet_noop` suppresses the trigger row and the
    /// `transition...fail` row when nothing fires — used for the
    /// synthetic eventless triggers, which are re-evaluated on every
    /// settle pass.
    fn process(&mut self, trigger: &Trigger, quiet_noop: bool) -> Result<bool, MachineError> {
        let def = self.def;
        let mut resolved = None;
        for leaf in &self.leaves {
            match def.lookup_transition(*leaf, &trigger.event_type) {
                TransitionLookup::Found { owner, branches } => {
                    resolved = Some((owner, branches));
                    break;
                }
                TransitionLookup::Forbidden | TransitionLookup::Unhandled => {}
            }
        }
        let Some((owner, branches)) = resolved else {
            if trigger.source == EventSource::External
                && def.unhandled_event_policy == UnhandledEventPolicy::Error
            {
                return Err(MachineError::NoTransitionDefinitionFound {
                    event_type: trigger.event_type.clone(),
                    state: self.value_string(),
                });
            }
            return Ok(false);
        };
        self.execute(trigger, quiet_noop, owner, branches)
    }

    /// Run a resolved transition: calculators, guard selection, exit
    /// chain, actions, entry chain.
    fn execute(
        &mut self,
        trigger: &Trigger,
        quiet_noop: bool,
        owner: usize,
        branches: &'d [TransitionBranch],
    ) -> Result<bool, MachineError> {
        let def = self.def;
        let machine_id = def.id.clone();
        let owner_id = def.node(owner).id.clone();
        let mark = self.recorder.len();
        // Quiet evaluations are tentative: when no branch is taken,
        // both their rows and their calculator mutations are unwound,
        // keeping recorded snapshots equal to the live context.
        let saved_context = quiet_noop.then(|| self.context.clone());
        let row = self.recorder.trigger(
            trigger.event_type.clone(),
            trigger.source,
            trigger.payload.clone(),
            trigger.meta.clone(),
            trigger.version,
        );

        // Calculators of every branch run before any guard, in
        // declaration order.
        let mut calculators: Vec<&str> = Vec::new();
        for branch in branches {
            for name in &branch.calculators {
                if !calculators.contains(&name.as_str()) {
                    calculators.push(name.as_str());
                }
            }
        }
        for name in calculators {
            let value_ids = def.leaf_ids(&self.leaves);
            let exec = Exec {
                trigger,
                value: &value_ids,
            };
            match def.behaviors.run_calculator(name, &mut self.context, &exec) {
                Ok(()) => self.recorder.lifecycle(
                    lifecycle::calculator_pass(&machine_id, name),
                    &self.leaves,
                    &self.context,
                ),
                Err(error) => {
                    self.recorder.lifecycle(
                        lifecycle::calculator_fail(&machine_id, name),
                        &self.leaves,
                        &self.context,
                    );
                    self.fail_transition(&owner_id, &trigger.event_type, row);
                    return Err(error);
                }
            }
        }

        // First branch whose guards all pass wins.
        let mut selected = None;
        'branches: for branch in branches {
            for name in &branch.guards {
                let value_ids = def.leaf_ids(&self.leaves);
                let exec = Exec {
                    trigger,
                    value: &value_ids,
                };
                match def.behaviors.run_guard(name, &self.context, &exec) {
                    Ok(true) => self.recorder.lifecycle(
                        lifecycle::guard_pass(&machine_id, name),
                        &self.leaves,
                        &self.context,
                    ),
                    Ok(false) => {
                        self.recorder.lifecycle(
                            lifecycle::guard_fail(&machine_id, name),
                            &self.leaves,
                            &self.context,
                        );
                        continue 'branches;
                    }
                    Err(error) => {
                        self.recorder.lifecycle(
                            lifecycle::guard_fail(&machine_id, name),
                            &self.leaves,
                            &self.context,
                        );
                        self.fail_transition(&owner_id, &trigger.event_type, row);
                        return Err(error);
                    }
                }
            }
            selected = Some(branch);
            break;
        }
        let Some(branch) = selected else {
            if let Some(saved) = saved_context {
                self.recorder.truncate(mark);
                self.context = saved;
            } else {
                self.recorder.lifecycle(
                    lifecycle::transition_fail(&machine_id, &owner_id, &trigger.event_type),
                    &self.leaves,
                    &self.context,
                );
                self.recorder.backfill(row, &self.leaves, &self.context);
            }
            return Ok(false);
        };

        let result = self.take_branch(trigger, owner, branch);
        if let Err(error) = result {
            self.fail_transition(&owner_id, &trigger.event_type, row);
            return Err(error);
        }
        self.recorder.backfill(row, &self.leaves, &self.context);
        Ok(true)
    }

    fn fail_transition(&mut self, owner_id: &str, event_type: &str, row: usize) {
        self.recorder.lifecycle(
            lifecycle::transition_fail(&self.def.id, owner_id, event_type),
            &self.leaves,
            &self.context,
        );
        self.recorder.backfill(row, &self.leaves, &self.context);
    }

    /// Steps 4–6 for the selected branch: exit chain, transition
    /// actions, entry chain. Internal branches (no target) run only
    /// their actions.
    fn take_branch(
        &mut self,
        trigger: &Trigger,
        owner: usize,
        branch: &'d TransitionBranch,
    ) -> Result<(), MachineError> {
        let def = self.def;
        let machine_id = def.id.clone();
        let owner_id = def.node(owner).id.clone();

        let target = branch.target;
        let lca = target.map(|target| {
            let mut lca = def.lca(owner, target);
            // External self-transition (or transition to an ancestor):
            // the target itself exits and re-enters, so the boundary
            // moves up one level.
            if lca == target {
                lca = def.node(target).parent.unwrap_or(lca);
            }
            lca
        });

        if let (Some(target), Some(lca)) = (target, lca) {
            self.recorder.lifecycle(
                lifecycle::transition_start(&machine_id, &owner_id, &trigger.event_type),
                &self.leaves,
                &self.context,
            );
            self.exit_states(lca, trigger)?;
            self.run_actions(&branch.actions, trigger)?;
            let entry_list = self.entry_list(lca, target);
            self.enter_states(&entry_list, trigger)?;
            self.recorder.lifecycle(
                lifecycle::transition_finish(&machine_id, &owner_id, &trigger.event_type),
                &self.leaves,
                &self.context,
            );
        } else {
            // Internal transition: no exit, no entry, history still
            // extends.
            self.run_actions(&branch.actions, trigger)?;
        }
        Ok(())
    }

    /// Exit every active state strictly below `lca`, deepest first.
    fn exit_states(&mut self, lca: usize, trigger: &Trigger) -> Result<(), MachineError> {
        let def = self.def;
        let machine_id = def.id.clone();
        let affected: Vec<usize> = self
            .leaves
            .iter()
            .copied()
            .filter(|leaf| *leaf != lca && def.is_ancestor_or_self(lca, *leaf))
            .collect();
        let mut exit_set: Vec<usize> = Vec::new();
        for leaf in &affected {
            let mut cursor = Some(*leaf);
            while let Some(index) = cursor {
                if index == lca {
                    break;
                }
                if !exit_set.contains(&index) {
                    exit_set.push(index);
                }
                cursor = def.node(index).parent;
            }
        }
        // Children before parents; later siblings first.
        exit_set.sort_by_key(|index| {
            (
                usize::MAX - self.def.path_from_root(*index).len(),
                usize::MAX - *index,
            )
        });

        for state in exit_set {
            let state_id = def.node(state).id.clone();
            self.recorder.lifecycle(
                lifecycle::exit_start(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
            let exit_actions = def.node(state).exit.clone();
            self.run_actions(&exit_actions, trigger)?;
            self.recorder.lifecycle(
                lifecycle::exit_finish(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
            self.leaves.retain(|leaf| *leaf != state);
            self.recorder.lifecycle(
                lifecycle::state_exit(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
        }
        Ok(())
    }

    /// The ordered list of states entered when moving from `lca` down
    /// to `target`, including initial descent below the target and
    /// sibling regions of any parallel crossed on the way.
    fn entry_list(&self, lca: usize, target: usize) -> Vec<usize> {
        let def = self.def;
        let path = def.path_from_root(target);
        let below: Vec<usize> = path
            .iter()
            .skip_while(|index| **index != lca)
            .skip(1)
            .copied()
            .collect();
        let Some(first) = below.first() else {
            return def.enter_order(target);
        };
        self.enter_towards(*first, target)
    }

    fn enter_towards(&self, node: usize, target: usize) -> Vec<usize> {
        let def = self.def;
        if node == target {
            return def.enter_order(node);
        }
        let mut order = vec![node];
        match def.node(node).kind {
            StateKind::Compound => {
                let next = def
                    .node(node)
                    .children
                    .iter()
                    .copied()
                    .find(|child| def.is_ancestor_or_self(*child, target));
                if let Some(next) = next {
                    order.extend(self.enter_towards(next, target));
                }
            }
            StateKind::Parallel => {
                for region in &def.node(node).children {
                    if def.is_ancestor_or_self(*region, target) {
                        order.extend(self.enter_towards(*region, target));
                    } else {
                        order.extend(def.enter_order(*region));
                    }
                }
            }
            StateKind::Atomic | StateKind::Final => {}
        }
        order
    }

    /// Enter states in order: the enter record, then entry actions
    /// bracketed by entry.start/entry.finish. Raised events do not
    /// preempt — they queue behind the whole entry chain.
    fn enter_states(&mut self, list: &[usize], trigger: &Trigger) -> Result<(), MachineError> {
        let def = self.def;
        let machine_id = def.id.clone();
        for state in list {
            let node = def.node(*state);
            let state_id = node.id.clone();
            if node.is_leaf() && !self.leaves.contains(state) {
                self.leaves.push(*state);
                self.leaves.sort_unstable();
            }
            self.recorder.lifecycle(
                lifecycle::state_enter(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
            self.recorder.lifecycle(
                lifecycle::entry_start(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
            let entry_actions = def.node(*state).entry.clone();
            self.run_actions(&entry_actions, trigger)?;
            self.recorder.lifecycle(
                lifecycle::entry_finish(&machine_id, &state_id),
                &self.leaves,
                &self.context,
            );
        }
        if !self.was_done && !self.done_emitted && def.machine_done(&self.leaves) {
            self.done_emitted = true;
            self.recorder.lifecycle(
                lifecycle::machine_finish(&machine_id),
                &self.leaves,
                &self.context,
            );
        }
        Ok(())
    }

    /// Run a list of actions, recording start/finish and any events
    /// they raise.
    fn run_actions(&mut self, names: &[String], trigger: &Trigger) -> Result<(), MachineError> {
        let def = self.def;
        let machine_id = def.id.clone();
        for name in names {
            self.recorder.lifecycle(
                lifecycle::action_start(&machine_id, name),
                &self.leaves,
                &self.context,
            );
            let before = self.queue.len();
            let value_ids = def.leaf_ids(&self.leaves);
            let exec = Exec {
                trigger,
                value: &value_ids,
            };
            def.behaviors
                .run_action(name, &mut self.context, &exec, &mut self.queue)?;
            let raised: Vec<String> = self
                .queue
                .iter()
                .skip(before)
                .map(|raised| raised.event_type.clone())
                .collect();
            for event_type in raised {
                self.recorder.lifecycle(
                    lifecycle::event_raised(&machine_id, &event_type),
                    &self.leaves,
                    &self.context,
                );
            }
            self.recorder.lifecycle(
                lifecycle::action_finish(&machine_id, name),
                &self.leaves,
                &self.context,
            );
        }
        Ok(())
    }
}
