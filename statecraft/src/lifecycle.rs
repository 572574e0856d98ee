//! Internal lifecycle event naming.
//!
//! Every record the engine emits carries one of these dot-delimited
//! type strings, namespaced under the machine id. The namespace (and
//! the generic `machine.` prefix) is reserved: externally sent events
//! must not use it.

/// `<id>.start` — the root event of a freshly started machine.
pub fn machine_start(machine_id: &str) -> String {
    format!("{machine_id}.start")
}

/// `<id>.finish` — a direct final child of the root became active.
pub fn machine_finish(machine_id: &str) -> String {
    format!("{machine_id}.finish")
}

/// `<id>.state.<state>.enter` — a state became active.
pub fn state_enter(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.enter")
}

/// `<id>.state.<state>.entry.start` — entry actions are about to run.
pub fn entry_start(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.entry.start")
}

/// `<id>.state.<state>.entry.finish` — entry actions completed.
pub fn entry_finish(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.entry.finish")
}

/// `<id>.state.<state>.exit.start` — exit actions are about to run.
pub fn exit_start(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.exit.start")
}

/// `<id>.state.<state>.exit.finish` — exit actions completed.
pub fn exit_finish(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.exit.finish")
}

/// `<id>.state.<state>.exit` — the state is no longer active.
pub fn state_exit(machine_id: &str, state: &str) -> String {
    format!("{machine_id}.state.{state}.exit")
}

/// `<id>.transition.<state>.<type>.start` — a branch was selected.
pub fn transition_start(machine_id: &str, state: &str, event_type: &str) -> String {
    format!("{machine_id}.transition.{state}.{event_type}.start")
}

/// `<id>.transition.<state>.<type>.finish` — the transition completed.
pub fn transition_finish(machine_id: &str, state: &str, event_type: &str) -> String {
    format!("{machine_id}.transition.{state}.{event_type}.finish")
}

/// `<id>.transition.<state>.<type>.fail` — no branch passed its
/// guards, or a behavior failed mid-transition.
pub fn transition_fail(machine_id: &str, state: &str, event_type: &str) -> String {
    format!("{machine_id}.transition.{state}.{event_type}.fail")
}

/// `<id>.action.<name>.start`.
pub fn action_start(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.action.{name}.start")
}

/// `<id>.action.<name>.finish`.
pub fn action_finish(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.action.{name}.finish")
}

/// `<id>.guard.<name>.pass`.
pub fn guard_pass(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.guard.{name}.pass")
}

/// `<id>.guard.<name>.fail`.
pub fn guard_fail(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.guard.{name}.fail")
}

/// `<id>.calculator.<name>.pass`.
pub fn calculator_pass(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.calculator.{name}.pass")
}

/// `<id>.calculator.<name>.fail`.
pub fn calculator_fail(machine_id: &str, name: &str) -> String {
    format!("{machine_id}.calculator.{name}.fail")
}

/// `<id>.event.<type>.raised` — an action queued a follow-up event.
pub fn event_raised(machine_id: &str, event_type: &str) -> String {
    format!("{machine_id}.event.{event_type}.raised")
}
