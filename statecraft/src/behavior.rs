//! The behavior registry — user-supplied callables of five kinds.
//!
//! A machine definition references behaviors by name; the registry
//! resolves those names and injects the running context, the current
//! event, and the machine value into each call. Dispatch is by kind
//! tag — there is no behavior class hierarchy, just five entry types
//! each carrying a function handle plus declared requirements.
//!
//! The registry is read-only at runtime. Tests may shadow individual
//! entries through the fake overlay ([`Behaviors::fake_action`] and
//! friends), which must be torn down between tests.

use crate::context::{Context, ValueKind};
use crate::error::MachineError;
use crate::queue::EventQueue;
use keel::event::EventSource;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// The five behavior kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    /// Mutates context before guards are evaluated.
    Calculator,
    /// Decides whether a branch is taken.
    Guard,
    /// Runs on entry/exit/transition; may raise follow-up events.
    Action,
    /// Declares validation and versioning for a sendable event type.
    Event,
    /// Computes the machine's result value.
    Result,
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Calculator => "calculator",
            Self::Guard => "guard",
            Self::Action => "action",
            Self::Event => "event",
            Self::Result => "result",
        };
        write!(f, "{name}")
    }
}

/// The event a behavior is being invoked for.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Event type string.
    pub event_type: String,
    /// Payload, if the event carried one.
    pub payload: Option<Value>,
    /// Event schema version.
    pub version: u32,
    /// External or internal origin.
    pub source: EventSource,
    /// Metadata recorded alongside the event (e.g. the sending actor).
    pub meta: Option<Value>,
}

impl Trigger {
    /// An internal trigger with no payload (lifecycle follow-ups).
    pub fn internal(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: None,
            version: 1,
            source: EventSource::Internal,
            meta: None,
        }
    }
}

/// The read-only slice of machine state injected into behaviors
/// alongside the context: the current event and the active leaf ids.
#[derive(Debug, Clone, Copy)]
pub struct Exec<'a> {
    /// The event being processed.
    pub trigger: &'a Trigger,
    /// Active leaf state ids at invocation time.
    pub value: &'a [String],
}

/// A context key a behavior requires before it can run, optionally
/// constrained to a type tag.
#[derive(Debug, Clone)]
pub struct RequiredKey {
    /// The context key.
    pub key: String,
    /// Optional type constraint.
    pub kind: Option<ValueKind>,
}

impl RequiredKey {
    /// Require presence of a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: None,
        }
    }

    /// Require presence and a type.
    pub fn typed(key: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            key: key.into(),
            kind: Some(kind),
        }
    }
}

type CalculatorFn = Arc<dyn Fn(&mut Context, &Exec<'_>) -> Result<(), String> + Send + Sync>;
type GuardFn = Arc<dyn Fn(&Context, &Exec<'_>) -> Result<bool, String> + Send + Sync>;
type ActionFn =
    Arc<dyn Fn(&mut Context, &Exec<'_>, &mut EventQueue) -> Result<(), String> + Send + Sync>;
type ValidatorFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;
type ResultFn = Arc<dyn Fn(&Context, &Exec<'_>) -> Result<Value, String> + Send + Sync>;

/// A registered calculator.
#[derive(Clone)]
pub struct CalculatorEntry {
    name: String,
    call: CalculatorFn,
    required_context: Vec<RequiredKey>,
}

/// A registered guard. Validation guards carry an error message and
/// fail the macro-step instead of merely skipping their branch.
#[derive(Clone)]
pub struct GuardEntry {
    name: String,
    call: GuardFn,
    required_context: Vec<RequiredKey>,
    validation: bool,
    message: Option<String>,
}

impl GuardEntry {
    /// Whether this is a validation guard.
    pub fn is_validation(&self) -> bool {
        self.validation
    }
}

/// A registered action.
#[derive(Clone)]
pub struct ActionEntry {
    name: String,
    call: ActionFn,
    required_context: Vec<RequiredKey>,
}

/// A registered event type: version pin, optional payload validator,
/// required context.
#[derive(Clone)]
pub struct EventEntry {
    name: String,
    version: u32,
    validate: Option<ValidatorFn>,
    required_context: Vec<RequiredKey>,
}

impl EventEntry {
    /// The declared event version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// A registered result behavior.
#[derive(Clone)]
pub struct ResultEntry {
    name: String,
    call: ResultFn,
}

#[derive(Default)]
struct FakeOverlay {
    calculators: HashMap<String, CalculatorFn>,
    guards: HashMap<String, GuardFn>,
    actions: HashMap<String, ActionFn>,
}

/// The behavior map of a machine definition, sectioned by kind.
#[derive(Default)]
pub struct Behaviors {
    calculators: HashMap<String, CalculatorEntry>,
    guards: HashMap<String, GuardEntry>,
    actions: HashMap<String, ActionEntry>,
    events: HashMap<String, EventEntry>,
    results: HashMap<String, ResultEntry>,
    fakes: RwLock<FakeOverlay>,
}

impl fmt::Debug for Behaviors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behaviors")
            .field("calculators", &self.calculators.len())
            .field("guards", &self.guards.len())
            .field("actions", &self.actions.len())
            .field("events", &self.events.len())
            .field("results", &self.results.len())
            .finish()
    }
}

impl Behaviors {
    /// An empty behavior map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a calculator.
    pub fn calculator<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Context, &Exec<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.calculator_with(name, Vec::new(), f)
    }

    /// Register a calculator with required context keys.
    pub fn calculator_with<F>(
        mut self,
        name: impl Into<String>,
        required_context: Vec<RequiredKey>,
        f: F,
    ) -> Self
    where
        F: Fn(&mut Context, &Exec<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        self.calculators.insert(
            name.clone(),
            CalculatorEntry {
                name,
                call: Arc::new(f),
                required_context,
            },
        );
        self
    }

    /// Register a guard.
    pub fn guard<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &Exec<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.guard_with(name, Vec::new(), f)
    }

    /// Register a guard with required context keys.
    pub fn guard_with<F>(
        mut self,
        name: impl Into<String>,
        required_context: Vec<RequiredKey>,
        f: F,
    ) -> Self
    where
        F: Fn(&Context, &Exec<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        let name = name.into();
        self.guards.insert(
            name.clone(),
            GuardEntry {
                name,
                call: Arc::new(f),
                required_context,
                validation: false,
                message: None,
            },
        );
        self
    }

    /// Register a validation guard. On failure it raises a domain
    /// validation error carrying `message` instead of skipping the
    /// branch, and the compiler rejects it anywhere but the first
    /// branch of a guarded transition.
    pub fn validation_guard<F>(
        mut self,
        name: impl Into<String>,
        message: impl Into<String>,
        f: F,
    ) -> Self
    where
        F: Fn(&Context, &Exec<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        let name = name.into();
        self.guards.insert(
            name.clone(),
            GuardEntry {
                name,
                call: Arc::new(f),
                required_context: Vec::new(),
                validation: true,
                message: Some(message.into()),
            },
        );
        self
    }

    /// Register an action.
    pub fn action<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Context, &Exec<'_>, &mut EventQueue) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        self.action_with(name, Vec::new(), f)
    }

    /// Register an action with required context keys.
    pub fn action_with<F>(
        mut self,
        name: impl Into<String>,
        required_context: Vec<RequiredKey>,
        f: F,
    ) -> Self
    where
        F: Fn(&mut Context, &Exec<'_>, &mut EventQueue) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        self.actions.insert(
            name.clone(),
            ActionEntry {
                name,
                call: Arc::new(f),
                required_context,
            },
        );
        self
    }

    /// Declare an event type with a version pin.
    pub fn event(mut self, name: impl Into<String>, version: u32) -> Self {
        let name = name.into();
        self.events.insert(
            name.clone(),
            EventEntry {
                name,
                version,
                validate: None,
                required_context: Vec::new(),
            },
        );
        self
    }

    /// Declare an event type with a payload validator. The validator
    /// is the host's validation hook: a failure rejects the send
    /// before anything is recorded.
    pub fn event_validated<F>(mut self, name: impl Into<String>, version: u32, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        self.events.insert(
            name.clone(),
            EventEntry {
                name,
                version,
                validate: Some(Arc::new(f)),
                required_context: Vec::new(),
            },
        );
        self
    }

    /// Declare an event type that requires context keys before it can
    /// be processed.
    pub fn event_with(
        mut self,
        name: impl Into<String>,
        version: u32,
        required_context: Vec<RequiredKey>,
    ) -> Self {
        let name = name.into();
        self.events.insert(
            name.clone(),
            EventEntry {
                name,
                version,
                validate: None,
                required_context,
            },
        );
        self
    }

    /// Register a result behavior.
    pub fn result<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &Exec<'_>) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        self.results
            .insert(name.clone(), ResultEntry { name, call: Arc::new(f) });
        self
    }

    // --- Resolution ---

    /// Whether a name resolves within a kind's section.
    pub fn contains(&self, kind: BehaviorKind, name: &str) -> bool {
        match kind {
            BehaviorKind::Calculator => self.calculators.contains_key(name),
            BehaviorKind::Guard => self.guards.contains_key(name),
            BehaviorKind::Action => self.actions.contains_key(name),
            BehaviorKind::Event => self.events.contains_key(name),
            BehaviorKind::Result => self.results.contains_key(name),
        }
    }

    /// Resolve a guard entry (metadata only; used by the compiler for
    /// the validation-guard placement rule).
    pub fn guard_entry(&self, name: &str) -> Option<&GuardEntry> {
        self.guards.get(name)
    }

    /// Resolve a registered event declaration.
    pub fn event_entry(&self, name: &str) -> Option<&EventEntry> {
        self.events.get(name)
    }

    fn not_found(kind: BehaviorKind, name: &str) -> MachineError {
        MachineError::BehaviorNotFound {
            kind,
            name: name.to_owned(),
        }
    }

    // --- Invocation ---

    /// Run a calculator against the context.
    pub fn run_calculator(
        &self,
        name: &str,
        context: &mut Context,
        exec: &Exec<'_>,
    ) -> Result<(), MachineError> {
        let entry = self
            .calculators
            .get(name)
            .ok_or_else(|| Self::not_found(BehaviorKind::Calculator, name))?;
        context.require(&entry.name, &entry.required_context)?;
        let call = self
            .fakes
            .read()
            .expect("behavior fakes lock poisoned")
            .calculators
            .get(name)
            .cloned()
            .unwrap_or_else(|| entry.call.clone());
        call(context, exec).map_err(|message| MachineError::BehaviorFailed {
            kind: BehaviorKind::Calculator,
            name: name.to_owned(),
            message,
        })
    }

    /// Evaluate a guard. A plain guard returning false yields
    /// `Ok(false)`; a validation guard returning false yields the
    /// domain validation error it declares.
    pub fn run_guard(
        &self,
        name: &str,
        context: &Context,
        exec: &Exec<'_>,
    ) -> Result<bool, MachineError> {
        let entry = self
            .guards
            .get(name)
            .ok_or_else(|| Self::not_found(BehaviorKind::Guard, name))?;
        context.require(&entry.name, &entry.required_context)?;
        let call = self
            .fakes
            .read()
            .expect("behavior fakes lock poisoned")
            .guards
            .get(name)
            .cloned()
            .unwrap_or_else(|| entry.call.clone());
        let passed = call(context, exec).map_err(|message| MachineError::BehaviorFailed {
            kind: BehaviorKind::Guard,
            name: name.to_owned(),
            message,
        })?;
        if !passed && entry.validation {
            return Err(MachineError::MachineEventValidation {
                event_type: exec.trigger.event_type.clone(),
                message: entry
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("validation guard {name} failed")),
            });
        }
        Ok(passed)
    }

    /// Run an action. Raised events land on `queue`.
    pub fn run_action(
        &self,
        name: &str,
        context: &mut Context,
        exec: &Exec<'_>,
        queue: &mut EventQueue,
    ) -> Result<(), MachineError> {
        let entry = self
            .actions
            .get(name)
            .ok_or_else(|| Self::not_found(BehaviorKind::Action, name))?;
        context.require(&entry.name, &entry.required_context)?;
        let call = self
            .fakes
            .read()
            .expect("behavior fakes lock poisoned")
            .actions
            .get(name)
            .cloned()
            .unwrap_or_else(|| entry.call.clone());
        call(context, exec, queue).map_err(|message| MachineError::BehaviorFailed {
            kind: BehaviorKind::Action,
            name: name.to_owned(),
            message,
        })
    }

    /// Check an inbound event against its registered declaration:
    /// required context first, then the payload validator.
    pub fn check_event(
        &self,
        context: &Context,
        event_type: &str,
        payload: Option<&Value>,
    ) -> Result<(), MachineError> {
        let Some(entry) = self.events.get(event_type) else {
            return Ok(());
        };
        context.require(&entry.name, &entry.required_context)?;
        if let Some(validate) = &entry.validate {
            validate(payload.unwrap_or(&Value::Null)).map_err(|message| {
                MachineError::MachineEventValidation {
                    event_type: event_type.to_owned(),
                    message,
                }
            })?;
        }
        Ok(())
    }

    /// Run a result behavior.
    pub fn run_result(
        &self,
        name: &str,
        context: &Context,
        exec: &Exec<'_>,
    ) -> Result<Value, MachineError> {
        let entry = self
            .results
            .get(name)
            .ok_or_else(|| Self::not_found(BehaviorKind::Result, name))?;
        (entry.call)(context, exec).map_err(|message| MachineError::BehaviorFailed {
            kind: BehaviorKind::Result,
            name: name.to_owned(),
            message,
        })
    }

    // --- Test fakes ---

    /// Shadow an action for the current process. Teardown with
    /// [`Behaviors::reset_fakes`] between tests.
    pub fn fake_action<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Context, &Exec<'_>, &mut EventQueue) -> Result<(), String>
            + Send
            + Sync
            + 'static,
    {
        self.fakes
            .write()
            .expect("behavior fakes lock poisoned")
            .actions
            .insert(name.into(), Arc::new(f));
    }

    /// Shadow a guard.
    pub fn fake_guard<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Context, &Exec<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.fakes
            .write()
            .expect("behavior fakes lock poisoned")
            .guards
            .insert(name.into(), Arc::new(f));
    }

    /// Shadow a calculator.
    pub fn fake_calculator<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Context, &Exec<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.fakes
            .write()
            .expect("behavior fakes lock poisoned")
            .calculators
            .insert(name.into(), Arc::new(f));
    }

    /// Drop every fake installed on this registry.
    pub fn reset_fakes(&self) {
        let mut fakes = self.fakes.write().expect("behavior fakes lock poisoned");
        *fakes = FakeOverlay::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec_fixture() -> (Trigger, Vec<String>) {
        (Trigger::internal("@always"), vec!["root.a".to_owned()])
    }

    #[test]
    fn unknown_names_surface_behavior_not_found() {
        let behaviors = Behaviors::new();
        let (trigger, value) = exec_fixture();
        let exec = Exec {
            trigger: &trigger,
            value: &value,
        };
        let err = behaviors
            .run_guard("nope", &Context::new(), &exec)
            .unwrap_err();
        assert!(matches!(
            err,
            MachineError::BehaviorNotFound {
                kind: BehaviorKind::Guard,
                ..
            }
        ));
    }

    #[test]
    fn required_context_is_checked_before_invocation() {
        let behaviors = Behaviors::new().action_with(
            "bump",
            vec![RequiredKey::typed("count", ValueKind::Integer)],
            |context, _exec, _queue| {
                let next = context.get_i64("count").unwrap_or_default() + 1;
                context.set("count", json!(next)).map_err(|e| e.to_string())
            },
        );
        let (trigger, value) = exec_fixture();
        let exec = Exec {
            trigger: &trigger,
            value: &value,
        };
        let mut context = Context::new();
        let mut queue = EventQueue::new();

        let err = behaviors
            .run_action("bump", &mut context, &exec, &mut queue)
            .unwrap_err();
        assert!(matches!(err, MachineError::MissingMachineContext { .. }));

        context.set("count", json!(1)).unwrap();
        behaviors
            .run_action("bump", &mut context, &exec, &mut queue)
            .unwrap();
        assert_eq!(context.get_i64("count"), Some(2));
    }

    #[test]
    fn validation_guard_failure_is_a_domain_error() {
        let behaviors =
            Behaviors::new().validation_guard("funded", "insufficient funds", |_c, _e| Ok(false));
        let (trigger, value) = exec_fixture();
        let exec = Exec {
            trigger: &trigger,
            value: &value,
        };
        let err = behaviors
            .run_guard("funded", &Context::new(), &exec)
            .unwrap_err();
        match err {
            MachineError::MachineEventValidation { message, .. } => {
                assert_eq!(message, "insufficient funds");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fakes_shadow_and_reset() {
        let behaviors = Behaviors::new().guard("flaky", |_c, _e| Ok(false));
        let (trigger, value) = exec_fixture();
        let exec = Exec {
            trigger: &trigger,
            value: &value,
        };
        let context = Context::new();

        assert!(!behaviors.run_guard("flaky", &context, &exec).unwrap());
        behaviors.fake_guard("flaky", |_c, _e| Ok(true));
        assert!(behaviors.run_guard("flaky", &context, &exec).unwrap());
        behaviors.reset_fakes();
        assert!(!behaviors.run_guard("flaky", &context, &exec).unwrap());
    }
}
