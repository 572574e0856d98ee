use serde_json::json;
use statecraft::behavior::BehaviorKind;
use statecraft::prelude::*;
use statecraft::{compile, DefinitionError};

fn noop_behaviors() -> Behaviors {
    Behaviors::new()
        .action("log", |_context, _exec, _queue| Ok(()))
        .guard("ready", |_context, _exec| Ok(true))
        .calculator("tally", |_context, _exec| Ok(()))
}

// --- Structure ---

#[test]
fn ids_are_dot_delimited_paths() {
    let config = json!({
        "id": "order",
        "initial": "open",
        "states": {
            "open": {
                "initial": "draft",
                "states": {
                    "draft": {},
                    "review": {},
                },
            },
            "closed": { "type": "final" },
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    assert_eq!(definition.id, "order");
    assert!(definition.state_index("order.open.draft").is_some());
    assert!(definition.state_index("order.closed").is_some());
    assert!(definition.state_index("draft").is_none());
}

#[test]
fn default_machine_id_applies() {
    let definition = compile(&json!({}), Behaviors::new()).unwrap();
    assert_eq!(definition.id, "machine");
}

#[test]
fn initial_defaults_to_first_declared_child() {
    let config = json!({
        "id": "m",
        "states": {
            "b": {},
            "a": {},
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    let root = definition.node(definition.root);
    let initial = root.initial.expect("compound root resolves an initial");
    assert_eq!(definition.node(initial).id, "m.b");
}

#[test]
fn dotted_initial_drills_into_descendants() {
    let config = json!({
        "id": "m",
        "initial": "outer.inner",
        "states": {
            "outer": {
                "states": { "lead": {}, "inner": {} },
            },
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    let root = definition.node(definition.root);
    assert_eq!(
        definition.node(root.initial.unwrap()).id,
        "m.outer.inner"
    );
    // Entering the root walks through the intermediate state.
    let leaves = definition.initial_leaves(definition.root);
    assert_eq!(definition.leaf_ids(&leaves), vec!["m.outer.inner"]);
}

// --- Validation failures ---

#[test]
fn final_state_with_children_is_rejected() {
    let config = json!({
        "id": "m",
        "states": {
            "done": {
                "type": "final",
                "states": { "oops": {} },
            },
        },
    });
    let err = compile(&config, Behaviors::new()).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::InvalidFinalStateDefinition(id) if id == "m.done"
    ));
}

#[test]
fn parallel_without_regions_is_rejected() {
    let config = json!({
        "id": "m",
        "states": {
            "both": { "type": "parallel" },
        },
    });
    assert!(matches!(
        compile(&config, Behaviors::new()).unwrap_err(),
        DefinitionError::InvalidParallelStateDefinition { .. }
    ));
}

#[test]
fn parallel_with_initial_is_rejected() {
    let config = json!({
        "id": "m",
        "states": {
            "both": {
                "type": "parallel",
                "initial": "left",
                "states": { "left": {}, "right": {} },
            },
        },
    });
    assert!(matches!(
        compile(&config, Behaviors::new()).unwrap_err(),
        DefinitionError::InvalidParallelStateDefinition { .. }
    ));
}

#[test]
fn colliding_paths_are_ambiguous() {
    let config = json!({
        "id": "m",
        "states": {
            "a.b": {},
            "a": { "states": { "b": {} } },
        },
    });
    assert!(matches!(
        compile(&config, Behaviors::new()).unwrap_err(),
        DefinitionError::AmbiguousStateDefinitions(_)
    ));
}

#[test]
fn unresolvable_behavior_names_are_rejected() {
    let config = json!({
        "id": "m",
        "states": {
            "a": { "entry": "missing" },
        },
    });
    let err = compile(&config, Behaviors::new()).unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::BehaviorNotFound { kind: BehaviorKind::Action, name } if name == "missing"
    ));
}

#[test]
fn unknown_transition_target_is_rejected() {
    let config = json!({
        "id": "m",
        "states": {
            "a": { "on": { "GO": "nowhere" } },
            "b": {},
        },
    });
    assert!(matches!(
        compile(&config, Behaviors::new()).unwrap_err(),
        DefinitionError::UnknownTargetState { target, .. } if target == "nowhere"
    ));
}

#[test]
fn validation_guard_outside_first_branch_is_rejected() {
    let behaviors = Behaviors::new()
        .guard("even", |_c, _e| Ok(true))
        .validation_guard("funded", "insufficient funds", |_c, _e| Ok(true));
    let config = json!({
        "id": "m",
        "states": {
            "a": {
                "on": {
                    "PAY": [
                        { "guards": "even", "target": "b" },
                        { "guards": "funded", "target": "b" },
                    ],
                },
            },
            "b": {},
        },
    });
    assert!(matches!(
        compile(&config, behaviors).unwrap_err(),
        DefinitionError::InvalidGuardedTransition { guard, .. } if guard == "funded"
    ));
}

#[test]
fn validation_guard_in_first_branch_is_allowed() {
    let behaviors = Behaviors::new()
        .validation_guard("funded", "insufficient funds", |_c, _e| Ok(true));
    let config = json!({
        "id": "m",
        "states": {
            "a": {
                "on": {
                    "PAY": [
                        { "guards": "funded", "target": "b" },
                        { "target": "b" },
                    ],
                },
            },
            "b": {},
        },
    });
    assert!(compile(&config, behaviors).is_ok());
}

// --- Transition forms ---

#[test]
fn shorthand_string_is_a_single_unconditional_branch() {
    let config = json!({
        "id": "m",
        "states": {
            "a": { "on": { "GO": "b" } },
            "b": {},
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    let a = definition.state_index("m.a").unwrap();
    let statecraft::definition::TransitionDef::Branches(branches) =
        &definition.node(a).transitions["GO"]
    else {
        panic!("expected branches");
    };
    assert_eq!(branches.len(), 1);
    assert!(branches[0].guards.is_empty());
    assert_eq!(
        branches[0].target.map(|t| definition.node(t).id.clone()),
        Some("m.b".to_owned())
    );
}

#[test]
fn null_transition_is_a_forbidden_override() {
    let config = json!({
        "id": "m",
        "on": { "GO": "deep" },
        "states": {
            "shallow": { "on": { "GO": null } },
            "deep": {},
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    let shallow = definition.state_index("m.shallow").unwrap();
    assert!(matches!(
        definition.lookup_transition(shallow, "GO"),
        statecraft::definition::TransitionLookup::Forbidden
    ));
}

#[test]
fn branch_lists_keep_declaration_order() {
    let behaviors = noop_behaviors();
    let config = json!({
        "id": "m",
        "states": {
            "a": {
                "on": {
                    "GO": [
                        { "guards": "ready", "calculators": "tally", "actions": "log" },
                        { "target": "b", "actions": ["log"] },
                    ],
                },
            },
            "b": {},
        },
    });
    let definition = compile(&config, behaviors).unwrap();
    let a = definition.state_index("m.a").unwrap();
    let statecraft::definition::TransitionDef::Branches(branches) =
        &definition.node(a).transitions["GO"]
    else {
        panic!("expected branches");
    };
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].guards, vec!["ready"]);
    assert_eq!(branches[0].calculators, vec!["tally"]);
    assert!(branches[0].target.is_none());
    assert!(branches[1].target.is_some());
}

#[test]
fn targets_resolve_by_sibling_key_and_full_id() {
    let config = json!({
        "id": "m",
        "states": {
            "outer": {
                "states": {
                    "a": { "on": { "SIBLING": "b", "ABSOLUTE": "m.other" } },
                    "b": {},
                },
            },
            "other": {},
        },
    });
    let definition = compile(&config, Behaviors::new()).unwrap();
    let a = definition.state_index("m.outer.a").unwrap();
    let resolve = |key: &str| {
        let statecraft::definition::TransitionDef::Branches(branches) =
            &definition.node(a).transitions[key]
        else {
            panic!("expected branches");
        };
        definition.node(branches[0].target.unwrap()).id.clone()
    };
    assert_eq!(resolve("SIBLING"), "m.outer.b");
    assert_eq!(resolve("ABSOLUTE"), "m.other");
}
