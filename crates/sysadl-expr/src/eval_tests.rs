use std::collections::BTreeMap;

use sysadl_core::{ErrorKind, Value};

use crate::{Evaluator, LayeredScope, StateScope};

fn state() -> Value {
    let mut root = Value::Null;
    root.set_path("vehicle.location.x", Value::from(12))
        .expect("seed state");
    root.set_path("vehicle.name", Value::from("rover"))
        .expect("seed state");
    root.set_path("door.open", Value::from(false))
        .expect("seed state");
    root
}

fn vars(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

#[test]
fn arithmetic_respects_precedence() {
    let evaluator = Evaluator::with_seed(1);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    assert_eq!(
        evaluator.evaluate("1 + 2 * 3 - 4 / 2", &scope).expect("eval"),
        Value::from(5)
    );
    assert_eq!(
        evaluator.evaluate("(1 + 2) * 3 % 4", &scope).expect("eval"),
        Value::from(1)
    );
    assert_eq!(evaluator.evaluate("-3 + 1", &scope).expect("eval"), Value::from(-2));
}

#[test]
fn reads_state_paths_directly_and_through_state_alias() {
    let evaluator = Evaluator::with_seed(1);
    let root = state();
    let scope = StateScope { state: &root };
    assert!(evaluator
        .evaluate_condition("vehicle.location.x > 10 && !door.open", &scope)
        .expect("eval"));
    assert_eq!(
        evaluator.evaluate("state.vehicle.name", &scope).expect("eval"),
        Value::from("rover")
    );
    assert_eq!(
        evaluator.evaluate("vehicle.missing.path", &scope).expect("eval"),
        Value::Null
    );
}

#[test]
fn variables_shadow_state_roots() {
    let evaluator = Evaluator::with_seed(1);
    let root = state();
    let variables = vars(&[("vehicle", Value::from("shadowed")), ("n", Value::from(4))]);
    let scope = LayeredScope {
        variables: &variables,
        state: &root,
    };
    assert_eq!(
        evaluator.evaluate("vehicle", &scope).expect("eval"),
        Value::from("shadowed")
    );
    assert_eq!(
        evaluator.evaluate("state.vehicle.location.x + n", &scope).expect("eval"),
        Value::from(16)
    );
}

#[test]
fn equality_is_loose_and_strict() {
    let evaluator = Evaluator::with_seed(1);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    assert!(evaluator.evaluate_condition("'5' == 5", &scope).expect("eval"));
    assert!(!evaluator.evaluate_condition("'5' === 5", &scope).expect("eval"));
    assert!(evaluator.evaluate_condition("null == undefined", &scope).expect("eval"));
    assert!(evaluator.evaluate_condition("true == 1", &scope).expect("eval"));
    assert!(evaluator.evaluate_condition("'abc' < 'abd'", &scope).expect("eval"));
}

#[test]
fn logical_operators_return_operands() {
    let evaluator = Evaluator::with_seed(1);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    assert_eq!(
        evaluator.evaluate("missing || 'fallback'", &scope).expect("eval"),
        Value::from("fallback")
    );
    assert_eq!(
        evaluator.evaluate("0 && explode()", &scope).expect("eval"),
        Value::from(0),
        "right side must not run"
    );
}

#[test]
fn builtins_and_string_concatenation() {
    let evaluator = Evaluator::with_seed(9);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    assert_eq!(
        evaluator.evaluate("Math.max(1, 7, 3) + min(4, 2)", &scope).expect("eval"),
        Value::from(9)
    );
    assert_eq!(
        evaluator.evaluate("'speed=' + floor(2.7)", &scope).expect("eval"),
        Value::from("speed=2")
    );
    let random = evaluator
        .evaluate("random()", &scope)
        .expect("eval")
        .as_number()
        .expect("number");
    assert!((0.0..1.0).contains(&random));
    assert!(evaluator
        .evaluate("now()", &scope)
        .expect("eval")
        .as_number()
        .is_some_and(|now| now > 0.0));
}

#[test]
fn ternary_and_indexing() {
    let evaluator = Evaluator::with_seed(1);
    let variables = vars(&[(
        "items",
        Value::Array(vec![Value::from(10), Value::from(20)]),
    )]);
    let root = Value::Null;
    let scope = LayeredScope {
        variables: &variables,
        state: &root,
    };
    assert_eq!(
        evaluator.evaluate("items[1] > 15 ? 'big' : 'small'", &scope).expect("eval"),
        Value::from("big")
    );
    assert_eq!(
        evaluator.evaluate("items.length", &scope).expect("eval"),
        Value::from(2)
    );
}

#[test]
fn unknown_functions_are_rejected() {
    let evaluator = Evaluator::with_seed(1);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    let error = evaluator
        .evaluate("process.exit(1)", &scope)
        .expect_err("sandbox should reject");
    assert_eq!(error.kind, ErrorKind::ExpressionEvaluationError);
    assert!(error.message.contains("unknown function"));
}

#[test]
fn compiled_expressions_are_cached() {
    let evaluator = Evaluator::with_seed(1);
    let root = Value::Null;
    let scope = StateScope { state: &root };
    evaluator.evaluate("1 + 1", &scope).expect("eval");
    evaluator.evaluate("1 + 1", &scope).expect("eval");
    assert_eq!(evaluator.cached_expressions(), 1);
    evaluator.clear_cache();
    assert_eq!(evaluator.cached_expressions(), 0);
}
