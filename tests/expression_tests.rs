//! Integration tests for the expression engine: compile pipeline,
//! evaluator semantics, and the sandboxing contract.

use std::rc::Rc;

use minibind::{from_json, Compiler, ExprError, Filter, FilterRegistry, Function, Value};
use serde_json::json;

fn compiler() -> Compiler {
    Compiler::new(Rc::new(FilterRegistry::new()))
}

fn empty_scope() -> Value {
    from_json(json!({}))
}

fn eval(src: &str, scope: &Value) -> Value {
    compiler().compile(src).unwrap().eval(scope, None).unwrap()
}

// ============================================================================
// Literals and Flags
// ============================================================================

mod literals {
    use super::*;

    #[test]
    fn test_number_literal_is_constant() {
        let compiled = compiler().compile("233").unwrap();
        assert_eq!(compiled.eval(&empty_scope(), None).unwrap(), Value::Number(233.0));
        assert!(compiled.is_literal());
        assert!(compiled.is_constant());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(eval("'a\\nb'", &empty_scope()), Value::str("a\nb"));
        assert_eq!(eval("'\\u0041\\u0042'", &empty_scope()), Value::str("AB"));
        assert_eq!(eval("\"mixed 'quotes'\"", &empty_scope()), Value::str("mixed 'quotes'"));
    }

    #[test]
    fn test_container_literals() {
        let arr = eval("[1, 'two', [3]]", &empty_scope());
        let arr = arr.as_array().unwrap().borrow();
        assert_eq!(arr[0], Value::Number(1.0));
        assert_eq!(arr[1], Value::str("two"));
        assert_eq!(arr[2].as_array().unwrap().borrow()[0], Value::Number(3.0));

        let obj = eval("{a: 1, 'b': 2}", &empty_scope());
        let obj = obj.as_object().unwrap().borrow();
        assert_eq!(obj.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(obj.get("b"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(eval("null", &empty_scope()), Value::Null);
        assert_eq!(eval("undefined", &empty_scope()), Value::Undefined);
        assert_eq!(eval("true", &empty_scope()), Value::Bool(true));
        assert_eq!(eval("false", &empty_scope()), Value::Bool(false));
    }

    #[test]
    fn test_constant_expressions_expose_no_inputs() {
        let compiled = compiler().compile("1 + 2 * 3").unwrap();
        assert!(compiled.is_constant());
        assert!(compiled.inputs().is_none());
    }

    #[test]
    fn test_constant_evaluation_is_deterministic() {
        let compiled = compiler().compile("(1 + 2) * 3 - 4 % 3").unwrap();
        let first = compiled.eval(&empty_scope(), None).unwrap();
        for _ in 0..3 {
            assert_eq!(compiled.eval(&empty_scope(), None).unwrap(), first);
        }
    }
}

// ============================================================================
// Member Access
// ============================================================================

mod members {
    use super::*;

    #[test]
    fn test_deep_chain() {
        let scope = from_json(json!({"a": {"b": {"c": 7}}}));
        assert_eq!(eval("a.b.c", &scope), Value::Number(7.0));
    }

    #[test]
    fn test_missing_steps_yield_undefined() {
        let scope = from_json(json!({"a": {}}));
        assert_eq!(eval("a.b.c", &scope), Value::Undefined);
        assert_eq!(eval("totally.missing", &scope), Value::Undefined);
    }

    #[test]
    fn test_computed_access() {
        let scope = from_json(json!({"obj": {"k": 5}, "name": "k", "arr": [7, 8], "i": 1}));
        assert_eq!(eval("obj[name]", &scope), Value::Number(5.0));
        assert_eq!(eval("arr[i]", &scope), Value::Number(8.0));
        assert_eq!(eval("arr[0]", &scope), Value::Number(7.0));
        assert_eq!(eval("arr['length']", &scope), Value::Number(2.0));
    }

    #[test]
    fn test_mixed_postfix_chain() {
        let scope = from_json(json!({"rows": [{"cells": [1, 2, 3]}]}));
        assert_eq!(eval("rows[0].cells[2]", &scope), Value::Number(3.0));
        assert_eq!(eval("rows[0].cells.length", &scope), Value::Number(3.0));
    }
}

// ============================================================================
// Operators
// ============================================================================

mod operators {
    use super::*;

    #[test]
    fn test_arithmetic_and_precedence() {
        let scope = empty_scope();
        assert_eq!(eval("1 + 2 * 3", &scope), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3", &scope), Value::Number(9.0));
        assert_eq!(eval("10 % 3", &scope), Value::Number(1.0));
        assert_eq!(eval("-3 + 1", &scope), Value::Number(-2.0));
    }

    #[test]
    fn test_string_concatenation() {
        let scope = from_json(json!({"name": "world"}));
        assert_eq!(eval("'hello ' + name", &scope), Value::str("hello world"));
        assert_eq!(eval("'n=' + 3", &scope), Value::str("n=3"));
    }

    #[test]
    fn test_undefined_substitution_in_additive() {
        let scope = empty_scope();
        assert_eq!(eval("missing + 3", &scope), Value::Number(3.0));
        assert_eq!(eval("3 - missing", &scope), Value::Number(3.0));
        assert_eq!(eval("+missing", &scope), Value::Number(0.0));
    }

    #[test]
    fn test_equality_tiers() {
        let scope = empty_scope();
        assert_eq!(eval("1 == '1'", &scope), Value::Bool(true));
        assert_eq!(eval("1 === '1'", &scope), Value::Bool(false));
        assert_eq!(eval("null == undefined", &scope), Value::Bool(true));
        assert_eq!(eval("null === undefined", &scope), Value::Bool(false));
        assert_eq!(eval("1 !== 2", &scope), Value::Bool(true));
    }

    #[test]
    fn test_logical_short_circuit_values() {
        let scope = from_json(json!({"zero": 0, "name": "x"}));
        assert_eq!(eval("zero || 'fallback'", &scope), Value::str("fallback"));
        assert_eq!(eval("name || 'fallback'", &scope), Value::str("x"));
        assert_eq!(eval("name && zero", &scope), Value::Number(0.0));
    }

    #[test]
    fn test_ternary() {
        let scope = from_json(json!({"n": 5}));
        assert_eq!(eval("n > 3 ? 'big' : 'small'", &scope), Value::str("big"));
        assert_eq!(eval("n > 9 ? 'big' : 'small'", &scope), Value::str("small"));
    }
}

// ============================================================================
// Statements and Assignment
// ============================================================================

mod assignment {
    use super::*;

    #[test]
    fn test_statement_sequence_leaves_state() {
        let scope = empty_scope();
        assert_eq!(eval("a = 1; b = 2; a + b", &scope), Value::Number(3.0));
        let map = scope.as_object().unwrap().borrow();
        assert_eq!(map.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(map.get("b"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_assign_then_read_round_trip() {
        // For every assignable expression: assign(s, v) then eval(s) == v.
        for expr in ["plain", "nested.deep.key", "arr[2]", "mixed['x'].y"] {
            let scope = from_json(json!({"arr": [0, 0, 0]}));
            let compiled = compiler().compile(expr).unwrap();
            assert!(compiled.is_assignable(), "{} should be assignable", expr);
            compiled
                .assign(&scope, Value::str("marker"), None)
                .unwrap();
            assert_eq!(
                compiled.eval(&scope, None).unwrap(),
                Value::str("marker"),
                "{} did not round-trip",
                expr
            );
        }
    }

    #[test]
    fn test_assign_is_noop_for_non_assignable() {
        let scope = from_json(json!({"a": 1, "b": 2}));
        let compiled = compiler().compile("a + b").unwrap();
        let result = compiled.assign(&scope, Value::Number(9.0), None).unwrap();
        assert_eq!(result, Value::Undefined);
        assert_eq!(compiled.eval(&scope, None).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_literal_assignment_target_is_parse_error() {
        assert!(matches!(
            compiler().compile("1 = 2"),
            Err(ExprError::Parse { .. })
        ));
    }
}

// ============================================================================
// Calls
// ============================================================================

mod calls {
    use super::*;

    #[test]
    fn test_bare_call_binds_scope() {
        let scope = empty_scope();
        scope.as_object().unwrap().borrow_mut().insert(
            "fn".to_string(),
            Value::function(Function::new(|this, _| Ok(this))),
        );
        let result = eval("fn()", &scope);
        assert!(result.strict_eq(&scope));
    }

    #[test]
    fn test_bare_call_binds_locals_when_owned() {
        let scope = empty_scope();
        let locals = empty_scope();
        locals.as_object().unwrap().borrow_mut().insert(
            "fn".to_string(),
            Value::function(Function::new(|this, _| Ok(this))),
        );
        let compiled = compiler().compile("fn()").unwrap();
        let result = compiled.eval(&scope, Some(&locals)).unwrap();
        assert!(result.strict_eq(&locals));
    }

    #[test]
    fn test_arguments_and_return() {
        let scope = from_json(json!({"base": 10}));
        scope.as_object().unwrap().borrow_mut().insert(
            "sum".to_string(),
            Value::function(Function::new(|_, args| {
                Ok(Value::Number(args.iter().map(Value::to_number).sum()))
            })),
        );
        assert_eq!(eval("sum(base, 4, 2)", &scope), Value::Number(16.0));
    }

    #[test]
    fn test_missing_function_yields_undefined() {
        assert_eq!(eval("nothing()", &empty_scope()), Value::Undefined);
        assert_eq!(
            eval("deeply.nested.fn()", &from_json(json!({"deeply": {}}))),
            Value::Undefined
        );
    }
}

// ============================================================================
// Filters
// ============================================================================

mod filters {
    use super::*;

    fn registry_with_filters() -> Rc<FilterRegistry> {
        let registry = Rc::new(FilterRegistry::new());
        registry.register("upper", || {
            Filter::new(|args| {
                Ok(Value::str(args[0].to_display().to_uppercase()))
            })
        });
        registry.register("limit", || {
            Filter::new(|args| {
                let n = args.get(1).map(|v| v.to_number()).unwrap_or(0.0) as usize;
                match &args[0] {
                    Value::Array(arr) => {
                        Ok(Value::array(arr.borrow().iter().take(n).cloned().collect()))
                    }
                    other => Ok(other.clone()),
                }
            })
        });
        registry.register("counter", || {
            let count = std::cell::Cell::new(0.0);
            Filter::stateful(move |_| {
                count.set(count.get() + 1.0);
                Ok(Value::Number(count.get()))
            })
        });
        registry
    }

    #[test]
    fn test_pipeline_with_arguments() {
        let compiler = Compiler::new(registry_with_filters());
        let scope = from_json(json!({"name": "ada"}));
        let compiled = compiler.compile("name | upper").unwrap();
        assert_eq!(compiled.eval(&scope, None).unwrap(), Value::str("ADA"));

        let scope = from_json(json!({"items": [1, 2, 3, 4]}));
        let compiled = compiler.compile("items | limit:2").unwrap();
        let out = compiled.eval(&scope, None).unwrap();
        assert_eq!(out.as_array().unwrap().borrow().len(), 2);
    }

    #[test]
    fn test_constness_follows_statefulness() {
        let compiler = Compiler::new(registry_with_filters());
        assert!(compiler.compile("[1,2,3] | limit:2").unwrap().is_constant());
        assert!(!compiler.compile("[1,2,3] | counter").unwrap().is_constant());
    }

    #[test]
    fn test_unknown_filter_fails_compilation() {
        assert!(matches!(
            compiler().compile("a | nope"),
            Err(ExprError::Compile { .. })
        ));
    }
}

// ============================================================================
// One-Time Marker
// ============================================================================

mod one_time {
    use super::*;

    #[test]
    fn test_marker_sets_flag_and_keeps_semantics() {
        let plain = compiler();
        let scope = from_json(json!({"a": {"b": 41}}));

        let marked = plain.compile("::a.b + 1").unwrap();
        let unmarked = plain.compile("a.b + 1").unwrap();
        assert!(marked.is_one_time());
        assert!(!unmarked.is_one_time());
        assert_eq!(
            marked.eval(&scope, None).unwrap(),
            unmarked.eval(&scope, None).unwrap()
        );
    }
}

// ============================================================================
// Sandbox
// ============================================================================

mod sandbox {
    use super::*;

    fn window_json() -> serde_json::Value {
        json!({"document": {}, "location": {}, "alert": 1, "setTimeout": 1})
    }

    #[test]
    fn test_global_reference_is_rejected() {
        let scope = from_json(json!({ "wd": window_json() }));
        let err = compiler()
            .compile("wd")
            .unwrap()
            .eval(&scope, None)
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_blacklisted_names_fail_compilation() {
        for expr in [
            "a.constructor",
            "a.__proto__",
            "a.__defineGetter__",
            "a.__defineSetter__",
            "a.__lookupGetter__",
            "a.__lookupSetter__",
            "constructor",
        ] {
            assert!(
                compiler().compile(expr).unwrap_err().is_security(),
                "{} should be rejected",
                expr
            );
        }
    }

    #[test]
    fn test_dynamic_member_name_rejected_at_runtime() {
        let compiled = compiler().compile("obj[name]").unwrap();
        let scope = from_json(json!({"obj": {}, "name": "__proto__"}));
        assert!(compiled.eval(&scope, None).unwrap_err().is_security());
    }

    #[test]
    fn test_dom_shape_rejected_through_member() {
        let scope = from_json(json!({
            "view": {"node": {"nodeType": 1, "nodeName": "DIV"}}
        }));
        let err = compiler()
            .compile("view.node")
            .unwrap()
            .eval(&scope, None)
            .unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn test_assignment_rhs_is_guarded() {
        let scope = from_json(json!({ "wd": window_json() }));
        let err = compiler()
            .compile("safe = wd")
            .unwrap()
            .eval(&scope, None)
            .unwrap_err();
        assert!(err.is_security());
        assert!(scope.as_object().unwrap().borrow().get("safe").is_none());
    }
}

// ============================================================================
// JSON Interop
// ============================================================================

mod interop {
    use super::*;
    use minibind::to_json;

    #[test]
    fn test_scope_built_from_json() {
        let scope = from_json(json!({"user": {"name": "ada", "tags": ["x", "y"]}}));
        assert_eq!(eval("user.name", &scope), Value::str("ada"));
        assert_eq!(eval("user.tags[1]", &scope), Value::str("y"));
        assert_eq!(eval("user.tags.length", &scope), Value::Number(2.0));
    }

    #[test]
    fn test_mutations_round_trip_to_json() {
        let scope = from_json(json!({}));
        eval("report = {total: 3, items: [1, 2]}", &scope);
        assert_eq!(
            to_json(&scope),
            json!({"report": {"total": 3, "items": [1, 2]}})
        );
    }
}
