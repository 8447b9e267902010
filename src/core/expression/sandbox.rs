//! Safety guards over the value graph.
//!
//! Expressions must not be able to walk from a bound value to the host
//! environment. Three predicates enforce that contract: a member-name
//! blacklist, shape checks on objects, and identity checks on functions.
//! Each rejection raises a security error.
//!
//! The guards run at every identifier read, member dereference, call
//! argument/result, and assignment right-hand side.

use std::rc::Rc;

use super::error::{EvalResult, ExprError};
use super::value::{FnKind, Value};

/// Member names that never resolve.
const UNSAFE_NAMES: [&str; 6] = [
    "constructor",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Reject blacklisted member names.
pub fn ensure_safe_member_name(name: &str) -> EvalResult<()> {
    if UNSAFE_NAMES.contains(&name) {
        return Err(ExprError::security(format!(
            "field access to '{}' is disallowed",
            name
        )));
    }
    Ok(())
}

/// Reject values an expression must not traverse: host-global lookalikes,
/// the function constructor, reflection entry points, and DOM nodes.
/// Passes the value through when it is safe.
pub fn ensure_safe_object(value: Value) -> EvalResult<Value> {
    match &value {
        Value::Function(func) if func.kind() == FnKind::Constructor => {
            return Err(ExprError::security(
                "referencing the function constructor is disallowed",
            ));
        }
        Value::Object(obj) => {
            let map = obj.borrow();
            let truthy = |key: &str| map.get(key).map(Value::is_truthy).unwrap_or(false);

            if truthy("document") && truthy("location") && truthy("alert") && truthy("setTimeout")
            {
                return Err(ExprError::security(
                    "referencing the browser global is disallowed",
                ));
            }
            if let Some(Value::Object(ctor)) = map.get("constructor") {
                if Rc::ptr_eq(ctor, obj) {
                    return Err(ExprError::security(
                        "referencing the function constructor is disallowed",
                    ));
                }
            }
            if truthy("getOwnPropertyNames") || truthy("getOwnPropertyDescriptor") {
                return Err(ExprError::security(
                    "referencing the reflection api is disallowed",
                ));
            }
            let node_shape = matches!(map.get("nodeType"), Some(Value::Number(_)))
                && matches!(map.get("nodeName"), Some(Value::Str(_)));
            if node_shape {
                return Err(ExprError::security("referencing dom nodes is disallowed"));
            }
        }
        _ => {}
    }
    Ok(value)
}

/// Reject functions an expression must not invoke: the function
/// constructor and the bound-call primitives.
pub fn ensure_safe_function(value: &Value) -> EvalResult<()> {
    if let Value::Function(func) = value {
        match func.kind() {
            FnKind::Constructor => {
                return Err(ExprError::security(
                    "referencing the function constructor is disallowed",
                ));
            }
            FnKind::CallPrimitive | FnKind::ApplyPrimitive | FnKind::BindPrimitive => {
                return Err(ExprError::security(
                    "referencing call, apply, or bind is disallowed",
                ));
            }
            FnKind::Plain => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::value::Function;
    use indexmap::IndexMap;

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<IndexMap<_, _>>(),
        )
    }

    fn noop_fn() -> Value {
        Value::function(Function::new(|_, _| Ok(Value::Undefined)))
    }

    #[test]
    fn test_member_name_blacklist() {
        assert!(ensure_safe_member_name("constructor").is_err());
        assert!(ensure_safe_member_name("__proto__").is_err());
        assert!(ensure_safe_member_name("__lookupSetter__").is_err());
        assert!(ensure_safe_member_name("length").is_ok());
        assert!(ensure_safe_member_name("Constructor").is_ok());
    }

    #[test]
    fn test_window_shape_rejected() {
        let window = obj(vec![
            ("document", obj(vec![])),
            ("location", obj(vec![])),
            ("alert", noop_fn()),
            ("setTimeout", noop_fn()),
        ]);
        assert!(ensure_safe_object(window).is_err());

        // Not all four markers: fine.
        let partial = obj(vec![("document", obj(vec![])), ("location", obj(vec![]))]);
        assert!(ensure_safe_object(partial).is_ok());
    }

    #[test]
    fn test_self_constructor_rejected() {
        let target = crate::core::expression::value::new_object();
        target
            .borrow_mut()
            .insert("constructor".to_string(), Value::Object(target.clone()));
        assert!(ensure_safe_object(Value::Object(target)).is_err());

        // An ordinary constructor-named member pointing elsewhere passes
        // the object guard (the name guard catches the access itself).
        let benign = obj(vec![("constructor", obj(vec![]))]);
        assert!(ensure_safe_object(benign).is_ok());
    }

    #[test]
    fn test_reflection_shape_rejected() {
        assert!(ensure_safe_object(obj(vec![("getOwnPropertyNames", noop_fn())])).is_err());
        assert!(ensure_safe_object(obj(vec![("getOwnPropertyDescriptor", noop_fn())])).is_err());
    }

    #[test]
    fn test_dom_node_shape_rejected() {
        let node = obj(vec![
            ("nodeType", Value::Number(1.0)),
            ("nodeName", Value::str("DIV")),
        ]);
        assert!(ensure_safe_object(node).is_err());

        // nodeType as a string is not the DOM shape.
        let not_node = obj(vec![
            ("nodeType", Value::str("1")),
            ("nodeName", Value::str("DIV")),
        ]);
        assert!(ensure_safe_object(not_node).is_ok());
    }

    #[test]
    fn test_function_identities() {
        let ctor = Value::function(Function::with_kind(FnKind::Constructor, |_, _| {
            Ok(Value::Undefined)
        }));
        assert!(ensure_safe_object(ctor.clone()).is_err());
        assert!(ensure_safe_function(&ctor).is_err());

        for kind in [
            FnKind::CallPrimitive,
            FnKind::ApplyPrimitive,
            FnKind::BindPrimitive,
        ] {
            let func = Value::function(Function::with_kind(kind, |_, _| Ok(Value::Undefined)));
            // The object guard lets bound-call primitives through; only
            // invoking them is rejected.
            assert!(ensure_safe_object(func.clone()).is_ok());
            assert!(ensure_safe_function(&func).is_err());
        }

        assert!(ensure_safe_function(&noop_fn()).is_ok());
        assert!(ensure_safe_function(&Value::Undefined).is_ok());
    }

    #[test]
    fn test_plain_values_pass() {
        assert!(ensure_safe_object(Value::Number(1.0)).is_ok());
        assert!(ensure_safe_object(obj(vec![("a", Value::Number(1.0))])).is_ok());
        assert!(ensure_safe_object(Value::array(vec![])).is_ok());
    }
}
