//! Integration tests for the dirty-checking scope: digest convergence,
//! queue ordering, coalescing, and watch delegates.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use minibind::{
    from_json, Compiler, DigestError, FilterRegistry, Scope, Value, WatchHandle,
};
use serde_json::json;

fn new_scope() -> Scope {
    Scope::new(Rc::new(Compiler::new(Rc::new(FilterRegistry::new()))))
}

// ============================================================================
// Digest Convergence
// ============================================================================

mod digest {
    use super::*;

    #[test]
    fn test_early_termination_after_single_mutation() {
        let scope = new_scope();
        scope.set("arr", Value::array(vec![Value::Number(0.0); 100]));

        // One watcher per element, all counting their own invocations.
        let evals = Rc::new(Cell::new(0usize));
        for i in 0..100 {
            let evals = evals.clone();
            let scope_in = scope.clone();
            scope.watch_fn(
                move |_| {
                    evals.set(evals.get() + 1);
                    match scope_in.get("arr") {
                        Value::Array(arr) => {
                            arr.borrow().get(i).cloned().unwrap_or_default()
                        }
                        _ => Value::Undefined,
                    }
                },
                |_, _, _| {},
                false,
            );
        }

        // Settle the initial dispatches, then count a single mutation.
        scope.digest().unwrap();
        evals.set(0);

        if let Value::Array(arr) = scope.get("arr") {
            arr.borrow_mut()[0] = Value::Number(1.0);
        }
        scope.digest().unwrap();

        // One full pass plus the early-terminated re-check of watcher 0.
        assert_eq!(evals.get(), 101);
    }

    #[test]
    fn test_cascading_watchers_converge() {
        let scope = new_scope();
        scope.set("a", 1);
        let scope_b = scope.clone();
        scope
            .watch("a", move |new, _, _| scope_b.set("b", new.clone()), false)
            .unwrap();
        let scope_c = scope.clone();
        scope
            .watch("b", move |new, _, _| scope_c.set("c", new.clone()), false)
            .unwrap();

        scope.digest().unwrap();
        assert_eq!(scope.get("c"), Value::Number(1.0));

        scope.set("a", 9);
        scope.digest().unwrap();
        assert_eq!(scope.get("c"), Value::Number(9.0));
    }

    #[test]
    fn test_unstable_watchers_hit_the_limit() {
        let scope = new_scope();
        scope.set("n", 0);
        let scope_in = scope.clone();
        scope
            .watch(
                "n",
                move |new, _, _| scope_in.set("n", new.to_number() + 1.0),
                false,
            )
            .unwrap();

        match scope.digest() {
            Err(DigestError::TtlExceeded { ttl }) => assert_eq!(ttl, 10),
            other => panic!("expected ttl error, got {:?}", other),
        }
    }

    #[test]
    fn test_watch_errors_do_not_abort_digest() {
        let scope = new_scope();
        let errors = Rc::new(Cell::new(0));
        let errors_in = errors.clone();
        scope.set_exception_handler(move |_| errors_in.set(errors_in.get() + 1));

        // First watcher always fails its sandbox check; second still runs.
        scope.set("key", "__proto__");
        scope.set("obj", from_json(json!({})));
        scope.set("x", 1);
        scope.watch("obj[key]", |_, _, _| {}, false).unwrap();
        let (count, listener) = counting_listener();
        scope.watch("x", listener, false).unwrap();

        scope.digest().unwrap();
        assert!(errors.get() > 0);
        assert_eq!(count.get(), 1);
    }
}

// ============================================================================
// Deregistration Invariance
// ============================================================================

mod deregistration {
    use super::*;

    /// Shared setup: watcher A (counted), watcher B (counted), where A is
    /// deregistered through `strategy` at different moments. The post
    /// state must come out identical.
    fn run(strategy: &str) -> (usize, usize) {
        let scope = new_scope();
        scope.set("x", 1);

        let slot: Rc<RefCell<Option<WatchHandle>>> = Rc::new(RefCell::new(None));

        let (count_a, listener_a) = counting_listener();
        let slot_self = slot.clone();
        let strategy_owned = strategy.to_string();
        let handle_a = scope
            .watch(
                "x",
                move |new, old, scope| {
                    listener_a(new, old, scope);
                    if strategy_owned == "own-listener" {
                        if let Some(handle) = slot_self.borrow_mut().take() {
                            handle.deregister();
                        }
                    }
                },
                false,
            )
            .unwrap();
        *slot.borrow_mut() = Some(handle_a);

        let (count_b, listener_b) = counting_listener();
        let slot_other = slot.clone();
        let strategy_owned = strategy.to_string();
        scope
            .watch(
                "x",
                move |new, old, scope| {
                    listener_b(new, old, scope);
                    if strategy_owned == "other-listener" {
                        if let Some(handle) = slot_other.borrow_mut().take() {
                            handle.deregister();
                        }
                    }
                },
                false,
            )
            .unwrap();

        scope.digest().unwrap();
        if strategy == "between-digests" {
            if let Some(handle) = slot.borrow_mut().take() {
                handle.deregister();
            }
        }

        scope.set("x", 2);
        scope.digest().unwrap();
        scope.set("x", 3);
        scope.digest().unwrap();

        (count_a.get(), count_b.get())
    }

    #[test]
    fn test_same_post_state_regardless_of_timing() {
        // A gets its first dispatch, then never again; B sees all three.
        assert_eq!(run("own-listener"), (1, 3));
        assert_eq!(run("other-listener"), (1, 3));
        assert_eq!(run("between-digests"), (1, 3));
    }
}

// ============================================================================
// Async Queues
// ============================================================================

mod queues {
    use super::*;

    #[test]
    fn test_apply_async_coalesces_into_one_apply() {
        let scope = new_scope();
        scope.set("x", 0);
        let (count, listener) = counting_listener();
        scope.watch("x", listener, false).unwrap();
        scope.digest().unwrap();
        assert_eq!(count.get(), 1);

        scope.apply_async_expr("x = 1").unwrap();
        scope.apply_async_expr("x = 2").unwrap();

        // A synchronous digest drains the queue inline and cancels the
        // scheduled flush: exactly one more listener dispatch, final
        // state from the last enqueued mutation.
        scope.digest().unwrap();
        assert_eq!(count.get(), 2);
        assert_eq!(scope.get("x"), Value::Number(2.0));
        assert_eq!(scope.run_deferred(), 0);
    }

    #[test]
    fn test_apply_async_flush_order() {
        let scope = new_scope();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            scope.apply_async(move |_| order.borrow_mut().push(tag));
        }
        assert!(order.borrow().is_empty());
        scope.run_deferred();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_eval_async_drains_before_watcher_pass() {
        let scope = new_scope();
        scope.set("x", 1);
        let order = Rc::new(RefCell::new(Vec::new()));
        let order_w = order.clone();
        scope
            .watch("x", move |_, _, _| order_w.borrow_mut().push("watch"), false)
            .unwrap();
        let order_a = order.clone();
        scope.eval_async(move |_| order_a.borrow_mut().push("async"));
        scope.digest().unwrap();
        assert_eq!(*order.borrow(), vec!["async", "watch"]);
    }

    #[test]
    fn test_eval_async_expr_mutates_scope() {
        let scope = new_scope();
        scope.eval_async_expr("tally = 41 + 1").unwrap();
        scope.digest().unwrap();
        assert_eq!(scope.get("tally"), Value::Number(42.0));
    }

    #[test]
    fn test_post_digest_runs_after_listeners() {
        let scope = new_scope();
        scope.set("x", 1);
        let order = Rc::new(RefCell::new(Vec::new()));
        let order_w = order.clone();
        scope
            .watch("x", move |_, _, _| order_w.borrow_mut().push("listener"), false)
            .unwrap();
        let order_p = order.clone();
        scope.post_digest(move |_| order_p.borrow_mut().push("post"));
        scope.digest().unwrap();
        assert_eq!(*order.borrow(), vec!["listener", "post"]);
    }

    #[test]
    fn test_apply_expr_returns_value_and_digests() {
        let scope = new_scope();
        let (count, listener) = counting_listener();
        scope.watch("x", listener, false).unwrap();

        let value = scope.apply_expr("x = 5; x * 2").unwrap();
        assert_eq!(value, Value::Number(10.0));
        assert_eq!(count.get(), 1);
        assert_eq!(scope.get("x"), Value::Number(5.0));
    }
}

// ============================================================================
// Watch Delegates
// ============================================================================

mod delegates {
    use super::*;

    #[test]
    fn test_one_time_binding_stops_watching() {
        let scope = new_scope();
        let values = Rc::new(RefCell::new(Vec::new()));
        let values_in = values.clone();
        scope
            .watch(
                "::title",
                move |new, _, _| values_in.borrow_mut().push(new.clone()),
                false,
            )
            .unwrap();

        scope.digest().unwrap();
        scope.set("title", "ready");
        scope.digest().unwrap();
        scope.set("title", "changed-too-late");
        scope.digest().unwrap();

        assert_eq!(
            *values.borrow(),
            vec![Value::Undefined, Value::str("ready")]
        );
        assert_eq!(scope.watch_count(), 0);
    }

    #[test]
    fn test_one_time_value_matches_plain_binding() {
        let scope = new_scope();
        scope.set("n", 20);
        assert_eq!(
            scope.eval_expr("::n * 2 + 2").unwrap(),
            scope.eval_expr("n * 2 + 2").unwrap()
        );
    }

    #[test]
    fn test_inputs_fast_path_ignores_unrelated_churn() {
        let scope = new_scope();
        scope.set("a", 1);
        scope.set("b", 2);
        scope.set("noise", 0);

        let (count, listener) = counting_listener();
        scope.watch("a + b", listener, false).unwrap();
        scope.digest().unwrap();
        assert_eq!(count.get(), 1);

        // Unrelated churn does not re-dispatch.
        scope.set("noise", 1);
        scope.digest().unwrap();
        assert_eq!(count.get(), 1);

        scope.set("a", 10);
        scope.digest().unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_literal_watch_is_stable_across_digests() {
        let scope = new_scope();
        scope.set("a", 1);
        let (count, listener) = counting_listener();
        // A fresh array every evaluation must not keep the digest dirty.
        scope.watch("[a, 2]", listener, false).unwrap();
        scope.digest().unwrap();
        scope.digest().unwrap();
        assert_eq!(count.get(), 1);

        scope.set("a", 5);
        scope.digest().unwrap();
        assert_eq!(count.get(), 2);
    }
}

// ============================================================================
// Watch Groups
// ============================================================================

mod groups {
    use super::*;

    #[test]
    fn test_single_dispatch_for_multiple_changes() {
        let scope = new_scope();
        scope.set("a", 1);
        scope.set("b", 2);
        let calls = Rc::new(Cell::new(0));
        let calls_in = calls.clone();
        scope
            .watch_group(&["a", "b"], move |_, _, _| calls_in.set(calls_in.get() + 1))
            .unwrap();

        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);

        scope.set("a", 3);
        scope.set("b", 4);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_first_run_arrays_are_identical() {
        let scope = new_scope();
        scope.set("a", 1);
        scope.set("b", 2);
        let runs = Rc::new(RefCell::new(Vec::new()));
        let runs_in = runs.clone();
        scope
            .watch_group(&["a", "b"], move |new, old, _| {
                runs_in
                    .borrow_mut()
                    .push((new.to_vec(), old.to_vec()));
            })
            .unwrap();

        scope.digest().unwrap();
        scope.set("b", 9);
        scope.digest().unwrap();

        let runs = runs.borrow();
        assert_eq!(runs[0].0, runs[0].1);
        assert_eq!(runs[1].0, vec![Value::Number(1.0), Value::Number(9.0)]);
        assert_eq!(runs[1].1, vec![Value::Number(1.0), Value::Number(2.0)]);
    }

    #[test]
    fn test_empty_group_fires_exactly_once() {
        let scope = new_scope();
        let calls = Rc::new(Cell::new(0));
        let calls_in = calls.clone();
        scope
            .watch_group(&[], move |new, old, _| {
                assert!(new.is_empty() && old.is_empty());
                calls_in.set(calls_in.get() + 1);
            })
            .unwrap();
        scope.digest().unwrap();
        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_deregistration_is_atomic() {
        let scope = new_scope();
        scope.set("a", 1);
        scope.set("b", 2);
        let calls = Rc::new(Cell::new(0));
        let calls_in = calls.clone();
        let handle = scope
            .watch_group(&["a", "b"], move |_, _, _| calls_in.set(calls_in.get() + 1))
            .unwrap();
        scope.digest().unwrap();

        handle.deregister();
        assert_eq!(scope.watch_count(), 0);
        scope.set("a", 5);
        scope.digest().unwrap();
        assert_eq!(calls.get(), 1);
    }
}

// ============================================================================
// Phases
// ============================================================================

mod phases {
    use super::*;

    #[test]
    fn test_probe_outside_digest_is_empty() {
        let scope = new_scope();
        assert_eq!(scope.phase().name(), "");
    }

    #[test]
    fn test_digest_during_digest_is_detected() {
        let scope = new_scope();
        scope.set("x", 1);
        let seen: Rc<RefCell<Option<DigestError>>> = Rc::new(RefCell::new(None));
        let seen_in = seen.clone();
        scope
            .watch(
                "x",
                move |_, _, scope| *seen_in.borrow_mut() = scope.digest().err(),
                false,
            )
            .unwrap();
        scope.digest().unwrap();
        assert!(matches!(
            *seen.borrow(),
            Some(DigestError::InProgress { phase: "$digest" })
        ));
    }

    #[test]
    fn test_apply_during_apply_runs_inline() {
        let scope = new_scope();
        let scope_in = scope.clone();
        let ran = Rc::new(Cell::new(false));
        let ran_in = ran.clone();
        scope
            .apply(move |_| {
                scope_in
                    .apply(move |_| ran_in.set(true))
                    .unwrap();
            })
            .unwrap();
        assert!(ran.get());
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn counting_listener() -> (Rc<Cell<usize>>, impl Fn(&Value, &Value, &Scope)) {
    let count = Rc::new(Cell::new(0));
    let inner = count.clone();
    (count, move |_: &Value, _: &Value, _: &Scope| {
        inner.set(inner.get() + 1)
    })
}
