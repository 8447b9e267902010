//! The dirty-checking scope runtime.
//!
//! A [`Scope`] binds an observable data object to a set of watchers. A
//! digest polls every watcher in registration order until the whole set
//! reports stable values, dispatching listeners on change and draining
//! the deferred work queues (`eval_async`, `apply_async`, `post_digest`)
//! in between. The fixed-point loop is bounded: a watcher set that never
//! converges fails the digest after ten passes.
//!
//! Re-entrancy rules: listeners may register and deregister watchers and
//! enqueue async work mid-digest, but a digest cannot start while another
//! digest or apply is in progress. Deferred scheduling goes through the
//! [`Scheduler`] trait.

mod scheduler;

pub use scheduler::{Scheduler, TaskId, TickScheduler};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::core::expression::{CompiledExpression, Compiler, EvalResult, ExprError, Value};

/// Digest iteration bound.
const TTL: usize = 10;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the digest machinery.
#[derive(Debug, Clone)]
pub enum DigestError {
    /// The watcher set kept changing past the iteration bound.
    TtlExceeded { ttl: usize },
    /// A digest or apply was started while one was already running.
    InProgress { phase: &'static str },
}

impl DigestError {
    fn ttl_exceeded(ttl: usize) -> Self {
        DigestError::TtlExceeded { ttl }
    }

    fn in_progress(phase: &'static str) -> Self {
        DigestError::InProgress { phase }
    }
}

impl fmt::Display for DigestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestError::TtlExceeded { ttl } => {
                write!(f, "digest did not stabilize within {} iterations", ttl)
            }
            DigestError::InProgress { phase } => {
                write!(f, "{} already in progress", phase)
            }
        }
    }
}

impl std::error::Error for DigestError {}

// ============================================================================
// Watchers and queues
// ============================================================================

/// A watch function: polled each digest pass for the observed value.
pub type WatchFn = Rc<dyn Fn(&Scope) -> EvalResult<Value>>;

/// A change listener: `(new, previous, scope)`. On the first dispatch the
/// previous value equals the new one.
pub type ListenerFn = Rc<dyn Fn(&Value, &Value, &Scope)>;

/// A watch-group listener over per-member value arrays.
pub type GroupListenerFn = Rc<dyn Fn(&[Value], &[Value], &Scope)>;

enum LastValue {
    Unseen,
    Seen(Value),
}

struct Watcher {
    id: u64,
    watch: WatchFn,
    listener: Option<ListenerFn>,
    by_value: bool,
    last: RefCell<LastValue>,
}

enum Task {
    Closure(Box<dyn FnOnce(&Scope)>),
    Expr(Rc<CompiledExpression>),
}

impl Task {
    fn run(self, scope: &Scope) -> EvalResult<()> {
        match self {
            Task::Closure(f) => {
                f(scope);
                Ok(())
            }
            Task::Expr(compiled) => compiled.eval(&scope.value(), None).map(drop),
        }
    }
}

/// The phase the scope is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Digest,
    Apply,
}

impl Phase {
    /// The phase name as tests probe it.
    pub fn name(self) -> &'static str {
        match self {
            Phase::None => "",
            Phase::Digest => "$digest",
            Phase::Apply => "$apply",
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

struct ScopeInner {
    data: crate::core::expression::ObjectRef,
    compiler: Rc<Compiler>,
    watchers: RefCell<Vec<Option<Watcher>>>,
    next_watch_id: Cell<u64>,
    last_dirty: Cell<Option<u64>>,
    async_queue: RefCell<VecDeque<Task>>,
    apply_async_queue: RefCell<VecDeque<Task>>,
    post_digest_queue: RefCell<VecDeque<Box<dyn FnOnce(&Scope)>>>,
    phase: Cell<Phase>,
    apply_async_handle: Cell<Option<TaskId>>,
    scheduler: Rc<dyn Scheduler>,
    tick: Option<Rc<TickScheduler>>,
    exception_handler: RefCell<Rc<dyn Fn(&ExprError)>>,
}

/// A dirty-checking scope. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

/// Deregistration handle for a single watcher. Dropping the handle does
/// not deregister; deregistering twice is harmless.
#[derive(Clone)]
pub struct WatchHandle {
    scope: Weak<ScopeInner>,
    id: u64,
}

impl WatchHandle {
    pub fn deregister(&self) {
        if let Some(inner) = self.scope.upgrade() {
            let mut watchers = inner.watchers.borrow_mut();
            for slot in watchers.iter_mut() {
                if matches!(slot, Some(w) if w.id == self.id) {
                    *slot = None;
                    break;
                }
            }
            // The removed watcher may have been the short-circuit anchor.
            inner.last_dirty.set(None);
        }
    }
}

/// Deregistration handle for a watch group: removes every underlying
/// watcher and suppresses a pending empty-group dispatch.
pub struct WatchGroupHandle {
    handles: Vec<WatchHandle>,
    active: Rc<Cell<bool>>,
}

impl WatchGroupHandle {
    pub fn deregister(&self) {
        self.active.set(false);
        for handle in &self.handles {
            handle.deregister();
        }
    }
}

impl Scope {
    /// Create a scope with its own queue-backed scheduler; drive deferred
    /// work with [`Scope::run_deferred`].
    pub fn new(compiler: Rc<Compiler>) -> Self {
        let tick = Rc::new(TickScheduler::new());
        Self::build(compiler, tick.clone(), Some(tick))
    }

    /// Create a scope wired to the embedder's scheduler.
    pub fn with_scheduler(compiler: Rc<Compiler>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self::build(compiler, scheduler, None)
    }

    fn build(
        compiler: Rc<Compiler>,
        scheduler: Rc<dyn Scheduler>,
        tick: Option<Rc<TickScheduler>>,
    ) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                data: crate::core::expression::new_object(),
                compiler,
                watchers: RefCell::new(Vec::new()),
                next_watch_id: Cell::new(0),
                last_dirty: Cell::new(None),
                async_queue: RefCell::new(VecDeque::new()),
                apply_async_queue: RefCell::new(VecDeque::new()),
                post_digest_queue: RefCell::new(VecDeque::new()),
                phase: Cell::new(Phase::None),
                apply_async_handle: Cell::new(None),
                scheduler,
                tick,
                exception_handler: RefCell::new(Rc::new(|err| {
                    log::error!("error caught during digest: {}", err);
                })),
            }),
        }
    }

    /// Run work deferred on the built-in scheduler. Returns how many tasks
    /// ran (always 0 when an embedder scheduler is wired instead).
    pub fn run_deferred(&self) -> usize {
        match &self.inner.tick {
            Some(tick) => tick.run_due(),
            None => 0,
        }
    }

    /// Replace the digest exception sink.
    pub fn set_exception_handler(&self, handler: impl Fn(&ExprError) + 'static) {
        *self.inner.exception_handler.borrow_mut() = Rc::new(handler);
    }

    /// The compiler this scope evaluates expressions with.
    pub fn compiler(&self) -> &Rc<Compiler> {
        &self.inner.compiler
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    // ------------------------------------------------------------------
    // Bound data
    // ------------------------------------------------------------------

    /// The scope's data object as a value, usable as an evaluation scope.
    pub fn value(&self) -> Value {
        Value::Object(self.inner.data.clone())
    }

    /// Bind a name on the scope data object.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.data.borrow_mut().insert(name.into(), value.into());
    }

    /// Read a name off the scope data object.
    pub fn get(&self, name: &str) -> Value {
        self.inner.data.borrow().get(name).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Watch registration
    // ------------------------------------------------------------------

    /// Watch a native function. The listener fires whenever the returned
    /// value changes between digests (`by_value` selects deep
    /// comparison over reference equality).
    pub fn watch_fn(
        &self,
        watch: impl Fn(&Scope) -> Value + 'static,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
        by_value: bool,
    ) -> WatchHandle {
        self.register_watcher(
            Rc::new(move |scope| Ok(watch(scope))),
            Some(Rc::new(listener)),
            by_value,
        )
    }

    /// Watch a native function without a listener, for watch functions
    /// that carry their own side effects.
    pub fn watch_silent(&self, watch: impl Fn(&Scope) -> Value + 'static) -> WatchHandle {
        self.register_watcher(Rc::new(move |scope| Ok(watch(scope))), None, false)
    }

    /// Watch an expression. Constant expressions fire once, one-time
    /// expressions deregister after stabilizing to a defined value, and
    /// expressions with an input set re-evaluate only when an input
    /// changes.
    pub fn watch(
        &self,
        expr: &str,
        listener: impl Fn(&Value, &Value, &Scope) + 'static,
        by_value: bool,
    ) -> EvalResult<WatchHandle> {
        let compiled = self.inner.compiler.compile(expr)?;
        Ok(self.watch_compiled(compiled, Rc::new(listener), by_value))
    }

    /// Watch a precompiled expression.
    pub fn watch_compiled(
        &self,
        compiled: Rc<CompiledExpression>,
        listener: ListenerFn,
        by_value: bool,
    ) -> WatchHandle {
        if compiled.is_constant() {
            return self.constant_watch(compiled, listener, by_value);
        }
        if compiled.is_one_time() {
            return self.one_time_watch(compiled, listener, by_value);
        }
        self.register_watcher(compiled_watch_fn(compiled), Some(listener), by_value)
    }

    fn register_watcher(
        &self,
        watch: WatchFn,
        listener: Option<ListenerFn>,
        by_value: bool,
    ) -> WatchHandle {
        let id = self.inner.next_watch_id.get();
        self.inner.next_watch_id.set(id + 1);
        self.inner.watchers.borrow_mut().push(Some(Watcher {
            id,
            watch,
            listener,
            by_value,
            last: RefCell::new(LastValue::Unseen),
        }));
        // A fresh watcher defeats the short-circuit until it has been seen.
        self.inner.last_dirty.set(None);
        WatchHandle {
            scope: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Live watcher count.
    pub fn watch_count(&self) -> usize {
        self.inner
            .watchers
            .borrow()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }

    // ------------------------------------------------------------------
    // Watch delegates
    // ------------------------------------------------------------------

    /// A constant expression can never change again: dispatch once, then
    /// self-deregister.
    fn constant_watch(
        &self,
        compiled: Rc<CompiledExpression>,
        listener: ListenerFn,
        by_value: bool,
    ) -> WatchHandle {
        let slot: Rc<RefCell<Option<WatchHandle>>> = Rc::new(RefCell::new(None));
        let slot_in = slot.clone();
        let wrapped: ListenerFn = Rc::new(move |value, previous, scope| {
            listener(value, previous, scope);
            if let Some(handle) = slot_in.borrow_mut().take() {
                handle.deregister();
            }
        });
        let handle = self.register_watcher(compiled_watch_fn(compiled), Some(wrapped), by_value);
        *slot.borrow_mut() = Some(handle.clone());
        handle
    }

    /// A one-time expression deregisters once its value is defined and
    /// still defined after the digest settles. Literal one-time
    /// expressions wait until every element is defined.
    fn one_time_watch(
        &self,
        compiled: Rc<CompiledExpression>,
        listener: ListenerFn,
        by_value: bool,
    ) -> WatchHandle {
        let literal = compiled.is_literal();
        let settled = move |value: &Value| {
            if literal {
                all_defined(value)
            } else {
                !value.is_undefined()
            }
        };

        let slot: Rc<RefCell<Option<WatchHandle>>> = Rc::new(RefCell::new(None));
        let last_value = Rc::new(RefCell::new(Value::Undefined));
        let slot_in = slot.clone();
        let last_in = last_value.clone();
        let wrapped: ListenerFn = Rc::new(move |value, previous, scope| {
            *last_in.borrow_mut() = value.clone();
            listener(value, previous, scope);
            if settled(value) {
                let slot = slot_in.clone();
                let last = last_in.clone();
                let settled = settled.clone();
                scope.post_digest(move |_| {
                    if settled(&last.borrow()) {
                        if let Some(handle) = slot.borrow_mut().take() {
                            handle.deregister();
                        }
                    }
                });
            }
        });
        let handle = self.register_watcher(compiled_watch_fn(compiled), Some(wrapped), by_value);
        *slot.borrow_mut() = Some(handle.clone());
        handle
    }

    // ------------------------------------------------------------------
    // Watch groups
    // ------------------------------------------------------------------

    /// Watch several expressions as one composite. The listener receives
    /// per-member value arrays and runs at most once per digest. An empty
    /// expression list dispatches exactly once with two empty arrays,
    /// unless deregistered before the next digest.
    pub fn watch_group(
        &self,
        exprs: &[&str],
        listener: impl Fn(&[Value], &[Value], &Scope) + 'static,
    ) -> EvalResult<WatchGroupHandle> {
        let listener: GroupListenerFn = Rc::new(listener);
        let active = Rc::new(Cell::new(true));

        if exprs.is_empty() {
            let active_in = active.clone();
            let listener_in = listener.clone();
            self.eval_async(move |scope| {
                if active_in.get() {
                    listener_in(&[], &[], scope);
                }
            });
            return Ok(WatchGroupHandle {
                handles: Vec::new(),
                active,
            });
        }

        struct GroupState {
            new_values: Vec<Value>,
            old_values: Vec<Value>,
            first_run: bool,
            scheduled: bool,
        }
        let state = Rc::new(RefCell::new(GroupState {
            new_values: vec![Value::Undefined; exprs.len()],
            old_values: vec![Value::Undefined; exprs.len()],
            first_run: true,
            scheduled: false,
        }));

        if exprs.len() == 1 {
            // A single member needs no coalescing.
            let state_in = state.clone();
            let listener_in = listener.clone();
            let handle = self.watch(
                exprs[0],
                move |value, previous, scope| {
                    let (new_values, old_values, first_run) = {
                        let mut state = state_in.borrow_mut();
                        state.new_values[0] = value.clone();
                        state.old_values[0] = previous.clone();
                        let first_run = state.first_run;
                        state.first_run = false;
                        (state.new_values.clone(), state.old_values.clone(), first_run)
                    };
                    if first_run {
                        listener_in(&new_values, &new_values, scope);
                    } else {
                        listener_in(&new_values, &old_values, scope);
                    }
                },
                false,
            )?;
            return Ok(WatchGroupHandle {
                handles: vec![handle],
                active,
            });
        }

        let mut handles = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            let state_in = state.clone();
            let listener_in = listener.clone();
            handles.push(self.watch(
                expr,
                move |value, previous, scope| {
                    let schedule = {
                        let mut state = state_in.borrow_mut();
                        state.new_values[i] = value.clone();
                        state.old_values[i] = previous.clone();
                        if state.scheduled {
                            false
                        } else {
                            state.scheduled = true;
                            true
                        }
                    };
                    if schedule {
                        let state = state_in.clone();
                        let listener = listener_in.clone();
                        scope.eval_async(move |scope| {
                            let (new_values, old_values, first_run) = {
                                let mut state = state.borrow_mut();
                                state.scheduled = false;
                                let first_run = state.first_run;
                                state.first_run = false;
                                (
                                    state.new_values.clone(),
                                    state.old_values.clone(),
                                    first_run,
                                )
                            };
                            if first_run {
                                listener(&new_values, &new_values, scope);
                            } else {
                                listener(&new_values, &old_values, scope);
                            }
                        });
                    }
                },
                false,
            )?);
        }
        Ok(WatchGroupHandle { handles, active })
    }

    // ------------------------------------------------------------------
    // Eval / apply
    // ------------------------------------------------------------------

    /// Run a closure against the scope synchronously.
    pub fn eval<R>(&self, f: impl FnOnce(&Scope) -> R) -> R {
        f(self)
    }

    /// Evaluate an expression against the scope data.
    pub fn eval_expr(&self, expr: &str) -> EvalResult<Value> {
        self.eval_expr_with(expr, None)
    }

    /// Evaluate an expression with locals layered over the scope data.
    pub fn eval_expr_with(&self, expr: &str, locals: Option<&Value>) -> EvalResult<Value> {
        let compiled = self.inner.compiler.compile(expr)?;
        compiled.eval(&self.value(), locals)
    }

    /// Run a mutation and digest afterwards. Called while a digest or
    /// apply is already running, the closure runs inline and the
    /// enclosing phase keeps control of the final digest.
    pub fn apply(&self, f: impl FnOnce(&Scope)) -> Result<(), DigestError> {
        if self.inner.phase.get() != Phase::None {
            f(self);
            return Ok(());
        }
        self.inner.phase.set(Phase::Apply);
        f(self);
        self.inner.phase.set(Phase::None);
        self.digest()
    }

    /// Evaluate an expression and digest afterwards. Evaluation errors go
    /// to the exception handler; the digest always runs.
    pub fn apply_expr(&self, expr: &str) -> Result<Value, DigestError> {
        if self.inner.phase.get() != Phase::None {
            return Ok(self.eval_and_log(expr));
        }
        self.inner.phase.set(Phase::Apply);
        let value = self.eval_and_log(expr);
        self.inner.phase.set(Phase::None);
        self.digest()?;
        Ok(value)
    }

    fn eval_and_log(&self, expr: &str) -> Value {
        match self.eval_expr(expr) {
            Ok(value) => value,
            Err(err) => {
                self.handle_exception(&err);
                Value::Undefined
            }
        }
    }

    // ------------------------------------------------------------------
    // Async queues
    // ------------------------------------------------------------------

    /// Queue a closure to run inside the current digest, or a deferred
    /// one when none is running.
    pub fn eval_async(&self, f: impl FnOnce(&Scope) + 'static) {
        self.enqueue_async(Task::Closure(Box::new(f)));
    }

    /// Queue an expression the same way. Compilation errors surface
    /// immediately.
    pub fn eval_async_expr(&self, expr: &str) -> EvalResult<()> {
        let compiled = self.inner.compiler.compile(expr)?;
        self.enqueue_async(Task::Expr(compiled));
        Ok(())
    }

    fn enqueue_async(&self, task: Task) {
        let schedule = self.inner.phase.get() == Phase::None
            && self.inner.async_queue.borrow().is_empty()
            && self.inner.apply_async_handle.get().is_none();
        self.inner.async_queue.borrow_mut().push_back(task);
        if schedule {
            let scope = self.clone();
            self.inner.scheduler.schedule(Box::new(move || {
                if !scope.inner.async_queue.borrow().is_empty() {
                    if let Err(err) = scope.digest() {
                        log::error!("deferred digest failed: {}", err);
                    }
                }
            }));
        }
    }

    /// Queue a closure to run in a future apply. Consecutive calls
    /// coalesce into a single apply/digest cycle.
    pub fn apply_async(&self, f: impl FnOnce(&Scope) + 'static) {
        self.enqueue_apply_async(Task::Closure(Box::new(f)));
    }

    /// Queue an expression the same way.
    pub fn apply_async_expr(&self, expr: &str) -> EvalResult<()> {
        let compiled = self.inner.compiler.compile(expr)?;
        self.enqueue_apply_async(Task::Expr(compiled));
        Ok(())
    }

    fn enqueue_apply_async(&self, task: Task) {
        self.inner.apply_async_queue.borrow_mut().push_back(task);
        if self.inner.apply_async_handle.get().is_none() {
            let scope = self.clone();
            let id = self.inner.scheduler.schedule(Box::new(move || {
                scope.inner.apply_async_handle.set(None);
                let result = scope.apply(|s| s.flush_apply_async());
                if let Err(err) = result {
                    log::error!("apply_async flush failed: {}", err);
                }
            }));
            self.inner.apply_async_handle.set(Some(id));
        }
    }

    fn flush_apply_async(&self) {
        loop {
            let task = self.inner.apply_async_queue.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    if let Err(err) = task.run(self) {
                        self.handle_exception(&err);
                    }
                }
                None => break,
            }
        }
    }

    /// Queue a closure to run once after the next digest settles.
    pub fn post_digest(&self, f: impl FnOnce(&Scope) + 'static) {
        self.inner.post_digest_queue.borrow_mut().push_back(Box::new(f));
    }

    // ------------------------------------------------------------------
    // Digest
    // ------------------------------------------------------------------

    /// Poll all watchers until stable. Fails with [`DigestError::TtlExceeded`]
    /// when the set keeps changing past the iteration bound, and with
    /// [`DigestError::InProgress`] when called re-entrantly.
    pub fn digest(&self) -> Result<(), DigestError> {
        match self.inner.phase.get() {
            Phase::None => {}
            phase => return Err(DigestError::in_progress(phase.name())),
        }
        self.inner.phase.set(Phase::Digest);

        // A scheduled apply_async flush folds into this digest.
        if let Some(handle) = self.inner.apply_async_handle.take() {
            self.inner.scheduler.cancel(handle);
            self.flush_apply_async();
        }

        // Compact tombstones left by earlier deregistrations.
        self.inner.watchers.borrow_mut().retain(Option::is_some);

        let result = self.digest_loop();
        self.inner.phase.set(Phase::None);
        result?;

        loop {
            let task = self.inner.post_digest_queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(self),
                None => break,
            }
        }
        Ok(())
    }

    fn digest_loop(&self) -> Result<(), DigestError> {
        let inner = &*self.inner;
        inner.last_dirty.set(None);
        let mut ttl = TTL;

        loop {
            // Drain deferred evals before each watcher pass.
            loop {
                let task = inner.async_queue.borrow_mut().pop_front();
                match task {
                    Some(task) => {
                        if let Err(err) = task.run(self) {
                            self.handle_exception(&err);
                        }
                    }
                    None => break,
                }
            }

            let mut dirty = false;
            // Watchers registered during this pass run in the next one.
            let pass_len = inner.watchers.borrow().len();

            'pass: for index in 0..pass_len {
                let entry = {
                    let watchers = inner.watchers.borrow();
                    watchers[index].as_ref().map(|w| {
                        (w.id, w.watch.clone(), w.listener.clone(), w.by_value)
                    })
                };
                let Some((id, watch, listener, by_value)) = entry else {
                    continue;
                };

                let value = match watch(self) {
                    Ok(value) => value,
                    Err(err) => {
                        self.handle_exception(&err);
                        continue;
                    }
                };

                // Re-check the slot: the watcher may have deregistered
                // itself during its own watch function.
                enum Verdict {
                    Dirty(Value),
                    Clean,
                    Vanished,
                }
                let verdict = {
                    let watchers = inner.watchers.borrow();
                    match &watchers[index] {
                        Some(watcher) if watcher.id == id => {
                            let mut last = watcher.last.borrow_mut();
                            let is_dirty = match &*last {
                                LastValue::Unseen => true,
                                LastValue::Seen(prev) => changed(&value, prev, by_value),
                            };
                            if is_dirty {
                                let snapshot = if by_value {
                                    value.deep_clone()
                                } else {
                                    value.clone()
                                };
                                match std::mem::replace(&mut *last, LastValue::Seen(snapshot)) {
                                    LastValue::Unseen => Verdict::Dirty(value.clone()),
                                    LastValue::Seen(prev) => Verdict::Dirty(prev),
                                }
                            } else {
                                Verdict::Clean
                            }
                        }
                        _ => Verdict::Vanished,
                    }
                };

                match verdict {
                    Verdict::Dirty(previous) => {
                        dirty = true;
                        inner.last_dirty.set(Some(id));
                        if let Some(listener) = listener {
                            listener(&value, &previous, self);
                        }
                    }
                    Verdict::Clean => {
                        // Nothing past the last dirty watcher changed in
                        // the previous pass; the tail is already stable.
                        if inner.last_dirty.get() == Some(id) {
                            dirty = false;
                            break 'pass;
                        }
                    }
                    Verdict::Vanished => {}
                }
            }

            if !dirty && inner.async_queue.borrow().is_empty() {
                return Ok(());
            }
            ttl -= 1;
            if ttl == 0 {
                return Err(DigestError::ttl_exceeded(TTL));
            }
        }
    }

    fn handle_exception(&self, err: &ExprError) {
        let handler = self.inner.exception_handler.borrow().clone();
        handler(err);
    }
}

/// Watch function evaluating a compiled expression against the scope.
///
/// When the expression exposes an input set, the inputs are polled under
/// reference equality (with the NaN exception) and the full expression
/// re-evaluates only when one of them moved; the cached result keeps its
/// identity in between, so literal containers stay stable across passes.
fn compiled_watch_fn(compiled: Rc<CompiledExpression>) -> WatchFn {
    let inputs: Vec<Rc<CompiledExpression>> = match compiled.inputs() {
        Some(inputs) => inputs.to_vec(),
        None => return Rc::new(move |scope| compiled.eval(&scope.value(), None)),
    };
    let seen: RefCell<Vec<Option<Value>>> = RefCell::new(vec![None; inputs.len()]);
    let result = RefCell::new(Value::Undefined);

    Rc::new(move |scope| {
        let scope_value = scope.value();
        let mut changed = false;
        {
            let mut seen = seen.borrow_mut();
            for (i, input) in inputs.iter().enumerate() {
                let value = input.eval(&scope_value, None)?;
                let moved = match &seen[i] {
                    None => true,
                    Some(prev) => !(value.strict_eq(prev) || (value.is_nan() && prev.is_nan())),
                };
                if moved {
                    changed = true;
                    seen[i] = Some(value);
                }
            }
        }
        if changed {
            *result.borrow_mut() = compiled.eval(&scope_value, None)?;
        }
        Ok(result.borrow().clone())
    })
}

/// Whether a watcher value moved since the last snapshot.
fn changed(value: &Value, prev: &Value, by_value: bool) -> bool {
    if by_value {
        !value.deep_eq(prev)
    } else {
        // Reference comparison, except two NaNs count as stable.
        !(value.strict_eq(prev) || (value.is_nan() && prev.is_nan()))
    }
}

/// A literal one-time binding settles when every element is defined.
fn all_defined(value: &Value) -> bool {
    match value {
        Value::Undefined => false,
        Value::Array(arr) => arr.borrow().iter().all(|v| !v.is_undefined()),
        Value::Object(obj) => obj.borrow().values().all(|v| !v.is_undefined()),
        _ => true,
    }
}
