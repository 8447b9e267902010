//! Filter registry.
//!
//! Filters are named functions applied through the pipeline syntax
//! (`input | name:arg`). The registry maps names to filter functions;
//! factories run once at registration and the produced filter is cached.
//! A filter may be marked *stateful*, which tells the constness analysis
//! that its output can change even when its inputs do not.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::error::EvalResult;
use super::value::Value;

/// A registered filter function.
pub struct Filter {
    stateful: bool,
    func: Box<dyn Fn(&[Value]) -> EvalResult<Value>>,
}

impl Filter {
    /// Create a stateless filter. The first argument is the piped input,
    /// any further arguments follow.
    pub fn new(func: impl Fn(&[Value]) -> EvalResult<Value> + 'static) -> Self {
        Self {
            stateful: false,
            func: Box::new(func),
        }
    }

    /// Create a stateful filter: its output may change between calls with
    /// identical inputs, so it is re-evaluated every digest.
    pub fn stateful(func: impl Fn(&[Value]) -> EvalResult<Value> + 'static) -> Self {
        Self {
            stateful: true,
            func: Box::new(func),
        }
    }

    /// Whether the filter is stateful.
    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// Apply the filter.
    pub fn call(&self, args: &[Value]) -> EvalResult<Value> {
        (self.func)(args)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("stateful", &self.stateful)
            .finish()
    }
}

/// Factory producing a filter, run once at registration.
pub type FilterFactory = Box<dyn FnOnce() -> Filter>;

/// Name → filter mapping.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: RefCell<IndexMap<String, Rc<Filter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under `name`. The factory is invoked immediately
    /// and the produced filter cached; registering the same name again
    /// replaces the entry.
    pub fn register(&self, name: impl Into<String>, factory: impl FnOnce() -> Filter) {
        self.filters
            .borrow_mut()
            .insert(name.into(), Rc::new(factory()));
    }

    /// Register a batch of filters.
    pub fn register_many(&self, entries: impl IntoIterator<Item = (String, FilterFactory)>) {
        for (name, factory) in entries {
            self.register(name, factory);
        }
    }

    /// Look up a filter by name.
    pub fn filter(&self, name: &str) -> Option<Rc<Filter>> {
        self.filters.borrow().get(name).cloned()
    }

    /// Whether the named filter is stateful. Unknown names report stateful
    /// so the analysis never marks an unresolved filter constant;
    /// compilation rejects unknown names anyway.
    pub fn is_stateful(&self, name: &str) -> bool {
        self.filters
            .borrow()
            .get(name)
            .map(|f| f.is_stateful())
            .unwrap_or(true)
    }
}
