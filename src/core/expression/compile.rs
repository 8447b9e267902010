//! AST → evaluator lowering.
//!
//! The compiler turns expression source into a reusable
//! [`CompiledExpression`]: a tree-walking evaluator over the program AST,
//! carrying the metadata the scope layer consumes (literal/constant flags,
//! the one-time marker, per-input sub-evaluators, and the synthetic
//! assignment program for writable expressions).
//!
//! Filters resolve eagerly at compile time; member names are vetted at
//! compile time where they are static and at evaluation time where they
//! are computed. Compiled evaluators are cached by source text.

use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashMap;
use indexmap::IndexMap;

use super::ast::{self, AstKind, AstNode, AstRef, BinaryOp, LogicalOp, UnaryOp};
use super::error::{EvalResult, ExprError};
use super::ops;
use super::parser;
use super::registry::{Filter, FilterRegistry};
use super::sandbox::{ensure_safe_function, ensure_safe_member_name, ensure_safe_object};
use super::value::{ArrayRef, ObjectRef, Value};

type FilterMap = FxHashMap<String, Rc<Filter>>;

/// Compiles expression source into cached evaluators.
pub struct Compiler {
    registry: Rc<FilterRegistry>,
    cache: RefCell<FxHashMap<String, Rc<CompiledExpression>>>,
}

impl Compiler {
    pub fn new(registry: Rc<FilterRegistry>) -> Self {
        Self {
            registry,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// The filter registry this compiler resolves against.
    pub fn registry(&self) -> &Rc<FilterRegistry> {
        &self.registry
    }

    /// Compile `text` into an evaluator, reusing a cached one when the
    /// same source was compiled before.
    pub fn compile(&self, text: &str) -> EvalResult<Rc<CompiledExpression>> {
        let key = text.trim();
        if let Some(hit) = self.cache.borrow().get(key) {
            return Ok(Rc::clone(hit));
        }
        let compiled = Rc::new(self.build(key)?);
        self.cache
            .borrow_mut()
            .insert(key.to_string(), Rc::clone(&compiled));
        Ok(compiled)
    }

    fn build(&self, source: &str) -> EvalResult<CompiledExpression> {
        let (one_time, body) = match source.strip_prefix("::") {
            Some(rest) => (true, rest),
            None => (false, source),
        };
        let program = parser::parse(body, &self.registry)?;

        let mut filters = FxHashMap::default();
        validate(&program, &self.registry, &mut filters)?;
        let filters = Rc::new(filters);

        let inputs: Vec<Rc<CompiledExpression>> = ast::inputs(&program)
            .into_iter()
            .map(|node| Rc::new(CompiledExpression::for_input(node, Rc::clone(&filters))))
            .collect();

        Ok(CompiledExpression {
            source: source.to_string(),
            one_time,
            literal: ast::is_literal(&program),
            constant: program.constant,
            assign_ast: ast::assignable_ast(&program),
            program,
            inputs,
            filters,
            inputs_stage: false,
        })
    }
}

/// A compiled, reusable evaluator.
pub struct CompiledExpression {
    source: String,
    one_time: bool,
    literal: bool,
    constant: bool,
    program: AstRef,
    inputs: Vec<Rc<CompiledExpression>>,
    assign_ast: Option<AstRef>,
    filters: Rc<FilterMap>,
    /// Input evaluators resolve identifiers against the scope only,
    /// bypassing locals.
    inputs_stage: bool,
}

impl CompiledExpression {
    fn for_input(node: AstRef, filters: Rc<FilterMap>) -> Self {
        Self {
            source: String::new(),
            one_time: false,
            literal: false,
            constant: node.constant,
            program: AstNode::program(vec![node]),
            inputs: Vec::new(),
            assign_ast: None,
            filters,
            inputs_stage: true,
        }
    }

    /// Evaluate against a scope and optional locals.
    pub fn eval(&self, scope: &Value, locals: Option<&Value>) -> EvalResult<Value> {
        let ctx = EvalCtx {
            scope,
            locals,
            value_param: None,
            skip_locals: self.inputs_stage,
            filters: &self.filters,
        };
        eval_node(&self.program, &ctx)
    }

    /// Assign `value` through the expression. A no-op returning undefined
    /// when the expression is not assignable.
    pub fn assign(&self, scope: &Value, value: Value, locals: Option<&Value>) -> EvalResult<Value> {
        match &self.assign_ast {
            Some(assign) => {
                let ctx = EvalCtx {
                    scope,
                    locals,
                    value_param: Some(&value),
                    skip_locals: false,
                    filters: &self.filters,
                };
                eval_node(assign, &ctx)
            }
            None => Ok(Value::Undefined),
        }
    }

    /// The source text the evaluator was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the program is a literal.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Whether the value depends only on the expression itself.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Whether the source carried the one-time (`::`) marker.
    pub fn is_one_time(&self) -> bool {
        self.one_time
    }

    /// Whether the expression can be assigned through.
    pub fn is_assignable(&self) -> bool {
        self.assign_ast.is_some()
    }

    /// Per-input sub-evaluators, when the input-set analysis found any.
    pub fn inputs(&self) -> Option<&[Rc<CompiledExpression>]> {
        if self.inputs.is_empty() {
            None
        } else {
            Some(&self.inputs)
        }
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("source", &self.source)
            .field("constant", &self.constant)
            .field("literal", &self.literal)
            .field("one_time", &self.one_time)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

/// Compile-time walk: vet static member names, resolve filters, and check
/// assignment targets.
fn validate(
    node: &AstRef,
    registry: &Rc<FilterRegistry>,
    filters: &mut FilterMap,
) -> EvalResult<()> {
    match &node.kind {
        AstKind::Program { body } => {
            for stmt in body {
                validate(stmt, registry, filters)?;
            }
        }
        AstKind::Literal { .. } | AstKind::ThisExpr | AstKind::ValueParameter => {}
        AstKind::Identifier { name } => ensure_safe_member_name(name)?,
        AstKind::ArrayExpr { elements } => {
            for element in elements {
                validate(element, registry, filters)?;
            }
        }
        AstKind::ObjectExpr { properties } => {
            for property in properties {
                validate(&property.value, registry, filters)?;
            }
        }
        AstKind::MemberNonComputed { object, property } => {
            ensure_safe_member_name(property)?;
            validate(object, registry, filters)?;
        }
        AstKind::MemberComputed { object, property } => {
            validate(object, registry, filters)?;
            validate(property, registry, filters)?;
        }
        AstKind::Call { callee, args } => {
            validate(callee, registry, filters)?;
            for arg in args {
                validate(arg, registry, filters)?;
            }
        }
        AstKind::Filter { name, args } => {
            match registry.filter(name) {
                Some(filter) => {
                    filters.insert(name.clone(), filter);
                }
                None => {
                    return Err(ExprError::compile(format!("unknown filter '{}'", name)));
                }
            }
            for arg in args {
                validate(arg, registry, filters)?;
            }
        }
        AstKind::Assignment { left, right } => {
            if !matches!(
                left.kind,
                AstKind::Identifier { .. }
                    | AstKind::MemberComputed { .. }
                    | AstKind::MemberNonComputed { .. }
            ) {
                return Err(ExprError::compile("assignment target is not assignable"));
            }
            validate(left, registry, filters)?;
            validate(right, registry, filters)?;
        }
        AstKind::Unary { arg, .. } => validate(arg, registry, filters)?,
        AstKind::Binary { left, right, .. } => {
            validate(left, registry, filters)?;
            validate(right, registry, filters)?;
        }
        AstKind::Logical { left, right, .. } => {
            validate(left, registry, filters)?;
            validate(right, registry, filters)?;
        }
        AstKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            validate(test, registry, filters)?;
            validate(consequent, registry, filters)?;
            validate(alternate, registry, filters)?;
        }
    }
    Ok(())
}

// ============================================================================
// Evaluation
// ============================================================================

struct EvalCtx<'a> {
    scope: &'a Value,
    locals: Option<&'a Value>,
    value_param: Option<&'a Value>,
    skip_locals: bool,
    filters: &'a FilterMap,
}

impl EvalCtx<'_> {
    /// Whether locals own the name under the current lookup rules.
    fn locals_own(&self, name: &str) -> bool {
        if self.skip_locals {
            return false;
        }
        matches!(self.locals, Some(Value::Object(map)) if map.borrow().contains_key(name))
    }

    /// The container an identifier resolves against: locals when they own
    /// the name, the scope otherwise.
    fn container_for(&self, name: &str) -> Value {
        if self.locals_own(name) {
            self.locals.cloned().expect("locals checked")
        } else {
            self.scope.clone()
        }
    }
}

fn eval_node(node: &AstRef, ctx: &EvalCtx) -> EvalResult<Value> {
    match &node.kind {
        AstKind::Program { body } => {
            let mut last = Value::Undefined;
            for stmt in body {
                last = eval_node(stmt, ctx)?;
            }
            Ok(last)
        }
        AstKind::Literal { value } => Ok(value.clone()),
        AstKind::ArrayExpr { elements } => {
            let mut out = Vec::with_capacity(elements.len());
            for element in elements {
                out.push(eval_node(element, ctx)?);
            }
            Ok(Value::array(out))
        }
        AstKind::ObjectExpr { properties } => {
            let mut out = IndexMap::with_capacity(properties.len());
            for property in properties {
                out.insert(property.key.clone(), eval_node(&property.value, ctx)?);
            }
            Ok(Value::object(out))
        }
        AstKind::Identifier { name } => {
            let container = ctx.container_for(name);
            ensure_safe_object(read_key(&container, name))
        }
        AstKind::ThisExpr => Ok(ctx.scope.clone()),
        AstKind::MemberNonComputed { object, property } => {
            let obj = eval_node(object, ctx)?;
            if obj.is_truthy() {
                ensure_safe_object(get_member(&obj, &Value::str(property.clone())))
            } else {
                Ok(Value::Undefined)
            }
        }
        AstKind::MemberComputed { object, property } => {
            let obj = eval_node(object, ctx)?;
            let key = eval_node(property, ctx)?;
            if let Value::Str(name) = &key {
                ensure_safe_member_name(name)?;
            }
            if obj.is_truthy() {
                ensure_safe_object(get_member(&obj, &key))
            } else {
                Ok(Value::Undefined)
            }
        }
        AstKind::Call { callee, args } => {
            let (target, receiver) = eval_callee(callee, ctx)?;
            let mut argv = Vec::with_capacity(args.len());
            for arg in args {
                argv.push(ensure_safe_object(eval_node(arg, ctx)?)?);
            }
            let receiver = ensure_safe_object(receiver)?;
            ensure_safe_function(&target)?;
            match &target {
                Value::Function(func) => {
                    let returned = func.call(receiver, &argv)?;
                    ensure_safe_object(returned)
                }
                // A missing or non-callable callee yields undefined.
                _ => Ok(Value::Undefined),
            }
        }
        AstKind::Filter { name, args } => {
            let filter = ctx
                .filters
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::compile(format!("unknown filter '{}'", name)))?;
            let mut argv = Vec::with_capacity(args.len());
            for arg in args {
                argv.push(eval_node(arg, ctx)?);
            }
            filter.call(&argv)
        }
        AstKind::Assignment { left, right } => {
            let value = ensure_safe_object(eval_node(right, ctx)?)?;
            if let Some(target) = resolve_target(left, ctx)? {
                store(target, value.clone());
            }
            Ok(value)
        }
        AstKind::Unary { op, arg } => {
            let value = eval_node(arg, ctx)?;
            Ok(match op {
                UnaryOp::Plus => ops::pos(value),
                UnaryOp::Minus => ops::neg(value),
                UnaryOp::Not => ops::not(value),
            })
        }
        AstKind::Binary { op, left, right } => {
            let lhs = eval_node(left, ctx)?;
            let rhs = eval_node(right, ctx)?;
            Ok(match op {
                BinaryOp::Add => ops::add(lhs, rhs),
                BinaryOp::Sub => ops::sub(lhs, rhs),
                BinaryOp::Mul => ops::mul(lhs, rhs),
                BinaryOp::Div => ops::div(lhs, rhs),
                BinaryOp::Rem => ops::rem(lhs, rhs),
                BinaryOp::Eq => ops::eq(&lhs, &rhs),
                BinaryOp::Neq => ops::neq(&lhs, &rhs),
                BinaryOp::StrictEq => ops::strict_eq(&lhs, &rhs),
                BinaryOp::StrictNeq => ops::strict_neq(&lhs, &rhs),
                BinaryOp::Lt => ops::lt(&lhs, &rhs),
                BinaryOp::Gt => ops::gt(&lhs, &rhs),
                BinaryOp::Le => ops::le(&lhs, &rhs),
                BinaryOp::Ge => ops::ge(&lhs, &rhs),
            })
        }
        AstKind::Logical { op, left, right } => {
            let lhs = eval_node(left, ctx)?;
            match op {
                LogicalOp::And => {
                    if lhs.is_truthy() {
                        eval_node(right, ctx)
                    } else {
                        Ok(lhs)
                    }
                }
                LogicalOp::Or => {
                    if lhs.is_truthy() {
                        Ok(lhs)
                    } else {
                        eval_node(right, ctx)
                    }
                }
            }
        }
        AstKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if eval_node(test, ctx)?.is_truthy() {
                eval_node(consequent, ctx)
            } else {
                eval_node(alternate, ctx)
            }
        }
        AstKind::ValueParameter => Ok(ctx.value_param.cloned().unwrap_or_default()),
    }
}

/// Evaluate a call's callee, yielding the callable and the receiver it is
/// bound to. Bare identifiers bind to their resolving container; member
/// calls bind to their object.
fn eval_callee(node: &AstRef, ctx: &EvalCtx) -> EvalResult<(Value, Value)> {
    match &node.kind {
        AstKind::Identifier { name } => {
            let container = ctx.container_for(name);
            let value = ensure_safe_object(read_key(&container, name))?;
            Ok((value, container))
        }
        AstKind::MemberNonComputed { object, property } => {
            let obj = eval_node(object, ctx)?;
            let value = if obj.is_truthy() {
                ensure_safe_object(get_member(&obj, &Value::str(property.clone())))?
            } else {
                Value::Undefined
            };
            Ok((value, obj))
        }
        AstKind::MemberComputed { object, property } => {
            let obj = eval_node(object, ctx)?;
            let key = eval_node(property, ctx)?;
            if let Value::Str(name) = &key {
                ensure_safe_member_name(name)?;
            }
            let value = if obj.is_truthy() {
                ensure_safe_object(get_member(&obj, &key))?
            } else {
                Value::Undefined
            };
            Ok((value, obj))
        }
        _ => Ok((eval_node(node, ctx)?, Value::Undefined)),
    }
}

/// Read a string key out of a container, or undefined.
fn read_key(container: &Value, key: &str) -> Value {
    match container {
        Value::Object(map) => map.borrow().get(key).cloned().unwrap_or_default(),
        _ => Value::Undefined,
    }
}

/// Dereference a member. Objects index by string key; arrays and strings
/// also answer numeric indices and `length`.
fn get_member(container: &Value, key: &Value) -> Value {
    match container {
        Value::Object(map) => map.borrow().get(&key.to_display()).cloned().unwrap_or_default(),
        Value::Array(arr) => {
            if matches!(key, Value::Str(s) if s == "length") {
                return Value::Number(arr.borrow().len() as f64);
            }
            match element_index(key, arr.borrow().len()) {
                Some(i) => arr.borrow()[i].clone(),
                None => Value::Undefined,
            }
        }
        Value::Str(s) => {
            if matches!(key, Value::Str(k) if k == "length") {
                return Value::Number(s.chars().count() as f64);
            }
            match element_index(key, s.chars().count()) {
                Some(i) => Value::Str(s.chars().nth(i).expect("index checked").to_string()),
                None => Value::Undefined,
            }
        }
        _ => Value::Undefined,
    }
}

/// A valid in-bounds element index, if the key is a non-negative integer.
fn element_index(key: &Value, len: usize) -> Option<usize> {
    let n = key.to_number();
    if n.fract() == 0.0 && n >= 0.0 && (n as usize) < len {
        Some(n as usize)
    } else {
        None
    }
}

/// A non-negative integer index usable for writes (may extend the array).
fn write_index(key: &Value) -> Option<usize> {
    let n = key.to_number();
    if n.fract() == 0.0 && n >= 0.0 && n <= u32::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

// ============================================================================
// Assignment targets and create-mode traversal
// ============================================================================

enum Target {
    ObjectKey(ObjectRef, String),
    ArrayIndex(ArrayRef, usize),
}

fn resolve_target(node: &AstRef, ctx: &EvalCtx) -> EvalResult<Option<Target>> {
    match &node.kind {
        AstKind::Identifier { name } => {
            let container = ctx.container_for(name);
            Ok(match container {
                Value::Object(map) => Some(Target::ObjectKey(map, name.clone())),
                _ => None,
            })
        }
        AstKind::MemberNonComputed { object, property } => {
            let obj = eval_create(object, ctx)?;
            Ok(target_in(&obj, &Value::str(property.clone())))
        }
        AstKind::MemberComputed { object, property } => {
            let obj = eval_create(object, ctx)?;
            let key = eval_node(property, ctx)?;
            if let Value::Str(name) = &key {
                ensure_safe_member_name(name)?;
            }
            Ok(target_in(&obj, &key))
        }
        _ => Err(ExprError::compile("assignment target is not assignable")),
    }
}

fn target_in(container: &Value, key: &Value) -> Option<Target> {
    match container {
        Value::Object(map) => Some(Target::ObjectKey(Rc::clone(map), key.to_display())),
        Value::Array(arr) => write_index(key).map(|i| Target::ArrayIndex(Rc::clone(arr), i)),
        _ => None,
    }
}

fn store(target: Target, value: Value) {
    match target {
        Target::ObjectKey(map, key) => {
            map.borrow_mut().insert(key, value);
        }
        Target::ArrayIndex(arr, index) => {
            let mut arr = arr.borrow_mut();
            if index >= arr.len() {
                arr.resize(index + 1, Value::Undefined);
            }
            arr[index] = value;
        }
    }
}

/// Evaluate a node on the left-hand side of an assignment, creating empty
/// objects at missing steps of the member chain.
fn eval_create(node: &AstRef, ctx: &EvalCtx) -> EvalResult<Value> {
    match &node.kind {
        AstKind::Identifier { name } => {
            let container = ctx.container_for(name);
            match &container {
                Value::Object(map) => {
                    let existing = map.borrow().get(name).cloned().unwrap_or_default();
                    if existing.is_truthy() {
                        ensure_safe_object(existing)
                    } else {
                        let fresh = Value::object(IndexMap::new());
                        map.borrow_mut().insert(name.clone(), fresh.clone());
                        Ok(fresh)
                    }
                }
                _ => Ok(Value::Undefined),
            }
        }
        AstKind::ThisExpr => Ok(ctx.scope.clone()),
        AstKind::MemberNonComputed { object, property } => {
            let obj = eval_create(object, ctx)?;
            vivify_member(&obj, &Value::str(property.clone()))
        }
        AstKind::MemberComputed { object, property } => {
            let obj = eval_create(object, ctx)?;
            let key = eval_node(property, ctx)?;
            if let Value::Str(name) = &key {
                ensure_safe_member_name(name)?;
            }
            vivify_member(&obj, &key)
        }
        _ => eval_node(node, ctx),
    }
}

fn vivify_member(container: &Value, key: &Value) -> EvalResult<Value> {
    match container {
        Value::Object(map) => {
            let key = key.to_display();
            let existing = map.borrow().get(&key).cloned().unwrap_or_default();
            if existing.is_truthy() {
                ensure_safe_object(existing)
            } else {
                let fresh = Value::object(IndexMap::new());
                map.borrow_mut().insert(key, fresh.clone());
                Ok(fresh)
            }
        }
        Value::Array(arr) => match write_index(key) {
            Some(index) => {
                {
                    let mut items = arr.borrow_mut();
                    if index >= items.len() {
                        items.resize(index + 1, Value::Undefined);
                    }
                }
                let existing = arr.borrow()[index].clone();
                if existing.is_truthy() {
                    ensure_safe_object(existing)
                } else {
                    let fresh = Value::object(IndexMap::new());
                    arr.borrow_mut()[index] = fresh.clone();
                    Ok(fresh)
                }
            }
            None => Ok(Value::Undefined),
        },
        other => Ok(get_member(other, key)),
    }
}
