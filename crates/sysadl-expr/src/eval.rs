use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use sysadl_core::{parse_path, ErrorKind, SysadlError, Value};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::parser::parse_expression;
use crate::rng::{next_random_unit, seed_from_clock};

/// Name resolution for the evaluator. Unknown names resolve to `None`, which
/// evaluates to `null`.
pub trait Scope {
    fn resolve(&self, name: &str) -> Option<Value>;

    fn resolve_path(&self, segments: &[&str]) -> Option<Value> {
        let (root, rest) = segments.split_first()?;
        let value = self.resolve(root)?;
        walk(&value, rest).cloned()
    }
}

fn walk<'v>(value: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Map(entries) => entries.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves names against the root of a state snapshot; `state` aliases the
/// root itself.
#[derive(Debug, Clone, Copy)]
pub struct StateScope<'a> {
    pub state: &'a Value,
}

impl Scope for StateScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if name == "state" {
            return Some(self.state.clone());
        }
        self.state.get_path(name).cloned()
    }

    fn resolve_path(&self, segments: &[&str]) -> Option<Value> {
        match segments {
            ["state", rest @ ..] => walk(self.state, rest).cloned(),
            _ => walk(self.state, segments).cloned(),
        }
    }
}

/// Variables first, then `state.*`, then the state root.
#[derive(Debug, Clone, Copy)]
pub struct LayeredScope<'a> {
    pub variables: &'a BTreeMap<String, Value>,
    pub state: &'a Value,
}

impl Scope for LayeredScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        StateScope { state: self.state }.resolve(name)
    }

    fn resolve_path(&self, segments: &[&str]) -> Option<Value> {
        let (root, rest) = segments.split_first()?;
        if let Some(value) = self.variables.get(*root) {
            return walk(value, rest).cloned();
        }
        StateScope { state: self.state }.resolve_path(segments)
    }
}

pub struct Evaluator {
    cache: Mutex<HashMap<String, Arc<Expr>>>,
    rng_state: Mutex<u32>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_seed(seed_from_clock())
    }

    pub fn with_seed(seed: u32) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            rng_state: Mutex::new(seed),
        }
    }

    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, SysadlError> {
        if let Some(expr) = self.cache.lock().get(source) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(parse_expression(source)?);
        self.cache
            .lock()
            .insert(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    pub fn evaluate(&self, source: &str, scope: &dyn Scope) -> Result<Value, SysadlError> {
        let expr = self.compile(source)?;
        self.eval(&expr, scope).map_err(|detail| {
            SysadlError::new(
                ErrorKind::ExpressionEvaluationError,
                format!("Expression \"{}\" failed: {}", source, detail),
            )
        })
    }

    pub fn evaluate_condition(&self, source: &str, scope: &dyn Scope) -> Result<bool, SysadlError> {
        self.evaluate(source, scope).map(|value| value.is_truthy())
    }

    pub fn cached_expressions(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn eval(&self, expr: &Expr, scope: &dyn Scope) -> Result<Value, String> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Identifier(name) => Ok(scope.resolve(name).unwrap_or_default()),
            Expr::Member { object, property } => {
                if let Some(path) = expr.dotted_name() {
                    if let Some(value) = scope.resolve_path(&parse_path(&path)) {
                        return Ok(value);
                    }
                }
                let base = self.eval(object, scope)?;
                Ok(member(&base, property))
            }
            Expr::Index { object, index } => {
                let base = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                Ok(match (&base, &key) {
                    (Value::Array(items), Value::Number(position)) if *position >= 0.0 => items
                        .get(*position as usize)
                        .cloned()
                        .unwrap_or_default(),
                    (Value::Map(entries), key) => {
                        entries.get(&key.to_string()).cloned().unwrap_or_default()
                    }
                    _ => Value::Null,
                })
            }
            Expr::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call_builtin(callee, &values)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Negate => Value::Number(-value.to_number()),
                })
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = self.eval(left, scope)?;
                    if !left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval(right, scope)
                }
                BinaryOp::Or => {
                    let left = self.eval(left, scope)?;
                    if left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval(right, scope)
                }
                _ => {
                    let left = self.eval(left, scope)?;
                    let right = self.eval(right, scope)?;
                    Ok(apply_binary(*op, &left, &right))
                }
            },
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
        }
    }

    fn call_builtin(&self, callee: &str, args: &[Value]) -> Result<Value, String> {
        let name = callee.strip_prefix("Math.").unwrap_or(callee);
        let number = |index: usize| args.get(index).map(Value::to_number).unwrap_or(f64::NAN);
        let result = match name {
            "now" => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as f64)
                .unwrap_or_default(),
            "random" => next_random_unit(&mut self.rng_state.lock()),
            "abs" => number(0).abs(),
            "floor" => number(0).floor(),
            "ceil" => number(0).ceil(),
            "round" => (number(0) + 0.5).floor(),
            "sqrt" => number(0).sqrt(),
            "pow" => number(0).powf(number(1)),
            "min" => args
                .iter()
                .map(Value::to_number)
                .fold(f64::INFINITY, f64::min),
            "max" => args
                .iter()
                .map(Value::to_number)
                .fold(f64::NEG_INFINITY, f64::max),
            _ => return Err(format!("unknown function \"{}\"", callee)),
        };
        Ok(Value::Number(result))
    }
}

fn member(base: &Value, property: &str) -> Value {
    match base {
        Value::Map(entries) => entries.get(property).cloned().unwrap_or_default(),
        Value::Array(items) if property == "length" => Value::Number(items.len() as f64),
        Value::String(text) if property == "length" => Value::Number(text.chars().count() as f64),
        _ => Value::Null,
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Value::String(format!("{}{}", left, right))
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(left == right),
        BinaryOp::StrictNotEq => Value::Bool(left != right),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit"),
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => left.to_number() == right.to_number(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}
