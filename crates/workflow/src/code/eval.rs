//! Tree-walking evaluator for parsed code blocks.
//!
//! Values are plain JSON values. Integers and floats stay distinct; `/`
//! always produces a float while `//` and `%` floor like Python's.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use super::parser::{BUILTINS, BinOp, CmpOp, Expr, Line, Stmt};
use super::{CodeError, MAX_DEPTH, MAX_ELEMENTS, MAX_STRING_LEN, MAX_TOTAL_SIZE};

enum Fault {
    Runtime(String),
    Limit(String),
}

impl Fault {
    fn at(self, line: usize) -> CodeError {
        match self {
            Fault::Runtime(message) => CodeError::Runtime { line, message },
            Fault::Limit(message) => CodeError::Limit(message),
        }
    }
}

type Eval<T> = Result<T, Fault>;

fn runtime<T>(message: impl Into<String>) -> Eval<T> {
    Err(Fault::Runtime(message.into()))
}

pub(super) fn run(program: &[Line]) -> Result<Map<String, Value>, CodeError> {
    let mut scope = Scope::default();
    for line in program {
        exec(&line.stmt, &mut scope).map_err(|fault| fault.at(line.line))?;
    }
    Ok(scope.values)
}

/// Variable bindings of one block, with the combined size of everything bound.
#[derive(Default)]
struct Scope {
    values: Map<String, Value>,
    sizes: HashMap<String, usize>,
    total: usize,
}

impl Scope {
    fn bind(&mut self, name: &str, value: Value) -> Eval<()> {
        let size = weight(&value);
        let previous = self.sizes.insert(name.to_string(), size).unwrap_or(0);
        self.total = self.total - previous + size;
        if self.total > MAX_TOTAL_SIZE {
            return Err(oversized());
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }
}

fn exec(stmt: &Stmt, scope: &mut Scope) -> Eval<()> {
    match stmt {
        Stmt::Assign { target, op, value } => {
            let value = eval(value, &scope.values)?;
            let value = match op {
                None => value,
                Some(op) => {
                    let Some(current) = scope.values.get(target) else {
                        return runtime(format!("name '{target}' is not defined"));
                    };
                    binary(*op, current, &value)?
                }
            };
            scope.bind(target, value)?;
        }
        Stmt::Expr(expr) => {
            eval(expr, &scope.values)?;
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &Map<String, Value>) -> Eval<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => match scope.get(name) {
            Some(value) => Ok(value.clone()),
            None if BUILTINS.contains(&name.as_str()) => {
                runtime(format!("built-in '{name}' can only be called"))
            }
            None => runtime(format!("name '{name}' is not defined")),
        },
        Expr::List(items) => {
            let mut budget = Budget::default();
            let items = items
                .iter()
                .map(|e| {
                    let value = eval(e, scope)?;
                    budget.add(&value)?;
                    Ok(value)
                })
                .collect::<Eval<Vec<_>>>()?;
            list(items)
        }
        Expr::Dict(pairs) => {
            let mut budget = Budget::default();
            let mut map = Map::new();
            for (key, value) in pairs {
                let Value::String(key) = eval(key, scope)? else {
                    return runtime("dict keys must be strings");
                };
                let value = eval(value, scope)?;
                budget.add_key(&key)?;
                budget.add(&value)?;
                map.insert(key, value);
            }
            Ok(Value::Object(map))
        }
        Expr::Neg(inner) => {
            let value = eval(inner, scope)?;
            match num(&value) {
                Some(Num::Int(n)) => int(n.checked_neg()),
                Some(Num::Float(f)) => float(-f),
                None => runtime(format!("bad operand type for unary -: '{}'", type_name(&value))),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::And(left, right) => {
            let left = eval(left, scope)?;
            if truthy(&left) { eval(right, scope) } else { Ok(left) }
        }
        Expr::Or(left, right) => {
            let left = eval(left, scope)?;
            if truthy(&left) { Ok(left) } else { eval(right, scope) }
        }
        Expr::Binary(op, left, right) => binary(*op, &eval(left, scope)?, &eval(right, scope)?),
        Expr::Compare(op, left, right) => compare(*op, &eval(left, scope)?, &eval(right, scope)?),
        Expr::Index(target, index) => subscript(&eval(target, scope)?, &eval(index, scope)?),
        Expr::Call(name, args) => {
            let args = args.iter().map(|e| eval(e, scope)).collect::<Eval<Vec<_>>>()?;
            call(name, args)
        }
    }
}

// ── Numbers ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn num(value: &Value) -> Option<Num> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().map(Num::Int).or_else(|| n.as_f64().map(Num::Float))
}

fn int(n: Option<i64>) -> Eval<Value> {
    n.map(Value::from)
        .ok_or_else(|| Fault::Runtime("integer overflow".into()))
}

fn float(f: f64) -> Eval<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| Fault::Runtime("result is not a finite number".into()))
}

fn arith(op: BinOp, a: Num, b: Num) -> Eval<Value> {
    if matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) && b.as_f64() == 0.0 {
        return runtime("division by zero");
    }
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinOp::Add => int(x.checked_add(y)),
            BinOp::Sub => int(x.checked_sub(y)),
            BinOp::Mul => int(x.checked_mul(y)),
            BinOp::Div => float(x as f64 / y as f64),
            BinOp::FloorDiv => int(floor_div(x, y)),
            BinOp::Mod => int(floor_mod(x, y)),
        },
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            float(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::FloorDiv => (x / y).floor(),
                BinOp::Mod => x - y * (x / y).floor(),
            })
        }
    }
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn floor_mod(x: i64, y: i64) -> Option<i64> {
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        r.checked_add(y)
    } else {
        Some(r)
    }
}

// ── Operators ──────────────────────────────────────────────────────────────

fn binary(op: BinOp, left: &Value, right: &Value) -> Eval<Value> {
    match (op, left, right) {
        (BinOp::Add, Value::String(a), Value::String(b)) => text(format!("{a}{b}")),
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            if a.len() + b.len() > MAX_ELEMENTS {
                return too_many();
            }
            let mut budget = Budget::default();
            for item in a.iter().chain(b) {
                budget.add(item)?;
            }
            list(a.iter().chain(b).cloned().collect())
        }
        (BinOp::Mul, Value::String(s), other) | (BinOp::Mul, other, Value::String(s)) => {
            let times = repeat_count(other)?;
            if s.chars().count().saturating_mul(times) > MAX_STRING_LEN {
                return Err(Fault::Limit(format!(
                    "strings are limited to {MAX_STRING_LEN} characters"
                )));
            }
            Ok(Value::String(s.repeat(times)))
        }
        (BinOp::Mul, Value::Array(items), other) | (BinOp::Mul, other, Value::Array(items)) => {
            let times = repeat_count(other)?;
            if items.len().saturating_mul(times) > MAX_ELEMENTS {
                return too_many();
            }
            let inner: usize = items.iter().map(weight).fold(0, usize::saturating_add);
            if inner.saturating_mul(times).saturating_add(1) > MAX_TOTAL_SIZE {
                return Err(oversized());
            }
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::Array(out))
        }
        _ => match (num(left), num(right)) {
            (Some(a), Some(b)) => arith(op, a, b),
            _ => runtime(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op.symbol(),
                type_name(left),
                type_name(right)
            )),
        },
    }
}

fn repeat_count(value: &Value) -> Eval<usize> {
    match num(value) {
        Some(Num::Int(n)) => Ok(n.max(0) as usize),
        _ => runtime(format!(
            "can't multiply sequence by non-int of type '{}'",
            type_name(value)
        )),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Eval<Value> {
    let result = match op {
        CmpOp::Eq => equal(left, right),
        CmpOp::Ne => !equal(left, right),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Lt => order(left, right)? == Ordering::Less,
        CmpOp::Le => order(left, right)? != Ordering::Greater,
        CmpOp::Gt => order(left, right)? == Ordering::Greater,
        CmpOp::Ge => order(left, right)? != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

fn equal(left: &Value, right: &Value) -> bool {
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Eval<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (num(left), num(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| Fault::Runtime("cannot order non-finite numbers".into())),
            _ => runtime(format!(
                "cannot order '{}' and '{}'",
                type_name(left),
                type_name(right)
            )),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Eval<bool> {
    match (container, item) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Array(items), _) => Ok(items.iter().any(|v| equal(v, item))),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => runtime(format!(
            "'in' is not supported between '{}' and '{}'",
            type_name(item),
            type_name(container)
        )),
    }
}

fn subscript(target: &Value, index: &Value) -> Eval<Value> {
    match (target, index) {
        (Value::Array(items), _) => {
            let i = position(index, items.len())?;
            items
                .get(i)
                .cloned()
                .ok_or_else(|| Fault::Runtime("list index out of range".into()))
        }
        (Value::String(s), _) => {
            let i = position(index, s.chars().count())?;
            s.chars()
                .nth(i)
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| Fault::Runtime("string index out of range".into()))
        }
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| Fault::Runtime(format!("key '{key}' not found"))),
        _ => runtime(format!(
            "'{}' cannot be indexed by '{}'",
            type_name(target),
            type_name(index)
        )),
    }
}

/// Normalise a possibly negative index; out-of-range maps past the end.
fn position(index: &Value, len: usize) -> Eval<usize> {
    match num(index) {
        Some(Num::Int(i)) if i < 0 => Ok(len.checked_sub(i.unsigned_abs() as usize).unwrap_or(usize::MAX)),
        Some(Num::Int(i)) => Ok(i as usize),
        _ => runtime(format!("indices must be integers, not '{}'", type_name(index))),
    }
}

// ── Built-ins ──────────────────────────────────────────────────────────────

fn call(name: &str, args: Vec<Value>) -> Eval<Value> {
    match name {
        "len" => {
            let [value] = exactly::<1>(name, args)?;
            let n = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return runtime(format!("object of type '{}' has no len()", type_name(other))),
            };
            Ok(Value::from(n))
        }
        "range" => range(name, args),
        "sum" => {
            if args.is_empty() || args.len() > 2 {
                return runtime("sum() takes 1 or 2 arguments");
            }
            let mut args = args.into_iter();
            let items = iterable(name, args.next())?;
            let mut total = args.next().unwrap_or(Value::from(0));
            for item in &items {
                match (num(&total), num(item)) {
                    (Some(a), Some(b)) => total = arith(BinOp::Add, a, b)?,
                    _ => return runtime(format!("sum() cannot add '{}'", type_name(item))),
                }
            }
            Ok(total)
        }
        "min" | "max" => {
            let items = if args.len() == 1 {
                iterable(name, args.into_iter().next())?
            } else {
                args
            };
            let mut items = items.into_iter();
            let Some(mut best) = items.next() else {
                return runtime(format!("{name}() arg is an empty sequence"));
            };
            let wanted = if name == "min" { Ordering::Less } else { Ordering::Greater };
            for item in items {
                if order(&item, &best)? == wanted {
                    best = item;
                }
            }
            Ok(best)
        }
        "sorted" => {
            let [value] = exactly::<1>(name, args)?;
            let mut items = iterable(name, Some(value))?;
            for pair in items.windows(2) {
                order(&pair[0], &pair[1])?;
            }
            items.sort_by(|a, b| order(a, b).unwrap_or(Ordering::Equal));
            Ok(Value::Array(items))
        }
        other => runtime(format!("calling '{other}' is not allowed")),
    }
}

fn exactly<const N: usize>(name: &str, args: Vec<Value>) -> Eval<[Value; N]> {
    let count = args.len();
    args.try_into()
        .or_else(|_| runtime(format!("{name}() takes exactly {N} argument(s), got {count}")))
}

fn iterable(name: &str, value: Option<Value>) -> Eval<Vec<Value>> {
    match value {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => runtime(format!("{name}() expects a list, got '{}'", type_name(&other))),
        None => runtime(format!("{name}() expects a list")),
    }
}

fn range(name: &str, args: Vec<Value>) -> Eval<Value> {
    let ints = args
        .iter()
        .map(|v| match num(v) {
            Some(Num::Int(n)) => Ok(n),
            _ => runtime(format!("{name}() arguments must be integers")),
        })
        .collect::<Eval<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return runtime(format!("{name}() takes 1 to 3 arguments")),
    };
    if step == 0 {
        return runtime(format!("{name}() step must not be zero"));
    }

    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let count = if step > 0 && stop > start {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / -step + 1
    } else {
        0
    };
    if count > MAX_ELEMENTS as i128 {
        return too_many();
    }
    Ok(Value::Array(
        (0..count).map(|i| Value::from((start + i * step) as i64)).collect(),
    ))
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn list(items: Vec<Value>) -> Eval<Value> {
    if items.len() > MAX_ELEMENTS {
        return too_many();
    }
    Ok(Value::Array(items))
}

fn text(s: String) -> Eval<Value> {
    if s.chars().count() > MAX_STRING_LEN {
        return Err(Fault::Limit(format!(
            "strings are limited to {MAX_STRING_LEN} characters"
        )));
    }
    Ok(Value::String(s))
}

/// Running size and nesting of a container under construction.
struct Budget {
    size: usize,
    depth: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Budget { size: 1, depth: 1 }
    }
}

impl Budget {
    fn add(&mut self, value: &Value) -> Eval<()> {
        self.size = self.size.saturating_add(weight(value));
        self.depth = self.depth.max(1 + nesting(value));
        if self.depth > MAX_DEPTH {
            return Err(Fault::Limit(format!(
                "values nested deeper than {MAX_DEPTH} levels"
            )));
        }
        self.check()
    }

    fn add_key(&mut self, key: &str) -> Eval<()> {
        self.size = self.size.saturating_add(key.chars().count());
        self.check()
    }

    fn check(&self) -> Eval<()> {
        if self.size > MAX_TOTAL_SIZE {
            return Err(oversized());
        }
        Ok(())
    }
}

/// One unit per scalar or container plus one per character of every string
/// and object key. Every value reachable here already passed a `Budget`, so
/// the walk is bounded by `MAX_TOTAL_SIZE` and `MAX_DEPTH`.
fn weight(value: &Value) -> usize {
    match value {
        Value::String(s) => 1 + s.chars().count(),
        Value::Array(items) => items.iter().map(weight).fold(1, usize::saturating_add),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| key.chars().count().saturating_add(weight(value)))
            .fold(1, usize::saturating_add),
        _ => 1,
    }
}

fn nesting(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(nesting).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(nesting).max().unwrap_or(0),
        _ => 0,
    }
}

fn oversized() -> Fault {
    Fault::Limit(format!("values are limited to {MAX_TOTAL_SIZE} size units in total"))
}

fn too_many<T>() -> Eval<T> {
    Err(Fault::Limit(format!("lists are limited to {MAX_ELEMENTS} elements")))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => num(value).is_some_and(|n| n.as_f64() != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
