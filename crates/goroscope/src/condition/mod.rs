//! Boolean conditions over an entry's derived properties.
//!
//! ```text
//! duration > 10 && state == 'select'
//! contains(lower(trace), "handlestream")
//! dups >= 2 || trace =~ 'net/http\.\(\*conn\)'
//! ```
//!
//! Properties: `id`, `dups`, `duration`, `lines` (integers) and `state`,
//! `trace` (strings). Functions: `contains(s, sub)`, `lower(s)`, `upper(s)`.

mod lexer;
mod parser;

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

pub use parser::{BinaryOp, Expr, UnaryOp};

use crate::entry::Entry;
use crate::error::EvalError;

/// Entry property a condition can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Id,
    Dups,
    Duration,
    Lines,
    State,
    Trace,
}

impl Property {
    pub const ALL: [Property; 6] = [
        Self::Id,
        Self::Dups,
        Self::Duration,
        Self::Lines,
        Self::State,
        Self::Trace,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Dups => "dups",
            Self::Duration => "duration",
            Self::Lines => "lines",
            Self::State => "state",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Contains,
    Lower,
    Upper,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Self::Contains),
            "lower" => Some(Self::Lower),
            "upper" => Some(Self::Upper),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Lower => "lower",
            Self::Upper => "upper",
        }
    }

    fn check_arity(self, got: usize) -> Result<(), &'static str> {
        match (self, got) {
            (Self::Contains, 2) | (Self::Lower, 1) | (Self::Upper, 1) => Ok(()),
            (Self::Contains, _) => Err("contains() accepts exactly two arguments"),
            (Self::Lower, _) => Err("lower() accepts exactly one argument"),
            (Self::Upper, _) => Err("upper() accepts exactly one argument"),
        }
    }
}

/// Runtime value of a (sub)expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Int(i64),
    Str(Cow<'a, str>),
    Bool(bool),
}

impl Value<'_> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Property table of one entry.
///
/// Counters are kept as captured and only converted to the language's
/// integer type when a condition reads them, so an out-of-range id fails
/// `id == 1` but not `state == 'running'`.
#[derive(Debug, Clone, Copy)]
pub struct Properties<'a> {
    pub id: u64,
    pub dups: u64,
    pub duration: u64,
    pub lines: u64,
    pub state: &'a str,
    pub trace: &'a str,
}

impl<'a> Properties<'a> {
    pub fn of(entry: &'a Entry) -> Self {
        Self {
            id: entry.id(),
            dups: entry.duplicate_count() as u64,
            duration: entry.wait_minutes(),
            lines: entry.line_count() as u64,
            state: entry.state(),
            trace: entry.trace_text(),
        }
    }

    pub fn get(&self, property: Property) -> Result<Value<'a>, EvalError> {
        let int = |value: u64| {
            i64::try_from(value).map(Value::Int).map_err(|_| {
                EvalError::new(format!(
                    "{} value {value} does not fit an integer",
                    property.name()
                ))
            })
        };
        match property {
            Property::Id => int(self.id),
            Property::Dups => int(self.dups),
            Property::Duration => int(self.duration),
            Property::Lines => int(self.lines),
            Property::State => Ok(Value::Str(Cow::Borrowed(self.state))),
            Property::Trace => Ok(Value::Str(Cow::Borrowed(self.trace))),
        }
    }
}

/// A compiled condition.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Compiles `source`. Double quotes wrapping the whole condition, as
    /// left over from shell quoting, are dropped.
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let source = strip_outer_quotes(source.trim());
        let expr = parser::parse(source)?;
        Ok(Self {
            source: source.to_owned(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluates against `entry`; the result must be a boolean.
    pub fn evaluate(&self, entry: &Entry) -> Result<bool, EvalError> {
        self.evaluate_properties(&Properties::of(entry))
    }

    pub fn evaluate_properties(&self, props: &Properties<'_>) -> Result<bool, EvalError> {
        match eval(&self.expr, props)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(format!(
                "condition must return a boolean, got {} {other}",
                other.type_name()
            ))),
        }
    }
}

impl FromStr for Condition {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn strip_outer_quotes(source: &str) -> &str {
    match source
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) if !inner.contains('"') => inner,
        _ => source,
    }
}

fn eval<'a>(expr: &'a Expr, props: &Properties<'a>) -> Result<Value<'a>, EvalError> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Str(v) => Ok(Value::Str(Cow::Borrowed(v.as_str()))),
        Expr::Bool(v) => Ok(Value::Bool(*v)),
        Expr::Property(p) => props.get(*p),
        Expr::Unary { op, expr } => match (op, eval(expr, props)?) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(v)) => v
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::new("integer overflow")),
            (UnaryOp::Not, other) => Err(EvalError::new(format!(
                "'!' needs a boolean, got {}",
                other.type_name()
            ))),
            (UnaryOp::Neg, other) => Err(EvalError::new(format!(
                "'-' needs an integer, got {}",
                other.type_name()
            ))),
        },
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, props),
        Expr::Call { func, args } => eval_call(*func, args, props),
        Expr::Match {
            expr,
            pattern,
            negated,
        } => match eval(expr, props)? {
            Value::Str(s) => Ok(Value::Bool(pattern.is_match(&s) != *negated)),
            other => Err(EvalError::new(format!(
                "regex match needs a string, got {}",
                other.type_name()
            ))),
        },
    }
}

fn eval_binary<'a>(
    op: BinaryOp,
    left: &'a Expr,
    right: &'a Expr,
    props: &Properties<'a>,
) -> Result<Value<'a>, EvalError> {
    // short-circuit before touching the right side
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let lhs = expect_bool(op, eval(left, props)?)?;
        if (op == BinaryOp::And) != lhs {
            return Ok(Value::Bool(lhs));
        }
        return Ok(Value::Bool(expect_bool(op, eval(right, props)?)?));
    }

    let lhs = eval(left, props)?;
    let rhs = eval(right, props)?;
    match (op, lhs, rhs) {
        (BinaryOp::Eq, l, r) => same_type(op, &l, &r).map(|()| Value::Bool(l == r)),
        (BinaryOp::Ne, l, r) => same_type(op, &l, &r).map(|()| Value::Bool(l != r)),
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, l, r) => {
            let ordering = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a.cmp(b),
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => return Err(type_mismatch(op, &l, &r)),
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            Ok(Value::Str(Cow::Owned(format!("{a}{b}"))))
        }
        (_, Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                    return Err(EvalError::new("division by zero"));
                }
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Int)
                .ok_or_else(|| EvalError::new("integer overflow"))
        }
        (_, l, r) => Err(type_mismatch(op, &l, &r)),
    }
}

fn eval_call<'a>(
    func: Function,
    args: &'a [Expr],
    props: &Properties<'a>,
) -> Result<Value<'a>, EvalError> {
    func.check_arity(args.len()).map_err(EvalError::new)?;
    let mut strings = Vec::with_capacity(args.len());
    for arg in args {
        match eval(arg, props)? {
            Value::Str(s) => strings.push(s),
            other => {
                return Err(EvalError::new(format!(
                    "{}() accepts only string arguments, got {}",
                    func.name(),
                    other.type_name()
                )));
            }
        }
    }
    Ok(match func {
        Function::Contains => Value::Bool(strings[0].contains(&*strings[1])),
        Function::Lower => Value::Str(Cow::Owned(strings[0].to_lowercase())),
        Function::Upper => Value::Str(Cow::Owned(strings[0].to_uppercase())),
    })
}

fn expect_bool(op: BinaryOp, value: Value<'_>) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::new(format!(
            "'{}' needs boolean operands, got {}",
            op.symbol(),
            other.type_name()
        ))),
    }
}

fn same_type(op: BinaryOp, l: &Value<'_>, r: &Value<'_>) -> Result<(), EvalError> {
    if std::mem::discriminant(l) == std::mem::discriminant(r) {
        Ok(())
    } else {
        Err(type_mismatch(op, l, r))
    }
}

fn type_mismatch(op: BinaryOp, l: &Value<'_>, r: &Value<'_>) -> EvalError {
    EvalError::new(format!(
        "cannot apply '{}' to {} and {}",
        op.symbol(),
        l.type_name(),
        r.type_name()
    ))
}
