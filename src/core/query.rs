//! Purpose: Compile and evaluate jq-style row predicates and update operations.
//! Exports: `RowQuery`, `RowUpdate`, `QueryValue`.
//! Role: Small adapter around `jaq-core` backing `Table::delete_rows` / `Table::update_rows`.
//! Invariants: Identifier-shaped column names are callable bare (`x > 1`).
//! Invariants: Parse/compile failures are usage errors; runtime eval errors count as "no match".
//! Invariants: A predicate must yield only booleans; an update must yield one object.
//! Invariants: Integer columns evaluate as exact `i64`; an update writes back only changed fields.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::ops::Math;
use jaq_core::path::Opt;
use jaq_core::{Compiler, Ctx, Error as JaqError, Native, RcIter, ValX};

use crate::core::column::ColumnMap;
use crate::core::error::{Error, ErrorKind};
use crate::core::table::{Row, RowOperation, RowPredicate};
use crate::core::types::{Family, Scalar};

type Filter = jaq_core::Filter<Native<QueryValue>>;

const RESERVED: &[&str] = &[
    "and", "or", "not", "if", "then", "elif", "else", "end", "as", "def", "reduce", "foreach",
    "try", "catch", "label", "import", "include", "true", "false", "null", "empty", "error",
];

/// Compiled row filter.
#[derive(Clone)]
pub struct RowQuery {
    expr: String,
    filter: Filter,
}

/// Compiled row update.
#[derive(Clone)]
pub struct RowUpdate {
    expr: String,
    filter: Filter,
}

impl fmt::Debug for RowQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowQuery").field("expr", &self.expr).finish()
    }
}

impl fmt::Debug for RowUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowUpdate").field("expr", &self.expr).finish()
    }
}

impl RowQuery {
    pub fn compile(expr: &str, columns: &ColumnMap) -> Result<Self, Error> {
        Ok(Self {
            expr: expr.to_string(),
            filter: compile(expr, columns, "query")?,
        })
    }
}

impl RowPredicate for RowQuery {
    fn matches(&self, row: &Row) -> Result<bool, Error> {
        let mut any_true = false;
        for item in eval(&self.filter, QueryValue::Obj(row_fields(row))) {
            match item {
                Some(QueryValue::Bool(true)) => any_true = true,
                Some(QueryValue::Bool(false)) => {}
                Some(other) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("query must yield booleans")
                        .with_hint(format!("`{}` yielded {other}", self.expr)));
                }
                None => return Ok(false),
            }
        }
        Ok(any_true)
    }
}

impl RowUpdate {
    pub fn compile(expr: &str, columns: &ColumnMap) -> Result<Self, Error> {
        Ok(Self {
            expr: expr.to_string(),
            filter: compile(expr, columns, "update")?,
        })
    }
}

impl RowOperation for RowUpdate {
    fn apply(&self, row: &mut Row) -> Result<(), Error> {
        let before = row_fields(row);
        let fields = match eval(&self.filter, QueryValue::Obj(before.clone())).into_iter().next() {
            Some(Some(QueryValue::Obj(fields))) => fields,
            Some(Some(other)) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("update must yield an object")
                    .with_hint(format!("`{}` yielded {other}", self.expr)));
            }
            Some(None) => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("update `{}` failed on row `{row}`", self.expr)));
            }
            None => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("update `{}` yielded nothing", self.expr)));
            }
        };
        for (name, value) in fields {
            if before.get(&name) == Some(&value) {
                continue;
            }
            let Some(pos) = row.columns().index_of(name.as_str()) else {
                continue;
            };
            let family = row.columns().column_at(pos)?.ty().family();
            let scalar = match (value, family) {
                (QueryValue::Int(n), Family::Numeric) => Scalar::Int(n),
                (QueryValue::Num(n), Family::Numeric) => Scalar::Float(n),
                (QueryValue::Bool(b), Family::Numeric) => Scalar::Int(i64::from(b)),
                (QueryValue::Str(s), Family::Text) => Scalar::Text(s),
                (other, _) => {
                    return Err(Error::new(ErrorKind::SchemaMismatch)
                        .with_message(format!("update assigned {other} to column `{name}`")));
                }
            };
            row.set_scalar(name.as_str(), scalar)?;
        }
        Ok(())
    }
}

/// Outputs of `filter` on `input`; runtime errors become `None`.
fn eval(filter: &Filter, input: QueryValue) -> Vec<Option<QueryValue>> {
    let inputs = RcIter::new(std::iter::empty::<Result<QueryValue, String>>());
    let outputs = filter
        .run((Ctx::new([], &inputs), input))
        .map(Result::ok)
        .collect();
    outputs
}

fn compile(expr: &str, columns: &ColumnMap, what: &str) -> Result<Filter, Error> {
    let code = with_column_defs(expr, columns);
    let arena = Arena::default();
    let loader = Loader::new(std::iter::empty());
    let program = File {
        code: code.as_str(),
        path: (),
    };
    let modules = loader
        .load(&arena, program)
        .map_err(|errs| compile_error(what, expr, errs))?;
    Compiler::default()
        .with_funs(jaq_std::base_funs::<QueryValue>())
        .compile(modules)
        .map_err(|errs| compile_error(what, expr, errs))
}

/// Prefix `expr` with `def <name>: .["<name>"];` for every identifier-shaped column.
fn with_column_defs(expr: &str, columns: &ColumnMap) -> String {
    let mut code = String::new();
    for column in columns {
        let name = column.name();
        if !is_identifier(name) || RESERVED.contains(&name) {
            continue;
        }
        code.push_str(&format!("def {name}: .[\"{name}\"]; "));
    }
    code.push_str(expr);
    code
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn compile_error<E: fmt::Debug>(what: &str, expr: &str, err: E) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("invalid {what} expression"))
        .with_hint(format!(
            "Failed to parse/compile `{expr}`.\nDetails: {err:?}\nExample: x > 1 and name == \"a\""
        ))
}

fn row_fields(row: &Row) -> BTreeMap<String, QueryValue> {
    row.iter()
        .map(|(column, value)| {
            let value = match value.scalar() {
                Some(Scalar::Int(v)) => QueryValue::Int(v),
                Some(Scalar::UInt(v)) => i64::try_from(v).map_or(QueryValue::Num(v as f64), QueryValue::Int),
                Some(Scalar::Float(v)) => QueryValue::Num(v),
                Some(Scalar::Text(v)) => QueryValue::Str(v),
                None => QueryValue::Null,
            };
            (column.name().to_string(), value)
        })
        .collect()
}

/// Document model evaluated by jaq: a row is an object of its column values.
#[derive(Clone, Debug)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    Arr(Vec<QueryValue>),
    Obj(BTreeMap<String, QueryValue>),
}

impl QueryValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Num(_) => 2,
            Self::Str(_) => 3,
            Self::Arr(_) => 4,
            Self::Obj(_) => 5,
        }
    }

    fn integer(&self) -> Result<isize, JaqError<Self>> {
        match self {
            Self::Int(n) => isize::try_from(*n).map_err(|_| JaqError::typ(self.clone(), "integer")),
            Self::Num(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as isize),
            other => Err(JaqError::typ(other.clone(), "integer")),
        }
    }

    fn float(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Exact integer arithmetic when both sides are integers and `int` succeeds; float otherwise.
    fn arith(
        self,
        rhs: Self,
        math: Math,
        int: fn(i64, i64) -> Option<i64>,
        float: fn(f64, f64) -> f64,
    ) -> Result<Self, JaqError<Self>> {
        if let (Self::Int(a), Self::Int(b)) = (&self, &rhs) {
            if let Some(exact) = int(*a, *b) {
                return Ok(Self::Int(exact));
            }
        }
        match (self.float(), rhs.float()) {
            (Some(a), Some(b)) => Ok(Self::Num(float(a, b))),
            _ => Err(JaqError::math(self, math, rhs)),
        }
    }
}

/// First output of a path callback, `null` when it yields nothing.
fn first_or_null<'a, I>(mut outputs: I) -> ValX<'a, QueryValue>
where
    I: Iterator<Item = ValX<'a, QueryValue>>,
{
    outputs.next().unwrap_or(Ok(QueryValue::Null))
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => match serde_json::to_string(s) {
                Ok(encoded) => write!(f, "{encoded}"),
                Err(_) => write!(f, "\"<invalid string>\""),
            },
            Self::Arr(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Obj(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{value}", Self::Str(key.clone()))?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<isize> for QueryValue {
    fn from(value: isize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl FromIterator<Self> for QueryValue {
    fn from_iter<T: IntoIterator<Item = Self>>(iter: T) -> Self {
        Self::Arr(iter.into_iter().collect())
    }
}

impl PartialEq for QueryValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueryValue {}

impl PartialOrd for QueryValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueryValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Num(_), Self::Int(_) | Self::Num(_)) => {
                match (self.float(), other.float()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => Ordering::Equal,
                }
            }
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => a.cmp(b),
            (Self::Obj(a), Self::Obj(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

/// Integer quotient when `a` divides evenly by `b`.
fn exact_div(a: i64, b: i64) -> Option<i64> {
    a.checked_rem(b).filter(|rem| *rem == 0)?;
    a.checked_div(b)
}

macro_rules! numeric_op {
    ($trait:ident, $method:ident, $math:ident, $int:expr, $op:tt) => {
        impl std::ops::$trait for QueryValue {
            type Output = Result<Self, JaqError<Self>>;

            fn $method(self, rhs: Self) -> Self::Output {
                self.arith(rhs, Math::$math, $int, |a, b| a $op b)
            }
        }
    };
}

numeric_op!(Sub, sub, Sub, i64::checked_sub, -);
numeric_op!(Mul, mul, Mul, i64::checked_mul, *);
numeric_op!(Div, div, Div, exact_div, /);
numeric_op!(Rem, rem, Rem, i64::checked_rem, %);

impl std::ops::Add for QueryValue {
    type Output = Result<Self, JaqError<Self>>;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (l @ (Self::Int(_) | Self::Num(_)), r @ (Self::Int(_) | Self::Num(_))) => {
                l.arith(r, Math::Add, i64::checked_add, |a, b| a + b)
            }
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a + &b)),
            (Self::Arr(mut a), Self::Arr(b)) => {
                a.extend(b);
                Ok(Self::Arr(a))
            }
            (Self::Null, value) | (value, Self::Null) => Ok(value),
            (l, r) => Err(JaqError::math(l, Math::Add, r)),
        }
    }
}

impl std::ops::Neg for QueryValue {
    type Output = Result<Self, JaqError<Self>>;

    fn neg(self) -> Self::Output {
        match self {
            Self::Int(a) => Ok(a.checked_neg().map_or(Self::Num(-(a as f64)), Self::Int)),
            Self::Num(a) => Ok(Self::Num(-a)),
            other => Err(JaqError::typ(other, "number")),
        }
    }
}

impl jaq_core::ValT for QueryValue {
    fn from_num(n: &str) -> Result<Self, JaqError<Self>> {
        if let Ok(int) = n.parse::<i64>() {
            return Ok(Self::Int(int));
        }
        n.parse::<f64>().map(Self::Num).map_err(JaqError::str)
    }

    fn from_map<I: IntoIterator<Item = (Self, Self)>>(iter: I) -> Result<Self, JaqError<Self>> {
        let mut fields = BTreeMap::new();
        for (key, value) in iter {
            match key {
                Self::Str(key) => {
                    fields.insert(key, value);
                }
                other => return Err(JaqError::typ(other, "string")),
            }
        }
        Ok(Self::Obj(fields))
    }

    fn values(self) -> Box<dyn Iterator<Item = Result<Self, JaqError<Self>>>> {
        match self {
            Self::Arr(items) => Box::new(items.into_iter().map(Ok)),
            Self::Obj(fields) => Box::new(fields.into_values().map(Ok)),
            other => Box::new(std::iter::once(Err(JaqError::typ(other, "iterable")))),
        }
    }

    fn index(self, index: &Self) -> Result<Self, JaqError<Self>> {
        match (self, index) {
            (Self::Obj(mut fields), Self::Str(key)) => Ok(fields.remove(key).unwrap_or(Self::Null)),
            (Self::Null, _) => Ok(Self::Null),
            (Self::Arr(items), Self::Int(_) | Self::Num(_)) => {
                let len = items.len() as isize;
                let idx = index.integer()?;
                let idx = if idx < 0 { len + idx } else { idx };
                Ok(usize::try_from(idx)
                    .ok()
                    .and_then(|idx| items.get(idx).cloned())
                    .unwrap_or(Self::Null))
            }
            (value, index) => Err(JaqError::index(value, index.clone())),
        }
    }

    fn range(self, range: jaq_core::val::Range<&Self>) -> Result<Self, JaqError<Self>> {
        let items = match self {
            Self::Arr(items) => items,
            other => return Err(JaqError::typ(other, "array")),
        };
        let len = items.len() as isize;
        let start = range.start.map(Self::integer).transpose()?.unwrap_or(0);
        let end = range.end.map(Self::integer).transpose()?.unwrap_or(len);
        let clamp = |idx: isize| (if idx < 0 { len + idx } else { idx }).clamp(0, len) as usize;
        let (start, end) = (clamp(start), clamp(end));
        Ok(Self::Arr(items.get(start..end).map(<[Self]>::to_vec).unwrap_or_default()))
    }

    fn map_values<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => items
                .into_iter()
                .map(|item| first_or_null(f(item)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Arr),
            Self::Obj(fields) => fields
                .into_iter()
                .map(|(key, value)| first_or_null(f(value)).map(|value| (key, value)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Obj),
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "iterable").into()),
            },
        }
    }

    fn map_index<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        index: &Self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match (self, index) {
            (Self::Obj(mut fields), Self::Str(key)) => {
                let current = fields.remove(key).unwrap_or(Self::Null);
                let next = first_or_null(f(current))?;
                fields.insert(key.clone(), next);
                Ok(Self::Obj(fields))
            }
            (Self::Arr(mut items), Self::Int(_) | Self::Num(_)) => {
                let len = items.len() as isize;
                let idx = index.integer()?;
                let idx = if idx < 0 { len + idx } else { idx };
                match usize::try_from(idx).ok().filter(|idx| *idx < items.len()) {
                    Some(idx) => {
                        let current = std::mem::replace(&mut items[idx], Self::Null);
                        items[idx] = first_or_null(f(current))?;
                        Ok(Self::Arr(items))
                    }
                    None => Err(JaqError::index(Self::Arr(items), index.clone()).into()),
                }
            }
            (other, index) => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::index(other, index.clone()).into()),
            },
        }
    }

    fn map_range<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        range: jaq_core::val::Range<&Self>,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => first_or_null(f(Self::Arr(items).range(range)?)),
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "array").into()),
            },
        }
    }

    fn as_bool(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl jaq_std::ValT for QueryValue {
    fn into_seq<S: FromIterator<Self>>(self) -> Result<S, Self> {
        match self {
            Self::Arr(items) => Ok(items.into_iter().collect()),
            other => Err(other),
        }
    }

    fn as_isize(&self) -> Option<isize> {
        self.integer().ok()
    }

    fn as_f64(&self) -> Result<f64, JaqError<Self>> {
        self.float()
            .ok_or_else(|| JaqError::typ(self.clone(), "number"))
    }
}
