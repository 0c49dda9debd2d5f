//! `(column, operator, value)` filter terms turned into a row mask.
//!
//! Comparison terms, and membership terms with a single value, are folded into one conjunctive
//! [`Expr`] and evaluated in a single pass. Membership terms with several values are then applied
//! one by one as hash-set scans, each of which can only clear bits of the running mask.

use crate::error::{QueryError, QueryResult};
use crate::expr::{evaluate, BinaryOp, Expr};
use colgroup_columnar::{BitVec, ChunkData, Column, ColumnType, ColumnarTable, Value};
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum TermValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl From<Value> for TermValue {
    fn from(value: Value) -> Self {
        TermValue::Scalar(value)
    }
}

impl From<Vec<Value>> for TermValue {
    fn from(values: Vec<Value>) -> Self {
        TermValue::List(values)
    }
}

/// One filter term such as `("sales", ">", 2)` or `("state", "in", ["IL", "AR"])`.
#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub column: String,
    pub operator: String,
    pub value: TermValue,
}

impl Term {
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<TermValue>,
    ) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    pub fn cmp(column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Self {
        Self::new(column, operator, TermValue::Scalar(value.into()))
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::new(
            column,
            "in",
            TermValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::new(
            column,
            "not in",
            TermValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    fn invalid_value(&self, reason: &str) -> QueryError {
        QueryError::InvalidFilterValue {
            column: self.column.clone(),
            operator: self.operator.clone(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TermKind {
    Compare(BinaryOp),
    Member { negate: bool },
}

fn classify(term: &Term) -> QueryResult<TermKind> {
    let operator = term
        .operator
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    match operator.as_str() {
        "in" => Ok(TermKind::Member { negate: false }),
        "not in" => Ok(TermKind::Member { negate: true }),
        other => BinaryOp::comparison(other).map(TermKind::Compare).ok_or_else(|| {
            QueryError::InvalidFilterOperator {
                column: term.column.clone(),
                operator: term.operator.clone(),
            }
        }),
    }
}

/// Value set of one membership term, keyed like the column it is tested against.
#[derive(Debug)]
enum MembershipSet {
    Int(HashSet<i64>),
    Float(HashSet<OrderedFloat<f64>>),
    Bool([bool; 2]),
    Text(HashSet<Arc<str>>),
}

impl MembershipSet {
    /// Values that can never equal a value of `column_type` are dropped.
    fn build(column_type: ColumnType, values: &[Value]) -> Self {
        match column_type {
            ColumnType::Int32 | ColumnType::Int64 => MembershipSet::Int(
                values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Int32(x) => Some(i64::from(*x)),
                        Value::Int64(x) => Some(*x),
                        Value::Float64(x)
                            if x.fract() == 0.0
                                && *x >= i64::MIN as f64
                                && *x < i64::MAX as f64 =>
                        {
                            Some(*x as i64)
                        }
                        _ => None,
                    })
                    .collect(),
            ),
            ColumnType::Float64 => MembershipSet::Float(
                values
                    .iter()
                    .filter(|v| v.column_type().is_numeric())
                    .filter_map(Value::as_f64)
                    .map(OrderedFloat)
                    .collect(),
            ),
            ColumnType::Boolean => {
                let mut present = [false; 2];
                for v in values {
                    if let Value::Boolean(b) = v {
                        present[usize::from(*b)] = true;
                    }
                }
                MembershipSet::Bool(present)
            }
            ColumnType::String => MembershipSet::Text(
                values
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    /// Membership of every row of `chunk`.
    fn members(&self, chunk: &ChunkData) -> BitVec {
        match (self, chunk) {
            (MembershipSet::Int(set), ChunkData::Int32(v)) => {
                v.iter().map(|x| set.contains(&i64::from(*x))).collect()
            }
            (MembershipSet::Int(set), ChunkData::Int64(v)) => {
                v.iter().map(|x| set.contains(x)).collect()
            }
            (MembershipSet::Float(set), ChunkData::Float64(v)) => {
                v.iter().map(|x| set.contains(&OrderedFloat(*x))).collect()
            }
            (MembershipSet::Bool(present), ChunkData::Boolean(bits)) => (0..bits.len())
                .map(|i| present[usize::from(bits.get(i))])
                .collect(),
            (MembershipSet::Text(set), ChunkData::String(v)) => {
                v.iter().map(|s| set.contains(s)).collect()
            }
            _ => BitVec::with_len_all_false(chunk.len()),
        }
    }

    /// Clear every mask bit whose row fails the test.
    fn narrow(&self, column: &Column, negate: bool, mask: &mut BitVec) -> QueryResult<()> {
        for chunk_idx in 0..column.chunk_count() {
            let (start, _) = column.chunk_bounds(chunk_idx);
            let members = self.members(&*column.chunk(chunk_idx)?);
            for offset in 0..members.len() {
                let row = start + offset;
                if mask.get(row) && members.get(offset) == negate {
                    mask.set(row, false);
                }
            }
        }
        Ok(())
    }
}

/// Whether a one-value membership test can run as an equality comparison with the same outcome.
/// NaN and values of a foreign type go through the set scan instead.
fn foldable(column_type: ColumnType, value: &Value) -> bool {
    match value {
        Value::Float64(v) if v.is_nan() => false,
        Value::Int32(_) | Value::Int64(_) | Value::Float64(_) => column_type.is_numeric(),
        other => other.column_type() == column_type,
    }
}

/// Mask of the rows satisfying every term.
pub fn where_terms(table: &ColumnarTable, terms: &[Term]) -> QueryResult<BitVec> {
    let mut conjunction: Option<Expr> = None;
    let mut scans = Vec::new();

    for term in terms {
        let column = table
            .column(&term.column)
            .map_err(|_| QueryError::unknown_column(&term.column))?;
        let kind = classify(term)?;
        let comparison = match (kind, &term.value) {
            (TermKind::Compare(op), TermValue::Scalar(value)) => (op, value),
            (TermKind::Compare(_), TermValue::List(_)) => {
                return Err(term.invalid_value("comparison needs a single value"))
            }
            (TermKind::Member { .. }, TermValue::Scalar(_)) => {
                return Err(term.invalid_value("membership needs a list of values"))
            }
            (TermKind::Member { negate }, TermValue::List(values)) => match values.as_slice() {
                [] => return Err(term.invalid_value("a value list needs to have values")),
                [single] if foldable(column.column_type(), single) => {
                    let op = if negate {
                        BinaryOp::NotEquals
                    } else {
                        BinaryOp::Equals
                    };
                    (op, single)
                }
                _ => {
                    scans.push((column, MembershipSet::build(column.column_type(), values), negate));
                    continue;
                }
            },
        };
        let (op, value) = comparison;
        let expr = Expr::binary(op, Expr::column(term.column.clone()), Expr::literal(value));
        conjunction = Some(match conjunction {
            Some(acc) => Expr::binary(BinaryOp::And, acc, expr),
            None => expr,
        });
    }

    let mut mask = match &conjunction {
        Some(expr) => evaluate(table, expr)?.into_mask().ok_or_else(|| {
            QueryError::InvalidArgument(format!("filter {expr} is not boolean"))
        })?,
        None => BitVec::with_len_all_true(table.row_count()),
    };
    for (column, set, negate) in &scans {
        set.narrow(column, *negate, &mut mask)?;
    }

    log::debug!(
        "where_terms: {} terms ({} set scans) selected {} of {} rows",
        terms.len(),
        scans.len(),
        mask.count_ones(),
        mask.len()
    );
    Ok(mask)
}
