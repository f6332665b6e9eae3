//! query::expr
//!
//! Syntax tree of query predicates.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;

use super::QueryError;
use crate::core::types::FieldValue;

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Time(NaiveDateTime),
}

impl Literal {
    fn to_field_value(&self) -> FieldValue {
        match self {
            Literal::Int(v) => FieldValue::Int(*v),
            Literal::Float(v) => FieldValue::Float(*v),
            Literal::Str(s) => FieldValue::Str(s.clone()),
            Literal::Time(t) => FieldValue::Timestamp(*t),
        }
    }
}

/// A dimension (`visit`) or a field of a dimension element (`visit.seeing`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier {
    pub table: Option<String>,
    pub column: String,
}

impl Identifier {
    pub fn bare(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    /// The dimension element this identifier refers to.
    pub fn element(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.column)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn sql(&self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// One element of an `IN (...)` list.
#[derive(Debug, Clone, PartialEq)]
pub enum InItem {
    Value(Expr),
    /// Inclusive integer range `start..stop`, optionally with a stride.
    Range {
        start: i64,
        stop: i64,
        stride: Option<i64>,
    },
}

/// A predicate expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Identifier(Identifier),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        items: Vec<InItem>,
        negated: bool,
    },
}

impl Expr {
    /// Every identifier the expression mentions.
    pub fn identifiers(&self) -> BTreeSet<Identifier> {
        let mut found = BTreeSet::new();
        self.collect_identifiers(&mut found);
        found
    }

    fn collect_identifiers(&self, found: &mut BTreeSet<Identifier>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Identifier(id) => {
                found.insert(id.clone());
            }
            Expr::Unary { operand, .. } => operand.collect_identifiers(found),
            Expr::Binary { left, right, .. } => {
                left.collect_identifiers(found);
                right.collect_identifiers(found);
            }
            Expr::In { expr, items, .. } => {
                expr.collect_identifiers(found);
                for item in items {
                    if let InItem::Value(value) = item {
                        value.collect_identifiers(found);
                    }
                }
            }
        }
    }

    /// Render as SQL with `?` placeholders, appending bound values to `params`.
    ///
    /// `column` maps each identifier to a qualified SQL column.
    pub fn to_sql<F>(&self, column: &F, params: &mut Vec<FieldValue>) -> Result<String, QueryError>
    where
        F: Fn(&Identifier) -> Result<String, QueryError>,
    {
        Ok(match self {
            Expr::Literal(literal) => {
                params.push(literal.to_field_value());
                "?".to_string()
            }
            Expr::Identifier(id) => column(id)?,
            Expr::Unary { op, operand } => {
                let operand = operand.to_sql(column, params)?;
                match op {
                    UnaryOp::Not => format!("(NOT {})", operand),
                    UnaryOp::Minus => format!("(-{})", operand),
                    UnaryOp::Plus => operand,
                }
            }
            Expr::Binary { op, left, right } => {
                let left = left.to_sql(column, params)?;
                let right = right.to_sql(column, params)?;
                format!("({} {} {})", left, op.sql(), right)
            }
            Expr::In {
                expr,
                items,
                negated,
            } => {
                // Placeholders bind in text order, so the target is rendered
                // afresh for every term that mentions it.
                let mut terms = Vec::new();
                let values: Vec<&Expr> = items
                    .iter()
                    .filter_map(|item| match item {
                        InItem::Value(value) => Some(value),
                        InItem::Range { .. } => None,
                    })
                    .collect();
                if !values.is_empty() {
                    let target = expr.to_sql(column, params)?;
                    let values = values
                        .iter()
                        .map(|value| value.to_sql(column, params))
                        .collect::<Result<Vec<_>, _>>()?;
                    terms.push(format!("{} IN ({})", target, values.join(", ")));
                }
                for item in items {
                    if let InItem::Range {
                        start,
                        stop,
                        stride,
                    } = item
                    {
                        let target = expr.to_sql(column, params)?;
                        params.push(FieldValue::Int(*start));
                        params.push(FieldValue::Int(*stop));
                        let mut term = format!("({} BETWEEN ? AND ?", target);
                        if let Some(stride) = stride.filter(|s| *s > 1) {
                            let target = expr.to_sql(column, params)?;
                            params.push(FieldValue::Int(*start));
                            params.push(FieldValue::Int(stride));
                            term.push_str(&format!(" AND ({} - ?) % ? = 0", target));
                        }
                        term.push(')');
                        terms.push(term);
                    }
                }
                let combined = format!("({})", terms.join(" OR "));
                if *negated {
                    format!("(NOT {})", combined)
                } else {
                    combined
                }
            }
        })
    }
}
