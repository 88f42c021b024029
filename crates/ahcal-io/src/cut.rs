//! Row predicates for calibration-table loads.
//!
//! A `cut` string is a conjunction of numeric comparisons, evaluated
//! against the columns of the current entry:
//! `"cellid >= 100000 && MPV > 0"`. The grammar is deliberately the
//! subset the calibration configurations actually use.

use crate::error::IoError;
use crate::reader::TableReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
struct Clause {
    column: String,
    op: Op,
    value: f64,
}

/// A parsed `cut` expression. An empty expression accepts every row.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Parse a `cut` expression.
    pub fn parse(expr: &str) -> Result<Self, IoError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::default());
        }
        let bad = |reason: &str| IoError::BadCut {
            expr: expr.to_owned(),
            reason: reason.to_owned(),
        };
        let mut clauses = Vec::new();
        for part in expr.split("&&") {
            let part = part.trim();
            // Two-character operators first, so ">=" does not parse as ">".
            let (op_str, op) = [
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("==", Op::Eq),
                ("!=", Op::Ne),
                (">", Op::Gt),
                ("<", Op::Lt),
            ]
            .into_iter()
            .find(|(s, _)| part.contains(s))
            .ok_or_else(|| bad("no comparison operator"))?;
            let (lhs, rhs) = part
                .split_once(op_str)
                .ok_or_else(|| bad("no comparison operator"))?;
            let column = lhs.trim();
            if column.is_empty() {
                return Err(bad("empty column name"));
            }
            let value: f64 = rhs
                .trim()
                .parse()
                .map_err(|_| bad("right-hand side is not a number"))?;
            clauses.push(Clause {
                column: column.to_owned(),
                op,
                value,
            });
        }
        Ok(Self { clauses })
    }

    /// Whether the expression has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the predicate against the current entry of `reader`.
    pub fn eval(&self, reader: &mut TableReader) -> Result<bool, IoError> {
        for clause in &self.clauses {
            let lhs = reader.numeric_value(&clause.column)?;
            let pass = match clause.op {
                Op::Lt => lhs < clause.value,
                Op::Le => lhs <= clause.value,
                Op::Gt => lhs > clause.value,
                Op::Ge => lhs >= clause.value,
                Op::Eq => lhs == clause.value,
                Op::Ne => lhs != clause.value,
            };
            if !pass {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::{write_tables, Table};

    #[test]
    fn empty_expressions_accept_everything() {
        let p = Predicate::parse("  ").unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(Predicate::parse("cellid").is_err());
        assert!(Predicate::parse("> 3").is_err());
        assert!(Predicate::parse("cellid > three").is_err());
    }

    #[test]
    fn conjunctions_filter_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mip.root");
        let mut t = Table::new("mip");
        t.push_column::<i32>("cellid", &[100_000, 200_000, 300_000])
            .unwrap();
        t.push_column::<f64>("MPV", &[350.0, 80.0, 310.0]).unwrap();
        write_tables(&path, vec![t]).unwrap();

        let p = Predicate::parse("cellid >= 200000 && MPV > 100").unwrap();
        let mut r = TableReader::open(&path, "mip").unwrap();
        let mut kept = Vec::new();
        while r.next() {
            if p.eval(&mut r).unwrap() {
                kept.push(r.numeric_value("cellid").unwrap() as i32);
            }
        }
        assert_eq!(kept, vec![300_000]);
    }
}
