//! Atomic filter conditions.
//!
//! A [`Condition`] is one `(operator, field, value)` triple from the filter
//! DSL, materialized as a SQL fragment plus its bound parameters. Fields
//! starting with `_` that name a physical column (`_key`, `_data`,
//! `_created`, `_updated`, `_embedding`) compare against the bare column;
//! every other field is a JSON path into the document body, so `user.name`
//! becomes `json_extract(data, '$.user.name')`.

use crate::error::OakError;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Field names that address a physical column instead of a JSON path.
pub(crate) const COLUMN_FIELDS: [&str; 5] = ["_key", "_data", "_created", "_updated", "_embedding"];

/// The closed set of filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Starts,
    Ends,
    Contains,
    NotContains,
    Range,
    In,
    NotIn,
}

impl Operator {
    pub(crate) fn parse(op: &str) -> Result<Self, OakError> {
        Ok(match op {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "lt" => Operator::Lt,
            "gt" => Operator::Gt,
            "lte" => Operator::Lte,
            "gte" => Operator::Gte,
            "starts" => Operator::Starts,
            "ends" => Operator::Ends,
            "contains" => Operator::Contains,
            "!contains" => Operator::NotContains,
            "range" => Operator::Range,
            "in" => Operator::In,
            "!in" => Operator::NotIn,
            _ => {
                return Err(OakError::InvalidOperator {
                    operator: op.to_string(),
                })
            }
        })
    }
}

/// One compiled filter condition: a SQL fragment and the parameters bound to
/// its placeholders, in left-to-right order.
#[derive(Debug)]
pub(crate) struct Condition {
    sql: String,
    params: Vec<SqlValue>,
}

impl Condition {
    /// Compile `(operator, field, value)` against `column` (the column the
    /// JSON body lives in; the vector join passes a qualified `tb.data`).
    pub(crate) fn new(
        operator: &str,
        field: &str,
        value: &Value,
        column: &str,
    ) -> Result<Self, OakError> {
        let op = Operator::parse(operator)?;
        let is_column = field.starts_with('_') && COLUMN_FIELDS.contains(&field);
        let lhs = if is_column {
            field[1..].to_string()
        } else if field == "data" {
            format!("json_extract({column}, '$')")
        } else {
            format!("json_extract({column}, '$.{field}')")
        };

        if value.is_null() {
            // eq/ne against null compile to IS (NOT) NULL with no parameters
            return match op {
                Operator::Eq => Ok(Self {
                    sql: format!("{lhs} IS NULL"),
                    params: Vec::new(),
                }),
                Operator::Ne => Ok(Self {
                    sql: format!("{lhs} IS NOT NULL"),
                    params: Vec::new(),
                }),
                _ => Err(OakError::InvalidFilter {
                    reason: format!("'{operator}' does not accept a null value"),
                }),
            };
        }

        match op {
            Operator::Range => Self::range(&lhs, value, is_column),
            Operator::In | Operator::NotIn => Self::in_list(&lhs, op, value, is_column),
            _ => {
                let sql = Self::comparison_sql(&lhs, op, is_column);
                let param = match op {
                    Operator::Starts => SqlValue::Text(format!("{}%", like_operand(value))),
                    Operator::Ends => SqlValue::Text(format!("%{}", like_operand(value))),
                    Operator::Contains | Operator::NotContains => {
                        SqlValue::Text(format!("%{}%", like_operand(value)))
                    }
                    _ => json_to_sql(value),
                };
                Ok(Self {
                    sql,
                    params: vec![param],
                })
            }
        }
    }

    fn comparison_sql(lhs: &str, op: Operator, is_column: bool) -> String {
        // Ordered comparisons on JSON paths cast to NUMERIC so string-typed
        // numbers compare by value; physical columns compare natively.
        let lhs_cast = if is_column {
            lhs.to_string()
        } else {
            match op {
                Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte => {
                    format!("CAST({lhs} as NUMERIC)")
                }
                _ => lhs.to_string(),
            }
        };
        match op {
            Operator::Eq => format!("{lhs_cast} = ?"),
            Operator::Ne => format!("{lhs_cast} != ?"),
            Operator::Lt => format!("{lhs_cast} < ?"),
            Operator::Gt => format!("{lhs_cast} > ?"),
            Operator::Lte => format!("{lhs_cast} <= ?"),
            Operator::Gte => format!("{lhs_cast} >= ?"),
            Operator::Starts | Operator::Ends | Operator::Contains => format!("{lhs_cast} LIKE ?"),
            Operator::NotContains => format!("{lhs_cast} NOT LIKE ?"),
            Operator::Range | Operator::In | Operator::NotIn => unreachable!(),
        }
    }

    fn range(lhs: &str, value: &Value, is_column: bool) -> Result<Self, OakError> {
        let bounds = match value.as_array() {
            Some(a) if a.len() == 2 => a,
            _ => {
                return Err(OakError::InvalidFilter {
                    reason: "range requires a list with exactly 2 values".to_string(),
                })
            }
        };
        let sql = if is_column {
            format!("{lhs} BETWEEN ? AND ?")
        } else {
            format!("CAST({lhs} as NUMERIC) BETWEEN ? AND ?")
        };
        Ok(Self {
            sql,
            params: bounds.iter().map(json_to_sql).collect(),
        })
    }

    fn in_list(lhs: &str, op: Operator, value: &Value, is_column: bool) -> Result<Self, OakError> {
        let elements = value.as_array().ok_or_else(|| OakError::InvalidFilter {
            reason: "'in' and '!in' only support lists; use `contains`/`!contains` for substrings"
                .to_string(),
        })?;
        if elements.is_empty() {
            return Err(OakError::InvalidFilter {
                reason: "'in' and '!in' require a non-empty list".to_string(),
            });
        }

        let mut placeholders = Vec::with_capacity(elements.len());
        let mut params = Vec::with_capacity(elements.len());
        for element in elements {
            // Composite elements compare against json_extract output, which
            // is minified JSON text, so they go through json(?) to normalize
            // formatting. Scalars bind natively.
            if !is_column && (element.is_array() || element.is_object()) {
                placeholders.push("json(?)");
                params.push(SqlValue::Text(element.to_string()));
            } else {
                placeholders.push("?");
                params.push(json_to_sql(element));
            }
        }
        let keyword = if op == Operator::In { "IN" } else { "NOT IN" };
        Ok(Self {
            sql: format!("{lhs} {keyword} ({})", placeholders.join(",")),
            params,
        })
    }

    /// The SQL fragment with `?` placeholders.
    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in placeholder order.
    pub(crate) fn into_params(self) -> Vec<SqlValue> {
        self.params
    }

    #[cfg(test)]
    pub(crate) fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Convert a JSON scalar to the SQL value it compares against once stored.
/// `json_extract` yields integers for booleans, so booleans bind as 0/1;
/// arrays and objects bind as their minified JSON text.
pub(crate) fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// String form of a value for LIKE patterns (strings unquoted, everything
/// else in its JSON rendering).
fn like_operand(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
