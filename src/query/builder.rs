//! SQL builders for fetch, search and similarity queries.
//!
//! Each builder is a pure function from a base name plus query inputs to
//! `(sql, params)`. Nothing here touches a connection; execution lives in
//! [`crate::backend`]. Parameter order is fixed across all builders:
//! `[match or vector query, filter params.., limit, offset]`, with
//! limit/offset dropped in count mode and offset dropped for similarity
//! queries (top-k results are bounded by the trailing LIMIT alone).

use crate::error::OakError;
use crate::query::condition::Condition;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// Order literals accepted by plain fetches.
pub(crate) const ORDER_FETCH: [&str; 8] = [
    "key__asc",
    "key__desc",
    "data__asc",
    "data__desc",
    "created__asc",
    "created__desc",
    "updated__asc",
    "updated__desc",
];

/// Order literals accepted by full-text search (fetch set plus `rank`).
pub(crate) const ORDER_SEARCH: [&str; 10] = [
    "key__asc",
    "key__desc",
    "data__asc",
    "data__desc",
    "created__asc",
    "created__desc",
    "updated__asc",
    "updated__desc",
    "rank__asc",
    "rank__desc",
];

/// Order literals accepted by similarity search (fetch set plus `distance`).
pub(crate) const ORDER_VECTOR: [&str; 10] = [
    "key__asc",
    "key__desc",
    "data__asc",
    "data__desc",
    "created__asc",
    "created__desc",
    "updated__asc",
    "updated__desc",
    "distance__asc",
    "distance__desc",
];

/// Distance functions understood by the vector extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceFn {
    L1,
    L2,
    Cosine,
}

impl DistanceFn {
    /// Parse the user-facing literal (`"L1"`, `"L2"`, `"cosine"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "L1" => Some(DistanceFn::L1),
            "L2" => Some(DistanceFn::L2),
            "cosine" => Some(DistanceFn::Cosine),
            _ => None,
        }
    }

    /// Suffix of the `vec_distance_*` SQL function.
    fn as_sql(self) -> &'static str {
        match self {
            DistanceFn::L1 => "L1",
            DistanceFn::L2 => "L2",
            DistanceFn::Cosine => "cosine",
        }
    }
}

/// Validate an order literal against an allow-list and split it into the
/// SQL column and direction.
fn split_order<'a>(order: &'a str, allowed: &[&str]) -> Result<(&'a str, &'static str), OakError> {
    if !allowed.contains(&order) {
        return Err(OakError::InvalidOrder {
            order: order.to_string(),
        });
    }
    // Membership in the allow-list guarantees exactly one separator.
    let (field, direction) = order.split_once("__").expect("allow-listed order literal");
    let direction = if direction == "asc" { "ASC" } else { "DESC" };
    Ok((field, direction))
}

/// Compile a filter tree into a WHERE fragment and its parameters.
///
/// A JSON object is one AND-group; an array of objects is an OR across
/// groups, each group parenthesized and the whole disjunction wrapped so it
/// composes under an outer AND. Empty input produces no clause at all.
pub(crate) fn build_where_clause(
    filters: &Value,
    column: &str,
) -> Result<Option<(String, Vec<SqlValue>)>, OakError> {
    match filters {
        Value::Object(group) => {
            if group.is_empty() {
                return Ok(None);
            }
            build_group(filters, column).map(Some)
        }
        Value::Array(groups) => {
            let mut clauses = Vec::new();
            let mut params = Vec::new();
            for group in groups {
                if !group.is_object() {
                    return Err(OakError::InvalidFilter {
                        reason: "filter groups must be mappings".to_string(),
                    });
                }
                if group.as_object().map(|g| g.is_empty()).unwrap_or(true) {
                    continue;
                }
                let (sql, group_params) = build_group(group, column)?;
                clauses.push(format!("({sql})"));
                params.extend(group_params);
            }
            if clauses.is_empty() {
                return Ok(None);
            }
            Ok(Some((format!("({})", clauses.join(" OR ")), params)))
        }
        _ => Err(OakError::InvalidFilter {
            reason: "filters must be a mapping or a list of mappings".to_string(),
        }),
    }
}

/// Compile one AND-group. Field specs are `"<name>"` or `"<name>__<op>"`;
/// the operator defaults to `eq`.
fn build_group(group: &Value, column: &str) -> Result<(String, Vec<SqlValue>), OakError> {
    let map = group.as_object().expect("group is a mapping");
    let mut clauses = Vec::with_capacity(map.len());
    let mut params = Vec::new();

    for (spec, value) in map {
        let parts: Vec<&str> = spec.split("__").collect();
        if parts.len() > 2 {
            return Err(OakError::InvalidFilter {
                reason: format!("more than one '__' in field spec '{spec}'"),
            });
        }
        let (field, operator) = if parts.len() == 2 {
            (parts[0], parts[1])
        } else {
            (spec.as_str(), "eq")
        };
        let condition = Condition::new(operator, field, value, column)?;
        clauses.push(condition.sql().to_string());
        params.extend(condition.into_params());
    }

    Ok((clauses.join(" AND "), params))
}

/// Build a plain fetch over the primary table.
pub(crate) fn build_fetch(
    base: &str,
    filters: Option<&Value>,
    limit: i64,
    offset: i64,
    order: &str,
    count: bool,
) -> Result<(String, Vec<SqlValue>), OakError> {
    let mut params = Vec::new();
    let where_sql = match filters {
        Some(filters) => build_where_clause(filters, "data")?,
        None => None,
    };

    let mut sql = if count {
        format!("SELECT COUNT(*) FROM {base}")
    } else {
        format!("SELECT key, data, created, updated FROM {base}")
    };
    if let Some((clause, clause_params)) = where_sql {
        sql.push_str(&format!(" WHERE {clause}"));
        params.extend(clause_params);
    }
    if count {
        return Ok((sql, params));
    }

    let (field, direction) = split_order(order, &ORDER_FETCH)?;
    sql.push_str(&format!(" ORDER BY {field} {direction} LIMIT ? OFFSET ?"));
    params.push(SqlValue::Integer(limit));
    params.push(SqlValue::Integer(offset));
    Ok((sql, params))
}

/// Build a full-text query against the FTS mirror. The match expression is
/// always the first bound parameter.
pub(crate) fn build_search(
    base: &str,
    query: &str,
    filters: Option<&Value>,
    limit: i64,
    offset: i64,
    order: &str,
    count: bool,
) -> Result<(String, Vec<SqlValue>), OakError> {
    if query.trim().is_empty() {
        return Err(OakError::EmptySearchQuery);
    }

    let mut params = vec![SqlValue::Text(query.to_string())];
    let where_sql = match filters {
        Some(filters) => build_where_clause(filters, "data")?,
        None => None,
    };

    let mut sql = if count {
        format!("SELECT COUNT(*) FROM {base}_fts WHERE data MATCH ?")
    } else {
        format!("SELECT key, data, created, updated, rank FROM {base}_fts WHERE {base}_fts MATCH ?")
    };
    if let Some((clause, clause_params)) = where_sql {
        sql.push_str(&format!(" AND {clause}"));
        params.extend(clause_params);
    }
    if count {
        return Ok((sql, params));
    }

    let (field, direction) = split_order(order, &ORDER_SEARCH)?;
    sql.push_str(&format!(" ORDER BY {field} {direction} LIMIT ? OFFSET ?"));
    params.push(SqlValue::Integer(limit));
    params.push(SqlValue::Integer(offset));
    Ok((sql, params))
}

/// Build a vector similarity query joining the primary table and the vector
/// mirror by key. There is no count mode: distance-ordered queries are
/// inherently top-k, bounded by the trailing LIMIT.
///
/// The distance function applies per query, so the distance is computed as a
/// selected column rather than fixed into the mirror's declaration.
pub(crate) fn build_similar(
    base: &str,
    query: &[u8],
    filters: Option<&Value>,
    limit: i64,
    order: &str,
    distance: DistanceFn,
) -> Result<(String, Vec<SqlValue>), OakError> {
    let (field, direction) = split_order(order, &ORDER_VECTOR)?;

    let mut params = vec![SqlValue::Blob(query.to_vec())];
    // Filters apply to the primary side of the join.
    let where_sql = match filters {
        Some(filters) => build_where_clause(filters, "tb.data")?,
        None => None,
    };

    let mut sql = format!(
        "SELECT tb.key, tb.data, tb.created, tb.updated, \
         vec_distance_{}(vb.embedding, ?) AS distance \
         FROM {base} AS tb INNER JOIN {base}_vec AS vb ON vb.key = tb.key",
        distance.as_sql()
    );
    if let Some((clause, clause_params)) = where_sql {
        sql.push_str(&format!(" WHERE {clause}"));
        params.extend(clause_params);
    }

    let order_column = if field == "distance" {
        "distance".to_string()
    } else {
        format!("tb.{field}")
    };
    sql.push_str(&format!(" ORDER BY {order_column} {direction} LIMIT ?"));
    params.push(SqlValue::Integer(limit));
    Ok((sql, params))
}
