//! Named query binding.
//!
//! Rewrites `:name` parameters into the driver's positional placeholders and
//! collects the matching argument values in order, so drivers keep doing their
//! own escaping. `::` (a PostgreSQL cast) passes through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{FrameworkError, FrameworkResult};

/// Positional placeholder style of the target driver
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    /// `$1`, `$2`, ... (PostgreSQL)
    #[default]
    Dollar,
    /// `?` (MySQL, SQLite)
    Question,
}

/// A query ready for a driver: positional SQL plus its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Bind `named` against the fields of `args`, which must serialize to a map.
///
/// Dotted names (`:user.id`) are looked up as literal keys. A parameter with
/// no matching field is an error.
pub fn build_query<T>(named: &str, args: &T, placeholder: Placeholder) -> FrameworkResult<BoundQuery>
where
    T: Serialize + ?Sized,
{
    let fields = match serde_json::to_value(args)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(FrameworkError::Query(format!(
                "query arguments must be a map, got {other}"
            )))
        }
    };

    let mut sql = String::with_capacity(named.len());
    let mut bound = Vec::new();
    let mut chars = named.chars().peekable();

    while let Some(c) = chars.next() {
        if c != ':' {
            sql.push(c);
            continue;
        }
        if chars.peek() == Some(&':') {
            chars.next();
            sql.push_str("::");
            continue;
        }

        let mut field = String::new();
        while let Some(&next) = chars.peek() {
            if !is_name_char(next) {
                break;
            }
            field.push(next);
            chars.next();
        }
        if field.is_empty() {
            sql.push(':');
            continue;
        }

        let value = fields
            .get(&field)
            .ok_or_else(|| FrameworkError::Query(format!("field '{field}' is not defined")))?;
        bound.push(value.clone());
        match placeholder {
            Placeholder::Dollar => {
                sql.push('$');
                sql.push_str(&bound.len().to_string());
            }
            Placeholder::Question => sql.push('?'),
        }
    }

    Ok(BoundQuery { sql, args: bound })
}
