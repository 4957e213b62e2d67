use chrono::NaiveDate;
use std::fmt;

use crate::db::schema::SqlType;

/// Date layouts accepted for DATE columns, tried in order.
///
/// The sales export writes `M/D/YYYY` without zero padding, which `%m/%d`
/// accepts.
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// A typed destination cell. `None` is SQL NULL; the variant still carries the
/// column type so NULLs bind with the right parameter type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(Option<i64>),
    Numeric(Option<f64>),
    Date(Option<NaiveDate>),
    Text(Option<String>),
}

impl Value {
    pub fn null(sql_type: SqlType) -> Self {
        match sql_type {
            SqlType::Integer | SqlType::BigInt => Value::Integer(None),
            SqlType::Numeric { .. } => Value::Numeric(None),
            SqlType::Date => Value::Date(None),
            SqlType::Text => Value::Text(None),
        }
    }
}

/// A cell whose text could not be coerced to its column type and was stored as
/// NULL instead. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub struct CellCoercionWarning {
    /// 1-based data row number (header excluded)
    pub row: u64,
    pub column: String,
    pub value: String,
    pub target: SqlType,
}

impl fmt::Display for CellCoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: cannot convert '{}' to {} for column {}, stored NULL",
            self.row, self.value, self.target, self.column
        )
    }
}

/// Convert raw cell text to `sql_type`.
///
/// Empty and whitespace-only cells are NULL. Returns `None` when the text is
/// present but not a valid value of the type, including numbers that would
/// overflow the column once rounded to its scale and text the server would
/// reject.
pub fn coerce(raw: &str, sql_type: SqlType) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::null(sql_type));
    }

    match sql_type {
        SqlType::Integer => trimmed
            .parse::<i32>()
            .ok()
            .map(|v| Value::Integer(Some(i64::from(v)))),
        SqlType::BigInt => trimmed.parse::<i64>().ok().map(|v| Value::Integer(Some(v))),
        SqlType::Numeric { precision, scale } => {
            let value = trimmed.parse::<f64>().ok().filter(|v| v.is_finite())?;
            // Round to the column scale first: 9999999999.995 becomes
            // 10000000000.00, which NUMERIC(12,2) cannot hold
            let factor = 10f64.powi(i32::from(scale));
            let scaled = (value * factor).round();
            (scaled.abs() < 10f64.powi(i32::from(precision)))
                .then_some(Value::Numeric(Some(scaled / factor)))
        }
        SqlType::Date => DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
            .map(|d| Value::Date(Some(d))),
        // PostgreSQL text cannot store NUL even though it is valid UTF-8
        SqlType::Text => (!raw.contains('\0')).then(|| Value::Text(Some(raw.to_string()))),
    }
}
