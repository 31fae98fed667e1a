/*!
Turning query results into JSON row objects.

Column names and types come from the prepared statement; the values come
back over the text protocol, so any column type the view exposes can be
rendered. Values are converted according to the column's type.
*/
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;

use super::{DataAccessError, Stage};

/// One result record, keyed by lower-cased column name.
pub type Row = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnKind {
    Bool,
    Number,
    Json,
    Text,
}

impl ColumnKind {
    pub fn of(t: &Type) -> Self {
        match *t {
            Type::BOOL => ColumnKind::Bool,
            Type::INT2 | Type::INT4 | Type::INT8 | Type::OID
            | Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => ColumnKind::Number,
            Type::JSON | Type::JSONB => ColumnKind::Json,
            _ => ColumnKind::Text,
        }
    }

    fn convert(&self, text: &str) -> Value {
        match self {
            ColumnKind::Bool => match text {
                "t" | "true" => Value::Bool(true),
                "f" | "false" => Value::Bool(false),
                _ => Value::String(text.to_owned()),
            },
            // NaN, Infinity and out-of-range numerics stay strings.
            ColumnKind::Number => match text.parse::<Number>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::String(text.to_owned()),
            },
            ColumnKind::Json => serde_json::from_str(text)
                .unwrap_or_else(|_| Value::String(text.to_owned())),
            ColumnKind::Text => Value::String(text.to_owned()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnMeta {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self { name: name.to_lowercase(), kind }
    }

    pub fn from_column(c: &tokio_postgres::Column) -> Self {
        Self::new(c.name(), ColumnKind::of(c.type_()))
    }
}

/**
Zip `columns` positionally with one record's `values`.

A record with a different number of values than there are columns is an
error rather than a short or padded row.
*/
pub fn normalize(
    columns: &[ColumnMeta],
    values: &[Option<&str>]
) -> Result<Row, DataAccessError> {
    if columns.len() != values.len() {
        return Err(DataAccessError::new(Stage::Normalize, format!(
            "Result metadata describes {} columns, but row has {} values",
            columns.len(), values.len()
        )));
    }

    let row: Row = columns.iter()
        .zip(values.iter())
        .map(|(col, val)| {
            let v = match val {
                None => Value::Null,
                Some(text) => col.kind.convert(text),
            };
            (col.name.clone(), v)
        })
        .collect();

    Ok(row)
}
