//! Statement synthesis for the generic CRUD operations.

use serde_json::Value as JsonValue;

use super::statement::{Statement, placeholders};
use super::table::{FieldMap, SoftDelete, Table};

/// `INSERT ... RETURNING *` binding exactly the supplied fields, in order.
pub fn insert_statement<T: Table>(fields: &FieldMap<T>) -> Statement {
    if fields.is_empty() {
        return Statement::raw(format!("INSERT INTO {} DEFAULT VALUES RETURNING *", T::NAME));
    }

    let (columns, values): (Vec<&str>, Vec<JsonValue>) =
        fields.iter().map(|(c, v)| (c, v.clone())).unzip();

    Statement::new(
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            T::NAME,
            columns.join(", "),
            placeholders(1, values.len())
        ),
        values,
    )
}

/// `UPDATE ... RETURNING *` keyed by primary key. The updated-at column is
/// always set to `now`; a caller-supplied value for it is ignored.
pub fn update_statement<T: Table>(id: JsonValue, fields: &FieldMap<T>, now: &str) -> Statement {
    let mut assignments = Vec::with_capacity(fields.len() + 1);
    let mut values = Vec::with_capacity(fields.len() + 2);

    for (column, value) in fields.iter().filter(|(c, _)| *c != T::UPDATED_AT) {
        values.push(value.clone());
        assignments.push(format!("{} = ?{}", column, values.len()));
    }

    values.push(JsonValue::from(now));
    assignments.push(format!("{} = ?{}", T::UPDATED_AT, values.len()));

    values.push(id);
    Statement::new(
        format!(
            "UPDATE {} SET {} WHERE {} = ?{} RETURNING *",
            T::NAME,
            assignments.join(", "),
            T::PRIMARY_KEY,
            values.len()
        ),
        values,
    )
}

pub fn delete_statement<T: Table>(id: JsonValue) -> Statement {
    Statement::new(
        format!(
            "DELETE FROM {} WHERE {} = ?1 RETURNING *",
            T::NAME,
            T::PRIMARY_KEY
        ),
        vec![id],
    )
}

pub fn soft_delete_statement<T: SoftDelete>(id: JsonValue, now: &str) -> Statement {
    Statement::new(
        format!(
            "UPDATE {} SET {} = ?1, {} = ?2 WHERE {} = ?3 RETURNING *",
            T::NAME,
            T::STATUS,
            T::UPDATED_AT,
            T::PRIMARY_KEY
        ),
        vec![JsonValue::from(T::DELETED), JsonValue::from(now), id],
    )
}

pub fn select_by_id_statement<T: Table>(id: JsonValue) -> Statement {
    Statement::new(
        format!("SELECT * FROM {} WHERE {} = ?1", T::NAME, T::PRIMARY_KEY),
        vec![id],
    )
}
