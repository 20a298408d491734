use keeper_application::{AuditColumn, ColumnDefault, ColumnType, EntityModel};

pub(super) fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Timestamp => "TIMESTAMPTZ",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Uuid => "UUID",
        ColumnType::Text => "TEXT",
        ColumnType::BigInt => "BIGINT",
        ColumnType::Integer => "INTEGER",
    }
}

fn default_clause(default: ColumnDefault) -> &'static str {
    match default {
        ColumnDefault::UtcNow => " DEFAULT now()",
        ColumnDefault::False => " DEFAULT false",
        ColumnDefault::None => "",
    }
}

/// DDL creating the table and adding every audit column idempotently.
pub(super) fn schema_statements(model: &EntityModel) -> Vec<String> {
    let table = model.table.as_str();
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {table} (entity_key TEXT PRIMARY KEY, payload JSONB NOT NULL)"
    )];

    statements.extend(model.columns.iter().map(|column| {
        let nullability = if column.nullable { "NULL" } else { "NOT NULL" };
        let references = column
            .references
            .as_ref()
            .map(|key| {
                format!(
                    " REFERENCES {}({}) ON DELETE SET NULL",
                    key.table, key.column
                )
            })
            .unwrap_or_default();

        format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {} {} {nullability}{}{references}",
            column.name,
            sql_type(column.column_type),
            default_clause(column.default),
        )
    }));

    statements
}

/// Expression extracting one audit column out of the payload bound to `$2`.
pub(super) fn projection(column: &AuditColumn) -> String {
    let name = column.name.as_str();
    let extracted = match column.column_type {
        ColumnType::Text => format!("($2->>'{name}')"),
        column_type => format!("($2->>'{name}')::{}", sql_type(column_type).to_lowercase()),
    };

    match column.default {
        ColumnDefault::UtcNow => format!("COALESCE({extracted}, now())"),
        ColumnDefault::False => format!("COALESCE({extracted}, false)"),
        ColumnDefault::None => extracted,
    }
}

pub(super) fn insert_statement(model: &EntityModel) -> String {
    let mut columns = vec!["entity_key".to_owned(), "payload".to_owned()];
    let mut values = vec!["$1".to_owned(), "$2".to_owned()];
    for column in &model.columns {
        columns.push(column.name.clone());
        values.push(projection(column));
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        model.table,
        columns.join(", "),
        values.join(", ")
    )
}

pub(super) fn update_statement(model: &EntityModel) -> String {
    let assignments = std::iter::once("payload = $2".to_owned())
        .chain(
            model
                .columns
                .iter()
                .map(|column| format!("{} = {}", column.name, projection(column))),
        )
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {} SET {assignments} WHERE entity_key = $1",
        model.table
    )
}

pub(super) fn delete_statement(table: &str) -> String {
    format!("DELETE FROM {table} WHERE entity_key = $1")
}

pub(super) fn select_statement(table: &str) -> String {
    format!("SELECT payload FROM {table} WHERE entity_key = $1")
}
