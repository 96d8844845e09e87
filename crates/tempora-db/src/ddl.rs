//! DDL rendering for model definitions.
//!
//! Live and history models render the same way: one `CREATE TABLE IF NOT
//! EXISTS` statement plus one `CREATE INDEX IF NOT EXISTS` per index.
//! Identifiers are always double-quoted.

use serde_json::Value;
use tempora_types::{AttributeDef, DataType, DefaultValue, IndexDef, ModelDefinition};

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The table of a model, schema-qualified when a schema is set.
pub fn qualified_table(definition: &ModelDefinition) -> String {
    let table = quote_ident(definition.table_name());
    match &definition.options.schema {
        Some(schema) => format!("{}.{table}", quote_ident(schema)),
        None => table,
    }
}

/// Render a JSON value as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(true) => "TRUE".to_owned(),
        Value::Bool(false) => "FALSE".to_owned(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(_) | Value::Object(_) => {
            format!("'{}'::jsonb", value.to_string().replace('\'', "''"))
        }
    }
}

/// `PostgreSQL` column type for an attribute.
pub fn column_type(attribute: &AttributeDef) -> String {
    match &attribute.data_type {
        DataType::Integer if attribute.auto_increment => "SERIAL".to_owned(),
        DataType::BigInt if attribute.auto_increment => "BIGSERIAL".to_owned(),
        DataType::Integer => "INTEGER".to_owned(),
        DataType::BigInt => "BIGINT".to_owned(),
        DataType::Float => "DOUBLE PRECISION".to_owned(),
        DataType::Decimal => "NUMERIC".to_owned(),
        DataType::String { length: Some(n) } => format!("VARCHAR({n})"),
        DataType::String { length: None } => "VARCHAR(255)".to_owned(),
        DataType::Text => "TEXT".to_owned(),
        DataType::Boolean => "BOOLEAN".to_owned(),
        DataType::Date => "TIMESTAMPTZ".to_owned(),
        DataType::DateOnly => "DATE".to_owned(),
        DataType::Uuid => "UUID".to_owned(),
        DataType::Json => "JSONB".to_owned(),
        DataType::Other(raw) => raw.clone(),
    }
}

fn default_clause(default: &DefaultValue) -> String {
    match default {
        DefaultValue::Now => "DEFAULT now()".to_owned(),
        DefaultValue::Literal(value) => format!("DEFAULT {}", literal(value)),
    }
}

fn column(name: &str, attribute: &AttributeDef) -> String {
    let mut parts = vec![quote_ident(name), column_type(attribute)];
    if !attribute.allow_null || attribute.primary_key {
        parts.push("NOT NULL".to_owned());
    }
    if let Some(default) = &attribute.default_value {
        parts.push(default_clause(default));
    }
    if attribute.unique && !attribute.primary_key {
        parts.push("UNIQUE".to_owned());
    }
    parts.join(" ")
}

/// `CREATE TABLE IF NOT EXISTS` for a model.
pub fn create_table(definition: &ModelDefinition) -> String {
    let mut lines: Vec<String> = definition
        .attributes
        .iter()
        .map(|(name, attribute)| format!("    {}", column(name, attribute)))
        .collect();

    let keys = definition.primary_keys();
    if !keys.is_empty() {
        let keys: Vec<String> = keys.into_iter().map(quote_ident).collect();
        lines.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        qualified_table(definition),
        lines.join(",\n")
    )
}

/// Name of an index: its declared name, or the table joined with its fields.
pub fn index_name(definition: &ModelDefinition, index: &IndexDef) -> String {
    index.name.clone().unwrap_or_else(|| {
        let mut parts = vec![definition.table_name().to_owned()];
        parts.extend(index.fields.iter().cloned());
        parts.join("_")
    })
}

/// `CREATE [UNIQUE] INDEX IF NOT EXISTS` for one index.
///
/// An index method may be given in the index's `using` option. Only a bare
/// method name (`btree`, `gin`, ...) is accepted; anything else is left out.
pub fn create_index(definition: &ModelDefinition, index: &IndexDef) -> String {
    let unique = if index.is_unique() { "UNIQUE " } else { "" };
    let using = match index.extra.get("using") {
        None => String::new(),
        Some(Value::String(method)) if is_index_method(method) => format!(" USING {method}"),
        Some(other) => {
            tracing::warn!(
                model = definition.name.as_str(),
                using = %other,
                "Ignoring invalid index method"
            );
            String::new()
        }
    };
    let fields: Vec<String> = index.fields.iter().map(|f| quote_ident(f)).collect();

    format!(
        "CREATE {unique}INDEX IF NOT EXISTS {} ON {}{using} ({})",
        quote_ident(&index_name(definition, index)),
        qualified_table(definition),
        fields.join(", ")
    )
}

fn is_index_method(method: &str) -> bool {
    !method.is_empty() && method.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

/// Index statements for every index of a model.
pub fn create_indexes(definition: &ModelDefinition) -> Vec<String> {
    definition
        .options
        .indexes
        .iter()
        .filter(|index| !index.fields.is_empty())
        .map(|index| create_index(definition, index))
        .collect()
}

/// The table statement followed by the index statements.
pub fn schema_statements(definition: &ModelDefinition) -> Vec<String> {
    let mut statements = vec![create_table(definition)];
    statements.extend(create_indexes(definition));
    statements
}
