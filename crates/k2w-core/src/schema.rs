//! Warehouse table schemas.
//!
//! Each recognized event type has a fixed, immutable schema built once at
//! startup and shared read-only across workers. The serde representation
//! matches the warehouse REST surface: `{"name", "type", "mode", "fields"}`
//! with upper-case type and mode tokens.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WriteError;
use crate::event::Event;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit integer; a JSON float or string is a violation
    Integer,
    /// 64-bit float; accepts any JSON number
    Float,
    /// RFC-3339 string or numeric epoch seconds
    Timestamp,
    /// Nested record with its own field list
    Record,
}

/// Field mode, warehouse convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    /// May be absent or null
    #[default]
    Nullable,
    /// Must be present and non-null
    Required,
    /// JSON array of the declared type
    Repeated,
}

/// One field of a table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, matched against event keys
    pub name: String,

    /// Declared type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// NULLABLE / REQUIRED / REPEATED
    #[serde(default)]
    pub mode: FieldMode,

    /// Nested fields, for RECORD types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDescriptor>,
}

impl FieldDescriptor {
    /// A nullable field of the given type.
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode: FieldMode::Nullable,
            fields: Vec::new(),
        }
    }

    /// Mark the field required.
    pub fn required(mut self) -> Self {
        self.mode = FieldMode::Required;
        self
    }

    /// Mark the field repeated.
    pub fn repeated(mut self) -> Self {
        self.mode = FieldMode::Repeated;
        self
    }

    /// Attach nested fields (RECORD types).
    pub fn with_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.fields = fields;
        self
    }
}

/// An ordered, immutable table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Field descriptors in declaration order
    pub fields: Vec<FieldDescriptor>,
}

impl TableSchema {
    /// Schema for the `order_events` table.
    pub fn order() -> Self {
        use FieldType::*;
        Self {
            fields: vec![
                FieldDescriptor::new("event_type", String),
                FieldDescriptor::new("order_id", String).required(),
                FieldDescriptor::new("customer_id", String),
                FieldDescriptor::new("order_date", Timestamp),
                FieldDescriptor::new("status", String),
                FieldDescriptor::new("items", Record)
                    .repeated()
                    .with_fields(vec![
                        FieldDescriptor::new("product_id", String),
                        FieldDescriptor::new("product_name", String),
                        FieldDescriptor::new("quantity", Integer),
                        FieldDescriptor::new("price", Float),
                    ]),
                FieldDescriptor::new("shipping_address", Record).with_fields(vec![
                    FieldDescriptor::new("street", String),
                    FieldDescriptor::new("city", String),
                    FieldDescriptor::new("country", String),
                ]),
                FieldDescriptor::new("total_amount", Float),
                FieldDescriptor::new("ingestion_time", Timestamp),
            ],
        }
    }

    /// Schema for the `inventory_events` table.
    pub fn inventory() -> Self {
        use FieldType::*;
        Self {
            fields: vec![
                FieldDescriptor::new("event_type", String),
                FieldDescriptor::new("inventory_id", String).required(),
                FieldDescriptor::new("product_id", String),
                FieldDescriptor::new("warehouse_id", String),
                FieldDescriptor::new("quantity_change", Integer),
                FieldDescriptor::new("reason", String),
                FieldDescriptor::new("timestamp", Timestamp),
                FieldDescriptor::new("ingestion_time", Timestamp),
            ],
        }
    }

    /// Schema for the `user_activity_events` table.
    pub fn user_activity() -> Self {
        use FieldType::*;
        Self {
            fields: vec![
                FieldDescriptor::new("event_type", String),
                FieldDescriptor::new("user_id", String),
                FieldDescriptor::new("activity_type", String),
                FieldDescriptor::new("ip_address", String),
                FieldDescriptor::new("user_agent", String),
                FieldDescriptor::new("timestamp", Timestamp),
                FieldDescriptor::new("metadata", String),
                FieldDescriptor::new("ingestion_time", Timestamp),
            ],
        }
    }

    /// Validate an event against this schema.
    ///
    /// Checks required fields and declared types, recursing into repeated
    /// and record fields. Fields the schema does not declare are ignored
    /// here (they are dropped at projection). `table` only labels the error.
    pub fn validate_event(&self, table: &str, event: &Event) -> Result<(), WriteError> {
        validate_fields(&self.fields, event.fields(), table, "")
    }

    /// Project an event onto this schema's field names.
    ///
    /// Declared fields are copied (records projected recursively); unknown
    /// fields are dropped; absent nullable fields are omitted rather than
    /// materialized as explicit nulls.
    pub fn project(&self, event: &Event) -> Map<String, Value> {
        project_fields(&self.fields, event.fields())
    }
}

fn validate_fields(
    fields: &[FieldDescriptor],
    values: &Map<String, Value>,
    table: &str,
    prefix: &str,
) -> Result<(), WriteError> {
    for field in fields {
        let path = join_path(prefix, &field.name);
        match values.get(&field.name) {
            None | Some(Value::Null) => {
                if field.mode == FieldMode::Required {
                    return Err(WriteError::SchemaViolation {
                        table: table.to_string(),
                        field: path,
                        reason: "required field is missing or null".to_string(),
                    });
                }
            }
            Some(value) => validate_value(field, value, table, &path)?,
        }
    }
    Ok(())
}

fn validate_value(
    field: &FieldDescriptor,
    value: &Value,
    table: &str,
    path: &str,
) -> Result<(), WriteError> {
    if field.mode == FieldMode::Repeated {
        let items = value.as_array().ok_or_else(|| WriteError::SchemaViolation {
            table: table.to_string(),
            field: path.to_string(),
            reason: format!("expected array for repeated field, got {}", kind_of(value)),
        })?;
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", path, i);
            validate_scalar(field, item, table, &item_path)?;
        }
        Ok(())
    } else {
        validate_scalar(field, value, table, path)
    }
}

fn validate_scalar(
    field: &FieldDescriptor,
    value: &Value,
    table: &str,
    path: &str,
) -> Result<(), WriteError> {
    let violation = |reason: String| WriteError::SchemaViolation {
        table: table.to_string(),
        field: path.to_string(),
        reason,
    };

    match field.field_type {
        FieldType::String => {
            if !value.is_string() {
                return Err(violation(format!("expected STRING, got {}", kind_of(value))));
            }
        }
        FieldType::Integer => {
            let is_integer = matches!(value, Value::Number(n) if n.is_i64() || n.is_u64());
            if !is_integer {
                return Err(violation(format!(
                    "expected INTEGER, got {}",
                    kind_of(value)
                )));
            }
        }
        FieldType::Float => {
            if !value.is_number() {
                return Err(violation(format!("expected FLOAT, got {}", kind_of(value))));
            }
        }
        FieldType::Timestamp => match value {
            Value::String(s) => {
                if DateTime::parse_from_rfc3339(s).is_err() {
                    return Err(violation(format!(
                        "expected TIMESTAMP, got unparsable string {:?}",
                        s
                    )));
                }
            }
            Value::Number(_) => {}
            other => {
                return Err(violation(format!(
                    "expected TIMESTAMP, got {}",
                    kind_of(other)
                )));
            }
        },
        FieldType::Record => {
            let nested = value.as_object().ok_or_else(|| {
                violation(format!("expected RECORD, got {}", kind_of(value)))
            })?;
            validate_fields(&field.fields, nested, table, path)?;
        }
    }
    Ok(())
}

fn project_fields(fields: &[FieldDescriptor], values: &Map<String, Value>) -> Map<String, Value> {
    let mut row = Map::new();
    for field in fields {
        let Some(value) = values.get(&field.name) else {
            continue;
        };

        let projected = match (field.field_type, field.mode) {
            (FieldType::Record, FieldMode::Repeated) => match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(nested) => {
                                Value::Object(project_fields(&field.fields, nested))
                            }
                            other => other.clone(),
                        })
                        .collect(),
                ),
                other => other.clone(),
            },
            (FieldType::Record, _) => match value {
                Value::Object(nested) => Value::Object(project_fields(&field.fields, nested)),
                other => other.clone(),
            },
            _ => value.clone(),
        };

        row.insert(field.name.clone(), projected);
    }
    row
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> Event {
        Event::from_value(value).unwrap()
    }

    fn valid_order() -> Event {
        event(json!({
            "event_type": "order",
            "order_id": "o-1001",
            "customer_id": "c-7",
            "order_date": "2024-03-05T13:59:01Z",
            "status": "confirmed",
            "items": [
                {"product_id": "p-1", "product_name": "Widget", "quantity": 2, "price": 9.5},
                {"product_id": "p-2", "product_name": "Gadget", "quantity": 1, "price": 24.0}
            ],
            "shipping_address": {"street": "1 Main St", "city": "Oslo", "country": "NO"},
            "total_amount": 43.0,
            "ingestion_time": "2024-03-05T14:07:22.123456Z"
        }))
    }

    #[test]
    fn test_valid_order_passes() {
        let schema = TableSchema::order();
        assert!(schema.validate_event("order_events", &valid_order()).is_ok());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let schema = TableSchema::order();
        let e = event(json!({"event_type": "order", "status": "confirmed"}));
        let err = schema.validate_event("order_events", &e).unwrap_err();
        match err {
            WriteError::SchemaViolation { table, field, .. } => {
                assert_eq!(table, "order_events");
                assert_eq!(field, "order_id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_required_field_rejected() {
        let schema = TableSchema::inventory();
        let e = event(json!({"event_type": "inventory", "inventory_id": null}));
        assert!(schema.validate_event("inventory_events", &e).is_err());
    }

    #[test]
    fn test_string_where_integer_declared_rejected() {
        let schema = TableSchema::inventory();
        let e = event(json!({
            "event_type": "inventory",
            "inventory_id": "i-1",
            "quantity_change": "seven"
        }));
        let err = schema.validate_event("inventory_events", &e).unwrap_err();
        match err {
            WriteError::SchemaViolation { field, reason, .. } => {
                assert_eq!(field, "quantity_change");
                assert!(reason.contains("INTEGER"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_float_where_integer_declared_rejected() {
        let schema = TableSchema::inventory();
        let e = event(json!({
            "event_type": "inventory",
            "inventory_id": "i-1",
            "quantity_change": 2.5
        }));
        assert!(schema.validate_event("inventory_events", &e).is_err());
    }

    #[test]
    fn test_integer_accepted_for_float_field() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert("total_amount", json!(43));
        assert!(schema.validate_event("order_events", &e).is_ok());
    }

    #[test]
    fn test_bad_timestamp_string_rejected() {
        let schema = TableSchema::user_activity();
        let e = event(json!({
            "event_type": "user_activity",
            "timestamp": "half past nine"
        }));
        assert!(schema.validate_event("user_activity_events", &e).is_err());
    }

    #[test]
    fn test_epoch_number_accepted_for_timestamp() {
        let schema = TableSchema::user_activity();
        let e = event(json!({
            "event_type": "user_activity",
            "timestamp": 1709647642
        }));
        assert!(schema.validate_event("user_activity_events", &e).is_ok());
    }

    #[test]
    fn test_nested_record_violation_reports_path() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert(
            "items",
            json!([{"product_id": "p-1", "quantity": "two"}]),
        );
        let err = schema.validate_event("order_events", &e).unwrap_err();
        match err {
            WriteError::SchemaViolation { field, .. } => {
                assert_eq!(field, "items[0].quantity");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_repeated_field_must_be_array() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert("items", json!({"product_id": "p-1"}));
        assert!(schema.validate_event("order_events", &e).is_err());
    }

    #[test]
    fn test_unknown_fields_ignored_by_validation() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert("not_in_schema", json!({"anything": [1, 2, 3]}));
        assert!(schema.validate_event("order_events", &e).is_ok());
    }

    #[test]
    fn test_projection_drops_unknown_and_keeps_declared() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert("not_in_schema", json!("dropped"));

        let row = schema.project(&e);
        assert!(row.contains_key("order_id"));
        assert!(row.contains_key("items"));
        assert!(!row.contains_key("not_in_schema"));
    }

    #[test]
    fn test_projection_recurses_into_records() {
        let schema = TableSchema::order();
        let mut e = valid_order();
        e.insert(
            "shipping_address",
            json!({"street": "1 Main St", "city": "Oslo", "country": "NO", "planet": "Earth"}),
        );

        let row = schema.project(&e);
        let address = row.get("shipping_address").unwrap().as_object().unwrap();
        assert!(address.contains_key("city"));
        assert!(!address.contains_key("planet"));
    }

    #[test]
    fn test_projection_omits_absent_nullable_fields() {
        let schema = TableSchema::inventory();
        let e = event(json!({"event_type": "inventory", "inventory_id": "i-1"}));
        let row = schema.project(&e);
        assert!(!row.contains_key("reason"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_schema_serializes_to_warehouse_shape() {
        let schema = TableSchema::inventory();
        let json = serde_json::to_value(&schema).unwrap();
        let fields = json.get("fields").unwrap().as_array().unwrap();

        let quantity = fields
            .iter()
            .find(|f| f.get("name").unwrap() == "quantity_change")
            .unwrap();
        assert_eq!(quantity.get("type").unwrap(), "INTEGER");
        assert_eq!(quantity.get("mode").unwrap(), "NULLABLE");

        let required = fields
            .iter()
            .find(|f| f.get("name").unwrap() == "inventory_id")
            .unwrap();
        assert_eq!(required.get("mode").unwrap(), "REQUIRED");
    }

    #[test]
    fn test_order_schema_nested_serialization() {
        let schema = TableSchema::order();
        let json = serde_json::to_value(&schema).unwrap();
        let fields = json.get("fields").unwrap().as_array().unwrap();

        let items = fields
            .iter()
            .find(|f| f.get("name").unwrap() == "items")
            .unwrap();
        assert_eq!(items.get("type").unwrap(), "RECORD");
        assert_eq!(items.get("mode").unwrap(), "REPEATED");
        assert_eq!(items.get("fields").unwrap().as_array().unwrap().len(), 4);

        // Scalar fields must not carry an empty nested list
        let status = fields
            .iter()
            .find(|f| f.get("name").unwrap() == "status")
            .unwrap();
        assert!(status.get("fields").is_none());
    }
}
