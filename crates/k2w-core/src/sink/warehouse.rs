//! Warehouse sink: append-only, schema-enforced table writes.
//!
//! The sink validates every row against the table's fixed schema before
//! anything is written (a violation aborts the whole batch - no partial
//! rows), ensures the table exists with create-if-absent semantics, and
//! appends projected rows. It never updates, deletes, or deduplicates, and
//! it never alters an existing table's schema.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WarehouseConfig;
use crate::error::{Error, WriteError};
use crate::event::Event;
use crate::schema::TableSchema;

type WriteResult<T> = std::result::Result<T, WriteError>;

/// Operations a warehouse backend must provide.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Whether the table exists.
    async fn table_exists(&self, table: &str) -> WriteResult<bool>;

    /// Create the table with the given schema. Creating a table that
    /// already exists is not an error and must leave it untouched.
    async fn create_table(&self, table: &str, schema: &TableSchema) -> WriteResult<()>;

    /// Append rows to the table.
    async fn insert_rows(&self, table: &str, rows: Vec<Map<String, Value>>) -> WriteResult<()>;
}

/// Schema-enforcing sink in front of a [`TableStore`].
pub struct WarehouseSink {
    store: Arc<dyn TableStore>,
    /// Tables already verified or created this process
    ensured: DashSet<String>,
}

impl WarehouseSink {
    /// Wrap a backend store.
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            ensured: DashSet::new(),
        }
    }

    /// Build the sink from configuration: REST backend when an endpoint is
    /// set, otherwise an in-process store for development.
    pub fn from_config(config: &WarehouseConfig) -> crate::Result<Self> {
        let store: Arc<dyn TableStore> = match config.endpoint {
            Some(ref endpoint) => Arc::new(RestTableStore::new(
                endpoint,
                &config.project,
                &config.dataset,
                config.auth_token.as_deref(),
                Duration::from_secs(config.request_timeout_seconds),
            )?),
            None => {
                warn!("No warehouse endpoint configured, using in-process table store");
                Arc::new(MemoryTableStore::new())
            }
        };

        Ok(Self::new(store))
    }

    /// Append events to `table`, enforcing `schema`.
    ///
    /// Every event is validated before any row is written; the table is
    /// created from the schema if absent (idempotent, cached per process);
    /// rows are projected onto the schema's field names and appended.
    pub async fn append_batch(
        &self,
        table: &str,
        schema: &TableSchema,
        events: &[Event],
    ) -> WriteResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        for event in events {
            schema.validate_event(table, event)?;
        }

        self.ensure_table(table, schema).await?;

        let rows: Vec<Map<String, Value>> =
            events.iter().map(|event| schema.project(event)).collect();
        let row_count = rows.len();

        self.store.insert_rows(table, rows).await?;

        debug!(table = %table, rows = row_count, "Rows appended");
        Ok(())
    }

    /// Check the backend is reachable by looking up a table.
    ///
    /// Used at startup for fail-fast wiring; the lookup result itself does
    /// not matter.
    pub async fn probe(&self, table: &str) -> WriteResult<()> {
        self.store.table_exists(table).await.map(|_| ())
    }

    async fn ensure_table(&self, table: &str, schema: &TableSchema) -> WriteResult<()> {
        if self.ensured.contains(table) {
            return Ok(());
        }

        if !self.store.table_exists(table).await? {
            self.store.create_table(table, schema).await?;
            info!(table = %table, "Table created");
        }

        self.ensured.insert(table.to_string());
        Ok(())
    }
}

/// REST warehouse backend.
///
/// Speaks a BigQuery-style surface: table lookup and creation under
/// `projects/{project}/datasets/{dataset}/tables`, row appends via
/// `insertAll` with per-row error reporting.
pub struct RestTableStore {
    client: reqwest::Client,
    endpoint: String,
    project: String,
    dataset: String,
    auth_token: Option<String>,
}

impl RestTableStore {
    /// Create a client for the given endpoint and dataset coordinates.
    pub fn new(
        endpoint: &str,
        project: &str,
        dataset: &str,
        auth_token: Option<&str>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build warehouse client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project: project.to_string(),
            dataset: dataset.to_string(),
            auth_token: auth_token.map(String::from),
        })
    }

    fn tables_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables",
            self.endpoint, self.project, self.dataset
        )
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.tables_url(), table)
    }

    fn insert_url(&self, table: &str) -> String {
        format!("{}/insertAll", self.table_url(table))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn warehouse_error(&self, table: &str, message: impl Into<String>) -> WriteError {
        WriteError::Warehouse {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl TableStore for RestTableStore {
    async fn table_exists(&self, table: &str) -> WriteResult<bool> {
        let response = self
            .request(self.client.get(self.table_url(table)))
            .send()
            .await
            .map_err(|e| self.warehouse_error(table, e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.warehouse_error(
                table,
                format!("table lookup returned {}", status),
            )),
        }
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> WriteResult<()> {
        let body = json!({
            "tableReference": {
                "projectId": self.project,
                "datasetId": self.dataset,
                "tableId": table,
            },
            "schema": schema,
        });

        let response = self
            .request(self.client.post(self.tables_url()).json(&body))
            .send()
            .await
            .map_err(|e| self.warehouse_error(table, e.to_string()))?;

        // 409: somebody else created it first - exactly what we wanted
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            Ok(())
        } else {
            Err(self.warehouse_error(
                table,
                format!("table create returned {}", response.status()),
            ))
        }
    }

    async fn insert_rows(&self, table: &str, rows: Vec<Map<String, Value>>) -> WriteResult<()> {
        let body = json!({
            "rows": rows
                .into_iter()
                .map(|row| json!({"json": row}))
                .collect::<Vec<_>>(),
        });

        let response = self
            .request(self.client.post(self.insert_url(table)).json(&body))
            .send()
            .await
            .map_err(|e| self.warehouse_error(table, e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.warehouse_error(
                table,
                format!("insertAll returned {}", response.status()),
            ));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| self.warehouse_error(table, e.to_string()))?;

        if let Some(errors) = reply.get("insertErrors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(
                    self.warehouse_error(table, format!("insertAll rejected rows: {}", errors[0]))
                );
            }
        }

        Ok(())
    }
}

/// In-process table store.
///
/// Used when no warehouse endpoint is configured (development) and by
/// tests. Preserves the contract: create-if-absent never alters an existing
/// table, appends are visible all-or-nothing.
pub struct MemoryTableStore {
    tables: DashMap<String, MemoryTable>,
}

struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Map<String, Value>>,
}

impl MemoryTableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Rows currently in a table (empty if the table does not exist).
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        self.tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// The schema a table was created with.
    pub fn table_schema(&self, table: &str) -> Option<TableSchema> {
        self.tables.get(table).map(|t| t.schema.clone())
    }

    /// Names of all existing tables.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.key().clone()).collect()
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn table_exists(&self, table: &str) -> WriteResult<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> WriteResult<()> {
        self.tables.entry(table.to_string()).or_insert_with(|| MemoryTable {
            schema: schema.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: Vec<Map<String, Value>>) -> WriteResult<()> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| WriteError::Warehouse {
                table: table.to_string(),
                message: "table does not exist".to_string(),
            })?;
        entry.rows.extend(rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_event(order_id: &str) -> Event {
        Event::from_value(json!({
            "event_type": "order",
            "order_id": order_id,
            "total_amount": 10.0,
            "ingestion_time": "2024-03-05T14:07:22.123456Z"
        }))
        .unwrap()
    }

    fn sink_with_memory() -> (WarehouseSink, Arc<MemoryTableStore>) {
        let store = Arc::new(MemoryTableStore::new());
        (WarehouseSink::new(Arc::clone(&store) as Arc<dyn TableStore>), store)
    }

    #[tokio::test]
    async fn test_append_creates_table_and_rows() {
        let (sink, store) = sink_with_memory();
        let schema = TableSchema::order();

        sink.append_batch("order_events", &schema, &[order_event("o-1")])
            .await
            .unwrap();

        assert_eq!(store.rows("order_events").len(), 1);
        assert_eq!(store.table_schema("order_events"), Some(schema));
    }

    #[tokio::test]
    async fn test_append_is_append_only() {
        let (sink, store) = sink_with_memory();
        let schema = TableSchema::order();

        sink.append_batch("order_events", &schema, &[order_event("o-1")])
            .await
            .unwrap();
        sink.append_batch("order_events", &schema, &[order_event("o-2")])
            .await
            .unwrap();

        let rows = store.rows("order_events");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("order_id"), Some(&json!("o-1")));
        assert_eq!(rows[1].get("order_id"), Some(&json!("o-2")));
    }

    #[tokio::test]
    async fn test_schema_violation_writes_nothing() {
        let (sink, store) = sink_with_memory();
        let schema = TableSchema::inventory();

        let bad = Event::from_value(json!({
            "event_type": "inventory",
            "inventory_id": "i-1",
            "quantity_change": "not-a-number"
        }))
        .unwrap();

        let err = sink
            .append_batch("inventory_events", &schema, &[bad])
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::SchemaViolation { .. }));
        assert!(store.rows("inventory_events").is_empty());
        // Validation failed before create: the table must not exist either
        assert!(store.table_names().is_empty());
    }

    #[tokio::test]
    async fn test_one_bad_row_aborts_whole_batch() {
        let (sink, store) = sink_with_memory();
        let schema = TableSchema::order();

        let good = order_event("o-1");
        let bad = Event::from_value(json!({"event_type": "order"})).unwrap();

        let err = sink
            .append_batch("order_events", &schema, &[good, bad])
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::SchemaViolation { .. }));
        assert!(store.rows("order_events").is_empty());
    }

    #[tokio::test]
    async fn test_create_if_absent_never_alters_schema() {
        let (sink, store) = sink_with_memory();

        sink.append_batch("order_events", &TableSchema::order(), &[order_event("o-1")])
            .await
            .unwrap();

        // A second create with a different schema leaves the original intact
        store
            .create_table("order_events", &TableSchema::inventory())
            .await
            .unwrap();

        assert_eq!(
            store.table_schema("order_events"),
            Some(TableSchema::order())
        );
    }

    #[tokio::test]
    async fn test_rows_are_projected() {
        let (sink, store) = sink_with_memory();
        let schema = TableSchema::order();

        let mut event = order_event("o-1");
        event.insert("not_in_schema", json!("dropped"));

        sink.append_batch("order_events", &schema, &[event])
            .await
            .unwrap();

        let rows = store.rows("order_events");
        assert!(!rows[0].contains_key("not_in_schema"));
        assert!(rows[0].contains_key("ingestion_time"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (sink, store) = sink_with_memory();
        sink.append_batch("order_events", &TableSchema::order(), &[])
            .await
            .unwrap();
        assert!(store.table_names().is_empty());
    }

    #[tokio::test]
    async fn test_insert_into_missing_table_fails() {
        let store = MemoryTableStore::new();
        let result = store.insert_rows("ghost", vec![Map::new()]).await;
        assert!(matches!(result, Err(WriteError::Warehouse { .. })));
    }

    #[test]
    fn test_rest_store_urls() {
        let store = RestTableStore::new(
            "https://warehouse.example.com/v2/",
            "acme",
            "events",
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            store.tables_url(),
            "https://warehouse.example.com/v2/projects/acme/datasets/events/tables"
        );
        assert_eq!(
            store.table_url("order_events"),
            "https://warehouse.example.com/v2/projects/acme/datasets/events/tables/order_events"
        );
        assert_eq!(
            store.insert_url("order_events"),
            "https://warehouse.example.com/v2/projects/acme/datasets/events/tables/order_events/insertAll"
        );
    }
}
