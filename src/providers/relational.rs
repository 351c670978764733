// The relational provider (C6): each collection becomes a table in an embedded
// SQLite database, with columns inferred from the runtime type of each
// document's top-level fields and evolved via `ALTER TABLE ADD COLUMN` as new
// fields are observed. `rusqlite` is synchronous, so every statement runs on a
// blocking task via `with_conn`, keeping the async `Provider` signature honest
// without ever blocking the executor thread.

use crate::contracts::{Document, IndexDefinition, Operator, Provider, QueryOptions, SchemaDefinition};
use crate::error::{Result, StoreError};
use crate::types::{ValidatedCollectionName, ValidatedDocumentId};
use crate::validation::validate_connected;
use async_trait::async_trait;
use indexmap::IndexMap;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

#[derive(Debug, Clone, Deserialize)]
pub struct RelationalProviderConfig {
    /// A filesystem path, or `:memory:` for an ephemeral in-process database.
    pub file_path: String,
    pub foreign_keys: bool,
}

impl Default for RelationalProviderConfig {
    fn default() -> Self {
        Self {
            file_path: ":memory:".to_string(),
            foreign_keys: false,
        }
    }
}

pub struct RelationalProvider {
    config: RelationalProviderConfig,
    connected: bool,
    conn: Option<Arc<StdMutex<Connection>>>,
    in_transaction: Arc<AtomicBool>,
}

impl RelationalProvider {
    pub fn new(config: RelationalProviderConfig) -> Self {
        Self {
            config,
            connected: false,
            conn: None,
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| StoreError::connection("relational provider is not connected"))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::connection(format!("blocking task panicked: {e}")))?
        .map_err(StoreError::from)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_affinity(value: &Value) -> &'static str {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => "INTEGER",
        Value::Number(_) => "REAL",
        Value::Bool(_) => "INTEGER",
        Value::Null => "BLOB",
        Value::Array(_) | Value::Object(_) => "TEXT",
        Value::String(_) => "TEXT",
    }
}

fn json_to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .unwrap_or_else(|| SqlValue::Real(n.as_f64().unwrap_or(0.0))),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            SqlValue::Text(serde_json::to_string(value).unwrap_or_default())
        }
    }
}

fn sql_value_to_json(value_ref: ValueRef<'_>) -> Value {
    match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            match serde_json::from_str::<Value>(&text) {
                Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
                _ => Value::String(text),
            }
        }
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Synthesise a `LIKE` pattern from a regex by stripping anchors and converting
/// `.*` to `%` and `.` to `_`. This is a documented, lossy approximation: any
/// other regex feature (character classes, alternation, quantifiers) is not
/// translated and will not behave like a real regex match.
fn regex_to_like(pattern: &str) -> String {
    let stripped = pattern.trim_start_matches('^').trim_end_matches('$');
    stripped.replace(".*", "%").replace('.', "_")
}

fn row_to_document(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Document> {
    let mut map = Map::new();
    for (idx, name) in columns.iter().enumerate() {
        let value_ref = row.get_ref(idx)?;
        map.insert(name.clone(), sql_value_to_json(value_ref));
    }
    Ok(Document::from_map(map))
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn ensure_table_sync(conn: &Connection, table: &str, sample: &Document) -> rusqlite::Result<()> {
    let quoted = quote_ident(table);
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {quoted} (id TEXT PRIMARY KEY)"),
        [],
    )?;

    let existing = table_columns(conn, table)?;
    for (field, value) in sample.as_map() {
        if field == "id" || existing.contains(field) {
            continue;
        }
        let affinity = column_affinity(value);
        let col = quote_ident(field);
        conn.execute(
            &format!("ALTER TABLE {quoted} ADD COLUMN {col} {affinity}"),
            [],
        )?;
    }
    Ok(())
}

fn insert_row_sync(conn: &Connection, table: &str, id: &str, doc: &Document) -> rusqlite::Result<()> {
    ensure_table_sync(conn, table, doc)?;

    let mut columns = vec!["id".to_string()];
    let mut values = vec![SqlValue::Text(id.to_string())];
    for (field, value) in doc.as_map() {
        if field == "id" {
            continue;
        }
        columns.push(field.clone());
        values.push(json_to_sql_value(value));
    }

    let quoted_table = quote_ident(table);
    let quoted_cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {quoted_table} ({}) VALUES ({placeholders})",
        quoted_cols.join(", ")
    );

    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
    match conn.execute(&sql, params.as_slice()) {
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

fn build_where(filters: &IndexMap<String, crate::contracts::FilterCondition>) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for (field, condition) in filters {
        let col = quote_ident(field);
        match condition.operator {
            Operator::Eq => {
                clauses.push(format!("{col} = ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::Ne => {
                clauses.push(format!("{col} != ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::Gt => {
                clauses.push(format!("{col} > ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::Gte => {
                clauses.push(format!("{col} >= ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::Lt => {
                clauses.push(format!("{col} < ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::Lte => {
                clauses.push(format!("{col} <= ?"));
                params.push(json_to_sql_value(&condition.value));
            }
            Operator::In => {
                let items = condition.value.as_array().cloned().unwrap_or_default();
                if items.is_empty() {
                    clauses.push("0".to_string());
                } else {
                    let placeholders = vec!["?"; items.len()].join(", ");
                    clauses.push(format!("{col} IN ({placeholders})"));
                    params.extend(items.iter().map(json_to_sql_value));
                }
            }
            Operator::Nin => {
                let items = condition.value.as_array().cloned().unwrap_or_default();
                if !items.is_empty() {
                    let placeholders = vec!["?"; items.len()].join(", ");
                    clauses.push(format!("{col} NOT IN ({placeholders})"));
                    params.extend(items.iter().map(json_to_sql_value));
                }
            }
            Operator::Regex => {
                let pattern = condition.value.as_str().unwrap_or_default();
                clauses.push(format!("{col} LIKE ?"));
                params.push(SqlValue::Text(regex_to_like(pattern)));
            }
        }
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, params)
}

#[async_trait]
impl Provider for RelationalProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            tracing::warn!("relational provider already connected; connect() is a no-op");
            return Ok(());
        }

        let path = self.config.file_path.clone();
        let enforce_fk = self.config.foreign_keys;
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(&path)?;
            if enforce_fk {
                conn.execute("PRAGMA foreign_keys = ON", [])?;
            }
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::connection(format!("blocking task panicked: {e}")))?
        .map_err(StoreError::from)?;

        self.conn = Some(Arc::new(StdMutex::new(conn)));
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            tracing::warn!("relational provider already disconnected; disconnect() is a no-op");
            return Ok(());
        }
        self.conn = None;
        self.connected = false;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn create(&mut self, collection: &str, mut document: Document) -> Result<Document> {
        validate_connected(self.connected)?;
        let collection_name = ValidatedCollectionName::new(collection)?;

        let id = match document.id() {
            Some(id) => ValidatedDocumentId::new(id)?.into_string(),
            None => {
                let generated = ValidatedDocumentId::generate();
                document.set_id(generated.as_str());
                generated.into_string()
            }
        };

        let table = collection_name.as_str().to_string();
        let doc_for_insert = document.clone();
        let id_for_insert = id.clone();
        let result = self
            .with_conn(move |conn| insert_row_sync(conn, &table, &id_for_insert, &doc_for_insert))
            .await;

        match result {
            Ok(()) => Ok(document),
            Err(StoreError::Query(msg)) if msg.contains("UNIQUE constraint failed") => Err(
                StoreError::query(format!("document '{id}' already exists in collection '{collection}'")),
            ),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let table = collection.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(None);
            }
            let quoted = quote_ident(&table);
            let mut stmt = conn.prepare(&format!("SELECT * FROM {quoted} WHERE id = ?1"))?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            stmt.query_row([&id], |row| row_to_document(row, &columns))
                .optional()
        })
        .await
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: Document,
    ) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let existing = self.read(collection, id).await?;
        let Some(mut existing) = existing else {
            return Ok(None);
        };
        existing.merge(&partial);

        let table = collection.to_string();
        let id_owned = id.to_string();
        let merged = existing.clone();
        self.with_conn(move |conn| {
            ensure_table_sync(conn, &table, &merged)?;
            let quoted = quote_ident(&table);
            let mut assignments = Vec::new();
            let mut values: Vec<SqlValue> = Vec::new();
            for (field, value) in merged.as_map() {
                if field == "id" {
                    continue;
                }
                assignments.push(format!("{} = ?", quote_ident(field)));
                values.push(json_to_sql_value(value));
            }
            values.push(SqlValue::Text(id_owned.clone()));
            let sql = format!(
                "UPDATE {quoted} SET {} WHERE id = ?",
                assignments.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> =
                values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
        .await?;

        Ok(Some(existing))
    }

    async fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let table = collection.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(false);
            }
            let quoted = quote_ident(&table);
            let changed = conn.execute(&format!("DELETE FROM {quoted} WHERE id = ?1"), [&id])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn query(&self, collection: &str, options: QueryOptions) -> Result<Vec<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;

        let table = collection.to_string();
        self.with_conn(move |conn| {
            if !table_exists(conn, &table)? {
                return Ok(Vec::new());
            }

            let quoted = quote_ident(&table);
            let (where_sql, where_params) = build_where(&options.filters);

            let order_sql = if options.sort_by.is_empty() {
                String::new()
            } else {
                let entries: Vec<String> = options
                    .sort_by
                    .iter()
                    .map(|entry| {
                        let direction = match entry.order {
                            crate::contracts::SortDirection::Asc => "ASC",
                            crate::contracts::SortDirection::Desc => "DESC",
                        };
                        format!("{} {direction}", quote_ident(&entry.field))
                    })
                    .collect();
                format!("ORDER BY {}", entries.join(", "))
            };

            let limit_sql = match (options.limit, options.offset) {
                (Some(limit), Some(offset)) => format!("LIMIT {limit} OFFSET {offset}"),
                (Some(limit), None) => format!("LIMIT {limit}"),
                (None, Some(offset)) => format!("LIMIT -1 OFFSET {offset}"),
                (None, None) => String::new(),
            };

            let sql = format!("SELECT * FROM {quoted} {where_sql} {order_sql} {limit_sql}");
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let params: Vec<&dyn rusqlite::ToSql> =
                where_params.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

            let rows = stmt.query_map(params.as_slice(), |row| row_to_document(row, &columns))?;
            rows.collect()
        })
        .await
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        validate_connected(self.connected)?;
        if self.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(StoreError::transaction(
                "a transaction is already active on this provider instance",
            ));
        }
        if let Err(e) = self.with_conn(|conn| conn.execute("BEGIN", [])).await {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        validate_connected(self.connected)?;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StoreError::transaction("no active transaction to commit"));
        }
        self.with_conn(|conn| conn.execute("COMMIT", [])).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        validate_connected(self.connected)?;
        if !self.in_transaction.swap(false, Ordering::SeqCst) {
            return Err(StoreError::transaction("no active transaction to roll back"));
        }
        self.with_conn(|conn| conn.execute("ROLLBACK", [])).await?;
        Ok(())
    }

    async fn ensure_schema(&mut self, collection: &str, def: Option<SchemaDefinition>) -> Result<()> {
        validate_connected(self.connected)?;
        let collection_name = ValidatedCollectionName::new(collection)?;
        let table = collection_name.as_str().to_string();
        let def = def.unwrap_or_default();

        self.with_conn(move |conn| {
            let quoted = quote_ident(&table);
            conn.execute(&format!("CREATE TABLE IF NOT EXISTS {quoted} (id TEXT PRIMARY KEY)"), [])?;
            let existing = table_columns(conn, &table)?;
            for (field, affinity) in def.fields.iter() {
                if field == "id" || existing.contains(field) {
                    continue;
                }
                conn.execute(
                    &format!("ALTER TABLE {quoted} ADD COLUMN {} {affinity}", quote_ident(field)),
                    [],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn ensure_index(&mut self, collection: &str, def: IndexDefinition) -> Result<()> {
        validate_connected(self.connected)?;
        let collection_name = ValidatedCollectionName::new(collection)?;
        let table = collection_name.as_str().to_string();

        self.with_conn(move |conn| {
            let unique = if def.unique { "UNIQUE " } else { "" };
            let cols: Vec<String> = def.fields.iter().map(|f| quote_ident(f)).collect();
            conn.execute(
                &format!(
                    "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_ident(&def.name),
                    quote_ident(&table),
                    cols.join(", ")
                ),
                [],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::FilterCondition;
    use serde_json::json;

    fn config() -> RelationalProviderConfig {
        RelationalProviderConfig {
            file_path: ":memory:".to_string(),
            foreign_keys: false,
        }
    }

    #[tokio::test]
    async fn create_and_read_roundtrip() {
        let mut provider = RelationalProvider::new(config());
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"name": "a", "value": 1})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        let read = provider.read("items", &id).await.unwrap().unwrap();
        assert_eq!(read.get("name"), Some(&json!("a")));
        assert_eq!(read.get("value"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn dynamic_columns_evolve() {
        let mut provider = RelationalProvider::new(config());
        provider.connect().await.unwrap();
        provider
            .create("items", Document::from_value(json!({"a": 1})).unwrap())
            .await
            .unwrap();
        provider
            .create("items", Document::from_value(json!({"a": 2, "b": "hi"})).unwrap())
            .await
            .unwrap();

        let opts = QueryOptions::new().with_filter("b", FilterCondition::eq(json!("hi")));
        let results = provider.query("items", opts).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("a"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn nested_values_round_trip() {
        let mut provider = RelationalProvider::new(config());
        provider.connect().await.unwrap();
        let created = provider
            .create(
                "items",
                Document::from_value(json!({"meta": {"tags": ["x", "y"]}})).unwrap(),
            )
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        let read = provider.read("items", &id).await.unwrap().unwrap();
        assert_eq!(read.get("meta"), Some(&json!({"tags": ["x", "y"]})));
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let mut provider = RelationalProvider::new(config());
        provider.connect().await.unwrap();
        provider
            .create("items", Document::from_value(json!({"id": "fixed"})).unwrap())
            .await
            .unwrap();
        let result = provider
            .create("items", Document::from_value(json!({"id": "fixed"})).unwrap())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn nested_transaction_rejected() {
        let mut provider = RelationalProvider::new(config());
        provider.connect().await.unwrap();
        provider.begin_transaction().await.unwrap();
        assert!(provider.begin_transaction().await.is_err());
        provider.rollback().await.unwrap();
    }
}
