//! In-memory tables with just enough Postgres behaviour to exercise a client:
//! generated ids, not-null and unique constraints, equality filters, ordering,
//! paging, and a change feed published in commit order.

use chrono::Utc;
use kiln_proto::{value_equals_text, ChangeData, ChangeType, ErrorBody};
use serde_json::{Map, Value};
use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::Mutex,
};
use tokio::sync::broadcast;
use tracing::debug;

/// Query string keys that are not column filters
const RESERVED: &[&str] = &["select", "order", "limit", "offset", "on_conflict", "columns"];

/// Shape and constraints of one table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSpec {
    pub name: String,
    /// Known columns. Empty means any column is accepted.
    pub columns: Vec<String>,
    pub required: Vec<String>,
    pub unique: Vec<String>,
    /// Only signed-in users may read, write or subscribe
    pub protected: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), ..Default::default() } }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn required(mut self, columns: &[&str]) -> Self {
        self.required = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    fn knows(&self, column: &str) -> bool { self.columns.is_empty() || column == "id" || self.columns.iter().any(|c| c == column) }
}

/// A request the backend refuses, with the status and body to answer it with
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub status: u16,
    pub body: ErrorBody,
}

impl Failure {
    pub fn new(status: u16, code: &str, message: impl Into<String>) -> Self { Self { status, body: ErrorBody::new(message).with_code(code) } }

    fn unknown_table(schema: &str, table: &str) -> Self {
        Self::new(404, "PGRST205", format!("Could not find the table '{}.{}' in the schema cache", schema, table))
    }

    fn unknown_column(table: &str, column: &str) -> Self { Self::new(400, "42703", format!("column {}.{} does not exist", table, column)) }
}

/// What realtime sockets are told about
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change(ChangeData),
    /// Close every channel, as a server shutdown would
    Close(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String),
    Neq(String),
    IsNull,
    NotNull,
}

impl Condition {
    fn parse(operand: &str) -> Option<Self> {
        match operand.split_once('.')? {
            ("eq", v) => Some(Condition::Eq(v.to_string())),
            ("neq", v) => Some(Condition::Neq(v.to_string())),
            ("is", "null") => Some(Condition::IsNull),
            ("not", "is.null") => Some(Condition::NotNull),
            _ => None,
        }
    }

    fn holds(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Condition::IsNull, v) => v.is_none_or(Value::is_null),
            (Condition::NotNull, v) => !v.is_none_or(Value::is_null),
            (Condition::Eq(expected), Some(v)) => !v.is_null() && value_equals_text(v, expected),
            (Condition::Neq(expected), Some(v)) => !v.is_null() && !value_equals_text(v, expected),
            (_, None) => false,
        }
    }
}

/// Row selection parsed from a query string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<(String, Condition)>,
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Selection {
    pub fn parse(params: &[(String, String)]) -> Result<Self, Failure> {
        let mut selection = Selection::default();
        for (key, value) in params {
            match key.as_str() {
                "select" if value == "*" => {}
                "select" => selection.columns = Some(value.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect()),
                "order" => {
                    let (column, direction) = value.rsplit_once('.').unwrap_or((value.as_str(), "asc"));
                    let ascending = match direction {
                        "asc" => true,
                        "desc" => false,
                        other => return Err(Failure::new(400, "PGRST100", format!("unknown order direction '{}'", other))),
                    };
                    selection.order = Some((column.to_string(), ascending));
                }
                "limit" => selection.limit = Some(value.parse().map_err(|_| Failure::new(400, "PGRST100", format!("invalid limit '{}'", value)))?),
                "offset" => selection.offset = value.parse().map_err(|_| Failure::new(400, "PGRST100", format!("invalid offset '{}'", value)))?,
                k if RESERVED.contains(&k) => {}
                column => {
                    let condition =
                        Condition::parse(value).ok_or_else(|| Failure::new(400, "PGRST100", format!("failed to parse filter ({}={})", column, value)))?;
                    selection.filters.push((column.to_string(), condition));
                }
            }
        }
        Ok(selection)
    }

    fn matches(&self, row: &Map<String, Value>) -> bool { self.filters.iter().all(|(column, condition)| condition.holds(row.get(column))) }

    fn check_columns(&self, spec: &TableSpec) -> Result<(), Failure> {
        let named = self.filters.iter().map(|(c, _)| c).chain(self.order.iter().map(|(c, _)| c)).chain(self.columns.iter().flatten());
        for column in named {
            if !spec.knows(column) {
                return Err(Failure::unknown_column(&spec.name, column));
            }
        }
        Ok(())
    }

    fn project(&self, row: &Map<String, Value>) -> Value {
        match &self.columns {
            None => Value::Object(row.clone()),
            Some(columns) => Value::Object(columns.iter().map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null))).collect()),
        }
    }
}

struct TableData {
    spec: TableSpec,
    rows: Vec<Map<String, Value>>,
    next_id: i64,
}

impl TableData {
    fn check_row(&self, row: &Map<String, Value>, skip: Option<usize>, pending: &[Map<String, Value>]) -> Result<(), Failure> {
        let name = &self.spec.name;
        for column in row.keys() {
            if !self.spec.knows(column) {
                return Err(Failure::new(400, "PGRST204", format!("Could not find the '{}' column of '{}' in the schema cache", column, name)));
            }
        }
        for column in &self.spec.required {
            if row.get(column).is_none_or(Value::is_null) {
                return Err(Failure::new(
                    400,
                    "23502",
                    format!("null value in column \"{}\" of relation \"{}\" violates not-null constraint", column, name),
                ));
            }
        }
        let others = self.rows.iter().enumerate().filter(|(i, _)| Some(*i) != skip).map(|(_, r)| r).chain(pending.iter());
        for other in others {
            for column in std::iter::once("id").chain(self.spec.unique.iter().map(String::as_str)) {
                match (row.get(column), other.get(column)) {
                    (Some(a), Some(b)) if !a.is_null() && a == b => {
                        return Err(Failure::new(409, "23505", format!("duplicate key value violates unique constraint \"{}_{}_key\"", name, column)));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// All tables of one schema
pub struct Backend {
    schema: String,
    tables: Mutex<HashMap<String, TableData>>,
    events: broadcast::Sender<RealtimeEvent>,
}

impl Backend {
    pub fn new(schema: impl Into<String>, specs: impl IntoIterator<Item = TableSpec>) -> Self {
        let tables = specs.into_iter().map(|spec| (spec.name.clone(), TableData { spec, rows: Vec::new(), next_id: 1 })).collect();
        let (events, _) = broadcast::channel(1024);
        Self { schema: schema.into(), tables: Mutex::new(tables), events }
    }

    pub fn schema(&self) -> &str { &self.schema }

    pub fn spec(&self, table: &str) -> Option<TableSpec> { self.lock().get(table).map(|t| t.spec.clone()) }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> { self.events.subscribe() }

    pub fn close_realtime(&self, reason: Option<String>) {
        let _ = self.events.send(RealtimeEvent::Close(reason));
    }

    /// Matching rows after paging, and the total before it
    pub fn select(&self, table: &str, selection: &Selection) -> Result<(Vec<Value>, usize), Failure> {
        let tables = self.lock();
        let data = tables.get(table).ok_or_else(|| Failure::unknown_table(&self.schema, table))?;
        selection.check_columns(&data.spec)?;

        let mut rows: Vec<&Map<String, Value>> = data.rows.iter().filter(|r| selection.matches(r)).collect();
        if let Some((column, ascending)) = &selection.order {
            rows.sort_by(|a, b| {
                let ordering = compare(a.get(column), b.get(column));
                if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        let total = rows.len();
        let page = rows.into_iter().skip(selection.offset).take(selection.limit.unwrap_or(usize::MAX)).map(|r| selection.project(r)).collect();
        Ok((page, total))
    }

    /// Insert one object or an array of objects. All rows are checked before any is stored.
    pub fn insert(&self, table: &str, body: Value) -> Result<Vec<Value>, Failure> {
        let mut tables = self.lock();
        let data = tables.get_mut(table).ok_or_else(|| Failure::unknown_table(&self.schema, table))?;

        let items = match body {
            Value::Array(items) => items,
            single => vec![single],
        };
        let mut pending = Vec::with_capacity(items.len());
        let mut next_id = data.next_id;
        for item in items {
            let Value::Object(mut row) = item else {
                return Err(Failure::new(400, "PGRST102", "All object keys must match"));
            };
            if row.get("id").is_none_or(Value::is_null) {
                row.insert("id".to_string(), Value::from(next_id));
                next_id += 1;
            }
            data.check_row(&row, None, &pending)?;
            pending.push(row);
        }

        data.next_id = next_id;
        data.rows.extend(pending.iter().cloned());
        for row in &pending {
            self.publish(table, ChangeType::Insert, Some(Value::Object(row.clone())), None);
        }
        debug!("Inserted {} rows into {}", pending.len(), table);
        Ok(pending.into_iter().map(Value::Object).collect())
    }

    pub fn update(&self, table: &str, selection: &Selection, patch: Value) -> Result<Vec<Value>, Failure> {
        let mut tables = self.lock();
        let data = tables.get_mut(table).ok_or_else(|| Failure::unknown_table(&self.schema, table))?;
        selection.check_columns(&data.spec)?;
        let Value::Object(patch) = patch else {
            return Err(Failure::new(400, "PGRST102", "Empty or invalid json"));
        };

        let targets: Vec<usize> = data.rows.iter().enumerate().filter(|(_, r)| selection.matches(r)).map(|(i, _)| i).collect();
        let mut updated = Vec::with_capacity(targets.len());
        for &index in &targets {
            let mut row = data.rows[index].clone();
            row.extend(patch.clone());
            data.check_row(&row, Some(index), &[])?;
            updated.push((index, row));
        }

        for (index, row) in &updated {
            let old = std::mem::replace(&mut data.rows[*index], row.clone());
            self.publish(table, ChangeType::Update, Some(Value::Object(row.clone())), Some(key_of(&old)));
        }
        Ok(updated.into_iter().map(|(_, row)| Value::Object(row)).collect())
    }

    pub fn delete(&self, table: &str, selection: &Selection) -> Result<Vec<Value>, Failure> {
        let mut tables = self.lock();
        let data = tables.get_mut(table).ok_or_else(|| Failure::unknown_table(&self.schema, table))?;
        selection.check_columns(&data.spec)?;

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut data.rows).into_iter().partition(|r| selection.matches(r));
        data.rows = kept;
        for row in &removed {
            // like a default replica identity, deletes only carry the key
            self.publish(table, ChangeType::Delete, None, Some(key_of(row)));
        }
        Ok(removed.into_iter().map(Value::Object).collect())
    }

    fn publish(&self, table: &str, change_type: ChangeType, record: Option<Value>, old_record: Option<Value>) {
        let data = ChangeData {
            change_type,
            schema: self.schema.clone(),
            table: table.to_string(),
            commit_timestamp: Some(Utc::now().to_rfc3339()),
            record,
            old_record,
        };
        // no receivers is fine
        let _ = self.events.send(RealtimeEvent::Change(data));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TableData>> { self.tables.lock().unwrap_or_else(|e| e.into_inner()) }
}

fn key_of(row: &Map<String, Value>) -> Value {
    let mut key = Map::new();
    if let Some(id) = row.get("id") {
        key.insert("id".to_string(), id.clone());
    }
    Value::Object(key)
}

/// Postgres-like ordering: numbers numerically, text lexically, nulls last
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

    fn backend() -> Backend {
        Backend::new("public", [TableSpec::new("products").columns(&["sku", "name", "site", "price"]).required(&["sku"]).unique(&["sku"])])
    }

    #[test]
    fn generated_ids_and_constraints() {
        let backend = backend();
        let rows = backend.insert("products", json!([{"sku": "CEM-42", "site": "Plant"}, {"sku": "CEM-52", "site": "Port"}])).unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));

        let conflict = backend.insert("products", json!({"sku": "CEM-42"})).unwrap_err();
        assert_eq!((conflict.status, conflict.body.code.as_deref()), (409, Some("23505")));

        let missing = backend.insert("products", json!({"name": "no sku"})).unwrap_err();
        assert_eq!(missing.body.code.as_deref(), Some("23502"));

        // all or nothing
        assert!(backend.insert("products", json!([{"sku": "A"}, {"sku": "A"}])).is_err());
        assert_eq!(backend.select("products", &Selection::default()).unwrap().1, 2);
    }

    #[test]
    fn filtering_ordering_paging() {
        let backend = backend();
        backend
            .insert("products", json!([{"sku": "a", "site": "Port", "price": 3}, {"sku": "b", "site": "Plant", "price": 1}, {"sku": "c", "site": "Port", "price": 2}]))
            .unwrap();

        let selection = Selection::parse(&params(&[("select", "sku"), ("site", "eq.Port"), ("order", "price.desc")])).unwrap();
        let (rows, total) = backend.select("products", &selection).unwrap();
        assert_eq!(rows, vec![json!({"sku": "a"}), json!({"sku": "c"})]);
        assert_eq!(total, 2);

        let selection = Selection::parse(&params(&[("order", "price.asc"), ("limit", "1"), ("offset", "1")])).unwrap();
        assert_eq!(backend.select("products", &selection).unwrap().0[0]["sku"], json!("c"));

        let selection = Selection::parse(&params(&[("name", "is.null")])).unwrap();
        assert_eq!(backend.select("products", &selection).unwrap().1, 3);

        let unknown = Selection::parse(&params(&[("colour", "eq.red")])).unwrap();
        assert_eq!(backend.select("products", &unknown).unwrap_err().body.code.as_deref(), Some("42703"));
        assert!(Selection::parse(&params(&[("site", "like.P*")])).is_err());
    }

    #[test]
    fn change_feed_follows_commits() {
        let backend = backend();
        let mut feed = backend.subscribe();
        backend.insert("products", json!({"sku": "x"})).unwrap();
        let by_id = Selection::parse(&params(&[("id", "eq.1")])).unwrap();
        assert_eq!(backend.update("products", &by_id, json!({"price": 9})).unwrap().len(), 1);
        assert_eq!(backend.delete("products", &by_id).unwrap().len(), 1);
        assert_eq!(backend.delete("products", &by_id).unwrap().len(), 0);

        let kinds: Vec<_> = (0..3)
            .map(|_| match feed.try_recv().unwrap() {
                RealtimeEvent::Change(data) => (data.change_type, data.old_record),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(kinds[0], (ChangeType::Insert, None));
        assert_eq!(kinds[1].0, ChangeType::Update);
        assert_eq!(kinds[2], (ChangeType::Delete, Some(json!({"id": 1}))));
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn unknown_table() {
        let failure = backend().select("silos", &Selection::default()).unwrap_err();
        assert_eq!((failure.status, failure.body.code.as_deref()), (404, Some("PGRST205")));
    }
}
