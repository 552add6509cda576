use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::RetrievalError;

/// Query string keys with a meaning of their own; they cannot be filtered on
const RESERVED: &[&str] = &["select", "order", "limit", "offset", "on_conflict", "columns"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

/// How a `find_all` filters, orders and paginates a collection.
///
/// Filters are conjunctive equality predicates only. Built by value:
///
/// ```rust
/// # use kiln_core::query::QueryOptions;
/// let options = QueryOptions::new().eq("site", "Port").eq("status", "active").order_by("raised_at", false).limit(20);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub select: Option<Vec<String>>,
    pub filter: BTreeMap<String, Value>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self { Self::default() }

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Add `field == value` to the conjunction. A second call for the same field replaces the first.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order { field: field.into(), ascending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The limit actually sent: an offset without a limit pages by `default_page_size`
    pub fn effective_limit(&self, default_page_size: usize) -> Option<usize> {
        match (self.limit, self.offset) {
            (Some(limit), _) => Some(limit),
            (None, Some(_)) => Some(default_page_size),
            (None, None) => None,
        }
    }

    /// Only the filter part, as query parameters
    pub fn filter_params(&self) -> Result<Vec<(String, String)>, RetrievalError> {
        let mut params = Vec::with_capacity(self.filter.len());
        for (field, value) in &self.filter {
            if field.is_empty() || RESERVED.contains(&field.as_str()) {
                return Err(RetrievalError::Query(format!("cannot filter on reserved field name '{}'", field)));
            }
            params.push((field.clone(), eq_operand(value)));
        }
        Ok(params)
    }

    /// Encode as REST query parameters in select, filter, order, limit, offset order
    pub fn to_params(&self, default_page_size: usize) -> Result<Vec<(String, String)>, RetrievalError> {
        let select = match &self.select {
            Some(fields) if fields.is_empty() => return Err(RetrievalError::Query("empty select list".into())),
            Some(fields) => fields.join(","),
            None => "*".to_string(),
        };

        let mut params = vec![("select".to_string(), select)];
        params.extend(self.filter_params()?);
        if let Some(order) = &self.order {
            params.push(("order".to_string(), format!("{}.{}", order.field, if order.ascending { "asc" } else { "desc" })));
        }
        if let Some(limit) = self.effective_limit(default_page_size) {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        Ok(params)
    }
}

/// Render an equality operand. `null` cannot be compared with `eq` and uses `is.null`.
pub fn eq_operand(value: &Value) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) => format!("eq.{}", s),
        other => format!("eq.{}", other),
    }
}
