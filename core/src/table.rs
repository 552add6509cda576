use futures::future::join_all;
use kiln_proto::{CollectionId, RecordId};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use crate::{
    changes::{ChangeEvent, ChangeStream, ChannelHandle},
    client::Client,
    config::DEFAULT_SCHEMA,
    error::{AuthError, ChannelError, MutationError, RetrievalError},
    query::{eq_operand, QueryOptions},
    record::{parse_rows, Record, ID_FIELD},
    transport::read_json,
};

const RETURN_REPRESENTATION: &str = "return=representation";

/// Typed access to one remote collection.
///
/// A `Table` is a plain value: constructing one performs no I/O, and it can be
/// cloned and handed to as many tasks as needed. All requests carry the client's
/// current session token, or the anon key when signed out.
pub struct Table<T> {
    client: Client,
    collection: CollectionId,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self { Self { client: self.client.clone(), collection: self.collection.clone(), _record: PhantomData } }
}

impl<T> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Table({})", self.collection) }
}

/// A failed item of a [`Table::bulk_update`]
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: RecordId,
    pub error: MutationError,
}

/// Outcome of a [`Table::bulk_update`]. `updated` keeps input order among the successes.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdate<T> {
    pub updated: Vec<T>,
    pub failed: Vec<BulkFailure>,
}

impl<T> BulkUpdate<T> {
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

impl<T: Record> Table<T> {
    pub fn new(client: Client, collection: impl Into<CollectionId>) -> Self { Self { client, collection: collection.into(), _record: PhantomData } }

    pub fn collection(&self) -> &CollectionId { &self.collection }

    pub fn client(&self) -> &Client { &self.client }

    /// Rows matching every equality in `options.filter`, ordered and paginated as requested
    pub async fn find_all(&self, options: &QueryOptions) -> Result<Vec<T>, RetrievalError> {
        let params = options.to_params(self.client.config().default_page_size)?;
        let builder = self.request(Method::GET).await?.query(&params);
        let body: Value = read_json(self.client.rest().send(builder).await?).await?;
        let rows = parse_rows(body).map_err(|e| {
            warn!("Rejected rows from {}: {}", self.collection, e);
            e
        })?;
        debug!("{} rows from {}", rows.len(), self.collection);
        Ok(rows)
    }

    /// The row with this id, or `None` when there is none
    pub async fn find_by_id(&self, id: impl Into<RecordId>) -> Result<Option<T>, RetrievalError> {
        let id = id.into();
        let params = [("select", "*".to_string()), (ID_FIELD, eq_operand(&id.to_json())), ("limit", "1".to_string())];
        let builder = self.request(Method::GET).await?.query(&params);
        let body: Value = read_json(self.client.rest().send(builder).await?).await?;
        Ok(parse_rows::<T>(body)?.into_iter().next())
    }

    /// Number of rows matching the filter of `options`; ordering and paging are ignored
    pub async fn count(&self, options: &QueryOptions) -> Result<usize, RetrievalError> {
        let params = options.filter_params()?;
        let builder = self.request(Method::HEAD).await?.query(&params).header("Prefer", "count=exact");
        let response = self.client.rest().send(builder).await?;

        let range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RetrievalError::Query("response carries no Content-Range".into()))?;
        parse_total(range).ok_or_else(|| RetrievalError::Query(format!("unreadable Content-Range '{}'", range)))
    }

    /// Insert one row and return it as stored, with server generated fields filled in
    pub async fn create<D: Serialize + ?Sized>(&self, draft: &D) -> Result<T, MutationError> {
        let builder = self.request(Method::POST).await?.header("Prefer", RETURN_REPRESENTATION).json(draft);
        let rows = self.mutate(builder).await?;
        let row = rows.into_iter().next().ok_or_else(|| MutationError::Query(format!("insert into {} returned no row", self.collection)))?;
        info!("Created {} in {}", row.id(), self.collection);
        Ok(row)
    }

    /// Apply a partial update and return the row as stored
    pub async fn update<P: Serialize + ?Sized>(&self, id: impl Into<RecordId>, patch: &P) -> Result<T, MutationError> {
        let id = id.into();
        let builder = self.request(Method::PATCH).await?.query(&[(ID_FIELD, eq_operand(&id.to_json()))]).header("Prefer", RETURN_REPRESENTATION).json(patch);
        let row = self.mutate(builder).await?.into_iter().next().ok_or_else(|| MutationError::not_found(&id))?;
        debug!("Updated {} in {}", id, self.collection);
        Ok(row)
    }

    /// Remove the row with this id. Removing a row that does not exist succeeds.
    pub async fn delete(&self, id: impl Into<RecordId>) -> Result<(), MutationError> {
        let id = id.into();
        let builder = self.request(Method::DELETE).await?.query(&[(ID_FIELD, eq_operand(&id.to_json()))]);
        self.client.rest().send(builder).await?;
        debug!("Deleted {} from {}", id, self.collection);
        Ok(())
    }

    /// Insert all items in one request. The backend applies all of them or none.
    pub async fn bulk_insert<D: Serialize>(&self, items: &[D]) -> Result<Vec<T>, MutationError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let builder = self.request(Method::POST).await?.header("Prefer", RETURN_REPRESENTATION).json(items);
        let rows = self.mutate(builder).await?;
        info!("Inserted {} rows into {}", rows.len(), self.collection);
        Ok(rows)
    }

    /// Update many rows concurrently, one request each. Failures are reported per item.
    pub async fn bulk_update<P: Serialize>(&self, updates: Vec<(RecordId, P)>) -> BulkUpdate<T> {
        let results = join_all(updates.iter().map(|(id, patch)| self.update(id.clone(), patch))).await;

        let mut outcome = BulkUpdate { updated: Vec::new(), failed: Vec::new() };
        for ((id, _), result) in updates.into_iter().zip(results) {
            match result {
                Ok(row) => outcome.updated.push(row),
                Err(error) => {
                    debug!("Bulk update of {} in {} failed: {}", id, self.collection, error);
                    outcome.failed.push(BulkFailure { id, error });
                }
            }
        }
        if !outcome.failed.is_empty() {
            warn!("Bulk update on {}: {} updated, {} failed", self.collection, outcome.updated.len(), outcome.failed.len());
        }
        outcome
    }

    /// Typed change events for this collection, optionally narrowed by a server side
    /// filter such as `status=eq.active`
    pub async fn changes(&self, filter: Option<&str>) -> Result<ChangeStream<T>, ChannelError> {
        let channel = self.client.open_channel(self.collection.clone(), filter).await?;
        Ok(ChangeStream::new(self.collection.clone(), self.client.config().schema.clone(), channel))
    }

    /// Invoke `callback` for every change until the returned handle is closed or dropped
    pub async fn subscribe<F>(&self, callback: F, filter: Option<&str>) -> Result<ChannelHandle, ChannelError>
    where F: Fn(ChangeEvent<T>) + Send + Sync + 'static {
        Ok(ChannelHandle::spawn(self.changes(filter).await?, callback))
    }

    async fn request(&self, method: Method) -> Result<RequestBuilder, AuthError> {
        let bearer = self.client.session().bearer().await?;
        let url = format!("{}/{}", self.client.config().rest_url(), self.collection);
        let mut builder = self.client.rest().request(method, &url, &bearer);

        let schema = &self.client.config().schema;
        if schema != DEFAULT_SCHEMA {
            builder = builder.header("Accept-Profile", schema).header("Content-Profile", schema);
        }
        Ok(builder)
    }

    async fn mutate(&self, builder: RequestBuilder) -> Result<Vec<T>, MutationError> {
        let body: Value = read_json(self.client.rest().send(builder).await?).await?;
        Ok(parse_rows(body)?)
    }
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`
fn parse_total(range: &str) -> Option<usize> {
    let (_, total) = range.rsplit_once('/')?;
    total.trim().parse().ok()
}
