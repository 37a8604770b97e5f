//! Engine-side query handle. A `QuerySet` composes filters, exclusions,
//! ordering and serializer options, and executes structured queries against
//! the injected executor. Cheap to clone; builder methods return a modified
//! copy and leave the original untouched.

use std::sync::Arc;

use serde_json::Value;
use vantage_proto::Namespace;

use crate::{
    error::{MutationError, RetrievalError, TransportError},
    filter::Filter,
    model::{instances_from, Instance, ModelType},
    transport::{Query, QueryExecutor, QueryKind, QueryResponse, SerializerOptions},
};

#[derive(Clone)]
pub struct QuerySet {
    model: ModelType,
    executor: Arc<dyn QueryExecutor>,
    filter: Filter,
    exclude: Filter,
    order_by: Vec<String>,
    options: SerializerOptions,
}

impl QuerySet {
    pub fn new(model: ModelType, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { model, executor, filter: Filter::new(), exclude: Filter::new(), order_by: Vec::new(), options: SerializerOptions::default() }
    }

    pub fn model(&self) -> &ModelType { &self.model }
    pub fn executor(&self) -> &Arc<dyn QueryExecutor> { &self.executor }
    pub fn current_filter(&self) -> &Filter { &self.filter }
    pub fn options(&self) -> &SerializerOptions { &self.options }

    /// Narrow to rows matching the additional conditions.
    pub fn filter(&self, conditions: Filter) -> Self {
        let mut qs = self.clone();
        qs.filter = qs.filter.and(&conditions);
        qs
    }

    /// Exclude rows matching the conditions.
    pub fn exclude(&self, conditions: Filter) -> Self {
        let mut qs = self.clone();
        qs.exclude = qs.exclude.and(&conditions);
        qs
    }

    pub fn order_by(&self, fields: impl IntoIterator<Item = String>) -> Self {
        let mut qs = self.clone();
        qs.order_by = fields.into_iter().collect();
        qs
    }

    pub fn with_options(&self, options: SerializerOptions) -> Self {
        let mut qs = self.clone();
        qs.options = options;
        qs
    }

    pub fn with_limit(&self, limit: usize) -> Self {
        let mut qs = self.clone();
        qs.options.limit = Some(limit);
        qs
    }

    /// Project to the named fields only.
    pub fn only(&self, fields: Vec<String>) -> Self {
        let mut qs = self.clone();
        qs.options.fields = Some(fields);
        qs
    }

    fn query(&self, kind: QueryKind) -> Query {
        let mut query = Query::new(kind, self.model.clone());
        query.filter = self.filter.clone();
        query.exclude = self.exclude.clone();
        query.order_by = self.order_by.clone();
        query.options = self.options.clone();
        query
    }

    async fn execute(&self, query: Query) -> Result<QueryResponse, TransportError> { self.executor.execute(query).await }

    /// Fetch the window described by the current filters and options.
    pub async fn fetch(&self) -> Result<Vec<Instance>, RetrievalError> {
        let response = self.execute(self.query(QueryKind::Read)).await?;
        Ok(instances_from(response.data))
    }

    /// Fetch exactly one row. Null data means the row does not exist.
    pub async fn get(&self, conditions: Filter) -> Result<Instance, RetrievalError> {
        let mut query = self.query(QueryKind::Get);
        query.filter = query.filter.and(&conditions);
        let response = self.execute(query).await?;
        match response.data {
            Value::Object(map) => Ok(map),
            _ => Err(RetrievalError::DoesNotExist),
        }
    }

    /// Fetch the first matching row, if any.
    pub async fn first(&self, conditions: Filter) -> Result<Option<Instance>, RetrievalError> {
        let mut query = self.query(QueryKind::First);
        query.filter = query.filter.and(&conditions);
        let response = self.execute(query).await?;
        match response.data {
            Value::Object(map) => Ok(Some(map)),
            _ => Ok(None),
        }
    }

    /// Run a server-side aggregate over the current window.
    pub async fn aggregate(&self, kind: QueryKind, field: Option<&str>) -> Result<Value, RetrievalError> {
        let mut query = self.query(kind);
        query.field = field.map(str::to_string);
        let response = self.execute(query).await?;
        Ok(response.data)
    }

    /// Create a row. The server's echo of the created row is returned.
    pub async fn create(&self, data: Instance, operation_id: &str, namespace: &Namespace) -> Result<Instance, MutationError> {
        let mut query = self.query(QueryKind::Create);
        query.data = Some(Value::Object(data));
        query.operation_id = Some(operation_id.to_string());
        query.namespace = Some(namespace.clone());
        let response = self.execute(query).await?;
        match response.data {
            Value::Object(map) => Ok(map),
            other => Err(TransportError::new(format!("create response was not an object: {other}")).into()),
        }
    }

    /// Apply a partial update to every row the current filters match. Returns
    /// the server's echo of the updated rows (may be empty).
    pub async fn update(&self, data: Instance, operation_id: &str, namespace: &Namespace) -> Result<Vec<Instance>, MutationError> {
        let mut query = self.query(QueryKind::Update);
        query.data = Some(Value::Object(data));
        query.operation_id = Some(operation_id.to_string());
        query.namespace = Some(namespace.clone());
        let response = self.execute(query).await?;
        Ok(instances_from(response.data))
    }

    /// Delete every row the current filters match. Returns the server-side
    /// count when the transport reports one.
    pub async fn delete(&self, operation_id: &str, namespace: &Namespace) -> Result<Option<u64>, MutationError> {
        let mut query = self.query(QueryKind::Delete);
        query.operation_id = Some(operation_id.to_string());
        query.namespace = Some(namespace.clone());
        let response = self.execute(query).await?;
        Ok(response.data.as_u64())
    }
}

impl std::fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.model)
            .field("filter", &self.filter)
            .field("exclude", &self.exclude)
            .field("order_by", &self.order_by)
            .field("options", &self.options)
            .finish()
    }
}
