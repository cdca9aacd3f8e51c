use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::backend::{Backend, IndexSpec};
use crate::events::{DbEvent, EventKind, EventSink};
use crate::filter::Filter;
use crate::options::{ListResult, Options};
use crate::permission::{record_override, Operation, PermissionMap};
use crate::record::{RecordRoot, RecordValue, PERMISSION_REQUIRED_FIELD};
use crate::user::{check_user, user_id, AuditStamp, Clock, SystemClock, User};
use crate::validation::SchemaValidator;
use crate::{Result, StoreUserError};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Default page size for list operations.
    pub page_size: usize,
    /// Store-wide schema validation toggle.
    pub schema_validation: bool,
    /// Store-wide authorization toggle.
    pub authorization: bool,
    /// Store-wide previous-record fetch toggle.
    pub fetch_prev_record: bool,
    /// Enables event emission to the configured sink.
    pub pub_sub: bool,
    /// Prefix prepended to collection names before they reach the backend.
    pub collection_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            schema_validation: false,
            authorization: false,
            fetch_prev_record: false,
            pub_sub: false,
            collection_prefix: String::new(),
        }
    }
}

/// Document-store access layer. Every read/write/delete/list operation runs
/// through authorization checks, optional schema validation, previous-record
/// retrieval and event notification before the backend performs the actual
/// persistence operation.
pub struct Store<B: Backend> {
    backend: B,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    validator: Option<Arc<dyn SchemaValidator>>,
    events: Option<Arc<dyn EventSink>>,
    permissions: RwLock<HashMap<String, PermissionMap>>,
    schemas: RwLock<HashMap<String, serde_json::Value>>,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            clock: Arc::new(SystemClock),
            validator: None,
            events: None,
            permissions: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn should_authorize(&self, options: &Options) -> bool {
        options.authorization.unwrap_or(self.config.authorization)
    }

    fn should_validate(&self, options: &Options) -> bool {
        options
            .schema_validation
            .unwrap_or(self.config.schema_validation)
    }

    /// An explicit `fetch_prev_record` option is honored only while
    /// validation or authorization is active for the call; otherwise the
    /// store-wide default applies.
    fn should_find_prev_record(&self, options: &Options) -> bool {
        if self.should_validate(options) || self.should_authorize(options) {
            if let Some(explicit) = options.fetch_prev_record {
                return explicit;
            }
        }
        self.config.fetch_prev_record
    }

    fn collection_name(&self, coll: &str) -> String {
        format!("{}{coll}", self.config.collection_prefix)
    }

    fn stamp(&self, user: Option<&User>) -> AuditStamp {
        AuditStamp {
            updated_by: user_id(user),
            updated_at: self.clock.now(),
        }
    }

    fn emit(&self, kind: EventKind, coll: &str, key: &str, payload: Option<RecordRoot>) {
        if !self.config.pub_sub {
            return;
        }
        if let Some(sink) = &self.events {
            sink.emit(DbEvent {
                kind,
                collection: coll.to_string(),
                key: key.to_string(),
                payload,
            });
        }
    }

    /// Collection-level permission check. Succeeds unconditionally when
    /// authorization is off for this call or the collection has no
    /// registered permission map.
    pub fn authorize_collection(
        &self,
        user: Option<&User>,
        coll: &str,
        op: Operation,
        options: &Options,
    ) -> Result<AuditStamp> {
        if self.should_authorize(options) {
            let permissions = self.permissions.read();
            if let Some(map) = permissions.get(coll) {
                let user = check_user(user)?;
                if !map.allows(op, user) {
                    return Err(StoreUserError::UnauthorizedAction.into());
                }
            }
        }
        Ok(self.stamp(user))
    }

    /// Record-level permission check. A well-formed `_permissionRequired`
    /// entry for the operation takes precedence over the collection map;
    /// a missing or malformed override falls back to the collection check.
    pub fn authorize(
        &self,
        user: Option<&User>,
        coll: &str,
        op: Operation,
        record: Option<&RecordRoot>,
        options: &Options,
    ) -> Result<AuditStamp> {
        if self.should_authorize(options) {
            match record.and_then(|record| record_override(record, op)) {
                None => return self.authorize_collection(user, coll, op, options),
                Some(required) => {
                    let user = check_user(user)?;
                    if !required.iter().any(|role| user.has_role(role)) {
                        return Err(StoreUserError::UnauthorizedAction.into());
                    }
                }
            }
        }
        Ok(self.stamp(user))
    }

    /// Fetches the existing record ahead of a mutation when the call
    /// requires it. The read projection is augmented (in a copy) so the
    /// permission-override field is always visible to `authorize`.
    async fn get_prev_doc(
        &self,
        coll: &str,
        id: &str,
        options: &Options,
    ) -> Result<Option<RecordRoot>> {
        if !self.should_find_prev_record(options) {
            return Ok(None);
        }

        let projection = match &options.projection {
            Some(fields) if !fields.iter().any(|f| f == PERMISSION_REQUIRED_FIELD) => {
                let mut fields = fields.clone();
                fields.push(PERMISSION_REQUIRED_FIELD.to_string());
                Some(fields)
            }
            other => other.clone(),
        };

        let record = self
            .backend
            .get_by_key(&self.collection_name(coll), id, projection.as_deref())
            .await?;

        match record {
            Some(record) => Ok(Some(record)),
            None => Err(StoreUserError::RecordNotFound { id: id.to_string() }.into()),
        }
    }

    /// Runs the collection-level read check unless the options bag is
    /// already marked, and returns a marked copy. Amortizes the check
    /// across the repeated paged calls of a drain.
    fn pre_authorize(&self, user: Option<&User>, coll: &str, options: &Options) -> Result<Options> {
        if options.pre_authorized {
            return Ok(options.clone());
        }
        self.authorize_collection(user, coll, Operation::Read, options)?;
        let mut options = options.clone();
        options.pre_authorized = true;
        Ok(options)
    }

    fn list_filter(&self, user: Option<&User>, filter: &Filter, options: &Options) -> Filter {
        if self.should_authorize(options) {
            filter.with_role_visibility(user, Operation::Read)
        } else {
            filter.clone()
        }
    }

    /// Single-page list: RBAC visibility filter, pagination window, output
    /// transformation, optional total count.
    #[tracing::instrument(skip(self, user))]
    pub async fn list(
        &self,
        user: Option<&User>,
        coll: &str,
        filter: &Filter,
        options: &Options,
    ) -> Result<ListResult> {
        let options = self.pre_authorize(user, coll, options)?;
        let filter = self.list_filter(user, filter, &options);
        let name = self.collection_name(coll);

        let skip = options.skip.unwrap_or(0);
        let limit = options.limit.unwrap_or(self.config.page_size);

        let mut records = self
            .backend
            .paged_query(
                &name,
                &filter,
                options.projection.as_deref(),
                &options.sort,
                skip,
                limit,
            )
            .await?;

        for record in &mut records {
            self.backend.transform_output(record);
        }

        let total = if options.count {
            self.backend.count(&name, &filter).await?
        } else {
            0
        };

        Ok(ListResult {
            records,
            total,
            is_record_changed: false,
        })
    }

    /// Drains a query by repeated paged calls until the number of collected
    /// records reaches the total observed on the first page. The drain
    /// always starts from offset zero; a caller-supplied `skip` is ignored
    /// so the collected set lines up with the total. The total is
    /// never re-queried; when concurrent mutation makes the drain come up
    /// short (or long), the result is flagged via `is_record_changed`
    /// rather than failed.
    ///
    /// The whole result set is held in memory. Not suitable for large
    /// result sets: there is no backpressure and no streaming.
    #[tracing::instrument(skip(self, user))]
    pub async fn list_all(
        &self,
        user: Option<&User>,
        coll: &str,
        filter: &Filter,
        options: &Options,
    ) -> Result<ListResult> {
        let mut options = self.pre_authorize(user, coll, options)?;
        options.count = true;
        options.skip = Some(0);

        let first = self.list(user, coll, filter, &options).await?;
        let total = first.total;
        let mut records = first.records;

        options.count = false;
        while records.len() < total {
            options.skip = Some(records.len());
            let page = self.list(user, coll, filter, &options).await?;
            if page.records.is_empty() {
                // The matching set shrank mid-drain.
                break;
            }
            records.extend(page.records);
        }

        let is_record_changed = records.len() != total;
        if is_record_changed {
            warn!(
                collection = coll,
                expected = total,
                collected = records.len(),
                "collection changed while draining"
            );
        }

        Ok(ListResult {
            records,
            total,
            is_record_changed,
        })
    }

    #[tracing::instrument(skip(self, user))]
    pub async fn count(
        &self,
        user: Option<&User>,
        coll: &str,
        filter: &Filter,
        options: &Options,
    ) -> Result<usize> {
        let options = self.pre_authorize(user, coll, options)?;
        let filter = self.list_filter(user, filter, &options);
        Ok(self.backend.count(&self.collection_name(coll), &filter).await?)
    }

    pub async fn find_one(
        &self,
        user: Option<&User>,
        coll: &str,
        filter: &Filter,
        options: &Options,
    ) -> Result<Option<RecordRoot>> {
        let mut options = options.clone();
        options.limit = Some(1);
        let result = self.list(user, coll, filter, &options).await?;
        Ok(result.records.into_iter().next())
    }

    /// Keyed read. The record is fetched before the permission check so a
    /// record-level override is visible to it; a projection that excludes
    /// the override field is honored on the way out.
    #[tracing::instrument(skip(self, user))]
    pub async fn read(
        &self,
        user: Option<&User>,
        coll: &str,
        id: &str,
        options: &Options,
    ) -> Result<Option<RecordRoot>> {
        let name = self.collection_name(coll);

        let fetch_projection = match &options.projection {
            Some(fields) if !fields.iter().any(|f| f == PERMISSION_REQUIRED_FIELD) => {
                let mut fields = fields.clone();
                fields.push(PERMISSION_REQUIRED_FIELD.to_string());
                Some(fields)
            }
            other => other.clone(),
        };

        let record = self
            .backend
            .get_by_key(&name, id, fetch_projection.as_deref())
            .await?;

        self.authorize(user, coll, Operation::Read, record.as_ref(), options)?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        if let Some(projection) = &options.projection {
            if !projection.iter().any(|f| f == PERMISSION_REQUIRED_FIELD) {
                record.remove(PERMISSION_REQUIRED_FIELD);
            }
        }

        self.backend.transform_output(&mut record);
        let payload = self.config.pub_sub.then(|| record.clone());
        self.emit(EventKind::Read, coll, id, payload);

        Ok(Some(record))
    }

    /// Write pipeline. With an identifier: previous-record resolve,
    /// record-level authorization against it, schema validation
    /// (old, new), then a backend update carrying the audit stamp. Without
    /// one: collection-level authorization, schema validation of the new
    /// value alone, then an insert. Returns the record key.
    #[tracing::instrument(skip(self, user, data))]
    pub async fn write(
        &self,
        user: Option<&User>,
        coll: &str,
        id: Option<&str>,
        data: RecordRoot,
        options: &Options,
    ) -> Result<String> {
        let name = self.collection_name(coll);

        let Some(id) = id else {
            let stamp = self.authorize_collection(user, coll, Operation::Write, options)?;
            self.validate_schema(coll, None, &data, options)?;

            let mut data = data;
            stamp.apply(&mut data);

            let payload = self.config.pub_sub.then(|| data.clone());
            let key = self.backend.insert(&name, data).await?;
            self.emit(EventKind::Create, coll, &key, payload);
            return Ok(key);
        };

        let prev = self.get_prev_doc(coll, id, options).await?;
        let stamp = self.authorize(user, coll, Operation::Write, prev.as_ref(), options)?;
        self.validate_schema(coll, prev.as_ref(), &data, options)?;

        let mut patch = data;
        if options.raw_query {
            // The stamp rides along inside the $set clause of the raw
            // operator document.
            match patch
                .entry("$set".to_string())
                .or_insert_with(|| RecordValue::Map(HashMap::new()))
            {
                RecordValue::Map(set) => {
                    let mut fields = RecordRoot::new();
                    stamp.apply(&mut fields);
                    set.extend(fields);
                }
                _ => return Err(StoreUserError::InvalidRawQuery.into()),
            }
        } else {
            stamp.apply(&mut patch);
        }

        let payload = self.config.pub_sub.then(|| patch.clone());
        self.backend
            .update_by_key(&name, id, patch, options.raw_query)
            .await?;
        self.emit(EventKind::Update, coll, id, payload);

        Ok(id.to_string())
    }

    /// Delete pipeline: previous-record resolve, record-level
    /// authorization, backend delete, event carrying the deleted record.
    #[tracing::instrument(skip(self, user))]
    pub async fn delete(
        &self,
        user: Option<&User>,
        coll: &str,
        id: &str,
        options: &Options,
    ) -> Result<()> {
        let prev = self.get_prev_doc(coll, id, options).await?;
        self.authorize(user, coll, Operation::Write, prev.as_ref(), options)?;
        self.backend
            .delete_by_key(&self.collection_name(coll), id)
            .await?;
        self.emit(EventKind::Delete, coll, id, prev);
        Ok(())
    }

    /// Registers a collection: backend DDL, then the schema and permission
    /// maps when validation/authorization apply to this call.
    #[tracing::instrument(skip(self, schema, permission_required))]
    pub async fn mkcoll(
        &self,
        coll: &str,
        indexes: &[IndexSpec],
        schema: Option<serde_json::Value>,
        permission_required: Option<PermissionMap>,
        options: &Options,
    ) -> Result<()> {
        let name = self.collection_name(coll);
        self.backend.create_collection(&name).await?;
        self.backend.create_indexes(&name, indexes).await?;

        if self.should_validate(options) {
            if let Some(schema) = schema {
                self.schemas.write().insert(coll.to_string(), schema);
            }
        }
        if self.should_authorize(options) {
            if let Some(permission_required) = permission_required {
                self.permissions
                    .write()
                    .insert(coll.to_string(), permission_required);
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, user))]
    pub async fn rmcoll(&self, user: Option<&User>, coll: &str, options: &Options) -> Result<()> {
        self.authorize_collection(user, coll, Operation::Write, options)?;
        self.backend
            .drop_collection(&self.collection_name(coll))
            .await?;
        self.permissions.write().remove(coll);
        self.schemas.write().remove(coll);
        Ok(())
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let prefix = self.config.collection_prefix.as_str();
        Ok(self
            .backend
            .collection_names()
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(prefix).map(str::to_string))
            .collect())
    }

    fn validate_schema(
        &self,
        coll: &str,
        prev: Option<&RecordRoot>,
        next: &RecordRoot,
        options: &Options,
    ) -> Result<()> {
        if !self.should_validate(options) {
            return Ok(());
        }
        if let Some(validator) = &self.validator {
            let schemas = self.schemas.read();
            if let Some(schema) = schemas.get(coll) {
                validator.validate(schema, prev, next)?;
            }
        }
        Ok(())
    }
}
