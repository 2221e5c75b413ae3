//! Push fanout, invalid-token cleanup and the in-app inbox.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict}, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{device_token, notification, user};
use crate::errors::ServiceError;
use crate::handlers::coerce::lenient_opt_vec;
use crate::push::{MulticastResult, PushMessage, PushProvider};

/// Largest multicast the push provider accepts
pub const MAX_BATCH_SIZE: usize = 500;
pub const DEFAULT_KIND: &str = "general";

/// Which of a user's registered devices receive a push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenSelection {
    /// Only the most recently registered device
    #[default]
    LatestOnly,
    AllDevices,
}

/// What gets pushed and stored in the inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: BTreeMap<String, String>,
}

impl NotificationContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
            kind: DEFAULT_KIND.to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    fn to_push_message(&self) -> PushMessage {
        let mut data = self.data.clone();
        data.entry("type".to_string())
            .or_insert_with(|| self.kind.clone());
        PushMessage {
            title: self.title.clone(),
            body: self.body.clone(),
            image: self.image.clone(),
            data,
        }
    }
}

/// Narrows a broadcast to a subset of users
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AudienceFilter {
    #[serde(default)]
    pub role: Option<user::UserRole>,
    #[serde(default)]
    pub registered_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registered_before: Option<DateTime<Utc>>,
    /// Array, JSON-encoded array or comma separated ids
    #[serde(default, deserialize_with = "lenient_opt_vec")]
    pub user_ids: Option<Vec<Uuid>>,
}

/// Aggregate outcome of one fanout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveryReport {
    pub success: bool,
    pub message: String,
    pub success_count: usize,
    pub failure_count: usize,
    pub invalid_tokens_removed: u64,
    pub records_created: usize,
}

impl DeliveryReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Push is not configured; reported to the caller instead of failing
    fn degraded() -> Self {
        Self::failed(ServiceError::PushProviderUnavailable.to_string())
    }
}

/// A page of a user's inbox
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InboxPage {
    pub notifications: Vec<notification::Model>,
    pub total: u64,
    pub unread_count: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Default)]
struct FanoutTally {
    success_count: usize,
    failure_count: usize,
    invalid_tokens: BTreeSet<String>,
}

impl FanoutTally {
    fn merge(&mut self, result: MulticastResult) {
        self.success_count += result.success_count;
        self.failure_count += result.failure_count;
        for response in result.responses {
            if response.error.map(|code| code.is_permanent()).unwrap_or(false) {
                self.invalid_tokens.insert(response.token);
            }
        }
    }
}

/// Keeps order, drops duplicates and blanks
fn unique_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens
        .into_iter()
        .filter(|t| !t.trim().is_empty() && seen.insert(t.clone()))
        .collect()
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    push: Option<Arc<dyn PushProvider>>,
    selection: TokenSelection,
    batch_size: usize,
    timeout: Duration,
}

impl NotificationService {
    /// `push` is `None` when the provider could not be initialised; every
    /// send then reports failure without touching the provider
    pub fn new(db: Arc<DatabaseConnection>, push: Option<Arc<dyn PushProvider>>) -> Self {
        Self {
            db,
            push,
            selection: TokenSelection::default(),
            batch_size: MAX_BATCH_SIZE,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_token_selection(mut self, selection: TokenSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Upper bound for a single provider call (one token or one chunk)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn push_enabled(&self) -> bool {
        self.push.is_some()
    }

    #[instrument(skip(self, token, content))]
    pub async fn send_to_device(
        &self,
        token: &str,
        content: &NotificationContent,
    ) -> Result<DeliveryReport, ServiceError> {
        let Some(push) = self.push.as_ref() else {
            return Ok(DeliveryReport::degraded());
        };

        let message = content.to_push_message();
        let outcome = tokio::time::timeout(self.timeout, push.send(token, &message)).await;

        match outcome {
            Ok(Ok(message_id)) => {
                counter!("storefront_push.sent", 1);
                Ok(DeliveryReport {
                    success: true,
                    message: format!("delivered as {}", message_id),
                    success_count: 1,
                    ..Default::default()
                })
            }
            Ok(Err(err)) => {
                counter!("storefront_push.failed", 1);
                warn!(error = %err, "push to single device failed");
                let removed = if err.code().is_permanent() {
                    self.prune_tokens(&BTreeSet::from([token.to_string()]))
                        .await?
                } else {
                    0
                };
                Ok(DeliveryReport {
                    success: false,
                    message: "push delivery failed".to_string(),
                    failure_count: 1,
                    invalid_tokens_removed: removed,
                    ..Default::default()
                })
            }
            Err(_) => {
                counter!("storefront_push.failed", 1);
                warn!("push to single device timed out");
                Ok(DeliveryReport {
                    success: false,
                    message: "push delivery timed out".to_string(),
                    failure_count: 1,
                    ..Default::default()
                })
            }
        }
    }

    /// Chunks the tokens into provider-sized batches, dispatches the batches
    /// concurrently and removes every token reported invalid in one delete
    #[instrument(skip(self, tokens, content), fields(tokens = tokens.len()))]
    pub async fn send_to_multiple_devices(
        &self,
        tokens: Vec<String>,
        content: &NotificationContent,
    ) -> Result<DeliveryReport, ServiceError> {
        let Some(push) = self.push.as_ref() else {
            return Ok(DeliveryReport::degraded());
        };

        let tokens = unique_tokens(tokens);
        if tokens.is_empty() {
            return Ok(DeliveryReport::failed("no device tokens to notify"));
        }

        let message = content.to_push_message();
        let dispatches = tokens.chunks(self.batch_size).map(|chunk| {
            let message = &message;
            async move {
                match tokio::time::timeout(self.timeout, push.send_multicast(chunk, message)).await
                {
                    Ok(Ok(result)) => result,
                    Ok(Err(err)) => {
                        warn!(error = %err, size = chunk.len(), "multicast batch failed");
                        MulticastResult {
                            failure_count: chunk.len(),
                            ..Default::default()
                        }
                    }
                    Err(_) => {
                        warn!(size = chunk.len(), "multicast batch timed out");
                        MulticastResult {
                            failure_count: chunk.len(),
                            ..Default::default()
                        }
                    }
                }
            }
        });

        let mut tally = FanoutTally::default();
        for result in join_all(dispatches).await {
            tally.merge(result);
        }

        counter!("storefront_push.sent", tally.success_count as u64);
        counter!("storefront_push.failed", tally.failure_count as u64);

        let removed = self.prune_tokens(&tally.invalid_tokens).await?;

        info!(
            success = tally.success_count,
            failure = tally.failure_count,
            pruned = removed,
            "push fanout finished"
        );

        Ok(DeliveryReport {
            success: tally.success_count > 0,
            message: format!(
                "{} delivered, {} failed",
                tally.success_count, tally.failure_count
            ),
            success_count: tally.success_count,
            failure_count: tally.failure_count,
            invalid_tokens_removed: removed,
            records_created: 0,
        })
    }

    #[instrument(skip(self, content))]
    pub async fn send_to_user(
        &self,
        user_id: Uuid,
        content: &NotificationContent,
    ) -> Result<DeliveryReport, ServiceError> {
        if self.push.is_none() {
            return Ok(DeliveryReport::degraded());
        }

        let tokens = self
            .selected_tokens(&[user_id])
            .await?
            .remove(&user_id)
            .unwrap_or_default();
        if tokens.is_empty() {
            return Ok(DeliveryReport::failed("user has no registered devices"));
        }

        self.send_to_multiple_devices(tokens, content).await
    }

    /// Stores an inbox entry for the user, then pushes to their devices
    #[instrument(skip(self, content))]
    pub async fn notify_user(
        &self,
        user_id: Uuid,
        content: &NotificationContent,
    ) -> Result<DeliveryReport, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        let records_created = self.record_for_users(&[user_id], content).await?;
        let mut report = self.send_to_user(user_id, content).await?;
        report.records_created = records_created;
        Ok(report)
    }

    /// Broadcast to every matching user with at least one device. Each such
    /// user gets an inbox entry whatever the push outcome.
    #[instrument(skip(self, content, filter))]
    pub async fn send_to_all_users(
        &self,
        content: &NotificationContent,
        filter: &AudienceFilter,
    ) -> Result<DeliveryReport, ServiceError> {
        if self.push.is_none() {
            return Ok(DeliveryReport::degraded());
        }

        let mut query = user::Entity::find();
        if let Some(role) = filter.role {
            query = query.filter(user::Column::Role.eq(role));
        }
        if let Some(after) = filter.registered_after {
            query = query.filter(user::Column::CreatedAt.gte(after));
        }
        if let Some(before) = filter.registered_before {
            query = query.filter(user::Column::CreatedAt.lte(before));
        }
        if let Some(ids) = filter.user_ids.as_ref() {
            query = query.filter(user::Column::Id.is_in(ids.clone()));
        }

        let user_ids: Vec<Uuid> = query
            .order_by_asc(user::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();

        let tokens_by_user = self.selected_tokens(&user_ids).await?;
        let recipients: Vec<Uuid> = user_ids
            .into_iter()
            .filter(|id| tokens_by_user.get(id).map_or(false, |t| !t.is_empty()))
            .collect();

        if recipients.is_empty() {
            info!("broadcast matched no users with registered devices");
            return Ok(DeliveryReport::failed("no users with registered devices"));
        }

        let records_created = self.record_for_users(&recipients, content).await?;

        let tokens: Vec<String> = recipients
            .iter()
            .filter_map(|id| tokens_by_user.get(id))
            .flatten()
            .cloned()
            .collect();

        let mut report = self.send_to_multiple_devices(tokens, content).await?;
        report.records_created = records_created;
        info!(
            recipients = recipients.len(),
            delivered = report.success_count,
            "broadcast finished"
        );
        Ok(report)
    }

    /// Device tokens per user, oldest first, narrowed by the selection policy
    async fn selected_tokens(
        &self,
        user_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<String>>, ServiceError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = device_token::Entity::find()
            .filter(device_token::Column::UserId.is_in(user_ids.to_vec()))
            .order_by_asc(device_token::Column::Id)
            .all(&*self.db)
            .await?;

        let mut by_user: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in rows {
            by_user.entry(row.user_id).or_default().push(row.token);
        }

        if self.selection == TokenSelection::LatestOnly {
            for tokens in by_user.values_mut() {
                if let Some(latest) = tokens.pop() {
                    *tokens = vec![latest];
                }
            }
        }

        Ok(by_user)
    }

    /// Removes the tokens from every user holding them
    async fn prune_tokens(&self, tokens: &BTreeSet<String>) -> Result<u64, ServiceError> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let result = device_token::Entity::delete_many()
            .filter(device_token::Column::Token.is_in(tokens.iter().cloned()))
            .exec(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to prune invalid device tokens");
                ServiceError::db_error(e)
            })?;

        counter!("storefront_push.tokens_pruned", result.rows_affected);
        info!(removed = result.rows_affected, "pruned invalid device tokens");
        Ok(result.rows_affected)
    }

    async fn record_for_users(
        &self,
        user_ids: &[Uuid],
        content: &NotificationContent,
    ) -> Result<usize, ServiceError> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let data = serde_json::to_value(&content.data)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let now = Utc::now();
        let records = user_ids.iter().map(|user_id| notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(*user_id),
            title: Set(content.title.clone()),
            body: Set(content.body.clone()),
            image: Set(content.image.clone()),
            kind: Set(content.kind.clone()),
            data: Set(data.clone()),
            read: Set(false),
            read_at: Set(None),
            created_at: Set(now),
        });

        notification::Entity::insert_many(records)
            .exec_without_returning(&*self.db)
            .await?;
        Ok(user_ids.len())
    }

    /// Adds the token to the user's device set; registering it again is a no-op
    #[instrument(skip(self, token))]
    pub async fn register_token(
        &self,
        user_id: Uuid,
        token: &str,
        platform: Option<String>,
    ) -> Result<device_token::Model, ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::ValidationError(
                "token must not be empty".to_string(),
            ));
        }

        let row = device_token::ActiveModel {
            user_id: Set(user_id),
            token: Set(token.to_string()),
            platform: Set(platform),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        device_token::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([device_token::Column::UserId, device_token::Column::Token])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        device_token::Entity::find()
            .filter(device_token::Column::UserId.eq(user_id))
            .filter(device_token::Column::Token.eq(token))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::InternalError("device token was not stored".to_string()))
    }

    /// Returns whether the user held the token
    #[instrument(skip(self, token))]
    pub async fn remove_token(&self, user_id: Uuid, token: &str) -> Result<bool, ServiceError> {
        let result = device_token::Entity::delete_many()
            .filter(device_token::Column::UserId.eq(user_id))
            .filter(device_token::Column::Token.eq(token))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Newest first
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
        unread_only: bool,
    ) -> Result<InboxPage, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut query = notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id));
        if unread_only {
            query = query.filter(notification::Column::Read.eq(false));
        }
        let paginator = query
            .order_by_desc(notification::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let notifications = paginator.fetch_page(page - 1).await?;

        let unread_count = notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Read.eq(false))
            .count(&*self.db)
            .await?;

        Ok(InboxPage {
            notifications,
            total,
            unread_count,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<notification::Model, ServiceError> {
        let record = self.find_owned(user_id, notification_id).await?;
        if record.read {
            return Ok(record);
        }

        let mut active: notification::ActiveModel = record.into();
        active.read = Set(true);
        active.read_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = notification::Entity::update_many()
            .col_expr(notification::Column::Read, Expr::value(true))
            .col_expr(notification::Column::ReadAt, Expr::value(Some(Utc::now())))
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Read.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn delete_record(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = notification::Entity::delete_many()
            .filter(notification::Column::Id.eq(notification_id))
            .filter(notification::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "notification {}",
                notification_id
            )));
        }
        Ok(())
    }

    async fn find_owned(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<notification::Model, ServiceError> {
        notification::Entity::find_by_id(notification_id)
            .filter(notification::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("notification {}", notification_id)))
    }
}
