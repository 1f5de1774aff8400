/**
 * REST Backend
 *
 * PostgREST-style HTTP client for the hosted backend.
 *
 * # Endpoints
 *
 * - `GET    /rest/v1/{table}?select=*&col=eq.v&order=col.desc`
 * - `POST   /rest/v1/{table}`                          (insert)
 * - `PATCH  /rest/v1/{table}?id=eq.X&user_id=eq.Y`     (update)
 * - `DELETE /rest/v1/{table}?id=eq.X&user_id=eq.Y`     (delete)
 * - `GET    /realtime/v1/{table}?events=insert,update` (SSE change stream)
 *
 * Mutations send `Prefer: return=representation`; an empty representation
 * means no row matched the id and owner, which is reported as `NotFound`.
 */

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use crate::app::remote::sse::SseBuffer;
use crate::app::remote::{Backend, ChangeSink, Filter, SubscriptionHandle};
use crate::shared::error::BackendError;
use crate::shared::event::{ChangeEvent, EventMask};
use crate::shared::models::{Order, Record, ID_FIELD, OWNER_FIELD};

/// HTTP client for the hosted backend
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
    next_subscription: AtomicU64,
    subscriptions: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            access_token: None,
            next_subscription: AtomicU64::new(0),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticate requests as a signed-in user instead of the anonymous key
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        match self.access_token.as_ref().or(self.api_key.as_ref()) {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Send a mutation and decode its representation
    async fn representation(&self, table: &str, request: RequestBuilder) -> Result<Vec<Record>, BackendError> {
        let response = self
            .authorize(request)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let response = check_status(table, response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl Drop for RestBackend {
    fn drop(&mut self) {
        for (_, reader) in self.subscriptions().drain() {
            reader.abort();
        }
    }
}

/// Render a filter value the way PostgREST expects it in a query string
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Translate filters into PostgREST query pairs
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", query_value(value))),
            Filter::EqOrNull(column, value) => (
                "or".to_string(),
                format!("({col}.is.null,{col}.eq.{val})", col = column, val = query_value(value)),
            ),
        })
        .collect()
}

fn owner_scope(id: &str, owner_id: &str) -> [(String, String); 2] {
    [
        (ID_FIELD.to_string(), format!("eq.{}", id)),
        (OWNER_FIELD.to_string(), format!("eq.{}", owner_id)),
    ]
}

async fn check_status(table: &str, response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    tracing::warn!("[Rest] {} request failed: {} {}", table, status, message);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::forbidden(message),
        StatusCode::NOT_FOUND => BackendError::not_found(table),
        other => BackendError::rejected(other.as_u16(), message),
    })
}

/// Forward SSE frames from a realtime response onto a sink until either side closes
async fn pump_events(table: String, mask: EventMask, response: Response, sink: ChangeSink) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseBuffer::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!("[Realtime] Error reading {} stream: {}", table, e);
                return;
            }
        };
        for frame in buffer.push(&chunk) {
            let event = match serde_json::from_str::<ChangeEvent>(&frame.data) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("[Realtime] Failed to parse {} event: {}", table, e);
                    continue;
                }
            };
            if event.table != table || !mask.contains(event.kind) {
                continue;
            }
            if sink.send(event).is_err() {
                tracing::debug!("[Realtime] {} receiver dropped, closing stream", table);
                return;
            }
        }
    }
    tracing::info!("[Realtime] {} stream closed by server", table);
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, filters: &[Filter], order: Option<&Order>) -> Result<Vec<Record>, BackendError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(filters));
        if let Some(order) = order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }

        let request = self.authorize(self.client.get(self.table_url(table)).query(&params));
        let response = check_status(table, request.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError> {
        let request = self.client.post(self.table_url(table)).json(&record);
        self.representation(table, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::rejected(500, format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Record) -> Result<Record, BackendError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&owner_scope(id, owner_id))
            .json(&patch);
        self.representation(table, request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::not_found(table))
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), BackendError> {
        let request = self.client.delete(self.table_url(table)).query(&owner_scope(id, owner_id));
        if self.representation(table, request).await?.is_empty() {
            return Err(BackendError::not_found(table));
        }
        Ok(())
    }

    async fn subscribe(&self, table: &str, mask: EventMask, sink: ChangeSink) -> Result<SubscriptionHandle, BackendError> {
        let url = format!("{}/realtime/v1/{}", self.base_url, table);
        let request = self
            .authorize(self.client.get(url))
            .query(&[("events", mask.to_query())])
            .header("Accept", "text/event-stream")
            .header("Subscribe", "true");
        let response = check_status(table, request.send().await?).await?;

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = tokio::spawn(pump_events(table.to_string(), mask, response, sink));
        self.subscriptions().insert(id, reader);

        tracing::info!("[Realtime] Subscribed to {} ({})", table, mask.to_query());
        Ok(SubscriptionHandle { id, table: table.to_string() })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackendError> {
        if let Some(reader) = self.subscriptions().remove(&handle.id) {
            reader.abort();
            tracing::info!("[Realtime] Unsubscribed from {}", handle.table);
        }
        Ok(())
    }
}
