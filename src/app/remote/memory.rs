//! # In-Memory Backend
//!
//! A process-local store with the same contract as the remote backend:
//! backend-assigned ids, owner-scoped mutations, and change events pushed to
//! subscribers. Tests use its failure injection and the mutation log to
//! observe replay order.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::app::remote::{loosely_equal, Backend, ChangeSink, Filter, SubscriptionHandle};
use crate::shared::error::BackendError;
use crate::shared::event::{ChangeEvent, ChangeKind, EventMask};
use crate::shared::models::{record_id, Action, Order, Record, ID_FIELD, OWNER_FIELD};

type Matcher = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// A mutation the store accepted, in application order
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMutation {
    pub table: String,
    pub action: Action,
    pub record: Record,
}

struct FailureRule {
    table: String,
    action: Action,
    matcher: Matcher,
    status: u16,
    message: String,
}

struct Subscriber {
    handle: SubscriptionHandle,
    mask: EventMask,
    sink: ChangeSink,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Record>>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
    failures: Vec<FailureRule>,
    log: Vec<AppliedMutation>,
}

impl MemoryState {
    fn check_failure(&self, table: &str, action: Action, record: &Record) -> Result<(), BackendError> {
        match self
            .failures
            .iter()
            .find(|rule| rule.table == table && rule.action == action && (rule.matcher)(record))
        {
            Some(rule) => Err(match rule.status {
                404 => BackendError::not_found(table),
                401 | 403 => BackendError::forbidden(rule.message.clone()),
                status => BackendError::rejected(status, rule.message.clone()),
            }),
            None => Ok(()),
        }
    }

    fn publish(&mut self, event: ChangeEvent) {
        self.subscribers.retain(|subscriber| !subscriber.sink.is_closed());
        for subscriber in &self.subscribers {
            if subscriber.handle.table == event.table && subscriber.mask.contains(event.kind) {
                // A receiver dropped between retain and send is pruned next time
                let _ = subscriber.sink.send(event.clone());
            }
        }
    }

    fn position_of(&self, table: &str, id: &str) -> Option<usize> {
        self.tables
            .get(table)?
            .iter()
            .position(|row| row.get(ID_FIELD).is_some_and(|v| loosely_equal(v, &Value::from(id))))
    }

    fn owned_position(&self, table: &str, id: &str, owner_id: &str) -> Result<usize, BackendError> {
        let position = self.position_of(table, id).ok_or_else(|| BackendError::not_found(table))?;
        let owned = self.tables[table][position]
            .get(OWNER_FIELD)
            .is_some_and(|owner| owner.as_str() == Some(owner_id));
        // Row-level security hides foreign rows, so they look missing
        if owned {
            Ok(position)
        } else {
            Err(BackendError::not_found(table))
        }
    }
}

/// In-process backend
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    unreachable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.unreachable.load(AtomicOrdering::SeqCst) {
            Err(BackendError::Unreachable)
        } else {
            Ok(())
        }
    }

    /// Load rows without emitting events; rows without an id get one.
    pub fn seed(&self, table: &str, records: Vec<Record>) {
        let mut state = self.state();
        let rows = state.tables.entry(table.to_string()).or_default();
        for mut record in records {
            if record_id(&record).is_none() {
                record.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
            }
            rows.push(record);
        }
    }

    /// Current rows of a table in storage order
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Simulate the network path to the backend going away
    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, AtomicOrdering::SeqCst);
    }

    /// Reject `action` on `table` whenever `matcher` accepts the payload
    pub fn fail_when<F>(&self, table: &str, action: Action, status: u16, message: &str, matcher: F)
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.state().failures.push(FailureRule {
            table: table.to_string(),
            action,
            matcher: Box::new(matcher),
            status,
            message: message.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Mutations applied so far, oldest first
    pub fn applied(&self) -> Vec<AppliedMutation> {
        self.state().log.clone()
    }

    /// Push an event to subscribers as if another client changed the table
    pub fn emit(&self, event: ChangeEvent) {
        self.state().publish(event);
    }

    /// Remove a row regardless of owner (administrative change)
    pub fn admin_delete(&self, table: &str, id: &str) -> bool {
        let mut state = self.state();
        let Some(position) = state.position_of(table, id) else {
            return false;
        };
        let Some(rows) = state.tables.get_mut(table) else {
            return false;
        };
        let removed = rows.remove(position);
        state.publish(ChangeEvent::new(table, ChangeKind::Delete, None).with_old_record(removed));
        true
    }

    /// Live subscriptions on a table
    pub fn subscriber_count(&self, table: &str) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|subscriber| !subscriber.sink.is_closed());
        state.subscribers.iter().filter(|s| s.handle.table == table).count()
    }
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: &str, filters: &[Filter], order: Option<&Order>) -> Result<Vec<Record>, BackendError> {
        self.ensure_reachable()?;
        let state = self.state();
        let mut rows: Vec<Record> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|filter| filter.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut record: Record) -> Result<Record, BackendError> {
        self.ensure_reachable()?;
        let mut state = self.state();
        state.check_failure(table, Action::Insert, &record)?;

        match record_id(&record) {
            Some(id) if state.position_of(table, &id).is_some() => {
                return Err(BackendError::rejected(409, format!("duplicate key id={}", id)));
            }
            Some(_) => {}
            None => {
                record.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
            }
        }
        record
            .entry("created_at".to_string())
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));

        state.tables.entry(table.to_string()).or_default().push(record.clone());
        state.log.push(AppliedMutation {
            table: table.to_string(),
            action: Action::Insert,
            record: record.clone(),
        });
        state.publish(ChangeEvent::new(table, ChangeKind::Insert, Some(record.clone())));
        Ok(record)
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Record) -> Result<Record, BackendError> {
        self.ensure_reachable()?;
        let mut state = self.state();

        let mut candidate = patch.clone();
        candidate.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        state.check_failure(table, Action::Update, &candidate)?;

        let position = state.owned_position(table, id, owner_id)?;
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::not_found(table))?;
        let old = rows[position].clone();
        for (key, value) in patch {
            if key != ID_FIELD {
                rows[position].insert(key, value);
            }
        }
        let updated = rows[position].clone();

        state.log.push(AppliedMutation {
            table: table.to_string(),
            action: Action::Update,
            record: updated.clone(),
        });
        state.publish(ChangeEvent::new(table, ChangeKind::Update, Some(updated.clone())).with_old_record(old));
        Ok(updated)
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), BackendError> {
        self.ensure_reachable()?;
        let mut state = self.state();

        let mut candidate = Record::new();
        candidate.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        state.check_failure(table, Action::Delete, &candidate)?;

        let position = state.owned_position(table, id, owner_id)?;
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::not_found(table))?;
        let removed = rows.remove(position);

        state.log.push(AppliedMutation {
            table: table.to_string(),
            action: Action::Delete,
            record: removed.clone(),
        });
        state.publish(ChangeEvent::new(table, ChangeKind::Delete, None).with_old_record(removed));
        Ok(())
    }

    async fn subscribe(&self, table: &str, mask: EventMask, sink: ChangeSink) -> Result<SubscriptionHandle, BackendError> {
        self.ensure_reachable()?;
        let mut state = self.state();
        state.next_subscription += 1;
        let handle = SubscriptionHandle {
            id: state.next_subscription,
            table: table.to_string(),
        };
        state.subscribers.push(Subscriber { handle: handle.clone(), mask, sink });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackendError> {
        self.state().subscribers.retain(|subscriber| subscriber.handle != handle);
        Ok(())
    }
}
