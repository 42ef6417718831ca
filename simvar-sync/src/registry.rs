//! Variable registry
//!
//! Owns the canonical set of tracked variables, indexed by name and by define
//! id, in insertion order. Every operation takes the registry-wide lock once,
//! so each call is atomic on its own; nothing is atomic across calls.
//!
//! The registry is shared (`Arc<VariableRegistry>`) between the poll scheduler
//! and the embedding application, which may query it from its own threads
//! while the loop is running.

use crate::ids::{IdGenerator, SequentialIds};
use crate::types::{DataType, DefineId, RequestId, Result, SyncError, Timestamp, Value};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Definition of a variable as registered with the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDefinition {
    /// Define id, assigned once and never reused
    pub id: DefineId,
    pub name: String,
    pub unit: String,
    pub data_type: DataType,
    /// True once the session has accepted the definition
    pub registered: bool,
}

/// A variable together with its polling state and latest value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedVariable {
    #[serde(flatten)]
    pub definition: VariableDefinition,
    /// Request id awaiting a response, if any
    pub pending_request: Option<RequestId>,
    pub last_request_at: Option<Timestamp>,
    /// Monotonic issue time of the pending request; drives reissue
    #[serde(skip)]
    pub(crate) requested_at: Option<Instant>,
    pub last_update_at: Option<Timestamp>,
    pub value: Option<Value>,
    /// Accepted updates over the variable's lifetime
    pub update_count: u64,
}

impl TrackedVariable {
    fn new(definition: VariableDefinition) -> Self {
        Self {
            definition,
            pending_request: None,
            last_request_at: None,
            requested_at: None,
            last_update_at: None,
            value: None,
            update_count: 0,
        }
    }

    pub fn id(&self) -> DefineId {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_pending(&self) -> bool {
        self.pending_request.is_some()
    }

    pub fn as_i32(&self, default: i32) -> i32 {
        self.value
            .as_ref()
            .and_then(Value::as_i64)
            .map(|v| v as i32)
            .unwrap_or(default)
    }

    pub fn as_i64(&self, default: i64) -> i64 {
        self.value.as_ref().and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn as_f32(&self, default: f32) -> f32 {
        self.value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn as_f64(&self, default: f64) -> f64 {
        self.value.as_ref().and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn as_string(&self, default: &str) -> String {
        self.value
            .as_ref()
            .and_then(Value::as_text)
            .map(|text| text.into_owned())
            .unwrap_or_else(|| default.to_string())
    }
}

struct RegistryInner {
    /// Define ids in insertion order
    order: Vec<DefineId>,
    by_id: HashMap<DefineId, TrackedVariable>,
    by_name: HashMap<String, DefineId>,
    define_ids: Box<dyn IdGenerator>,
    /// Accepted updates across all variables, including removed ones
    total_updates: u64,
}

/// The variable registry
pub struct VariableRegistry {
    inner: Mutex<RegistryInner>,
}

impl VariableRegistry {
    /// Create an empty registry issuing define ids from 1
    pub fn new() -> Self {
        Self::with_id_generator(Box::new(SequentialIds::new()))
    }

    /// Create an empty registry with an injected define id source
    pub fn with_id_generator(define_ids: Box<dyn IdGenerator>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                order: Vec::new(),
                by_id: HashMap::new(),
                by_name: HashMap::new(),
                define_ids,
                total_updates: 0,
            }),
        }
    }

    /// Add a variable, or return the id of the existing one with this name
    ///
    /// The first registration of a name wins: a later call with a different
    /// unit or type leaves the stored metadata untouched.
    ///
    /// Fails with [`SyncError::DefineIdsExhausted`] when the id source runs
    /// dry, or keeps handing out ids that are already in use.
    pub fn add(&self, name: &str, unit: &str, data_type: DataType) -> Result<DefineId> {
        let mut inner = self.inner.lock();

        if let Some(&id) = inner.by_name.get(name) {
            if let Some(existing) = inner.by_id.get(&id) {
                let def = &existing.definition;
                if def.unit != unit || def.data_type != data_type {
                    log::warn!(
                        "Variable '{}' already tracked as [{}, {}]; ignoring [{}, {}]",
                        name,
                        def.unit,
                        def.data_type,
                        unit,
                        data_type
                    );
                }
            }
            return Ok(id);
        }

        // A generator of distinct ids finds a free one within len + 1 draws
        let attempts = inner.by_id.len() + 1;
        let mut free = None;
        for _ in 0..attempts {
            match inner.define_ids.next_id() {
                Some(id) if !inner.by_id.contains_key(&id) => {
                    free = Some(id);
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
        let Some(id) = free else {
            log::error!("No define id left for variable '{}'", name);
            return Err(SyncError::DefineIdsExhausted {
                name: name.to_string(),
            });
        };

        let definition = VariableDefinition {
            id,
            name: name.to_string(),
            unit: unit.to_string(),
            data_type,
            registered: false,
        };
        inner.order.push(id);
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, TrackedVariable::new(definition));

        log::debug!("Tracking variable '{}' ({}) as define id {}", name, data_type, id);
        Ok(id)
    }

    /// Remove a variable from every index, regardless of pending state
    pub fn remove(&self, id: DefineId) -> bool {
        let mut inner = self.inner.lock();

        let Some(variable) = inner.by_id.remove(&id) else {
            return false;
        };
        inner.by_name.remove(&variable.definition.name);
        inner.order.retain(|existing| *existing != id);

        log::debug!("Removed variable '{}' (define id {})", variable.definition.name, id);
        true
    }

    pub fn lookup(&self, id: DefineId) -> Option<TrackedVariable> {
        self.inner.lock().by_id.get(&id).cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<TrackedVariable> {
        let inner = self.inner.lock();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Declared type of a variable, used to pick the value codec
    pub fn data_type(&self, id: DefineId) -> Option<DataType> {
        self.inner
            .lock()
            .by_id
            .get(&id)
            .map(|variable| variable.definition.data_type)
    }

    /// Latest value of a variable
    pub fn value(&self, id: DefineId) -> Option<Value> {
        self.inner
            .lock()
            .by_id
            .get(&id)
            .and_then(|variable| variable.value.clone())
    }

    /// Apply a data response
    ///
    /// The response is accepted only if `define_id` names a tracked variable
    /// whose pending request id equals `request_id`. On acceptance the pending
    /// state is cleared, the value stored (fixed strings truncated at their
    /// first NUL) and the update count incremented. Anything else is a stale
    /// or duplicate response and changes nothing.
    pub fn update(
        &self,
        request_id: RequestId,
        define_id: DefineId,
        value: Value,
    ) -> Option<TrackedVariable> {
        let mut inner = self.inner.lock();

        let variable = inner.by_id.get_mut(&define_id)?;
        if variable.pending_request != Some(request_id) {
            log::warn!(
                "Discarding stale response for '{}': request id {} (pending {:?})",
                variable.definition.name,
                request_id,
                variable.pending_request
            );
            return None;
        }

        let value = match value {
            Value::FixedString(s) if variable.definition.data_type.is_string() => {
                Value::FixedString(s.trimmed())
            }
            other => other,
        };

        variable.pending_request = None;
        variable.value = Some(value);
        variable.update_count += 1;
        variable.last_update_at = Some(Utc::now());
        let updated = variable.clone();

        inner.total_updates += 1;
        Some(updated)
    }

    /// Point-in-time copy of every variable in insertion order
    pub fn snapshot(&self) -> Vec<TrackedVariable> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted updates since the registry was created
    pub fn total_updates(&self) -> u64 {
        self.inner.lock().total_updates
    }

    /// One diagnostic line per variable
    pub fn dump(&self, indent: &str) -> Vec<String> {
        self.snapshot()
            .iter()
            .enumerate()
            .map(|(idx, variable)| {
                let def = &variable.definition;
                let value = variable
                    .value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let request = variable
                    .pending_request
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{}{:02}: name: {} unit: {} value: {} type: {} updates: {} reqId: {} defid: {} registered: {} pending: {}",
                    indent,
                    idx + 1,
                    def.name,
                    def.unit,
                    value,
                    def.data_type,
                    variable.update_count,
                    request,
                    def.id,
                    def.registered,
                    variable.is_pending()
                )
            })
            .collect()
    }

    /// Definitions not yet accepted by the session, in insertion order
    pub(crate) fn unregistered(&self) -> Vec<VariableDefinition> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|variable| !variable.definition.registered)
            .map(|variable| variable.definition.clone())
            .collect()
    }

    pub(crate) fn mark_registered(&self, id: DefineId) -> bool {
        match self.inner.lock().by_id.get_mut(&id) {
            Some(variable) => {
                variable.definition.registered = true;
                true
            }
            None => false,
        }
    }

    /// Registered variables that should get a request this tick
    ///
    /// A variable qualifies when it has no pending request, or when
    /// `reissue_after` is set and its pending request is at least that old.
    /// Age is measured on the monotonic clock, so wall-clock jumps neither
    /// hold back nor hasten a reissue.
    pub(crate) fn due_for_request(&self, now: Instant, reissue_after: Option<Duration>) -> Vec<DefineId> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|variable| variable.definition.registered)
            .filter(|variable| match (variable.pending_request, reissue_after) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(_), Some(timeout)) => variable
                    .requested_at
                    .map(|issued| now.saturating_duration_since(issued) >= timeout)
                    .unwrap_or(true),
            })
            .map(|variable| variable.definition.id)
            .collect()
    }

    /// Record an issued request; replaces any earlier pending id
    pub(crate) fn mark_pending(&self, id: DefineId, request_id: RequestId, issued_at: Instant) -> bool {
        match self.inner.lock().by_id.get_mut(&id) {
            Some(variable) => {
                variable.pending_request = Some(request_id);
                variable.requested_at = Some(issued_at);
                variable.last_request_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
