//! Store lifecycle events and the event-logging hook.
//!
//! Drivers publish [`StoreEvent`]s to a [`StoreEventListener`]. Payloads are
//! graphs of shared [`EventObject`] handles and may contain cycles;
//! [`serialize_event_value`] renders them with a `"[Circular]"` marker on
//! revisit. [`EventLogger`] logs configured events, either in full or
//! reduced to dotted key paths with [`project_event`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map as JsonMap, Value as Json};

use crate::config::LoggedEventConfig;

/// Marker substituted for an object already on the serialisation path.
pub const CIRCULAR_MARKER: &str = "[Circular]";
/// Marker substituted past [`MAX_EVENT_DEPTH`].
pub const TRUNCATED_MARKER: &str = "[Truncated]";
pub const MAX_EVENT_DEPTH: usize = 32;

/// A node of an event payload.
#[derive(Debug, Clone)]
pub enum EventValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<EventValue>),
    Object(EventObject),
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for EventValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for EventValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<EventObject> for EventValue {
    fn from(o: EventObject) -> Self {
        Self::Object(o)
    }
}

/// Shared, mutable object node. Cloning shares the node, so a payload can
/// reference itself.
#[derive(Clone, Default)]
pub struct EventObject(Arc<RwLock<BTreeMap<String, EventValue>>>);

impl EventObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(self, key: &str, value: impl Into<EventValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: &str, value: impl Into<EventValue>) {
        self.0.write().insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<EventValue> {
        self.0.read().get(key).cloned()
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for EventObject {
    // Keys only: the payload may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.0.read().keys().cloned().collect();
        f.debug_struct("EventObject").field("keys", &keys).finish()
    }
}

/// A named store lifecycle event.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub name: String,
    pub payload: EventObject,
}

impl StoreEvent {
    #[must_use]
    pub fn new(name: &str, payload: EventObject) -> Self {
        Self {
            name: name.to_string(),
            payload,
        }
    }
}

/// Receiver of store events.
///
/// Used as `Arc<dyn StoreEventListener>`. Called synchronously by drivers,
/// so implementations must not block.
pub trait StoreEventListener: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

/// Fans every event out to the registered listeners.
#[derive(Default)]
pub struct CompositeEventListener {
    listeners: RwLock<Vec<Arc<dyn StoreEventListener>>>,
}

impl CompositeEventListener {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn StoreEventListener>>) -> Self {
        Self {
            listeners: RwLock::new(listeners),
        }
    }

    pub fn add(&self, listener: Arc<dyn StoreEventListener>) {
        self.listeners.write().push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl StoreEventListener for CompositeEventListener {
    fn on_event(&self, event: &StoreEvent) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_event(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Serialisation
// ---------------------------------------------------------------------------

/// Renders an event value as JSON, replacing cycles with `"[Circular]"`.
///
/// An object shared by two siblings is rendered in both places; only an
/// object that is its own ancestor is a cycle.
#[must_use]
pub fn serialize_event_value(value: &EventValue) -> Json {
    let mut path = HashSet::new();
    serialize_inner(value, &mut path, 0)
}

fn serialize_inner(value: &EventValue, path: &mut HashSet<usize>, depth: usize) -> Json {
    if depth > MAX_EVENT_DEPTH {
        return Json::String(TRUNCATED_MARKER.to_string());
    }
    match value {
        EventValue::Null => Json::Null,
        EventValue::Bool(b) => Json::Bool(*b),
        EventValue::Int(i) => Json::from(*i),
        EventValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        EventValue::String(s) => Json::String(s.clone()),
        EventValue::Array(items) => Json::Array(
            items
                .iter()
                .map(|item| serialize_inner(item, path, depth + 1))
                .collect(),
        ),
        EventValue::Object(obj) => {
            let id = obj.id();
            if !path.insert(id) {
                return Json::String(CIRCULAR_MARKER.to_string());
            }
            let entries: Vec<(String, EventValue)> = obj
                .0
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut map = JsonMap::new();
            for (key, child) in &entries {
                map.insert(key.clone(), serialize_inner(child, path, depth + 1));
            }
            path.remove(&id);
            Json::Object(map)
        }
    }
}

/// Looks up a dotted path. Numeric segments index into arrays.
#[must_use]
pub fn lookup_path(payload: &EventObject, path: &str) -> Option<EventValue> {
    let mut segments = path.split('.');
    let mut current = payload.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            EventValue::Object(obj) => obj.get(segment)?,
            EventValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

/// Reduces a payload to the given dotted keys. A key that does not resolve
/// maps to `None`.
#[must_use]
pub fn project_event(payload: &EventObject, keys: &[String]) -> BTreeMap<String, Option<Json>> {
    keys.iter()
        .map(|key| {
            let value = lookup_path(payload, key).map(|v| serialize_event_value(&v));
            (key.clone(), value)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// EventLogger
// ---------------------------------------------------------------------------

/// Logs configured store events through `tracing`.
pub struct EventLogger {
    events: HashMap<String, LoggedEventConfig>,
}

impl EventLogger {
    #[must_use]
    pub fn new(configs: &[LoggedEventConfig]) -> Self {
        Self {
            events: configs
                .iter()
                .map(|c| (c.name.clone(), c.clone()))
                .collect(),
        }
    }

    /// The rendered payload that would be logged for `event`, or `None` when
    /// the event is not configured.
    #[must_use]
    pub fn render(&self, event: &StoreEvent) -> Option<Json> {
        let config = self.events.get(&event.name)?;
        Some(match &config.keys {
            Some(keys) => Json::Object(
                project_event(&event.payload, keys)
                    .into_iter()
                    .map(|(k, v)| (k, v.unwrap_or(Json::Null)))
                    .collect(),
            ),
            None => serialize_event_value(&EventValue::Object(event.payload.clone())),
        })
    }
}

impl StoreEventListener for EventLogger {
    fn on_event(&self, event: &StoreEvent) {
        let Some(config) = self.events.get(&event.name) else {
            return;
        };
        let Some(payload) = self.render(event) else {
            return;
        };
        let name = event.name.as_str();
        match config.level.as_str() {
            "trace" => tracing::trace!(event = name, payload = %payload, "store event"),
            "debug" => tracing::debug!(event = name, payload = %payload, "store event"),
            "warn" => tracing::warn!(event = name, payload = %payload, "store event"),
            "error" => tracing::error!(event = name, payload = %payload, "store event"),
            _ => tracing::info!(event = name, payload = %payload, "store event"),
        }
    }
}
