use crate::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::error::Error;
use std::rc::Rc;

pub type ListenerError = Box<dyn Error>;

/// Callback registered on a node for one event name.
pub type Listener = Rc<dyn Fn(&Event) -> Result<(), ListenerError>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub detail: Value,
    /// Node the event was dispatched on; filled in by `Document::dispatch_event`.
    pub target: Option<NodeId>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            detail: Value::Null,
            target: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// The event as seen by template code.
    pub fn to_value(&self) -> Value {
        json!({
            "type": self.name,
            "detail": self.detail,
        })
    }
}
