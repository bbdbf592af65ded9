pub mod form;
pub mod search;

use crate::services::backend::{ApiError, VALIDATION_CODE};
use crate::services::bus::EventBus;
use crate::widgets::group::GroupWidget;
use crate::widgets::{FieldError, FieldWidget};
use std::collections::HashMap;

/// How a controller reacts to a non-validation backend error code.
pub enum CodeHandler {
    /// Fixed inline message.
    Message(String),
    /// Derive the inline message from the error payload.
    Transform(Box<dyn Fn(&serde_json::Value) -> String>),
}

/// Route a backend error: `validation` maps onto the group's fields, a
/// registered handler produces an inline message, anything else goes to
/// the bus. Returns the inline message to show, if any.
pub(crate) fn route_error(
    err: &ApiError,
    group: &mut GroupWidget,
    handlers: &HashMap<String, CodeHandler>,
    bus: &EventBus,
) -> Option<String> {
    if err.code == VALIDATION_CODE {
        group.set_error(FieldError::from_json(&err.msg));
        return Some("Please fix the highlighted errors".into());
    }
    if let Some(h) = handlers.get(&err.code) {
        return Some(match h {
            CodeHandler::Message(m) => m.clone(),
            CodeHandler::Transform(f) => f(&err.msg),
        });
    }
    let detail = match &err.msg {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    if detail.is_empty() {
        bus.error(format!("Request failed ({})", err.code));
    } else {
        bus.error(format!("{}: {detail}", err.code));
    }
    None
}
