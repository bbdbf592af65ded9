pub mod chrome;
pub mod group;
pub mod list;
pub mod map;
pub mod scalar;
pub mod table;

use crate::registry::FieldProps;
use crate::schema::{DisplayMeta, NodeClass};
use anyhow::{bail, Result};
use crossterm::event::KeyCode;
use ratatui::crossterm::event as rt_event;
use ratatui::layout::Rect;
use ratatui::Frame;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;
use tui_textarea::TextArea;

/// Side effects a widget reports from key handling. The owner decides
/// what to do with them; widgets never reach outside their own state.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// A field's value changed (option-binding triggers hang off this).
    Changed { field: String, value: JsonValue },
    /// The user finished an edit (Enter on a scalar).
    Committed,
    /// Text the user asked to copy to the clipboard.
    Copy(String),
}

/// Validation state for a widget: nothing, an inline message, or a
/// per-field mapping a group distributes to its children.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldError {
    #[default]
    None,
    Message(String),
    Fields(HashMap<String, FieldError>),
}

impl FieldError {
    /// Decode a backend validation payload: strings become messages,
    /// objects recurse into per-field errors.
    pub fn from_json(v: &JsonValue) -> Self {
        match v {
            JsonValue::Null => FieldError::None,
            JsonValue::String(s) => FieldError::Message(s.clone()),
            JsonValue::Object(m) => FieldError::Fields(
                m.iter()
                    .map(|(k, v)| (k.clone(), FieldError::from_json(v)))
                    .collect(),
            ),
            other => FieldError::Message(other.to_string()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, FieldError::None)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            FieldError::Message(s) => Some(s),
            _ => None,
        }
    }
}

/// Route an editing key into a textarea. tui-textarea consumes ratatui's
/// re-exported crossterm events while the terminal loop produces direct
/// crossterm ones, so the code is mapped across.
pub(crate) fn textarea_input(ta: &mut TextArea<'static>, key: KeyCode) {
    let code = match key {
        KeyCode::Char(c) => rt_event::KeyCode::Char(c),
        KeyCode::Enter => rt_event::KeyCode::Enter,
        KeyCode::Backspace => rt_event::KeyCode::Backspace,
        KeyCode::Delete => rt_event::KeyCode::Delete,
        KeyCode::Left => rt_event::KeyCode::Left,
        KeyCode::Right => rt_event::KeyCode::Right,
        KeyCode::Up => rt_event::KeyCode::Up,
        KeyCode::Down => rt_event::KeyCode::Down,
        KeyCode::Home => rt_event::KeyCode::Home,
        KeyCode::End => rt_event::KeyCode::End,
        KeyCode::Tab => rt_event::KeyCode::Tab,
        _ => return,
    };
    let _ = ta.input(rt_event::KeyEvent::new(code, rt_event::KeyModifiers::NONE));
}

/// Uniform surface of every form widget, scalar or composite.
pub trait FieldWidget {
    fn value(&self) -> JsonValue;
    fn set_value(&mut self, v: &JsonValue);
    fn set_error(&mut self, err: FieldError);
    /// Run client-side validation, storing any inline error. Returns
    /// whether the current value is acceptable.
    fn validate(&mut self) -> bool;
    /// Whether the widget currently owns the keyboard (text entry,
    /// open option list). Containers must not steal navigation keys
    /// while this holds.
    fn is_editing(&self) -> bool {
        false
    }
    fn height(&self) -> u16 {
        1
    }
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64);
    fn on_key(&mut self, key: KeyCode) -> Vec<Effect>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Build the widget for a schema node, dispatching on its structural
/// class. Display metadata can override the default choice through the
/// registries; an override naming an unregistered widget is an error.
pub fn build_widget(mut props: FieldProps) -> Result<Box<dyn FieldWidget>> {
    let meta = DisplayMeta::resolve(&props.node);
    // Schema-level props sit under explicit per-instance ones.
    for (k, v) in &meta.props {
        props.custom.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let registries = props.registries.clone();
    match props.node.class() {
        NodeClass::Group => {
            let w = group::GroupWidget::new(props)?;
            Ok(Box::new(w))
        }
        NodeClass::List => match &meta.widget {
            Some(tag) if registries.list.contains(tag) => registries.list.create(tag, props),
            Some(tag) => bail!("no '{}' widget registered as list", tag),
            None => {
                let w = list::ListField::new(props)?;
                Ok(Box::new(w))
            }
        },
        NodeClass::Map => match &meta.widget {
            Some(tag) => registries.map.create(tag, props),
            None => bail!("map field '{}' needs an explicit widget", props.name),
        },
        NodeClass::Scalar => {
            let tag = scalar::resolve_tag(&props.node, &meta);
            registries.scalar.create(&tag, props)
        }
    }
}
