use crate::registry::FieldProps;
use crate::schema::{DisplayMeta, Mode};
use crate::widgets::{Effect, FieldError, FieldWidget};
use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use serde_json::Value as JsonValue;
use std::any::Any;
use tui_textarea::TextArea;

/// Free-form object editor: the value is typed as raw JSON. Ships as
/// the `json` map component; applications register richer ones.
pub struct JsonMapField {
    pub name: String,
    label: String,
    textarea: TextArea<'static>,
    editing: bool,
    edit_lines: u16,
    required: bool,
    validate_enabled: bool,
    error: Option<String>,
}

impl JsonMapField {
    pub fn new(props: FieldProps) -> Result<Self> {
        let meta = DisplayMeta::resolve(&props.node);
        let mut w = Self {
            label: props.label.unwrap_or_else(|| meta.title.clone()),
            name: props.name,
            textarea: TextArea::default(),
            editing: false,
            edit_lines: props.size.or(meta.size).unwrap_or(6),
            required: props.node.required && props.mode != Mode::Search,
            validate_enabled: props.validate && props.mode != Mode::Search,
            error: None,
        };
        if let Some(v) = props.value {
            FieldWidget::set_value(&mut w, &v);
        }
        Ok(w)
    }

    fn text(&self) -> String {
        self.textarea.lines().join("\n")
    }

    fn parse(&self) -> std::result::Result<JsonValue, String> {
        let t = self.text();
        if t.trim().is_empty() {
            return Ok(JsonValue::Object(serde_json::Map::new()));
        }
        match serde_json::from_str::<JsonValue>(&t) {
            Ok(v) if v.is_object() => Ok(v),
            Ok(_) => Err("Expected a JSON object".into()),
            Err(_) => Err("Invalid JSON".into()),
        }
    }
}

impl FieldWidget for JsonMapField {
    fn value(&self) -> JsonValue {
        self.parse().unwrap_or(JsonValue::Null)
    }

    fn set_value(&mut self, v: &JsonValue) {
        let text = if v.is_null() {
            String::new()
        } else {
            serde_json::to_string_pretty(v).unwrap_or_default()
        };
        self.textarea = TextArea::from(text.lines().map(|l| l.to_string()).collect::<Vec<_>>());
    }

    fn set_error(&mut self, err: FieldError) {
        self.error = match err {
            FieldError::None => None,
            FieldError::Message(m) => Some(m),
            FieldError::Fields(map) => map
                .iter()
                .find_map(|(k, e)| e.message().map(|m| format!("{k}: {m}"))),
        };
    }

    fn validate(&mut self) -> bool {
        if !self.validate_enabled {
            self.error = None;
            return true;
        }
        match self.parse() {
            Err(e) => {
                self.error = Some(e);
                false
            }
            Ok(v) => {
                if self.required && v.as_object().map(|m| m.is_empty()).unwrap_or(true) {
                    self.error = Some("This field is required".into());
                    false
                } else {
                    self.error = None;
                    true
                }
            }
        }
    }

    fn is_editing(&self) -> bool {
        self.editing
    }

    fn height(&self) -> u16 {
        1 + self.edit_lines + if self.error.is_some() { 1 } else { 0 }
    }

    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, _tick: u64) {
        let sel = if focused { '›' } else { ' ' };
        let req = if self.required { " *" } else { "" };
        let header_style = if focused && self.editing {
            crate::theme::text_editing_bold()
        } else if focused {
            crate::theme::text_active_bold()
        } else {
            Style::default()
        };
        let mut header = vec![Line::from(Span::styled(
            format!("{sel} {}{req}:", self.label),
            header_style,
        ))];
        if let Some(err) = &self.error {
            header.push(Line::from(Span::styled(
                format!("  ! {err}"),
                crate::theme::text_error(),
            )));
        }
        let head_h = header.len() as u16;
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(head_h), Constraint::Min(1)])
            .split(area);
        f.render_widget(Paragraph::new(header), rows[0]);
        f.render_widget(&self.textarea, rows[1]);
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let mut fx = Vec::new();
        match key {
            KeyCode::Enter if !self.editing => self.editing = true,
            KeyCode::Esc if self.editing => {
                self.editing = false;
                self.validate();
                fx.push(Effect::Changed {
                    field: self.name.clone(),
                    value: self.value(),
                });
                fx.push(Effect::Committed);
            }
            k if self.editing => {
                crate::widgets::textarea_input(&mut self.textarea, k);
            }
            _ => {}
        }
        fx
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
