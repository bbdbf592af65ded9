use crate::registry::{FieldProps, Registries};
use crate::schema::{DisplayMeta, Mode, SchemaNode};
use crate::services::bus::EventBus;
use crate::widgets::chrome::panel_block;
use crate::widgets::{build_widget, Effect, FieldError, FieldWidget};
use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::rc::Rc;

struct Element {
    key: u64,
    widget: Box<dyn FieldWidget>,
}

/// Homogeneous collection of child widgets built from one item schema.
/// Elements carry synthetic keys so removal in the middle never reuses
/// another element's identity.
pub struct ListField {
    pub name: String,
    label: String,
    item_node: SchemaNode,
    mode: Mode,
    validate_enabled: bool,
    required: bool,
    bus: EventBus,
    registries: Rc<Registries>,
    elements: Vec<Element>,
    next_key: u64,
    cursor: usize,
    error: Option<String>,
}

impl ListField {
    pub fn new(props: FieldProps) -> Result<Self> {
        let meta = DisplayMeta::resolve(&props.node);
        let item_node = props
            .node
            .child()
            .cloned()
            .unwrap_or_else(|| SchemaNode::scalar(&props.node.name, "string"));
        let mut w = Self {
            label: props.label.unwrap_or_else(|| meta.title.clone()),
            name: props.name,
            item_node,
            mode: props.mode,
            validate_enabled: props.validate,
            required: props.node.required && props.mode != Mode::Search,
            bus: props.bus,
            registries: props.registries,
            elements: Vec::new(),
            next_key: 1,
            cursor: 0,
            error: None,
        };
        if let Some(v) = props.value {
            FieldWidget::set_value(&mut w, &v);
        }
        Ok(w)
    }

    /// Append an empty element and return its key.
    pub fn add(&mut self) -> Result<u64> {
        let mut p = FieldProps::new(
            self.item_node.clone(),
            self.mode,
            self.bus.clone(),
            self.registries.clone(),
        );
        p.validate = self.validate_enabled;
        let widget = build_widget(p)?;
        let key = self.next_key;
        self.next_key += 1;
        self.elements.push(Element { key, widget });
        self.cursor = self.elements.len() - 1;
        Ok(key)
    }

    pub fn remove(&mut self, key: u64) -> bool {
        let Some(i) = self.elements.iter().position(|e| e.key == key) else {
            return false;
        };
        self.elements.remove(i);
        if self.cursor >= self.elements.len() {
            self.cursor = self.elements.len().saturating_sub(1);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn focused_editing(&self) -> bool {
        self.elements
            .get(self.cursor)
            .map(|e| e.widget.is_editing())
            .unwrap_or(false)
    }
}

impl FieldWidget for ListField {
    fn value(&self) -> JsonValue {
        JsonValue::Array(self.elements.iter().map(|e| e.widget.value()).collect())
    }

    fn set_value(&mut self, v: &JsonValue) {
        self.elements.clear();
        self.next_key = 1;
        self.cursor = 0;
        if let Some(arr) = v.as_array() {
            for item in arr {
                match self.add() {
                    Ok(_) => {
                        if let Some(e) = self.elements.last_mut() {
                            e.widget.set_value(item);
                        }
                    }
                    Err(e) => self.bus.error(format!("{}: {e}", self.name)),
                }
            }
        }
        self.cursor = 0;
    }

    fn set_error(&mut self, err: FieldError) {
        self.error = None;
        match err {
            FieldError::None => {
                for e in &mut self.elements {
                    e.widget.set_error(FieldError::None);
                }
            }
            FieldError::Message(m) => self.error = Some(m),
            // Element errors come keyed by position.
            FieldError::Fields(map) => {
                for (k, v) in map {
                    if let Ok(i) = k.parse::<usize>() {
                        if let Some(e) = self.elements.get_mut(i) {
                            e.widget.set_error(v);
                        }
                    }
                }
            }
        }
    }

    fn validate(&mut self) -> bool {
        let mut ok = true;
        for e in &mut self.elements {
            if !e.widget.validate() {
                ok = false;
            }
        }
        if self.validate_enabled && self.required && self.elements.is_empty() {
            self.error = Some("Please provide at least one item".into());
            ok = false;
        } else {
            self.error = None;
        }
        ok
    }

    fn is_editing(&self) -> bool {
        self.focused_editing()
    }

    fn height(&self) -> u16 {
        let body: u16 = self
            .elements
            .iter()
            .map(|e| e.widget.height())
            .sum::<u16>()
            .max(1);
        let err = if self.error.is_some() { 1 } else { 0 };
        body + err + 2
    }

    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let title = format!("{} ({})", self.label, self.elements.len());
        let block = panel_block(&title, focused);
        let inner = block.inner(area);
        f.render_widget(block, area);
        if self.elements.is_empty() {
            let hint = Line::from(Span::styled(
                "  + to add",
                crate::theme::text_muted(),
            ));
            f.render_widget(ratatui::widgets::Paragraph::new(hint), inner);
            return;
        }
        let mut constraints: Vec<Constraint> = self
            .elements
            .iter()
            .map(|e| Constraint::Length(e.widget.height()))
            .collect();
        constraints.push(Constraint::Min(0));
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(inner);
        for (i, e) in self.elements.iter_mut().enumerate() {
            e.widget
                .render(f, rows[i], focused && i == self.cursor, tick);
        }
        if let Some(err) = &self.error {
            let line = Line::from(Span::styled(
                format!("  ! {err}"),
                crate::theme::text_error(),
            ));
            f.render_widget(
                ratatui::widgets::Paragraph::new(line),
                rows[self.elements.len()],
            );
        }
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.focused_editing() {
            match key {
                KeyCode::Insert | KeyCode::Char('+') => {
                    match self.add() {
                        Ok(_) => fx.push(Effect::Changed {
                            field: self.name.clone(),
                            value: self.value(),
                        }),
                        Err(e) => self.bus.error(format!("{}: {e}", self.name)),
                    }
                    return fx;
                }
                KeyCode::Delete | KeyCode::Char('-') => {
                    if let Some(k) = self.elements.get(self.cursor).map(|e| e.key) {
                        self.remove(k);
                        fx.push(Effect::Changed {
                            field: self.name.clone(),
                            value: self.value(),
                        });
                    }
                    return fx;
                }
                KeyCode::Up => {
                    self.cursor = self.cursor.saturating_sub(1);
                    return fx;
                }
                KeyCode::Down => {
                    if self.cursor + 1 < self.elements.len() {
                        self.cursor += 1;
                    }
                    return fx;
                }
                _ => {}
            }
        }
        if let Some(e) = self.elements.get_mut(self.cursor) {
            for effect in e.widget.on_key(key) {
                match effect {
                    // A change inside any element is a change of the list.
                    Effect::Changed { .. } => fx.push(Effect::Changed {
                        field: self.name.clone(),
                        value: JsonValue::Null,
                    }),
                    other => fx.push(other),
                }
            }
            // Recompute with the child borrow released.
            let value = self.value();
            for effect in fx.iter_mut() {
                if let Effect::Changed { value: v, .. } = effect {
                    *v = value.clone();
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(yaml: &str, mode: Mode) -> ListField {
        let node = SchemaNode::from_yaml_str(yaml).unwrap();
        ListField::new(FieldProps::new(
            node,
            mode,
            EventBus::new(),
            Registries::shared(),
        ))
        .unwrap()
    }

    #[test]
    fn add_and_remove_keep_order_and_identity() {
        let mut l = list("name: tags\nitem: {type: string}", Mode::Create);
        let a = l.add().unwrap();
        let b = l.add().unwrap();
        let c = l.add().unwrap();
        assert_ne!(a, b);
        assert!(l.remove(b));
        assert!(!l.remove(b));
        assert_eq!(l.len(), 2);
        // remaining keys untouched
        assert_eq!(l.elements[0].key, a);
        assert_eq!(l.elements[1].key, c);
    }

    #[test]
    fn value_aggregates_in_order() {
        let mut l = list("name: tags\nitem: {type: string}", Mode::Create);
        l.add().unwrap();
        l.add().unwrap();
        l.elements[0].widget.set_value(&json!("x"));
        l.elements[1].widget.set_value(&json!("y"));
        assert_eq!(l.value(), json!(["x", "y"]));
    }

    #[test]
    fn set_value_rebuilds_elements() {
        let mut l = list("name: tags\nitem: {type: string}", Mode::Create);
        FieldWidget::set_value(&mut l, &json!(["a", "b", "c"]));
        assert_eq!(l.len(), 3);
        assert_eq!(l.value(), json!(["a", "b", "c"]));
        FieldWidget::set_value(&mut l, &json!(["z"]));
        assert_eq!(l.value(), json!(["z"]));
    }

    #[test]
    fn keys_add_and_delete_elements() {
        let mut l = list("name: tags\nitem: {type: string}", Mode::Create);
        let fx = l.on_key(KeyCode::Char('+'));
        assert!(matches!(&fx[0], Effect::Changed { field, .. } if field == "tags"));
        l.on_key(KeyCode::Char('+'));
        assert_eq!(l.len(), 2);
        l.on_key(KeyCode::Char('-'));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn defaults_to_string_item_without_schema() {
        let mut l = list("name: tags\ntype: list", Mode::Create);
        l.add().unwrap();
        l.elements[0].widget.set_value(&json!("hello"));
        assert_eq!(l.value(), json!(["hello"]));
    }

    #[test]
    fn required_empty_list_fails_validation() {
        let mut l = list(
            "name: tags\nrequired: true\nitem: {type: string}",
            Mode::Create,
        );
        assert!(!FieldWidget::validate(&mut l));
        l.add().unwrap();
        l.elements[0].widget.set_value(&json!("x"));
        assert!(FieldWidget::validate(&mut l));
    }

    #[test]
    fn indexed_errors_reach_elements() {
        let mut l = list("name: tags\nitem: {type: string}", Mode::Create);
        l.add().unwrap();
        l.add().unwrap();
        FieldWidget::set_error(
            &mut l,
            FieldError::from_json(&json!({"1": "Bad value"})),
        );
        // no panic, message landed on the second element
        assert!(l.error.is_none());
    }
}
