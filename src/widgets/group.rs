use crate::options::{OptionSource, SharedOptions};
use crate::registry::FieldProps;
use crate::schema::{value_is_empty, DisplayMeta, Mode};
use crate::services::bus::EventBus;
use crate::widgets::chrome::panel_block;
use crate::widgets::scalar::ScalarField;
use crate::widgets::{build_widget, Effect, FieldError, FieldWidget};
use anyhow::{bail, Result};
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::HashMap;

/// Composite of named child widgets in a stable visible order. The
/// aggregate value is an object; what gets included depends on the mode
/// (update sends the delta, everything else drops empties).
pub struct GroupWidget {
    pub name: String,
    title: String,
    mode: Mode,
    return_all: bool,
    children: Vec<(String, Box<dyn FieldWidget>)>,
    focus: usize,
    originals: serde_json::Map<String, JsonValue>,
    triggers: HashMap<String, Vec<SharedOptions>>,
    bus: EventBus,
    error: Option<String>,
}

impl GroupWidget {
    pub fn new(props: FieldProps) -> Result<Self> {
        let meta = DisplayMeta::resolve(&props.node);
        let order: Vec<String> = props
            .fields
            .clone()
            .or_else(|| meta.order_for(props.mode).cloned())
            .unwrap_or_else(|| props.node.keys().iter().map(|s| s.to_string()).collect());
        let initial = props.value.clone().unwrap_or(JsonValue::Null);
        let mut children: Vec<(String, Box<dyn FieldWidget>)> = Vec::new();
        for field_name in &order {
            let Some(child_node) = props.node.get(field_name) else {
                bail!("'{}' lists unknown field '{}'", props.name, field_name);
            };
            let mut p = FieldProps::new(
                child_node.clone(),
                props.mode,
                props.bus.clone(),
                props.registries.clone(),
            );
            p.validate = props.validate;
            // field's own size hint first, the group default second
            p.size = DisplayMeta::resolve(child_node).size.or(meta.size);
            p.value = initial.get(field_name).cloned();
            children.push((field_name.clone(), build_widget(p)?));
        }
        let mut w = Self {
            title: props.label.unwrap_or_else(|| meta.title.clone()),
            name: props.name.clone(),
            mode: props.mode,
            return_all: props.return_all,
            children,
            focus: 0,
            originals: initial.as_object().cloned().unwrap_or_default(),
            triggers: HashMap::new(),
            bus: props.bus,
            error: None,
        };
        for spec in &meta.bindings {
            if !w.children.iter().any(|(n, _)| n == &spec.trigger) {
                bail!("option binding trigger '{}' is not a field", spec.trigger);
            }
            let src = OptionSource::keyed(spec.options.clone()).shared();
            let Some((_, target)) = w.children.iter_mut().find(|(n, _)| n == &spec.field) else {
                bail!("option binding target '{}' is not a field", spec.field);
            };
            let Some(scalar) = target.as_any_mut().downcast_mut::<ScalarField>() else {
                bail!("option binding target '{}' is not a select field", spec.field);
            };
            if !scalar.accepts_options() {
                bail!("option binding target '{}' is not a select field", spec.field);
            }
            scalar.attach_source(src.clone());
            w.triggers.entry(spec.trigger.clone()).or_default().push(src);
        }
        w.seed_triggers();
        w.skip_hidden_forward();
        Ok(w)
    }

    /// Point every keyed source at its trigger's current value.
    fn seed_triggers(&mut self) {
        let keys: Vec<String> = self.triggers.keys().cloned().collect();
        for trigger in keys {
            let value = self
                .children
                .iter()
                .find(|(n, _)| *n == trigger)
                .map(|(_, w)| w.value())
                .unwrap_or(JsonValue::Null);
            self.fire_trigger(&trigger, &value);
        }
    }

    fn fire_trigger(&mut self, field: &str, value: &JsonValue) {
        if let Some(sources) = self.triggers.get(field) {
            let key = value.as_str().unwrap_or_default();
            for src in sources {
                src.borrow_mut().select_key(key);
            }
        }
    }

    fn child_visible(&self, i: usize) -> bool {
        self.children
            .get(i)
            .map(|(_, w)| w.height() > 0)
            .unwrap_or(false)
    }

    fn skip_hidden_forward(&mut self) {
        while self.focus + 1 < self.children.len() && !self.child_visible(self.focus) {
            self.focus += 1;
        }
    }

    pub fn focus_next(&mut self) {
        let mut i = self.focus;
        while i + 1 < self.children.len() {
            i += 1;
            if self.child_visible(i) {
                self.focus = i;
                return;
            }
        }
    }

    pub fn focus_prev(&mut self) {
        let mut i = self.focus;
        while i > 0 {
            i -= 1;
            if self.child_visible(i) {
                self.focus = i;
                return;
            }
        }
    }

    /// Whether no visible child follows the focused one.
    pub fn at_last(&self) -> bool {
        (self.focus + 1..self.children.len()).all(|i| !self.child_visible(i))
    }

    pub fn at_first(&self) -> bool {
        (0..self.focus).all(|i| !self.child_visible(i))
    }

    pub fn focused_field(&self) -> Option<&str> {
        self.children.get(self.focus).map(|(n, _)| n.as_str())
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Box<dyn FieldWidget>> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, w)| w)
    }
}

impl FieldWidget for GroupWidget {
    fn value(&self) -> JsonValue {
        let mut out = serde_json::Map::new();
        for (field_name, w) in &self.children {
            let v = w.value();
            if self.return_all {
                out.insert(field_name.clone(), v);
                continue;
            }
            if self.mode == Mode::Update {
                let orig = self
                    .originals
                    .get(field_name)
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                // "" -> null and friends are not a change worth sending
                let both_empty = value_is_empty(&v) && value_is_empty(&orig);
                if !both_empty && v != orig {
                    out.insert(field_name.clone(), v);
                }
            } else if !value_is_empty(&v) {
                out.insert(field_name.clone(), v);
            }
        }
        JsonValue::Object(out)
    }

    // The update-mode baseline stays the construction snapshot, so a
    // value pushed through the setter still counts as a change.
    fn set_value(&mut self, v: &JsonValue) {
        for (field_name, w) in &mut self.children {
            if let Some(cv) = v.get(field_name.as_str()) {
                w.set_value(cv);
            }
        }
        self.seed_triggers();
    }

    fn set_error(&mut self, err: FieldError) {
        match err {
            FieldError::None => {
                self.error = None;
                for (_, w) in &mut self.children {
                    w.set_error(FieldError::None);
                }
            }
            FieldError::Message(m) => self.error = Some(m),
            FieldError::Fields(map) => {
                for (k, e) in map {
                    match self.children.iter_mut().find(|(n, _)| *n == k) {
                        Some((_, w)) => w.set_error(e),
                        None => self.bus.warning(format!("{}: stray error for '{k}'", self.name)),
                    }
                }
            }
        }
    }

    fn validate(&mut self) -> bool {
        let mut ok = true;
        for (_, w) in &mut self.children {
            if !w.validate() {
                ok = false;
            }
        }
        ok
    }

    fn is_editing(&self) -> bool {
        self.children
            .get(self.focus)
            .map(|(_, w)| w.is_editing())
            .unwrap_or(false)
    }

    fn height(&self) -> u16 {
        let body: u16 = self.children.iter().map(|(_, w)| w.height()).sum();
        let err = if self.error.is_some() { 1 } else { 0 };
        body.max(1) + err + 2
    }

    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let block = panel_block(&self.title, focused);
        let inner = block.inner(area);
        f.render_widget(block, area);
        let mut constraints: Vec<Constraint> = self
            .children
            .iter()
            .map(|(_, w)| Constraint::Length(w.height()))
            .collect();
        constraints.push(Constraint::Min(0));
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(inner);
        for (i, (_, w)) in self.children.iter_mut().enumerate() {
            if w.height() == 0 {
                continue;
            }
            w.render(f, rows[i], focused && i == self.focus, tick);
        }
        if let Some(err) = &self.error {
            let line = Line::from(Span::styled(
                format!("! {err}"),
                crate::theme::text_error(),
            ));
            f.render_widget(
                ratatui::widgets::Paragraph::new(line),
                rows[self.children.len()],
            );
        }
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        if !self.is_editing() {
            match key {
                KeyCode::Up => {
                    self.focus_prev();
                    return Vec::new();
                }
                KeyCode::Down => {
                    self.focus_next();
                    return Vec::new();
                }
                _ => {}
            }
        }
        let fx = match self.children.get_mut(self.focus) {
            Some((_, w)) => w.on_key(key),
            None => Vec::new(),
        };
        for effect in &fx {
            if let Effect::Changed { field, value } = effect {
                let (field, value) = (field.clone(), value.clone());
                self.fire_trigger(&field, &value);
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
    use crate::registry::Registries;
    use crate::schema::SchemaNode;
    use serde_json::json;

    fn group_props(yaml: &str, mode: Mode) -> FieldProps {
        let node = SchemaNode::from_yaml_str(yaml).unwrap();
        FieldProps::new(node, mode, EventBus::new(), Registries::shared())
    }

    fn group(yaml: &str, mode: Mode) -> GroupWidget {
        GroupWidget::new(group_props(yaml, mode)).unwrap()
    }

    const CONTACT: &str = "\
name: contact
fields:
  - name: first
    type: string
  - name: last
    type: string
  - name: age
    type: int
";

    #[test]
    fn schema_order_is_the_default() {
        let g = group(CONTACT, Mode::Create);
        let names: Vec<&String> = g.children.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["first", "last", "age"]);
    }

    #[test]
    fn meta_order_narrows_and_reorders() {
        let yaml = "\
name: contact
special:
  ui:
    order:
      search: [last]
      create: [age, first]
fields:
  - name: first
  - name: last
  - name: age
    type: int
";
        let g = group(yaml, Mode::Create);
        let names: Vec<&String> = g.children.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["age", "first"]);
        let g = group(yaml, Mode::Search);
        assert_eq!(g.children.len(), 1);
    }

    #[test]
    fn unknown_field_in_order_fails_construction() {
        let mut p = group_props(CONTACT, Mode::Create);
        p.fields = Some(vec!["first".into(), "ghost".into()]);
        let err = GroupWidget::new(p).err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn create_value_drops_empty_fields() {
        let mut g = group(CONTACT, Mode::Create);
        g.child_mut("first").unwrap().set_value(&json!("Ada"));
        assert_eq!(g.value(), json!({"first": "Ada"}));
    }

    #[test]
    fn update_value_is_the_delta() {
        let mut p = group_props(CONTACT, Mode::Update);
        p.value = Some(json!({"first": "Ada", "last": "Lovelace", "age": 36}));
        let mut g = GroupWidget::new(p).unwrap();
        g.child_mut("last").unwrap().set_value(&json!("Byron"));
        assert_eq!(g.value(), json!({"last": "Byron"}));
    }

    #[test]
    fn update_ignores_empty_to_empty_transitions() {
        let mut p = group_props(CONTACT, Mode::Update);
        p.value = Some(json!({"first": "Ada", "last": null}));
        let mut g = GroupWidget::new(p).unwrap();
        // widget renders null as "", which must not read as a change
        g.child_mut("last").unwrap().set_value(&json!(""));
        assert_eq!(g.value(), json!({}));
    }

    #[test]
    fn setter_keeps_the_construction_baseline() {
        let mut p = group_props(CONTACT, Mode::Update);
        p.value = Some(json!({"first": "Ada", "age": 36}));
        let mut g = GroupWidget::new(p).unwrap();
        FieldWidget::set_value(&mut g, &json!({"age": 37}));
        assert_eq!(g.value(), json!({"age": 37}));
    }

    #[test]
    fn binding_target_must_take_options() {
        let yaml = "\
name: address
special:
  ui:
    dynamic_options:
      - field: city
        trigger: country
        options: {}
fields:
  - name: country
    options: [pl, us]
  - name: city
    type: string
";
        let err = GroupWidget::new(group_props(yaml, Mode::Create)).err().unwrap();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn return_all_includes_everything() {
        let mut p = group_props(CONTACT, Mode::Create);
        p.return_all = true;
        let g = GroupWidget::new(p).unwrap();
        let v = g.value();
        assert!(v.get("first").is_some());
        assert!(v.get("age").is_some());
    }

    #[test]
    fn field_errors_are_distributed() {
        let mut g = group(CONTACT, Mode::Create);
        FieldWidget::set_error(
            &mut g,
            FieldError::from_json(&json!({"first": "Required", "ghost": "Lost"})),
        );
        // distributed error shows up once the field re-validates is skipped;
        // the stray key lands on the bus as a warning
        let notices = g.bus.drain();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("ghost"));
    }

    const BOUND: &str = "\
name: address
special:
  ui:
    dynamic_options:
      - field: city
        trigger: country
        options:
          pl: [krakow, warsaw]
          us: [boston, chicago]
fields:
  - name: country
    options: [pl, us]
  - name: city
    type: string
    special:
      ui:
        widget: select
";

    #[test]
    fn trigger_change_swaps_dependent_options() {
        let mut g = group(BOUND, Mode::Create);
        // select country = pl
        g.on_key(KeyCode::Enter);
        g.on_key(KeyCode::Enter);
        let city = g.child_mut("city").unwrap();
        let scalar = city.as_any_mut().downcast_mut::<ScalarField>().unwrap();
        let opts: Vec<String> = scalar.options().iter().map(|c| c.value.clone()).collect();
        assert_eq!(opts, ["krakow", "warsaw"]);
    }

    #[test]
    fn binding_seeds_from_existing_value() {
        let node = SchemaNode::from_yaml_str(BOUND).unwrap();
        let mut p = FieldProps::new(node, Mode::Update, EventBus::new(), Registries::shared());
        p.value = Some(json!({"country": "us", "city": "boston"}));
        let mut g = GroupWidget::new(p).unwrap();
        let city = g.child_mut("city").unwrap();
        let scalar = city.as_any_mut().downcast_mut::<ScalarField>().unwrap();
        let opts: Vec<String> = scalar.options().iter().map(|c| c.value.clone()).collect();
        assert_eq!(opts, ["boston", "chicago"]);
    }

    #[test]
    fn binding_with_unknown_trigger_fails() {
        let yaml = "\
name: g
special:
  ui:
    dynamic_options:
      - field: city
        trigger: ghost
        options: {}
fields:
  - name: city
    special:
      ui:
        widget: select
";
        let err = GroupWidget::new(group_props(yaml, Mode::Create)).err().unwrap();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn focus_skips_hidden_children() {
        let yaml = "\
name: g
fields:
  - name: a
  - name: secret
    type: hidden
  - name: b
";
        let mut g = group(yaml, Mode::Create);
        assert_eq!(g.focused_field(), Some("a"));
        g.focus_next();
        assert_eq!(g.focused_field(), Some("b"));
        g.focus_prev();
        assert_eq!(g.focused_field(), Some("a"));
    }
}
