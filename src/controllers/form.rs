use crate::controllers::{route_error, CodeHandler};
use crate::registry::{FieldProps, Registries};
use crate::schema::{Mode, SchemaNode};
use crate::services::backend::{Backend, Envelope};
use crate::services::bus::EventBus;
use crate::widgets::group::GroupWidget;
use crate::widgets::{Effect, FieldError, FieldWidget};
use anyhow::{ensure, Result};
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::rc::Rc;

/// What a finished form hands back to its embedder.
#[derive(Clone, Debug, PartialEq)]
pub enum FormOutcome {
    /// Merged record: the form values overlaid with the backend reply.
    Saved(JsonValue),
    Cancelled,
}

pub type SubmitFn = Box<dyn FnMut(&JsonValue) -> Result<Envelope>>;
pub type BeforeSubmit = Box<dyn FnMut(&mut JsonValue, Mode) -> bool>;

/// Drives a create or update form: one group, a Save/Cancel row, and
/// the submit flow against the backend.
pub struct FormController {
    group: GroupWidget,
    mode: Mode,
    service: String,
    noun: String,
    pk_field: String,
    pk: Option<JsonValue>,
    values: serde_json::Map<String, JsonValue>,
    backend: Rc<dyn Backend>,
    bus: EventBus,
    in_flight: bool,
    on_buttons: bool,
    button: usize,
    message: Option<String>,
    outcome: Option<FormOutcome>,
    pub before_submit: Option<BeforeSubmit>,
    pub submit_fn: Option<SubmitFn>,
    pub handlers: HashMap<String, CodeHandler>,
}

impl FormController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: SchemaNode,
        mode: Mode,
        initial: Option<JsonValue>,
        service: &str,
        noun: &str,
        backend: Rc<dyn Backend>,
        bus: EventBus,
        registries: Rc<Registries>,
    ) -> Result<Self> {
        ensure!(mode != Mode::Search, "forms are create or update only");
        let pk_field = schema.key.clone();
        let pk = initial
            .as_ref()
            .and_then(|v| v.get(&pk_field))
            .cloned();
        ensure!(
            mode == Mode::Create || pk.is_some(),
            "update form needs a '{pk_field}' in its initial value"
        );
        let values = initial
            .as_ref()
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let mut props = FieldProps::new(schema, mode, bus.clone(), registries);
        props.value = initial;
        let group = GroupWidget::new(props)?;
        Ok(Self {
            group,
            mode,
            service: service.to_string(),
            noun: noun.to_string(),
            pk_field,
            pk,
            values,
            backend,
            bus,
            in_flight: false,
            on_buttons: false,
            button: 0,
            message: None,
            outcome: None,
            before_submit: None,
            submit_fn: None,
            handlers: HashMap::new(),
        })
    }

    pub fn value(&self) -> JsonValue {
        self.group.value()
    }

    pub fn set_value(&mut self, v: &JsonValue) {
        self.group.set_value(v);
        if let Some(obj) = v.as_object() {
            for (k, val) in obj {
                self.values.insert(k.clone(), val.clone());
            }
        }
    }

    pub fn set_error(&mut self, err: FieldError) {
        self.group.set_error(err);
    }

    pub fn valid(&mut self) -> bool {
        self.group.validate()
    }

    pub fn group_mut(&mut self) -> &mut GroupWidget {
        &mut self.group
    }

    pub fn take_outcome(&mut self) -> Option<FormOutcome> {
        self.outcome.take()
    }

    /// Validate, run the hooks and hit the backend. A submit that lands
    /// while another is being processed is dropped.
    pub fn submit(&mut self) {
        if self.in_flight {
            return;
        }
        self.message = None;
        if !self.group.validate() {
            self.message = Some("Please fix the highlighted errors".into());
            return;
        }
        let mut payload = self.group.value();
        if self.mode == Mode::Update {
            if let (Some(obj), Some(pk)) = (payload.as_object_mut(), &self.pk) {
                obj.insert(self.pk_field.clone(), pk.clone());
            }
        }
        self.in_flight = true;
        if let Some(hook) = &mut self.before_submit {
            if !hook(&mut payload, self.mode) {
                self.in_flight = false;
                return;
            }
        }
        let result = match &mut self.submit_fn {
            Some(f) => f(&payload),
            None => match self.mode {
                Mode::Create => self.backend.create(&self.service, &self.noun, &payload),
                _ => self.backend.update(&self.service, &self.noun, &payload),
            },
        };
        self.in_flight = false;
        let envelope = match result {
            Ok(env) => env,
            Err(e) => {
                self.bus.error(format!("Submit failed: {e}"));
                return;
            }
        };
        if let Some(w) = &envelope.warning {
            self.bus.warning(w.clone());
        }
        if let Some(err) = &envelope.error {
            self.message = route_error(err, &mut self.group, &self.handlers, &self.bus);
            return;
        }
        let mut merged = self.values.clone();
        if let Some(obj) = payload.as_object() {
            for (k, v) in obj {
                merged.insert(k.clone(), v.clone());
            }
        }
        match envelope.data {
            Some(JsonValue::Object(obj)) => {
                for (k, v) in obj {
                    merged.insert(k, v);
                }
            }
            // A bare reply is the generated primary key.
            Some(other) if !other.is_null() => {
                merged.insert(self.pk_field.clone(), other);
            }
            _ => {}
        }
        self.bus.success("Saved");
        self.outcome = Some(FormOutcome::Saved(JsonValue::Object(merged)));
    }

    pub fn height(&self) -> u16 {
        self.group.height() + 1 + if self.message.is_some() { 1 } else { 0 }
    }

    pub fn is_editing(&self) -> bool {
        self.group.is_editing()
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let button_h = 1 + if self.message.is_some() { 1 } else { 0 };
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(button_h)])
            .split(area);
        self.group
            .render(f, rows[0], focused && !self.on_buttons, tick);
        let mut save_style = crate::theme::text_active_bold();
        let mut cancel_style = crate::theme::text_muted();
        if self.on_buttons {
            if self.button == 0 {
                save_style = crate::theme::list_cursor_style();
            } else {
                cancel_style = crate::theme::list_cursor_style();
            }
        }
        let mut lines = vec![Line::from(vec![
            Span::styled("  [ Save ]  ", save_style),
            Span::styled("Cancel", cancel_style),
        ])];
        if let Some(msg) = &self.message {
            lines.push(Line::from(Span::styled(
                msg.clone(),
                crate::theme::text_error(),
            )));
        }
        f.render_widget(Paragraph::new(lines), rows[1]);
    }

    pub fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        if self.on_buttons {
            match key {
                KeyCode::Left | KeyCode::Right => self.button = 1 - self.button,
                KeyCode::Up => self.on_buttons = false,
                KeyCode::Enter => {
                    if self.button == 0 {
                        self.submit();
                    } else {
                        self.outcome = Some(FormOutcome::Cancelled);
                    }
                }
                KeyCode::Esc => self.on_buttons = false,
                _ => {}
            }
            return Vec::new();
        }
        if key == KeyCode::Down && !self.group.is_editing() && self.group.at_last() {
            self.on_buttons = true;
            return Vec::new();
        }
        if key == KeyCode::Esc && !self.group.is_editing() {
            self.outcome = Some(FormOutcome::Cancelled);
            return Vec::new();
        }
        self.group.on_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::testing::MockBackend;
    use crate::services::backend::VALIDATION_CODE;
    use crate::services::bus::NoticeLevel;
    use serde_json::json;

    const SCHEMA: &str = "\
name: contact
key: _id
fields:
  - name: name
    type: string
    required: true
  - name: age
    type: int
";

    fn controller(
        mode: Mode,
        initial: Option<JsonValue>,
        backend: Rc<MockBackend>,
    ) -> FormController {
        let schema = SchemaNode::from_yaml_str(SCHEMA).unwrap();
        FormController::new(
            schema,
            mode,
            initial,
            "svc",
            "contact",
            backend,
            EventBus::new(),
            Registries::shared(),
        )
        .unwrap()
    }

    #[test]
    fn create_submits_and_merges_generated_key() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(Mode::Create, None, backend.clone());
        c.set_value(&json!({"name": "Ada", "age": 36}));
        c.submit();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls.borrow()[0].verb, "create");
        let FormOutcome::Saved(v) = c.take_outcome().unwrap() else {
            panic!("expected save");
        };
        assert_eq!(v["_id"], json!("generated"));
        assert_eq!(v["name"], json!("Ada"));
    }

    #[test]
    fn invalid_form_never_reaches_the_backend() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(Mode::Create, None, backend.clone());
        c.submit();
        assert_eq!(backend.call_count(), 0);
        assert!(c.message.is_some());
    }

    #[test]
    fn update_sends_delta_with_primary_key() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(
            Mode::Update,
            Some(json!({"_id": "x1", "name": "Ada", "age": 36})),
            backend.clone(),
        );
        c.group.child_mut("age").unwrap().set_value(&json!(37));
        c.submit();
        let payload = backend.calls.borrow()[0].payload.clone();
        assert_eq!(payload, json!({"_id": "x1", "age": 37}));
    }

    #[test]
    fn update_without_key_fails_construction() {
        let schema = SchemaNode::from_yaml_str(SCHEMA).unwrap();
        let res = FormController::new(
            schema,
            Mode::Update,
            Some(json!({"name": "Ada"})),
            "svc",
            "contact",
            Rc::new(MockBackend::default()),
            EventBus::new(),
            Registries::shared(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn validation_error_maps_onto_fields() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::err(
            VALIDATION_CODE,
            json!({"name": "Already taken"}),
        )));
        let mut c = controller(Mode::Create, None, backend);
        c.set_value(&json!({"name": "Ada"}));
        c.submit();
        assert!(c.take_outcome().is_none());
        assert!(c.message.is_some());
    }

    #[test]
    fn unhandled_code_goes_to_the_bus() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::err(
            "quota",
            json!("limit reached"),
        )));
        let mut c = controller(Mode::Create, None, backend);
        c.set_value(&json!({"name": "Ada"}));
        c.submit();
        let notices = c.bus.drain();
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].text.contains("limit reached"));
    }

    #[test]
    fn handled_code_stays_inline() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::err("quota", json!(null))));
        let mut c = controller(Mode::Create, None, backend);
        c.handlers.insert(
            "quota".into(),
            CodeHandler::Message("Over quota, try later".into()),
        );
        c.set_value(&json!({"name": "Ada"}));
        c.submit();
        assert_eq!(c.message.as_deref(), Some("Over quota, try later"));
        assert!(c.bus.drain().is_empty());
    }

    #[test]
    fn before_submit_can_veto() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(Mode::Create, None, backend.clone());
        c.before_submit = Some(Box::new(|_, _| false));
        c.set_value(&json!({"name": "Ada"}));
        c.submit();
        assert_eq!(backend.call_count(), 0);
        // the guard must be released for the next attempt
        c.before_submit = None;
        c.submit();
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn submit_override_bypasses_the_backend() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(Mode::Create, None, backend.clone());
        c.set_value(&json!({"name": "Ada"}));
        let hits = Rc::new(std::cell::RefCell::new(0));
        let h2 = hits.clone();
        c.submit_fn = Some(Box::new(move |_| {
            *h2.borrow_mut() += 1;
            Ok(Envelope::ok(json!({"_id": "z"})))
        }));
        c.submit();
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(backend.call_count(), 0);
        let FormOutcome::Saved(v) = c.take_outcome().unwrap() else {
            panic!("expected save");
        };
        assert_eq!(v["_id"], json!("z"));
    }

    #[test]
    fn in_flight_submit_is_dropped() {
        let backend = Rc::new(MockBackend::default());
        let mut c = controller(Mode::Create, None, backend.clone());
        c.set_value(&json!({"name": "Ada"}));
        c.in_flight = true;
        c.submit();
        assert_eq!(backend.call_count(), 0);
        c.in_flight = false;
        c.submit();
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn search_mode_is_rejected() {
        let schema = SchemaNode::from_yaml_str(SCHEMA).unwrap();
        assert!(FormController::new(
            schema,
            Mode::Search,
            None,
            "svc",
            "contact",
            Rc::new(MockBackend::default()),
            EventBus::new(),
            Registries::shared(),
        )
        .is_err());
    }
}
