use crate::controllers::{route_error, CodeHandler};
use crate::registry::{FieldProps, Registries};
use crate::schema::{Mode, SchemaNode};
use crate::services::backend::Backend;
use crate::services::bus::EventBus;
use crate::services::fragment::FragmentStore;
use crate::widgets::group::GroupWidget;
use crate::widgets::{Effect, FieldWidget};
use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Search form bound to a fragment slot. Queries go through the slot:
/// `query()` writes the serialized filter, the write notification runs
/// the search, so a slot restored from disk replays the same way.
pub struct SearchController {
    group: GroupWidget,
    service: String,
    noun: String,
    slot: String,
    backend: Rc<dyn Backend>,
    bus: EventBus,
    store: FragmentStore,
    sub_id: u64,
    pending: Rc<RefCell<Option<JsonValue>>>,
    results: Option<Vec<JsonValue>>,
    message: Option<String>,
    pub handlers: HashMap<String, CodeHandler>,
}

impl SearchController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: SchemaNode,
        slot: &str,
        service: &str,
        noun: &str,
        backend: Rc<dyn Backend>,
        bus: EventBus,
        store: FragmentStore,
        registries: Rc<Registries>,
    ) -> Result<Self> {
        let mut props = FieldProps::new(schema, Mode::Search, bus.clone(), registries);
        props.validate = false;
        let group = GroupWidget::new(props)?;
        let pending: Rc<RefCell<Option<JsonValue>>> = Rc::new(RefCell::new(None));
        let cell = pending.clone();
        let sub_id = store.subscribe(
            slot,
            Box::new(move |v| *cell.borrow_mut() = Some(v.clone())),
        );
        // a restored slot replays on the first pump
        let existing = store.get(slot, JsonValue::Null);
        if !existing.is_null() {
            *pending.borrow_mut() = Some(existing);
        }
        Ok(Self {
            group,
            service: service.to_string(),
            noun: noun.to_string(),
            slot: slot.to_string(),
            backend,
            bus,
            store,
            sub_id,
            pending,
            results: None,
            message: None,
            handlers: HashMap::new(),
        })
    }

    /// Serialize the current filter into the slot. The search itself
    /// runs when the write notification comes back through `pump`.
    pub fn query(&mut self) {
        let filter = self.group.value().to_string();
        self.store.set(&self.slot, JsonValue::String(filter));
    }

    /// Execute a search queued by a slot write, if any.
    pub fn pump(&mut self) {
        let queued = self.pending.borrow_mut().take();
        if let Some(v) = queued {
            self.search(&v);
        }
    }

    fn search(&mut self, slot_value: &JsonValue) {
        self.message = None;
        let filter = match slot_value {
            JsonValue::String(s) => {
                serde_json::from_str::<JsonValue>(s).unwrap_or(JsonValue::Null)
            }
            other => other.clone(),
        };
        let Some(obj) = filter.as_object() else {
            return;
        };
        if obj.is_empty() {
            return;
        }
        self.group.set_value(&filter);
        let envelope = match self.backend.read(&self.service, &self.noun, &filter) {
            Ok(env) => env,
            Err(e) => {
                self.bus.error(format!("Search failed: {e}"));
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
        let data = envelope.data.unwrap_or(JsonValue::Null);
        let rows = match data {
            JsonValue::Array(a) => a,
            JsonValue::Object(mut m) => match m.remove("rows") {
                Some(JsonValue::Array(a)) => a,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        self.results = Some(rows);
    }

    pub fn take_results(&mut self) -> Option<Vec<JsonValue>> {
        self.results.take()
    }

    pub fn is_editing(&self) -> bool {
        self.group.is_editing()
    }

    pub fn height(&self) -> u16 {
        self.group.height() + if self.message.is_some() { 1 } else { 0 }
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        let msg_h = if self.message.is_some() { 1 } else { 0 };
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(msg_h)])
            .split(area);
        self.group.render(f, rows[0], focused, tick);
        if let Some(msg) = &self.message {
            f.render_widget(
                Paragraph::new(Line::from(Span::styled(
                    msg.clone(),
                    crate::theme::text_error(),
                ))),
                rows[1],
            );
        }
    }

    pub fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let fx = self.group.on_key(key);
        if fx.iter().any(|e| *e == Effect::Committed) {
            self.query();
        }
        fx
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.slot, self.sub_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::testing::MockBackend;
    use crate::services::backend::Envelope;
    use serde_json::json;

    const SCHEMA: &str = "\
name: contact
fields:
  - name: name
    type: string
    required: true
  - name: city
    type: string
";

    fn controller(
        backend: Rc<MockBackend>,
        store: FragmentStore,
    ) -> SearchController {
        let schema = SchemaNode::from_yaml_str(SCHEMA).unwrap();
        SearchController::new(
            schema,
            "contact.search",
            "svc",
            "contact",
            backend,
            EventBus::new(),
            store,
            Registries::shared(),
        )
        .unwrap()
    }

    #[test]
    fn query_goes_through_the_slot() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::ok(
            json!([{"_id": "1", "name": "Ada"}]),
        )));
        let store = FragmentStore::in_memory();
        let mut c = controller(backend.clone(), store.clone());
        c.group.child_mut("name").unwrap().set_value(&json!("Ada"));
        c.query();
        // nothing until the notification is pumped
        assert_eq!(backend.call_count(), 0);
        c.pump();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls.borrow()[0].payload, json!({"name": "Ada"}));
        assert_eq!(c.take_results().unwrap().len(), 1);
        // the slot now holds the serialized filter
        let slot = store.get("contact.search", JsonValue::Null);
        assert_eq!(slot, json!(r#"{"name":"Ada"}"#));
    }

    #[test]
    fn restored_slot_replays_without_a_query() {
        let store = FragmentStore::in_memory();
        store.set("contact.search", json!(r#"{"city":"Krakow"}"#));
        let backend = Rc::new(MockBackend::with_reply(Envelope::ok(json!([]))));
        let mut c = controller(backend.clone(), store);
        c.pump();
        assert_eq!(backend.call_count(), 1);
        // the form picked up the restored filter
        assert_eq!(c.group.value(), json!({"city": "Krakow"}));
    }

    #[test]
    fn empty_filter_never_hits_the_backend() {
        let backend = Rc::new(MockBackend::default());
        let store = FragmentStore::in_memory();
        let mut c = controller(backend.clone(), store);
        c.query();
        c.pump();
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn required_fields_do_not_block_searches() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::ok(json!([]))));
        let store = FragmentStore::in_memory();
        let mut c = controller(backend.clone(), store);
        // "name" is required in the schema, but search skips validation
        c.group.child_mut("city").unwrap().set_value(&json!("Paris"));
        c.query();
        c.pump();
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls.borrow()[0].payload, json!({"city": "Paris"}));
    }

    #[test]
    fn commit_in_a_field_triggers_a_query() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::ok(json!([]))));
        let store = FragmentStore::in_memory();
        let mut c = controller(backend.clone(), store);
        c.on_key(KeyCode::Enter);
        for ch in "Ada".chars() {
            c.on_key(KeyCode::Char(ch));
        }
        c.on_key(KeyCode::Enter);
        c.pump();
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn rows_object_envelope_is_unwrapped() {
        let backend = Rc::new(MockBackend::with_reply(Envelope::ok(
            json!({"rows": [{"_id": "1"}, {"_id": "2"}], "total": 2}),
        )));
        let store = FragmentStore::in_memory();
        let mut c = controller(backend.clone(), store);
        c.group.child_mut("name").unwrap().set_value(&json!("x"));
        c.query();
        c.pump();
        assert_eq!(c.take_results().unwrap().len(), 2);
    }

    #[test]
    fn drop_unsubscribes_from_the_slot() {
        let store = FragmentStore::in_memory();
        let backend = Rc::new(MockBackend::default());
        {
            let _c = controller(backend.clone(), store.clone());
        }
        // a write after drop must not leave a queued search behind
        store.set("contact.search", json!(r#"{"name":"x"}"#));
    }
}
