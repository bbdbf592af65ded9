use crate::options::SharedOptions;
use crate::registry::FieldProps;
use crate::schema::{value_is_empty, Choice, DisplayMeta, Mode, SchemaNode};
use crate::widgets::{Effect, FieldError, FieldWidget};
use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::{Paragraph, Wrap};
use serde_json::{json, Value as JsonValue};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use tui_textarea::TextArea;

pub const OPTIONS_VISIBLE: usize = 8;

/// Concrete input behavior of a scalar field. The tag doubles as the
/// registry key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    Text,
    TextArea,
    Password,
    Number { integer: bool },
    Checkbox,
    Date,
    DateTime,
    Time,
    Price,
    Hidden,
    Select,
    MultiSelect,
}

impl InputKind {
    pub fn tag(&self) -> &'static str {
        match self {
            InputKind::Text => "text",
            InputKind::TextArea => "textarea",
            InputKind::Password => "password",
            InputKind::Number { integer: false } => "number",
            InputKind::Number { integer: true } => "integer",
            InputKind::Checkbox => "checkbox",
            InputKind::Date => "date",
            InputKind::DateTime => "datetime",
            InputKind::Time => "time",
            InputKind::Price => "price",
            InputKind::Hidden => "hidden",
            InputKind::Select => "select",
            InputKind::MultiSelect => "multiselect",
        }
    }
}

/// Registry tag for a scalar node: explicit widget override first, then
/// the presence of options, then the type tag. Unrecognized type tags
/// pass through so applications can register their own.
pub fn resolve_tag(node: &SchemaNode, meta: &DisplayMeta) -> String {
    if let Some(w) = &meta.widget {
        return w.clone();
    }
    if node.options.is_some() || meta.options.is_some() || meta.options_cmd.is_some() {
        return "select".into();
    }
    match node.type_tag.as_str() {
        "string" | "str" | "text" => "text".into(),
        "int" => "integer".into(),
        "float" | "decimal" | "elapsed" => "number".into(),
        "bool" | "boolean" => "checkbox".into(),
        "timestamp" => "datetime".into(),
        other => other.to_string(),
    }
}

/// Comparison operator a search field can attach to its value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Exact,
    StartsWith,
    EndsWith,
    Wildcard,
    Gte,
    Lte,
}

impl MatchOp {
    pub fn tag(&self) -> &'static str {
        match self {
            MatchOp::Exact => "exact",
            MatchOp::StartsWith => "startswith",
            MatchOp::EndsWith => "endswith",
            MatchOp::Wildcard => "wildcard",
            MatchOp::Gte => "gte",
            MatchOp::Lte => "lte",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchOp::Exact => "is",
            MatchOp::StartsWith => "starts",
            MatchOp::EndsWith => "ends",
            MatchOp::Wildcard => "like",
            MatchOp::Gte => ">=",
            MatchOp::Lte => "<=",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "exact" => Some(MatchOp::Exact),
            "startswith" => Some(MatchOp::StartsWith),
            "endswith" => Some(MatchOp::EndsWith),
            "wildcard" => Some(MatchOp::Wildcard),
            "gte" => Some(MatchOp::Gte),
            "lte" => Some(MatchOp::Lte),
            _ => None,
        }
    }
}

const TEXT_OPS: &[MatchOp] = &[
    MatchOp::Exact,
    MatchOp::StartsWith,
    MatchOp::EndsWith,
    MatchOp::Wildcard,
];
const RANGE_OPS: &[MatchOp] = &[MatchOp::Exact, MatchOp::Gte, MatchOp::Lte];

/// Operators a search field of this kind offers.
pub fn operators_for(kind: InputKind) -> &'static [MatchOp] {
    match kind {
        InputKind::Text | InputKind::TextArea | InputKind::Password => TEXT_OPS,
        InputKind::Number { .. }
        | InputKind::Date
        | InputKind::DateTime
        | InputKind::Time
        | InputKind::Price => RANGE_OPS,
        InputKind::Checkbox
        | InputKind::Hidden
        | InputKind::Select
        | InputKind::MultiSelect => &[],
    }
}

type LiveOptions = Rc<RefCell<Option<Vec<Choice>>>>;

/// One leaf input. Text-like kinds edit `text` in place; select kinds
/// keep the chosen value(s) as source of truth so options can arrive
/// (or change) after the fact without losing the selection.
pub struct ScalarField {
    pub name: String,
    label: String,
    node: SchemaNode,
    kind: InputKind,
    required: bool,
    text: String,
    flag: Option<bool>,
    multi_values: Vec<String>,
    options: Vec<Choice>,
    cursor: usize,
    offset: usize,
    error: Option<String>,
    validate_enabled: bool,
    search_mode: bool,
    op_idx: usize,
    editing: bool,
    edit_lines: u16,
    textarea: Option<TextArea<'static>>,
    source: Option<(SharedOptions, u64)>,
    live: LiveOptions,
}

impl ScalarField {
    pub fn with_kind(kind: InputKind, props: FieldProps) -> Result<Self> {
        let meta = DisplayMeta::resolve(&props.node);
        let search_mode = props.mode == Mode::Search;
        let options = props
            .node
            .options
            .clone()
            .or_else(|| meta.options.clone())
            .unwrap_or_default();
        let mut w = Self {
            name: props.name.clone(),
            label: props.label.unwrap_or_else(|| meta.title.clone()),
            required: props.node.required && !search_mode,
            node: props.node,
            kind,
            text: String::new(),
            flag: if search_mode || kind != InputKind::Checkbox {
                None
            } else {
                Some(false)
            },
            multi_values: Vec::new(),
            options,
            cursor: 0,
            offset: 0,
            error: None,
            validate_enabled: props.validate && !search_mode,
            search_mode,
            op_idx: 0,
            editing: false,
            edit_lines: props.size.or(meta.size).unwrap_or(4),
            textarea: if kind == InputKind::TextArea {
                Some(TextArea::default())
            } else {
                None
            },
            source: None,
            live: Rc::new(RefCell::new(None)),
        };
        if let Some(cmd) = &meta.options_cmd {
            let src =
                crate::options::OptionSource::remote_cmd(cmd.clone(), meta.unwrap.clone()).shared();
            w.attach_source(src);
        }
        let initial = props.value.or_else(|| {
            if props.mode == Mode::Create {
                meta.default.clone()
            } else {
                None
            }
        });
        if let Some(v) = initial {
            FieldWidget::set_value(&mut w, &v);
        }
        Ok(w)
    }

    pub fn options(&mut self) -> &[Choice] {
        self.sync_live();
        &self.options
    }

    /// Whether this field is driven by an option list at all.
    pub fn accepts_options(&self) -> bool {
        matches!(self.kind, InputKind::Select | InputKind::MultiSelect)
    }

    /// Subscribe to a shared option source. The widget keeps the current
    /// snapshot and picks up pushed updates on its next render or key.
    pub fn attach_source(&mut self, src: SharedOptions) {
        if let Some((old, id)) = self.source.take() {
            old.borrow_mut().untrack(id);
        }
        let live = self.live.clone();
        let (id, snapshot) = src
            .borrow_mut()
            .track(Box::new(move |data| *live.borrow_mut() = Some(data.to_vec())));
        self.options = snapshot;
        self.source = Some((src, id));
        self.clamp_cursor();
    }

    fn sync_live(&mut self) {
        let pushed = self.live.borrow_mut().take();
        if let Some(data) = pushed {
            self.options = data;
            self.clamp_cursor();
        }
    }

    fn clamp_cursor(&mut self) {
        if self.cursor >= self.options.len() {
            self.cursor = self.options.len().saturating_sub(1);
        }
        self.offset = self.offset.min(self.cursor);
    }

    fn ops(&self) -> &'static [MatchOp] {
        if self.search_mode {
            operators_for(self.kind)
        } else {
            &[]
        }
    }

    fn op(&self) -> MatchOp {
        self.ops().get(self.op_idx).copied().unwrap_or(MatchOp::Exact)
    }

    /// Value without the search-operator wrapper.
    fn raw_value(&self) -> JsonValue {
        match self.kind {
            InputKind::Checkbox => match self.flag {
                Some(b) => json!(b),
                None => JsonValue::Null,
            },
            InputKind::Select => json!(self.text),
            InputKind::MultiSelect => json!(self.multi_values),
            InputKind::Number { integer } => {
                let t = self.text.trim();
                if t.is_empty() {
                    json!("")
                } else if integer {
                    t.parse::<i64>().map(|n| json!(n)).unwrap_or_else(|_| json!(t))
                } else {
                    t.parse::<f64>().map(|n| json!(n)).unwrap_or_else(|_| json!(t))
                }
            }
            InputKind::Price => {
                let t = self.text.trim();
                if t.is_empty() {
                    json!("")
                } else {
                    t.parse::<f64>().map(|n| json!(n)).unwrap_or_else(|_| json!(t))
                }
            }
            InputKind::TextArea => match &self.textarea {
                Some(ta) => json!(ta.lines().join("\n")),
                None => json!(self.text),
            },
            _ => json!(self.text),
        }
    }

    fn selected_index(&self) -> Option<usize> {
        self.options.iter().position(|c| c.value == self.text)
    }

    fn kind_check(&self, raw: &JsonValue) -> std::result::Result<(), String> {
        match self.kind {
            InputKind::Date => {
                let s = raw.as_str().unwrap_or_default();
                chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|_| ())
                    .map_err(|_| "Expected YYYY-MM-DD".into())
            }
            InputKind::DateTime => match raw {
                JsonValue::Number(_) => Ok(()),
                _ => chrono::DateTime::parse_from_rfc3339(raw.as_str().unwrap_or_default())
                    .map(|_| ())
                    .map_err(|_| "Expected an RFC 3339 timestamp".into()),
            },
            InputKind::Time => {
                let s = raw.as_str().unwrap_or_default();
                chrono::NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .or_else(|_| chrono::NaiveTime::parse_from_str(s, "%H:%M"))
                    .map(|_| ())
                    .map_err(|_| "Expected HH:MM".into())
            }
            InputKind::Number { integer: true } => {
                if raw.is_i64() || raw.is_u64() {
                    Ok(())
                } else {
                    Err("Invalid integer".into())
                }
            }
            InputKind::Number { integer: false } | InputKind::Price => {
                if raw.is_number() {
                    Ok(())
                } else {
                    Err("Invalid number".into())
                }
            }
            InputKind::Select => {
                if self.options.is_empty() || self.selected_index().is_some() {
                    Ok(())
                } else {
                    Err("Not one of the allowed options".into())
                }
            }
            _ => Ok(()),
        }
    }

    fn changed(&self) -> Effect {
        Effect::Changed {
            field: self.name.clone(),
            value: self.raw_value(),
        }
    }

    fn accepts_char(&self, c: char) -> bool {
        match self.kind {
            InputKind::Number { integer: true } => c.is_ascii_digit() || c == '-',
            InputKind::Number { integer: false } | InputKind::Price => {
                c.is_ascii_digit() || c == '-' || c == '.'
            }
            _ => true,
        }
    }

    fn option_window(&self) -> (usize, usize) {
        let start = self.offset.min(self.options.len());
        let end = (start + OPTIONS_VISIBLE).min(self.options.len());
        (start, end)
    }

    fn move_cursor(&mut self, down: bool) {
        if self.options.is_empty() {
            return;
        }
        if down {
            if self.cursor + 1 < self.options.len() {
                self.cursor += 1;
            }
        } else {
            self.cursor = self.cursor.saturating_sub(1);
        }
        if self.cursor < self.offset {
            self.offset = self.cursor;
        } else if self.cursor >= self.offset + OPTIONS_VISIBLE {
            self.offset = self.cursor + 1 - OPTIONS_VISIBLE;
        }
    }

    fn display_value(&self) -> String {
        match self.kind {
            InputKind::Password => "•".repeat(self.text.chars().count()),
            InputKind::Checkbox => match self.flag {
                Some(true) => "[x]".into(),
                Some(false) => "[ ]".into(),
                None => "[-]".into(),
            },
            InputKind::Select => self
                .selected_index()
                .map(|i| self.options[i].label.clone())
                .unwrap_or_else(|| self.text.clone()),
            InputKind::MultiSelect => format!("{} selected", self.multi_values.len()),
            InputKind::Price if !self.text.is_empty() => format!("${}", self.text),
            _ => self.text.clone(),
        }
    }
}

impl FieldWidget for ScalarField {
    fn value(&self) -> JsonValue {
        let raw = self.raw_value();
        let op = self.op();
        if self.search_mode && op != MatchOp::Exact && !value_is_empty(&raw) {
            json!({"type": op.tag(), "value": raw})
        } else {
            raw
        }
    }

    fn set_value(&mut self, v: &JsonValue) {
        // Accept the operator-wrapped search form too.
        let mut v = v;
        if let Some(obj) = v.as_object() {
            if let (Some(t), Some(inner)) = (obj.get("type").and_then(|x| x.as_str()), obj.get("value")) {
                if let Some(op) = MatchOp::from_tag(t) {
                    if let Some(idx) = self.ops().iter().position(|o| *o == op) {
                        self.op_idx = idx;
                    }
                    v = inner;
                }
            }
        }
        match self.kind {
            InputKind::Checkbox => {
                self.flag = match v {
                    JsonValue::Bool(b) => Some(*b),
                    JsonValue::Null => None,
                    JsonValue::String(s) => Some(s == "true" || s == "1"),
                    _ => self.flag,
                };
            }
            InputKind::MultiSelect => {
                self.multi_values = match v {
                    JsonValue::Array(a) => a
                        .iter()
                        .map(|x| match x {
                            JsonValue::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    JsonValue::String(s) if !s.is_empty() => vec![s.clone()],
                    _ => Vec::new(),
                };
            }
            InputKind::TextArea => {
                let s = match v {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                };
                self.textarea = Some(TextArea::from(s.lines().map(|l| l.to_string()).collect::<Vec<_>>()));
                self.text = s;
            }
            _ => {
                self.text = match v {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Null => String::new(),
                    JsonValue::Number(n) => n.to_string(),
                    JsonValue::Bool(b) => b.to_string(),
                    other => other.to_string(),
                };
                if self.kind == InputKind::Select {
                    if let Some(i) = self.selected_index() {
                        self.cursor = i;
                    }
                }
            }
        }
    }

    fn set_error(&mut self, err: FieldError) {
        self.error = match err {
            FieldError::None => None,
            FieldError::Message(m) => Some(m),
            FieldError::Fields(map) => map
                .values()
                .find_map(|e| e.message().map(|m| m.to_string())),
        };
    }

    fn validate(&mut self) -> bool {
        if !self.validate_enabled {
            self.error = None;
            return true;
        }
        let raw = self.raw_value();
        if value_is_empty(&raw) {
            if self.required {
                self.error = Some("This field is required".into());
                return false;
            }
            self.error = None;
            return true;
        }
        if let Err(e) = self.kind_check(&raw) {
            self.error = Some(e);
            return false;
        }
        if let Err(e) = self.node.validate(&raw) {
            self.error = Some(e);
            return false;
        }
        self.error = None;
        true
    }

    fn is_editing(&self) -> bool {
        self.editing
    }

    fn height(&self) -> u16 {
        if self.kind == InputKind::Hidden {
            return 0;
        }
        let mut h = match self.kind {
            InputKind::TextArea => 1 + self.edit_lines,
            InputKind::Select | InputKind::MultiSelect if self.editing => {
                let (start, end) = self.option_window();
                1 + (end - start) as u16
            }
            _ => 1,
        };
        if self.error.is_some() {
            h += 1;
        }
        h
    }

    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        self.sync_live();
        if self.kind == InputKind::Hidden {
            return;
        }
        let cursor_on = tick % 2 == 0;
        let sel = if focused { '›' } else { ' ' };
        let req = if self.required { " *" } else { "" };
        let op_note = if self.search_mode && self.ops().len() > 1 {
            format!(" [{}]", self.op().label())
        } else {
            String::new()
        };
        let value_style = if focused && self.editing {
            crate::theme::text_editing_bold()
        } else if focused {
            crate::theme::text_active_bold()
        } else {
            Style::default()
        };
        let mut lines: Vec<Line> = Vec::new();
        if self.kind == InputKind::TextArea {
            lines.push(Line::from(Span::raw(format!(
                "{sel} {}{req}{op_note}:",
                self.label
            ))));
        } else {
            let mut val = self.display_value();
            if self.editing && cursor_on && self.kind != InputKind::Select {
                val.push('▏');
            }
            lines.push(Line::from(vec![
                Span::raw(format!("{sel} {}{req}{op_note}: ", self.label)),
                Span::styled(val, value_style),
            ]));
        }
        if self.editing && matches!(self.kind, InputKind::Select | InputKind::MultiSelect) {
            let (start, end) = self.option_window();
            for (oi, opt) in self.options.iter().enumerate().take(end).skip(start) {
                let mark = match self.kind {
                    InputKind::Select => {
                        if Some(oi) == self.selected_index() {
                            "(•)"
                        } else {
                            "( )"
                        }
                    }
                    _ => {
                        if self.multi_values.iter().any(|v| *v == opt.value) {
                            "[x]"
                        } else {
                            "[ ]"
                        }
                    }
                };
                let cur = if oi == self.cursor { '›' } else { ' ' };
                let st = if oi == self.cursor {
                    crate::theme::list_cursor_style()
                } else {
                    crate::theme::text_muted()
                };
                lines.push(Line::from(Span::styled(
                    format!("  {cur} {mark} {}", opt.label),
                    st,
                )));
            }
        }
        if let Some(err) = &self.error {
            lines.push(Line::from(Span::styled(
                format!("  ! {err}"),
                crate::theme::text_error(),
            )));
        }
        let p = Paragraph::new(lines).wrap(Wrap { trim: false });
        if self.kind == InputKind::TextArea {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(1)])
                .split(area);
            f.render_widget(p, rows[0]);
            if let Some(ta) = &self.textarea {
                f.render_widget(ta, rows[1]);
            }
        } else {
            f.render_widget(p, area);
        }
    }

    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        self.sync_live();
        let mut fx = Vec::new();
        match self.kind {
            InputKind::Hidden => {}
            InputKind::Checkbox => match key {
                KeyCode::Enter | KeyCode::Char(' ') => {
                    self.flag = if self.search_mode {
                        // tri-state in search mode: unset -> on -> off -> unset
                        match self.flag {
                            None => Some(true),
                            Some(true) => Some(false),
                            Some(false) => None,
                        }
                    } else {
                        Some(!self.flag.unwrap_or(false))
                    };
                    fx.push(self.changed());
                    if key == KeyCode::Enter {
                        fx.push(Effect::Committed);
                    }
                }
                _ => {}
            },
            InputKind::Select => match key {
                KeyCode::Enter if !self.editing => {
                    self.editing = true;
                    if let Some(i) = self.selected_index() {
                        self.cursor = i;
                    }
                }
                KeyCode::Enter => {
                    if let Some(opt) = self.options.get(self.cursor) {
                        self.text = opt.value.clone();
                    }
                    self.editing = false;
                    self.validate();
                    fx.push(self.changed());
                    fx.push(Effect::Committed);
                }
                KeyCode::Esc if self.editing => self.editing = false,
                KeyCode::Up if self.editing => self.move_cursor(false),
                KeyCode::Down if self.editing => self.move_cursor(true),
                KeyCode::Tab => {
                    if self.editing {
                        self.move_cursor(true);
                    }
                }
                _ => {}
            },
            InputKind::MultiSelect => match key {
                KeyCode::Enter if !self.editing => {
                    self.editing = true;
                    // reopening starts back at the top of the list
                    self.cursor = 0;
                    self.offset = 0;
                }
                KeyCode::Enter => {
                    self.editing = false;
                    self.validate();
                    fx.push(self.changed());
                    fx.push(Effect::Committed);
                }
                KeyCode::Esc if self.editing => self.editing = false,
                KeyCode::Up if self.editing => self.move_cursor(false),
                KeyCode::Down if self.editing => self.move_cursor(true),
                KeyCode::Char(' ') if self.editing => {
                    if let Some(opt) = self.options.get(self.cursor) {
                        if let Some(i) = self.multi_values.iter().position(|v| *v == opt.value) {
                            self.multi_values.remove(i);
                        } else {
                            self.multi_values.push(opt.value.clone());
                        }
                        fx.push(self.changed());
                    }
                }
                _ => {}
            },
            InputKind::TextArea => match key {
                KeyCode::Enter if !self.editing => self.editing = true,
                KeyCode::Esc if self.editing => {
                    self.editing = false;
                    if let Some(ta) = &self.textarea {
                        self.text = ta.lines().join("\n");
                    }
                    self.validate();
                    fx.push(self.changed());
                    fx.push(Effect::Committed);
                }
                k if self.editing => {
                    if let Some(ta) = &mut self.textarea {
                        crate::widgets::textarea_input(ta, k);
                    }
                }
                _ => {}
            },
            _ => match key {
                KeyCode::Enter if !self.editing => self.editing = true,
                KeyCode::Enter => {
                    self.editing = false;
                    self.validate();
                    fx.push(self.changed());
                    fx.push(Effect::Committed);
                }
                KeyCode::Esc if self.editing => self.editing = false,
                KeyCode::Backspace if self.editing => {
                    self.text.pop();
                }
                KeyCode::Tab if self.search_mode && self.ops().len() > 1 && !self.editing => {
                    self.op_idx = (self.op_idx + 1) % self.ops().len();
                    fx.push(self.changed());
                }
                KeyCode::Char(c) if self.editing => {
                    if self.accepts_char(c) {
                        self.text.push(c);
                    }
                }
                _ => {}
            },
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

impl Drop for ScalarField {
    fn drop(&mut self) {
        if let Some((src, id)) = self.source.take() {
            if let Ok(mut s) = src.try_borrow_mut() {
                s.untrack(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registries;
    use crate::services::bus::EventBus;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn props(yaml: &str, mode: Mode) -> FieldProps {
        let node = SchemaNode::from_yaml_str(yaml).unwrap();
        FieldProps::new(node, mode, EventBus::new(), Registries::shared())
    }

    fn field(kind: InputKind, yaml: &str, mode: Mode) -> ScalarField {
        ScalarField::with_kind(kind, props(yaml, mode)).unwrap()
    }

    #[test]
    fn resolve_tag_precedence() {
        let meta = |y: &str| {
            let n = SchemaNode::from_yaml_str(y).unwrap();
            (resolve_tag(&n, &DisplayMeta::resolve(&n)), n)
        };
        assert_eq!(meta("name: x\ntype: string").0, "text");
        assert_eq!(meta("name: x\ntype: int").0, "integer");
        assert_eq!(meta("name: x\noptions: [a, b]").0, "select");
        assert_eq!(
            meta("name: x\ntype: string\nspecial:\n  ui:\n    widget: Password").0,
            "password"
        );
        assert_eq!(meta("name: x\ntype: sparkline").0, "sparkline");
    }

    #[test]
    fn text_editing_produces_value_and_effects() {
        let mut w = field(InputKind::Text, "name: n\ntype: string", Mode::Create);
        w.on_key(KeyCode::Enter);
        assert!(w.is_editing());
        for c in "ada".chars() {
            w.on_key(KeyCode::Char(c));
        }
        w.on_key(KeyCode::Backspace);
        let fx = w.on_key(KeyCode::Enter);
        assert!(!w.is_editing());
        assert_eq!(w.value(), json!("ad"));
        assert!(fx.contains(&Effect::Committed));
        assert!(matches!(&fx[0], Effect::Changed { field, value }
            if field == "n" && *value == json!("ad")));
    }

    #[test]
    fn integer_filters_input_and_parses() {
        let mut w = field(
            InputKind::Number { integer: true },
            "name: age\ntype: int",
            Mode::Create,
        );
        w.on_key(KeyCode::Enter);
        for c in "4a2.".chars() {
            w.on_key(KeyCode::Char(c));
        }
        w.on_key(KeyCode::Enter);
        assert_eq!(w.value(), json!(42));
    }

    #[test]
    fn select_commit_emits_changed() {
        let mut w = field(InputKind::Select, "name: c\noptions: [red, blue]", Mode::Create);
        w.on_key(KeyCode::Enter);
        w.on_key(KeyCode::Down);
        let fx = w.on_key(KeyCode::Enter);
        assert_eq!(w.value(), json!("blue"));
        assert!(matches!(&fx[0], Effect::Changed { value, .. } if *value == json!("blue")));
    }

    #[test]
    fn select_keeps_value_set_before_options_arrive() {
        let mut w = field(InputKind::Select, "name: c\ntype: string", Mode::Update);
        FieldWidget::set_value(&mut w, &json!("b"));
        assert_eq!(w.value(), json!("b"));
        let src = crate::options::OptionSource::fixed(vec![
            Choice::new("a", "A"),
            Choice::new("b", "B"),
        ])
        .shared();
        w.attach_source(src);
        assert_eq!(w.value(), json!("b"));
        assert_eq!(w.display_value(), "B");
    }

    #[test]
    fn multiselect_space_toggles() {
        let mut w = field(
            InputKind::MultiSelect,
            "name: tags\noptions: [a, b, c]",
            Mode::Create,
        );
        w.on_key(KeyCode::Enter);
        w.on_key(KeyCode::Char(' '));
        w.on_key(KeyCode::Down);
        w.on_key(KeyCode::Char(' '));
        w.on_key(KeyCode::Enter);
        assert_eq!(w.value(), json!(["a", "b"]));
        w.on_key(KeyCode::Enter);
        w.on_key(KeyCode::Char(' '));
        w.on_key(KeyCode::Enter);
        assert_eq!(w.value(), json!(["b"]));
    }

    #[test]
    fn textarea_typing_commits_joined_lines() {
        let mut w = field(InputKind::TextArea, "name: note\ntype: textarea", Mode::Create);
        w.on_key(KeyCode::Enter);
        for c in "ab".chars() {
            w.on_key(KeyCode::Char(c));
        }
        w.on_key(KeyCode::Enter);
        w.on_key(KeyCode::Char('c'));
        let fx = w.on_key(KeyCode::Esc);
        assert!(fx.contains(&Effect::Committed));
        assert_eq!(w.value(), json!("ab\nc"));
    }

    #[test]
    fn search_operator_wraps_value() {
        let mut w = field(InputKind::Text, "name: n\ntype: string", Mode::Search);
        w.on_key(KeyCode::Tab);
        w.on_key(KeyCode::Enter);
        w.on_key(KeyCode::Char('a'));
        w.on_key(KeyCode::Enter);
        assert_eq!(w.value(), json!({"type": "startswith", "value": "a"}));
        // round-trips through set_value
        let v = w.value();
        let mut w2 = field(InputKind::Text, "name: n\ntype: string", Mode::Search);
        FieldWidget::set_value(&mut w2, &v);
        assert_eq!(w2.value(), v);
    }

    #[test]
    fn search_empty_value_stays_unwrapped() {
        let mut w = field(InputKind::Text, "name: n\ntype: string", Mode::Search);
        w.on_key(KeyCode::Tab);
        assert_eq!(w.value(), json!(""));
    }

    #[test]
    fn checkbox_tristate_in_search_mode() {
        let mut w = field(InputKind::Checkbox, "name: on\ntype: bool", Mode::Search);
        assert_eq!(w.value(), JsonValue::Null);
        w.on_key(KeyCode::Char(' '));
        assert_eq!(w.value(), json!(true));
        w.on_key(KeyCode::Char(' '));
        assert_eq!(w.value(), json!(false));
        w.on_key(KeyCode::Char(' '));
        assert_eq!(w.value(), JsonValue::Null);
    }

    #[test]
    fn required_validation_sets_inline_error() {
        let mut w = field(
            InputKind::Text,
            "name: n\ntype: string\nrequired: true",
            Mode::Create,
        );
        assert!(!FieldWidget::validate(&mut w));
        assert!(w.error.is_some());
        FieldWidget::set_value(&mut w, &json!("x"));
        assert!(FieldWidget::validate(&mut w));
        assert!(w.error.is_none());
    }

    #[test]
    fn search_mode_skips_validation() {
        let mut w = field(
            InputKind::Text,
            "name: n\ntype: string\nrequired: true",
            Mode::Search,
        );
        assert!(FieldWidget::validate(&mut w));
    }

    #[test]
    fn date_kind_checks_format() {
        let mut w = field(InputKind::Date, "name: d\ntype: string", Mode::Create);
        FieldWidget::set_value(&mut w, &json!("2024-13-01"));
        assert!(!FieldWidget::validate(&mut w));
        FieldWidget::set_value(&mut w, &json!("2024-02-29"));
        assert!(FieldWidget::validate(&mut w));
    }

    #[test]
    fn hidden_takes_no_space() {
        let w = field(InputKind::Hidden, "name: h\ntype: hidden", Mode::Create);
        assert_eq!(w.height(), 0);
    }

    #[test]
    fn render_shows_label_and_error() {
        let mut w = field(
            InputKind::Text,
            "name: city\ntype: string\nrequired: true",
            Mode::Create,
        );
        FieldWidget::validate(&mut w);
        let backend = TestBackend::new(40, 4);
        let mut term = Terminal::new(backend).unwrap();
        term.draw(|f| {
            let area = f.area();
            w.render(f, area, true, 0);
        })
        .unwrap();
        let text = format!("{:?}", term.backend().buffer());
        assert!(text.contains("City"));
        assert!(text.contains("required"));
    }
}
