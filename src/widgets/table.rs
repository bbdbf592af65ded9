use crate::controllers::form::{FormController, FormOutcome};
use crate::options::SharedOptions;
use crate::registry::Registries;
use crate::schema::{DisplayMeta, Mode, SchemaNode};
use crate::services::backend::Backend;
use crate::services::bus::EventBus;
use crate::services::fragment::FragmentStore;
use crate::widgets::chrome::panel_block;
use crate::widgets::{Effect, FieldWidget};
use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::prelude::*;
use ratatui::widgets::{Cell, Paragraph, Row, Table, TableState};
use serde_json::{json, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Page size steps; 0 renders as "All".
pub const PAGE_SIZES: &[usize] = &[10, 25, 100, 0];

pub type CellRenderer = Box<dyn Fn(&JsonValue) -> String>;

pub enum ActionKind {
    /// Run with the selected row.
    Callback(Box<dyn FnMut(&JsonValue)>),
    /// Produce a target the user gets on the clipboard.
    Link(Box<dyn Fn(&JsonValue) -> String>),
    /// Build a widget expanded under the selected row.
    Component(Box<dyn FnMut(&JsonValue) -> Result<Box<dyn FieldWidget>>>),
}

pub struct TableAction {
    pub key: char,
    pub label: String,
    pub kind: ActionKind,
}

/// Search-result table: sortable columns, page-size cycling persisted in
/// the fragment store, a computed totals row, and per-row affordances
/// (copy key, inline edit, two-step delete, custom actions, CSV export).
pub struct ResultsTable {
    schema: SchemaNode,
    service: String,
    noun: String,
    columns: Vec<String>,
    titles: Vec<String>,
    rows: Vec<JsonValue>,
    sort_col: Option<usize>,
    sort_desc: bool,
    last_desc: bool,
    col_cursor: usize,
    cursor: usize,
    page: usize,
    page_size_idx: usize,
    totals: Vec<String>,
    renderers: HashMap<String, CellRenderer>,
    option_sources: HashMap<String, SharedOptions>,
    actions: Vec<TableAction>,
    confirm: Option<JsonValue>,
    pub on_delete: Option<Box<dyn FnMut(&JsonValue)>>,
    editor: Option<(usize, FormController)>,
    expanded: Option<(usize, Box<dyn FieldWidget>)>,
    export_dir: PathBuf,
    backend: Rc<dyn Backend>,
    store: FragmentStore,
    bus: EventBus,
    registries: Rc<Registries>,
}

fn cmp_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        (JsonValue::Null, _) => Ordering::Less,
        (_, JsonValue::Null) => Ordering::Greater,
        _ => {
            let xs = a.as_str().map(|s| s.to_string()).unwrap_or_else(|| a.to_string());
            let ys = b.as_str().map(|s| s.to_string()).unwrap_or_else(|| b.to_string());
            xs.cmp(&ys)
        }
    }
}

fn numeric(v: &JsonValue) -> Option<f64> {
    match v {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ResultsTable {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: SchemaNode,
        service: &str,
        noun: &str,
        backend: Rc<dyn Backend>,
        store: FragmentStore,
        bus: EventBus,
        registries: Rc<Registries>,
    ) -> Self {
        let meta = DisplayMeta::resolve(&schema);
        let columns: Vec<String> = meta
            .results
            .clone()
            .or_else(|| meta.order.clone())
            .unwrap_or_else(|| schema.keys().iter().map(|s| s.to_string()).collect());
        let size_slot = format!("{noun}.page_size");
        let stored = store.get(&size_slot, JsonValue::Null).as_u64();
        let page_size_idx = stored
            .and_then(|n| PAGE_SIZES.iter().position(|s| *s as u64 == n))
            .unwrap_or(0);
        let mut t = Self {
            titles: Vec::new(),
            schema,
            service: service.to_string(),
            noun: noun.to_string(),
            columns,
            rows: Vec::new(),
            sort_col: None,
            sort_desc: false,
            last_desc: false,
            col_cursor: 0,
            cursor: 0,
            page: 0,
            page_size_idx,
            totals: Vec::new(),
            renderers: HashMap::new(),
            option_sources: HashMap::new(),
            actions: Vec::new(),
            confirm: None,
            on_delete: None,
            editor: None,
            expanded: None,
            export_dir: std::env::temp_dir(),
            backend,
            store,
            bus,
            registries,
        };
        t.refresh_titles();
        t
    }

    fn refresh_titles(&mut self) {
        self.titles = self
            .columns
            .iter()
            .map(|c| match self.schema.get(c) {
                Some(node) => DisplayMeta::resolve(node).title,
                None => crate::schema::title_case(c),
            })
            .collect();
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
        self.col_cursor = 0;
        self.sort_col = None;
        self.refresh_titles();
        self.recompute_totals();
    }

    pub fn set_export_dir(&mut self, dir: PathBuf) {
        self.export_dir = dir;
    }

    pub fn set_renderer(&mut self, field: &str, r: CellRenderer) {
        self.renderers.insert(field.to_string(), r);
    }

    /// Resolve a column's values through a live option source; its
    /// current snapshot supplies the labels.
    pub fn attach_options(&mut self, field: &str, src: SharedOptions) {
        self.option_sources.insert(field.to_string(), src);
    }

    pub fn add_action(&mut self, action: TableAction) {
        self.actions.push(action);
    }

    pub fn set_rows(&mut self, rows: Vec<JsonValue>) {
        self.rows = rows;
        self.cursor = 0;
        self.page = 0;
        self.confirm = None;
        self.expanded = None;
        self.recompute_totals();
    }

    pub fn rows(&self) -> &[JsonValue] {
        &self.rows
    }

    pub fn page_size(&self) -> usize {
        PAGE_SIZES[self.page_size_idx]
    }

    pub fn cycle_page_size(&mut self) {
        self.page_size_idx = (self.page_size_idx + 1) % PAGE_SIZES.len();
        self.page = 0;
        self.store.set(
            &format!("{}.page_size", self.noun),
            json!(self.page_size()),
        );
    }

    /// Flip direction on the active column; a new column starts at the
    /// direction the table was last sorted in.
    pub fn toggle_sort(&mut self, col: usize) {
        if col >= self.columns.len() {
            return;
        }
        if self.sort_col == Some(col) {
            self.sort_desc = !self.sort_desc;
            self.last_desc = self.sort_desc;
        } else {
            self.sort_col = Some(col);
            self.sort_desc = self.last_desc;
        }
    }

    /// Row indices in display order.
    fn view(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.rows.len()).collect();
        if let Some(col) = self.sort_col {
            let name = &self.columns[col];
            idx.sort_by(|&a, &b| {
                let va = self.rows[a].get(name).unwrap_or(&JsonValue::Null);
                let vb = self.rows[b].get(name).unwrap_or(&JsonValue::Null);
                let ord = cmp_values(va, vb);
                if self.sort_desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        idx
    }

    fn page_of(&self, view_len: usize) -> (usize, usize) {
        let size = self.page_size();
        if size == 0 {
            return (0, view_len);
        }
        let start = (self.page * size).min(view_len);
        (start, (start + size).min(view_len))
    }

    fn page_count(&self) -> usize {
        let size = self.page_size();
        if size == 0 || self.rows.is_empty() {
            1
        } else {
            self.rows.len().div_ceil(size)
        }
    }

    pub fn cell_text(&self, col: &str, row: &JsonValue) -> String {
        let v = row.get(col).unwrap_or(&JsonValue::Null);
        if let Some(r) = self.renderers.get(col) {
            return r(v);
        }
        if let (Some(src), Some(s)) = (self.option_sources.get(col), v.as_str()) {
            if let Some(c) = src.borrow().data().iter().find(|c| c.value == s) {
                return c.label.clone();
            }
        }
        let node = self.schema.get(col);
        if let (Some(n), Some(s)) = (node, v.as_str()) {
            if let Some(opts) = &n.options {
                if let Some(c) = opts.iter().find(|c| c.value == s) {
                    return c.label.clone();
                }
            }
        }
        let type_tag = node.map(|n| n.type_tag.as_str()).unwrap_or("");
        match v {
            JsonValue::Null => String::new(),
            JsonValue::Bool(true) => "True".into(),
            JsonValue::Bool(false) => "False".into(),
            JsonValue::Number(n) => match type_tag {
                "price" => format!("${:.2}", n.as_f64().unwrap_or(0.0)),
                "datetime" | "timestamp" => chrono::DateTime::from_timestamp(
                    n.as_i64().unwrap_or(0),
                    0,
                )
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| n.to_string()),
                _ => n.to_string(),
            },
            JsonValue::String(s) => match s.split_once('\n') {
                Some((first, _)) => format!("{first} …"),
                None => s.clone(),
            },
            other => other.to_string(),
        }
    }

    /// Column totals: sums for numeric kinds (price as currency), an
    /// average for elapsed, blank otherwise and blank with no rows.
    pub fn recompute_totals(&mut self) {
        self.totals = self
            .columns
            .iter()
            .map(|col| {
                if self.rows.is_empty() {
                    return String::new();
                }
                let tag = self
                    .schema
                    .get(col)
                    .map(|n| n.type_tag.as_str())
                    .unwrap_or("");
                let nums: Vec<f64> = self
                    .rows
                    .iter()
                    .filter_map(|r| r.get(col).and_then(numeric))
                    .collect();
                match tag {
                    "price" => format!("${:.2}", nums.iter().sum::<f64>()),
                    "int" | "integer" => format!("{}", nums.iter().sum::<f64>() as i64),
                    "number" | "float" | "decimal" => format!("{}", nums.iter().sum::<f64>()),
                    "elapsed" => {
                        if nums.is_empty() {
                            String::new()
                        } else {
                            format!("{:.1}", nums.iter().sum::<f64>() / nums.len() as f64)
                        }
                    }
                    _ => String::new(),
                }
            })
            .collect();
    }

    pub fn totals(&self) -> &[String] {
        &self.totals
    }

    fn pk_of(&self, row: &JsonValue) -> Option<JsonValue> {
        row.get(&self.schema.key).cloned()
    }

    fn selected_row_index(&self) -> Option<usize> {
        let view = self.view();
        let (start, end) = self.page_of(view.len());
        view.get(start + self.cursor).copied().filter(|_| start + self.cursor < end)
    }

    pub fn export(&mut self) {
        if self.rows.is_empty() {
            self.bus.error("No rows to export");
            return;
        }
        let view = self.view();
        let data: Vec<Vec<String>> = view
            .iter()
            .map(|&i| {
                self.columns
                    .iter()
                    .map(|c| self.cell_text(c, &self.rows[i]))
                    .collect()
            })
            .collect();
        let name = if self.schema.name.is_empty() {
            self.noun.clone()
        } else {
            self.schema.name.clone()
        };
        match crate::export::export_file(&self.export_dir, &name, &self.titles, &data) {
            Ok(path) => self.bus.success(format!("Exported {}", path.display())),
            Err(e) => self.bus.error(format!("Export failed: {e}")),
        }
    }

    fn delete_selected(&mut self) {
        let Some(i) = self.selected_row_index() else {
            return;
        };
        let Some(pk) = self.pk_of(&self.rows[i]) else {
            self.bus.error("Row has no key");
            return;
        };
        match self.confirm.take() {
            Some(pending) if pending == pk => {
                let payload = json!({ self.schema.key.clone(): pk.clone() });
                match self.backend.delete(&self.service, &self.noun, &payload) {
                    Ok(env) => {
                        if let Some(err) = env.error {
                            self.bus.error(format!("Delete failed ({})", err.code));
                            return;
                        }
                        self.rows.remove(i);
                        if self.cursor > 0 {
                            self.cursor -= 1;
                        }
                        self.recompute_totals();
                        self.bus.success("Deleted");
                        if let Some(cb) = &mut self.on_delete {
                            cb(&pk);
                        }
                    }
                    Err(e) => self.bus.error(format!("Delete failed: {e}")),
                }
            }
            _ => self.confirm = Some(pk),
        }
    }

    fn edit_selected(&mut self) {
        let Some(i) = self.selected_row_index() else {
            return;
        };
        if self.pk_of(&self.rows[i]).is_none() {
            self.bus.error("Row has no key");
            return;
        }
        match FormController::new(
            self.schema.clone(),
            Mode::Update,
            Some(self.rows[i].clone()),
            &self.service,
            &self.noun,
            self.backend.clone(),
            self.bus.clone(),
            self.registries.clone(),
        ) {
            Ok(form) => self.editor = Some((i, form)),
            Err(e) => self.bus.error(format!("Cannot edit: {e}")),
        }
    }

    fn run_action(&mut self, key: char) -> Vec<Effect> {
        let Some(i) = self.selected_row_index() else {
            return Vec::new();
        };
        let row = self.rows[i].clone();
        let mut fx = Vec::new();
        let mut expand: Option<Box<dyn FieldWidget>> = None;
        for action in &mut self.actions {
            if action.key != key {
                continue;
            }
            match &mut action.kind {
                ActionKind::Callback(f) => f(&row),
                ActionKind::Link(f) => {
                    fx.push(Effect::Copy(f(&row)));
                    self.bus.success(format!("{} copied", action.label));
                }
                ActionKind::Component(f) => match f(&row) {
                    Ok(w) => expand = Some(w),
                    Err(e) => self.bus.error(format!("{}: {e}", action.label)),
                },
            }
        }
        if let Some(w) = expand {
            self.expanded = Some((i, w));
        }
        fx
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some() || self.expanded.is_some()
    }

    pub fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        if let Some((i, form)) = &mut self.editor {
            let fx = form.on_key(key);
            if let Some(outcome) = form.take_outcome() {
                let i = *i;
                match outcome {
                    FormOutcome::Saved(merged) => {
                        self.rows[i] = merged;
                        self.recompute_totals();
                    }
                    FormOutcome::Cancelled => {}
                }
                self.editor = None;
            }
            return fx;
        }
        if let Some((_, w)) = &mut self.expanded {
            if key == KeyCode::Esc {
                self.expanded = None;
            } else {
                return w.on_key(key);
            }
            return Vec::new();
        }
        if key != KeyCode::Char('d') {
            self.confirm = None;
        }
        match key {
            KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down => {
                let view_len = self.view().len();
                let (start, end) = self.page_of(view_len);
                if start + self.cursor + 1 < end {
                    self.cursor += 1;
                }
            }
            KeyCode::Left => self.col_cursor = self.col_cursor.saturating_sub(1),
            KeyCode::Right => {
                if self.col_cursor + 1 < self.columns.len() {
                    self.col_cursor += 1;
                }
            }
            KeyCode::Char('s') => self.toggle_sort(self.col_cursor),
            KeyCode::Char('p') => self.cycle_page_size(),
            KeyCode::PageDown | KeyCode::Char(']') => {
                if self.page + 1 < self.page_count() {
                    self.page += 1;
                    self.cursor = 0;
                }
            }
            KeyCode::PageUp | KeyCode::Char('[') => {
                if self.page > 0 {
                    self.page -= 1;
                    self.cursor = 0;
                }
            }
            KeyCode::Char('y') => {
                if let Some(i) = self.selected_row_index() {
                    match self.pk_of(&self.rows[i]) {
                        Some(pk) => {
                            let text = pk.as_str().map(|s| s.to_string()).unwrap_or_else(|| pk.to_string());
                            return vec![Effect::Copy(text)];
                        }
                        None => self.bus.error("Row has no key"),
                    }
                }
            }
            KeyCode::Char('d') => self.delete_selected(),
            KeyCode::Char('e') => self.edit_selected(),
            KeyCode::Char('x') => self.export(),
            KeyCode::Char(c) => return self.run_action(c),
            _ => {}
        }
        Vec::new()
    }

    pub fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64) {
        if let Some((_, form)) = &mut self.editor {
            let block = panel_block("Edit record", focused);
            let inner = block.inner(area);
            f.render_widget(block, area);
            form.render(f, inner, focused, tick);
            return;
        }
        let title = format!("{} ({} rows)", crate::schema::title_case(&self.noun), self.rows.len());
        let block = panel_block(&title, focused);
        let inner = block.inner(area);
        f.render_widget(block, area);
        let expanded_h = self.expanded.as_ref().map(|(_, w)| w.height()).unwrap_or(0);
        let rows_area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(expanded_h),
                Constraint::Length(1),
            ])
            .split(inner);
        let view = self.view();
        let (start, end) = self.page_of(view.len());
        let header = Row::new(self.titles.iter().enumerate().map(|(i, t)| {
            let marker = if self.sort_col == Some(i) {
                if self.sort_desc {
                    " ▼"
                } else {
                    " ▲"
                }
            } else {
                ""
            };
            let style = if i == self.col_cursor {
                crate::theme::header_style()
            } else {
                crate::theme::text_muted()
            };
            Cell::from(format!("{t}{marker}")).style(style)
        }));
        let body: Vec<Row> = view[start..end]
            .iter()
            .map(|&ri| {
                Row::new(
                    self.columns
                        .iter()
                        .map(|c| Cell::from(self.cell_text(c, &self.rows[ri]))),
                )
            })
            .collect();
        let widths: Vec<Constraint> = self
            .columns
            .iter()
            .map(|_| Constraint::Ratio(1, self.columns.len().max(1) as u32))
            .collect();
        let table = Table::new(body, widths)
            .header(header)
            .footer(Row::new(self.totals.iter().map(|t| Cell::from(t.as_str()))).style(crate::theme::text_muted()))
            .row_highlight_style(crate::theme::list_cursor_style());
        let mut state = TableState::default();
        state.select(if end > start { Some(self.cursor) } else { None });
        f.render_stateful_widget(table, rows_area[0], &mut state);
        if let Some((_, w)) = &mut self.expanded {
            w.render(f, rows_area[1], focused, tick);
        }
        let size_label = match self.page_size() {
            0 => "All".to_string(),
            n => n.to_string(),
        };
        let status = match &self.confirm {
            Some(_) => "d again to confirm delete, any other key cancels".to_string(),
            None => {
                let legend: String = self
                    .actions
                    .iter()
                    .map(|a| format!("  {}:{}", a.key, a.label))
                    .collect();
                format!(
                    "page {}/{}  size {size_label}  s:sort p:size y:copy e:edit d:delete x:csv{legend}",
                    self.page + 1,
                    self.page_count()
                )
            }
        };
        f.render_widget(
            Paragraph::new(Line::from(Span::styled(status, crate::theme::text_muted()))),
            rows_area[2],
        );
    }
}
