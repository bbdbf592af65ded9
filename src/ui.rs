use crate::controllers::form::{FormController, FormOutcome};
use crate::controllers::search::SearchController;
use crate::registry::Registries;
use crate::schema::{Mode, SchemaNode};
use crate::services::backend::CliBackend;
use crate::services::bus::{EventBus, Notice};
use crate::services::fragment::FragmentStore;
use crate::services::{backend::Backend, clipboard};
use crate::theme::Theme;
use crate::widgets::table::ResultsTable;
use crate::widgets::Effect;
use anyhow::{Context, Result};
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Paragraph};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One record screen, loaded from YAML.
#[derive(Debug, Deserialize)]
pub struct ScreenConfig {
    #[serde(default)]
    pub title: Option<String>,
    pub service: String,
    pub noun: String,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    pub schema: SchemaNode,
}

impl ScreenConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Screen {
    Search,
    Results,
    Create,
}

struct Toast {
    text: String,
    level: crate::services::bus::NoticeLevel,
    expires_at_tick: u64,
}

const TOAST_TICKS: u64 = 15;

struct AppState {
    config: ScreenConfig,
    theme: Theme,
    bus: EventBus,
    backend: Rc<dyn Backend>,
    registries: Rc<Registries>,
    search: SearchController,
    table: ResultsTable,
    form: Option<FormController>,
    screen: Screen,
    tick: u64,
    toast: Option<Toast>,
}

impl AppState {
    fn editing(&self) -> bool {
        match self.screen {
            Screen::Search => self.search.is_editing(),
            Screen::Results => self.table.is_editing(),
            Screen::Create => self.form.as_ref().map(|f| f.is_editing()).unwrap_or(false),
        }
    }

    fn open_form(&mut self) {
        match FormController::new(
            self.config.schema.clone(),
            Mode::Create,
            None,
            &self.config.service,
            &self.config.noun,
            self.backend.clone(),
            self.bus.clone(),
            self.registries.clone(),
        ) {
            Ok(form) => {
                self.form = Some(form);
                self.screen = Screen::Create;
            }
            Err(e) => self.bus.error(format!("Cannot open form: {e}")),
        }
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for eff in effects {
            if let Effect::Copy(text) = eff {
                match clipboard::copy(&text) {
                    Ok(()) => self.bus.success("Copied"),
                    Err(e) => self.bus.error(format!("Clipboard: {e}")),
                }
            }
        }
    }

    fn pump(&mut self) {
        self.search.pump();
        if let Some(rows) = self.search.take_results() {
            self.table.set_rows(rows);
            self.screen = Screen::Results;
        }
        if let Some(form) = &mut self.form {
            if let Some(outcome) = form.take_outcome() {
                if matches!(outcome, FormOutcome::Saved(_)) {
                    self.screen = Screen::Search;
                }
                self.form = None;
            }
        }
        for Notice { level, text } in self.bus.drain() {
            self.toast = Some(Toast {
                text,
                level,
                expires_at_tick: self.tick + TOAST_TICKS,
            });
        }
    }
}

/// Run the demo application for one screen config.
pub fn run(path: &Path) -> Result<()> {
    let config = ScreenConfig::from_path(path)?;
    let bus = EventBus::new();
    let store = FragmentStore::from_env();
    let registries = Registries::shared();
    let backend: Rc<dyn Backend> = Rc::new(CliBackend);
    let slot = config
        .slot
        .clone()
        .unwrap_or_else(|| format!("{}.search", config.noun));
    let search = SearchController::new(
        config.schema.clone(),
        &slot,
        &config.service,
        &config.noun,
        backend.clone(),
        bus.clone(),
        store.clone(),
        registries.clone(),
    )?;
    let mut table = ResultsTable::new(
        config.schema.clone(),
        &config.service,
        &config.noun,
        backend.clone(),
        store,
        bus.clone(),
        registries.clone(),
    );
    if let Some(dir) = &config.export_dir {
        table.set_export_dir(dir.clone());
    }
    let mut state = AppState {
        config,
        theme: Theme::default(),
        bus,
        backend,
        registries,
        search,
        table,
        form: None,
        screen: Screen::Search,
        tick: 0,
        toast: None,
    };

    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    // The terminal is restored whatever the loop returns.
    let res = run_loop(&mut terminal, &mut state);
    disable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    res
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
) -> Result<()> {
    let tick_rate = Duration::from_millis(200);
    let mut last_tick = Instant::now();
    loop {
        state.pump();
        terminal.draw(|f| ui(f, state))?;
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                let editing = state.editing();
                match key.code {
                    KeyCode::Char('q') if !editing => return Ok(()),
                    KeyCode::F(1) => state.screen = Screen::Search,
                    KeyCode::F(2) => state.screen = Screen::Results,
                    KeyCode::F(3) => state.open_form(),
                    code => {
                        let effects = match state.screen {
                            Screen::Search => state.search.on_key(code),
                            Screen::Results => state.table.on_key(code),
                            Screen::Create => match &mut state.form {
                                Some(form) => form.on_key(code),
                                None => Vec::new(),
                            },
                        };
                        state.run_effects(effects);
                    }
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            state.tick = state.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }
}

fn ui(f: &mut Frame, state: &mut AppState) {
    if let Some(t) = &state.toast {
        if state.tick >= t.expires_at_tick {
            state.toast = None;
        }
    }
    let screen = f.area();
    let bg = Block::default().style(Style::default().bg(state.theme.bg));
    f.render_widget(bg, screen);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(screen);

    let title = state
        .config
        .title
        .clone()
        .unwrap_or_else(|| crate::schema::title_case(&state.config.noun));
    let tab = |name: &str, active: bool| {
        if active {
            Span::styled(format!(" {name} "), state.theme.list_cursor_style())
        } else {
            Span::styled(format!(" {name} "), state.theme.text_muted())
        }
    };
    let header = Line::from(vec![
        Span::styled(format!("{title}  "), state.theme.header_style()),
        tab("F1 Search", state.screen == Screen::Search),
        tab("F2 Results", state.screen == Screen::Results),
        tab("F3 New", state.screen == Screen::Create),
    ]);
    f.render_widget(Paragraph::new(header), rows[0]);

    match state.screen {
        Screen::Search => state.search.render(f, rows[1], true, state.tick),
        Screen::Results => state.table.render(f, rows[1], true, state.tick),
        Screen::Create => {
            if let Some(form) = &mut state.form {
                form.render(f, rows[1], true, state.tick);
            }
        }
    }

    let footer = match &state.toast {
        Some(t) => Line::from(Span::styled(
            t.text.clone(),
            Style::default().fg(state.theme.toast_color(t.level)),
        )),
        None => Line::from(Span::styled(
            "q quit  F1/F2/F3 screens  Enter edit field",
            state.theme.text_muted(),
        )),
    };
    f.render_widget(Paragraph::new(footer), rows[2]);
}
