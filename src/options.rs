use crate::schema::Choice;
use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Subscriber = Box<dyn FnMut(&[Choice])>;
pub type Fetcher = Box<dyn FnMut() -> Result<Vec<Choice>>>;
pub type SharedOptions = Rc<RefCell<OptionSource>>;

enum SourceKind {
    Static,
    Keyed {
        table: HashMap<String, Vec<Choice>>,
    },
    Remote {
        fetcher: Fetcher,
        fetched: bool,
    },
}

/// Observable provider of a selectable-option list. One instance per
/// schema setup; option-driven widgets `track` it for live updates and
/// must `untrack` on teardown.
pub struct OptionSource {
    kind: SourceKind,
    data: Vec<Choice>,
    subs: Vec<(u64, Subscriber)>,
    next_id: u64,
}

impl OptionSource {
    pub fn fixed(data: Vec<Choice>) -> Self {
        Self {
            kind: SourceKind::Static,
            data,
            subs: Vec::new(),
            next_id: 1,
        }
    }

    pub fn keyed(table: HashMap<String, Vec<Choice>>) -> Self {
        Self {
            kind: SourceKind::Keyed { table },
            data: Vec::new(),
            subs: Vec::new(),
            next_id: 1,
        }
    }

    pub fn remote(fetcher: Fetcher) -> Self {
        Self {
            kind: SourceKind::Remote {
                fetcher,
                fetched: false,
            },
            data: Vec::new(),
            subs: Vec::new(),
            next_id: 1,
        }
    }

    /// Remote source backed by a command producing an option envelope.
    pub fn remote_cmd(cmdline: String, unwrap: Option<String>) -> Self {
        Self::remote(Box::new(move || {
            crate::services::backend::fetch_options(&cmdline, unwrap.as_deref())
        }))
    }

    pub fn shared(self) -> SharedOptions {
        Rc::new(RefCell::new(self))
    }

    pub fn data(&self) -> &[Choice] {
        &self.data
    }

    /// Register a subscriber and return its id plus the current data
    /// synchronously. The first track on a remote source performs the
    /// one and only fetch; the flag is set before the request starts so
    /// a re-entrant track cannot trigger a second one.
    pub fn track(&mut self, cb: Subscriber) -> (u64, Vec<Choice>) {
        if let SourceKind::Remote { fetcher, fetched } = &mut self.kind {
            if !*fetched {
                *fetched = true;
                if let Ok(data) = fetcher() {
                    self.data = data;
                }
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.subs.push((id, cb));
        (id, self.data.clone())
    }

    pub fn untrack(&mut self, id: u64) {
        self.subs.retain(|(sid, _)| *sid != id);
    }

    /// Swap the active option set of a keyed source and notify. Unknown
    /// keys resolve to an empty list.
    pub fn select_key(&mut self, key: &str) {
        if let SourceKind::Keyed { table } = &self.kind {
            self.data = table.get(key).cloned().unwrap_or_default();
            self.notify();
        }
    }

    pub fn set_data(&mut self, data: Vec<Choice>) {
        self.data = data;
        self.notify();
    }

    fn notify(&mut self) {
        let data = self.data.clone();
        for (_, cb) in self.subs.iter_mut() {
            cb(&data);
        }
    }
}
