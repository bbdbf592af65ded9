use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

type SubFn = Box<dyn FnMut(&JsonValue)>;

struct Inner {
    slots: serde_json::Map<String, JsonValue>,
    subs: HashMap<String, Vec<(u64, SubFn)>>,
    // Ids unsubscribed while detached for notification.
    dead: Vec<(String, u64)>,
    next_id: u64,
    path: Option<PathBuf>,
}

impl Inner {
    fn persist(&self) {
        if let Some(path) = &self.path {
            if let Ok(text) = serde_json::to_string_pretty(&self.slots) {
                let _ = std::fs::write(path, text);
            }
        }
    }
}

/// Keyed, observable state store, the shareable URL-fragment analog.
/// Writing a slot notifies its subscribers; with a backing file the
/// slots survive across sessions (restored on construction), which is
/// what makes searches and page sizes replayable.
#[derive(Clone)]
pub struct FragmentStore {
    inner: Rc<RefCell<Inner>>,
}

impl FragmentStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slots: serde_json::Map::new(),
                subs: HashMap::new(),
                dead: Vec::new(),
                next_id: 1,
                path: None,
            })),
        }
    }

    pub fn file_backed(path: PathBuf) -> Self {
        let slots = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<JsonValue>(&s).ok())
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slots,
                subs: HashMap::new(),
                dead: Vec::new(),
                next_id: 1,
                path: Some(path),
            })),
        }
    }

    /// File-backed under CRUD_TUI_STATE when set, in-memory otherwise.
    pub fn from_env() -> Self {
        match std::env::var("CRUD_TUI_STATE") {
            Ok(p) if !p.is_empty() => Self::file_backed(PathBuf::from(p)),
            _ => Self::in_memory(),
        }
    }

    pub fn get(&self, slot: &str, default: JsonValue) -> JsonValue {
        self.inner
            .borrow()
            .slots
            .get(slot)
            .cloned()
            .unwrap_or(default)
    }

    /// Store a value and notify the slot's subscribers. The notification
    /// is the state-propagation mechanism: a restored or externally
    /// written slot replays through the same path as a local write.
    pub fn set(&self, slot: &str, v: JsonValue) {
        // Callbacks may touch the store again, so run them with the
        // borrow released.
        let mut subs = {
            let mut inner = self.inner.borrow_mut();
            inner.slots.insert(slot.to_string(), v.clone());
            inner.persist();
            inner.subs.remove(slot).unwrap_or_default()
        };
        for (_, cb) in subs.iter_mut() {
            cb(&v);
        }
        let mut inner = self.inner.borrow_mut();
        let dead = std::mem::take(&mut inner.dead);
        let slot_subs = inner.subs.entry(slot.to_string()).or_default();
        let added = std::mem::take(slot_subs);
        *slot_subs = subs;
        slot_subs.extend(added);
        // A callback may have unsubscribed itself while detached.
        slot_subs.retain(|(id, _)| !dead.iter().any(|(s, d)| s == slot && d == id));
    }

    pub fn subscribe(&self, slot: &str, cb: SubFn) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subs.entry(slot.to_string()).or_default().push((id, cb));
        id
    }

    pub fn unsubscribe(&self, slot: &str, id: u64) {
        let mut inner = self.inner.borrow_mut();
        if let Some(list) = inner.subs.get_mut(slot) {
            list.retain(|(sid, _)| *sid != id);
        }
        inner.dead.push((slot.to_string(), id));
    }
}
