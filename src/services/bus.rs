use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Warning,
    Success,
}

#[derive(Clone, Debug)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// Fire-and-forget notice queue. Widgets and controllers trigger
/// notices; the UI loop drains them into toasts.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<VecDeque<Notice>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, level: NoticeLevel, text: impl Into<String>) {
        self.inner.borrow_mut().push_back(Notice {
            level,
            text: text.into(),
        });
    }

    pub fn error(&self, text: impl Into<String>) {
        self.trigger(NoticeLevel::Error, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.trigger(NoticeLevel::Warning, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.trigger(NoticeLevel::Success, text);
    }

    pub fn drain(&self) -> Vec<Notice> {
        self.inner.borrow_mut().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_trigger_order() {
        let bus = EventBus::new();
        bus.error("first");
        bus.success("second");
        let out = bus.drain();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].level, NoticeLevel::Error);
        assert_eq!(out[1].text, "second");
        assert!(bus.drain().is_empty());
    }
}
