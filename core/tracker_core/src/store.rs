use crate::{
    blob::BlobStore,
    event::{Category, EventRecord, EventType, Phase},
    status,
};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

pub const KEY_HISTORY: &str = "history";
pub const KEY_UNDO_BUFFER: &str = "undo_buffer";
pub const DEFAULT_MAX_HISTORY: usize = 400;

type Hook = Box<dyn FnMut() + Send>;

/// The event log: committed history plus the records undone from it.
///
/// Every mutation is written through to the blob store before returning. If the
/// write fails the in-memory state still reflects the mutation and the error is
/// returned so the caller can surface it.
pub struct EventLog<S: BlobStore> {
    blobs: S,
    history: Vec<EventRecord>,
    // Front is the most recently undone record.
    undo_buffer: VecDeque<EventRecord>,
    max_history: usize,
    on_refresh: Option<Hook>,
    on_reload: Option<Hook>,
}

impl<S: BlobStore> EventLog<S> {
    /// Loads both sequences. Missing or unreadable blobs start empty.
    pub fn load(mut blobs: S, max_history: usize) -> Self {
        let history = load_records(&mut blobs, KEY_HISTORY);
        let undo_buffer = load_records(&mut blobs, KEY_UNDO_BUFFER).into();
        let mut log = Self {
            blobs,
            history,
            undo_buffer,
            max_history: max_history.max(1),
            on_refresh: None,
            on_reload: None,
        };
        log.truncate_history();
        info!(
            history = log.history.len(),
            undo_buffer = log.undo_buffer.len(),
            "event log loaded"
        );
        log
    }

    pub fn set_refresh_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_refresh = Some(Box::new(hook));
    }

    pub fn set_reload_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.on_reload = Some(Box::new(hook));
    }

    pub fn history(&self) -> &[EventRecord] {
        &self.history
    }

    pub fn undo_buffer(&self) -> impl Iterator<Item = &EventRecord> {
        self.undo_buffer.iter()
    }

    pub fn blobs_mut(&mut self) -> &mut S {
        &mut self.blobs
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undo_buffer.is_empty()
    }

    pub fn is_active(&self, category: Category) -> bool {
        status::is_active(&self.history, category)
    }

    pub fn record(&mut self, category: Category, phase: Option<Phase>) -> anyhow::Result<EventRecord> {
        self.record_at(EventType { category, phase }, now_millis())
    }

    /// Appends a record and breaks the redo chain.
    pub fn record_at(&mut self, kind: EventType, time: i64) -> anyhow::Result<EventRecord> {
        let event = EventRecord::new(kind, time);
        self.history.push(event);
        self.undo_buffer.clear();
        self.truncate_history();
        debug!(event = %kind, time, "recorded");

        let persisted = self.persist();
        self.refresh();
        persisted.map(|_| event)
    }

    pub fn toggle(&mut self, category: Category) -> anyhow::Result<EventRecord> {
        self.toggle_at(category, now_millis())
    }

    /// Records the phase opposite to the current derived state of `category`.
    pub fn toggle_at(&mut self, category: Category, time: i64) -> anyhow::Result<EventRecord> {
        let phase = status::next_phase(&self.history, category);
        self.record_at(
            EventType {
                category,
                phase: Some(phase),
            },
            time,
        )
    }

    /// Moves the latest history record to the front of the undo buffer.
    pub fn undo(&mut self) -> anyhow::Result<Option<EventRecord>> {
        let Some(event) = self.history.pop() else {
            return Ok(None);
        };
        self.undo_buffer.push_front(event);
        debug!(event = %event.kind, time = event.time, "undone");

        let persisted = self.persist();
        self.refresh();
        persisted.map(|_| Some(event))
    }

    /// Moves the most recently undone record back onto the history.
    pub fn redo(&mut self) -> anyhow::Result<Option<EventRecord>> {
        let Some(event) = self.undo_buffer.pop_front() else {
            return Ok(None);
        };
        self.history.push(event);
        self.truncate_history();
        debug!(event = %event.kind, time = event.time, "redone");

        let persisted = self.persist();
        self.refresh();
        persisted.map(|_| Some(event))
    }

    /// Drops both sequences from storage. Not undoable.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.history.clear();
        self.undo_buffer.clear();
        let removed = self
            .blobs
            .remove(KEY_HISTORY)
            .and_then(|_| self.blobs.remove(KEY_UNDO_BUFFER));
        info!("event log reset");

        if let Some(hook) = self.on_reload.as_mut() {
            hook();
        }
        removed
    }

    /// Changes the retention cap, truncating immediately if needed.
    pub fn set_max_history(&mut self, max_history: usize) -> anyhow::Result<()> {
        self.max_history = max_history.max(1);
        if self.truncate_history() {
            self.persist()?;
            self.refresh();
        }
        Ok(())
    }

    // Oldest records go first regardless of type. Returns whether anything was dropped.
    fn truncate_history(&mut self) -> bool {
        let excess = self.history.len().saturating_sub(self.max_history);
        if excess == 0 {
            return false;
        }
        self.history.drain(..excess);
        debug!(dropped = excess, "history truncated");
        true
    }

    fn persist(&mut self) -> anyhow::Result<()> {
        let history = serde_json::to_string(&self.history)?;
        let undo_buffer = serde_json::to_string(&self.undo_buffer)?;
        self.blobs.set(KEY_HISTORY, &history)?;
        self.blobs.set(KEY_UNDO_BUFFER, &undo_buffer)?;
        Ok(())
    }

    fn refresh(&mut self) {
        if let Some(hook) = self.on_refresh.as_mut() {
            hook();
        }
    }
}

fn load_records(blobs: &mut impl BlobStore, key: &str) -> Vec<EventRecord> {
    let raw = match blobs.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!("reading '{key}' failed, starting empty: {err}");
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(err) => {
            warn!("'{key}' is malformed, starting empty: {err}");
            Vec::new()
        }
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
