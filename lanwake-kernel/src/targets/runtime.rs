use std::collections::HashMap;

/// Non-persisted status fields for one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub online: Option<bool>,
    pub last_status_at: Option<String>,
    pub last_wake_at: Option<String>,
}

/// In-memory overlay keyed by target name. Lives as long as the registry
/// that owns it, so a restart starts from an empty overlay.
#[derive(Debug, Default)]
pub struct RuntimeOverlay {
    entries: HashMap<String, RuntimeState>,
}

impl RuntimeOverlay {
    pub fn get(&self, name: &str) -> Option<&RuntimeState> {
        self.entries.get(name)
    }

    pub fn record_status(&mut self, name: &str, online: bool, at: String) {
        let entry = self.entries.entry(name.to_string()).or_default();
        entry.online = Some(online);
        entry.last_status_at = Some(at);
    }

    pub fn record_wake(&mut self, name: &str, at: String) {
        self.entries.entry(name.to_string()).or_default().last_wake_at = Some(at);
    }

    /// Moves `from`'s entry under `to`. No-op when `from` has no entry.
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(state) = self.entries.remove(from) {
            self.entries.insert(to.to_string(), state);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}
