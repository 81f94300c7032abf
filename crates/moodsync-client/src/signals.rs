use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Host runtime conditions that gate pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSignals {
    pub visible: bool,
    pub online: bool,
}

impl Default for RuntimeSignals {
    fn default() -> Self {
        Self {
            visible: true,
            online: true,
        }
    }
}

impl RuntimeSignals {
    pub fn allows_pull(&self) -> bool {
        self.visible && self.online
    }
}

/// The signed identity payload, provided by the host whenever it becomes
/// available. Shared between the handle and the sync tasks.
#[derive(Debug, Clone, Default)]
pub struct IdentityCell(Arc<RwLock<Option<String>>>);

impl IdentityCell {
    pub fn new(init_data: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(init_data.filter(|s| !s.is_empty()))))
    }

    pub fn set(&self, init_data: Option<String>) {
        let mut slot = self.0.write().unwrap_or_else(|e| e.into_inner());
        *slot = init_data.filter(|s| !s.is_empty());
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_counts_as_absent() {
        let cell = IdentityCell::new(Some(String::new()));
        assert!(cell.get().is_none());

        let shared = cell.clone();
        shared.set(Some("user=1&hash=ab".into()));
        assert_eq!(cell.get().as_deref(), Some("user=1&hash=ab"));
    }

    #[test]
    fn test_pull_needs_visible_and_online() {
        assert!(RuntimeSignals::default().allows_pull());
        assert!(!RuntimeSignals { visible: false, online: true }.allows_pull());
        assert!(!RuntimeSignals { visible: true, online: false }.allows_pull());
    }
}
