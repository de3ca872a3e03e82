//! Configured personas and the inline keyboard that selects them.

use relay_channels::{InlineButton, Keyboard};
use relay_common::PresetItem;

/// Ordered, read-only preset list.
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    items: Vec<PresetItem>,
}

impl PresetCatalog {
    pub fn new(items: Vec<PresetItem>) -> Self {
        Self { items }
    }

    /// Preset selected by `command` (e.g. `/coder`), matched exactly.
    pub fn find(&self, command: &str) -> Option<&PresetItem> {
        self.items.iter().find(|p| p.command == command)
    }

    pub fn items(&self) -> &[PresetItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One row per preset, then a Help/About row.
    pub fn keyboard(&self) -> Keyboard {
        let mut rows: Keyboard = self
            .items
            .iter()
            .map(|p| vec![InlineButton::new(&p.button, &p.command)])
            .collect();
        rows.push(vec![
            InlineButton::new("Help", "/help"),
            InlineButton::new("About", "/about"),
        ]);
        rows
    }
}
