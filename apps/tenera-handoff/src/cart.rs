use checkout_proto::CartLine;
use parking_lot::RwLock;
use tracing::debug;

use crate::storage::StorageMirror;

/// Shared in-memory cart. This is the authoritative copy for the page;
/// the storage mirror and the message channel are derived from it.
#[derive(Default)]
pub struct CartStore {
    lines: RwLock<Vec<CartLine>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: Vec<CartLine>) -> Self {
        Self {
            lines: RwLock::new(lines),
        }
    }

    /// Replace the whole cart in one step.
    pub fn replace(&self, lines: Vec<CartLine>) {
        *self.lines.write() = lines;
    }

    /// Merge a single line into the cart. A line with a known id bumps
    /// the quantity; anything else is appended.
    pub fn merge_line(&self, line: CartLine) {
        let mut lines = self.lines.write();
        if let Some(existing) = lines.iter_mut().find(|l| l.id == line.id) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
        } else {
            lines.push(line);
        }
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.lines.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }

    pub fn clear(&self) {
        self.lines.write().clear();
    }

    /// Current lines, falling back to the first mirrored copy when the
    /// in-memory cart is empty. A mirror hit also warms the store so later
    /// callers skip the probe.
    pub fn lines_or_mirrored(&self, mirror: &StorageMirror) -> Vec<CartLine> {
        let lines = self.lines();
        if !lines.is_empty() {
            return lines;
        }
        match mirror.read_first_available() {
            Some(mirrored) => {
                debug!(
                    target: "handoff::cart",
                    lines = mirrored.len(),
                    "cart restored from storage mirror"
                );
                self.replace(mirrored.clone());
                mirrored
            }
            None => Vec::new(),
        }
    }
}
