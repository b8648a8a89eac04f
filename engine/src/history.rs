//! Bounded undo/redo over [`Template::apply`].

use std::collections::VecDeque;

use crate::model::{Command, ModelError, Template};

pub const DEFAULT_HISTORY_DEPTH: usize = 50;

/// One recorded step: the command as performed and the command undoing it.
#[derive(Debug, Clone)]
struct Entry {
    forward: Command,
    inverse: Command,
}

#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<Entry>,
    redo: Vec<Entry>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Perform `cmd` and record it. Clears the redo stack. A rejected command
    /// records nothing.
    pub fn apply(&mut self, template: &mut Template, cmd: Command) -> Result<(), ModelError> {
        let inverse = template.apply(cmd.clone())?;
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(Entry { forward: cmd, inverse });
        self.redo.clear();
        Ok(())
    }

    /// Revert the latest step. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self, template: &mut Template) -> bool {
        let Some(entry) = self.undo.pop_back() else {
            return false;
        };
        match template.apply(entry.inverse.clone()) {
            Ok(_) => {
                self.redo.push(entry);
                true
            }
            Err(e) => {
                // The template changed underneath the history; the entry is stale.
                tracing::warn!(error = %e, "undo step could not be applied, history cleared");
                self.clear();
                false
            }
        }
    }

    /// Re-apply the latest undone step. Returns `false` when there is nothing
    /// to redo.
    pub fn redo(&mut self, template: &mut Template) -> bool {
        let Some(entry) = self.redo.pop() else {
            return false;
        };
        match template.apply(entry.forward.clone()) {
            Ok(inverse) => {
                self.undo.push_back(Entry {
                    forward: entry.forward,
                    inverse,
                });
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "redo step could not be applied, history cleared");
                self.clear();
                false
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
