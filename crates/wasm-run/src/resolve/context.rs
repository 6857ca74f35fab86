use std::path::{Path, PathBuf};

use crate::Error;

/// Handle to an entry of a [`ResolutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    InProgress,
    Resolved,
    Failed,
}

/// One resolution attempt: a module name and the file it was found at.
#[derive(Debug, Clone)]
pub struct ResolutionEntry {
    pub name: String,
    pub path: PathBuf,
    pub state: ResolutionState,
}

/// Bookkeeping for one resolution tree.
///
/// Every attempt gets its own entry, so a name imported twice shows up
/// twice. The chain holds the entries that are still in progress, from
/// the outermost module inward; a file that is already on the chain
/// cannot be entered again.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    entries: Vec<ResolutionEntry>,
    chain: Vec<EntryId>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose chain starts at the top-level module, which stays
    /// in progress for the whole tree.
    pub fn with_root(name: &str, path: &Path) -> Self {
        Self {
            entries: vec![ResolutionEntry {
                name: name.to_string(),
                path: path.to_path_buf(),
                state: ResolutionState::InProgress,
            }],
            chain: vec![EntryId(0)],
        }
    }

    /// Start resolving `name`, found at the canonical path `path`.
    pub fn enter(&mut self, name: &str, path: &Path) -> Result<EntryId, Error> {
        if let Some(pos) = self
            .chain
            .iter()
            .position(|id| self.entries[id.0].path == path)
        {
            let mut names: Vec<&str> = self.chain[pos..]
                .iter()
                .map(|id| self.entries[id.0].name.as_str())
                .collect();
            names.push(name);
            return Err(Error::CyclicImport {
                chain: names.join(" -> "),
            });
        }
        let id = EntryId(self.entries.len());
        self.entries.push(ResolutionEntry {
            name: name.to_string(),
            path: path.to_path_buf(),
            state: ResolutionState::InProgress,
        });
        self.chain.push(id);
        Ok(id)
    }

    /// Finish the innermost resolution.
    pub fn leave(&mut self, id: EntryId, resolved: bool) {
        debug_assert_eq!(self.chain.last(), Some(&id));
        self.chain.retain(|entry| *entry != id);
        self.entries[id.0].state = if resolved {
            ResolutionState::Resolved
        } else {
            ResolutionState::Failed
        };
    }

    pub fn entries(&self) -> &[ResolutionEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> &ResolutionEntry {
        &self.entries[id.0]
    }

    /// How many times `name` was resolved, successfully or not.
    pub fn resolution_count(&self, name: &str) -> usize {
        self.entries.iter().filter(|e| e.name == name).count()
    }

    /// Number of resolutions currently in progress.
    pub fn depth(&self) -> usize {
        self.chain.len()
    }
}
