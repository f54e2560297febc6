//! In-memory document store: every open tab, its content and its dirty flag,
//! in display order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Result, SessionError};

pub const UNTITLED: &str = "Untitled";

const SHORT_NAME_LIMIT: usize = 15;
const SHORT_NAME_KEEP: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(TabId)
    }
}

/// What the content is compared against to decide whether a tab is dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Baseline {
    /// A new tab nobody has typed into yet. Clean while empty.
    Pristine,
    /// Content of the last successful write to the backing location.
    Persisted(String),
    /// Recovered from a backup; nothing on disk is known to match.
    Unknown,
}

impl Baseline {
    fn is_dirty(&self, content: &str) -> bool {
        match self {
            Baseline::Pristine => !content.is_empty(),
            Baseline::Persisted(saved) => saved != content,
            Baseline::Unknown => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tab {
    id: TabId,
    display_name: String,
    content: String,
    backing_location: Option<PathBuf>,
    dirty: bool,
    is_new: bool,
    revision: u64,
    origin: String,
    baseline: Baseline,
}

impl Tab {
    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn backing_location(&self) -> Option<&Path> {
        self.backing_location.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Bumped on every content change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Fingerprint of the content the tab was created with, salted per tab.
    /// Unsaved tabs are backed up under a key derived from it.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Display name cut to fit a tab strip: long names keep their first
    /// twelve characters followed by `...`.
    pub fn short_name(&self) -> String {
        let graphemes: Vec<&str> = self.display_name.graphemes(true).collect();
        if graphemes.len() > SHORT_NAME_LIMIT {
            format!("{}...", graphemes[..SHORT_NAME_KEEP].concat())
        } else {
            self.display_name.clone()
        }
    }

    /// Lower-cased extension of the display name, empty when there is none.
    pub fn extension(&self) -> String {
        Path::new(&self.display_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    fn set_content(&mut self, content: String) {
        if content != self.content {
            self.content = content;
            self.revision += 1;
        }
        self.dirty = self.baseline.is_dirty(&self.content);
    }
}

/// Ordered set of open tabs keyed by a never-reused id.
pub struct DocumentStore {
    tabs: Vec<Tab>,
    next_id: u64,
    salt: i64,
}

impl DocumentStore {
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        Self {
            tabs: Vec::new(),
            next_id: 1,
            salt: now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_millis()),
        }
    }

    fn next_tab_id(&mut self) -> TabId {
        let id = TabId(self.next_id);
        self.next_id += 1;
        id
    }

    fn origin_for(&self, id: TabId, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update(self.salt.to_le_bytes());
        hasher.update(id.0.to_le_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    fn insert(&mut self, mut tab: Tab) -> TabId {
        tab.dirty = tab.baseline.is_dirty(&tab.content);
        let id = tab.id;
        self.tabs.push(tab);
        id
    }

    /// A new, empty, unsaved tab.
    pub fn create_tab(&mut self, name: &str) -> TabId {
        self.create_with_content(name, String::new())
    }

    /// A new unsaved tab that starts out holding `content`.
    pub fn create_with_content(&mut self, name: &str, content: String) -> TabId {
        let id = self.next_tab_id();
        let origin = self.origin_for(id, &content);
        self.insert(Tab {
            id,
            display_name: name.to_string(),
            content,
            backing_location: None,
            dirty: false,
            is_new: true,
            revision: 0,
            origin,
            baseline: Baseline::Pristine,
        })
    }

    /// A clean tab whose content was just read from `location`.
    pub fn open_tab(&mut self, name: &str, content: String, location: PathBuf) -> TabId {
        let id = self.next_tab_id();
        let origin = self.origin_for(id, &content);
        self.insert(Tab {
            id,
            display_name: name.to_string(),
            baseline: Baseline::Persisted(content.clone()),
            content,
            backing_location: Some(location),
            dirty: false,
            is_new: false,
            revision: 0,
            origin,
        })
    }

    /// A tab rebuilt from a backup. Always dirty until saved.
    ///
    /// `origin` carries over the fingerprint of an unsaved tab so the restored
    /// tab keeps overwriting the record it came from.
    pub fn insert_recovered(
        &mut self,
        name: &str,
        content: String,
        location: Option<PathBuf>,
        is_new: bool,
        origin: Option<String>,
    ) -> TabId {
        let id = self.next_tab_id();
        let origin = origin.unwrap_or_else(|| self.origin_for(id, &content));
        self.insert(Tab {
            id,
            display_name: name.to_string(),
            content,
            backing_location: location,
            dirty: true,
            is_new,
            revision: 0,
            origin,
            baseline: Baseline::Unknown,
        })
    }

    /// Replace the content of a tab; returns the new dirty flag.
    pub fn update_content(&mut self, id: TabId, content: String) -> Result<bool> {
        let tab = self.get_mut(id)?;
        tab.set_content(content);
        Ok(tab.dirty)
    }

    /// Force a tab dirty regardless of its content, as after a recovery.
    pub fn mark_unsaved(&mut self, id: TabId) -> Result<()> {
        let tab = self.get_mut(id)?;
        tab.baseline = Baseline::Unknown;
        tab.dirty = true;
        Ok(())
    }

    /// Record that the current content now lives at `location`.
    pub fn mark_saved(&mut self, id: TabId, location: PathBuf) -> Result<()> {
        let tab = self.get_mut(id)?;
        if let Some(name) = location.file_name() {
            tab.display_name = name.to_string_lossy().into_owned();
        }
        tab.baseline = Baseline::Persisted(tab.content.clone());
        tab.backing_location = Some(location);
        tab.dirty = false;
        tab.is_new = false;
        Ok(())
    }

    pub fn remove_tab(&mut self, id: TabId) -> Result<Tab> {
        let index = self.index_of(id).ok_or(SessionError::TabNotFound(id))?;
        Ok(self.tabs.remove(index))
    }

    pub fn get(&self, id: TabId) -> Result<&Tab> {
        self.tabs
            .iter()
            .find(|t| t.id == id)
            .ok_or(SessionError::TabNotFound(id))
    }

    fn get_mut(&mut self, id: TabId) -> Result<&mut Tab> {
        self.tabs
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(SessionError::TabNotFound(id))
    }

    /// Tabs in display order.
    pub fn list(&self) -> &[Tab] {
        &self.tabs
    }

    /// Move a tab so that it ends up at `new_index`.
    pub fn reorder(&mut self, id: TabId, new_index: usize) -> Result<()> {
        let from = self.index_of(id).ok_or(SessionError::TabNotFound(id))?;
        if new_index >= self.tabs.len() {
            return Err(SessionError::OutOfRange {
                index: new_index,
                len: self.tabs.len(),
            });
        }
        let tab = self.tabs.remove(from);
        self.tabs.insert(new_index, tab);
        Ok(())
    }

    pub fn index_of(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }

    pub fn find_by_location(&self, location: &Path) -> Option<TabId> {
        self.tabs
            .iter()
            .find(|t| t.backing_location.as_deref() == Some(location))
            .map(|t| t.id)
    }

    pub fn dirty_tabs(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.iter().filter(|t| t.dirty)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
