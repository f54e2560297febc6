//! The editing session: the one place tabs are created, selected, edited,
//! saved, closed and reordered.
//!
//! A `Session` is built once at startup and passed explicitly to whatever
//! drives it. It is never empty: closing the last tab immediately opens a
//! fresh untitled one. Outcomes the caller has to act on (a dirty tab that
//! needs a decision before closing, an unsaved tab that needs a destination)
//! come back as enum variants rather than errors.
//!
//! Backups run on snapshots. [`Session::backup_snapshot`] copies the dirty
//! tabs out so a cycle can be written from another task while editing goes on.
//! Tabs edited back to their saved state ride along without content so the
//! cycle can drop their records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lexcore::{Category, Span, Tokenizer};

use crate::backup::{self, BackupKey, BackupRecord, BackupReport, BackupStore, TabSnapshot};
use crate::config::Config;
use crate::error::{Result, SessionError};
use crate::file_io;
use crate::store::{DocumentStore, Tab, TabId, UNTITLED};
use crate::workspace::{WorkspaceFile, WorkspaceState};

const DEFAULT_MAX_HIGHLIGHT_BYTES: usize = 512 * 1024;

/// Row of the tab strip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSummary {
    pub id: TabId,
    pub display_name: String,
    pub dirty: bool,
}

/// Everything the host needs to show a tab after selecting it.
#[derive(Debug, Clone)]
pub struct TabView {
    pub id: TabId,
    pub display_name: String,
    pub content: String,
    pub dirty: bool,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub dirty: bool,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { location: PathBuf },
    /// The tab has never been saved and no destination was given.
    NeedsDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The tab is gone; `active` is the tab selected afterwards.
    Closed { active: TabId },
    /// The tab has unsaved changes. Nothing was closed.
    ConfirmationRequired,
    /// Save-and-close on a tab without a location. Nothing was closed.
    NeedsDestination,
}

struct HighlightCache {
    tab: TabId,
    revision: u64,
    spans: Vec<Span>,
}

pub struct Session {
    store: DocumentStore,
    active: TabId,
    backups: BackupStore,
    workspace: Option<WorkspaceFile>,
    tokenizer: Tokenizer,
    max_highlight_bytes: usize,
    highlight_cache: Option<HighlightCache>,
    /// Keys of edited tabs that were closed clean; the next cycle drops
    /// whatever record they left.
    closed_keys: Vec<BackupKey>,
}

impl Session {
    pub fn new(backups: BackupStore) -> Self {
        let mut store = DocumentStore::new();
        let active = store.create_tab(UNTITLED);
        Self {
            store,
            active,
            backups,
            workspace: None,
            tokenizer: Tokenizer::default(),
            max_highlight_bytes: DEFAULT_MAX_HIGHLIGHT_BYTES,
            highlight_cache: None,
            closed_keys: Vec::new(),
        }
    }

    /// Session wired to the data directory: backups under `backups/`, the
    /// working set in `workspace.json`, keywords and limits from `config`.
    pub fn from_config(config: &Config, data_dir: &Path) -> Self {
        Self::new(BackupStore::in_data_dir(
            data_dir,
            config.backup.retention_days,
        ))
        .with_workspace(WorkspaceFile::in_data_dir(data_dir))
        .with_tokenizer(Tokenizer::with_keywords(
            config.highlight.keywords.iter().cloned(),
        ))
        .with_highlight_limit(config.highlight.max_highlight_bytes)
    }

    pub fn with_workspace(mut self, workspace: WorkspaceFile) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self.highlight_cache = None;
        self
    }

    pub fn with_highlight_limit(mut self, max_bytes: usize) -> Self {
        self.max_highlight_bytes = max_bytes;
        self.highlight_cache = None;
        self
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn active_tab_id(&self) -> TabId {
        self.active
    }

    pub fn active_tab(&self) -> Result<&Tab> {
        self.store.get(self.active)
    }

    pub fn tab(&self, id: TabId) -> Result<&Tab> {
        self.store.get(id)
    }

    pub fn tabs(&self) -> &[Tab] {
        self.store.list()
    }

    pub fn list_tabs(&self) -> Vec<TabSummary> {
        self.store
            .list()
            .iter()
            .map(|t| TabSummary {
                id: t.id(),
                display_name: t.display_name().to_string(),
                dirty: t.is_dirty(),
            })
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.store.dirty_tabs().next().is_some()
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    // ---------------------------------------------------------------------
    // Opening and creating
    // ---------------------------------------------------------------------

    /// New empty tab, made active.
    pub fn create_tab(&mut self, name: &str) -> TabId {
        let id = self.store.create_tab(name);
        self.active = id;
        id
    }

    /// New unsaved tab holding `content`, made active.
    pub fn open_content(&mut self, name: &str, content: String) -> TabId {
        let id = self.store.create_with_content(name, content);
        self.active = id;
        id
    }

    /// Open the file at `path`, or select the tab that already has it.
    pub async fn open_path(&mut self, path: impl AsRef<Path>) -> Result<TabId> {
        let path = path.as_ref();
        if let Some(id) = self.existing_tab_for(path).await {
            log::debug!("{} is already open in tab {}", path.display(), id);
            self.active = id;
            return Ok(id);
        }

        let doc = file_io::read_document(path).await?;
        if let Some(id) = self.store.find_by_location(&doc.path) {
            self.active = id;
            return Ok(id);
        }
        let id = self.store.open_tab(&doc.display_name, doc.content, doc.path);
        self.active = id;
        Ok(id)
    }

    async fn existing_tab_for(&self, path: &Path) -> Option<TabId> {
        if let Some(id) = self.store.find_by_location(path) {
            return Some(id);
        }
        let canonical = tokio::fs::canonicalize(path).await.ok()?;
        self.store.find_by_location(&canonical)
    }

    // ---------------------------------------------------------------------
    // Editing and selection
    // ---------------------------------------------------------------------

    /// Replace the content of the active tab and re-highlight it.
    pub fn edit_active_tab(&mut self, content: String) -> Result<EditOutcome> {
        let dirty = self.store.update_content(self.active, content)?;
        let spans = self.highlighting(self.active)?;
        Ok(EditOutcome { dirty, spans })
    }

    pub fn set_active_tab(&mut self, id: TabId) -> Result<TabView> {
        self.switch_to(id, None)
    }

    /// Select `id`. When the host passes the text currently in its editor,
    /// it is stored into the outgoing tab first so nothing typed is lost.
    pub fn switch_to(&mut self, id: TabId, editor_buffer: Option<String>) -> Result<TabView> {
        self.store.get(id)?;
        if let Some(buffer) = editor_buffer {
            self.store.update_content(self.active, buffer)?;
        }
        self.active = id;
        self.view(id)
    }

    fn view(&mut self, id: TabId) -> Result<TabView> {
        let spans = self.highlighting(id)?;
        let tab = self.store.get(id)?;
        Ok(TabView {
            id,
            display_name: tab.display_name().to_string(),
            content: tab.content().to_string(),
            dirty: tab.is_dirty(),
            spans,
        })
    }

    /// Spans for the current content of `id`. Recomputed only when the
    /// content changed since the last request.
    pub fn highlighting(&mut self, id: TabId) -> Result<Vec<Span>> {
        let tab = self.store.get(id)?;
        if let Some(cache) = &self.highlight_cache {
            if cache.tab == id && cache.revision == tab.revision() {
                return Ok(cache.spans.clone());
            }
        }

        let content = tab.content();
        let spans = if content.len() > self.max_highlight_bytes {
            log::debug!(
                "Skipping highlighting for tab {} ({} bytes)",
                id,
                content.len()
            );
            vec![Span::new(0, content.len(), Category::Plain)]
        } else {
            self.tokenizer.tokenize(content)
        };

        self.highlight_cache = Some(HighlightCache {
            tab: id,
            revision: tab.revision(),
            spans: spans.clone(),
        });
        Ok(spans)
    }

    pub fn reorder(&mut self, id: TabId, new_index: usize) -> Result<()> {
        self.store.reorder(id, new_index)
    }

    // ---------------------------------------------------------------------
    // Saving and closing
    // ---------------------------------------------------------------------

    /// Write the tab to `destination`, or to its own location when none is
    /// given. Backup records for the tab are dropped once the write succeeds.
    ///
    /// Saving onto a file another tab has open is refused.
    pub async fn save_tab(
        &mut self,
        id: TabId,
        destination: Option<PathBuf>,
    ) -> Result<SaveOutcome> {
        let tab = self.store.get(id)?;
        let target = match (destination, tab.backing_location()) {
            (Some(destination), _) => destination,
            (None, Some(location)) => location.to_path_buf(),
            (None, None) => return Ok(SaveOutcome::NeedsDestination),
        };
        if let Some(other) = self.existing_tab_for(&target).await.filter(|&o| o != id) {
            return Err(SessionError::rejected(
                &target,
                format!("already open in tab {}", other),
            ));
        }

        let tab = self.store.get(id)?;
        let stale_key = backup::key_for(tab);

        let location = file_io::write_document(&target, tab.content()).await?;
        self.store.mark_saved(id, location.clone())?;

        let saved_key = backup::key_for(self.store.get(id)?);
        self.forget_backup(&stale_key).await;
        if saved_key != stale_key {
            self.forget_backup(&saved_key).await;
        }

        Ok(SaveOutcome::Saved { location })
    }

    /// Close a clean tab. A dirty tab is left open and the caller is asked
    /// to decide between [`Session::save_and_close`] and
    /// [`Session::discard_and_close`].
    pub fn close_tab(&mut self, id: TabId) -> Result<CloseOutcome> {
        if self.store.get(id)?.is_dirty() {
            return Ok(CloseOutcome::ConfirmationRequired);
        }
        self.remove(id)
    }

    /// Close without saving and drop the tab's backup record.
    pub async fn discard_and_close(&mut self, id: TabId) -> Result<CloseOutcome> {
        let key = backup::key_for(self.store.get(id)?);
        let outcome = self.remove(id)?;
        self.forget_backup(&key).await;
        Ok(outcome)
    }

    pub async fn save_and_close(
        &mut self,
        id: TabId,
        destination: Option<PathBuf>,
    ) -> Result<CloseOutcome> {
        match self.save_tab(id, destination).await? {
            SaveOutcome::NeedsDestination => Ok(CloseOutcome::NeedsDestination),
            SaveOutcome::Saved { .. } => self.remove(id),
        }
    }

    fn remove(&mut self, id: TabId) -> Result<CloseOutcome> {
        let index = self
            .store
            .index_of(id)
            .ok_or(SessionError::TabNotFound(id))?;
        let tab = self.store.remove_tab(id)?;
        if !tab.is_dirty() && tab.revision() > 0 {
            self.closed_keys.push(backup::key_for(&tab));
        }

        if self.highlight_cache.as_ref().is_some_and(|c| c.tab == id) {
            self.highlight_cache = None;
        }

        if self.store.is_empty() {
            self.active = self.store.create_tab(UNTITLED);
            log::debug!("Last tab closed, opened untitled tab {}", self.active);
        } else if self.active == id {
            let next = index.min(self.store.len() - 1);
            self.active = self.store.list()[next].id();
        }
        Ok(CloseOutcome::Closed {
            active: self.active,
        })
    }

    async fn forget_backup(&self, key: &BackupKey) {
        match self.backups.discard(key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => log::warn!("Failed to remove backup {}: {}", key, e),
        }
    }

    // ---------------------------------------------------------------------
    // Backups and recovery
    // ---------------------------------------------------------------------

    /// Owned copies of every dirty tab, for a backup cycle that runs
    /// elsewhere, plus the keys of tabs that were edited and are clean again.
    /// Tabs untouched since they were opened are left out, so a record from
    /// an earlier run survives until the user deals with it.
    pub fn backup_snapshot(&self) -> Vec<TabSnapshot> {
        let mut snapshot: Vec<TabSnapshot> = self
            .store
            .list()
            .iter()
            .filter(|t| t.is_dirty() || t.revision() > 0)
            .map(TabSnapshot::of)
            .collect();
        let live: HashSet<BackupKey> = self.store.list().iter().map(backup::key_for).collect();
        snapshot.extend(
            self.closed_keys
                .iter()
                .filter(|key| !live.contains(*key))
                .cloned()
                .map(TabSnapshot::cleared),
        );
        snapshot
    }

    pub async fn run_backup_cycle(&self) -> BackupReport {
        self.backups.backup_all(&self.backup_snapshot()).await
    }

    /// Backups that can be restored, excluding those that belong to tabs
    /// open in this session.
    pub async fn recoverable_backups(&self) -> Result<Vec<BackupRecord>> {
        let live: HashSet<BackupKey> = self.store.list().iter().map(backup::key_for).collect();
        let records = self.backups.list_recoverable().await?;
        Ok(records
            .into_iter()
            .filter(|r| !live.contains(&r.key))
            .collect())
    }

    /// Open the backed-up content as a dirty tab and select it. A record
    /// that belongs to a tab already open just selects that tab.
    pub async fn restore_from_backup(&mut self, key: &BackupKey) -> Result<TabId> {
        let record = self.backups.load(key).await?;

        if let Some(id) = record
            .backing_location
            .as_deref()
            .and_then(|loc| self.store.find_by_location(loc))
        {
            self.store.update_content(id, record.content)?;
            self.store.mark_unsaved(id)?;
            self.active = id;
            log::info!("Restored backup {} into open tab {}", key, id);
            return Ok(id);
        }

        if let Some(id) = self
            .store
            .list()
            .iter()
            .find(|t| backup::key_for(t) == *key)
            .map(Tab::id)
        {
            self.active = id;
            log::info!("Backup {} belongs to open tab {}", key, id);
            return Ok(id);
        }

        let origin = record.key.origin().map(str::to_string);
        let id = self.store.insert_recovered(
            &record.display_name,
            record.content,
            record.backing_location,
            record.is_new,
            origin,
        );
        self.active = id;
        log::info!("Restored backup {} as tab {}", key, id);
        Ok(id)
    }

    pub async fn discard_backup(&self, key: &BackupKey) -> Result<()> {
        self.backups.discard(key).await
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Reopen the files that were open when the last session ended.
    /// Files that cannot be read are skipped. Returns how many were opened.
    pub async fn reopen_workspace(&mut self) -> usize {
        let Some(state) = self.workspace_state().await else {
            return 0;
        };

        let placeholder = self.active;
        let mut opened = 0;
        for path in &state.open_files {
            match self.open_path(path).await {
                Ok(_) => opened += 1,
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        if let Some(active) = state.active_file() {
            if let Some(id) = self.store.find_by_location(active) {
                self.active = id;
            }
        }

        // Drop the untitled tab the session started with if it was never used.
        if opened > 0 {
            if let Ok(tab) = self.store.get(placeholder) {
                if tab.is_new() && !tab.is_dirty() && self.active != placeholder {
                    if let Err(e) = self.remove(placeholder) {
                        log::warn!("Failed to drop untitled tab {}: {}", placeholder, e);
                    }
                }
            }
        }

        log::info!("Reopened {} file(s) from the last session", opened);
        opened
    }

    async fn workspace_state(&self) -> Option<WorkspaceState> {
        self.workspace.as_ref()?.load().await
    }

    fn workspace_snapshot(&self) -> WorkspaceState {
        let backed: Vec<&Tab> = self
            .store
            .list()
            .iter()
            .filter(|t| t.backing_location().is_some())
            .collect();
        let active_index = backed.iter().position(|t| t.id() == self.active);
        let open_files = backed
            .iter()
            .filter_map(|t| t.backing_location().map(Path::to_path_buf))
            .collect();
        WorkspaceState::new(open_files, active_index)
    }

    /// Flush everything at the end of the session: one last backup cycle,
    /// then the list of open files.
    pub async fn shutdown(self) -> BackupReport {
        let report = self.run_backup_cycle().await;
        if let Some(workspace) = &self.workspace {
            if let Err(e) = workspace.save(&self.workspace_snapshot()).await {
                log::warn!("Failed to save workspace: {}", e);
            }
        }
        log::info!(
            "Session closed with {} tab(s), {} backed up",
            self.store.len(),
            report.written
        );
        report
    }
}
