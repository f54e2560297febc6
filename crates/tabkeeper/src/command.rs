use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::backup::BackupKey;
use crate::session::{CloseOutcome, SaveOutcome, Session};
use crate::store::{TabId, UNTITLED};

/// Turns one line of host input into a session call and a status message.
pub struct CommandProcessor;

impl CommandProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Whether `command` deletes backup records (save, discard, drop, quit).
    pub fn removes_backups(command: &str) -> bool {
        matches!(
            command.split_whitespace().next(),
            Some("save" | "discard" | "drop" | "quit" | "q" | "quit!" | "q!")
        )
    }

    pub async fn execute_command(
        &self,
        command: &str,
        session: &mut Session,
        should_quit: &mut bool,
    ) -> Result<String> {
        let cmd = command.trim();
        if cmd.is_empty() {
            return Ok(String::new());
        }

        // `edit` takes the rest of the line verbatim
        if let Some(text) = cmd.strip_prefix("edit ").or((cmd == "edit").then_some("")) {
            let outcome = session.edit_active_tab(unescape(text))?;
            let marker = if outcome.dirty { " [+]" } else { "" };
            return Ok(format!(
                "Tab {} updated{} ({} spans)",
                session.active_tab_id(),
                marker,
                outcome.spans.len()
            ));
        }

        let parts: Vec<&str> = cmd.split_whitespace().collect();
        match parts[0] {
            "new" => {
                let name = parts.get(1).copied().unwrap_or(UNTITLED);
                let id = session.create_tab(name);
                Ok(format!("Created tab {}", id))
            }
            "open" => {
                let path = PathBuf::from(argument(&parts, 1, "open <path>")?);
                let id = session.open_path(&path).await?;
                Ok(format!("Opened {} as tab {}", path.display(), id))
            }
            "tabs" | "ls" => Ok(render_tabs(session)),
            "switch" => {
                let id = tab_id(&parts, 1)?;
                let view = session.set_active_tab(id)?;
                Ok(format!(
                    "Switched to {} ({} bytes)\n{}",
                    view.display_name,
                    view.content.len(),
                    view.content
                ))
            }
            "close" => {
                let id = tab_id(&parts, 1)?;
                match session.close_tab(id)? {
                    CloseOutcome::Closed { active } => {
                        Ok(format!("Closed tab {}, active is {}", id, active))
                    }
                    CloseOutcome::ConfirmationRequired => Ok(format!(
                        "Tab {} has unsaved changes (use save or discard)",
                        id
                    )),
                    CloseOutcome::NeedsDestination => Ok(format!("Tab {} needs a path", id)),
                }
            }
            "discard" => {
                let id = tab_id(&parts, 1)?;
                session.discard_and_close(id).await?;
                Ok(format!(
                    "Discarded tab {}, active is {}",
                    id,
                    session.active_tab_id()
                ))
            }
            "save" => {
                let id = tab_id(&parts, 1)?;
                let destination = parts.get(2).map(PathBuf::from);
                match session.save_tab(id, destination).await? {
                    SaveOutcome::Saved { location } => {
                        Ok(format!("Saved tab {} to {}", id, location.display()))
                    }
                    SaveOutcome::NeedsDestination => {
                        Ok(format!("Tab {} has no file yet (use save {} <path>)", id, id))
                    }
                }
            }
            "move" => {
                let id = tab_id(&parts, 1)?;
                let index: usize = argument(&parts, 2, "move <id> <index>")?
                    .parse()
                    .context("Index must be a non-negative number")?;
                session.reorder(id, index)?;
                Ok(format!("Moved tab {} to position {}", id, index))
            }
            "hl" => {
                let id = match parts.get(1) {
                    Some(raw) => raw.parse::<TabId>().context("Invalid tab id")?,
                    None => session.active_tab_id(),
                };
                let spans = session.highlighting(id)?;
                let content = session.tab(id)?.content();
                Ok(spans
                    .iter()
                    .map(|s| format!("{}:{:?}", s.category.as_str(), s.text(content)))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            "backup" => {
                let report = session.run_backup_cycle().await;
                Ok(format!(
                    "Backed up {} tab(s), {} failed, {} expired removed, {} cleared",
                    report.written, report.failed, report.purged, report.cleared
                ))
            }
            "recover" => {
                let records = session.recoverable_backups().await?;
                if records.is_empty() {
                    return Ok("No recoverable backups".to_string());
                }
                let mut output = String::new();
                for record in records {
                    let when = record
                        .saved_at()
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "?".to_string());
                    output.push_str(&format!(
                        "{}  {}  {}\n",
                        record.key, when, record.display_name
                    ));
                }
                Ok(output.trim_end().to_string())
            }
            "restore" => {
                let key = BackupKey::from(argument(&parts, 1, "restore <key>")?);
                let id = session.restore_from_backup(&key).await?;
                Ok(format!("Restored backup {} as tab {}", key, id))
            }
            "drop" => {
                let key = BackupKey::from(argument(&parts, 1, "drop <key>")?);
                session.discard_backup(&key).await?;
                Ok(format!("Dropped backup {}", key))
            }
            "quit" | "q" => {
                if session.has_unsaved_changes() {
                    Ok("Unsaved changes will only survive as backups (use quit! to leave anyway)"
                        .to_string())
                } else {
                    *should_quit = true;
                    Ok("Quitting".to_string())
                }
            }
            "quit!" | "q!" => {
                *should_quit = true;
                Ok("Force quitting".to_string())
            }
            _ => Err(anyhow::anyhow!("Unknown command: {}", parts[0])),
        }
    }
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn argument<'a>(parts: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    parts
        .get(index)
        .copied()
        .with_context(|| format!("Argument required: {}", usage))
}

fn tab_id(parts: &[&str], index: usize) -> Result<TabId> {
    argument(parts, index, "<id>")?
        .parse()
        .context("Invalid tab id")
}

fn render_tabs(session: &Session) -> String {
    let active = session.active_tab_id();
    let mut output = String::new();
    for (tab, summary) in session.tabs().iter().zip(session.list_tabs()) {
        let marker = if summary.id == active { "%" } else { " " };
        let mod_marker = if summary.dirty { "+" } else { " " };
        let location = tab
            .backing_location()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "[No File]".to_string());
        output.push_str(&format!(
            "{}{} {} {} {}\n",
            marker,
            mod_marker,
            summary.id,
            tab.short_name(),
            location
        ));
    }
    output.trim_end().to_string()
}

/// `\n`, `\t` and `\\` escapes so multi-line text fits on one input line.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
