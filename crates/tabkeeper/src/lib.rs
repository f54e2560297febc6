// Tabkeeper library exports

pub mod backup;
pub mod command;
pub mod config;
pub mod error;
pub mod file_io;
pub mod session;
pub mod store;
pub mod workspace;

pub use backup::{BackupKey, BackupRecord, BackupReport, BackupStore, TabSnapshot};
pub use command::CommandProcessor;
pub use config::Config;
pub use error::{Result, SessionError};
pub use session::{CloseOutcome, EditOutcome, SaveOutcome, Session, TabSummary, TabView};
pub use store::{DocumentStore, Tab, TabId};
pub use workspace::{WorkspaceFile, WorkspaceState};
