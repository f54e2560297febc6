use anyhow::Result;
use log::LevelFilter;
use std::env;
use std::path::PathBuf;
use tabkeeper::{BackupReport, CommandProcessor, Config, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
        logger.filter_module("tabkeeper", LevelFilter::Debug);
    }
    logger.init();

    let config = Config::load().await?;
    let data_dir = Config::data_dir()?;
    log::info!("Using data directory: {}", data_dir.display());

    let mut session = Session::from_config(&config, &data_dir);
    if config.session.restore_workspace {
        session.reopen_workspace().await;
    }

    for arg in env::args().skip(1) {
        let path = PathBuf::from(&arg);
        match session.open_path(&path).await {
            Ok(id) => log::info!(
                "Successfully loaded file from command line: {} (tab {})",
                arg,
                id
            ),
            Err(e) => {
                log::error!("Failed to load file '{}': {}", arg, e);
                eprintln!("Could not open {}: {}", arg, e);
            }
        }
    }

    match session.recoverable_backups().await {
        Ok(records) if !records.is_empty() => println!(
            "{} recoverable backup(s) found, type `recover` to list them",
            records.len()
        ),
        Ok(_) => {}
        Err(e) => log::warn!("Could not scan backups: {}", e),
    }

    let res = run(&config, &mut session).await;
    let report = session.shutdown().await;
    if report.failed > 0 {
        eprintln!("{} tab(s) could not be backed up on exit", report.failed);
    }

    if let Err(err) = res {
        log::error!("Application error: {}", err);
        eprintln!("Error: {}", err);
        if let Some(source) = err.source() {
            eprintln!("Caused by: {}", source);
        }
    }

    Ok(())
}

async fn run(config: &Config, session: &mut Session) -> Result<()> {
    let processor = CommandProcessor::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(config.backup.interval());
    // The first tick fires immediately; there is nothing to back up yet.
    ticker.tick().await;

    let mut pending: Option<JoinHandle<BackupReport>> = None;
    let mut should_quit = false;

    while !should_quit {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    log::info!("Input closed");
                    break;
                };
                // A running cycle could write back a record this command deletes.
                if CommandProcessor::removes_backups(&line) {
                    if let Some(task) = pending.take() {
                        finish_backup(task).await;
                    }
                }
                match processor.execute_command(&line, session, &mut should_quit).await {
                    Ok(message) if message.is_empty() => {}
                    Ok(message) => println!("{}", message),
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ = ticker.tick(), if config.backup.enabled => {
                if pending.as_ref().is_some_and(|task| !task.is_finished()) {
                    log::debug!("Previous backup cycle still running, skipping tick");
                    continue;
                }
                let store = session.backups().clone();
                let snapshot = session.backup_snapshot();
                pending = Some(tokio::spawn(async move { store.backup_all(&snapshot).await }));
            }
        }
    }

    if let Some(task) = pending {
        finish_backup(task).await;
    }
    log::info!("Application loop ended successfully");
    Ok(())
}

async fn finish_backup(task: JoinHandle<BackupReport>) {
    if let Err(e) = task.await {
        log::warn!("Backup task failed: {}", e);
    }
}
