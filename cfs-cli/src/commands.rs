// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations

use cfs_core::{
    operations::{self, CopyAction, CopyOptions, CopyReport, Difference, DifferenceKind},
    CfsError, Entry, EntryRef, FilePattern, PatternError,
};
use cfs_providers::{ChefFsConfig, ConfigError};
use console::style;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

const DEFAULT_CONFIG: &str = ".chef/fs.toml";

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fs(#[from] CfsError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("cannot write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("{0} error(s) while copying")]
    CopyFailed(usize),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Explicit config file, else `.chef/fs.toml` if present, else defaults
pub fn load_config(path: Option<&Path>) -> CommandResult<ChefFsConfig> {
    match path {
        Some(path) => Ok(ChefFsConfig::load(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(ChefFsConfig::load(Path::new(DEFAULT_CONFIG))?),
        None => {
            tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG);
            Ok(ChefFsConfig::default())
        }
    }
}

fn root(config: &ChefFsConfig, remote: bool) -> CommandResult<EntryRef> {
    if remote {
        Ok(config.create_remote()? as EntryRef)
    } else {
        Ok(config.create_local() as EntryRef)
    }
}

/// Command line paths are rooted at `/` whether or not the user typed it
fn pattern(arg: &str) -> CommandResult<FilePattern> {
    let pattern = if arg.starts_with('/') {
        FilePattern::new(arg)?
    } else {
        FilePattern::new(format!("/{}", arg))?
    };
    Ok(pattern)
}

async fn existing(root: &EntryRef, path: &str) -> CommandResult<EntryRef> {
    let entry = operations::resolve_path(root, path).await?;
    if !entry.exists().await? {
        return Err(CfsError::not_found(entry.path()).into());
    }
    Ok(entry)
}

/// List a directory, or every entry a wildcard pattern matches
pub async fn ls(config: &ChefFsConfig, path: &str, remote: bool) -> CommandResult<()> {
    let root = root(config, remote)?;
    let pattern = pattern(path)?;
    let Some(exact) = pattern.exact_path() else {
        for entry in operations::list_matching(&root, &pattern).await? {
            if entry.is_dir() {
                println!("{}/", style(entry.path()).cyan());
            } else {
                println!("{}", entry.path());
            }
        }
        return Ok(());
    };
    let entry = existing(&root, &exact).await?;

    if !entry.is_dir() {
        println!("{}", entry.path());
        return Ok(());
    }
    for child in entry.children().await? {
        if child.is_dir() {
            println!("{}/", style(child.name()).cyan());
        } else {
            println!("{}", child.name());
        }
    }
    Ok(())
}

/// Print a file
pub async fn show(config: &ChefFsConfig, path: &str, remote: bool) -> CommandResult<()> {
    let root = root(config, remote)?;
    let entry = existing(&root, path).await?;
    let content = entry.read().await?;

    let mut stdout = std::io::stdout();
    stdout.write_all(&content)?;
    if !content.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    Ok(())
}

/// Print differences, server side as old and repository side as new
pub async fn diff(config: &ChefFsConfig, path: &str) -> CommandResult<()> {
    let pattern = pattern(path)?;
    let differences = differences(&pattern, root(config, true)?, root(config, false)?).await?;
    if differences.is_empty() {
        println!("No differences");
        return Ok(());
    }
    for difference in differences {
        let marker = match difference.kind {
            DifferenceKind::Added => style("A").green(),
            DifferenceKind::Deleted => style("D").red(),
            DifferenceKind::Modified => style("M").yellow(),
            DifferenceKind::DirectoryToFile | DifferenceKind::FileToDirectory => style("T").magenta(),
        };
        println!("{} {}", marker, difference.path);
    }
    Ok(())
}

/// Takes the roots by value: entries only hold a weak link to their parent,
/// so the roots must outlive the walk.
async fn differences(pattern: &FilePattern, old_root: EntryRef, new_root: EntryRef) -> CommandResult<Vec<Difference>> {
    Ok(operations::diff_matching(pattern, &old_root, &new_root).await?)
}

/// Copy the repository to the server
pub async fn upload(config: &ChefFsConfig, path: &str, options: &CopyOptions) -> CommandResult<()> {
    sync(config, path, false, options).await
}

/// Copy the server to the repository
pub async fn download(config: &ChefFsConfig, path: &str, options: &CopyOptions) -> CommandResult<()> {
    sync(config, path, true, options).await
}

async fn sync(config: &ChefFsConfig, path: &str, from_remote: bool, options: &CopyOptions) -> CommandResult<()> {
    let pattern = pattern(path)?;
    let src_root = root(config, from_remote)?;
    let dest_root = root(config, !from_remote)?;

    let report = operations::copy_matching(&pattern, &src_root, &dest_root, options).await;
    print_report(&report);
    if report.is_success() {
        Ok(())
    } else {
        Err(CommandError::CopyFailed(report.errors.len()))
    }
}

fn print_report(report: &CopyReport) {
    for event in &report.events {
        let verb = match (event.action, event.dry_run) {
            (CopyAction::Create, false) => style("Created").green(),
            (CopyAction::Update, false) => style("Updated").yellow(),
            (CopyAction::Delete, false) => style("Deleted").red(),
            (CopyAction::Create, true) => style("Would create").green(),
            (CopyAction::Update, true) => style("Would update").yellow(),
            (CopyAction::Delete, true) => style("Would delete").red(),
        };
        println!("{} {}", verb, event.path);
    }
    for warning in &report.warnings {
        eprintln!("{} {}", style("Warning:").yellow(), warning);
    }
    for error in &report.errors {
        eprintln!("{} {}", style("Error:").red(), error);
    }
}
