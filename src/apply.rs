//! Applying a plan: create destination directories and rename, best effort.

use std::fs::DirBuilder;
use std::path::{Path, PathBuf};

use owo_colors::OwoColorize;

use crate::plan::{clean_path, PlannedMove};

/// Permissions requested for created directories (the umask still applies).
pub const DIR_MODE: u32 = 0o777;

/// What happened to one planned move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Moved,
    /// Dry run: reported, nothing touched.
    DryRun,
    CreateDirFailed(String),
    RenameFailed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::CreateDirFailed(_) | Outcome::RenameFailed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    pub planned:     PlannedMove,
    /// Directory created (or, in a dry run, that would have been) for this move.
    pub created_dir: Option<PathBuf>,
    pub outcome:     Outcome,
}

/// Create missing parents and rename each planned move, in order.
///
/// Failures are logged and recorded; they never stop the loop.
#[tracing::instrument(skip(planned))]
pub fn apply_moves(planned: &[PlannedMove], output_dir: &Path, dry_run: bool) -> Vec<MoveReport> {
    let mut reports = Vec::with_capacity(planned.len());

    for planned_move in planned {
        let (created_dir, outcome) = apply_one(planned_move, output_dir, dry_run);
        reports.push(MoveReport { planned: planned_move.clone(), created_dir, outcome });
    }

    reports
}

fn apply_one(planned_move: &PlannedMove, output_dir: &Path, dry_run: bool) -> (Option<PathBuf>, Outcome) {
    let PlannedMove { from, to, .. } = planned_move;
    let mut created_dir = None;
    let root = clean_path(output_dir);

    // the output root itself is only created when it is missing
    if let Some(dir) = to.parent().filter(|dir| *dir != root || !dir.is_dir()) {
        println!("mkdir {} (0{:o})", dir.display().blue(), DIR_MODE);
        created_dir = Some(dir.to_path_buf());
        if !dry_run {
            if let Err(e) = create_dir_all(dir) {
                tracing::error!("mkdir {:?} failed: {}", dir, e);
                return (created_dir, Outcome::CreateDirFailed(e.to_string()));
            }
        }
    }

    println!("mv {} -> {}", from.display().black().bold().on_green(), to.display().red().bold().on_blue());
    if dry_run {
        return (created_dir, Outcome::DryRun);
    }
    match std::fs::rename(from, to) {
        Ok(()) => (created_dir, Outcome::Moved),
        Err(e) => {
            tracing::error!("mv {:?} -> {:?} failed: {}", from, to, e);
            (created_dir, Outcome::RenameFailed(e.to_string()))
        }
    }
}

fn create_dir_all(dir: &Path) -> std::io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}
