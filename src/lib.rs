//! CLI interface to move glob-matched files to paths rendered from a template.
//! Designed for batch renames: counters, extensions and timestamps in the new names.

pub mod apply;
pub mod error;
pub mod funcs;
pub mod logging;
pub mod plan;
pub mod template;
pub mod timefmt;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;
use error::Result;
use glob::Pattern;
use owo_colors::OwoColorize;

use crate::apply::{apply_moves, MoveReport, Outcome};
use crate::funcs::Helpers;
use crate::plan::build_file_list;
use crate::template::Template;

/// Move files matching a glob into an output directory, naming each by a template.
///
/// Templates use `{{ ... }}` actions over `.From`, `.To` and `.Info` (`Name`, `Size`, `Mode`, `ModTime`, `IsDir`)
/// with helpers `count`, `ext`, `chTimes`, `parseTime`, `printf`, `print` and `len`.
/// Nothing is moved, created or re-stamped when `--dry-run` is given.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about)]
pub struct Args {
    /// Input directory.
    #[arg(short, long, default_value = ".")]
    pub input: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Glob matched against each file's base name.
    #[arg(short, long, default_value = "*")]
    pub pattern: String,

    /// Recurse into child directories.
    #[arg(short, long)]
    pub recursive: bool,

    /// Show what would happen, but don't touch any file.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Output file template, relative to the output directory.
    #[arg(short, long, default_value = "{{ .Info.Name }}")]
    pub template: String,
}

/// Accept the single-dash long spelling `-dry-run` alongside `--dry-run`.
pub fn normalize_flags<I>(args: I) -> Vec<OsString>
    where I: IntoIterator<Item = OsString> {
    args.into_iter()
        .map(|arg| if arg == "-dry-run" { OsString::from("--dry-run") } else { arg })
        .collect()
}

/// Application code.  (main in lib.rs)
///
/// Fatal errors (pattern, template, walk, collision) return early; per-file failures are in the reports.
#[tracing::instrument]
pub fn app(args: &Args) -> Result<Vec<MoveReport>> {
    print_config(args);

    let pattern = Pattern::new(&args.pattern)?;
    let mut helpers = Helpers::new(args.dry_run);
    let template = Template::parse(&args.template, &helpers)?;

    let planned = build_file_list(&args.input, &pattern, args.recursive, &args.output, &template, &mut helpers)?;
    tracing::debug!("{} files planned, {} timestamp changes", planned.len(), helpers.timestamp_changes().len());

    let reports = apply_moves(&planned, &args.output, args.dry_run);
    print_summary(&reports);
    Ok(reports)
}

fn print_config(args: &Args) {
    println!("Input Directory:  {}", args.input.display().cyan());
    println!("Input Pattern:    {}", args.pattern.cyan());
    println!("Output Directory: {}", args.output.display().cyan());
    println!("Output Template:  {}", args.template.cyan());
    println!();

    if args.dry_run {
        println!("{}", "*** DRY RUN ***".yellow().bold());
        println!();
    }
}

fn print_summary(reports: &[MoveReport]) {
    let moved = reports.iter().filter(|r| r.outcome == Outcome::Moved).count();
    let failed = reports.iter().filter(|r| r.outcome.is_failure()).count();
    println!();
    println!("{} files planned, {} moved, {} failed", reports.len().cyan(), moved.green(), failed.red());
}

#[cfg(test)]
pub mod tests {
    use assert_fs::prelude::*;
    use predicates::prelude::*;
    use test_log::test;

    use super::*;

    /// `a.txt`, `b.txt`, `sub/c.txt`
    fn utility_test_dir_gen() -> assert_fs::TempDir {
        let tempdir = assert_fs::TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "sub/c.txt"] {
            tempdir.child(name).write_str(name).unwrap();
        }
        tempdir
    }

    fn args_for(dir: &assert_fs::TempDir, extra: &[&str]) -> Args {
        let input = dir.path().to_string_lossy().into_owned();
        let output = dir.path().join("output").to_string_lossy().into_owned();
        let mut argv = vec!["tmpl_mv", "-i", input.as_str(), "-o", output.as_str()];
        argv.extend_from_slice(extra);
        Args::parse_from(normalize_flags(argv.into_iter().map(OsString::from)))
    }

    #[test]
    fn defaults_match_documented_flags() {
        let args = Args::parse_from(["tmpl_mv"]);
        assert_eq!(args.input, PathBuf::from("."));
        assert_eq!(args.output, PathBuf::from("./output"));
        assert_eq!(args.pattern, "*");
        assert!(!args.recursive);
        assert!(!args.dry_run);
        assert_eq!(args.template, "{{ .Info.Name }}");
    }

    #[test]
    fn single_dash_dry_run_is_accepted() {
        let argv = ["tmpl_mv", "-dry-run", "-r"].map(OsString::from);
        let args = Args::parse_from(normalize_flags(argv));
        assert!(args.dry_run);
        assert!(args.recursive);
    }

    #[test]
    fn live_run_moves_matching_files() {
        let dir = utility_test_dir_gen();
        let reports = app(&args_for(&dir, &["-p", "*.txt"])).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].created_dir, Some(dir.path().join("output")));
        assert_eq!(reports[1].created_dir, None);
        assert!(reports.iter().all(|r| r.outcome == Outcome::Moved));
        dir.child("output/a.txt").assert("a.txt");
        dir.child("output/b.txt").assert("b.txt");
        dir.child("a.txt").assert(predicate::path::missing());
        dir.child("sub/c.txt").assert(predicate::path::exists());
    }

    #[test]
    fn recursive_run_with_extension_folders() {
        let dir = utility_test_dir_gen();
        dir.child("photo.JPG").touch().unwrap();
        let reports = app(&args_for(&dir, &["-r", "-t", "{{ ext .Info.Name }}/{{ .Info.Name }}"])).unwrap();

        assert_eq!(reports.len(), 4);
        dir.child("output/.JPG/photo.JPG").assert(predicate::path::exists());
        dir.child("output/.txt/c.txt").assert("sub/c.txt");
    }

    #[test]
    fn dry_run_reports_same_plan_without_mutation() {
        let template = r#"{{ chTimes .From (parseTime "2006-01-02" "2001-02-03") }}{{ count "%02d" }}-{{ .Info.Name }}"#;
        let dry = utility_test_dir_gen();
        let before = std::fs::metadata(dry.child("a.txt").path()).unwrap().modified().unwrap();
        let dry_reports = app(&args_for(&dry, &["-dry-run", "-r", "-t", template])).unwrap();

        assert!(dry_reports.iter().all(|r| r.outcome == Outcome::DryRun));
        dry.child("output").assert(predicate::path::missing());
        dry.child("a.txt").assert("a.txt");
        assert_eq!(std::fs::metadata(dry.child("a.txt").path()).unwrap().modified().unwrap(), before);

        let live = utility_test_dir_gen();
        let live_reports = app(&args_for(&live, &["-r", "-t", template])).unwrap();
        let relative = |dir: &assert_fs::TempDir, reports: &[MoveReport]| -> Vec<PathBuf> {
            reports.iter().map(|r| r.planned.to.strip_prefix(dir.path()).unwrap().to_path_buf()).collect()
        };
        assert_eq!(relative(&dry, &dry_reports), relative(&live, &live_reports));
        live.child("output/03-c.txt").assert("sub/c.txt");
    }

    #[test]
    fn fatal_errors_abort_before_any_move() {
        let dir = utility_test_dir_gen();
        assert!(app(&args_for(&dir, &["-p", "[a"])).is_err());
        assert!(app(&args_for(&dir, &["-t", "{{ nosuch }}"])).is_err());
        assert!(app(&args_for(&dir, &["-t", "{{ .Info.Nope }}"])).is_err());
        assert!(app(&args_for(&dir, &["-t", "flat"])).unwrap_err().to_string().contains("collision"));
        dir.child("a.txt").assert(predicate::path::exists());
        dir.child("output").assert(predicate::path::missing());
    }
}
