//! Planning: walk the input tree, filter by glob, render each destination.

use std::collections::HashMap;
use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use glob::Pattern;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::template::{FuncMap, Scope, Template};

/// Metadata captured for a walked entry (symlinks are not followed).
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name:     String,
    pub size:     u64,
    pub mode:     FileMode,
    pub mod_time: DateTime<FixedOffset>,
    pub is_dir:   bool,
}

impl FileInfo {
    pub fn from_metadata(name: impl Into<String>, meta: &Metadata) -> std::io::Result<Self> {
        let mod_time = DateTime::<Local>::from(meta.modified()?).fixed_offset();
        Ok(FileInfo { name: name.into(),
                      size: meta.len(),
                      mode: FileMode::from_metadata(meta),
                      mod_time,
                      is_dir: meta.is_dir() })
    }
}

/// Unix-style mode bits (file type + permissions), printed like `ls -l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(u32);

const S_IFMT: u32 = 0o170_000;

impl FileMode {
    pub fn new(bits: u32) -> Self {
        FileMode(bits)
    }

    pub fn perm(self) -> u32 {
        self.0 & 0o777
    }

    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileMode(meta.mode())
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            0o040_000
        } else if ft.is_symlink() {
            0o120_000
        } else {
            0o100_000
        };
        let perm = if meta.permissions().readonly() { 0o444 } else { 0o666 };
        FileMode(kind | perm)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.0 & S_IFMT {
            0o040_000 => 'd',
            0o120_000 => 'L',
            0o010_000 => 'p',
            0o140_000 => 'S',
            0o060_000 => 'D',
            0o020_000 => 'c',
            _ => '-',
        };
        let mut out = String::with_capacity(10);
        out.push(kind);
        for (shift, chars) in [(6, b"rwx"), (3, b"rwx"), (0, b"rwx")] {
            let bits = (self.0 >> shift) & 0o7;
            for (i, c) in chars.iter().enumerate() {
                let set = bits & (0o4 >> i) != 0;
                out.push(if set { *c as char } else { '-' });
            }
        }
        f.write_str(&out)
    }
}

/// One matched file and where it is going.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMove {
    pub from: PathBuf,
    pub to:   PathBuf,
    pub info: FileInfo,
}

/// Lexically clean a path: drop `.`, fold `dir/..`, never touch the filesystem.
///
/// `./a/./b/../c` -> `a/c`, `/..` -> `/`, `` -> `.`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            _ => parts.push(component),
        }
    }
    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().collect()
}

/// Place a rendered name under `output_dir`.
///
/// Root and drive prefixes of the rendered name are dropped, so an absolute render
/// such as `/x/a.txt` still lands at `output_dir/x/a.txt`. Leading `..` left after
/// cleaning the render are dropped as well.
pub fn join_output(output_dir: &Path, rendered: &str) -> PathBuf {
    let relative: PathBuf = Path::new(rendered).components()
                                               .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                                               .collect();
    let relative: PathBuf = clean_path(&relative).components()
                                                 .filter(|c| !matches!(c, Component::ParentDir))
                                                 .collect();
    clean_path(&output_dir.join(relative))
}

/// Build a WalkDir object with depth limits based on the recurse flag.
///
/// Entries come in lexical order so plans are reproducible.
#[tracing::instrument]
pub fn walkdir_build_with_depths(root: &Path, does_recurse: bool) -> WalkDir {
    if does_recurse {
        tracing::debug!("Recursable WalkDir");
        return WalkDir::new(root).min_depth(1).sort_by_file_name();
    }

    tracing::debug!("non-recursing (shallow) WalkDir");
    WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name()
}

/// Walk `root` and plan a move for every non-directory entry whose base name matches `pattern`.
///
/// Walk, metadata and render errors abort; so does a second file rendering to an
/// already planned destination.
#[tracing::instrument(skip(template, funcs))]
pub fn build_file_list(root: &Path,
                       pattern: &Pattern,
                       recursive: bool,
                       output_dir: &Path,
                       template: &Template,
                       funcs: &mut impl FuncMap)
                       -> Result<Vec<PlannedMove>> {
    let mut planned = Vec::new();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

    for entry in walkdir_build_with_depths(root, recursive) {
        let entry = entry?;
        // Guard: directories are walked (or not) but never moved
        if entry.file_type().is_dir() {
            tracing::trace!("Skipping directory: {:?}", entry.path());
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        // Guard: no glob match
        if !pattern.matches(&name) {
            tracing::trace!("No Match for Entry: {:?}", entry.path());
            continue;
        }

        let planned_move = plan_entry(&entry, output_dir, template, funcs)?;
        if let Some(first) = claimed.insert(planned_move.to.clone(), planned_move.from.clone()) {
            return Err(format!("destination collision: {} and {} both render to {}",
                               first.display(),
                               planned_move.from.display(),
                               planned_move.to.display()).into());
        }
        tracing::debug!("planned {:?} -> {:?}", planned_move.from, planned_move.to);
        planned.push(planned_move);
    }

    Ok(planned)
}

fn plan_entry(entry: &DirEntry, output_dir: &Path, template: &Template, funcs: &mut impl FuncMap) -> Result<PlannedMove> {
    let meta = entry.metadata()?;
    let info = FileInfo::from_metadata(entry.file_name().to_string_lossy(), &meta)?;
    let from = clean_path(entry.path());
    let scope = Scope { from: from.to_string_lossy().into_owned(),
                        to:   String::new(),
                        info };
    let rendered = template.render(&scope, funcs)?;

    Ok(PlannedMove { to: join_output(output_dir, &rendered),
                     from,
                     info: scope.info })
}

#[cfg(test)]
mod tests {
    use assert_fs::prelude::*;
    use test_log::test;

    use super::*;
    use crate::funcs::Helpers;

    /// `a.txt`, `b.txt`, `notes.md`, `sub/c.txt`, `sub/deeper/d.txt`
    fn utility_test_dir_gen() -> assert_fs::TempDir {
        let tempdir = assert_fs::TempDir::new().unwrap();
        for name in ["a.txt", "b.txt", "notes.md", "sub/c.txt", "sub/deeper/d.txt"] {
            tempdir.child(name).touch().unwrap();
        }
        tempdir
    }

    fn plan(root: &Path, pattern: &str, recursive: bool, template: &str) -> Result<Vec<PlannedMove>> {
        let mut helpers = Helpers::new(true);
        let template = Template::parse(template, &helpers)?;
        build_file_list(root, &Pattern::new(pattern)?, recursive, Path::new("out"), &template, &mut helpers)
    }

    fn sources(root: &Path, planned: &[PlannedMove]) -> Vec<String> {
        planned.iter()
               .map(|p| p.from.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
               .collect()
    }

    #[test]
    fn shallow_walk_skips_subdirectories() {
        let dir = utility_test_dir_gen();
        let planned = plan(dir.path(), "*.txt", false, "{{ .Info.Name }}").unwrap();
        assert_eq!(sources(dir.path(), &planned), ["a.txt", "b.txt"]);
    }

    #[test]
    fn recursive_walk_visits_every_depth() {
        let dir = utility_test_dir_gen();
        let planned = plan(dir.path(), "*.txt", true, "{{ .Info.Name }}").unwrap();
        assert_eq!(sources(dir.path(), &planned), ["a.txt", "b.txt", "sub/c.txt", "sub/deeper/d.txt"]);
    }

    #[test]
    fn only_matching_names_are_planned() {
        let dir = utility_test_dir_gen();
        let planned = plan(dir.path(), "*", true, "{{ .Info.Name }}").unwrap();
        assert_eq!(planned.len(), 5);
        let planned = plan(dir.path(), "*.md", true, "{{ .Info.Name }}").unwrap();
        assert_eq!(sources(dir.path(), &planned), ["notes.md"]);
        let planned = plan(dir.path(), "?.txt", false, "{{ .Info.Name }}").unwrap();
        assert_eq!(planned.len(), 2);
        assert!(plan(dir.path(), "*.png", true, "{{ .Info.Name }}").unwrap().is_empty());
    }

    #[test]
    fn destination_is_output_joined_with_render() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("photo.JPG").write_str("jpeg").unwrap();

        let planned = plan(dir.path(), "*", false, "{{ ext .Info.Name }}/{{ .Info.Name }}").unwrap();
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].to, Path::new("out").join(".JPG/photo.JPG"));
        assert_eq!(planned[0].info.name, "photo.JPG");
        assert_eq!(planned[0].info.size, 4);
        assert!(!planned[0].info.is_dir);
    }

    #[test]
    fn destination_stays_under_output_for_any_render() {
        let out = Path::new("out");
        let test_cases = vec![("a.txt", "out/a.txt"),
                              ("./x/a.txt", "out/x/a.txt"),
                              ("/x/a.txt", "out/x/a.txt"),
                              ("x//./y/../a.txt", "out/x/a.txt"),
                              ("../../x/a.txt", "out/x/a.txt"),
                              ("/../a.txt", "out/a.txt"),
                              ("", "out")];
        for (rendered, expected) in test_cases {
            assert_eq!(join_output(out, rendered), Path::new(expected), "render {:?}", rendered);
        }
        assert_eq!(join_output(Path::new("./output"), "a.txt"), Path::new("output/a.txt"));
    }

    #[test]
    fn from_render_of_absolute_input_lands_under_output() {
        let dir = utility_test_dir_gen();
        let planned = plan(dir.path(), "*.txt", false, "{{ .From }}").unwrap();
        assert_eq!(planned.len(), 2);
        for p in &planned {
            assert!(p.to.starts_with("out"), "{:?} escaped the output root", p.to);
            assert_ne!(p.to, p.from);
            assert!(p.to.ends_with(p.from.strip_prefix("/").unwrap_or(&p.from)));
        }
    }

    #[test]
    fn sources_are_cleaned() {
        let dir = utility_test_dir_gen();
        let root = dir.path().join(".");
        let planned = plan(&root, "a.txt", false, "{{ .From }}|{{ .Info.Name }}").unwrap();
        assert_eq!(planned[0].from, dir.path().join("a.txt"));
        assert_eq!(clean_path(Path::new("./a.txt")), Path::new("a.txt"));
        assert_eq!(clean_path(Path::new("a/./b/../../..")), Path::new(".."));
        assert_eq!(clean_path(Path::new("/../a")), Path::new("/a"));
        assert_eq!(clean_path(Path::new(".")), Path::new("."));
    }

    #[test]
    fn counter_spans_files() {
        let dir = utility_test_dir_gen();
        let planned = plan(dir.path(), "*.txt", true, r#"{{ count "%02d" }}.txt"#).unwrap();
        let names: Vec<_> = planned.iter().map(|p| p.to.clone()).collect();
        let expected: Vec<_> = ["01.txt", "02.txt", "03.txt", "04.txt"].iter().map(|n| Path::new("out").join(n)).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn colliding_destinations_abort() {
        let dir = utility_test_dir_gen();
        let err = plan(dir.path(), "*.txt", false, "same.txt").unwrap_err();
        assert!(err.to_string().contains("destination collision"));
    }

    #[test]
    fn fatal_errors_propagate() {
        let dir = utility_test_dir_gen();
        assert!(plan(dir.path(), "[", false, "{{ .Info.Name }}").is_err());
        assert!(plan(dir.path(), "*", false, "{{ .Info.Nope }}").is_err());
        assert!(plan(&dir.path().join("missing"), "*", false, "{{ .Info.Name }}").is_err());
    }

    #[test]
    fn mode_prints_like_ls() {
        assert_eq!(FileMode::new(0o100_644).to_string(), "-rw-r--r--");
        assert_eq!(FileMode::new(0o040_755).to_string(), "drwxr-xr-x");
        assert_eq!(FileMode::new(0o120_777).to_string(), "Lrwxrwxrwx");
        assert_eq!(FileMode::new(0o100_640).perm(), 0o640);
    }
}
