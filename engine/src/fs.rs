// Copyright 2017 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::{Path, PathBuf};

use fnv::FnvHashSet as HashSet;

use crate::core::{Key, Storable, TypeId};

///
/// A directory path within a project tree. Paths are relative to the build root.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Dir(pub PathBuf);

impl Storable for Dir {}

///
/// A file path within a project tree.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct File(pub PathBuf);

impl Storable for File {}

///
/// An entry in a directory listing.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Stat {
    Dir(Dir),
    File(File),
}

impl Stat {
    pub fn path(&self) -> &Path {
        match self {
            &Stat::Dir(Dir(ref p)) => p,
            &Stat::File(File(ref p)) => p,
        }
    }
}

impl Storable for Stat {}

///
/// A specification of filenames to match against the project tree.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PathGlobs {
    pub include: Vec<String>,
    /// The product type produced by expanding this spec.
    pub ftype: TypeId,
}

impl PathGlobs {
    pub fn create(include: Vec<String>) -> PathGlobs {
        PathGlobs {
            include,
            ftype: TypeId::of::<Paths>(),
        }
    }
}

impl Storable for PathGlobs {}

///
/// The contents of a directory, sorted by path.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DirectoryListing(pub Vec<Stat>);

impl Storable for DirectoryListing {
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        match field {
            None => Some(
                self.0
                    .iter()
                    .map(|stat| match stat {
                        &Stat::Dir(ref d) => Key::new(d.clone()),
                        &Stat::File(ref f) => Key::new(f.clone()),
                    })
                    .collect(),
            ),
            Some(_) => None,
        }
    }
}

///
/// The contents of a file.
///
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FileContent {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FileContent(path={:?}, content={} bytes)",
            self.path,
            self.content.len(),
        )
    }
}

impl Storable for FileContent {}

///
/// The paths matched by a PathGlobs spec, sorted. Its natural member collection yields a
/// File subject per matched path.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Paths(pub Vec<PathBuf>);

impl Storable for Paths {
    fn project_multi(&self, field: Option<&str>) -> Option<Vec<Key>> {
        match field {
            None => Some(self.0.iter().map(|p| Key::new(File(p.clone()))).collect()),
            Some(_) => None,
        }
    }
}

///
/// True for the fixed set of (subject kind, product) pairs which are computed natively by
/// the filesystem collaborator rather than by tasks.
///
pub fn is_fs_pair(subject_type: &TypeId, product: &TypeId) -> bool {
    (*subject_type == TypeId::of::<Dir>() && *product == TypeId::of::<DirectoryListing>())
        || (*subject_type == TypeId::of::<File>() && *product == TypeId::of::<FileContent>())
        || (*subject_type == TypeId::of::<PathGlobs>() && *product == TypeId::of::<Paths>())
}

///
/// A deterministic view of a filesystem snapshot rooted at a build root: for the snapshot
/// observed, listings and expansions are stable and sorted.
///
pub trait ProjectTree: Send + Sync {
    fn scandir(&self, dir: &Dir) -> Result<Vec<Stat>, String>;

    fn read_file(&self, file: &File) -> Result<Vec<u8>, String>;

    fn expand(&self, globs: &PathGlobs) -> Result<Vec<PathBuf>, String>;
}

///
/// A ProjectTree implemented against the local filesystem.
///
pub struct PosixTree {
    pub build_root: PathBuf,
}

impl ProjectTree for PosixTree {
    fn scandir(&self, dir: &Dir) -> Result<Vec<Stat>, String> {
        let abs = self.build_root.join(&dir.0);
        let mut stats = Vec::new();
        let listing =
            std::fs::read_dir(&abs).map_err(|e| format!("Failed to scan {:?}: {}", abs, e))?;
        for entry in listing {
            let entry = entry.map_err(|e| format!("Failed to scan {:?}: {}", abs, e))?;
            let path = dir.0.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(|e| format!("Failed to stat {:?}: {}", path, e))?;
            if file_type.is_dir() {
                stats.push(Stat::Dir(Dir(path)));
            } else {
                stats.push(Stat::File(File(path)));
            }
        }
        stats.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(stats)
    }

    fn read_file(&self, file: &File) -> Result<Vec<u8>, String> {
        std::fs::read(self.build_root.join(&file.0))
            .map_err(|e| format!("Failed to read {:?}: {}", file.0, e))
    }

    fn expand(&self, globs: &PathGlobs) -> Result<Vec<PathBuf>, String> {
        let mut paths = Vec::new();
        for pattern in &globs.include {
            let abs = self.build_root.join(pattern);
            let abs = abs
                .to_str()
                .ok_or_else(|| format!("Non-utf8 glob: {:?}", abs))?
                .to_owned();
            let matches =
                glob::glob(&abs).map_err(|e| format!("Invalid glob {:?}: {}", pattern, e))?;
            for matched in matches {
                let path = matched.map_err(|e| format!("Failed to expand {:?}: {}", pattern, e))?;
                let relative = path
                    .strip_prefix(&self.build_root)
                    .map_err(|e| format!("Failed to expand {:?}: {}", pattern, e))?;
                paths.push(relative.to_path_buf());
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

///
/// Maps changed paths to the subjects whose Filesystem Nodes must be invalidated: the
/// path itself, plus each containing directory.
///
pub fn generate_subjects(paths: &[PathBuf]) -> HashSet<Key> {
    let mut subjects = HashSet::default();
    for path in paths {
        subjects.insert(Key::new(File(path.clone())));
        for dir in path.ancestors().skip(1) {
            subjects.insert(Key::new(Dir(dir.to_path_buf())));
        }
    }
    subjects
}
