//! Template loaders.
//!
//! A [`Loader`] resolves template names to source code.  Loaders return the
//! source together with an optional up-to-date checker; the environment's
//! template cache re-loads a template whose checker reports staleness.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, ErrorKind};

type UpToDateCheck = dyn Fn() -> bool + Send + Sync;

/// The result of a successful loader lookup.
pub struct LoaderSource {
    /// The template source code.
    pub source: String,
    /// Reports whether the source is still current.  `None` means the
    /// source never goes stale.
    pub up_to_date: Option<Box<UpToDateCheck>>,
}

impl LoaderSource {
    /// Creates a source without an up-to-date checker.
    pub fn new(source: impl Into<String>) -> LoaderSource {
        LoaderSource {
            source: source.into(),
            up_to_date: None,
        }
    }

    /// Creates a source with an up-to-date checker.
    pub fn with_checker<F>(source: impl Into<String>, checker: F) -> LoaderSource
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        LoaderSource {
            source: source.into(),
            up_to_date: Some(Box::new(checker)),
        }
    }
}

impl fmt::Debug for LoaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderSource")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolves template names to sources.
pub trait Loader: Send + Sync {
    /// Returns the source for a template or `None` when it does not exist.
    fn get_source(&self, name: &str) -> Result<Option<LoaderSource>, Error>;
}

/// A loader over a fixed name to source mapping.
#[derive(Debug, Clone, Default)]
pub struct MapLoader {
    templates: BTreeMap<String, String>,
}

impl MapLoader {
    /// Creates a map loader from an iterator of name/source pairs.
    pub fn new<I, N, S>(templates: I) -> MapLoader
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        MapLoader {
            templates: templates
                .into_iter()
                .map(|(name, source)| (name.into(), source.into()))
                .collect(),
        }
    }

    /// Adds a template to the loader.
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

impl Loader for MapLoader {
    fn get_source(&self, name: &str) -> Result<Option<LoaderSource>, Error> {
        Ok(self
            .templates
            .get(name)
            .map(|source| LoaderSource::new(source.clone())))
    }
}

/// Safely joins two paths.
///
/// Template names that escape the base directory (leading dots, backslash
/// segments) resolve to `None`.
pub(crate) fn safe_join(base: &Path, template: &str) -> Option<PathBuf> {
    let mut rv = base.to_path_buf();
    for segment in template.split('/') {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }
        rv.push(segment);
    }
    Some(rv)
}

/// Loads templates from one or more directories on the file system.
///
/// Lookups resolve relative to each search path in order; the up-to-date
/// checker compares the file's modification time.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    search_paths: Vec<PathBuf>,
}

impl FileSystemLoader {
    /// Creates a loader over a single directory.
    pub fn new(dir: impl AsRef<Path>) -> FileSystemLoader {
        FileSystemLoader {
            search_paths: vec![dir.as_ref().to_path_buf()],
        }
    }

    /// Creates a loader over multiple directories searched in order.
    pub fn with_paths<I, P>(paths: I) -> FileSystemLoader
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        FileSystemLoader {
            search_paths: paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
        }
    }
}

impl Loader for FileSystemLoader {
    fn get_source(&self, name: &str) -> Result<Option<LoaderSource>, Error> {
        for base in &self.search_paths {
            let path = match safe_join(base, name) {
                Some(path) => path,
                None => continue,
            };
            match fs::read_to_string(&path) {
                Ok(source) => {
                    let mtime = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    return Ok(Some(LoaderSource::with_checker(source, move || {
                        fs::metadata(&path)
                            .and_then(|m| m.modified())
                            .map(|current| current == mtime)
                            .unwrap_or(false)
                    })));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        "could not read template",
                    )
                    .with_source(err))
                }
            }
        }
        Ok(None)
    }
}

/// Tries a list of loaders in order.
#[derive(Clone, Default)]
pub struct ChainLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl ChainLoader {
    /// Creates an empty chain.
    pub fn new() -> ChainLoader {
        ChainLoader::default()
    }

    /// Appends a loader to the chain.
    pub fn push<L: Loader + 'static>(&mut self, loader: L) {
        self.loaders.push(Arc::new(loader));
    }
}

impl Loader for ChainLoader {
    fn get_source(&self, name: &str) -> Result<Option<LoaderSource>, Error> {
        for loader in &self.loaders {
            if let Some(source) = ok!(loader.get_source(name)) {
                return Ok(Some(source));
            }
        }
        Ok(None)
    }
}

pub(crate) struct FnLoader {
    f: Box<dyn for<'a> Fn(&'a str) -> Result<Option<String>, Error> + Send + Sync>,
}

impl FnLoader {
    pub fn new<F>(f: F) -> FnLoader
    where
        F: Fn(&str) -> Result<Option<String>, Error> + Send + Sync + 'static,
    {
        FnLoader { f: Box::new(f) }
    }
}

impl Loader for FnLoader {
    fn get_source(&self, name: &str) -> Result<Option<LoaderSource>, Error> {
        Ok(ok!((self.f)(name)).map(LoaderSource::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_safe_join() {
        assert_eq!(
            safe_join(Path::new("foo"), "bar/baz"),
            Some(PathBuf::from("foo").join("bar").join("baz"))
        );
        assert_eq!(safe_join(Path::new("foo"), ".bar/baz"), None);
        assert_eq!(safe_join(Path::new("foo"), "bar/.baz"), None);
        assert_eq!(safe_join(Path::new("foo"), "bar/../baz"), None);
    }

    #[test]
    fn test_map_loader() {
        let loader = MapLoader::new([("a.txt", "A")]);
        assert!(loader.get_source("a.txt").unwrap().is_some());
        assert!(loader.get_source("b.txt").unwrap().is_none());
    }

    #[test]
    fn test_chain_loader() {
        let mut chain = ChainLoader::new();
        chain.push(MapLoader::new([("a.txt", "A")]));
        chain.push(MapLoader::new([("b.txt", "B")]));
        assert_eq!(
            chain.get_source("b.txt").unwrap().unwrap().source,
            "B".to_string()
        );
        assert!(chain.get_source("c.txt").unwrap().is_none());
    }
}
