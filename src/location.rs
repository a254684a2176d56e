// src/location.rs
//! Where resource references are resolved to bytes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::source::SourceLocator;

/// A place that may hold a resource by reference name.
pub trait ResourceLocation: Send + Sync {
    fn locate(&self, reference: &str) -> Option<SourceLocator>;
}

/// Searches under a root directory, then falls back to the reference as a plain path.
#[derive(Debug, Clone)]
pub struct FileSystemLocation {
    root: PathBuf,
}

impl FileSystemLocation {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceLocation for FileSystemLocation {
    fn locate(&self, reference: &str) -> Option<SourceLocator> {
        let under_root = self.root.join(reference);
        if under_root.is_file() {
            return Some(SourceLocator::File(under_root));
        }
        let as_given = PathBuf::from(reference);
        if as_given.is_file() {
            return Some(SourceLocator::File(as_given));
        }
        None
    }
}

/// Ordered list of locations; the first one that knows the reference wins.
#[derive(Clone, Default)]
pub struct ResourceLocations {
    locations: Vec<Arc<dyn ResourceLocation>>,
}

impl ResourceLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location<L: ResourceLocation + 'static>(mut self, location: L) -> Self {
        self.add(location);
        self
    }

    pub fn add<L: ResourceLocation + 'static>(&mut self, location: L) {
        self.locations.push(Arc::new(location));
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn resolve(&self, reference: &str) -> Result<SourceLocator> {
        self.locations
            .iter()
            .find_map(|loc| loc.locate(reference))
            .ok_or_else(|| Error::NotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemoryLocation(HashMap<&'static str, Vec<u8>>);

    impl ResourceLocation for MemoryLocation {
        fn locate(&self, reference: &str) -> Option<SourceLocator> {
            self.0.get(reference).map(|b| SourceLocator::from(b.clone()))
        }
    }

    #[test]
    fn first_location_wins() {
        let mut a = HashMap::new();
        a.insert("logo", vec![1u8]);
        let mut b = HashMap::new();
        b.insert("logo", vec![2u8]);
        b.insert("font", vec![3u8]);

        let locations = ResourceLocations::new()
            .with_location(MemoryLocation(a))
            .with_location(MemoryLocation(b));

        assert_eq!(locations.resolve("logo").unwrap(), SourceLocator::from(vec![1u8]));
        assert_eq!(locations.resolve("font").unwrap(), SourceLocator::from(vec![3u8]));
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let locations = ResourceLocations::new().with_location(FileSystemLocation::new("/nope"));
        match locations.resolve("ghost.png") {
            Err(Error::NotFound(r)) => assert_eq!(r, "ghost.png"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
