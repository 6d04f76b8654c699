use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::debug;

/// Where module images come from.
pub trait ImageSource {
    /// Every image available under `name`, best first.
    fn images(&self, name: &str) -> Vec<Vec<u8>>;

    /// Text of the symbol side file for `name`, if any.
    fn symbol_map(&self, name: &str) -> Option<String>;
}

/// Searches `<root>/vm/<name>.qvm` across a list of roots, in order.
#[derive(Debug, Clone, Default)]
pub struct DirImageSource {
    roots: Vec<PathBuf>,
}

impl DirImageSource {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { roots: roots.into_iter().map(Into::into).collect() }
    }

    fn candidates(&self, name: &str, ext: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let file = format!("{name}.{ext}");
        self.roots.iter().map(move |root| root.join("vm").join(&file))
    }
}

impl ImageSource for DirImageSource {
    fn images(&self, name: &str) -> Vec<Vec<u8>> {
        self.candidates(name, "qvm")
            .filter_map(|path| match fs::read(&path) {
                Ok(bytes) => {
                    debug!(path = %path.display(), "found image");
                    Some(bytes)
                }
                Err(_) => None,
            })
            .collect()
    }

    fn symbol_map(&self, name: &str) -> Option<String> {
        self.candidates(name, "map").find_map(|path| fs::read_to_string(path).ok())
    }
}

/// Images registered directly by the host. Later registrations under the
/// same name are tried after earlier ones.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageSource {
    images: HashMap<String, Vec<Vec<u8>>>,
    maps: HashMap<String, String>,
}

impl MemoryImageSource {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) -> &mut Self {
        self.images.entry(name.to_string()).or_default().push(bytes);
        self
    }

    pub fn insert_map(&mut self, name: &str, text: impl Into<String>) -> &mut Self {
        self.maps.insert(name.to_string(), text.into());
        self
    }

    /// Drops every image registered under `name`.
    pub fn remove(&mut self, name: &str) {
        self.images.remove(name);
        self.maps.remove(name);
    }
}

impl ImageSource for MemoryImageSource {
    fn images(&self, name: &str) -> Vec<Vec<u8>> {
        self.images.get(name).cloned().unwrap_or_default()
    }

    fn symbol_map(&self, name: &str) -> Option<String> { self.maps.get(name).cloned() }
}
