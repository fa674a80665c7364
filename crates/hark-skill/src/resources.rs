//! Filesystem resource lookup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hark_protocol::{ResourceCategory, ResourceResolver};
use tracing::debug;

const DEFAULT_LANG: &str = "en-us";

/// Resolves resources under a skill root.
///
/// Search order for `name` in `category`:
/// `<root>/<category>/<lang>/<name>`, `<root>/<category>/<name>`, then a
/// recursive search of `<root>/locale/<lang>`. A non-default language is
/// retried as `en-us`, and the fallback resolver (core resources) is asked
/// last.
#[derive(Clone)]
pub struct FileResourceResolver {
    root: PathBuf,
    lang: String,
    fallback: Option<Arc<dyn ResourceResolver>>,
}

impl FileResourceResolver {
    pub fn new(root: impl Into<PathBuf>, lang: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            lang: lang.into().to_lowercase(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ResourceResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Local path for `name`, without consulting the fallback.
    pub fn find(&self, name: &str, category: ResourceCategory) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_absolute() && direct.is_file() {
            return Some(direct.to_path_buf());
        }

        let mut langs = vec![self.lang.as_str()];
        if self.lang != DEFAULT_LANG {
            langs.push(DEFAULT_LANG);
        }
        langs
            .into_iter()
            .find_map(|lang| self.find_in_lang(name, category, lang))
    }

    fn find_in_lang(&self, name: &str, category: ResourceCategory, lang: &str) -> Option<PathBuf> {
        let category_dir = self.root.join(category.dir_name());
        [category_dir.join(lang).join(name), category_dir.join(name)]
            .into_iter()
            .find(|candidate| candidate.is_file())
            .or_else(|| search_tree(&self.root.join("locale").join(lang), name))
    }
}

impl ResourceResolver for FileResourceResolver {
    fn resolve(&self, name: &str, category: ResourceCategory) -> Option<String> {
        if let Some(path) = self.find(name, category) {
            return Some(file_uri(&path));
        }
        debug!(name, %category, root = %self.root.display(), "resource not found locally");
        self.fallback
            .as_ref()
            .and_then(|fallback| fallback.resolve(name, category))
    }
}

/// Depth-first search for a file named `name` under `dir`. `name` may
/// contain subdirectories.
fn search_tree(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if candidate.is_file() {
        return Some(candidate);
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    entries.sort();
    entries.iter().find_map(|sub| search_tree(sub, name))
}

/// `file://` URI for a path, made absolute against the working directory.
pub fn file_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", absolute.display())
}
