//! Locator to component registry.
//!
//! A locator is a relative, `/`-separated path under the bundles directory
//! without extension: `pages/home` refers to `pages/home.bundle.json`.
//!
//! Caching policy:
//! - [`CachePolicy::Forever`] loads a bundle on first use and keeps it for the
//!   lifetime of the process.
//! - [`CachePolicy::Reload`] checks the bundle file's modification time on
//!   every resolve and reloads it when the time changed. Used while developing
//!   alongside the watching bundler.
//!
//! Components installed with [`Registry::register`] are never reloaded.

use std::collections::HashMap;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use super::{Component, CompiledTemplate};
use crate::error::{Result, SsrError};
use crate::paths::{self, BUNDLE_EXTENSION};

/// Source of loadable bundles.
pub trait BundleLoader: Send + Sync {
    /// Load the component behind `locator`.
    fn load(&self, locator: &str) -> Result<Arc<dyn Component>>;

    /// Modification time of the bundle, used for reload checks.
    fn modified(&self, locator: &str) -> Result<Option<SystemTime>>;

    /// Every locator this loader can serve.
    fn locators(&self) -> Result<Vec<String>>;
}

/// Loads compiled templates from a bundles directory.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a locator to its bundle file, rejecting anything that could
    /// escape the root.
    pub fn bundle_path(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator);
        let valid = !locator.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, PathComponent::Normal(_)));
        if !valid {
            return Err(SsrError::InvalidLocator(locator.to_string()));
        }
        Ok(self
            .root
            .join(format!("{}.{}", locator, BUNDLE_EXTENSION)))
    }
}

impl BundleLoader for FileLoader {
    fn load(&self, locator: &str) -> Result<Arc<dyn Component>> {
        let path = self.bundle_path(locator)?;
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SsrError::BundleNotFound(locator.to_string()),
            _ => SsrError::Io(e),
        })?;
        let template: CompiledTemplate = serde_json::from_str(&content)?;
        tracing::debug!(locator, path = %path.display(), "Bundle loaded");
        Ok(Arc::new(template))
    }

    fn modified(&self, locator: &str) -> Result<Option<SystemTime>> {
        let path = self.bundle_path(locator)?;
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.modified().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SsrError::BundleNotFound(locator.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn locators(&self) -> Result<Vec<String>> {
        Ok(paths::find_files(&self.root, BUNDLE_EXTENSION)?
            .iter()
            .filter_map(|rel| paths::locator_for(rel))
            .collect())
    }
}

/// How long a loaded bundle stays cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    #[default]
    Forever,
    Reload,
}

struct Entry {
    component: Arc<dyn Component>,
    modified: Option<SystemTime>,
    pinned: bool,
}

/// Shared registry of render components.
pub struct Registry {
    loader: Box<dyn BundleLoader>,
    policy: CachePolicy,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new(loader: impl BundleLoader + 'static, policy: CachePolicy) -> Self {
        Self {
            loader: Box::new(loader),
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Install a component under `locator`, bypassing the loader.
    #[cfg(test)]
    pub fn register(&self, locator: impl Into<String>, component: Arc<dyn Component>) {
        self.entries.write().expect("registry lock poisoned").insert(
            locator.into(),
            Entry {
                component,
                modified: None,
                pinned: true,
            },
        );
    }

    /// Number of cached components.
    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    /// Resolve `locator` to a component, loading it if needed.
    ///
    /// May touch the filesystem; call from blocking context.
    pub fn resolve(&self, locator: &str) -> Result<Arc<dyn Component>> {
        {
            let entries = self.entries.read().expect("registry lock poisoned");
            if let Some(entry) = entries.get(locator) {
                if entry.pinned || self.policy == CachePolicy::Forever {
                    return Ok(entry.component.clone());
                }
                if self.loader.modified(locator)? == entry.modified {
                    return Ok(entry.component.clone());
                }
                tracing::debug!(locator, "Bundle changed on disk, reloading");
            }
        }

        let modified = self.loader.modified(locator)?;
        let component = self.loader.load(locator)?;
        self.entries.write().expect("registry lock poisoned").insert(
            locator.to_string(),
            Entry {
                component: component.clone(),
                modified,
                pinned: false,
            },
        );
        Ok(component)
    }

    /// Load every bundle the loader knows about.
    ///
    /// Each failure is logged; an error is returned if any bundle failed.
    pub fn preload(&self) -> Result<usize> {
        let locators = self.loader.locators()?;
        let total = locators.len();
        let mut failed = 0;

        for locator in &locators {
            if let Err(e) = self.resolve(locator) {
                tracing::error!(locator = %locator, error = %e, "Failed to preload bundle");
                failed += 1;
            }
        }

        tracing::info!(loaded = total - failed, failed, "Bundles preloaded");
        if failed > 0 {
            return Err(SsrError::Preload { failed, total });
        }
        Ok(total)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("policy", &self.policy)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Head;
    use serde_json::{Value, json};
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_bundle(root: &Path, locator: &str, source: &str) {
        let template = CompiledTemplate::compile(format!("{}.html", locator), source).unwrap();
        let path = root.join(format!("{}.{}", locator, BUNDLE_EXTENSION));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&template).unwrap()).unwrap();
    }

    fn render(component: &Arc<dyn Component>, props: Value) -> String {
        component.render(&props, &mut Head::new()).unwrap()
    }

    fn setup() -> (TempDir, FileLoader) {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileLoader::new(dir.path());
        (dir, loader)
    }

    #[test]
    fn test_bundle_path_rejects_escapes() {
        let loader = FileLoader::new("/srv/bundles");
        assert_eq!(
            loader.bundle_path("pages/home").unwrap(),
            PathBuf::from("/srv/bundles/pages/home.bundle.json")
        );
        for bad in ["", "/etc/passwd", "../secret", "pages/../../x", "./home"] {
            assert!(
                matches!(loader.bundle_path(bad), Err(SsrError::InvalidLocator(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_resolve_loads_and_caches() {
        let (dir, loader) = setup();
        write_bundle(dir.path(), "pages/home", "<h1>{{ title }}</h1>");

        let registry = Registry::new(loader, CachePolicy::Forever);
        let component = registry.resolve("pages/home").unwrap();
        assert_eq!(render(&component, json!({"title": "Hi"})), "<h1>Hi</h1>");
        assert_eq!(registry.len(), 1);

        // Forever ignores later changes on disk
        write_bundle(dir.path(), "pages/home", "<h2>changed</h2>");
        let again = registry.resolve("pages/home").unwrap();
        assert_eq!(render(&again, json!({"title": "Hi"})), "<h1>Hi</h1>");
    }

    #[test]
    fn test_reload_policy_picks_up_changes() {
        let (dir, loader) = setup();
        write_bundle(dir.path(), "page", "<p>v1</p>");

        let registry = Registry::new(loader, CachePolicy::Reload);
        assert_eq!(render(&registry.resolve("page").unwrap(), Value::Null), "<p>v1</p>");

        write_bundle(dir.path(), "page", "<p>v2</p>");
        let path = dir.path().join("page.bundle.json");
        let later = SystemTime::now() + Duration::from_secs(10);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(render(&registry.resolve("page").unwrap(), Value::Null), "<p>v2</p>");
    }

    #[test]
    fn test_unknown_locator_is_not_found() {
        let (_dir, loader) = setup();
        let registry = Registry::new(loader, CachePolicy::Forever);
        assert!(matches!(
            registry.resolve("missing"),
            Err(SsrError::BundleNotFound(ref l)) if l == "missing"
        ));
    }

    #[test]
    fn test_register_pins_component() {
        let (_dir, loader) = setup();
        let registry = Registry::new(loader, CachePolicy::Reload);
        let component = CompiledTemplate::compile("inline", "<p>inline</p>").unwrap();
        registry.register("inline", Arc::new(component));

        assert_eq!(
            render(&registry.resolve("inline").unwrap(), Value::Null),
            "<p>inline</p>"
        );
    }

    #[test]
    fn test_preload_reports_failures() {
        let (dir, loader) = setup();
        write_bundle(dir.path(), "a", "<p>a</p>");
        write_bundle(dir.path(), "nested/b", "<p>b</p>");
        std::fs::write(dir.path().join("broken.bundle.json"), "{ not json").unwrap();

        let registry = Registry::new(loader, CachePolicy::Forever);
        let err = registry.preload().unwrap_err();
        assert!(matches!(err, SsrError::Preload { failed: 1, total: 3 }));
        // Good bundles are still cached
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_preload_empty_dir() {
        let (_dir, loader) = setup();
        let registry = Registry::new(loader, CachePolicy::Forever);
        assert_eq!(registry.preload().unwrap(), 0);
        assert_eq!(registry.len(), 0);
    }
}
