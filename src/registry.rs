use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One plugin offered by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogItem {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "misc".to_string()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "plugin")]
    plugins: Vec<CatalogItem>,
}

/// Source of the browsable plugin catalog.
pub trait CatalogSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<CatalogItem>>;
}

/// Catalog read from the locally cached registry file.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<cache_dir>/registry.toml`.
    pub fn default_location() -> Option<Self> {
        directories::ProjectDirs::from("", "", "muxpack")
            .map(|dirs| Self::new(dirs.cache_dir().join("registry.toml")))
    }
}

impl CatalogSource for FileCatalog {
    fn fetch(&self) -> Result<Vec<CatalogItem>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading registry cache {}", self.path.display()))?;
        let file: CatalogFile = toml::from_str(&text)
            .with_context(|| format!("parsing registry cache {}", self.path.display()))?;

        let mut items = file.plugins;
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(items)
    }
}

/// Distinct categories in first-seen order.
pub fn categories(items: &[CatalogItem]) -> Vec<String> {
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(&item.category) {
            seen.push(item.category.clone());
        }
    }
    seen
}
