//! Explicit site registry, built once and passed to whoever needs it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::site::{Site, SiteDefinition, SiteHooks};
use crate::types::{EngineError, EngineResult};

/// All known sites, keyed by id.
#[derive(Debug, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<String, Site>,
}

impl SiteRegistry {
    pub fn builder() -> SiteRegistryBuilder {
        SiteRegistryBuilder::default()
    }

    /// Load every `*.json` definition in `dir`.
    pub fn from_dir(dir: &Path) -> EngineResult<Self> {
        Self::builder().load_dir(dir)?.build()
    }

    pub fn get(&self, id: &str) -> EngineResult<&Site> {
        self.sites
            .get(id)
            .ok_or_else(|| EngineError::UnknownSite(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }

    pub fn sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.values()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[derive(Default)]
pub struct SiteRegistryBuilder {
    definitions: Vec<SiteDefinition>,
    hooks: HashMap<String, SiteHooks>,
}

impl SiteRegistryBuilder {
    pub fn definition(mut self, definition: SiteDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Attach hooks to the site with id `id`.
    pub fn hooks(mut self, id: &str, hooks: SiteHooks) -> Self {
        self.hooks.insert(id.to_string(), hooks);
        self
    }

    pub fn load_dir(mut self, dir: &Path) -> EngineResult<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let definition: SiteDefinition = serde_json::from_str(&text).map_err(|e| {
                EngineError::Config(format!("{}: {e}", path.display()))
            })?;
            tracing::debug!(site = %definition.id, path = %path.display(), "loaded site definition");
            self.definitions.push(definition);
        }
        Ok(self)
    }

    /// Validate every definition and assemble the registry.
    pub fn build(mut self) -> EngineResult<SiteRegistry> {
        let mut sites = BTreeMap::new();
        for definition in self.definitions {
            definition.validate()?;
            let id = definition.id.clone();
            if sites.contains_key(&id) {
                return Err(EngineError::Config(format!("duplicate site id '{id}'")));
            }
            let hooks = self.hooks.remove(&id).unwrap_or_default();
            sites.insert(id, Site::new(definition).with_hooks(hooks));
        }

        if let Some(orphan) = self.hooks.keys().next() {
            return Err(EngineError::Config(format!(
                "hooks given for unknown site '{orphan}'"
            )));
        }

        tracing::info!(count = sites.len(), "site registry ready");
        Ok(SiteRegistry { sites })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(id: &str) -> SiteDefinition {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "url": "https://example.org/"
        }))
        .unwrap()
    }

    #[test]
    fn test_builder_and_lookup() {
        let registry = SiteRegistry::builder()
            .definition(def("b"))
            .definition(def("a"))
            .hooks("a", SiteHooks::default().continue_pagination(|_| false))
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(registry.get("a").unwrap().hooks.continue_pagination.is_some());
        assert!(matches!(registry.get("zzz"), Err(EngineError::UnknownSite(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = SiteRegistry::builder()
            .definition(def("a"))
            .definition(def("a"))
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_orphan_hooks_rejected() {
        let result = SiteRegistry::builder()
            .definition(def("a"))
            .hooks("b", SiteHooks::default())
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
