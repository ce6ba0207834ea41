//! On-disk plugin cache: a JSON object mapping class name to plugin name.
//!
//! An empty plugin string means the class is registered but its providing
//! plugin could not be determined.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use super::RegistryError;

pub type PluginMap = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct PluginCache {
    path: PathBuf,
}

impl PluginCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the cache file does not exist or is empty.
    pub fn load(&self) -> Result<Option<PluginMap>, RegistryError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RegistryError::Cache(format!("cannot read {}: {e}", self.path.display()))),
        };
        let map: PluginMap = serde_json::from_str(&raw)
            .map_err(|e| RegistryError::Cache(format!("invalid cache {}: {e}", self.path.display())))?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    /// Write the whole map, replacing the previous file.
    pub fn save(&self, map: &PluginMap) -> Result<(), RegistryError> {
        let io_err = |e: std::io::Error| RegistryError::Cache(format!("cannot write {}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| RegistryError::Cache(format!("cannot encode cache: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RegistryError::Cache(format!("cannot remove {}: {e}", self.path.display()))),
        }
    }
}

/// Exact lookup first, then ASCII case-insensitive.
pub fn lookup<'a>(map: &'a PluginMap, class_name: &str) -> Option<(&'a str, &'a str)> {
    map.get_key_value(class_name)
        .or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(class_name)))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let cache = PluginCache::new(tmp.path().join("plugin_cache.json"));
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let tmp = TempDir::new().unwrap();
        let cache = PluginCache::new(tmp.path().join("nested/plugin_cache.json"));
        let mut map = PluginMap::new();
        map.insert("MechanicalObject".into(), "Sofa.Component.StateContainer".into());
        map.insert("Mystery".into(), String::new());
        cache.save(&map).unwrap();
        assert_eq!(cache.load().unwrap(), Some(map));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plugin_cache.json");
        fs::write(&path, "not json").unwrap();
        let err = PluginCache::new(path).load().unwrap_err();
        assert!(err.to_string().contains("invalid cache"));
    }

    #[test]
    fn clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let cache = PluginCache::new(tmp.path().join("plugin_cache.json"));
        cache.save(&PluginMap::from([("A".to_string(), "P".to_string())])).unwrap();
        cache.clear().unwrap();
        cache.clear().unwrap();
        assert!(!cache.path().exists());
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive() {
        let map = PluginMap::from([("UniformMass".to_string(), "Sofa.Component.Mass".to_string())]);
        assert_eq!(lookup(&map, "UniformMass"), Some(("UniformMass", "Sofa.Component.Mass")));
        assert_eq!(lookup(&map, "uniformmass"), Some(("UniformMass", "Sofa.Component.Mass")));
        assert_eq!(lookup(&map, "DiagonalMass"), None);
    }
}
