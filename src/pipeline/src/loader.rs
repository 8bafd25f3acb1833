//! Reads the plugin directory layout and builds a [`Registry`] from a
//! caller-supplied, compiled-in table of processor factories.
//!
//! A plugin is a sub-directory containing a `manifest.json` sidecar; the
//! concrete [`Processor`] itself is never loaded as a shared object --
//! this crate only ever links against processors known at compile time,
//! so the manifest's `processor_class` (or, absent that, its `name`) is
//! just a key into `factories`.

use crate::PipelineError;
use flowline_core::Processor;
use flowline_registry::Registry;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A factory function producing a fresh instance of a compiled-in
/// processor. Registered under the name the manifest's `processor_class`
/// (or `name`, if unset) should resolve to.
pub type ProcessorFactory = fn() -> Box<dyn Processor>;

/// The parsed contents of a plugin's `manifest.json`.
#[derive(Debug, Deserialize)]
pub struct PluginManifest {
    /// The processor's unique name.
    pub name: String,
    /// The compiled-in factory key, if different from `name`.
    #[serde(default)]
    pub processor_class: Option<String>,
    /// A human-readable display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// A short description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Enumerate `plugin_dir`'s top-level sub-directories (skipping any whose
/// name begins with `.` or `_`), reading each one's `manifest.json`. A
/// missing manifest is non-fatal -- the directory name becomes the
/// processor's name and every other field stays unset.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if `plugin_dir` cannot be read, or
/// [`PipelineError::Manifest`] if a present manifest is malformed JSON.
pub fn discover_plugins(plugin_dir: &Path) -> Result<Vec<PluginManifest>, PipelineError> {
    let mut manifests = Vec::new();

    if !plugin_dir.exists() {
        return Ok(manifests);
    }

    let mut entries: Vec<_> = fs::read_dir(plugin_dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }

        let manifest_path = entry.path().join("manifest.json");
        let manifest = if manifest_path.is_file() {
            let contents = fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&contents)?
        } else {
            PluginManifest {
                name: name.into_owned(),
                processor_class: None,
                display_name: None,
                description: None,
            }
        };
        manifests.push(manifest);
    }

    Ok(manifests)
}

/// Build a [`Registry`] from every plugin `discover_plugins` finds,
/// resolving each through `factories` and calling `Processor::on_load` as
/// [`Registry::register`] registers it.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownProcessorClass`] if a manifest names a
/// factory key not present in `factories`, or a registry error if two
/// plugins register the same name.
pub fn load_registry(
    plugin_dir: &Path,
    factories: &HashMap<String, ProcessorFactory>,
) -> Result<Registry, PipelineError> {
    let manifests = discover_plugins(plugin_dir)?;
    let mut registry = Registry::new();

    for manifest in manifests {
        let key = manifest.processor_class.as_deref().unwrap_or(&manifest.name);
        let factory = factories
            .get(key)
            .ok_or_else(|| PipelineError::UnknownProcessorClass(key.to_owned()))?;
        registry.register(factory())?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discover_plugins_skips_dotfiles_and_underscored_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("frontmatter-update")).unwrap();
        fs::write(
            dir.path().join("frontmatter-update/manifest.json"),
            r#"{"name": "frontmatter-update", "processor_class": "FrontmatterUpdate"}"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join(".disabled")).unwrap();
        fs::create_dir(dir.path().join("_archive")).unwrap();

        let manifests = discover_plugins(dir.path()).unwrap();

        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "frontmatter-update");
        assert_eq!(manifests[0].processor_class.as_deref(), Some("FrontmatterUpdate"));
    }

    #[test]
    fn test_discover_plugins_defaults_missing_manifest_to_dir_name() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("shell-command")).unwrap();

        let manifests = discover_plugins(dir.path()).unwrap();

        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "shell-command");
        assert!(manifests[0].processor_class.is_none());
    }

    #[test]
    fn test_discover_plugins_missing_directory_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        assert!(discover_plugins(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_load_registry_reports_unknown_processor_class() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("mystery")).unwrap();
        fs::write(
            dir.path().join("mystery/manifest.json"),
            r#"{"name": "mystery", "processor_class": "Mystery"}"#,
        )
        .unwrap();

        let factories: HashMap<String, ProcessorFactory> = HashMap::new();
        let err = load_registry(dir.path(), &factories).unwrap_err();

        assert!(matches!(err, PipelineError::UnknownProcessorClass(name) if name == "Mystery"));
    }
}
