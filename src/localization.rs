//! Minimal key-based string lookup used for dispatcher error replies.
//!
//! Grounded in `original_source/src/util/localization.py`: a flat
//! `language -> key -> value` table loaded from `key=value` resource files,
//! with lookups falling back to the quoted key itself when no translation
//! is on file. The full original also tracks a thread-local "current
//! language" and multiple search paths; this hub only needs the lookup
//! surface the dispatcher calls (`error.not.found.device` and friends), so
//! those are kept as the supported keys and everything else is data-driven.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

pub struct Localization {
    default_language: String,
    tables: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl Localization {
    pub fn new(default_language: &str) -> Self {
        Localization {
            default_language: default_language.to_string(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a `key=value` resource file into the table for `language`,
    /// merging with any keys already loaded for that language.
    pub fn load_file(&self, language: &str, path: &Path) -> std::io::Result<()> {
        let contents = fs::read_to_string(path)?;
        let mut tables = self.tables.write().unwrap();
        let table = tables.entry(language.to_string()).or_insert_with(HashMap::new);
        for line in contents.lines() {
            if let Some(idx) = line.find('=') {
                let key = line[..idx].trim().to_lowercase();
                let value = line[idx + 1..].trim().to_string();
                table.insert(key, value);
            }
        }
        Ok(())
    }

    /// Loads every `*.res` file in `dir`, naming the language after the
    /// file stem, same as the original's directory-of-resource-files setup.
    pub fn load_dir(&self, dir: &Path) -> std::io::Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.load_file(stem, &path)?;
            }
        }
        Ok(())
    }

    pub fn localize(&self, key: &str) -> String {
        let tables = self.tables.read().unwrap();
        if let Some(table) = tables.get(&self.default_language) {
            if let Some(value) = table.get(&key.to_lowercase()) {
                return value.clone();
            }
        }
        format!("'{}'", key)
    }
}

impl Default for Localization {
    fn default() -> Self {
        Localization::new("en")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_quoted_key_when_missing() {
        let loc = Localization::new("en");
        assert_eq!(loc.localize("error.not.found.device"), "'error.not.found.device'");
    }

    #[test]
    fn resolves_loaded_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en.res");
        std::fs::write(&path, "error.not.found.device = No such device\n").unwrap();
        let loc = Localization::new("en");
        loc.load_file("en", &path).unwrap();
        assert_eq!(loc.localize("error.not.found.device"), "No such device");
    }
}
