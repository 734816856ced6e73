// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the shared configuration file.
pub const CONFIG_FILE_NAME: &str = "changer-rs.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),

    #[error("Config file {0} has no [{1}] section")]
    MissingSection(PathBuf, &'static str),
}

/// Default search paths for `changer-rs.toml`
/// (current directory, XDG config, /etc).
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("changer-rs").join(CONFIG_FILE_NAME));
    }
    paths.push(PathBuf::from("/etc/changer-rs").join(CONFIG_FILE_NAME));
    paths
}

/// Extract and deserialize section `key` from TOML text.
///
/// `origin` only labels errors. Returns `Ok(None)` when the section is
/// absent.
pub fn parse_section<T: DeserializeOwned>(
    content: &str,
    key: &str,
    origin: &Path,
) -> Result<Option<T>, ConfigError> {
    let parse_err =
        |e: &dyn std::fmt::Display| ConfigError::ParseError(origin.to_path_buf(), e.to_string());

    let mut table: toml::Table = toml::from_str(content).map_err(|e| parse_err(&e))?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };

    // Deserialize through the value so the section's serde defaults apply.
    section.try_into::<T>().map(Some).map_err(|e| parse_err(&e))
}

fn load_section_from_file<T: DeserializeOwned>(
    path: &Path,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key, path)
}

/// Trait for loading configuration from a `changer-rs.toml` section.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Section key in `changer-rs.toml` (e.g. `"changer-server"`).
    fn section_key() -> &'static str;

    /// Load the section from a specific file path. A file without the
    /// section is an error.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        load_section_from_file::<Self>(path, Self::section_key())?
            .ok_or_else(|| ConfigError::MissingSection(path.to_path_buf(), Self::section_key()))
    }

    /// Load the first default path that contains the section.
    ///
    /// Returns `(Default::default(), None)` when no file has it.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in config_search_paths() {
            if path.exists() {
                if let Some(cfg) = load_section_from_file::<Self>(&path, Self::section_key())? {
                    return Ok((cfg, Some(path)));
                }
            }
        }
        Ok((Self::default(), None))
    }

    /// Load `explicit` if given, otherwise search the default paths.
    fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match explicit {
            Some(path) => Ok((Self::load_from_file(path)?, Some(path.to_path_buf()))),
            None => Self::load_from_default_paths(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    impl ConfigFile for Sample {
        fn section_key() -> &'static str {
            "sample"
        }
    }

    #[test]
    fn test_parse_section_applies_defaults() {
        let toml = "[sample]\nname = \"a\"\n\n[other]\nx = 1\n";
        let parsed: Option<Sample> = parse_section(toml, "sample", Path::new("t.toml")).unwrap();
        assert_eq!(
            parsed,
            Some(Sample {
                name: "a".to_string(),
                count: 0
            })
        );
    }

    #[test]
    fn test_parse_section_absent() {
        let parsed: Option<Sample> =
            parse_section("[other]\nx = 1\n", "sample", Path::new("t.toml")).unwrap();
        assert_eq!(parsed, None);
    }

    #[test]
    fn test_parse_section_invalid() {
        let toml = "[sample]\ncount = \"many\"\n";
        let err = parse_section::<Sample>(toml, "sample", Path::new("t.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_, _)));
    }

    #[test]
    fn test_load_from_file_requires_section() {
        let path =
            std::env::temp_dir().join(format!("changer-app-test-{}.toml", std::process::id()));
        std::fs::write(&path, "[other]\nx = 1\n").unwrap();
        let err = Sample::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(_, "sample")));

        std::fs::write(&path, "[sample]\ncount = 3\n").unwrap();
        let (cfg, found) = Sample::load(Some(&path)).unwrap();
        assert_eq!(cfg.count, 3);
        assert_eq!(found.as_deref(), Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Sample::load_from_file(Path::new("/nonexistent/changer-rs.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_, _)));
    }
}
