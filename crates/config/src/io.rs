// SPDX-License-Identifier: Apache-2.0

//! I/O and construction entry points for [`Config`].

use crate::error::Error;
use crate::Config;
use std::path::Path;
use tracing::warn;

fn warn_ignored(path: &serde_ignored::Path<'_>) {
    let key = path.to_string();
    if key.split('.').next_back() == Some("pilot") {
        // Pilot runs are requested on the command line; a config field by
        // that name is a leftover from older tooling.
        warn!(key = %key, "`pilot` is not a configuration field; pass --pilot instead");
    } else {
        warn!(key = %key, "ignoring unknown configuration key");
    }
}

impl Config {
    /// Parses a [`Config`] from a YAML string. Unknown keys are ignored
    /// with a warning.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let de = serde_yaml::Deserializer::from_str(yaml);
        serde_ignored::deserialize(de, |path| warn_ignored(&path)).map_err(|e| {
            Error::ConfigMalformed {
                format: "YAML".to_owned(),
                details: e.to_string(),
            }
        })
    }

    /// Parses a [`Config`] from a JSON string. Unknown keys are ignored
    /// with a warning.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut de = serde_json::Deserializer::from_str(json);
        serde_ignored::deserialize(&mut de, |path| warn_ignored(&path)).map_err(|e| {
            Error::ConfigMalformed {
                format: "JSON".to_owned(),
                details: e.to_string(),
            }
        })
    }

    /// Loads, resolves, and validates the configuration document at `path`.
    ///
    /// The format is detected from the file extension (`.json`, `.yaml`,
    /// `.yml`; anything else is tried as YAML). Relative paths inside the
    /// document are resolved against the document's directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::ConfigMissing {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        let mut config = match extension.as_deref() {
            Some("json") => Self::from_json(&contents)?,
            _ => Self::from_yaml(&contents)?,
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let base = if base.as_os_str().is_empty() {
            Path::new(".")
        } else {
            base
        };
        config.resolve_paths(&std::path::absolute(base).map_err(|e| Error::FileRead {
            path: base.to_path_buf(),
            details: e.to_string(),
        })?);

        config.validate()?;
        Ok(config)
    }
}
