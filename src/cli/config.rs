//! Command-line interface configuration
//!
//! Configuration is read from `espmap.toml`, first in the current working
//! directory and then in the user's configuration directory. Every value is
//! optional and every command-line option takes precedence over it.
//!
//! ```toml
//! [scan]
//! canonical_offset = "0x9000"
//! stride = "0x1000"
//! limit = "0x40000"
//!
//! [report]
//! string_limit = 20
//! keywords = ["esp-idf:", "MyProject v"]
//!
//! [recon]
//! objdump = "/opt/xtensa/bin/xtensa-esp32s3-elf-objdump"
//! preferred_app = "ota_0"
//! ```

use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::{parse_int, Error},
    partition_table::ScanOptions,
    strings::default_keywords,
};

const CONFIG_FILE: &str = "espmap.toml";

/// Words which commonly appear near interesting code in application images
pub const DEFAULT_ANCHOR_WORDS: &[&str] = &[
    "Firmware", "Version", "MENU", "Scan", "Sleep", "WiFi", "Error",
];

/// Partition table discovery overrides
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Offset probed first and preferred when scoring
    #[serde(deserialize_with = "deserialize_opt_int")]
    pub canonical_offset: Option<usize>,
    /// Distance between probed offsets
    #[serde(deserialize_with = "deserialize_opt_int")]
    pub stride: Option<usize>,
    /// Offsets at or past this value are not probed
    #[serde(deserialize_with = "deserialize_opt_int")]
    pub limit: Option<usize>,
}

impl ScanConfig {
    /// Merge these settings over the defaults.
    pub fn scan_options(&self) -> Result<ScanOptions, Error> {
        let defaults = ScanOptions::default();
        let options = ScanOptions {
            canonical_offset: self.canonical_offset.unwrap_or(defaults.canonical_offset),
            stride: self.stride.unwrap_or(defaults.stride),
            scan_limit: self.limit.unwrap_or(defaults.scan_limit),
        };

        if options.stride == 0 {
            return Err(Error::InvalidScanStride);
        }

        Ok(options)
    }
}

/// Report rendering settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    /// Maximum number of strings listed in the report
    pub string_limit: usize,
    /// Strings containing any of these are listed first
    pub keywords: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            string_limit: 12,
            keywords: default_keywords(),
        }
    }
}

/// Recon bundle settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconConfig {
    /// Path to an Xtensa `objdump`
    pub objdump: Option<PathBuf>,
    /// Label of the app partition to extract when several decode
    pub preferred_app: String,
    /// Shortest string written to the string index
    pub min_string_len: usize,
    /// Strings containing any of these are copied to the behavior anchors
    pub anchor_words: Vec<String>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            objdump: None,
            preferred_app: String::from("app0"),
            min_string_len: 6,
            anchor_words: DEFAULT_ANCHOR_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Configuration loaded from `espmap.toml`
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scan: ScanConfig,
    pub report: ReportConfig,
    pub recon: ReconConfig,
}

impl Config {
    /// Load configuration from the configuration files, if any exist.
    pub fn load() -> Result<Self, Error> {
        for path in Self::search_paths() {
            if let Some(config) = Self::load_from(&path)? {
                debug!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from `path`, returning `None` if it does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, Error> {
        let raw_data = match read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::FileOpenError(path.to_path_buf(), e)),
        };

        let config = toml::from_str(&raw_data).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        debug!("Config: {:#?}", &config);

        Ok(Some(config))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = ProjectDirs::from("rs", "esp", "espmap") {
            paths.push(dirs.config_dir().join(CONFIG_FILE));
        }

        paths
    }
}

/// Accept either a TOML integer or a string such as `"0x8000"`.
fn deserialize_opt_int<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(usize),
        String(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(Some(value)),
        IntOrString::String(value) => parse_int(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
