//! Shared AWS credentials/config files: profile lookup and listing.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "default";

pub fn credentials_path() -> Option<PathBuf> {
    env::var_os("AWS_SHARED_CREDENTIALS_FILE")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join("credentials")))
}

pub fn config_path() -> Option<PathBuf> {
    env::var_os("AWS_CONFIG_FILE")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".aws").join("config")))
}

/// A parsed INI-style profile file, sections in file order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProfileFile {
    sections: Vec<(String, HashMap<String, String>)>,
}

impl ProfileFile {
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<(String, HashMap<String, String>)> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                sections.push((line[1..line.len() - 1].trim().to_string(), HashMap::new()));
                continue;
            }
            if let (Some((_, values)), Some(eq)) = (sections.last_mut(), line.find('=')) {
                values.insert(line[..eq].trim().to_string(), line[eq + 1..].trim().to_string());
            }
        }
        ProfileFile { sections }
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(ProfileFile::parse(&text))),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, values)| values.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|(name, _)| name == section)
    }

    /// Access key pair stored in `section`; `None` unless both halves are set.
    pub fn static_keys(&self, section: &str) -> Option<StaticKeys> {
        Some(StaticKeys {
            access_key_id: self.get(section, "aws_access_key_id")?.to_string(),
            secret_access_key: self.get(section, "aws_secret_access_key")?.to_string(),
            session_token: self.get(section, "aws_session_token").map(str::to_string),
        })
    }
}

/// Long-lived keys written directly into a profile section.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Section name a profile uses in the config file.
pub fn config_section(profile: &str) -> String {
    if profile == DEFAULT_PROFILE {
        DEFAULT_PROFILE.to_string()
    } else {
        format!("profile {}", profile)
    }
}

/// Profiles known to either file: `default` first, then credentials-file profiles, then
/// config-only profiles.
pub fn list_profiles_in(credentials: Option<&Path>, config: Option<&Path>) -> io::Result<Vec<String>> {
    let mut profiles: Vec<String> = Vec::new();
    let mut has_default = false;

    if let Some(file) = credentials.map(ProfileFile::load).transpose()?.and_then(|f| f) {
        has_default = true;
        for name in file.section_names().filter(|n| *n != DEFAULT_PROFILE) {
            if !profiles.iter().any(|p| p == name) {
                profiles.push(name.to_string());
            }
        }
    }
    if let Some(file) = config.map(ProfileFile::load).transpose()?.and_then(|f| f) {
        has_default |= file.has_section(DEFAULT_PROFILE);
        for name in file.section_names() {
            let name = match name.strip_prefix("profile ") {
                Some(name) => name.trim(),
                None => continue,
            };
            if name != DEFAULT_PROFILE && !profiles.iter().any(|p| p == name) {
                profiles.push(name.to_string());
            }
        }
    }
    if has_default {
        profiles.insert(0, DEFAULT_PROFILE.to_string());
    }
    Ok(profiles)
}

pub fn list_profiles() -> io::Result<Vec<String>> {
    list_profiles_in(credentials_path().as_deref(), config_path().as_deref())
}

/// Whether either file has a section for `profile`. Unlike the listing, a credentials file
/// without a `[default]` section does not define `default`.
pub fn profile_exists_in(profile: &str, credentials: Option<&Path>, config: Option<&Path>) -> io::Result<bool> {
    if let Some(credentials) = credentials {
        if has_credentials_section(profile, credentials)? {
            return Ok(true);
        }
    }
    match config.map(ProfileFile::load).transpose()?.and_then(|f| f) {
        Some(file) => Ok(file.has_section(&config_section(profile))),
        None => Ok(false),
    }
}

/// Whether the credentials file has a `[profile]` section of its own.
pub fn has_credentials_section(profile: &str, credentials: &Path) -> io::Result<bool> {
    Ok(ProfileFile::load(credentials)?.map_or(false, |file| file.has_section(profile)))
}

/// Static keys for `profile`: the credentials file section wins, then the profile's section
/// in the config file.
pub fn static_keys_in(profile: &str, credentials: Option<&Path>, config: Option<&Path>) -> io::Result<Option<StaticKeys>> {
    if let Some(file) = credentials.map(ProfileFile::load).transpose()?.and_then(|f| f) {
        if let Some(keys) = file.static_keys(profile) {
            return Ok(Some(keys));
        }
    }
    match config.map(ProfileFile::load).transpose()?.and_then(|f| f) {
        Some(file) => Ok(file.static_keys(&config_section(profile))),
        None => Ok(None),
    }
}

/// `region` configured for `profile` in the config file.
pub fn profile_region_in(profile: &str, config: &Path) -> Option<String> {
    ProfileFile::load(config)
        .ok()
        .and_then(|f| f)
        .and_then(|file| file.get(&config_section(profile), "region").map(str::to_string))
}
