use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::config::DEFAULT_KMS_KEY;

/// Delimiter used for StringList values in tabular files.
pub const LIST_DELIMITER: char = ';';
/// Delimiter the parameter store uses for StringList values.
pub const STORE_LIST_DELIMITER: char = ',';

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    String,
    StringList,
    SecureString,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::String => "String",
            ParameterType::StringList => "StringList",
            ParameterType::SecureString => "SecureString",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-sensitive: only the exact store spellings are accepted.
impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "String" => Ok(ParameterType::String),
            "StringList" => Ok(ParameterType::StringList),
            "SecureString" => Ok(ParameterType::SecureString),
            other => Err(format!(
                "unknown parameter type '{}' (expected String, StringList or SecureString)",
                other
            )),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Standard,
    Advanced,
    IntelligentTiering,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Standard
    }
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Standard => "Standard",
            Tier::Advanced => "Advanced",
            Tier::IntelligentTiering => "Intelligent-Tiering",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard" => Ok(Tier::Standard),
            "Advanced" => Ok(Tier::Advanced),
            "Intelligent-Tiering" => Ok(Tier::IntelligentTiering),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// A parameter definition to be written to the store.
///
/// `value` of a `StringList` is kept in the semicolon form used by tabular files and only
/// converted to the store's comma form by [`ParameterRecord::wire_value`].
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub key: String,
    pub value: String,
    pub kind: ParameterType,
    pub tier: Tier,
    pub kms_key_id: Option<String>,
}

impl ParameterRecord {
    pub fn new(key: &str, value: &str, kind: ParameterType) -> Self {
        ParameterRecord {
            key: key.to_string(),
            value: value.to_string(),
            kind,
            tier: Tier::Standard,
            kms_key_id: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_kms_key(mut self, kms_key_id: &str) -> Self {
        self.kms_key_id = Some(kms_key_id.to_string());
        self
    }

    /// Checks the record invariants; the error text is suitable for a validation report.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("key must not be empty".to_string());
        }
        if !self.key.starts_with('/') {
            return Err(format!("key '{}' must start with '/'", self.key));
        }
        match (&self.kind, &self.kms_key_id) {
            (ParameterType::SecureString, _) | (_, None) => Ok(()),
            (_, Some(kms)) if kms.is_empty() => Ok(()),
            (kind, Some(kms)) => Err(format!("KMS key '{}' is only allowed on SecureString, not {}", kms, kind)),
        }
    }

    /// KMS key to send on put: the record's own key or `default_kms` for SecureString, nothing otherwise.
    pub fn resolved_kms_key(&self, default_kms: &str) -> Option<String> {
        match self.kind {
            ParameterType::SecureString => Some(
                self.kms_key_id
                    .as_ref()
                    .filter(|k| !k.is_empty())
                    .cloned()
                    .unwrap_or_else(|| {
                        if default_kms.is_empty() { DEFAULT_KMS_KEY.to_string() } else { default_kms.to_string() }
                    }),
            ),
            _ => None,
        }
    }

    /// Value as transmitted to the store.
    pub fn wire_value(&self) -> String {
        match self.kind {
            ParameterType::StringList => to_store_list(&self.value),
            _ => self.value.clone(),
        }
    }
}

/// Snapshot of a parameter as held by the remote store.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RemoteParameter {
    pub key: String,
    pub value: String,
    pub kind: ParameterType,
    pub version: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub tier: Option<Tier>,
    pub kms_key_id: Option<String>,
}

impl RemoteParameter {
    /// Value in the tabular (semicolon) convention.
    pub fn tabular_value(&self) -> String {
        match self.kind {
            ParameterType::StringList => from_store_list(&self.value),
            _ => self.value.clone(),
        }
    }
}

/// Case-insensitive substring match used by `list --filter`.
pub fn key_matches(key: &str, filter: &str) -> bool {
    key.to_lowercase().contains(&filter.to_lowercase())
}

pub fn to_store_list(value: &str) -> String {
    value
        .split(LIST_DELIMITER)
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(&STORE_LIST_DELIMITER.to_string())
}

pub fn from_store_list(value: &str) -> String {
    value.split(STORE_LIST_DELIMITER).collect::<Vec<_>>().join(&LIST_DELIMITER.to_string())
}
