//! Registered code artifacts.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::ArtifactId;

/// Longest accepted artifact name (matches the `name` column width).
pub const MAX_NAME_LEN: usize = 200;

/// Longest accepted `created_by` (matches the column width).
pub const MAX_CREATOR_LEN: usize = 120;

/// Metadata key that overrides the default `run` entry export.
pub const ENTRY_POINT_KEY: &str = "entry_point";

/// Source language of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// WebAssembly text, compiled once and cached.
    Compiled,
    /// Python, evaluated fresh on every call.
    Scripted,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Compiled => "compiled",
            Language::Scripted => "scripted",
        }
    }
}

impl core::fmt::Display for Language {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compiled" | "wat" | "wasm" | "java" => Ok(Language::Compiled),
            "scripted" | "python" | "py" | "js" => Ok(Language::Scripted),
            other => Err(DomainError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Lifecycle status of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Ready,
    Disabled,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Ready => "ready",
            ArtifactStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for ArtifactStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ready" => Ok(ArtifactStatus::Ready),
            "disabled" => Ok(ArtifactStatus::Disabled),
            other => Err(DomainError::validation(format!("unknown artifact status: {other}"))),
        }
    }
}

/// Registration input, validated before anything is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub name: String,
    pub language: Language,
    pub source: String,
    #[serde(default)]
    pub metadata: JsonValue,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewArtifact {
    pub fn new(name: impl Into<String>, language: Language, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language,
            source: source.into(),
            metadata: JsonValue::Object(Default::default()),
            created_by: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = Some(creator.into());
        self
    }

    /// Check required fields. Null metadata is normalized to an empty object.
    pub fn validate(mut self) -> DomainResult<Self> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name is required"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(DomainError::validation("name contains control characters"));
        }
        // `ArtifactRef::parse` reads these as ids.
        if name.parse::<ArtifactId>().is_ok() {
            return Err(DomainError::validation("name must not be a UUID"));
        }
        if let Some(creator) = &self.created_by {
            if creator.chars().count() > MAX_CREATOR_LEN {
                return Err(DomainError::validation(format!(
                    "created_by exceeds {MAX_CREATOR_LEN} characters"
                )));
            }
        }
        if self.source.trim().is_empty() {
            return Err(DomainError::validation("source is required"));
        }
        if self.metadata.is_null() {
            self.metadata = JsonValue::Object(Default::default());
        }
        match &self.metadata {
            JsonValue::Object(map) => {
                if let Some(entry) = map.get(ENTRY_POINT_KEY) {
                    if !entry.as_str().is_some_and(|s| !s.trim().is_empty()) {
                        return Err(DomainError::validation(
                            "metadata.entry_point must be a non-empty string",
                        ));
                    }
                }
            }
            _ => return Err(DomainError::validation("metadata must be an object")),
        }
        self.name = name.to_string();
        Ok(self)
    }
}

/// A named, language-tagged unit of submitted source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub id: ArtifactId,
    pub name: String,
    pub language: Language,
    pub source: String,
    pub metadata: JsonValue,
    pub status: ArtifactStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl CodeArtifact {
    /// Build a fresh `ready` artifact from validated input.
    pub fn from_new(new: NewArtifact) -> Self {
        Self {
            id: ArtifactId::new(),
            name: new.name,
            language: new.language,
            source: new.source,
            metadata: new.metadata,
            status: ArtifactStatus::Ready,
            created_at: Utc::now(),
            created_by: new.created_by,
        }
    }

    /// Explicit entry export declared at registration, if any.
    pub fn entry_point(&self) -> Option<&str> {
        self.metadata
            .get(ENTRY_POINT_KEY)
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_ready(&self) -> bool {
        self.status == ArtifactStatus::Ready
    }
}

/// How a caller names the artifact to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    Id(ArtifactId),
    Name(String),
}

impl ArtifactRef {
    /// Interpret a string as an id when it parses as one, otherwise as a name.
    pub fn parse(s: &str) -> Self {
        match s.parse::<ArtifactId>() {
            Ok(id) => ArtifactRef::Id(id),
            Err(_) => ArtifactRef::Name(s.to_string()),
        }
    }
}

impl core::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArtifactRef::Id(id) => write!(f, "{id}"),
            ArtifactRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<ArtifactId> for ArtifactRef {
    fn from(value: ArtifactId) -> Self {
        ArtifactRef::Id(value)
    }
}

impl From<&str> for ArtifactRef {
    fn from(value: &str) -> Self {
        ArtifactRef::Name(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn language_accepts_aliases() {
        assert_eq!("WAT".parse::<Language>().unwrap(), Language::Compiled);
        assert_eq!("java".parse::<Language>().unwrap(), Language::Compiled);
        assert_eq!(" python ".parse::<Language>().unwrap(), Language::Scripted);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(DomainError::UnsupportedLanguage(tag)) if tag == "cobol"
        ));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let blank_name = NewArtifact::new("  ", Language::Compiled, "(module)");
        assert!(matches!(blank_name.validate(), Err(DomainError::Validation(_))));

        let blank_source = NewArtifact::new("Demo", Language::Compiled, "\n");
        assert!(matches!(blank_source.validate(), Err(DomainError::Validation(_))));

        let bad_metadata =
            NewArtifact::new("Demo", Language::Compiled, "(module)").with_metadata(json!([1, 2]));
        assert!(matches!(bad_metadata.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_normalizes_name_and_null_metadata() {
        let new = NewArtifact::new(" Demo ", Language::Scripted, "x = 1")
            .with_metadata(JsonValue::Null)
            .validate()
            .unwrap();
        assert_eq!(new.name, "Demo");
        assert_eq!(new.metadata, json!({}));
    }

    #[test]
    fn entry_point_comes_from_metadata() {
        let new = NewArtifact::new("Demo", Language::Compiled, "(module)")
            .with_metadata(json!({ "entry_point": "main" }))
            .validate()
            .unwrap();
        let artifact = CodeArtifact::from_new(new);
        assert_eq!(artifact.entry_point(), Some("main"));
        assert!(artifact.is_ready());

        let empty_entry = NewArtifact::new("Demo", Language::Compiled, "(module)")
            .with_metadata(json!({ "entry_point": "" }));
        assert!(empty_entry.validate().is_err());
    }

    #[test]
    fn artifact_ref_prefers_ids() {
        let id = ArtifactId::new();
        assert_eq!(ArtifactRef::parse(&id.to_string()), ArtifactRef::Id(id));
        assert_eq!(ArtifactRef::parse("Demo"), ArtifactRef::Name("Demo".into()));
    }

    #[test]
    fn uuid_shaped_names_are_rejected() {
        let id = ArtifactId::new().to_string();
        let new = NewArtifact::new(&id, Language::Compiled, "(module)");
        assert!(matches!(new.validate(), Err(DomainError::Validation(_))));

        let upper = NewArtifact::new(id.to_uppercase(), Language::Compiled, "(module)");
        assert!(upper.validate().is_err());
    }

    #[test]
    fn created_by_is_bounded() {
        let at_limit = NewArtifact::new("Demo", Language::Compiled, "(module)")
            .created_by("o".repeat(MAX_CREATOR_LEN));
        assert!(at_limit.validate().is_ok());

        let over = NewArtifact::new("Demo", Language::Compiled, "(module)")
            .created_by("o".repeat(MAX_CREATOR_LEN + 1));
        assert!(matches!(over.validate(), Err(DomainError::Validation(_))));
    }

    proptest! {
        #[test]
        fn overlong_names_are_rejected(extra in 1usize..50) {
            let name = "x".repeat(MAX_NAME_LEN + extra);
            let new = NewArtifact::new(name, Language::Compiled, "(module)");
            prop_assert!(new.validate().is_err());
        }

        #[test]
        fn reasonable_names_survive_validation(name in "[A-Za-z][A-Za-z0-9_]{0,40}") {
            let new = NewArtifact::new(name.clone(), Language::Compiled, "(module)");
            prop_assert_eq!(new.validate().unwrap().name, name);
        }
    }
}
