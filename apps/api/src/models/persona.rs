use std::collections::HashSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// A configured role-specific evaluator, owned by configuration storage.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Persona {
    pub id: Uuid,
    /// Unique key, also the label used in transcripts and verdict maps.
    pub name: String,
    pub display_name: String,
    pub system_prompt: String,
    pub is_active: bool,
}

/// Chat names that address the whole panel, so no persona may carry them.
pub const PANEL_ALIASES: [&str; 2] = ["all", "panel"];

pub fn is_panel_alias(name: &str) -> bool {
    PANEL_ALIASES.iter().any(|alias| name.eq_ignore_ascii_case(alias))
}

/// One `persona_name → prompt` entry of a run request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaPrompt {
    pub name: String,
    pub prompt: String,
}

/// The personas selected for a run, in request order.
///
/// Deserializes from a JSON object (`{"hr": "prompt", ...}`) and keeps the
/// document order of its keys, which defines `selected_personas` order.
/// Call [`PersonaSet::validate`] at the boundary before using it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonaSet(Vec<PersonaPrompt>);

impl PersonaSet {
    #[cfg(test)]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(name, prompt)| PersonaPrompt {
                    name: name.to_string(),
                    prompt: prompt.to_string(),
                })
                .collect(),
        )
    }

    /// Rejects empty sets, blank names or prompts, panel aliases and duplicate names.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.0.is_empty() {
            return Err(AppError::NoPersonasSelected);
        }
        let mut seen = HashSet::new();
        for entry in &self.0 {
            let name = entry.name.trim();
            if name.is_empty() {
                return Err(AppError::Validation(
                    "persona names cannot be empty".to_string(),
                ));
            }
            if is_panel_alias(name) {
                return Err(AppError::Validation(format!(
                    "'{name}' is reserved for the panel voice"
                )));
            }
            if entry.prompt.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "prompt for persona '{name}' cannot be empty"
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(AppError::Validation(format!(
                    "persona '{name}' is listed more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonaPrompt> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|p| p.name.trim().to_string()).collect()
    }
}

impl Serialize for PersonaSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in &self.0 {
            map.serialize_entry(&entry.name, &entry.prompt)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PersonaSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PersonaSetVisitor;

        impl<'de> Visitor<'de> for PersonaSetVisitor {
            type Value = PersonaSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping persona names to prompts")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, prompt)) = access.next_entry::<String, String>()? {
                    entries.push(PersonaPrompt { name, prompt });
                }
                Ok(PersonaSet(entries))
            }
        }

        deserializer.deserialize_map(PersonaSetVisitor)
    }
}
