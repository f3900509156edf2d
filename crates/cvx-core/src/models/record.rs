//! Structured résumé record produced by the LLM.
//!
//! JSON keys follow the French schema consumed by the document templates.
//! Every field defaults when missing so that a partially conformant model
//! answer can still be read as a record.

use serde::{Deserialize, Deserializer, Serialize};

/// Top-level keys the extraction prompt requires.
pub const REQUIRED_KEYS: [&str; 6] = [
    "nom",
    "titre",
    "competences",
    "experience_professionnelle",
    "formation",
    "langues",
];

/// A structured résumé.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredRecord {
    /// Display name: first initial, dot, first three letters of the surname.
    #[serde(rename = "nom")]
    pub display_name: String,

    /// Title generated from the overall profile.
    #[serde(rename = "titre")]
    pub title: String,

    /// Categorized competencies.
    #[serde(rename = "competences")]
    pub competencies: Competencies,

    /// Work history, in document order.
    #[serde(rename = "experience_professionnelle")]
    pub experiences: Vec<Experience>,

    /// Education history, in document order.
    #[serde(rename = "formation")]
    pub education: Vec<Education>,

    /// Language proficiencies, e.g. "Anglais – Courant".
    #[serde(rename = "langues")]
    pub languages: Vec<String>,

    /// Present only when the source has a professional skills section.
    #[serde(
        rename = "competences_professionnelles",
        skip_serializing_if = "Option::is_none"
    )]
    pub professional_skills: Option<Vec<String>>,

    /// Present only when the source has a certifications section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certifications: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Competencies {
    #[serde(rename = "langages_programmation")]
    pub programming_languages: Vec<String>,

    #[serde(rename = "logiciels_techniques")]
    pub technical_software: Vec<String>,

    #[serde(rename = "competences_generales")]
    pub general: Vec<String>,

    #[serde(rename = "competences_manageriales")]
    pub managerial: Vec<String>,
}

/// One position held.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    #[serde(rename = "titre_poste")]
    pub role: String,

    #[serde(rename = "entreprise")]
    pub employer: String,

    #[serde(rename = "periode")]
    pub period: String,

    /// Flat description, used when the position has no client missions.
    #[serde(
        deserialize_with = "text_or_lines",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    /// Client missions carried out within the position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missions: Option<Vec<Mission>>,
}

/// A client engagement inside a position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mission {
    pub client: String,

    #[serde(rename = "periode")]
    pub period: String,

    #[serde(deserialize_with = "text_or_lines", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    #[serde(rename = "diplome")]
    pub degree: String,

    #[serde(rename = "etablissement")]
    pub institution: String,

    pub dates: String,
}

/// How a position's content is laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExperienceDetail<'a> {
    Description(&'a str),
    Missions(&'a [Mission]),
    Empty,
}

impl Experience {
    /// Missions take precedence over the flat description when both are present.
    pub fn detail(&self) -> ExperienceDetail<'_> {
        match (&self.missions, &self.description) {
            (Some(missions), _) if !missions.is_empty() => ExperienceDetail::Missions(missions),
            (_, Some(description)) => ExperienceDetail::Description(description),
            _ => ExperienceDetail::Empty,
        }
    }
}

impl StructuredRecord {
    /// Read a record from an arbitrary JSON value, tolerating missing keys.
    ///
    /// Returns `None` only when a present key has an incompatible shape.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Required top-level keys absent from a parsed model answer.
pub fn missing_required_keys(value: &serde_json::Value) -> Vec<String> {
    let Some(object) = value.as_object() else {
        return REQUIRED_KEYS.iter().map(|k| k.to_string()).collect();
    };

    REQUIRED_KEYS
        .iter()
        .filter(|key| !object.contains_key(**key))
        .map(|key| key.to_string())
        .collect()
}

/// Models sometimes return bullet points as an array instead of one string.
fn text_or_lines<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(
        Option::<TextOrLines>::deserialize(deserializer)?.map(|value| match value {
            TextOrLines::Text(text) => text,
            TextOrLines::Lines(lines) => lines.join("\n"),
        }),
    )
}
