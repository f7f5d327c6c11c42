//! Structures de données représentant les objets du service de streaming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Désérialiseur flexible pour les durées qui peuvent être des strings ou des integers
///
/// Le service renvoie `"durationMillis": "215000"` dans la plupart des réponses.
pub(crate) fn deserialize_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::custom(format!("invalid duration '{}'", s))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::custom("duration must be a positive integer")),
        _ => Err(Error::custom("duration must be a string or number")),
    }
}

/// Référence vers une image (pochette d'album)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    /// URL de l'image
    pub url: String,
}

/// Vidéo associée à une piste (hébergée par un autre fournisseur)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    /// Identifiant de la vidéo chez le fournisseur vidéo
    pub id: String,
}

/// Représente une piste telle que renvoyée par le service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Identifiant unique de la piste (commence par `T` pour le catalogue)
    #[serde(alias = "storeId", alias = "nid")]
    pub id: String,
    /// Titre de la piste
    pub title: String,
    /// Artiste principal
    #[serde(default)]
    pub artist: String,
    /// Durée en millisecondes
    #[serde(deserialize_with = "deserialize_millis")]
    pub duration_millis: u64,
    /// Pochettes d'album, la première est la plus pertinente
    #[serde(default)]
    pub album_art_ref: Option<Vec<ImageRef>>,
    /// Vidéo alternative si le service en connaît une
    #[serde(default, rename = "primaryVideo")]
    pub video: Option<Video>,
}

impl Track {
    /// Crée une piste minimale (sans pochette ni vidéo)
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_millis: u64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_millis,
            album_art_ref: None,
            video: None,
        }
    }

    /// URL de la première pochette, s'il y en a une
    pub fn album_art_url(&self) -> Option<&str> {
        self.album_art_ref
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|image| image.url.as_str())
    }
}

/// Qualité de streaming demandée au téléchargement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl StreamQuality {
    /// Toutes les qualités, de la plus basse à la plus haute
    pub const ALL: [StreamQuality; 3] = [
        StreamQuality::Low,
        StreamQuality::Medium,
        StreamQuality::High,
    ];

    /// Nom tel que stocké dans la configuration
    pub fn name(&self) -> &'static str {
        match self {
            StreamQuality::Low => "LOW",
            StreamQuality::Medium => "MEDIUM",
            StreamQuality::High => "HIGH",
        }
    }
}

impl fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Nom de qualité inconnu
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stream quality '{0}'")]
pub struct UnknownQuality(pub String);

impl FromStr for StreamQuality {
    type Err = UnknownQuality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamQuality::ALL
            .into_iter()
            .find(|quality| quality.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownQuality(s.to_string()))
    }
}

/// Token d'authentification et date d'obtention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Valeur opaque du token
    pub token: String,
    /// Date à laquelle le token a été obtenu
    pub fetched_at: DateTime<Utc>,
}

impl AuthToken {
    /// Token obtenu maintenant
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            fetched_at: Utc::now(),
        }
    }
}
