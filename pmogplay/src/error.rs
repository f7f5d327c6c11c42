//! Gestion des erreurs pour le plugin GPlay

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Type Result personnalisé pour pmogplay
pub type Result<T> = std::result::Result<T, GPlayError>;

/// Erreurs possibles lors de l'utilisation du service de streaming
#[derive(Error, Debug)]
pub enum GPlayError {
    /// Token refusé ou expiré (401/403)
    #[error("Authorization failed: {0}")]
    Unauthorized(String),

    /// Ressource non trouvée (track, station)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Erreur renvoyée par le service
    #[error("Service error (code {code}): {message}")]
    ApiError { code: u16, message: String },

    /// Quota dépassé (rate limiting)
    #[error("Rate limit exceeded, please try again later")]
    RateLimitExceeded,

    /// Erreur d'entrée/sortie (téléchargement, fichiers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Échange de token impossible (credentials refusés, service injoignable)
    #[error("Token request failed: {0}")]
    TokenRequest(String),

    /// Rafraîchissement du token refusé : le précédent est trop récent
    #[error("Token request on cooldown, retry in {} seconds", .remaining.as_secs())]
    TokenCooldown { remaining: Duration },

    /// Aucune session ouverte (login pas encore fait ou échoué)
    #[error("Not logged in")]
    NotLoggedIn,

    /// Échec de résolution d'un morceau, partagé entre tous les appelants en attente
    #[error("Lookup of song {id} failed: {source}")]
    Lookup {
        id: String,
        #[source]
        source: Arc<GPlayError>,
    },

    /// Opération abandonnée car le composant a été fermé
    #[error("Operation cancelled")]
    Cancelled,

    /// Erreur générique
    #[error("GPlay error: {0}")]
    Other(String),
}

impl GPlayError {
    /// Crée une erreur depuis un code de statut HTTP et un message
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            401 | 403 => Self::Unauthorized(message.into()),
            404 => Self::NotFound(message.into()),
            429 => Self::RateLimitExceeded,
            _ => Self::ApiError {
                code,
                message: message.into(),
            },
        }
    }

    /// Vérifie si l'erreur signale un token refusé
    pub fn is_auth_error(&self) -> bool {
        match self {
            GPlayError::Unauthorized(_) => true,
            GPlayError::Lookup { source, .. } => source.is_auth_error(),
            _ => false,
        }
    }

    /// Vérifie si l'erreur est une erreur de rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GPlayError::RateLimitExceeded)
    }
}
