//! Interfaces du SDK du service de streaming
//!
//! Le plugin ne parle jamais le protocole du service lui-même : il consomme
//! ces quelques traits, implémentés par l'adaptateur du SDK. Les tests les
//! implémentent avec des doubles en mémoire.
//!
//! - [`ServiceConnector`] : ouverture d'une session à partir d'un token
//! - [`MusicService`] : session ouverte (pistes + stations + changement de token)
//! - [`RemoteStation`] : une station radio créée côté serveur
//! - [`TokenExchange`] : obtention des tokens (handshake externe)

use crate::error::Result;
use crate::models::{AuthToken, StreamQuality, Track};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Accès aux pistes du catalogue
#[async_trait]
pub trait RemoteTrackService: Send + Sync {
    /// Récupère une piste par son identifiant
    async fn get_track(&self, id: &str) -> Result<Track>;

    /// Recherche des pistes, au plus `max_results`
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Track>>;

    /// Télécharge la piste dans `destination` à la qualité demandée
    async fn download(
        &self,
        track: &Track,
        quality: StreamQuality,
        destination: &Path,
    ) -> Result<()>;
}

/// Création de stations radio
#[async_trait]
pub trait RemoteStationService: Send + Sync {
    /// Crée une station alimentée par `seed`
    async fn create_station(
        &self,
        seed: &Track,
        name: &str,
        public: bool,
    ) -> Result<Box<dyn RemoteStation>>;
}

/// Station radio créée côté serveur
#[async_trait]
pub trait RemoteStation: Send + Sync {
    /// Identifiant de la station chez le service
    fn id(&self) -> &str;

    /// Demande des pistes à la station
    ///
    /// * `context` - pistes récemment jouées, que la station évite de reproposer
    /// * `recently_played` - tenir compte du contexte
    /// * `new_content` - préférer des recommandations fraîches
    async fn get_tracks(
        &self,
        context: &[Track],
        recently_played: bool,
        new_content: bool,
    ) -> Result<Vec<Track>>;

    /// Supprime la station côté serveur
    async fn delete(&self) -> Result<()>;
}

/// Session ouverte auprès du service
#[async_trait]
pub trait MusicService: RemoteTrackService + RemoteStationService {
    /// Remplace le token de la session ; l'ancien n'est plus utilisé
    async fn change_token(&self, token: &AuthToken) -> Result<()>;
}

/// Ouverture de session à partir d'un token
#[async_trait]
pub trait ServiceConnector: Send + Sync {
    /// Construit une session ; échoue si le service refuse le token
    async fn connect(&self, token: &AuthToken) -> Result<Arc<dyn MusicService>>;
}

/// Échange de credentials contre un token (handshake externe)
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Réutilise un token déjà obtenu ; `None` si le token n'est plus exploitable
    async fn provide_token_from_existing(&self, token: &str) -> Result<Option<AuthToken>>;

    /// Obtient un nouveau token à partir des credentials
    async fn provide_token(
        &self,
        username: &str,
        password: &str,
        device_id: &str,
    ) -> Result<AuthToken>;

    /// Date du dernier token obtenu par cet échange
    fn last_fetched_at(&self) -> Option<DateTime<Utc>>;
}
