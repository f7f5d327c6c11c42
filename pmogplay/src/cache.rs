//! Cache en mémoire des morceaux résolus
//!
//! Chaque identifiant correspond soit à un morceau déjà résolu, soit à une
//! résolution en cours. Les appels concurrents pour un même identifiant
//! attendent la même résolution : une seule requête part vers le service.
//!
//! - Expiration après `cache_time` sans accès (60 minutes par défaut)
//! - Capacité initiale 256, maximale 1024, éviction du moins récemment utilisé
//! - Les échecs ne sont pas mis en cache : l'appel suivant relance une résolution

use crate::error::{GPlayError, Result};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::policy::EvictionPolicy;
use pmosource::Song;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Durée de vie par défaut d'une entrée inutilisée
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(60 * 60);

/// Capacité initiale du cache
pub const INITIAL_CAPACITY: usize = 256;

/// Nombre maximal de morceaux en cache
pub const MAX_CAPACITY: u64 = 1024;

/// Résolution d'un morceau absent du cache
#[async_trait]
pub trait SongFetcher: Send + Sync {
    async fn fetch_song(&self, id: &str) -> Result<Song>;
}

/// Cache des morceaux avec résolution unique par identifiant
#[derive(Clone)]
pub struct SongCache {
    songs: MokaCache<String, Song>,
    fetcher: Arc<dyn SongFetcher>,
}

impl SongCache {
    /// Crée un cache dont les entrées expirent après `cache_time` sans accès
    pub fn new(fetcher: Arc<dyn SongFetcher>, cache_time: Duration) -> Self {
        Self::with_capacity(fetcher, cache_time, MAX_CAPACITY)
    }

    /// Crée un cache avec une capacité maximale spécifique
    pub fn with_capacity(
        fetcher: Arc<dyn SongFetcher>,
        cache_time: Duration,
        max_capacity: u64,
    ) -> Self {
        let songs = MokaCache::builder()
            .initial_capacity(INITIAL_CAPACITY.min(max_capacity as usize))
            .max_capacity(max_capacity)
            .time_to_idle(cache_time)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self { songs, fetcher }
    }

    /// Récupère un morceau, en le résolvant s'il est absent
    ///
    /// # Errors
    ///
    /// `GPlayError::Lookup` portant l'identifiant et la cause ; tous les
    /// appelants qui attendaient la même résolution reçoivent la même cause.
    pub async fn get(&self, id: &str) -> Result<Song> {
        self.songs
            .try_get_with_by_ref(id, async {
                debug!("Song {} not in cache, fetching", id);
                self.fetcher.fetch_song(id).await
            })
            .await
            .map_err(|source| GPlayError::Lookup {
                id: id.to_string(),
                source,
            })
    }

    /// Ajoute ou remplace un morceau déjà résolu
    pub async fn put(&self, id: impl Into<String>, song: Song) {
        self.songs.insert(id.into(), song).await;
    }

    /// Retire un morceau du cache
    pub async fn invalidate(&self, id: &str) {
        self.songs.invalidate(id).await;
    }

    /// Indique si un morceau résolu et non expiré est présent
    ///
    /// Ne compte pas comme un accès : le délai d'expiration n'est pas repoussé.
    pub fn contains(&self, id: &str) -> bool {
        self.songs.contains_key(id)
    }

    /// Nombre d'entrées après application des évictions en attente
    pub async fn entry_count(&self) -> u64 {
        self.songs.run_pending_tasks().await;
        self.songs.entry_count()
    }
}

impl std::fmt::Debug for SongCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SongCache")
            .field("entries", &self.songs.entry_count())
            .finish()
    }
}
