//! Provider GPlay : recherche, résolution et téléchargement des morceaux
//!
//! Le provider assemble les briques du crate :
//! - [`SessionManager`] pour tout appel au service (un seul nouvel essai après un 401)
//! - [`TrackResolver`] pour convertir les pistes en [`Song`]
//! - [`SongCache`] pour les lookups, alimenté aussi par les recherches
//!
//! Les erreurs du service ne traversent jamais le contrat [`Provider`] :
//! la recherche se dégrade en liste vide, les autres opérations renvoient
//! une [`PluginError`].

use crate::api::{ServiceConnector, TokenExchange};
use crate::cache::{SongCache, SongFetcher};
use crate::config_ext::GPlayConfigExt;
use crate::error::{GPlayError, Result};
use crate::models::Track;
use crate::resolver::TrackResolver;
use crate::session::SessionManager;
use pmoconfig::Config;
use pmosource::{
    async_trait, FileResource, InitStateWriter, Plugin, PluginError, Provider, Song,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identifiant du plugin, utilisé comme `Song::provider_id`
pub const PROVIDER_ID: &str = "gplay";

/// Nombre de résultats renvoyés par page de recherche
pub const SEARCH_PAGE_SIZE: usize = 30;

/// À partir de cet offset, deux pages sont demandées au service
const SECOND_PAGE_OFFSET: usize = 20;

/// Résout les morceaux absents du cache via la session
struct RemoteSongFetcher {
    session: Arc<SessionManager>,
    resolver: TrackResolver,
}

#[async_trait]
impl SongFetcher for RemoteSongFetcher {
    async fn fetch_song(&self, id: &str) -> Result<Song> {
        let track = self
            .session
            .authorized(move |service| async move { service.get_track(id).await })
            .await?;
        Ok(self.resolver.resolve(&track))
    }
}

type DownloadLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Verrou de téléchargement d'un morceau
///
/// L'entrée de la table est retirée quand le dernier détenteur la relâche.
struct DownloadSlot<'a> {
    locks: &'a DownloadLocks,
    id: String,
    lock: Arc<Mutex<()>>,
}

impl<'a> DownloadSlot<'a> {
    fn acquire(locks: &'a DownloadLocks, id: &str) -> Self {
        let lock = locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            locks,
            id: id.to_string(),
            lock,
        }
    }
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Seuls la table et ce slot détiennent encore le verrou
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

/// État construit par `initialize`
#[derive(Debug)]
struct Ready {
    resolver: TrackResolver,
    cache: SongCache,
    songs_dir: PathBuf,
}

/// Builder pour [`GPlayProvider`]
pub struct GPlayProviderBuilder {
    connector: Arc<dyn ServiceConnector>,
    exchange: Arc<dyn TokenExchange>,
    config: Option<Arc<Config>>,
    video_provider: Option<String>,
    refresh_cooldown: Option<Duration>,
}

impl GPlayProviderBuilder {
    /// Configuration à utiliser (par défaut la configuration globale)
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Identifiant du fournisseur vidéo installé, s'il y en a un
    pub fn video_provider(mut self, id: impl Into<String>) -> Self {
        self.video_provider = Some(id.into());
        self
    }

    /// Délai minimal entre deux rafraîchissements de token
    pub fn refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = Some(cooldown);
        self
    }

    pub fn build(self) -> GPlayProvider {
        let config = self.config.unwrap_or_else(pmoconfig::get_config);
        let mut session = SessionManager::new(self.connector, self.exchange, config.clone());
        if let Some(cooldown) = self.refresh_cooldown {
            session = session.with_refresh_cooldown(cooldown);
        }

        GPlayProvider {
            config,
            session: Arc::new(session),
            video_provider: self.video_provider,
            ready: OnceCell::new(),
            download_locks: StdMutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Provider de morceaux du service de streaming
pub struct GPlayProvider {
    config: Arc<Config>,
    session: Arc<SessionManager>,
    video_provider: Option<String>,
    ready: OnceCell<Ready>,
    download_locks: DownloadLocks,
    cancel: CancellationToken,
}

impl std::fmt::Debug for GPlayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GPlayProvider")
            .field("session", &self.session)
            .field("video_provider", &self.video_provider)
            .field("ready", &self.ready.get())
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl GPlayProvider {
    pub fn builder(
        connector: Arc<dyn ServiceConnector>,
        exchange: Arc<dyn TokenExchange>,
    ) -> GPlayProviderBuilder {
        GPlayProviderBuilder {
            connector,
            exchange,
            config: None,
            video_provider: None,
            refresh_cooldown: None,
        }
    }

    /// Session partagée avec le suggester
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn ready(&self) -> pmosource::Result<&Ready> {
        if self.cancel.is_cancelled() {
            return Err(PluginError::Closed(PROVIDER_ID.to_string()));
        }
        self.ready
            .get()
            .ok_or_else(|| PluginError::NotInitialized(PROVIDER_ID.to_string()))
    }

    /// Cache des morceaux, disponible après `initialize`
    pub fn cache(&self) -> Option<&SongCache> {
        self.ready.get().map(|ready| &ready.cache)
    }

    /// Récupère la piste du service correspondant à un identifiant
    pub async fn track(&self, id: &str) -> Result<Track> {
        if self.cancel.is_cancelled() {
            return Err(GPlayError::Cancelled);
        }
        self.session
            .authorized(move |service| async move { service.get_track(id).await })
            .await
    }

    /// Convertit une piste et l'ajoute au cache
    pub async fn song_from_track(&self, track: &Track) -> pmosource::Result<Song> {
        let ready = self.ready()?;
        let song = ready.resolver.resolve(track);
        ready.cache.put(song.id.clone(), song.clone()).await;
        Ok(song)
    }

    /// Nombre de morceaux en cours de chargement
    pub fn pending_loads(&self) -> usize {
        self.download_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    async fn build_ready(&self, writer: &dyn InitStateWriter) -> pmosource::Result<Ready> {
        writer.state("Obtaining storage dir");
        let songs_dir = self
            .config
            .get_gplay_songs_dir()
            .map_err(|e| PluginError::initialization_with("Unable to create song directory", e))?;

        writer.state("Creating cache");
        let cache_time = self
            .config
            .get_gplay_cache_time()
            .map_err(|e| PluginError::initialization_with("Invalid cache time", e))?;
        let show_videos = self
            .config
            .get_gplay_show_videos()
            .map_err(|e| PluginError::initialization_with("Invalid video setting", e))?;
        let resolver = TrackResolver::new(PROVIDER_ID)
            .with_video_delegation(show_videos, self.video_provider.clone());
        let fetcher = Arc::new(RemoteSongFetcher {
            session: self.session.clone(),
            resolver: resolver.clone(),
        });
        let cache = SongCache::new(fetcher, cache_time);

        writer.state("Logging in");
        if let Err(e) = self.session.login().await {
            writer.warning("Logging in failed!");
            return Err(PluginError::initialization_with("Login failed", e));
        }

        info!(songs_dir=%songs_dir.display(), videos=resolver.is_video_delegation_enabled(), "GPlay provider ready");
        Ok(Ready {
            resolver,
            cache,
            songs_dir,
        })
    }

    /// Télécharge la piste dans `tmp_path` puis la renomme en `path`
    async fn download(&self, id: &str, tmp_path: &Path, path: &Path) -> Result<()> {
        let quality = self.config.get_gplay_stream_quality()?;
        let track = self.track(id).await?;
        let track = &track;

        debug!("Downloading song {} at quality {}", id, quality);
        self.session
            .authorized(move |service| async move {
                service.download(track, quality, tmp_path).await
            })
            .await?;
        tokio::fs::rename(tmp_path, path).await?;

        info!("Downloaded song {} to {}", id, path.display());
        Ok(())
    }
}

/// Fenêtre `[offset, offset + 30)` des résultats
///
/// Le début est ramené à `len - 1` quand l'offset dépasse les résultats.
fn page(songs: Vec<Song>, offset: usize) -> Vec<Song> {
    let start = offset.min(songs.len().saturating_sub(1));
    let end = offset.saturating_add(SEARCH_PAGE_SIZE).min(songs.len());
    if start >= end {
        return Vec::new();
    }
    songs.into_iter().skip(start).take(end - start).collect()
}

fn is_safe_file_name(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

#[async_trait]
impl Plugin for GPlayProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "GPlayMusic"
    }

    fn description(&self) -> &str {
        "Provides songs from Google Play Music"
    }

    fn subject(&self) -> String {
        "Google Play Music".to_string()
    }

    async fn initialize(&self, writer: &dyn InitStateWriter) -> pmosource::Result<()> {
        self.ready
            .get_or_try_init(|| self.build_ready(writer))
            .await?;
        Ok(())
    }

    async fn close(&self) -> pmosource::Result<()> {
        info!("Closing GPlay provider");
        self.cancel.cancel();
        Ok(())
    }
}

#[async_trait]
impl Provider for GPlayProvider {
    async fn search(&self, query: &str, offset: usize) -> Vec<Song> {
        let ready = match self.ready() {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Search unavailable: {}", e);
                return Vec::new();
            }
        };

        let max_results = if offset < SECOND_PAGE_OFFSET {
            SEARCH_PAGE_SIZE
        } else {
            2 * SEARCH_PAGE_SIZE
        };
        debug!("Searching '{}' (offset {}, {} results)", query, offset, max_results);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(GPlayError::Cancelled),
            result = self.session.authorized(move |service| async move {
                service.search(query, max_results).await
            }) => result,
        };

        match result {
            Ok(tracks) => {
                let mut songs = Vec::with_capacity(tracks.len());
                for track in &tracks {
                    let song = ready.resolver.resolve(track);
                    ready.cache.put(song.id.clone(), song.clone()).await;
                    songs.push(song);
                }
                page(songs, offset)
            }
            Err(e) => {
                warn!("Error while searching with query '{}': {}", query, e);
                Vec::new()
            }
        }
    }

    async fn lookup(&self, id: &str) -> pmosource::Result<Song> {
        let ready = self.ready()?;
        ready
            .cache
            .get(id)
            .await
            .map_err(|e| PluginError::no_such_song(id, e))
    }

    async fn load_song(&self, song: &Song) -> pmosource::Result<FileResource> {
        let ready = self.ready()?;
        if !is_safe_file_name(&song.id) {
            return Err(PluginError::song_loading(GPlayError::Other(format!(
                "invalid song id '{}'",
                song.id
            ))));
        }

        let slot = DownloadSlot::acquire(&self.download_locks, &song.id);
        let _guard = slot.lock.lock().await;

        let path = ready.songs_dir.join(format!("{}.mp3", song.id));
        if tokio::fs::try_exists(&path)
            .await
            .map_err(PluginError::song_loading)?
        {
            debug!("Song {} already downloaded", song.id);
            return Ok(FileResource::new(path));
        }

        let tmp_path = ready.songs_dir.join(format!("{}.mp3.tmp", song.id));
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(GPlayError::Cancelled),
            result = self.download(&song.id, &tmp_path, &path) => result,
        };

        match result {
            Ok(()) => Ok(FileResource::new(path)),
            Err(e) => {
                warn!("Could not load song {}: {}", song.id, e);
                if let Err(remove_error) = tokio::fs::remove_file(&tmp_path).await {
                    if remove_error.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove {}: {}", tmp_path.display(), remove_error);
                    }
                }
                Err(PluginError::song_loading(e))
            }
        }
    }
}
