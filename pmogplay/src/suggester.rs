//! Suggestions tirées d'une station radio du service
//!
//! Le suggester entretient une station créée côté serveur à partir du
//! dernier morceau mis en file par un utilisateur, et une file de
//! suggestions remplie à la demande depuis cette station. L'historique des
//! morceaux joués (200 au plus) est envoyé à la station pour qu'elle évite
//! de les reproposer.
//!
//! Tout l'état (station, historique, file) vit derrière un seul mutex
//! asynchrone.

use crate::api::RemoteStation;
use crate::config_ext::{GPlayConfigExt, DEFAULT_MAX_FETCH_ATTEMPTS, DEFAULT_RETRY_BACKOFF};
use crate::error::{GPlayError, Result};
use crate::models::Track;
use crate::provider::{GPlayProvider, PROVIDER_ID};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use pmosource::{
    async_trait, InitStateWriter, Plugin, PluginError, Provider, Song, SongEntry, Suggester,
};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Identifiant du suggester
pub const SUGGESTER_ID: &str = "gplay_station";

/// Taille maximale de l'historique des morceaux joués
pub const RECENTLY_PLAYED_MAX: usize = 200;

/// Plafond du délai entre deux demandes de pistes à la station
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Pistes de l'historique récupérées en parallèle
const CONTEXT_CONCURRENCY: usize = 8;

/// Morceau joué et, une fois récupérée, la piste correspondante
struct PlayedSong {
    song: Song,
    track: Option<Track>,
}

/// Politique de nouvel essai pour le remplissage de la file
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Default)]
struct StationState {
    station: Option<Box<dyn RemoteStation>>,
    seed_song_id: Option<String>,
    base_song: Option<Song>,
    last_suggested: Option<Song>,
    recently_played: IndexMap<String, PlayedSong>,
    suggestions: Vec<Song>,
    retry: RetryPolicy,
}

impl StationState {
    /// Ajoute à l'historique et retire de la file de suggestions
    fn record_played(&mut self, song: &Song) {
        if !self.recently_played.contains_key(&song.id) {
            if self.recently_played.len() >= RECENTLY_PLAYED_MAX {
                self.recently_played.shift_remove_index(0);
            }
            self.recently_played.insert(
                song.id.clone(),
                PlayedSong {
                    song: song.clone(),
                    track: None,
                },
            );
        }
        self.suggestions.retain(|s| s.id != song.id);
    }

    /// Vrai si un morceau mis en file doit seeder une nouvelle station
    fn should_recreate_on(&self, song: &Song) -> bool {
        let last_suggested = self.last_suggested.as_ref().map(|s| s.id.as_str());
        song.provider_id == PROVIDER_ID
            && last_suggested != Some(song.id.as_str())
            && self.seed_song_id.as_deref() != Some(song.id.as_str())
    }
}

/// Suggester basé sur une station radio
pub struct StationSuggester {
    provider: Arc<GPlayProvider>,
    state: Mutex<StationState>,
    base_title: StdRwLock<Option<String>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StationSuggester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationSuggester")
            .field("subject", &self.subject())
            .field("closed", &self.cancel.is_cancelled())
            .finish()
    }
}

impl StationSuggester {
    pub fn new(provider: Arc<GPlayProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(StationState::default()),
            base_title: StdRwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Nombre de morceaux dans l'historique
    pub async fn recently_played_len(&self) -> usize {
        self.state.lock().await.recently_played.len()
    }

    /// Identifiant du morceau sur lequel la station courante est basée
    pub async fn seed_song_id(&self) -> Option<String> {
        self.state.lock().await.seed_song_id.clone()
    }

    fn check_open(&self) -> pmosource::Result<()> {
        if self.cancel.is_cancelled() {
            Err(PluginError::Closed(SUGGESTER_ID.to_string()))
        } else {
            Ok(())
        }
    }

    /// Crée une station sur `song` et remplace la précédente
    ///
    /// En cas d'échec, l'ancienne station est conservée.
    async fn recreate_station(&self, state: &mut StationState, song: &Song) -> Result<()> {
        let track = self.provider.track(&song.id).await?;
        let track = &track;
        let name = format!("Station on {}", song.title);
        let name = name.as_str();

        let station = self
            .provider
            .session()
            .authorized(move |service| async move {
                service.create_station(track, name, false).await
            })
            .await?;
        info!("Created station {} on {}", station.id(), song.title);

        if let Some(old) = state.station.replace(station) {
            if let Err(e) = old.delete().await {
                warn!("Could not delete station {}: {}", old.id(), e);
            }
        }
        state.suggestions.clear();
        state.seed_song_id = Some(song.id.clone());
        state.base_song = Some(song.clone());
        *self.base_title.write().unwrap_or_else(|e| e.into_inner()) = Some(song.title.clone());

        if let Err(e) = self.provider.config().set_gplay_base_song(Some(&song.id)) {
            warn!("Could not persist base song {}: {}", song.id, e);
        }
        Ok(())
    }

    /// Pistes de l'historique, envoyées comme contexte à la station
    async fn context_tracks(&self, state: &mut StationState) -> Vec<Track> {
        let missing: Vec<String> = state
            .recently_played
            .values()
            .filter(|played| played.track.is_none() && played.song.provider_id == PROVIDER_ID)
            .map(|played| played.song.id.clone())
            .collect();

        let fetched: Vec<(String, Result<Track>)> = stream::iter(missing)
            .map(move |id| async move {
                let track = self.provider.track(&id).await;
                (id, track)
            })
            .buffered(CONTEXT_CONCURRENCY)
            .collect()
            .await;

        for (id, track) in fetched {
            match track {
                Ok(track) => {
                    if let Some(played) = state.recently_played.get_mut(&id) {
                        played.track = Some(track);
                    }
                }
                Err(e) => warn!("Error while fetching track {}: {}", id, e),
            }
        }

        state
            .recently_played
            .values()
            .filter_map(|played| played.track.clone())
            .collect()
    }

    /// Remplit la file jusqu'à `wanted` morceaux
    ///
    /// Les réponses en erreur ou sans nouveau morceau comptent comme des
    /// échecs ; après `max_attempts` échecs consécutifs la file est laissée
    /// telle quelle. Le délai entre deux essais double à chaque échec.
    ///
    /// # Errors
    ///
    /// `PluginError::Suggestion` si la file est toujours vide
    async fn fill(&self, state: &mut StationState, wanted: usize) -> pmosource::Result<()> {
        let retry = state.retry;
        let mut failures = 0;
        let mut backoff = retry.backoff;

        while state.suggestions.len() < wanted {
            self.check_open()?;
            let context = self.context_tracks(state).await;

            let response = {
                let station = state
                    .station
                    .as_ref()
                    .ok_or_else(|| PluginError::NotInitialized(SUGGESTER_ID.to_string()))?;
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(GPlayError::Cancelled),
                    response = station.get_tracks(&context, true, true) => response,
                }
            };

            match response {
                Ok(tracks) => {
                    let mut added = 0;
                    for track in &tracks {
                        let song = self.provider.song_from_track(track).await?;
                        if !state.suggestions.iter().any(|s| s.id == song.id) {
                            state.suggestions.push(song);
                            added += 1;
                        }
                    }
                    if added > 0 {
                        debug!("Station delivered {} new songs", added);
                        failures = 0;
                        backoff = retry.backoff;
                        continue;
                    }
                    warn!("Station returned no new songs");
                }
                Err(GPlayError::Cancelled) => {
                    return Err(PluginError::Closed(SUGGESTER_ID.to_string()));
                }
                Err(e) => {
                    error!("Error while fetching station songs: {}", e);
                    if e.is_auth_error() {
                        if let Err(refresh_error) = self.provider.session().refresh_if_allowed().await {
                            warn!("Token refresh not possible: {}", refresh_error);
                        }
                    }
                }
            }

            failures += 1;
            if failures >= retry.max_attempts {
                warn!(
                    "Giving up on station after {} failed attempts ({} songs buffered)",
                    failures,
                    state.suggestions.len()
                );
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(PluginError::Closed(SUGGESTER_ID.to_string()));
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        if state.suggestions.is_empty() && wanted > 0 {
            return Err(PluginError::Suggestion(format!(
                "station returned no songs after {} attempts",
                failures
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for StationSuggester {
    fn id(&self) -> &str {
        SUGGESTER_ID
    }

    fn name(&self) -> &str {
        "GPlayMusic Station"
    }

    fn description(&self) -> &str {
        "Suggest songs from a GPlayMusic station based on the last played song."
    }

    fn subject(&self) -> String {
        match self
            .base_title
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
        {
            Some(title) => format!("Based on {}", title),
            None => self.name().to_string(),
        }
    }

    async fn initialize(&self, writer: &dyn InitStateWriter) -> pmosource::Result<()> {
        self.check_open()?;
        let config = self.provider.config();

        writer.state("Reading station settings");
        let song_id = match config.get_gplay_base_song() {
            Ok(Some(id)) => id,
            _ => config.get_gplay_fallback_song().map_err(|e| {
                PluginError::initialization_with("Could not read fallback song", e)
            })?,
        };
        let retry = RetryPolicy {
            max_attempts: config
                .get_gplay_max_fetch_attempts()
                .unwrap_or(DEFAULT_MAX_FETCH_ATTEMPTS),
            backoff: config
                .get_gplay_retry_backoff()
                .unwrap_or(DEFAULT_RETRY_BACKOFF),
        };

        writer.state("Looking up base song");
        let base = self
            .provider
            .lookup(&song_id)
            .await
            .map_err(|e| PluginError::initialization_with("Could not find fallback song", e))?;

        writer.state("Creating station");
        let mut state = self.state.lock().await;
        state.retry = retry;
        self.recreate_station(&mut state, &base).await.map_err(|e| {
            writer.warning("Station creation failed!");
            PluginError::initialization_with(
                format!("Unable to create station on song {}", base.title),
                e,
            )
        })?;
        Ok(())
    }

    async fn close(&self) -> pmosource::Result<()> {
        self.cancel.cancel();
        let mut state = self.state.lock().await;
        if let Some(station) = state.station.take() {
            info!("Deleting station {}", station.id());
            if let Err(e) = station.delete().await {
                warn!("Could not delete station {}: {}", station.id(), e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Suggester for StationSuggester {
    async fn suggest_next(&self) -> pmosource::Result<Song> {
        self.check_open()?;
        let mut state = self.state.lock().await;

        let next = match self.fill(&mut state, 1).await {
            Ok(()) => state.suggestions.first().cloned(),
            Err(PluginError::Closed(id)) => return Err(PluginError::Closed(id)),
            Err(e) => {
                warn!("Falling back to base song: {}", e);
                None
            }
        };
        let next = next
            .or_else(|| state.base_song.clone())
            .ok_or_else(|| PluginError::NotInitialized(SUGGESTER_ID.to_string()))?;

        state.last_suggested = Some(next.clone());
        state.suggestions.retain(|s| s.id != next.id);
        Ok(next)
    }

    async fn get_next_suggestions(&self, max_length: usize) -> pmosource::Result<Vec<Song>> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        self.fill(&mut state, max_length).await?;
        Ok(state.suggestions.iter().take(max_length).cloned().collect())
    }

    async fn notify_played(&self, entry: &SongEntry) -> pmosource::Result<()> {
        self.check_open()?;
        let song = entry.song();
        let mut state = self.state.lock().await;
        state.record_played(song);

        if entry.is_queued() {
            if state.should_recreate_on(song) {
                if let Err(e) = self.recreate_station(&mut state, song).await {
                    error!(
                        "Error while creating station on {}, using old station: {}",
                        song.id, e
                    );
                }
            } else {
                debug!("Keeping station for {}", song.id);
            }
        }
        Ok(())
    }

    async fn remove_suggestion(&self, song: &Song) -> pmosource::Result<()> {
        self.check_open()?;
        self.state.lock().await.record_played(song);
        Ok(())
    }
}
