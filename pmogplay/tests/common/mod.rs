//! Doubles en mémoire du SDK du service, partagés par les tests d'intégration
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use pmoconfig::Config;
use pmogplay::{
    AuthToken, GPlayConfigExt, GPlayError, GPlayProvider, MusicService, RemoteStation,
    RemoteStationService, RemoteTrackService, Result, ServiceConnector, StreamQuality,
    TokenExchange, Track, Video,
};
use pmosource::{async_trait, InitStateWriter, Plugin};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FALLBACK: &str = "Tj6fhurtstzgdpvfm4xv6i5cei4";

/// Piste du catalogue qui possède une vidéo
pub const WITH_VIDEO: &str = "Tvideo";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pmogplay=debug")
        .with_test_writer()
        .try_init();
}

/// Ignore la progression de l'initialisation
pub struct NullWriter;

impl InitStateWriter for NullWriter {
    fn state(&self, _state: &str) {}
    fn warning(&self, _warning: &str) {}
}

fn track(id: &str) -> Track {
    Track::new(id, format!("Song {}", id), "Artist", 180_000)
}

/// État du service simulé, partagé avec les stations qu'il crée
///
/// Le catalogue contient `T0`..`T99`, le morceau de repli et [`WITH_VIDEO`]. Chaque appel est
/// compté ; `expire_token` fait échouer tous les appels en 401 jusqu'au
/// prochain `change_token`.
#[derive(Default)]
pub struct ServiceState {
    catalog: Mutex<HashMap<String, Track>>,
    pub expired: AtomicBool,
    pub get_track_calls: AtomicUsize,
    pub searches: Mutex<Vec<(String, usize)>>,
    pub downloads: AtomicUsize,
    pub download_delay: Mutex<Duration>,
    pub fail_downloads: AtomicBool,
    pub tokens: Mutex<Vec<String>>,
    pub created_stations: Mutex<Vec<String>>,
    pub deleted_stations: Mutex<Vec<String>>,
    pub fail_station_creation: AtomicBool,
    /// Nombre de prochains appels à `get_tracks` qui échouent
    pub station_failures: AtomicUsize,
    /// Les stations renvoient des listes vides
    pub station_empty: AtomicBool,
    pub station_fetches: AtomicUsize,
    pub last_context: Mutex<Vec<String>>,
    next_station_track: AtomicUsize,
}

impl ServiceState {
    pub fn expire_token(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub fn get_track_calls(&self) -> usize {
        self.get_track_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn station_fetches(&self) -> usize {
        self.station_fetches.load(Ordering::SeqCst)
    }

    pub fn created_stations(&self) -> Vec<String> {
        self.created_stations.lock().unwrap().clone()
    }

    pub fn deleted_stations(&self) -> Vec<String> {
        self.deleted_stations.lock().unwrap().clone()
    }

    fn check_token(&self) -> Result<()> {
        if self.expired.load(Ordering::SeqCst) {
            Err(GPlayError::from_status_code(401, "token expired"))
        } else {
            Ok(())
        }
    }

    fn station_tracks(&self, context: &[Track]) -> Result<Vec<Track>> {
        self.station_fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = context.iter().map(|t| t.id.clone()).collect();
        self.check_token()?;

        let remaining = self.station_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.station_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GPlayError::from_status_code(503, "station unavailable"));
        }
        if self.station_empty.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let mut catalog = self.catalog.lock().unwrap();
        Ok((0..5)
            .map(|_| {
                let n = self.next_station_track.fetch_add(1, Ordering::SeqCst);
                let track = track(&format!("Tstation{}", n));
                catalog.insert(track.id.clone(), track.clone());
                track
            })
            .collect())
    }
}

/// Service de streaming simulé
pub struct FakeService(Arc<ServiceState>);

impl FakeService {
    pub fn new() -> Arc<Self> {
        let state = ServiceState::default();
        {
            let mut catalog = state.catalog.lock().unwrap();
            for i in 0..100 {
                let id = format!("T{}", i);
                catalog.insert(id.clone(), track(&id));
            }
            catalog.insert(FALLBACK.to_string(), track(FALLBACK));

            let mut with_video = track(WITH_VIDEO);
            with_video.video = Some(Video {
                id: format!("yt-{}", WITH_VIDEO),
            });
            catalog.insert(WITH_VIDEO.to_string(), with_video);
        }
        Arc::new(Self(Arc::new(state)))
    }
}

impl std::ops::Deref for FakeService {
    type Target = ServiceState;

    fn deref(&self) -> &ServiceState {
        &self.0
    }
}

#[async_trait]
impl RemoteTrackService for FakeService {
    async fn get_track(&self, id: &str) -> Result<Track> {
        self.get_track_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token()?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.catalog
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GPlayError::from_status_code(404, format!("track {}", id)))
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Track>> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), max_results));
        self.check_token()?;
        Ok((0..max_results).map(|i| track(&format!("T{}", i))).collect())
    }

    async fn download(
        &self,
        track: &Track,
        quality: StreamQuality,
        destination: &Path,
    ) -> Result<()> {
        self.check_token()?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.download_delay.lock().unwrap();
        tokio::fs::write(destination, format!("{} @ {}", track.id, quality)).await?;
        tokio::time::sleep(delay).await;
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(GPlayError::Io(std::io::Error::other("connection reset")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStationService for FakeService {
    async fn create_station(
        &self,
        seed: &Track,
        _name: &str,
        _public: bool,
    ) -> Result<Box<dyn RemoteStation>> {
        self.check_token()?;
        if self.fail_station_creation.load(Ordering::SeqCst) {
            return Err(GPlayError::from_status_code(500, "station backend down"));
        }
        let mut created = self.created_stations.lock().unwrap();
        created.push(seed.id.clone());
        Ok(Box::new(FakeStation {
            id: format!("station-{}", created.len()),
            service: self.0.clone(),
        }))
    }
}

#[async_trait]
impl MusicService for FakeService {
    async fn change_token(&self, token: &AuthToken) -> Result<()> {
        self.tokens.lock().unwrap().push(token.token.clone());
        self.expired.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeStation {
    id: String,
    service: Arc<ServiceState>,
}

#[async_trait]
impl RemoteStation for FakeStation {
    fn id(&self) -> &str {
        &self.id
    }

    async fn get_tracks(
        &self,
        context: &[Track],
        _recently_played: bool,
        _new_content: bool,
    ) -> Result<Vec<Track>> {
        self.service.station_tracks(context)
    }

    async fn delete(&self) -> Result<()> {
        self.service
            .deleted_stations
            .lock()
            .unwrap()
            .push(self.id.clone());
        Ok(())
    }
}

/// Ouvre des sessions sur le service simulé ; certains tokens sont refusés
pub struct FakeConnector {
    service: Arc<FakeService>,
    pub rejected: Mutex<HashSet<String>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(service: Arc<FakeService>) -> Arc<Self> {
        Arc::new(Self {
            service,
            rejected: Mutex::new(HashSet::new()),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn reject(&self, token: &str) {
        self.rejected.lock().unwrap().insert(token.to_string());
    }
}

#[async_trait]
impl ServiceConnector for FakeConnector {
    async fn connect(&self, token: &AuthToken) -> Result<Arc<dyn MusicService>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.rejected.lock().unwrap().contains(&token.token) {
            return Err(GPlayError::Other(format!("token {} rejected", token.token)));
        }
        let service: Arc<dyn MusicService> = self.service.clone();
        Ok(service)
    }
}

/// Échange de tokens simulé ; les nouveaux tokens s'appellent `fresh-<n>`
#[derive(Default)]
pub struct FakeExchange {
    pub fresh_requests: AtomicUsize,
    pub existing_requests: AtomicUsize,
    pub fail_fresh: AtomicBool,
    pub last_fetched: Mutex<Option<DateTime<Utc>>>,
    pub unusable: Mutex<HashSet<String>>,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fresh_requests(&self) -> usize {
        self.fresh_requests.load(Ordering::SeqCst)
    }

    /// Fait comme si le dernier token datait de `age`
    pub fn age_last_token(&self, age: Duration) {
        let age = chrono::Duration::from_std(age).unwrap();
        *self.last_fetched.lock().unwrap() = Some(Utc::now() - age);
    }
}

#[async_trait]
impl TokenExchange for FakeExchange {
    async fn provide_token_from_existing(&self, token: &str) -> Result<Option<AuthToken>> {
        self.existing_requests.fetch_add(1, Ordering::SeqCst);
        if self.unusable.lock().unwrap().contains(token) {
            return Ok(None);
        }
        Ok(Some(AuthToken::new(token)))
    }

    async fn provide_token(
        &self,
        username: &str,
        _password: &str,
        _device_id: &str,
    ) -> Result<AuthToken> {
        let n = self.fresh_requests.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_fresh.load(Ordering::SeqCst) {
            return Err(GPlayError::TokenRequest(format!(
                "credentials of {} refused",
                username
            )));
        }
        let token = AuthToken::new(format!("fresh-{}", n));
        *self.last_fetched.lock().unwrap() = Some(token.fetched_at);
        Ok(token)
    }

    fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        *self.last_fetched.lock().unwrap()
    }
}

/// Environnement de test complet : configuration temporaire et doubles
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: Arc<Config>,
    pub service: Arc<FakeService>,
    pub connector: Arc<FakeConnector>,
    pub exchange: Arc<FakeExchange>,
    pub provider: Arc<GPlayProvider>,
}

impl Harness {
    /// Configuration avec credentials, provider non initialisé
    pub fn new() -> anyhow::Result<Self> {
        Self::with_cooldown(None)
    }

    pub fn with_cooldown(cooldown: Option<Duration>) -> anyhow::Result<Self> {
        init_logging();
        let dir = tempfile::tempdir()?;
        let config = Arc::new(Config::load_config(
            dir.path().to_str().expect("utf-8 temp dir"),
        )?);
        config.set_gplay_username("alice")?;
        config.set_gplay_password("secret")?;
        config.set_gplay_device_id("0123456789abcdef")?;
        config.set_u64(&["plugins", "gplay_station", "retry_backoff_ms"], 1)?;

        let service = FakeService::new();
        let connector = FakeConnector::new(service.clone());
        let exchange = FakeExchange::new();

        let mut builder = GPlayProvider::builder(connector.clone(), exchange.clone())
            .config(config.clone())
            .video_provider("youtube");
        if let Some(cooldown) = cooldown {
            builder = builder.refresh_cooldown(cooldown);
        }
        let provider = Arc::new(builder.build());

        Ok(Self {
            dir,
            config,
            service,
            connector,
            exchange,
            provider,
        })
    }

    /// Provider initialisé et connecté
    pub async fn ready() -> anyhow::Result<Self> {
        let harness = Self::new()?;
        harness.provider.initialize(&NullWriter).await?;
        Ok(harness)
    }
}
