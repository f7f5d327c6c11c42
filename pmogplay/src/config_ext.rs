//! Extension pour intégrer la configuration GPlay dans pmoconfig
//!
//! Ce module fournit le trait `GPlayConfigExt` qui ajoute à
//! `pmoconfig::Config` les accesseurs typés du plugin : credentials (scellés
//! comme secrets), qualité de streaming, durée de cache, délégation vidéo,
//! répertoire des morceaux et paramètres de la station.

use crate::models::StreamQuality;
use crate::provider::PROVIDER_ID;
use anyhow::{anyhow, Result};
use pmoconfig::Config;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const USERNAME: &[&str] = &["accounts", "gplay", "username"];
const PASSWORD: &[&str] = &["accounts", "gplay", "password"];
const DEVICE_ID: &[&str] = &["accounts", "gplay", "device_id"];
const TOKEN: &[&str] = &["accounts", "gplay", "token"];

const STREAM_QUALITY: &[&str] = &["plugins", "gplay", "stream_quality"];
const CACHE_TIME: &[&str] = &["plugins", "gplay", "cache_time"];
const SHOW_VIDEOS: &[&str] = &["plugins", "gplay", "show_videos"];
const SONGS_DIR: &[&str] = &["plugins", "gplay", "songs_dir"];

const FALLBACK_SONG: &[&str] = &["plugins", "gplay_station", "fallback_song"];
const MAX_FETCH_ATTEMPTS: &[&str] = &["plugins", "gplay_station", "max_fetch_attempts"];
const RETRY_BACKOFF_MS: &[&str] = &["plugins", "gplay_station", "retry_backoff_ms"];
const BASE_SONG: &[&str] = &["state", "gplay_station", "base_song"];

/// Durée de cache par défaut, en minutes
pub const DEFAULT_CACHE_MINUTES: u64 = 60;

/// Bornes de la durée de cache, en minutes
pub const CACHE_MINUTES_RANGE: (u64, u64) = (1, 3600);

/// Morceau de départ de la station quand aucun n'a encore été joué
pub const DEFAULT_FALLBACK_SONG: &str = "Tj6fhurtstzgdpvfm4xv6i5cei4";

pub const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Vérifie qu'un identifiant désigne bien une piste du catalogue
///
/// Les pistes du catalogue ont un identifiant commençant par `T` ; les
/// identifiants de bibliothèque personnelle ne peuvent pas seeder une station.
pub fn is_catalog_song_id(id: &str) -> bool {
    id.starts_with('T')
}

/// Trait d'extension pour gérer la configuration GPlay dans pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmogplay::GPlayConfigExt;
///
/// let config = get_config();
/// let quality = config.get_gplay_stream_quality()?;
/// println!("Streaming at {}", quality);
/// ```
pub trait GPlayConfigExt {
    /// Nom d'utilisateur du compte
    ///
    /// # Errors
    ///
    /// Retourne une erreur si le nom d'utilisateur n'est pas configuré
    fn get_gplay_username(&self) -> Result<String>;

    fn set_gplay_username(&self, username: &str) -> Result<()>;

    /// Mot de passe du compte (secret)
    ///
    /// # Errors
    ///
    /// Retourne une erreur si le mot de passe n'est pas configuré
    fn get_gplay_password(&self) -> Result<String>;

    fn set_gplay_password(&self, password: &str) -> Result<()>;

    /// Identifiant de l'appareil déclaré au service (secret)
    fn get_gplay_device_id(&self) -> Result<String>;

    fn set_gplay_device_id(&self, device_id: &str) -> Result<()>;

    /// Récupère les credentials complets (username, password, device id)
    fn get_gplay_credentials(&self) -> Result<(String, String, String)>;

    /// Dernier token obtenu, `None` s'il n'y en a pas
    fn get_gplay_token(&self) -> Result<Option<String>>;

    /// Enregistre (scellé) ou efface le token
    fn set_gplay_token(&self, token: Option<&str>) -> Result<()>;

    /// Qualité de streaming ; une valeur inconnue retombe sur la valeur par défaut
    fn get_gplay_stream_quality(&self) -> Result<StreamQuality>;

    fn set_gplay_stream_quality(&self, quality: StreamQuality) -> Result<()>;

    /// Durée de vie des entrées de cache inutilisées
    ///
    /// Configurée en minutes, ramenée entre 1 et 3600.
    fn get_gplay_cache_time(&self) -> Result<Duration>;

    /// Définit la durée de cache en minutes
    ///
    /// # Errors
    ///
    /// Retourne une erreur si la valeur est hors de l'intervalle 1..=3600
    fn set_gplay_cache_time(&self, minutes: u64) -> Result<()>;

    /// Délégation des pistes ayant une vidéo au fournisseur vidéo
    fn get_gplay_show_videos(&self) -> Result<bool>;

    fn set_gplay_show_videos(&self, show: bool) -> Result<()>;

    /// Répertoire des morceaux téléchargés, créé s'il n'existe pas
    ///
    /// Par défaut `songs/` dans le stockage du plugin ; `songs_dir` le remplace.
    fn get_gplay_songs_dir(&self) -> Result<PathBuf>;

    fn set_gplay_songs_dir(&self, directory: String) -> Result<()>;

    /// Morceau de départ de la station
    ///
    /// Une valeur configurée qui ne désigne pas une piste du catalogue est
    /// ignorée au profit de la valeur par défaut.
    fn get_gplay_fallback_song(&self) -> Result<String>;

    /// # Errors
    ///
    /// Retourne une erreur si l'identifiant ne commence pas par `T`
    fn set_gplay_fallback_song(&self, id: &str) -> Result<()>;

    /// Morceau sur lequel la station courante est basée
    fn get_gplay_base_song(&self) -> Result<Option<String>>;

    fn set_gplay_base_song(&self, id: Option<&str>) -> Result<()>;

    /// Nombre d'échecs consécutifs tolérés en remplissant la file de suggestions
    fn get_gplay_max_fetch_attempts(&self) -> Result<u32>;

    /// Délai initial entre deux tentatives, doublé à chaque échec
    fn get_gplay_retry_backoff(&self) -> Result<Duration>;
}

impl GPlayConfigExt for Config {
    fn get_gplay_username(&self) -> Result<String> {
        self.get_string(USERNAME)?
            .ok_or_else(|| anyhow!("GPlay username not configured"))
    }

    fn set_gplay_username(&self, username: &str) -> Result<()> {
        self.set_string(USERNAME, Some(username))
    }

    fn get_gplay_password(&self) -> Result<String> {
        self.get_secret(PASSWORD)?
            .ok_or_else(|| anyhow!("GPlay password not configured"))
    }

    fn set_gplay_password(&self, password: &str) -> Result<()> {
        self.set_secret(PASSWORD, Some(password))
    }

    fn get_gplay_device_id(&self) -> Result<String> {
        self.get_secret(DEVICE_ID)?
            .ok_or_else(|| anyhow!("GPlay device id not configured"))
    }

    fn set_gplay_device_id(&self, device_id: &str) -> Result<()> {
        self.set_secret(DEVICE_ID, Some(device_id))
    }

    fn get_gplay_credentials(&self) -> Result<(String, String, String)> {
        Ok((
            self.get_gplay_username()?,
            self.get_gplay_password()?,
            self.get_gplay_device_id()?,
        ))
    }

    fn get_gplay_token(&self) -> Result<Option<String>> {
        self.get_secret(TOKEN)
    }

    fn set_gplay_token(&self, token: Option<&str>) -> Result<()> {
        self.set_secret(TOKEN, token)
    }

    fn get_gplay_stream_quality(&self) -> Result<StreamQuality> {
        match self.get_string(STREAM_QUALITY)? {
            Some(name) => Ok(name.parse().unwrap_or_else(|e| {
                warn!("{}, using {}", e, StreamQuality::default());
                StreamQuality::default()
            })),
            None => Ok(StreamQuality::default()),
        }
    }

    fn set_gplay_stream_quality(&self, quality: StreamQuality) -> Result<()> {
        self.set_string(STREAM_QUALITY, Some(quality.name()))
    }

    fn get_gplay_cache_time(&self) -> Result<Duration> {
        let (min, max) = CACHE_MINUTES_RANGE;
        let minutes = self
            .get_u64(CACHE_TIME)?
            .unwrap_or(DEFAULT_CACHE_MINUTES)
            .clamp(min, max);
        Ok(Duration::from_secs(minutes * 60))
    }

    fn set_gplay_cache_time(&self, minutes: u64) -> Result<()> {
        let (min, max) = CACHE_MINUTES_RANGE;
        if !(min..=max).contains(&minutes) {
            return Err(anyhow!(
                "Cache time must be between {} and {} minutes, got {}",
                min,
                max,
                minutes
            ));
        }
        self.set_u64(CACHE_TIME, minutes)
    }

    fn get_gplay_show_videos(&self) -> Result<bool> {
        Ok(self.get_bool(SHOW_VIDEOS)?.unwrap_or(false))
    }

    fn set_gplay_show_videos(&self, show: bool) -> Result<()> {
        self.set_bool(SHOW_VIDEOS, show)
    }

    fn get_gplay_songs_dir(&self) -> Result<PathBuf> {
        match self.get_string(SONGS_DIR)? {
            Some(dir) => self.get_managed_dir(SONGS_DIR, &dir),
            None => {
                let dir = self.plugin_storage_dir(PROVIDER_ID)?.join("songs");
                std::fs::create_dir_all(&dir)?;
                Ok(dir)
            }
        }
    }

    fn set_gplay_songs_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(SONGS_DIR, directory)
    }

    fn get_gplay_fallback_song(&self) -> Result<String> {
        match self.get_string(FALLBACK_SONG)? {
            Some(id) if is_catalog_song_id(&id) => Ok(id),
            Some(id) => {
                warn!("Ignoring fallback song {}: not a catalog track id", id);
                Ok(DEFAULT_FALLBACK_SONG.to_string())
            }
            None => Ok(DEFAULT_FALLBACK_SONG.to_string()),
        }
    }

    fn set_gplay_fallback_song(&self, id: &str) -> Result<()> {
        if !is_catalog_song_id(id) {
            return Err(anyhow!("Fallback song id must start with 'T', got '{}'", id));
        }
        self.set_string(FALLBACK_SONG, Some(id))
    }

    fn get_gplay_base_song(&self) -> Result<Option<String>> {
        self.get_string(BASE_SONG)
    }

    fn set_gplay_base_song(&self, id: Option<&str>) -> Result<()> {
        self.set_string(BASE_SONG, id)
    }

    fn get_gplay_max_fetch_attempts(&self) -> Result<u32> {
        Ok(self
            .get_u64(MAX_FETCH_ATTEMPTS)?
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_FETCH_ATTEMPTS))
    }

    fn get_gplay_retry_backoff(&self) -> Result<Duration> {
        Ok(self
            .get_u64(RETRY_BACKOFF_MS)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_BACKOFF))
    }
}
