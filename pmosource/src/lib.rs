//! # PMOSource
//!
//! Common traits and types for PMOMusic plugins.
//!
//! This crate provides the contract between the media bot and the plugins
//! feeding it with songs:
//!
//! - **[`Provider`]**: searches a catalog, looks songs up by id and loads
//!   them to local storage for playback.
//! - **[`Suggester`]**: proposes the next songs to play when the queue runs
//!   empty, and learns from what was actually played.
//! - **[`Song`]**: the normalized song representation shared by every plugin.
//! - **[`PluginError`]**: the only errors allowed to cross the contract.
//!
//! ## Lifecycle
//!
//! A plugin is constructed, then [`Plugin::initialize`] is awaited once with
//! an [`InitStateWriter`] reporting progress. When the bot shuts down,
//! [`Plugin::close`] releases whatever the plugin holds (remote sessions,
//! background tasks). Every method takes `&self` so plugins can be shared
//! behind an `Arc` (a suggester usually holds the provider it draws from).

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Boxed error used as the cause of a [`PluginError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for plugin operations
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin could not start; the bot aborts plugin startup
    #[error("Initialization failed: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A song id could not be resolved
    #[error("No such song: {id}")]
    NoSuchSong {
        id: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A song could not be made available locally
    #[error("Song loading failed: {source}")]
    SongLoading {
        #[source]
        source: BoxError,
    },

    /// A suggester could not produce suggestions
    #[error("Suggestion failed: {0}")]
    Suggestion(String),

    /// The plugin was used before `initialize` succeeded
    #[error("Plugin not initialized: {0}")]
    NotInitialized(String),

    /// The plugin was used after `close`
    #[error("Plugin closed: {0}")]
    Closed(String),
}

impl PluginError {
    /// Initialization failure without underlying cause
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: message.into(),
            source: None,
        }
    }

    /// Initialization failure caused by `source`
    pub fn initialization_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Initialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Lookup failure for `id` caused by `source`
    pub fn no_such_song(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::NoSuchSong {
            id: id.into(),
            source: Some(source.into()),
        }
    }

    /// Loading failure caused by `source`
    pub fn song_loading(source: impl Into<BoxError>) -> Self {
        Self::SongLoading {
            source: source.into(),
        }
    }
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Normalized song representation
///
/// A song is an immutable value. `provider_id` names the provider able to
/// load and play it, which is not always the provider that found it (a
/// provider may delegate playback to another one).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Song {
    /// Identifier, unique within `provider_id`
    pub id: String,
    /// Title
    pub title: String,
    /// Free description, usually the artist
    pub description: String,
    /// Duration in whole seconds
    pub duration_secs: u32,
    /// Remote album art
    pub album_art_url: Option<String>,
    /// Identifier of the provider serving this song
    pub provider_id: String,
}

impl Song {
    /// Creates a song without album art
    pub fn new(
        provider_id: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        duration_secs: u32,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            duration_secs,
            album_art_url: None,
            provider_id: provider_id.into(),
        }
    }

    /// Sets the album art URL
    pub fn with_album_art(mut self, url: impl Into<String>) -> Self {
        self.album_art_url = Some(url.into());
        self
    }
}

/// A song the player went through, with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongEntry {
    /// Enqueued by a user
    Queued {
        song: Song,
        user: Option<String>,
    },
    /// Played because a suggester proposed it
    Suggested(Song),
}

impl SongEntry {
    /// The song itself
    pub fn song(&self) -> &Song {
        match self {
            SongEntry::Queued { song, .. } => song,
            SongEntry::Suggested(song) => song,
        }
    }

    /// Whether the entry was taken from the user queue
    pub fn is_queued(&self) -> bool {
        matches!(self, SongEntry::Queued { .. })
    }
}

/// A song loaded to local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is still there
    pub async fn is_valid(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

/// Receives progress messages during [`Plugin::initialize`]
pub trait InitStateWriter: Send + Sync {
    /// Reports the current initialization step
    fn state(&self, state: &str);

    /// Reports a non-fatal problem
    fn warning(&self, warning: &str);
}

/// [`InitStateWriter`] forwarding everything to `tracing`
#[derive(Debug, Clone)]
pub struct LogInitStateWriter {
    plugin: String,
}

impl LogInitStateWriter {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }
}

impl InitStateWriter for LogInitStateWriter {
    fn state(&self, state: &str) {
        info!(plugin=%self.plugin, "{}", state);
    }

    fn warning(&self, warning: &str) {
        warn!(plugin=%self.plugin, "{}", warning);
    }
}

/// Common part of every plugin
#[async_trait::async_trait]
pub trait Plugin: Debug + Send + Sync {
    /// Unique, stable identifier (used for storage and as `Song::provider_id`)
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// One-line description
    fn description(&self) -> &str;

    /// What the plugin currently works on, shown to users
    fn subject(&self) -> String {
        self.name().to_string()
    }

    /// Prepares the plugin; an error aborts plugin startup
    async fn initialize(&self, writer: &dyn InitStateWriter) -> Result<()>;

    /// Releases everything held by the plugin
    async fn close(&self) -> Result<()>;
}

/// A catalog of songs
#[async_trait::async_trait]
pub trait Provider: Plugin {
    /// Searches songs; failures degrade to an empty list
    ///
    /// `offset` is the index of the first result wanted, for paging.
    async fn search(&self, query: &str, offset: usize) -> Vec<Song>;

    /// Finds a song by id
    ///
    /// # Errors
    ///
    /// [`PluginError::NoSuchSong`] when the id cannot be resolved.
    async fn lookup(&self, id: &str) -> Result<Song>;

    /// Makes the song available locally
    ///
    /// # Errors
    ///
    /// [`PluginError::SongLoading`] on any I/O problem.
    async fn load_song(&self, song: &Song) -> Result<FileResource>;
}

/// Proposes songs when nobody enqueued anything
#[async_trait::async_trait]
pub trait Suggester: Plugin {
    /// Returns the next song to play and consumes it
    async fn suggest_next(&self) -> Result<Song>;

    /// Returns up to `max_length` upcoming suggestions without consuming them
    async fn get_next_suggestions(&self, max_length: usize) -> Result<Vec<Song>>;

    /// Called when the player finished a song
    async fn notify_played(&self, entry: &SongEntry) -> Result<()>;

    /// Called when a user rejects a suggestion
    async fn remove_suggestion(&self, song: &Song) -> Result<()>;
}

// Re-export commonly used types
pub use async_trait::async_trait;
