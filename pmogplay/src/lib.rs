//! # pmogplay - Plugin Google Play Music pour PMOMusic
//!
//! Cette crate adapte un service de streaming musical aux contrats de
//! plugin de `pmosource` : un [`Provider`](pmosource::Provider) (recherche,
//! résolution, téléchargement) et un [`Suggester`](pmosource::Suggester)
//! basé sur une station radio.
//!
//! ## Vue d'ensemble
//!
//! - Conversion des pistes du service en `Song`, avec délégation optionnelle
//!   des pistes ayant une vidéo à un fournisseur vidéo
//! - Cache en mémoire des morceaux, une seule requête par identifiant même
//!   sous forte concurrence
//! - Session authentifiée : réutilisation du token mémorisé, rafraîchissement
//!   limité à un toutes les 60 secondes, un seul nouvel essai après un 401
//! - Recherche paginée et téléchargement idempotent vers le stockage local
//! - Suggestions tirées d'une station recréée à chaque morceau mis en file
//!
//! ## Architecture
//!
//! Le plugin ne parle pas le protocole du service : il consomme les traits
//! du module [`api`], implémentés par l'adaptateur du SDK.
//!
//! ```text
//! pmogplay/
//! ├── src/
//! │   ├── lib.rs              # Module principal (ce fichier)
//! │   ├── api/mod.rs          # Traits du SDK (pistes, stations, tokens)
//! │   ├── models.rs           # Track, StreamQuality, AuthToken
//! │   ├── resolver.rs         # Track -> Song
//! │   ├── cache.rs            # Cache des morceaux
//! │   ├── session.rs          # Login et rafraîchissement du token
//! │   ├── provider.rs         # Provider (recherche, lookup, téléchargement)
//! │   ├── suggester.rs        # Suggester basé sur une station
//! │   ├── config_ext.rs       # Extension de pmoconfig
//! │   └── error.rs            # Gestion des erreurs
//! ```
//!
//! ## Utilisation
//!
//! ```rust,ignore
//! use pmogplay::{GPlayProvider, StationSuggester};
//! use pmosource::{LogInitStateWriter, Plugin, Provider, Suggester};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(
//!     GPlayProvider::builder(connector, exchange)
//!         .video_provider("youtube")
//!         .build(),
//! );
//! provider.initialize(&LogInitStateWriter::new("gplay")).await?;
//!
//! let songs = provider.search("Miles Davis", 0).await;
//!
//! let suggester = StationSuggester::new(provider.clone());
//! suggester.initialize(&LogInitStateWriter::new("gplay_station")).await?;
//! let next = suggester.suggest_next().await?;
//! ```

pub mod api;
pub mod cache;
pub mod config_ext;
pub mod error;
pub mod models;
pub mod provider;
pub mod resolver;
pub mod session;
pub mod suggester;

pub use api::{
    MusicService, RemoteStation, RemoteStationService, RemoteTrackService, ServiceConnector,
    TokenExchange,
};
pub use cache::{SongCache, SongFetcher};
pub use config_ext::GPlayConfigExt;
pub use error::{GPlayError, Result};
pub use models::{AuthToken, ImageRef, StreamQuality, Track, Video};
pub use provider::{GPlayProvider, GPlayProviderBuilder, PROVIDER_ID};
pub use resolver::TrackResolver;
pub use session::{SessionManager, SessionState};
pub use suggester::{StationSuggester, SUGGESTER_ID};
