//! Conversion des pistes du service en [`Song`] pour le bot

use crate::models::Track;
use pmosource::Song;
use tracing::debug;

/// Transforme une [`Track`] en [`Song`]
///
/// Lorsque la délégation vidéo est active (option de configuration **et**
/// fournisseur vidéo installé), une piste qui possède une vidéo est servie
/// par le fournisseur vidéo : le `Song` prend l'identifiant de la vidéo et
/// l'identifiant du fournisseur vidéo.
#[derive(Debug, Clone)]
pub struct TrackResolver {
    provider_id: String,
    show_videos: bool,
    video_provider: Option<String>,
}

impl TrackResolver {
    /// Résolveur sans délégation vidéo
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            show_videos: false,
            video_provider: None,
        }
    }

    /// Active la délégation vers `video_provider` si `show_videos` est vrai
    pub fn with_video_delegation(mut self, show_videos: bool, video_provider: Option<String>) -> Self {
        self.show_videos = show_videos;
        self.video_provider = video_provider;
        self
    }

    /// Identifiant du fournisseur vidéo si la délégation est active
    fn delegate(&self) -> Option<&str> {
        if self.show_videos {
            self.video_provider.as_deref()
        } else {
            None
        }
    }

    pub fn is_video_delegation_enabled(&self) -> bool {
        self.delegate().is_some()
    }

    /// Convertit une piste ; aucune requête réseau
    pub fn resolve(&self, track: &Track) -> Song {
        let mut song = Song::new(
            &self.provider_id,
            &track.id,
            &track.title,
            &track.artist,
            u32::try_from(track.duration_millis / 1000).unwrap_or(u32::MAX),
        );
        if let Some(url) = track.album_art_url() {
            song = song.with_album_art(url);
        }

        if let (Some(delegate), Some(video)) = (self.delegate(), track.video.as_ref()) {
            debug!("Delegating song to {}: {}", delegate, song.title);
            song.id = video.id.clone();
            song.provider_id = delegate.to_string();
        }

        song
    }
}
