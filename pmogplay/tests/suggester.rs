mod common;

use common::{Harness, NullWriter, FALLBACK};
use pmogplay::{GPlayConfigExt, StationSuggester, PROVIDER_ID};
use pmosource::{Plugin, PluginError, Provider, Song, SongEntry, Suggester};
use std::sync::Arc;
use std::sync::atomic::Ordering;

async fn ready_suggester() -> anyhow::Result<(Harness, StationSuggester)> {
    let harness = Harness::ready().await?;
    let suggester = StationSuggester::new(harness.provider.clone());
    suggester.initialize(&NullWriter).await?;
    Ok((harness, suggester))
}

async fn queued(harness: &Harness, id: &str) -> anyhow::Result<SongEntry> {
    let song = harness.provider.lookup(id).await?;
    Ok(SongEntry::Queued {
        song,
        user: Some("alice".to_string()),
    })
}

#[tokio::test]
async fn initialize_builds_station_on_fallback_song() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;

    assert_eq!(harness.service.created_stations(), vec![FALLBACK.to_string()]);
    assert_eq!(suggester.seed_song_id().await, Some(FALLBACK.to_string()));
    assert_eq!(suggester.subject(), format!("Based on Song {}", FALLBACK));
    assert_eq!(harness.config.get_gplay_base_song()?, Some(FALLBACK.to_string()));
    Ok(())
}

#[tokio::test]
async fn initialize_prefers_persisted_base_song() -> anyhow::Result<()> {
    let harness = Harness::ready().await?;
    harness.config.set_gplay_base_song(Some("T12"))?;

    let suggester = StationSuggester::new(harness.provider.clone());
    suggester.initialize(&NullWriter).await?;

    assert_eq!(harness.service.created_stations(), vec!["T12".to_string()]);
    Ok(())
}

#[tokio::test]
async fn initialize_fails_on_unknown_base_song() -> anyhow::Result<()> {
    let harness = Harness::ready().await?;
    harness.config.set_gplay_base_song(Some("Tunknown"))?;

    let suggester = StationSuggester::new(harness.provider.clone());
    let err = suggester.initialize(&NullWriter).await.unwrap_err();

    assert!(matches!(err, PluginError::Initialization { .. }));
    assert!(harness.service.created_stations().is_empty());
    Ok(())
}

#[tokio::test]
async fn next_suggestions_are_not_consumed() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;

    let first = suggester.get_next_suggestions(3).await?;
    let again = suggester.get_next_suggestions(3).await?;

    assert_eq!(first.len(), 3);
    assert_eq!(first, again);
    assert_eq!(harness.service.station_fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn next_suggestions_never_exceed_requested_length() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;

    // La station renvoie 5 pistes par appel
    let songs = suggester.get_next_suggestions(7).await?;

    assert_eq!(songs.len(), 7);
    assert_eq!(harness.service.station_fetches(), 2);
    Ok(())
}

#[tokio::test]
async fn suggest_next_consumes_the_head() -> anyhow::Result<()> {
    let (_harness, suggester) = ready_suggester().await?;

    let upcoming = suggester.get_next_suggestions(2).await?;
    let next = suggester.suggest_next().await?;
    let remaining = suggester.get_next_suggestions(1).await?;

    assert_eq!(next, upcoming[0]);
    assert_eq!(remaining[0], upcoming[1]);
    assert_eq!(next.provider_id, PROVIDER_ID);
    Ok(())
}

#[tokio::test]
async fn suggest_next_falls_back_to_base_song() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    harness.service.station_empty.store(true, Ordering::SeqCst);

    let next = suggester.suggest_next().await?;

    assert_eq!(next.id, FALLBACK);
    Ok(())
}

#[tokio::test]
async fn replenishment_gives_up_after_max_attempts() -> anyhow::Result<()> {
    let harness = Harness::ready().await?;
    harness
        .config
        .set_u64(&["plugins", "gplay_station", "max_fetch_attempts"], 3)?;
    let suggester = StationSuggester::new(harness.provider.clone());
    suggester.initialize(&NullWriter).await?;
    harness.service.station_failures.store(100, Ordering::SeqCst);

    let err = suggester.get_next_suggestions(5).await.unwrap_err();

    assert!(matches!(err, PluginError::Suggestion(_)));
    assert_eq!(harness.service.station_fetches(), 3);
    Ok(())
}

#[tokio::test]
async fn replenishment_recovers_from_transient_failures() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    harness.service.station_failures.store(2, Ordering::SeqCst);

    let songs = suggester.get_next_suggestions(5).await?;

    assert_eq!(songs.len(), 5);
    assert_eq!(harness.service.station_fetches(), 3);
    Ok(())
}

#[tokio::test]
async fn replenishment_returns_partial_buffer_on_exhaustion() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    suggester.get_next_suggestions(5).await?;
    harness.service.station_empty.store(true, Ordering::SeqCst);

    let songs = suggester.get_next_suggestions(8).await?;

    assert_eq!(songs.len(), 5);
    Ok(())
}

#[tokio::test]
async fn queued_song_recreates_station_once() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let entry = queued(&harness, "T5").await?;

    suggester.notify_played(&entry).await?;
    suggester.notify_played(&entry).await?;

    assert_eq!(
        harness.service.created_stations(),
        vec![FALLBACK.to_string(), "T5".to_string()]
    );
    assert_eq!(harness.service.deleted_stations(), vec!["station-1".to_string()]);
    assert_eq!(suggester.seed_song_id().await, Some("T5".to_string()));
    assert_eq!(suggester.subject(), "Based on Song T5");
    assert_eq!(harness.config.get_gplay_base_song()?, Some("T5".to_string()));
    Ok(())
}

#[tokio::test]
async fn recreation_clears_the_buffer() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let before = suggester.get_next_suggestions(3).await?;

    suggester.notify_played(&queued(&harness, "T5").await?).await?;
    let after = suggester.get_next_suggestions(3).await?;

    assert!(after.iter().all(|song| !before.contains(song)));
    Ok(())
}

#[tokio::test]
async fn played_suggestion_keeps_the_station() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let next = suggester.suggest_next().await?;

    // Mis en file par un utilisateur, mais c'est la dernière suggestion
    let entry = SongEntry::Queued {
        song: next,
        user: None,
    };
    suggester.notify_played(&entry).await?;

    assert_eq!(harness.service.created_stations().len(), 1);
    Ok(())
}

#[tokio::test]
async fn suggested_entries_do_not_recreate_station() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let song = harness.provider.lookup("T6").await?;

    suggester.notify_played(&SongEntry::Suggested(song)).await?;

    assert_eq!(harness.service.created_stations().len(), 1);
    assert_eq!(suggester.recently_played_len().await, 1);
    Ok(())
}

#[tokio::test]
async fn failed_recreation_keeps_old_station() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    harness
        .service
        .fail_station_creation
        .store(true, Ordering::SeqCst);

    suggester.notify_played(&queued(&harness, "T5").await?).await?;

    assert_eq!(suggester.seed_song_id().await, Some(FALLBACK.to_string()));
    assert!(harness.service.deleted_stations().is_empty());
    assert_eq!(suggester.get_next_suggestions(1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn recently_played_is_sent_as_context() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    for id in ["T1", "T2"] {
        let song = harness.provider.lookup(id).await?;
        suggester.notify_played(&SongEntry::Suggested(song)).await?;
    }
    // Un morceau d'un autre provider n'a pas de piste correspondante
    let foreign = Song::new("youtube", "yt-1", "video", "artist", 100);
    suggester.notify_played(&SongEntry::Suggested(foreign)).await?;

    suggester.get_next_suggestions(1).await?;

    let context = harness.service.last_context.lock().unwrap().clone();
    assert_eq!(context, vec!["T1".to_string(), "T2".to_string()]);
    Ok(())
}

#[tokio::test]
async fn recently_played_is_bounded() -> anyhow::Result<()> {
    let (_harness, suggester) = ready_suggester().await?;
    for i in 0..201 {
        let song = Song::new(PROVIDER_ID, format!("T{}", i), "t", "a", 1);
        suggester.remove_suggestion(&song).await?;
    }
    assert_eq!(suggester.recently_played_len().await, 200);
    Ok(())
}

#[tokio::test]
async fn removed_suggestion_leaves_the_station_alone() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let upcoming = suggester.get_next_suggestions(3).await?;
    let fetches = harness.service.station_fetches();

    suggester.remove_suggestion(&upcoming[1]).await?;
    let remaining = suggester.get_next_suggestions(2).await?;

    assert_eq!(remaining, vec![upcoming[0].clone(), upcoming[2].clone()]);
    assert_eq!(harness.service.station_fetches(), fetches);
    assert_eq!(harness.service.created_stations().len(), 1);
    assert!(harness.service.deleted_stations().is_empty());
    Ok(())
}

#[tokio::test]
async fn close_deletes_the_station() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;

    suggester.close().await?;

    assert_eq!(harness.service.deleted_stations(), vec!["station-1".to_string()]);
    assert!(matches!(
        suggester.suggest_next().await,
        Err(PluginError::Closed(_))
    ));
    Ok(())
}

#[tokio::test]
async fn suggester_shares_the_provider() -> anyhow::Result<()> {
    let (harness, suggester) = ready_suggester().await?;
    let suggester = Arc::new(suggester);

    let songs = suggester.get_next_suggestions(2).await?;
    let looked_up = harness.provider.lookup(&songs[0].id).await?;

    assert_eq!(looked_up, songs[0]);
    Ok(())
}
