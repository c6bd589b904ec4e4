use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use undercover_dash::protocol::{DescriptionsUpdate, PushEvent};
use undercover_dash::state::persist::{
    ClearScope, FileStore, KeyValueStore, MemoryStore, Persistence,
};
use undercover_dash::state::sequencer::{
    AdvanceTicket, RoundSequencer, SequencerPhase, DEFAULT_ADVANCE_DELAY,
};
use undercover_dash::state::Dashboard;
use undercover_dash::types::*;

fn dashboard_with(
    store: Arc<dyn KeyValueStore>,
) -> (Dashboard, mpsc::UnboundedReceiver<AdvanceTicket>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dashboard = Dashboard::new(
        Persistence::new(store),
        RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx),
    );
    (dashboard, rx)
}

fn descriptions(round: u32, group: &str) -> PushEvent {
    PushEvent::DescriptionsUpdate(DescriptionsUpdate {
        round: Some(round),
        descriptions: vec![DescriptionEntry {
            group: group.to_string(),
            description: format!("clue from {}", group),
            time: "12:00:00".to_string(),
        }],
        total: Some(1),
    })
}

fn vote(round: u32, game_ended: bool) -> PushEvent {
    PushEvent::VoteResult(VoteResult {
        round: Some(round),
        game_ended,
        winner: game_ended.then_some(Winner::Civilian),
        eliminated: vec!["blue".to_string()],
        ..Default::default()
    })
}

/// Single game without a sequence
#[tokio::test]
async fn test_single_round_uses_legacy_key() {
    let (mut dashboard, _rx) = dashboard_with(Arc::new(MemoryStore::new()));

    dashboard.handle_push(vote(1, true)).await;

    let view = dashboard.view();
    assert_eq!(view.votes.len(), 1);
    assert_eq!(view.votes[0].key, "1");
    assert_eq!(view.votes[0].game_number, None);
    assert_eq!(view.sequence.phase, SequencerPhase::Idle);
    assert_eq!(view.sequence.total_rounds, 0);
}

/// Two-game sequence: round counters restart per game, keys stay distinct
#[tokio::test(start_paused = true)]
async fn test_two_game_sequence_keys() {
    let (mut dashboard, mut advances) = dashboard_with(Arc::new(MemoryStore::new()));

    let start = dashboard
        .configure_sequence(vec![
            WordPair::new("apple", "pear"),
            WordPair::new("river", "lake"),
        ])
        .await
        .unwrap();
    assert_eq!(start.game_number, Some(1));
    assert_eq!(start.words.undercover_word, "apple");

    dashboard.handle_push(descriptions(1, "red")).await;
    dashboard.handle_push(vote(1, true)).await;
    assert_eq!(dashboard.sequencer().phase(), SequencerPhase::AdvancePending);

    let ticket = advances.recv().await.unwrap();
    let next = dashboard.on_advance_due(ticket).await.unwrap();
    assert_eq!(next.game_number, Some(2));
    assert_eq!(next.words.undercover_word, "river");
    assert!(!next.is_first_round_of_sequence);

    dashboard.handle_push(descriptions(1, "green")).await;

    let view = dashboard.view();
    let keys: Vec<&str> = view.descriptions.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["2_1", "1_1"]);
    assert_eq!(view.descriptions[0].value[0].group, "green");
    assert_eq!(view.descriptions[1].value[0].group, "red");
    assert_eq!(view.votes[0].key, "1_1");
}

/// Reload in the middle of a sequence, backed by files on disk
#[tokio::test(start_paused = true)]
async fn test_reload_mid_sequence() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (mut dashboard, mut advances) =
            dashboard_with(Arc::new(FileStore::new(dir.path())));
        dashboard
            .configure_sequence(vec![WordPair::new("a", "b"), WordPair::new("c", "d")])
            .await
            .unwrap();
        dashboard.handle_push(descriptions(1, "red")).await;
        dashboard.handle_push(vote(1, true)).await;

        let ticket = advances.recv().await.unwrap();
        dashboard.on_advance_due(ticket).await.unwrap();
    }

    let (tx, mut advances) = mpsc::unbounded_channel();
    let mut restored = Dashboard::load(
        Persistence::new(Arc::new(FileStore::new(dir.path()))),
        RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx),
    )
    .await;

    let config = restored.sequencer().config().unwrap();
    assert_eq!(config.current_round_index, 1);
    assert_eq!(config.total_rounds, 2);
    assert_eq!(restored.sequencer().phase(), SequencerPhase::RoundActive);

    restored.handle_push(vote(1, true)).await;

    let view = restored.view();
    let keys: Vec<&str> = view.votes.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["2_1", "1_1"]);
    assert_eq!(view.votes[0].value.game_number, Some(2));

    // Last game of the sequence: completed, nothing scheduled
    assert_eq!(restored.sequencer().phase(), SequencerPhase::Completed);
    assert_eq!(restored.sequencer().total_rounds(), 0);
    let fired = tokio::time::timeout(Duration::from_secs(10), advances.recv()).await;
    assert!(fired.is_err());
}

/// A reset between the end of a game and the scheduled advance wins
#[tokio::test(start_paused = true)]
async fn test_reset_before_advance() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let (mut dashboard, mut advances) = dashboard_with(store.clone());

    dashboard
        .configure_sequence(vec![WordPair::new("a", "b"), WordPair::new("c", "d")])
        .await
        .unwrap();
    dashboard.handle_push(vote(1, true)).await;
    assert!(dashboard.sequencer().has_pending_advance());

    tokio::time::sleep(Duration::from_secs(1)).await;
    dashboard
        .on_reset_result(ClearScope::GameData, &Ok(()))
        .await;

    let fired = tokio::time::timeout(Duration::from_secs(10), advances.recv()).await;
    assert!(fired.is_err(), "no game may start after a reset");
    assert_eq!(dashboard.sequencer().phase(), SequencerPhase::Idle);
    assert!(dashboard.history().is_empty());

    let reloaded = Persistence::new(store).load().await;
    assert!(reloaded.sequence.is_none());
    assert!(reloaded.history.is_empty());
}

/// Reload after a game ended but before the next one started
#[tokio::test(start_paused = true)]
async fn test_reload_while_advance_pending() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (mut dashboard, _advances) = dashboard_with(Arc::new(FileStore::new(dir.path())));
        dashboard
            .configure_sequence(vec![WordPair::new("a", "b"), WordPair::new("c", "d")])
            .await
            .unwrap();
        dashboard.handle_push(vote(1, true)).await;
        assert_eq!(dashboard.sequencer().phase(), SequencerPhase::AdvancePending);
    }

    let (tx, mut advances) = mpsc::unbounded_channel();
    let mut restored = Dashboard::load(
        Persistence::new(Arc::new(FileStore::new(dir.path()))),
        RoundSequencer::new(DEFAULT_ADVANCE_DELAY, tx),
    )
    .await;
    assert_eq!(restored.sequencer().phase(), SequencerPhase::AdvancePending);

    let ticket = tokio::time::timeout(Duration::from_secs(15), advances.recv())
        .await
        .expect("restored advance must fire")
        .unwrap();
    let next = restored.on_advance_due(ticket).await.unwrap();
    assert_eq!(next.game_number, Some(2));
    assert_eq!(next.words, WordPair::new("c", "d"));
    assert!(!next.is_first_round_of_sequence);
    assert_eq!(restored.view().votes[0].key, "1_1");
}
