//! Demo binary running a complete quiz round in-process: one host, three
//! players, an in-memory store behind the retry decorator.

use std::sync::Arc;

use anyhow::Context;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zoodle_sync::config::EngineConfig;
use zoodle_sync::dao::memory::MemoryStore;
use zoodle_sync::dao::retry::RetryingStore;
use zoodle_sync::dao::storage::RecordStore;
use zoodle_sync::dto::{CreateGameInput, CurrentQuestion, JoinGameInput, QuestionInput};
use zoodle_sync::feed::ChangeFeed;
use zoodle_sync::services::{HostClient, PlayerClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = EngineConfig::load();
    let feed = ChangeFeed::new(config.feed_capacity);
    let memory: Arc<dyn RecordStore> = Arc::new(MemoryStore::new(feed.clone()));
    let store: Arc<dyn RecordStore> = Arc::new(RetryingStore::new(memory, config.retry));

    let host = HostClient::create_game(
        store.clone(),
        &feed,
        &config,
        &CreateGameInput {
            title: "Capital cities".into(),
            description: "A quick warm-up round".into(),
            category: Some("geography".into()),
        },
    )
    .await
    .context("creating game")?;

    for (text, correct, wrong, points) in [
        ("Capital of France?", "Paris", ["London", "Berlin", "Madrid"], 100),
        ("Capital of Japan?", "Tokyo", ["Kyoto", "Osaka", "Seoul"], 100),
        ("Capital of Australia?", "Canberra", ["Sydney", "Melbourne", "Perth"], 150),
    ] {
        host.add_question(&QuestionInput {
            text: text.into(),
            correct_answer: correct.into(),
            incorrect_answers: wrong.map(String::from).to_vec(),
            points,
        })
        .await
        .context("adding question")?;
    }

    let mut players = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let player = PlayerClient::join(
            store.clone(),
            feed.clone(),
            host.game_id(),
            &JoinGameInput {
                player_name: name.into(),
            },
        )
        .await
        .with_context(|| format!("joining as {name}"))?;
        players.push(player);
    }

    host.start_game().await.context("starting game")?;

    loop {
        // Let the phase write and session updates propagate.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut live_question = None;
        for player in &players {
            if let CurrentQuestion::Question(view) = player.current_question().await {
                live_question = Some(view);
                break;
            }
        }
        let Some(view) = live_question else { break };

        info!(
            position = view.position + 1,
            total = view.total,
            text = %view.text,
            "presenting question"
        );

        for player in &players {
            let answers = view.shuffled_answers();
            let pick = &answers[rand::rng().random_range(0..answers.len())];
            let result = player.submit_answer(view.question_id, pick).await?;
            info!(
                player = player.player_name(),
                answer = %pick,
                correct = result.correct,
                score = result.new_score,
                "answer submitted"
            );
        }

        host.advance_question().await.context("advancing question")?;
        if matches!(host.current_question().await, CurrentQuestion::Completed) {
            break;
        }
    }

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    for row in host.leaderboard_snapshot().await {
        info!(
            rank = row.rank,
            player = %row.player_name,
            score = row.score,
            "final standing"
        );
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
