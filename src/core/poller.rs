// Background polling of every configured server

use crate::clients::client::TorrentClient;
use crate::core::error::ClientError;
use crate::core::state::AppState;
use crate::stores::snapshot_store::SnapshotUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollRound {
    pub succeeded: usize,
    pub failed: usize,
}

/// Fetch one server's tasks and fold them into its snapshot
pub async fn poll_server(state: &AppState, client: &dyn TorrentClient) -> Result<SnapshotUpdate, ClientError> {
    let name = client.server().name.as_str();

    match client.get_tasks().await {
        Ok(tasks) => {
            let task_count = tasks.len();
            let update = state.snapshots.update(name, tasks);
            state.poll_errors.remove(name);
            state
                .metrics
                .record_success(update.patch_count, update.has_changes.then_some(&update.savings));

            debug!(
                server = name,
                tasks = task_count,
                revision = update.revision,
                patches = update.patch_count,
                saved_percent = update.savings.saved_percent,
                "Poll completed"
            );
            Ok(update)
        }
        Err(e) => {
            warn!(server = name, kind = %client.kind(), error = %e, "Poll failed");
            state.metrics.record_failure();
            state.poll_errors.insert(name.to_string(), e.to_string());
            Err(e)
        }
    }
}

/// Poll every server concurrently; one failing server never blocks the others
pub async fn poll_all(state: &AppState) -> PollRound {
    let mut tasks = JoinSet::new();
    for client in state.clients.iter() {
        let client = Arc::clone(client);
        let state = state.clone();
        tasks.spawn(async move { poll_server(&state, client.as_ref()).await.is_ok() });
    }

    let mut round = PollRound::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => round.succeeded += 1,
            Ok(false) => round.failed += 1,
            Err(e) => {
                error!(error = %e, "Poll task panicked");
                round.failed += 1;
            }
        }
    }
    round
}

/// Poll on a fixed interval until `shutdown` flips to true
pub async fn run_poller(state: AppState, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        servers = state.clients.len(),
        interval_secs = interval.as_secs(),
        "Poller started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let round = poll_all(&state).await;
                debug!(succeeded = round.succeeded, failed = round.failed, "Poll round finished");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock_server::{test_config, FakeClient};

    fn state(clients: Vec<Arc<dyn TorrentClient>>) -> AppState {
        AppState::new(test_config(), clients)
    }

    #[tokio::test]
    async fn test_poll_round_counts_failures_separately() {
        let state = state(vec![
            Arc::new(FakeClient::new("good", false)),
            Arc::new(FakeClient::new("bad", true)),
        ]);

        let round = poll_all(&state).await;
        assert_eq!(round, PollRound { succeeded: 1, failed: 1 });

        assert!(state.snapshots.get("good").is_some());
        assert!(state.snapshots.get("bad").is_none());
        assert!(state.poll_errors.get("bad").is_some());

        let metrics = state.metrics.get_snapshot(&state.snapshots);
        assert_eq!(metrics.total_polls, 2);
        assert_eq!(metrics.failed_polls, 1);
    }

    #[tokio::test]
    async fn test_consecutive_polls_emit_replaces() {
        let state = state(vec![Arc::new(FakeClient::new("good", false))]);

        poll_all(&state).await;
        poll_all(&state).await;

        let snapshot = state.snapshots.get("good").unwrap();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.last_patches.len(), 1);
        assert_eq!(snapshot.last_patches[0].path(), "/0/progress");
        assert_eq!(snapshot.tasks[0].progress, 10.0);
    }

    #[tokio::test]
    async fn test_poller_stops_on_shutdown() {
        let state = state(vec![Arc::new(FakeClient::new("good", false))]);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_poller(state.clone(), Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(state.snapshots.get("good").is_some());
    }
}
