//! Grace period between a dropped connection and a departed player
//!
//! Each disconnect opens an episode backed by a `DisconnectRecord` and a timer
//! task. The timer never touches game state: when it fires it sends a
//! `ReconnectTimeout` to the coordinator, which asks the supervisor to
//! `take_expired` before removing anyone. A rejoin removes the record and
//! aborts the timer, and because `take_expired` matches on the episode number
//! a timeout that was already queued when the rejoin arrived is ignored.

use crate::connection_index::ConnectionId;
use log::{debug, info};
use shared::PlayerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectRecord {
    pub player_id: PlayerId,
    pub game_code: String,
    pub connection_id: ConnectionId,
    pub disconnected_at: Instant,
}

/// Signal raised when a grace period runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectTimeout {
    pub game_code: String,
    pub player_id: PlayerId,
    episode: u64,
}

struct PendingReconnect {
    record: DisconnectRecord,
    episode: u64,
    timer: JoinHandle<()>,
}

pub struct ReconnectionSupervisor {
    grace_period: Duration,
    pending: HashMap<PlayerId, PendingReconnect>,
    next_episode: u64,
    timeout_tx: mpsc::UnboundedSender<ReconnectTimeout>,
}

impl ReconnectionSupervisor {
    /// Creates the supervisor together with the receiving end of its timeout signals.
    pub fn new(grace_period: Duration) -> (Self, mpsc::UnboundedReceiver<ReconnectTimeout>) {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            grace_period,
            pending: HashMap::new(),
            next_episode: 1,
            timeout_tx,
        };
        (supervisor, timeout_rx)
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Arms the grace timer for a player. Returns false, leaving the existing
    /// timer alone, if the player is already waiting to reconnect.
    pub fn player_disconnected(
        &mut self,
        game_code: &str,
        player_id: &str,
        connection_id: ConnectionId,
    ) -> bool {
        if self.pending.contains_key(player_id) {
            debug!("Player {} already has a pending reconnection", player_id);
            return false;
        }

        let episode = self.next_episode;
        self.next_episode += 1;

        let signal = ReconnectTimeout {
            game_code: game_code.to_string(),
            player_id: player_id.to_string(),
            episode,
        };
        let timeout_tx = self.timeout_tx.clone();
        let grace_period = self.grace_period;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            let _ = timeout_tx.send(signal);
        });

        info!(
            "Player {} in game {} disconnected, waiting {:?} for rejoin",
            player_id, game_code, grace_period
        );
        self.pending.insert(
            player_id.to_string(),
            PendingReconnect {
                record: DisconnectRecord {
                    player_id: player_id.to_string(),
                    game_code: game_code.to_string(),
                    connection_id,
                    disconnected_at: Instant::now(),
                },
                episode,
                timer,
            },
        );
        true
    }

    /// Cancels the grace timer if the player is waiting to reconnect to `game_code`.
    pub fn player_rejoined(&mut self, game_code: &str, player_id: &str) -> Option<DisconnectRecord> {
        match self.pending.get(player_id) {
            Some(pending) if pending.record.game_code == game_code => {}
            _ => return None,
        }

        let pending = self.pending.remove(player_id)?;
        pending.timer.abort();
        info!(
            "Player {} rejoined game {} after {:?}",
            player_id,
            game_code,
            pending.record.disconnected_at.elapsed()
        );
        Some(pending.record)
    }

    /// Consumes a fired timeout. Returns the record only if the episode it
    /// belongs to is still pending.
    pub fn take_expired(&mut self, timeout: &ReconnectTimeout) -> Option<DisconnectRecord> {
        match self.pending.get(&timeout.player_id) {
            Some(pending) if pending.episode == timeout.episode => {}
            _ => {
                debug!(
                    "Ignoring stale reconnect timeout for player {}",
                    timeout.player_id
                );
                return None;
            }
        }

        let pending = self.pending.remove(&timeout.player_id)?;
        info!(
            "Player {} did not rejoin game {} in time",
            timeout.player_id, timeout.game_code
        );
        Some(pending.record)
    }

    /// Drops a pending episode without waiting for it, e.g. when the player is
    /// removed explicitly while disconnected.
    pub fn cancel(&mut self, player_id: &str) -> bool {
        match self.pending.remove(player_id) {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, player_id: &str) -> bool {
        self.pending.contains_key(player_id)
    }

    pub fn pending_record(&self, player_id: &str) -> Option<&DisconnectRecord> {
        self.pending.get(player_id).map(|p| &p.record)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_grace_period() {
        let (mut supervisor, mut timeouts) = ReconnectionSupervisor::new(GRACE);
        assert!(supervisor.player_disconnected("ABC", "p1", 7));
        assert!(supervisor.is_pending("p1"));

        tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
        assert!(timeouts.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let timeout = timeouts.recv().await.unwrap();
        assert_eq!(timeout.player_id, "p1");
        assert_eq!(timeout.game_code, "ABC");

        let record = supervisor.take_expired(&timeout).unwrap();
        assert_eq!(record.connection_id, 7);
        assert!(!supervisor.is_pending("p1"));
        assert_eq!(supervisor.take_expired(&timeout), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_cancels_timer() {
        let (mut supervisor, mut timeouts) = ReconnectionSupervisor::new(GRACE);
        supervisor.player_disconnected("ABC", "p1", 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let record = supervisor.player_rejoined("ABC", "p1").unwrap();
        assert_eq!(record.game_code, "ABC");

        tokio::time::sleep(GRACE * 2).await;
        assert!(timeouts.try_recv().is_err());
        assert_eq!(supervisor.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_for_other_game_is_ignored() {
        let (mut supervisor, _timeouts) = ReconnectionSupervisor::new(GRACE);
        supervisor.player_disconnected("ABC", "p1", 1);

        assert_eq!(supervisor.player_rejoined("XYZ", "p1"), None);
        assert_eq!(supervisor.player_rejoined("ABC", "p2"), None);
        assert!(supervisor.is_pending("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_disconnect_does_not_rearm() {
        let (mut supervisor, mut timeouts) = ReconnectionSupervisor::new(GRACE);
        assert!(supervisor.player_disconnected("ABC", "p1", 1));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!supervisor.player_disconnected("ABC", "p1", 2));
        assert_eq!(supervisor.pending_record("p1").unwrap().connection_id, 1);

        // Fires on the original schedule, exactly once.
        tokio::time::sleep(Duration::from_secs(11)).await;
        let timeout = timeouts.recv().await.unwrap();
        assert!(supervisor.take_expired(&timeout).is_some());

        tokio::time::sleep(GRACE).await;
        assert!(timeouts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_timeout_after_rejoin_is_stale() {
        let (mut supervisor, mut timeouts) = ReconnectionSupervisor::new(GRACE);
        supervisor.player_disconnected("ABC", "p1", 1);

        tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
        let timeout = timeouts.recv().await.unwrap();

        // The rejoin was processed before the coordinator got to the timeout,
        // then the player dropped again.
        assert!(supervisor.player_rejoined("ABC", "p1").is_some());
        supervisor.player_disconnected("ABC", "p1", 2);

        assert_eq!(supervisor.take_expired(&timeout), None);
        assert!(supervisor.is_pending("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (mut supervisor, mut timeouts) = ReconnectionSupervisor::new(GRACE);
        supervisor.player_disconnected("ABC", "p1", 1);

        assert!(supervisor.cancel("p1"));
        assert!(!supervisor.cancel("p1"));

        tokio::time::sleep(GRACE * 2).await;
        assert!(timeouts.try_recv().is_err());
    }
}
