//! Auto-accept countdown

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::workers::dispatcher::Command;

/// Countdown that asks the dispatcher to accept the pending update once it elapses.
///
/// Every start bumps the generation; ticks and elapse notices carry it so the
/// dispatcher can drop notices from a cancelled countdown that were already queued.
#[derive(Debug)]
pub struct AcceptCountdown {
    length: Duration,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl AcceptCountdown {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            generation: 0,
            handle: None,
        }
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a notice belongs to the countdown currently running
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation == generation
    }

    /// (Re)start from the full length
    pub fn start(&mut self, commands: mpsc::Sender<Command>) {
        self.cancel();
        let generation = self.generation;
        let seconds = self.length.as_secs();
        debug!("Starting {}s accept countdown ({})", seconds, generation);

        self.handle = Some(tokio::spawn(async move {
            for remaining in (1..=seconds).rev() {
                if commands
                    .send(Command::CountdownTick { generation, remaining })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            let _ = commands.send(Command::CountdownElapsed { generation }).await;
        }));
    }

    /// Stop the timer. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Accept countdown {} cancelled", self.generation);
        }
        self.generation += 1;
    }

    /// Mark the current countdown as finished after its elapse notice was handled
    pub fn finish(&mut self) {
        self.handle = None;
        self.generation += 1;
    }
}

impl Drop for AcceptCountdown {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_then_elapses_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut countdown = AcceptCountdown::new(Duration::from_secs(3));
        countdown.start(tx);
        let generation = countdown.generation;

        let mut ticks = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                Command::CountdownTick { remaining, .. } => ticks.push(remaining),
                Command::CountdownElapsed { generation: g } => {
                    assert_eq!(g, generation);
                    break;
                }
                other => panic!("unexpected command: {:?}", other),
            }
        }
        assert_eq!(ticks, vec![3, 2, 1]);
        assert!(countdown.is_current(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timer() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut countdown = AcceptCountdown::new(Duration::from_secs(2));
        countdown.start(tx);
        let generation = countdown.generation;

        assert!(matches!(rx.recv().await, Some(Command::CountdownTick { remaining: 2, .. })));
        countdown.cancel();
        assert!(!countdown.is_current(generation));
        assert!(!countdown.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
