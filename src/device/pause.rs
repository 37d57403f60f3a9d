//! Gate the send loop waits on before each pass

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Paused,
    Disposed,
}

/// Why a wait on the gate ended without the gate opening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateClosed {
    Cancelled,
    Disposed,
}

/// Single-slot broadcast of the pause state
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<GateState>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Open);
        Self { tx }
    }

    /// Returns false once the gate is disposed
    pub fn pause(&self) -> bool {
        self.transition(GateState::Paused)
    }

    /// Returns false once the gate is disposed
    pub fn resume(&self) -> bool {
        self.transition(GateState::Open)
    }

    fn transition(&self, next: GateState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == GateState::Disposed || *state == next {
                return false;
            }
            *state = next;
            true
        });
        !self.is_disposed()
    }

    /// Release every waiter for good
    pub fn dispose(&self) {
        self.tx.send_replace(GateState::Disposed);
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow() == GateState::Paused
    }

    pub fn is_disposed(&self) -> bool {
        *self.tx.borrow() == GateState::Disposed
    }

    /// Wait until the gate is open
    pub async fn wait_open(&self, token: &CancellationToken) -> Result<(), GateClosed> {
        let mut rx = self.tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                GateState::Open => return Ok(()),
                GateState::Disposed => return Err(GateClosed::Disposed),
                GateState::Paused => {}
            }

            tokio::select! {
                _ = token.cancelled() => return Err(GateClosed::Cancelled),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(GateClosed::Disposed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_open_gate_passes_immediately() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        assert_eq!(gate.wait_open(&token).await, Ok(()));
    }

    #[tokio::test]
    async fn test_paused_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::new());
        let token = CancellationToken::new();
        assert!(gate.pause());
        assert!(gate.is_paused());

        let waiter = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.wait_open(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        assert!(gate.resume());
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_dispose_wakes_waiter_and_sticks() {
        let gate = Arc::new(PauseGate::new());
        let token = CancellationToken::new();
        gate.pause();

        let waiter = {
            let gate = gate.clone();
            let token = token.clone();
            tokio::spawn(async move { gate.wait_open(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        gate.dispose();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(result, Err(GateClosed::Disposed));

        assert!(!gate.resume());
        assert!(!gate.pause());
        assert!(gate.is_disposed());
    }

    #[tokio::test]
    async fn test_cancel_ends_wait() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        gate.pause();
        token.cancel();
        assert_eq!(gate.wait_open(&token).await, Err(GateClosed::Cancelled));
    }
}
