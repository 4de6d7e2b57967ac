use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::PreloadReason;

/// Observable states of the one-shot preload latch. `Fired` and `Cancelled`
/// are terminal; every transition out of `Armed` happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Armed,
    Fired(PreloadReason),
    Cancelled,
}

/// Single-shot latch gating a preload. Armed with an optional timer; fires
/// once on timeout or external signal, or cancels when the descriptor
/// closes. Later fire/cancel calls are no-ops, and subscribers that attach
/// after resolution observe the recorded outcome.
pub struct PreloadTrigger {
    state: watch::Sender<TriggerState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for PreloadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreloadTrigger")
            .field("state", &self.state())
            .finish()
    }
}

impl PreloadTrigger {
    /// An armed trigger with no timer; only an explicit `fire` or `cancel`
    /// resolves it.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: watch::Sender::new(TriggerState::Armed),
            timer: Mutex::new(None),
        })
    }

    /// An armed trigger whose timer fires with `reason` after `timeout`.
    /// A zero timeout fires as soon as the runtime gets a chance.
    pub fn fire_after(timeout: Duration, reason: PreloadReason) -> Arc<Self> {
        let trigger = Self::new();
        let weak = Arc::downgrade(&trigger);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(trigger) = weak.upgrade() {
                trigger.fire(reason);
            }
        });
        *trigger.timer.lock().expect("trigger timer lock") = Some(handle);
        trigger
    }

    /// Resolve to `Fired(reason)`. Returns false if already resolved.
    pub fn fire(&self, reason: PreloadReason) -> bool {
        self.transition(TriggerState::Fired(reason))
    }

    /// Resolve to `Cancelled`. Returns false if already resolved.
    pub fn cancel(&self) -> bool {
        self.transition(TriggerState::Cancelled)
    }

    pub fn state(&self) -> TriggerState {
        *self.state.borrow()
    }

    /// Wait for resolution. Resolves immediately when the trigger is
    /// already terminal.
    pub async fn resolved(&self) -> TriggerState {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| *state != TriggerState::Armed)
            .await
            .expect("trigger sender lives as long as self");
        *state
    }

    fn transition(&self, next: TriggerState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == TriggerState::Armed {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            // The timer is released on any transition out of Armed.
            if let Some(timer) = self.timer.lock().expect("trigger timer lock").take() {
                timer.abort();
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_once_and_stays_fired() {
        let trigger = PreloadTrigger::new();
        assert_eq!(trigger.state(), TriggerState::Armed);
        assert!(trigger.fire(PreloadReason::Read));
        assert!(!trigger.fire(PreloadReason::Time));
        assert!(!trigger.cancel());
        assert_eq!(trigger.state(), TriggerState::Fired(PreloadReason::Read));
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let trigger = PreloadTrigger::new();
        assert!(trigger.cancel());
        assert!(!trigger.fire(PreloadReason::Time));
        assert_eq!(trigger.state(), TriggerState::Cancelled);
    }

    #[tokio::test]
    async fn timer_fires_with_default_reason() {
        let trigger = PreloadTrigger::fire_after(Duration::from_millis(10), PreloadReason::Time);
        assert_eq!(
            trigger.resolved().await,
            TriggerState::Fired(PreloadReason::Time)
        );
    }

    #[tokio::test]
    async fn explicit_fire_beats_timer() {
        let trigger = PreloadTrigger::fire_after(Duration::from_secs(60), PreloadReason::Time);
        assert!(trigger.fire(PreloadReason::Read));
        assert_eq!(
            trigger.resolved().await,
            TriggerState::Fired(PreloadReason::Read)
        );
    }

    #[tokio::test]
    async fn zero_timeout_fires_immediately() {
        let trigger = PreloadTrigger::fire_after(Duration::ZERO, PreloadReason::Time);
        assert_eq!(
            trigger.resolved().await,
            TriggerState::Fired(PreloadReason::Time)
        );
    }

    #[tokio::test]
    async fn late_subscriber_sees_recorded_resolution() {
        let trigger = PreloadTrigger::new();
        trigger.fire(PreloadReason::Read);
        // Subscribe after the transition: the recorded value is observed.
        assert_eq!(
            trigger.resolved().await,
            TriggerState::Fired(PreloadReason::Read)
        );
    }

    #[tokio::test]
    async fn cancel_clears_pending_timer() {
        let trigger = PreloadTrigger::fire_after(Duration::from_millis(10), PreloadReason::Time);
        assert!(trigger.cancel());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(trigger.state(), TriggerState::Cancelled);
    }
}
