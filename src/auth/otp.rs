//! One-time-password resend countdown.
//!
//! After an OTP is sent the user has to wait out the countdown before
//! asking for another. Each start replaces the previous countdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::mutex_lock;

pub const DEFAULT_OTP_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPhase {
  Idle,
  Counting { remaining: Duration },
  Expired,
}

impl OtpPhase {
  pub fn can_resend(&self) -> bool {
    !matches!(self, OtpPhase::Counting { .. })
  }
}

pub struct OtpCountdown {
  phase: Arc<watch::Sender<OtpPhase>>,
  tick: Duration,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl OtpCountdown {
  pub fn new() -> Self {
    Self::with_tick(Duration::from_secs(1))
  }

  pub fn with_tick(tick: Duration) -> Self {
    let (phase, _) = watch::channel(OtpPhase::Idle);
    Self {
      phase: Arc::new(phase),
      tick,
      task: Mutex::new(None),
    }
  }

  pub fn phase(&self) -> OtpPhase {
    *self.phase.borrow()
  }

  pub fn watch(&self) -> watch::Receiver<OtpPhase> {
    self.phase.subscribe()
  }

  pub fn can_resend(&self) -> bool {
    self.phase().can_resend()
  }

  /// Count down from `window`, one update per tick.
  pub fn start(&self, window: Duration) {
    let mut slot = mutex_lock(&self.task, "auth.otp", "start");
    if let Some(previous) = slot.take() {
      previous.abort();
    }

    if window.is_zero() {
      self.phase.send_replace(OtpPhase::Expired);
      return;
    }
    self.phase.send_replace(OtpPhase::Counting { remaining: window });
    debug!(seconds = window.as_secs(), "OTP countdown started");

    let phase = Arc::clone(&self.phase);
    let tick = self.tick;
    *slot = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick);
      ticker.tick().await;

      let mut remaining = window;
      while !remaining.is_zero() {
        ticker.tick().await;
        remaining = remaining.saturating_sub(tick);
        let next = if remaining.is_zero() {
          OtpPhase::Expired
        } else {
          OtpPhase::Counting { remaining }
        };
        phase.send_replace(next);
      }
      debug!("OTP countdown expired");
    }));
  }

  pub fn cancel(&self) {
    if let Some(task) = mutex_lock(&self.task, "auth.otp", "cancel").take() {
      task.abort();
    }
    self.phase.send_replace(OtpPhase::Idle);
  }
}

impl Default for OtpCountdown {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for OtpCountdown {
  fn drop(&mut self) {
    if let Some(task) = mutex_lock(&self.task, "auth.otp", "drop").take() {
      task.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn counts_down_then_expires() {
    let countdown = OtpCountdown::new();
    assert_eq!(countdown.phase(), OtpPhase::Idle);
    assert!(countdown.can_resend());

    countdown.start(Duration::from_secs(3));
    assert_eq!(
      countdown.phase(),
      OtpPhase::Counting {
        remaining: Duration::from_secs(3)
      }
    );
    assert!(!countdown.can_resend());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
      countdown.phase(),
      OtpPhase::Counting {
        remaining: Duration::from_secs(2)
      }
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(countdown.phase(), OtpPhase::Expired);
    assert!(countdown.can_resend());
  }

  #[tokio::test(start_paused = true)]
  async fn restart_replaces_previous_countdown() {
    let countdown = OtpCountdown::new();
    countdown.start(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    countdown.start(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert_eq!(
      countdown.phase(),
      OtpPhase::Counting {
        remaining: Duration::from_secs(2)
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_goes_idle() {
    let countdown = OtpCountdown::new();
    let mut phases = countdown.watch();
    countdown.start(Duration::from_secs(10));
    countdown.cancel();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(*phases.borrow_and_update(), OtpPhase::Idle);
  }
}
