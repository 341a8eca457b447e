use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Fixed-window client-side throttle for "resend code"
///
/// Advisory only; the identity service enforces its own limits.
#[derive(Debug)]
pub struct ResendCooldown {
    window: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ResendCooldown {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sent: Mutex::new(None),
        }
    }

    /// Start a window now, or report how long the current one has left
    ///
    /// # Errors
    ///
    /// Returns the remaining time when a window is still open
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(sent_at) = *last_sent {
            let elapsed = now.saturating_duration_since(sent_at);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }
        *last_sent = Some(now);
        Ok(())
    }

    /// Time left in the current window, if one is open
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        last_sent.and_then(|sent_at| {
            self.window
                .checked_sub(Instant::now().saturating_duration_since(sent_at))
                .filter(|left| !left.is_zero())
        })
    }

    /// Close the window, e.g. after the send itself failed
    pub fn reset(&self) {
        *self.last_sent.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
