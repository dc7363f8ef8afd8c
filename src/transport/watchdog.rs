use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Per-channel idle timer.
///
/// Any read or write calls [`touch`](Self::touch); [`expired`](Self::expired)
/// resolves once the idle budget elapses with no touches in between. Reply
/// loops race it against the socket read and fail the waiting completion
/// with `IdleTimeout` when it wins. Fire-and-forget sends never arm one.
///
/// Clones share the same deadline.
#[derive(Clone)]
pub struct Watchdog {
    idle: Duration,
    deadline: Arc<Mutex<Instant>>,
}

impl Watchdog {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: Arc::new(Mutex::new(Instant::now() + idle)),
        }
    }

    /// Pushes the deadline out by the full idle budget.
    pub fn touch(&self) {
        *self.deadline.lock() = Instant::now() + self.idle;
    }

    /// Resolves when the deadline passes without being touched.
    pub async fn expired(&self) {
        loop {
            let deadline = *self.deadline.lock();
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}
