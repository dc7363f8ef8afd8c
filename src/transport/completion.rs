use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::error::TransportError;
use crate::message::Message;

/// Terminal state of one request.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The send succeeded. Carries the reply, or `None` for fire-and-forget.
    Ok(Option<Message>),
    /// The send failed; the leaf error kind is preserved.
    Failed(TransportError),
    /// The caller or an upstream orchestrator cancelled the request.
    Cancelled,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn reply(&self) -> Option<&Message> {
        match self {
            Outcome::Ok(Some(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TransportError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

type Listener = Box<dyn FnOnce(&Outcome) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct State {
    outcome: Option<Outcome>,
    listeners: Vec<Listener>,
    cancel_hooks: Vec<(u64, CancelHook)>,
    next_hook_id: u64,
}

struct Inner {
    message_id: u32,
    request: Mutex<Message>,
    state: Mutex<State>,
}

/// Single-assignment result slot for one request.
///
/// Transitions pending → terminal exactly once; later writes are no-ops.
/// Listeners registered with [`on_complete`](Self::on_complete) run in
/// registration order on the task that resolves the slot. Cancel hooks
/// propagate a [`cancel`](Self::cancel) into the channel, watchdog and
/// registry, and are dropped unrun on normal completion.
///
/// Clones share the same slot.
#[derive(Clone)]
pub struct ResponseCompletion {
    inner: Arc<Inner>,
}

impl ResponseCompletion {
    pub fn new(request: Message) -> Self {
        Self {
            inner: Arc::new(Inner {
                message_id: request.message_id,
                request: Mutex::new(request),
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    cancel_hooks: Vec::new(),
                    next_hook_id: 1,
                }),
            }),
        }
    }

    /// The request's message id. Stable for the lifetime of the completion.
    pub fn message_id(&self) -> u32 {
        self.inner.message_id
    }

    /// Snapshot of the request message.
    pub fn request(&self) -> Message {
        self.inner.request.lock().clone()
    }

    /// Mutates the request in place. Only meaningful before the bytes left
    /// the encoder; orchestrators use this for descriptor rewrites.
    pub fn update_request(&self, f: impl FnOnce(&mut Message)) {
        f(&mut self.inner.request.lock());
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn outcome_now(&self) -> Option<Outcome> {
        self.inner.state.lock().outcome.clone()
    }

    /// Resolves with a reply (or `None` for fire-and-forget). No-op if
    /// already terminal.
    pub fn succeed(&self, reply: Option<Message>) {
        self.resolve(Outcome::Ok(reply));
    }

    /// Resolves with a failure. No-op if already terminal.
    pub fn fail(&self, error: TransportError) {
        self.resolve(Outcome::Failed(error));
    }

    /// Cancels the request: runs every registered cancel hook (aborting the
    /// connect, disarming the watchdog, evicting the registry entry), then
    /// resolves `Cancelled`. Idempotent; a no-op after normal completion.
    pub fn cancel(&self) {
        let hooks = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return;
            }
            std::mem::take(&mut state.cancel_hooks)
        };
        for (_, hook) in hooks {
            hook();
        }
        self.resolve(Outcome::Cancelled);
    }

    /// Registers a listener; runs immediately if already terminal.
    pub fn on_complete(&self, listener: impl FnOnce(&Outcome) + Send + 'static) {
        let run_now = {
            let mut state = self.inner.state.lock();
            match &state.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        if let Some(outcome) = run_now {
            listener(&outcome);
        }
    }

    /// Registers a cancel hook; returns an id for removal. Hooks are
    /// dropped (not run) when the completion resolves normally.
    pub fn add_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) -> u64 {
        let mut state = self.inner.state.lock();
        if state.outcome.is_some() {
            return 0;
        }
        let id = state.next_hook_id;
        state.next_hook_id += 1;
        state.cancel_hooks.push((id, Box::new(hook)));
        id
    }

    pub fn remove_cancel_hook(&self, id: u64) {
        self.inner
            .state
            .lock()
            .cancel_hooks
            .retain(|(hook_id, _)| *hook_id != id);
    }

    /// Waits for the terminal outcome.
    pub async fn outcome(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        rx.await.unwrap_or(Outcome::Cancelled)
    }

    fn resolve(&self, outcome: Outcome) {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            state.cancel_hooks.clear();
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener(&outcome);
        }
    }
}

impl fmt::Debug for ResponseCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCompletion")
            .field("message_id", &self.inner.message_id)
            .field("outcome", &self.inner.state.lock().outcome)
            .finish()
    }
}
