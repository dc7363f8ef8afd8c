use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::registry::{PendingRegistry, RconCache};
use crate::message::{Command, Message, MessageType};

/// Server-side handler for one command.
///
/// Returns the reply to write back, or `None` to stay silent (the sender's
/// watchdog turns silence into an idle timeout on their side).
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Message) -> Option<Message>;
}

/// What the channel loop should do with an inbound frame.
///
/// Channel loops own their sockets; the dispatcher never writes itself, it
/// hands back a tagged instruction instead.
#[derive(Debug)]
pub enum DispatchAction {
    /// Write this reply on the same channel.
    Reply(Message),
    /// Reverse-connection handoff: write this cached original request on
    /// the newly arrived channel and keep the channel open for its reply.
    SendCached(Message),
    /// Nothing to write.
    Nothing,
}

/// Routes inbound frames: responses to the pending registry, requests to
/// per-command handlers, reverse-connection back-dials to the cache.
pub struct Dispatcher {
    registry: Arc<PendingRegistry>,
    cached_requests: Arc<RconCache>,
    handlers: RwLock<HashMap<u8, Arc<dyn RequestHandler>>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<PendingRegistry>, cached_requests: Arc<RconCache>) -> Self {
        Self {
            registry,
            cached_requests,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    pub fn cached_requests(&self) -> &Arc<RconCache> {
        &self.cached_requests
    }

    /// Registers the handler for a command, replacing any previous one.
    pub fn register_handler(&self, command: Command, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().insert(command.to_byte(), handler);
    }

    pub fn unregister_handler(&self, command: Command) {
        self.handlers.write().remove(&command.to_byte());
    }

    /// Processes one inbound frame and returns the action for the channel.
    pub fn dispatch(&self, msg: Message) -> DispatchAction {
        if msg.kind.is_response() {
            self.registry.complete(msg);
            return DispatchAction::Nothing;
        }

        // A back-dialing peer announces itself with the original message id;
        // the cached request is written over the fresh channel.
        if msg.command == Command::Rcon && msg.kind == MessageType::Request3 {
            return match self.cached_requests.take(msg.message_id) {
                Some(completion) => {
                    let original = completion.request();
                    if let Err(e) = self.registry.register(&completion) {
                        warn!(message_id = msg.message_id, %e, "cannot re-register cached request");
                        return DispatchAction::Nothing;
                    }
                    debug!(
                        message_id = msg.message_id,
                        "reverse connection established, sending cached request"
                    );
                    DispatchAction::SendCached(original)
                }
                None => {
                    warn!(
                        message_id = msg.message_id,
                        "back-dial for unknown cached request"
                    );
                    DispatchAction::Nothing
                }
            };
        }

        if msg.command == Command::Ping {
            return DispatchAction::Reply(msg.reply(MessageType::Ok));
        }

        let handler = self.handlers.read().get(&msg.command.to_byte()).cloned();
        match handler {
            Some(handler) => match handler.handle(&msg) {
                Some(reply) => DispatchAction::Reply(reply),
                None => DispatchAction::Nothing,
            },
            None => {
                debug!(command = ?msg.command, "no handler for inbound command");
                DispatchAction::Nothing
            }
        }
    }
}
