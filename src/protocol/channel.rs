use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, trace};

use crate::error::HandlerFailure;

/// Callback invoked with the body of every message on its channel.
pub type Handler = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Out-of-band sink for handler failures.
pub type ErrorHook = Arc<dyn Fn(&HandlerFailure) + Send + Sync + 'static>;

/// A named topic and its handlers, in registration order.
pub struct Channel {
    name: String,
    handlers: Vec<Handler>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Peer-side map from channel name to ordered handlers.
///
/// Channels are created on first registration and never removed. Handlers are cloned out
/// of the lock before they run, so a handler may register more handlers.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Channel>>,
    error_hook: RwLock<ErrorHook>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        let hook: ErrorHook = Arc::new(log_failure);
        Self {
            channels: RwLock::new(HashMap::new()),
            error_hook: RwLock::new(hook),
        }
    }

    /// Append `handler` to `name`, creating the channel first if needed.
    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        let channel = channels
            .entry(name.to_owned())
            .or_insert_with(|| Channel::new(name));
        channel.handlers.push(Arc::new(handler));
        trace!(channel = name, handlers = channel.handlers.len(), "Handler registered");
    }

    /// Replace the hook that receives handler failures. The default logs them.
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        *self.error_hook.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(hook);
    }

    /// Run every handler of `channel` with `body`, in registration order.
    ///
    /// An unknown channel is silently ignored. A panicking handler is reported to the
    /// error hook and the remaining handlers still run. Returns how many handlers
    /// completed normally.
    pub fn dispatch(&self, channel: &str, body: &str) -> usize {
        let handlers: Vec<Handler> = {
            let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
            match channels.get(channel) {
                Some(entry) => entry.handlers.clone(),
                None => {
                    debug!(channel, "No handlers registered, message discarded");
                    return 0;
                }
            }
        };

        let mut delivered = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(body))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let failure = HandlerFailure {
                        channel: channel.to_owned(),
                        index,
                        reason: panic_reason(payload.as_ref()),
                    };
                    let hook = self
                        .error_hook
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    hook(&failure);
                }
            }
        }
        delivered
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(channel)
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Channel::handler_count)
    }

    /// Names of all channels with at least one handler, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.name().to_owned())
            .collect();
        names.sort();
        names
    }
}

fn log_failure(failure: &HandlerFailure) {
    error!(
        channel = %failure.channel,
        handler = failure.index,
        reason = %failure.reason,
        "Channel handler failed"
    );
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("handler panicked")
    }
}
