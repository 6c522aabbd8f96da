#![warn(missing_docs)]
//! Control-plane agent scaffolding shared by every agent binary: the
//! `Service` bus-server bootstrap, the `SvcError` taxonomy, and the
//! `WorkQueue`/`CancellableQueue` per-component serialization primitive.
//!
//! A `Service` owns a set of channels, each with its own set of
//! `ServiceSubscriber`s. `run()` spawns one task per channel which pulls
//! inbound messages off the bus and routes each to whichever subscriber's
//! `filter()` claims its message id.

pub mod errors;
pub mod msg_translation;
pub mod work_queue;

pub use errors::SvcError;
pub use work_queue::{CancellableQueue, Closed, WorkQueue};

pub use async_trait::async_trait;
pub use mbus_api::{MessageId, ReceivedMessage};
pub use std::marker::PhantomData;

use dyn_clonable::clonable;
use futures::future::join_all;
use mbus_api::{
    v0::{ChannelVs, Liveness},
    Channel,
    DynBus,
    InboundMessage,
    Message,
};
use std::{collections::HashMap, convert::TryInto, sync::Arc};
use tracing::error;

/// Service handling context: access to the shared message bus and to
/// whatever state a `configure()` callback stashed away with
/// `with_shared_state`.
#[derive(Clone)]
pub struct Context<'a> {
    bus: &'a DynBus,
    state: &'a state::Container,
}
impl<'a> Context<'a> {
    /// Borrow the message bus handle
    pub fn get_bus_as_ref(&self) -> &'a DynBus {
        self.bus
    }

    /// Fetch a reference to shared state of type `T`, previously registered
    /// via `Service::with_shared_state`.
    pub fn get_state<T: Send + Sync + 'static>(
        &self,
    ) -> Result<&'a T, SvcError> {
        self.state.try_get().ok_or_else(|| SvcError::Internal {
            details: format!(
                "shared state '{}' was never registered",
                std::any::type_name::<T>()
            ),
        })
    }
}

/// Arguments passed to a `ServiceSubscriber::handler` call.
pub struct Arguments<'a> {
    /// Service context: bus handle plus shared state
    pub context: Context<'a>,
    /// The inbound message that matched this subscriber's filter
    pub request: &'a InboundMessage,
}
impl<'a> Arguments<'a> {
    /// Build a new `Arguments` for a single inbound message
    pub fn new(
        bus: &'a DynBus,
        state: &'a state::Container,
        request: &'a InboundMessage,
    ) -> Self {
        Self {
            context: Context { bus, state },
            request,
        }
    }
}

#[async_trait]
#[clonable]
/// Implemented by every message handler registered on a `Service`. `filter`
/// declares which message ids this subscriber claims; `handler` processes a
/// matching inbound message.
pub trait ServiceSubscriber: Clone + Send + Sync {
    /// Handle a single inbound message
    async fn handler(&self, args: Arguments<'_>) -> Result<(), SvcError>;
    /// Message ids this subscriber wants routed to it
    fn filter(&self) -> Vec<MessageId>;
}

#[derive(Clone, Default)]
struct LivenessHandler {}
#[async_trait]
impl ServiceSubscriber for LivenessHandler {
    async fn handler(&self, args: Arguments<'_>) -> Result<(), SvcError> {
        let request: ReceivedMessage<Liveness> = args.request.try_into()?;
        Ok(request.reply(()).await?)
    }
    fn filter(&self) -> Vec<MessageId> {
        vec![Liveness::default().id()]
    }
}

/// A runnable agent process: connects to the message bus, serves every
/// registered subscriber on its channel, and holds whatever shared state
/// `configure()` installed (a registry, a svc struct, ...).
pub struct Service {
    server: String,
    channel: Channel,
    subscriptions: HashMap<String, Vec<Box<dyn ServiceSubscriber>>>,
    shared_state: Arc<state::Container>,
    bus: Option<DynBus>,
}
impl Default for Service {
    fn default() -> Self {
        Self {
            server: "nats://127.0.0.1:4222".to_string(),
            channel: Channel::v0(ChannelVs::Default),
            subscriptions: HashMap::new(),
            shared_state: Arc::new(state::Container::new()),
            bus: None,
        }
    }
}

impl Service {
    /// Start building a service which will connect to `server` and, by
    /// default, subscribe on `channel`.
    pub fn builder<C: Into<Channel>>(server: String, channel: C) -> Self {
        Self {
            server,
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// Override the default channel used by `with_subscription`.
    pub fn with_channel(mut self, channel: ChannelVs) -> Self {
        self.channel = Channel::v0(channel);
        self
    }

    /// Register a subscriber that replies to `Liveness` probes on every
    /// channel this service ends up serving.
    pub fn with_default_liveness(self) -> Self {
        let channel = self.channel.clone();
        self.with_subscription_channel(channel, LivenessHandler::default())
    }

    /// Connect to the message bus. Must be called before `run()`; agent
    /// binaries call this straight after `builder()` so `configure()`
    /// closures can immediately issue requests if they need to.
    pub async fn connect_message_bus(mut self) -> Self {
        mbus_api::message_bus_init(self.server.clone()).await;
        self.bus = Some(mbus_api::bus());
        self
    }

    /// Install a piece of shared state, retrievable from any handler via
    /// `Context::get_state`. Only one value per type `T` may be registered.
    pub fn with_shared_state<T: Send + Sync + 'static>(
        self,
        state: T,
    ) -> Self {
        let set = self.shared_state.set(state);
        if !set {
            error!(
                "shared state of type '{}' was already set",
                std::any::type_name::<T>()
            );
        }
        self
    }

    /// Borrow state of type `T` registered earlier in the builder chain via
    /// `with_shared_state`. Used from `configure()` callbacks, which run
    /// before the service starts serving, to pick up state a previous
    /// `configure()` call (or `server()` itself) already installed, e.g. the
    /// core `Registry`. Panics if `T` was never registered.
    pub fn get_shared_state<T: Send + Sync + 'static>(&self) -> &T {
        self.shared_state.get()
    }

    /// Run a module's `configure` callback against this builder; used to
    /// thread `node::configure`/`pool::configure`/`volume::configure`
    /// together without each one needing to know about the others.
    pub fn configure(self, configure: fn(Self) -> Self) -> Self {
        configure(self)
    }

    /// Register `subscriber` on the default channel
    pub fn with_subscription(
        self,
        subscriber: impl ServiceSubscriber + 'static,
    ) -> Self {
        let channel = self.channel.clone();
        self.with_subscription_channel(channel, subscriber)
    }

    /// Register `subscriber` on an explicit channel
    pub fn with_subscription_channel(
        mut self,
        channel: Channel,
        subscriber: impl ServiceSubscriber + 'static,
    ) -> Self {
        self.subscriptions
            .entry(channel.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(subscriber));
        self
    }

    async fn run_channel(
        bus: DynBus,
        shared_state: Arc<state::Container>,
        channel: Channel,
        subscriptions: Vec<Box<dyn ServiceSubscriber>>,
    ) {
        let mut handle = match bus.subscribe(channel.clone()).await {
            Ok(handle) => handle,
            Err(error) => {
                error!(%channel, %error, "failed to subscribe on channel");
                return;
            }
        };

        while let Some(message) = handle.next().await {
            let args =
                Arguments::new(&bus, &shared_state, &message);
            if let Err(error) =
                Self::process_message(args, &subscriptions).await
            {
                error!(%channel, %error, "error processing message");
            }
        }
    }

    async fn process_message(
        args: Arguments<'_>,
        subscriptions: &[Box<dyn ServiceSubscriber>],
    ) -> Result<(), SvcError> {
        let id = args.request.id()?;
        let subscriber = subscriptions
            .iter()
            .find(|s| s.filter().iter().any(|found| found == &id))
            .ok_or_else(|| SvcError::Internal {
                details: format!(
                    "no subscriber registered for message id '{:?}'",
                    id
                ),
            })?;
        subscriber.handler(args).await
    }

    /// Serve every registered channel until every subscriber task exits
    /// (which, barring a bus disconnect, is never).
    pub async fn run(&self) {
        let bus = self
            .bus
            .clone()
            .expect("connect_message_bus() must be called before run()");

        let mut tasks = vec![];
        for (channel, subscriptions) in self.subscriptions.iter() {
            let bus = bus.clone();
            let shared_state = self.shared_state.clone();
            let channel: Channel =
                channel.parse().expect("channels round-trip through Display");
            let subscriptions = subscriptions.clone();
            tasks.push(tokio::spawn(Self::run_channel(
                bus,
                shared_state,
                channel,
                subscriptions,
            )));
        }

        join_all(tasks).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                error!(%error, "subscriber task panicked");
            }
        });
    }
}
