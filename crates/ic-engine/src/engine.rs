// engine.rs — Engine: the orchestrator over store, verifier, and events.
//
// The engine owns the store and wires the scheduling passes together.
// Its operations live with the pass they belong to: materialization in
// materializer.rs, proof intake and review in reconcile.rs, the daily
// sweep in sweep.rs, and penalty collection in settle.rs.

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventDispatcher, NotificationSink};
use crate::store::EngineStore;
use crate::verify::{HeuristicVerifier, Verifier};

pub struct Engine {
    pub(crate) store: EngineStore,
    pub(crate) config: EngineConfig,
    pub(crate) verifier: Box<dyn Verifier>,
    pub(crate) events: EventDispatcher,
}

impl Engine {
    /// An engine over the given store with the default heuristic verifier.
    pub fn new(store: EngineStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            verifier: Box::new(HeuristicVerifier),
            events: EventDispatcher::new(),
        }
    }

    /// Swap the scoring backend.
    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Register a notification sink for engine events.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.events.add_sink(sink);
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EngineStore {
        &mut self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fan an event out to all sinks. Sink failures are logged, never
    /// propagated: notification delivery does not gate state changes.
    pub(crate) fn dispatch(&self, event: &EngineEvent) {
        self.events.dispatch(event);
    }
}
