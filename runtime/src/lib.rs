//! # Seatlock Runtime
//!
//! Runtime for seatlock reducers.
//!
//! The [`Store`] owns a reducer's state, runs the reducer under a write lock
//! and executes the effects it returns. Actions produced by effects are fed
//! back into the reducer and broadcast to observers.
//!
//! ## Core Components
//!
//! - **Store**: manages state and executes effects
//! - **Scheduler**: per-store registry of every spawned task; cancellable
//!   effects are keyed by [`EffectId`] so a reducer can replace or cancel its
//!   own timers
//! - **Retry**: exponential backoff for transient failures
//! - **Metrics**: metric names and the Prometheus recorder
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_runtime::Store;
//!
//! let store = Store::new(initial_state, my_reducer, environment);
//!
//! store.send(Action::DoSomething).await?;
//! let value = store.state(|s| s.some_field).await;
//!
//! // Aborts every timer and in-flight effect
//! store.shutdown();
//! ```

use seatlock_core::effect::{Effect, EffectId};
use seatlock_core::reducer::Reducer;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Timeout waiting for a matching action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Task registry backing a store's effects.
mod scheduler {
    use seatlock_core::effect::EffectId;
    use std::collections::HashMap;
    use std::future::Future;
    use tokio::task::{AbortHandle, JoinSet};

    struct Slot {
        generation: u64,
        handle: AbortHandle,
    }

    /// Every task a store spawned, with cancellable ones indexed by id.
    ///
    /// Keyed tasks carry a generation so a task that finished can tell
    /// whether it is still the registered owner of its id.
    #[derive(Default)]
    pub(crate) struct Scheduler {
        keyed: HashMap<EffectId, Slot>,
        tasks: JoinSet<()>,
        next_generation: u64,
    }

    impl Scheduler {
        pub(crate) fn spawn<F>(&mut self, fut: F) -> AbortHandle
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.reap();
            self.tasks.spawn(fut)
        }

        pub(crate) fn next_generation(&mut self) -> u64 {
            self.next_generation = self.next_generation.wrapping_add(1);
            self.next_generation
        }

        /// Registers `handle` under `id`, aborting any task already there.
        ///
        /// Returns `true` if a previous task was replaced.
        pub(crate) fn register(&mut self, id: EffectId, generation: u64, handle: AbortHandle) -> bool {
            match self.keyed.insert(id, Slot { generation, handle }) {
                Some(previous) => {
                    previous.handle.abort();
                    true
                },
                None => false,
            }
        }

        /// Drops the registration for `id` if it still belongs to `generation`.
        pub(crate) fn release(&mut self, id: &EffectId, generation: u64) -> bool {
            match self.keyed.get(id) {
                Some(slot) if slot.generation == generation => {
                    self.keyed.remove(id);
                    true
                },
                _ => false,
            }
        }

        pub(crate) fn cancel(&mut self, id: &EffectId) -> bool {
            self.keyed.remove(id).is_some_and(|slot| {
                slot.handle.abort();
                true
            })
        }

        pub(crate) fn is_scheduled(&self, id: &EffectId) -> bool {
            self.keyed.contains_key(id)
        }

        pub(crate) fn scheduled_ids(&self) -> Vec<EffectId> {
            let mut ids: Vec<_> = self.keyed.keys().cloned().collect();
            ids.sort();
            ids
        }

        pub(crate) fn abort_all(&mut self) {
            self.keyed.clear();
            self.tasks.abort_all();
        }

        fn reap(&mut self) {
            while self.tasks.try_join_next().is_some() {}
        }
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::scheduler::Scheduler;
    use super::{Arc, Effect, EffectId, Reducer, RwLock, StoreError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;
    use tokio::sync::broadcast;

    type BoxedAction<A> = Pin<Box<dyn Future<Output = Option<A>> + Send>>;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock`; the reducer runs under the write lock)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution, with every spawned task owned by the store's
    ///    scheduler so [`Store::shutdown`] tears all of them down
    ///
    /// Cloning a store is cheap and yields a handle to the same runtime.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        scheduler: Arc<Mutex<Scheduler>>,
        shutdown: Arc<AtomicBool>,
        /// Every action produced by an effect, after it has been reduced.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 64)
        }

        /// Create a store with a custom action broadcast capacity
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                scheduler: Arc::new(Mutex::new(Scheduler::default())),
                shutdown: Arc::new(AtomicBool::new(false)),
                action_broadcast,
            }
        }

        fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
            self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Starts the returned effects
        ///
        /// Returns once effects have been started, not completed.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.is_shutdown() {
                tracing::trace!("Rejected action: store is shutting down");
                return Err(StoreError::ShutdownInProgress);
            }

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &*self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect);
            }

            Ok(())
        }

        /// Send an action and wait for a matching action produced by an effect
        ///
        /// Subscribes before sending, so a fast effect cannot be missed. The
        /// matching action has already been reduced when this returns.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action within `timeout`
        /// - [`StoreError::ChannelClosed`]: broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let held = store.state(|s| s.cart.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Run a long-lived task owned by this store under `id`
        ///
        /// The task is replaced if another one is spawned under the same id,
        /// and aborted by [`Store::cancel`] or [`Store::shutdown`]. Use this for
        /// producers (subscriptions, loops) that feed the store with
        /// [`Store::send`] themselves.
        pub fn spawn_keyed<F>(&self, id: EffectId, fut: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            if self.is_shutdown() {
                return;
            }
            let mut scheduler = self.scheduler();
            let generation = scheduler.next_generation();
            let handle = scheduler.spawn(fut);
            if scheduler.register(id.clone(), generation, handle) {
                tracing::debug!(effect_id = %id, "Replaced keyed task");
            }
        }

        /// Abort the task registered under `id`, if any
        pub fn cancel(&self, id: &EffectId) -> bool {
            let cancelled = self.scheduler().cancel(id);
            if cancelled {
                metrics::counter!("store.effects.cancelled").increment(1);
                tracing::trace!(effect_id = %id, "Cancelled keyed effect");
            }
            cancelled
        }

        /// Whether a keyed effect is pending under `id`
        #[must_use]
        pub fn is_scheduled(&self, id: &EffectId) -> bool {
            self.scheduler().is_scheduled(id)
        }

        /// Ids of all pending keyed effects, sorted
        #[must_use]
        pub fn scheduled(&self) -> Vec<EffectId> {
            self.scheduler().scheduled_ids()
        }

        /// Whether [`Store::shutdown`] has been called
        #[must_use]
        pub fn is_shutdown(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        /// Stop accepting actions and abort every task this store spawned
        ///
        /// Idempotent.
        pub fn shutdown(&self) {
            if self.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            tracing::debug!("Store shutting down, aborting all effects");
            self.scheduler().abort_all();
        }

        /// Reduce an action produced by an effect, then broadcast it
        async fn feedback(&self, action: A) {
            if self.send(action.clone()).await.is_ok() {
                let _ = self.action_broadcast.send(action);
            }
        }

        fn into_action_future(effect: Effect<A>) -> Result<BoxedAction<A>, Effect<A>> {
            match effect {
                Effect::Future(fut) => Ok(fut),
                Effect::Delay { duration, action } => Ok(Box::pin(async move {
                    tokio::time::sleep(duration).await;
                    Some(*action)
                })),
                other => Err(other),
            }
        }

        fn spawn_unkeyed(&self, fut: BoxedAction<A>) {
            let store = self.clone();
            self.scheduler().spawn(async move {
                if let Some(action) = fut.await {
                    store.feedback(action).await;
                }
            });
        }

        fn spawn_cancellable(&self, id: EffectId, fut: BoxedAction<A>) {
            let store = self.clone();
            let task_id = id.clone();

            let mut scheduler = self.scheduler();
            let generation = scheduler.next_generation();
            let handle = scheduler.spawn(async move {
                let action = fut.await;
                // Deregister before feeding back so the action may reschedule
                // the same id without aborting this task.
                let owner = store.scheduler().release(&task_id, generation);
                if let (true, Some(action)) = (owner, action) {
                    store.feedback(action).await;
                }
            });
            if scheduler.register(id, generation, handle) {
                metrics::counter!("store.effects.cancelled").increment(1);
            }
        }

        fn execute_effect(&self, effect: Effect<A>) {
            if self.is_shutdown() {
                return;
            }

            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect);
                    }
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    self.spawn_unkeyed(Box::pin(async move {
                        tokio::time::sleep(duration).await;
                        Some(*action)
                    }));
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    self.spawn_unkeyed(fut);
                },
                Effect::Cancellable { id, effect } => {
                    metrics::counter!("store.effects.executed", "type" => "cancellable")
                        .increment(1);
                    match Self::into_action_future(*effect) {
                        Ok(fut) => self.spawn_cancellable(id, fut),
                        Err(other) => {
                            tracing::warn!(
                                effect_id = %id,
                                "Only delays and futures can be cancellable, running untracked"
                            );
                            self.execute_effect(other);
                        },
                    }
                },
                Effect::Cancel(id) => {
                    metrics::counter!("store.effects.executed", "type" => "cancel").increment(1);
                    self.cancel(&id);
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                scheduler: Arc::clone(&self.scheduler),
                shutdown: Arc::clone(&self.shutdown),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use seatlock_core::{SmallVec, smallvec};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct TickState {
        ticks: Vec<&'static str>,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TickAction {
        Arm(&'static str, u64),
        Disarm(&'static str),
        Tick(&'static str),
        Echo(u32),
        Echoed(u32),
    }

    struct TickReducer;

    impl Reducer for TickReducer {
        type State = TickState;
        type Action = TickAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut TickState,
            action: TickAction,
            _env: &(),
        ) -> SmallVec<[Effect<TickAction>; 4]> {
            match action {
                TickAction::Arm(name, secs) => smallvec![Effect::timer(
                    EffectId::new(name),
                    Duration::from_secs(secs),
                    TickAction::Tick(name),
                )],
                TickAction::Disarm(name) => smallvec![Effect::Cancel(EffectId::new(name))],
                TickAction::Tick(name) => {
                    state.ticks.push(name);
                    SmallVec::new()
                },
                TickAction::Echo(n) => {
                    smallvec![Effect::future(async move { Some(TickAction::Echoed(n)) })]
                },
                TickAction::Echoed(_) => SmallVec::new(),
            }
        }
    }

    fn store() -> Store<TickState, TickAction, (), TickReducer> {
        Store::new(TickState::default(), TickReducer, ())
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once() {
        let store = store();
        store.send(TickAction::Arm("poll", 5)).await.unwrap();
        assert!(store.is_scheduled(&EffectId::new("poll")));

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(store.state(|s| s.ticks.clone()).await, vec!["poll"]);
        assert!(!store.is_scheduled(&EffectId::new("poll")));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let store = store();
        store.send(TickAction::Arm("renew", 5)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        store.send(TickAction::Arm("renew", 5)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(store.state(|s| s.ticks.is_empty()).await);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.state(|s| s.ticks.clone()).await, vec!["renew"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let store = store();
        store.send(TickAction::Arm("expiry", 5)).await.unwrap();
        store.send(TickAction::Disarm("expiry")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.state(|s| s.ticks.is_empty()).await);
        assert!(store.scheduled().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_everything() {
        let store = store();
        store.send(TickAction::Arm("a", 5)).await.unwrap();
        store.send(TickAction::Arm("b", 7)).await.unwrap();
        store.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.state(|s| s.ticks.is_empty()).await);
        assert_eq!(
            store.send(TickAction::Tick("late")).await,
            Err(StoreError::ShutdownInProgress)
        );
    }

    #[tokio::test]
    async fn send_and_wait_for_sees_effect_result() {
        let store = store();
        let result = store
            .send_and_wait_for(
                TickAction::Echo(9),
                |a| matches!(a, TickAction::Echoed(_)),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(result, TickAction::Echoed(9));
    }

    #[tokio::test(start_paused = true)]
    async fn keyed_task_is_replaced() {
        let store = store();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let first = tx.clone();
        store.spawn_keyed(EffectId::new("feed"), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = first.send("first");
        });
        store.spawn_keyed(EffectId::new("feed"), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send("second");
        });

        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(rx.recv().await, None);
    }
}
