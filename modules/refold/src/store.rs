//! The store engine.
//!
//! dispatch → queue → fold → publish → effects → dispatch.
//!
//! Every dispatched action goes through one FIFO queue with a single drainer,
//! so folds never overlap and an effect (or reducer) dispatching in response
//! to an action enqueues instead of recursing.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use crate::action::Action;
use crate::error::{FoldError, StoreError};
use crate::stream::{Replay, Subscription};
use crate::traits::{Effect, EffectOutput, Reducer};

const DEFAULT_NAME: &str = "store";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Action stream
// ---------------------------------------------------------------------------

/// Receives every action, in dispatch order, before action subscribers do.
trait ActionListener: Send + Sync {
    fn on_action(&self, action: &Action);

    /// Start folding. Runs as a queued job, so it holds the drainer role.
    fn attach(&self);
}

/// The store's action stream: the one writable entry point.
///
/// Replays the latest action to new subscribers. Cloning is cheap and every
/// clone feeds the same store.
#[derive(Clone)]
pub struct ActionStream {
    bus: Arc<ActionBus>,
}

struct ActionBus {
    store: Arc<str>,
    queue: Mutex<DispatchQueue>,
    subject: Replay<Action>,
    fold: Arc<dyn ActionListener>,
}

enum Job {
    Dispatch(Action),
    Attach,
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<Job>,
    draining: bool,
}

impl ActionStream {
    fn new(store: Arc<str>, fold: Arc<dyn ActionListener>) -> Self {
        Self {
            bus: Arc::new(ActionBus {
                store,
                queue: Mutex::new(DispatchQueue::default()),
                subject: Replay::new(),
                fold,
            }),
        }
    }

    /// Publish an action into the store.
    ///
    /// If no other dispatch is in progress the action is folded and delivered
    /// before this returns. Otherwise it is queued behind the actions already
    /// pending and the dispatch in progress delivers it.
    pub fn dispatch(&self, action: Action) {
        self.bus.enqueue(Job::Dispatch(action));
    }

    /// Subscribe to actions, starting with the most recent one.
    pub fn subscribe(&self) -> Subscription<Action> {
        self.bus.subject.subscribe()
    }

    /// The most recently dispatched action.
    pub fn latest(&self) -> Option<Action> {
        self.bus.subject.latest()
    }
}

impl fmt::Debug for ActionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionStream")
            .field("store", &self.bus.store)
            .finish_non_exhaustive()
    }
}

impl ActionBus {
    /// Queue `job`, then drain unless a drain is already in progress.
    fn enqueue(&self, job: Job) {
        {
            let mut queue = lock(&self.queue);
            queue.pending.push_back(job);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }
        self.drain();
    }

    fn drain(&self) {
        let _reset = DrainReset(&self.queue);
        while let Some(job) = self.next_pending() {
            match job {
                Job::Dispatch(action) => {
                    trace!(store = %self.store, action = %action, "dispatch");
                    self.fold.on_action(&action);
                    self.subject.publish(action);
                }
                Job::Attach => self.fold.attach(),
            }
        }
    }

    /// Pops the next job, releasing the drainer role when the queue is empty.
    fn next_pending(&self) -> Option<Job> {
        let mut queue = lock(&self.queue);
        let next = queue.pending.pop_front();
        if next.is_none() {
            queue.draining = false;
        }
        next
    }
}

/// Hands the drainer role back if a reducer panic unwinds through `drain`.
struct DrainReset<'a>(&'a Mutex<DispatchQueue>);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

// ---------------------------------------------------------------------------
// State stream
// ---------------------------------------------------------------------------

/// The store's derived state stream: multicast, replaying the latest state.
///
/// All subscribers share one fold. The fold attaches on the first
/// subscription (or [`current`](Self::current) read). Until then the action
/// stream only remembers its latest action, so the first subscriber sees the
/// seed state followed by that action folded onto it, then live states.
pub struct StateStream<S> {
    fold: Arc<Fold<S>>,
    actions: ActionStream,
}

impl<S> Clone for StateStream<S> {
    fn clone(&self) -> Self {
        Self {
            fold: Arc::clone(&self.fold),
            actions: self.actions.clone(),
        }
    }
}

impl<S: Send + Sync + 'static> StateStream<S> {
    /// Subscribe to state, starting with the latest state.
    pub fn subscribe(&self) -> Subscription<Arc<S>> {
        let (subscription, detached) = self.fold.subscribe();
        if detached {
            self.actions.bus.enqueue(Job::Attach);
        }
        subscription
    }

    /// The latest state. Must not be called from inside the reducer.
    ///
    /// While another thread is dispatching, this may not yet reflect the
    /// actions that thread has queued.
    pub fn current(&self) -> Arc<S> {
        if self.fold.is_detached() {
            self.actions.bus.enqueue(Job::Attach);
        }
        self.fold.latest()
    }

    /// Why the stream ended, if the reducer panicked. Subscribers see the
    /// stream end either way; this tells a failed fold from a dropped store.
    pub fn failure(&self) -> Option<FoldError> {
        self.fold.failure()
    }
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream")
            .field("store", &self.fold.store)
            .finish_non_exhaustive()
    }
}

struct Fold<S> {
    store: Arc<str>,
    reducer: Box<dyn Reducer<S>>,
    phase: Mutex<Phase<S>>,
    subject: Replay<Arc<S>>,
}

enum Phase<S> {
    /// Seeded, nobody has read state yet. Only the latest action is kept,
    /// as the action stream would replay it.
    Detached {
        seed: Arc<S>,
        latest: Option<Action>,
    },
    Attached {
        state: Arc<S>,
    },
    /// The reducer panicked and the state stream has ended.
    Failed {
        last: Arc<S>,
        error: FoldError,
    },
}

impl<S: Send + Sync + 'static> Fold<S> {
    /// Runs the reducer once for `@@INIT/state`, whether or not anyone ever
    /// subscribes.
    fn new(store: Arc<str>, reducer: Box<dyn Reducer<S>>) -> Self {
        let seed = reducer.reduce(None, &Action::init_state());
        Self {
            store,
            reducer,
            phase: Mutex::new(Phase::Detached {
                seed: Arc::clone(&seed),
                latest: None,
            }),
            subject: Replay::seeded(seed),
        }
    }

    /// Subscribes, reporting whether the fold still has to attach.
    fn subscribe(&self) -> (Subscription<Arc<S>>, bool) {
        let phase = lock(&self.phase);
        let subscription = self.subject.subscribe();
        (subscription, matches!(*phase, Phase::Detached { .. }))
    }

    fn is_detached(&self) -> bool {
        matches!(*lock(&self.phase), Phase::Detached { .. })
    }

    fn latest(&self) -> Arc<S> {
        match &*lock(&self.phase) {
            Phase::Detached { seed: state, .. }
            | Phase::Attached { state }
            | Phase::Failed { last: state, .. } => Arc::clone(state),
        }
    }

    fn failure(&self) -> Option<FoldError> {
        match &*lock(&self.phase) {
            Phase::Failed { error, .. } => Some(error.clone()),
            _ => None,
        }
    }

    /// Folds `action` onto `state` and publishes the result.
    fn advance(&self, phase: &mut Phase<S>, state: Arc<S>, action: &Action) {
        let reduced =
            panic::catch_unwind(AssertUnwindSafe(|| self.reducer.reduce(Some(&state), action)));
        match reduced {
            Ok(next) => {
                self.subject.publish(Arc::clone(&next));
                *phase = Phase::Attached { state: next };
            }
            Err(panic) => {
                let error = FoldError {
                    action: action.kind().to_string(),
                    message: panic_message(panic.as_ref()),
                };
                error!(store = %self.store, error = %error, "state stream terminated");
                self.subject.close();
                *phase = Phase::Failed { last: state, error };
                panic::resume_unwind(panic);
            }
        }
    }
}

impl<S: Send + Sync + 'static> ActionListener for Fold<S> {
    fn on_action(&self, action: &Action) {
        let mut phase = lock(&self.phase);
        let state = match &mut *phase {
            Phase::Detached { latest, .. } => {
                *latest = Some(action.clone());
                return;
            }
            Phase::Attached { state } => Arc::clone(state),
            Phase::Failed { .. } => return,
        };
        self.advance(&mut phase, state, action);
    }

    fn attach(&self) {
        let mut phase = lock(&self.phase);
        let (seed, latest) = match &mut *phase {
            Phase::Detached { seed, latest } => (Arc::clone(seed), latest.take()),
            _ => return,
        };
        debug!(store = %self.store, caught_up = latest.is_some(), "state fold attached");
        match latest {
            Some(action) => self.advance(&mut phase, seed, &action),
            None => *phase = Phase::Attached { state: seed },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A store: one action stream, one state stream folded from it, and at most
/// one effect feeding actions back in.
///
/// Dropping the store stops its effect.
pub struct Store<S> {
    name: Arc<str>,
    actions: ActionStream,
    states: StateStream<S>,
    runtime: Option<Handle>,
    registrations: usize,
    effect_task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl<S: Send + Sync + 'static> Store<S> {
    pub fn builder(reducer: impl Reducer<S>) -> StoreBuilder<S> {
        StoreBuilder {
            name: DEFAULT_NAME.into(),
            reducer: Box::new(reducer),
            effect: None,
            runtime: None,
        }
    }

    fn start(
        name: Arc<str>,
        reducer: Box<dyn Reducer<S>>,
        runtime: Option<Handle>,
        effect: Option<(Box<dyn Effect<S>>, Handle)>,
    ) -> Self {
        debug!(store = %name, "creating store");

        let fold = Arc::new(Fold::new(Arc::clone(&name), reducer));
        let listener: Arc<dyn ActionListener> = Arc::clone(&fold) as Arc<dyn ActionListener>;
        let actions = ActionStream::new(Arc::clone(&name), listener);
        let states = StateStream {
            fold,
            actions: actions.clone(),
        };

        let mut store = Self {
            name,
            actions,
            states,
            runtime,
            registrations: 0,
            effect_task: None,
        };
        if let Some((effect, runtime)) = effect {
            store.register(effect.as_ref(), runtime);
        }
        store.actions.dispatch(Action::init());
        store
    }

    /// Make `effect` the one current effect: run it against this store's
    /// streams and redispatch everything it emits, in emission order.
    ///
    /// `registrations` counts these publishes; there is no separate
    /// registration stream to observe.
    fn register(&mut self, effect: &dyn Effect<S>, runtime: Handle) {
        if let Some(previous) = self.effect_task.take() {
            warn!(store = %self.name, "replacing running effect");
            previous.abort();
        }

        let output = effect.run(self.actions.clone(), self.states.clone());
        let span = info_span!("effects", store = %self.name);
        let task = runtime.spawn(feed_back(output, self.actions.clone()).instrument(span));

        self.effect_task = Some(task);
        self.runtime = Some(runtime);
        self.registrations += 1;
        debug!(
            store = %self.name,
            registrations = self.registrations,
            "effect registered"
        );
    }

    /// Switch to a new effect. The running effect, if any, is aborted first.
    pub fn replace_effect(&mut self, effect: impl Effect<S>) -> Result<(), StoreError> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current()?,
        };
        self.register(&effect, runtime);
        Ok(())
    }

    pub fn dispatch(&self, action: Action) {
        self.actions.dispatch(action);
    }

    pub fn actions(&self) -> &ActionStream {
        &self.actions
    }

    pub fn states(&self) -> &StateStream<S> {
        &self.states
    }

    /// Shorthand for `states().current()`.
    pub fn state(&self) -> Arc<S> {
        self.states.current()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times an effect has been registered on this store.
    pub fn effect_registrations(&self) -> usize {
        self.registrations
    }

    /// Wait for the current effect to finish and return how it ended.
    ///
    /// Resolves immediately with `Ok(())` when no effect is running.
    pub async fn join_effects(&mut self) -> anyhow::Result<()> {
        match self.effect_task.take() {
            Some(task) => task.await.map_err(StoreError::from)?,
            None => Ok(()),
        }
    }
}

impl<S> Drop for Store<S> {
    fn drop(&mut self) {
        if let Some(task) = self.effect_task.take() {
            task.abort();
        }
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

/// Drains an effect's output into the action stream. An `Err` item stops the
/// loop; direct dispatch keeps working.
async fn feed_back(mut output: EffectOutput, actions: ActionStream) -> anyhow::Result<()> {
    while let Some(next) = output.next().await {
        match next {
            Ok(action) => actions.dispatch(action),
            Err(err) => {
                error!(error = %err, "effect failed; feedback loop stopped");
                return Err(err);
            }
        }
    }
    debug!("effect output completed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Configures a [`Store`] before it starts.
pub struct StoreBuilder<S> {
    name: Arc<str>,
    reducer: Box<dyn Reducer<S>>,
    effect: Option<Box<dyn Effect<S>>>,
    runtime: Option<Handle>,
}

impl<S: Send + Sync + 'static> StoreBuilder<S> {
    /// Name used in log fields.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into().into();
        self
    }

    /// The root effect. Combine several with
    /// [`combine_effects`](crate::combine_effects) first.
    pub fn effect(mut self, effect: impl Effect<S>) -> Self {
        self.effect = Some(Box::new(effect));
        self
    }

    /// Runtime that drives effects. Defaults to the ambient tokio runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Start the store. Fails only when an effect is configured and there is
    /// no runtime to drive it.
    pub fn build(self) -> Result<Store<S>, StoreError> {
        let effect = match self.effect {
            Some(effect) => {
                let runtime = match &self.runtime {
                    Some(runtime) => runtime.clone(),
                    None => Handle::try_current()?,
                };
                Some((effect, runtime))
            }
            None => None,
        };
        Ok(Store::start(self.name, self.reducer, self.runtime, effect))
    }
}

/// A store with the default name and no effect.
pub fn create_store<S: Send + Sync + 'static>(reducer: impl Reducer<S>) -> Store<S> {
    Store::start(DEFAULT_NAME.into(), Box::new(reducer), None, None)
}

/// A store with the default name running `effect`. Must be called within a
/// tokio runtime.
pub fn create_store_with_effect<S: Send + Sync + 'static>(
    reducer: impl Reducer<S>,
    effect: impl Effect<S>,
) -> Result<Store<S>, StoreError> {
    Store::builder(reducer).effect(effect).build()
}
