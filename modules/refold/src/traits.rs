//! Core traits for the store.

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::action::Action;
use crate::store::{ActionStream, StateStream};

/// Pure state transitions. No I/O, no side effects.
///
/// `state` is `None` exactly once per store, for the `@@INIT/state` bootstrap.
/// Returning the same `Arc` that was passed in means "nothing changed"; the
/// reducer composer and selectors rely on that identity.
///
/// A reducer may dispatch through a captured [`ActionStream`]; the action is
/// queued behind the one being folded, including when that fold is the
/// catch-up run by the first state read. It must not read state back from
/// the store it is folding for.
pub trait Reducer<S>: Send + Sync + 'static {
    fn reduce(&self, state: Option<&Arc<S>>, action: &Action) -> Arc<S>;
}

impl<S, F> Reducer<S> for F
where
    F: Fn(Option<&Arc<S>>, &Action) -> Arc<S> + Send + Sync + 'static,
{
    fn reduce(&self, state: Option<&Arc<S>>, action: &Action) -> Arc<S> {
        self(state, action)
    }
}

/// What an effect emits. An `Err` item stops the store's feedback loop.
pub type EffectOutput = BoxStream<'static, anyhow::Result<Action>>;

/// Observes the action and state streams and emits further actions, which
/// the store dispatches back into the same action stream.
///
/// `run` is called synchronously when the effect is registered, so any
/// subscription taken inside it sees `@@INIT`.
pub trait Effect<S>: Send + Sync + 'static {
    fn run(&self, actions: ActionStream, states: StateStream<S>) -> EffectOutput;
}

impl<S, F> Effect<S> for F
where
    F: Fn(ActionStream, StateStream<S>) -> EffectOutput + Send + Sync + 'static,
{
    fn run(&self, actions: ActionStream, states: StateStream<S>) -> EffectOutput {
        self(actions, states)
    }
}
