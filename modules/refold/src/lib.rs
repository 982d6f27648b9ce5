//! Unidirectional state store.
//!
//! One action stream, one state stream folded from it by a [`Reducer`], and
//! [`Effect`]s that watch both and dispatch further actions back in:
//!
//! ```text
//! dispatch ──→ action$ ──→ fold(reducer) ──→ state$
//!    ↑            │                             │
//!    └──────── effect(action$, state$) ←────────┘
//! ```
//!
//! Reducers are pure and composed per field with [`combine_reducers!`];
//! effects are composed with [`combine_effects`]; consumers narrow streams
//! with [`select`], [`select_by_identity`] and [`select_path`].

pub mod action;
pub mod combine;
pub mod error;
pub mod select;
pub mod store;
pub mod stream;
pub mod traits;

pub use action::{create_action, create_action_with, Action, INIT, INIT_STATE};
pub use combine::{combine_effects, Combined, CombinedEffect, CombinedReducer};
pub use error::{ActionError, FoldError, SelectError, StoreError};
pub use select::{
    distinct_by_identity, distinct_until_changed, of_type, select, select_by_identity,
    select_path, ActionStreamExt, SelectExt,
};
pub use store::{
    create_store, create_store_with_effect, ActionStream, StateStream, Store, StoreBuilder,
};
pub use stream::Subscription;
pub use traits::{Effect, EffectOutput, Reducer};
