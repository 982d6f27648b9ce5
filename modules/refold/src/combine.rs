//! Reducer and effect composition.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::ser::{self, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::action::Action;
use crate::store::{ActionStream, StateStream};
use crate::traits::{Effect, EffectOutput, Reducer};

type Slot = Arc<dyn Any + Send + Sync>;
type FieldReducer = Box<dyn Fn(Option<&Slot>, &Action) -> Slot + Send + Sync>;
type ToJson = fn(&(dyn Any + Send + Sync)) -> serde_json::Result<Value>;

// ---------------------------------------------------------------------------
// Reducers
// ---------------------------------------------------------------------------

/// State produced by a [`CombinedReducer`]: one value per field, in the
/// order the fields were declared.
///
/// Serializes as a map from field name to field value, which is what path
/// selectors descend into.
#[derive(Clone, Default)]
pub struct Combined {
    fields: Vec<Field>,
}

#[derive(Clone)]
struct Field {
    name: Cow<'static, str>,
    value: Slot,
    to_json: ToJson,
}

impl Combined {
    /// The value of `field`, if it exists and holds a `T`.
    pub fn get<T: Any + Send + Sync>(&self, field: &str) -> Option<Arc<T>> {
        self.slot(field)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.slot(field).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn slot(&self, field: &str) -> Option<&Slot> {
        self.fields
            .iter()
            .find(|candidate| candidate.name == field)
            .map(|field| &field.value)
    }
}

impl Serialize for Combined {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            let value = match (field.to_json)(field.value.as_ref()) {
                Ok(value) => value,
                Err(err) => return Err(ser::Error::custom(err)),
            };
            map.serialize_entry(field.name.as_ref(), &value)?;
        }
        map.end()
    }
}

impl fmt::Debug for Combined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combined")
            .field("fields", &self.fields().collect::<Vec<_>>())
            .finish()
    }
}

fn field_json<T: Serialize + Any>(value: &(dyn Any + Send + Sync)) -> serde_json::Result<Value> {
    match value.downcast_ref::<T>() {
        Some(value) => serde_json::to_value(value),
        None => Err(ser::Error::custom("field holds a value of an unexpected type")),
    }
}

/// One reducer over a [`Combined`] state, built from one reducer per field.
///
/// Each field's reducer only ever sees its own previous value. When every
/// field reducer hands back its previous `Arc`, the previous `Combined` is
/// returned as-is, so `Arc::ptr_eq` on the whole state means "no change".
#[derive(Default)]
pub struct CombinedReducer {
    fields: Vec<FieldSpec>,
}

struct FieldSpec {
    name: Cow<'static, str>,
    reducer: FieldReducer,
    to_json: ToJson,
}

impl CombinedReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Adding a name twice replaces that field's reducer and
    /// keeps its original position.
    pub fn field<T: Serialize + Any + Send + Sync>(
        mut self,
        name: impl Into<Cow<'static, str>>,
        reducer: impl Reducer<T>,
    ) -> Self {
        let name = name.into();
        let erased: FieldReducer = Box::new(move |previous: Option<&Slot>, action: &Action| {
            let previous = previous.and_then(|value| Arc::clone(value).downcast::<T>().ok());
            let next: Slot = reducer.reduce(previous.as_ref(), action);
            next
        });
        let spec = FieldSpec {
            name,
            reducer: erased,
            to_json: field_json::<T>,
        };

        match self.fields.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.fields.push(spec),
        }
        self
    }
}

impl Reducer<Combined> for CombinedReducer {
    fn reduce(&self, state: Option<&Arc<Combined>>, action: &Action) -> Arc<Combined> {
        let mut changed = false;
        let mut next = Vec::with_capacity(self.fields.len());

        for spec in &self.fields {
            let previous = state.and_then(|state| state.slot(&spec.name));
            let value = (spec.reducer)(previous, action);
            changed |= previous.map_or(true, |previous| !same(previous, &value));
            next.push(Field {
                name: spec.name.clone(),
                value,
                to_json: spec.to_json,
            });
        }

        match state {
            Some(state) if !changed => Arc::clone(state),
            _ => Arc::new(Combined { fields: next }),
        }
    }
}

/// Identity of the pointee, ignoring vtables.
fn same(a: &Slot, b: &Slot) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Build a [`CombinedReducer`] from `field: reducer` pairs.
///
/// ```
/// use std::sync::Arc;
/// use refold::{combine_reducers, Action};
///
/// fn count(state: Option<&Arc<u32>>, action: &Action) -> Arc<u32> {
///     match state {
///         Some(n) if action.is("INC") => Arc::new(**n + 1),
///         Some(n) => Arc::clone(n),
///         None => Arc::new(0),
///     }
/// }
///
/// fn label(state: Option<&Arc<String>>, _: &Action) -> Arc<String> {
///     state.cloned().unwrap_or_else(|| Arc::new("counter".into()))
/// }
///
/// let root = combine_reducers! { count: count, label: label };
/// ```
#[macro_export]
macro_rules! combine_reducers {
    ($($field:ident : $reducer:expr),* $(,)?) => {
        $crate::CombinedReducer::new()$(.field(stringify!($field), $reducer))*
    };
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Several effects run as one. Outputs are merged as they are produced.
pub struct CombinedEffect<S> {
    effects: Vec<Box<dyn Effect<S>>>,
}

impl<S> Default for CombinedEffect<S> {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
        }
    }
}

impl<S: Send + Sync + 'static> CombinedEffect<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, effect: impl Effect<S>) -> Self {
        self.effects.push(Box::new(effect));
        self
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl<S: Send + Sync + 'static> Effect<S> for CombinedEffect<S> {
    fn run(&self, actions: ActionStream, states: StateStream<S>) -> EffectOutput {
        let outputs = self
            .effects
            .iter()
            .map(|effect| effect.run(actions.clone(), states.clone()));
        stream::select_all(outputs).boxed()
    }
}

impl<S: Send + Sync + 'static> FromIterator<Box<dyn Effect<S>>> for CombinedEffect<S> {
    fn from_iter<I: IntoIterator<Item = Box<dyn Effect<S>>>>(iter: I) -> Self {
        Self {
            effects: iter.into_iter().collect(),
        }
    }
}

/// Merge boxed effects into one.
pub fn combine_effects<S: Send + Sync + 'static>(
    effects: impl IntoIterator<Item = Box<dyn Effect<S>>>,
) -> CombinedEffect<S> {
    effects.into_iter().collect()
}

/// Build a [`CombinedEffect`] from a list of effects.
#[macro_export]
macro_rules! combine_effects {
    ($($effect:expr),* $(,)?) => {
        $crate::CombinedEffect::new()$(.with($effect))*
    };
}
