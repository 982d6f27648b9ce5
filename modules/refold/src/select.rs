//! Derived-stream operators: selectors and action filters.
//!
//! Selectors drop consecutive duplicates. Plain values compare with
//! `PartialEq`; shared `Arc` projections compare by identity, which is what
//! the reducers' reference-stable no-ops make meaningful.

use std::borrow::Cow;
use std::future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::action::Action;
use crate::error::SelectError;

/// Drop values equal to the previously emitted one.
pub fn distinct_until_changed<St>(source: St) -> impl Stream<Item = St::Item>
where
    St: Stream,
    St::Item: Clone + PartialEq,
{
    let mut last: Option<St::Item> = None;
    source.filter_map(move |value| {
        let fresh = last.as_ref() != Some(&value);
        if fresh {
            last = Some(value.clone());
        }
        future::ready(fresh.then_some(value))
    })
}

/// Drop values that are the same allocation as the previously emitted one.
///
/// Equal values in different allocations still pass. The last emitted value
/// is held, so its address cannot be reused while it is compared against.
pub fn distinct_by_identity<St, T>(source: St) -> impl Stream<Item = Arc<T>>
where
    St: Stream<Item = Arc<T>>,
    T: ?Sized,
{
    let mut last: Option<Arc<T>> = None;
    source.filter_map(move |value| {
        let fresh = last.as_ref().map_or(true, |last| !Arc::ptr_eq(last, &value));
        if fresh {
            last = Some(Arc::clone(&value));
        }
        future::ready(fresh.then_some(value))
    })
}

/// Project every value with `mapper`, emitting only when the projection
/// changes by value. Use [`select_by_identity`] for shared state.
pub fn select<St, F, U>(source: St, mapper: F) -> impl Stream<Item = U>
where
    St: Stream,
    F: FnMut(St::Item) -> U,
    U: Clone + PartialEq,
{
    distinct_until_changed(source.map(mapper))
}

/// Project every value to a shared value, emitting only when the projection
/// is a different allocation.
pub fn select_by_identity<St, F, T>(source: St, mapper: F) -> impl Stream<Item = Arc<T>>
where
    St: Stream,
    F: FnMut(St::Item) -> Arc<T>,
    T: ?Sized,
{
    distinct_by_identity(source.map(mapper))
}

/// Project every value by descending into it along `path`, emitting only when
/// the projection changes.
///
/// Values are viewed as JSON. Each segment is an object key, or an index into
/// an array. A missing segment projects to `Ok(None)`. A value that cannot be
/// viewed as JSON yields one `Err` and ends the stream.
pub fn select_path<St, P>(
    source: St,
    path: P,
) -> impl Stream<Item = Result<Option<Value>, SelectError>>
where
    St: Stream,
    St::Item: Serialize,
    P: IntoIterator,
    P::Item: Into<String>,
{
    let walk = PathWalk {
        source: Box::pin(source),
        path: path.into_iter().map(Into::into).collect(),
        last: None,
    };
    stream::unfold(Some(walk), |walk| async move {
        let mut walk = walk?;
        while let Some(value) = walk.source.next().await {
            match project(&value, &walk.path) {
                Ok(projected) if walk.last.as_ref() == Some(&projected) => continue,
                Ok(projected) => {
                    walk.last = Some(projected.clone());
                    return Some((Ok(projected), Some(walk)));
                }
                Err(err) => return Some((Err(err), None)),
            }
        }
        None
    })
}

struct PathWalk<St> {
    source: Pin<Box<St>>,
    path: Vec<String>,
    /// Last emitted projection.
    last: Option<Option<Value>>,
}

fn project<T>(value: &T, path: &[String]) -> Result<Option<Value>, SelectError>
where
    T: Serialize + ?Sized,
{
    let mut current = serde_json::to_value(value)?;
    for segment in path {
        current = match current {
            Value::Object(mut fields) => match fields.remove(segment) {
                Some(value) => value,
                None => return Ok(None),
            },
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(index) if index < items.len() => items.swap_remove(index),
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// Keep only actions whose type is `kind`.
pub fn of_type<St>(source: St, kind: impl Into<Cow<'static, str>>) -> impl Stream<Item = Action>
where
    St: Stream<Item = Action>,
{
    let kind = kind.into();
    source.filter(move |action| future::ready(action.is(&kind)))
}

/// Selector operators as stream methods. `select` is spelled `select_map`
/// here so it does not collide with `StreamExt::select`.
pub trait SelectExt: Stream + Sized {
    fn distinct_until_changed(self) -> impl Stream<Item = Self::Item>
    where
        Self::Item: Clone + PartialEq,
    {
        distinct_until_changed(self)
    }

    fn select_map<F, U>(self, mapper: F) -> impl Stream<Item = U>
    where
        F: FnMut(Self::Item) -> U,
        U: Clone + PartialEq,
    {
        select(self, mapper)
    }

    fn select_by_identity<F, T>(self, mapper: F) -> impl Stream<Item = Arc<T>>
    where
        F: FnMut(Self::Item) -> Arc<T>,
        T: ?Sized,
    {
        select_by_identity(self, mapper)
    }

    fn select_path<P>(self, path: P) -> impl Stream<Item = Result<Option<Value>, SelectError>>
    where
        Self::Item: Serialize,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        select_path(self, path)
    }
}

impl<St: Stream> SelectExt for St {}

/// Action filters as stream methods.
pub trait ActionStreamExt: Stream<Item = Action> + Sized {
    fn of_type(self, kind: impl Into<Cow<'static, str>>) -> impl Stream<Item = Action> {
        of_type(self, kind)
    }
}

impl<St: Stream<Item = Action>> ActionStreamExt for St {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use futures::stream;
    use serde_json::json;

    #[derive(Clone, Serialize)]
    struct Outer {
        a: Inner,
    }

    #[derive(Clone, Serialize)]
    struct Inner {
        b: u32,
        noise: u32,
    }

    fn outer(b: u32, noise: u32) -> Outer {
        Outer {
            a: Inner { b, noise },
        }
    }

    /// Runs a path selector to completion, failing on any projection error.
    async fn projected<St>(source: St, path: &[&str]) -> Vec<Option<Value>>
    where
        St: Stream,
        St::Item: Serialize,
    {
        select_path(source, path.iter().copied())
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn path_mode_emits_only_when_the_leaf_changes() {
        let source = stream::iter(vec![outer(1, 0), outer(1, 1), outer(2, 2), outer(2, 3), outer(1, 4)]);
        let values = projected(source, &["a", "b"]).await;
        assert_eq!(values, vec![Some(json!(1)), Some(json!(2)), Some(json!(1))]);
    }

    #[tokio::test]
    async fn mapper_mode_matches_path_mode() {
        let values = vec![outer(1, 0), outer(1, 1), outer(2, 2), outer(2, 3), outer(1, 4)];
        let by_path: Vec<_> = stream::iter(values.clone())
            .select_path(["a", "b"])
            .map(|item| item.unwrap())
            .collect()
            .await;
        let by_mapper: Vec<_> = stream::iter(values)
            .select_map(|value: Outer| Some(json!(value.a.b)))
            .collect()
            .await;
        assert_eq!(by_path, by_mapper);
    }

    #[tokio::test]
    async fn missing_segments_project_to_none() {
        let source = stream::iter(vec![
            json!({ "a": { "b": 1 } }),
            json!({ "a": {} }),
            json!({ "a": 5 }),
            json!({}),
            json!({ "a": { "b": 1 } }),
        ]);
        let values = projected(source, &["a", "b"]).await;
        assert_eq!(values, vec![Some(json!(1)), None, Some(json!(1))]);
    }

    #[tokio::test]
    async fn path_segments_index_into_arrays() {
        let source = stream::iter(vec![json!({ "items": ["x", "y"] }), json!({ "items": ["x"] })]);
        let values = projected(source, &["items", "1"]).await;
        assert_eq!(values, vec![Some(json!("y")), None]);
    }

    #[derive(Serialize)]
    struct Unrepresentable {
        // JSON object keys must be strings.
        a: HashMap<(u8, u8), u8>,
        b: u8,
    }

    #[tokio::test]
    async fn unrepresentable_source_is_an_error_not_a_missing_path() {
        let bad = Unrepresentable {
            a: HashMap::from([((1, 2), 3)]),
            b: 7,
        };
        let items: Vec<_> = select_path(stream::iter(vec![bad]), ["b"]).collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn error_is_the_last_item_even_if_the_source_continues() {
        #[derive(Serialize)]
        #[serde(untagged)]
        enum Mixed {
            Good { b: u8 },
            Bad(Unrepresentable),
        }
        let source = stream::iter(vec![
            Mixed::Good { b: 1 },
            Mixed::Bad(Unrepresentable {
                a: HashMap::from([((0, 0), 0)]),
                b: 2,
            }),
            Mixed::Good { b: 3 },
        ]);
        let items: Vec<_> = select_path(source, ["b"]).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Some(json!(1)));
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn duplicates_compare_against_last_emitted_value() {
        let values: Vec<_> = stream::iter(vec![1, 1, 2, 1, 1, 3])
            .distinct_until_changed()
            .collect()
            .await;
        assert_eq!(values, vec![1, 2, 1, 3]);
    }

    #[tokio::test]
    async fn identity_mode_compares_allocations_not_values() {
        let first = Arc::new(vec![1]);
        let equal = Arc::new(vec![1]);
        let source = stream::iter(vec![
            Arc::clone(&first),
            Arc::clone(&first),
            Arc::clone(&equal),
            Arc::clone(&equal),
            Arc::clone(&first),
        ]);
        let values: Vec<_> = distinct_by_identity(source).collect().await;

        assert_eq!(values.len(), 3);
        assert!(Arc::ptr_eq(&values[0], &first));
        assert!(Arc::ptr_eq(&values[1], &equal));
        assert!(Arc::ptr_eq(&values[2], &first));
    }

    #[tokio::test]
    async fn identity_mapper_projects_shared_fields() {
        struct Pair {
            left: Arc<str>,
        }
        let shared: Arc<str> = Arc::from("left");
        let source = stream::iter(vec![
            Pair { left: Arc::clone(&shared) },
            Pair { left: Arc::clone(&shared) },
            Pair { left: Arc::from("left") },
        ]);
        let values: Vec<_> = source
            .select_by_identity(|pair: Pair| pair.left)
            .collect()
            .await;

        assert_eq!(values.len(), 2);
        assert!(Arc::ptr_eq(&values[0], &shared));
        assert_eq!(&*values[1], "left");
    }

    #[tokio::test]
    async fn of_type_keeps_matching_actions() {
        let actions = vec![
            Action::new("A").unwrap(),
            Action::new("B").unwrap(),
            Action::new("A").unwrap(),
        ];
        let kept: Vec<_> = stream::iter(actions).of_type("A").collect().await;
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|action| action.is("A")));
    }
}
