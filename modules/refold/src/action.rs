//! Tagged action values.
//!
//! An action is `{ type, payload? }`. The payload is kept as JSON so one store
//! can carry actions from any number of families; typed families are plain
//! adjacently tagged serde enums converted with [`Action::encode`] and
//! [`Action::decode`].

use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ActionError;

/// Dispatched by the store at construction; always the first action observed.
pub const INIT: &str = "@@INIT";

/// Passed to the reducer once, with no previous state, to compute the seed.
/// Never published on the action stream.
pub const INIT_STATE: &str = "@@INIT/state";

/// An immutable tagged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    #[serde(rename = "type")]
    kind: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl Action {
    /// An action with no payload. Fails if `kind` is empty.
    pub fn new(kind: impl Into<Cow<'static, str>>) -> Result<Self, ActionError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(ActionError::EmptyType);
        }
        Ok(Self {
            kind,
            payload: None,
        })
    }

    pub fn init() -> Self {
        Self::reserved(INIT)
    }

    pub fn init_state() -> Self {
        Self::reserved(INIT_STATE)
    }

    const fn reserved(kind: &'static str) -> Self {
        Self {
            kind: Cow::Borrowed(kind),
            payload: None,
        }
    }

    /// Encode a value of an adjacently tagged enum
    /// (`#[serde(tag = "type", content = "payload")]`) as an action.
    pub fn encode<E: Serialize>(event: &E) -> Result<Self, ActionError> {
        let Value::Object(mut fields) = serde_json::to_value(event).map_err(ActionError::Payload)?
        else {
            return Err(ActionError::Untagged);
        };
        let Some(Value::String(kind)) = fields.remove("type") else {
            return Err(ActionError::Untagged);
        };
        let payload = fields.remove("payload");
        if !fields.is_empty() {
            return Err(ActionError::Untagged);
        }

        let mut action = Self::new(kind)?;
        action.payload = payload;
        Ok(action)
    }

    /// Decode this action into an adjacently tagged enum.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, ActionError> {
        let mut fields = Map::new();
        fields.insert("type".into(), Value::String(self.kind.to_string()));
        if let Some(payload) = &self.payload {
            fields.insert("payload".into(), payload.clone());
        }
        serde_json::from_value(Value::Object(fields)).map_err(|source| ActionError::Decode {
            kind: self.kind.to_string(),
            source,
        })
    }

    /// The action's `type` tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Deserialize the payload, if there is one.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>, ActionError> {
        self.payload
            .as_ref()
            .map(|payload| {
                T::deserialize(payload).map_err(|source| ActionError::Decode {
                    kind: self.kind.to_string(),
                    source,
                })
            })
            .transpose()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)
    }
}

/// Shorthand for [`Action::new`].
pub fn create_action(kind: impl Into<Cow<'static, str>>) -> Result<Action, ActionError> {
    Action::new(kind)
}

/// An action carrying `payload`. `None` is the "no value" sentinel: the
/// resulting action carries no payload field at all.
pub fn create_action_with<P: Serialize>(
    kind: impl Into<Cow<'static, str>>,
    payload: Option<P>,
) -> Result<Action, ActionError> {
    let mut action = Action::new(kind)?;
    action.payload = payload
        .map(|payload| serde_json::to_value(payload).map_err(ActionError::Payload))
        .transpose()?;
    Ok(action)
}

// ---------------------------------------------------------------------------
// Deserialization
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, deserialize_with = "present")]
    payload: Option<Value>,
}

/// A `payload` key that is present is a payload, even when it is `null`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawAction> for Action {
    type Error = ActionError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        let mut action = Action::new(raw.kind)?;
        action.payload = raw.payload;
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "payload")]
    enum Todo {
        #[serde(rename = "todo/add")]
        Add { title: String },
        #[serde(rename = "todo/clear")]
        Clear,
    }

    #[test]
    fn action_without_payload_omits_the_field() {
        let action = create_action("PING").unwrap();
        assert_eq!(action.kind(), "PING");
        assert!(!action.has_payload());
        assert_eq!(serde_json::to_value(&action).unwrap(), json!({ "type": "PING" }));
    }

    #[test]
    fn none_payload_is_the_no_value_sentinel() {
        let action = create_action_with::<u32>("PING", None).unwrap();
        assert_eq!(action, create_action("PING").unwrap());
    }

    #[test]
    fn explicit_null_payload_is_kept() {
        let action = create_action_with("PING", Some(())).unwrap();
        assert_eq!(action.payload(), Some(&Value::Null));

        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"type":"PING","payload":null}"#);
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn empty_type_fails_fast() {
        assert!(matches!(create_action(""), Err(ActionError::EmptyType)));
        assert!(matches!(
            create_action_with("", Some(1)),
            Err(ActionError::EmptyType)
        ));
        assert!(serde_json::from_str::<Action>(r#"{"type":""}"#).is_err());
    }

    #[test]
    fn payload_as_reads_typed_payload() {
        let action = create_action_with("ADD", Some(5_i64)).unwrap();
        assert_eq!(action.payload_as::<i64>().unwrap(), Some(5));
        assert_eq!(create_action("ADD").unwrap().payload_as::<i64>().unwrap(), None);
        assert!(matches!(
            action.payload_as::<String>(),
            Err(ActionError::Decode { .. })
        ));
    }

    #[test]
    fn tagged_enums_convert_both_ways() {
        let add = Action::encode(&Todo::Add {
            title: "milk".into(),
        })
        .unwrap();
        assert_eq!(add.kind(), "todo/add");
        assert_eq!(add.payload(), Some(&json!({ "title": "milk" })));
        assert_eq!(
            add.decode::<Todo>().unwrap(),
            Todo::Add {
                title: "milk".into()
            }
        );

        let clear = Action::encode(&Todo::Clear).unwrap();
        assert!(!clear.has_payload());
        assert_eq!(clear.decode::<Todo>().unwrap(), Todo::Clear);
    }

    #[test]
    fn foreign_actions_do_not_decode() {
        let action = create_action("other/thing").unwrap();
        assert!(matches!(
            action.decode::<Todo>(),
            Err(ActionError::Decode { .. })
        ));
        assert!(matches!(Action::encode(&42), Err(ActionError::Untagged)));
    }

    #[test]
    fn reserved_actions_match_their_literals() {
        assert_eq!(Action::init().kind(), "@@INIT");
        assert_eq!(Action::init_state().kind(), "@@INIT/state");
    }
}
