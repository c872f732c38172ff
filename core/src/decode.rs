//! Response body decoding.
//!
//! A blank body means "nothing there": it is what an ignored status produces
//! and what some servers send for unset state. Everything else must be a JSON
//! object.

use serde_json::{Map, Value};

use crate::error::GroupError;
use crate::types::{ContentRef, MemberProfile};

pub type JsonObject = Map<String, Value>;

/// Parse a body that may legitimately be blank.
pub fn parse_optional_object(body: &str) -> Result<Option<JsonObject>, GroupError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    parse_object(body).map(Some)
}

pub fn parse_object(body: &str) -> Result<JsonObject, GroupError> {
    match serde_json::from_str(body) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(other) => Err(GroupError::Decode(format!(
            "expected a JSON object, got {}",
            kind(&other)
        ))),
        Err(e) => Err(GroupError::Decode(e.to_string())),
    }
}

/// A string field, or `None` when missing or of another type.
pub fn find_string(obj: &JsonObject, field: &str) -> Option<String> {
    obj.get(field).and_then(Value::as_str).map(str::to_string)
}

/// A string field the server is required to send.
pub fn required_string(obj: &JsonObject, field: &str) -> Result<String, GroupError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(GroupError::Decode(format!(
            "field {field} should be a string, got {}",
            kind(other)
        ))),
        None => Err(GroupError::Decode(format!("missing field {field}"))),
    }
}

/// Decode a `joined_members` body. Entries whose value is not an object are
/// skipped; the server's order is kept.
pub fn parse_joined_members(body: &str) -> Result<Vec<MemberProfile>, GroupError> {
    let Some(obj) = parse_optional_object(body)? else {
        return Ok(Vec::new());
    };
    let joined = match obj.get("joined") {
        Some(Value::Object(joined)) => joined,
        Some(other) => {
            return Err(GroupError::Decode(format!(
                "field joined should be an object, got {}",
                kind(other)
            )))
        }
        None => return Err(GroupError::Decode("missing field joined".to_string())),
    };

    let members = joined
        .iter()
        .filter_map(|(user_id, entry)| entry.as_object().map(|entry| (user_id, entry)))
        .map(|(user_id, entry)| {
            let avatar_url = find_string(entry, "avatar_url");
            let avatar = avatar_url.as_deref().and_then(ContentRef::parse);
            MemberProfile {
                user_id: user_id.clone(),
                display_name: find_string(entry, "display_name"),
                avatar_url,
                avatar,
            }
        })
        .collect();
    Ok(members)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
