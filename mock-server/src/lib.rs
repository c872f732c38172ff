//! In-memory homeserver exposing the group endpoints of the client API.
//!
//! Access tokens are not checked against a user table: the bearer token *is*
//! the caller's user ID. Errors use the `{errcode, error}` envelope.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const SERVER_NAME: &str = "mock.server";

#[derive(Clone, Debug, Default)]
pub struct Group {
    /// Keyed by `(event type, state key)`.
    pub state: HashMap<(String, String), Value>,
    /// Joined user IDs in join order.
    pub members: Vec<String>,
    pub invited: Vec<String>,
    pub events: Vec<Event>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub sender: String,
    pub event_type: String,
    pub txn_id: String,
    pub content: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Profile {
    pub displayname: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct Store {
    pub groups: HashMap<String, Group>,
    pub profiles: HashMap<String, Profile>,
    /// `(user, group) -> tag -> order`.
    pub tags: HashMap<(String, String), Map<String, Value>>,
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    errcode: &'static str,
    error: String,
}

impl ApiError {
    fn new(status: StatusCode, errcode: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            errcode,
            error: error.into(),
        }
    }

    fn unknown_group(group_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "M_NOT_FOUND",
            format!("Group {group_id} does not exist"),
        )
    }

    fn not_a_member(user_id: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "M_FORBIDDEN",
            format!("{user_id} is not a member of this group"),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "errcode": self.errcode, "error": self.error }));
        (self.status, body).into_response()
    }
}

/// The authenticated caller, taken from the bearer token.
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .map(|token| Caller(token.to_string()))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    "M_MISSING_TOKEN",
                    "Missing access token",
                )
            })
    }
}

#[derive(Deserialize)]
pub struct CreateGroup {
    pub localpart: Option<String>,
    #[serde(default)]
    pub profile: Option<CreateGroupProfile>,
}

#[derive(Deserialize)]
pub struct CreateGroupProfile {
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct UserTarget {
    pub user_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct TagOrder {
    pub order: Option<f64>,
}

#[derive(Deserialize)]
pub struct DisplayName {
    pub displayname: Option<String>,
}

#[derive(Deserialize)]
pub struct AvatarUrl {
    pub avatar_url: Option<String>,
}

pub fn app() -> Router {
    app_with_store(Db::default())
}

pub fn app_with_store(db: Db) -> Router {
    Router::new()
        .route("/_matrix/client/r0/create_group", post(create_group))
        .route(
            "/_matrix/client/r0/groups/{group_id}/state/{event_type}",
            get(get_state).put(put_state),
        )
        .route(
            "/_matrix/client/r0/groups/{group_id}/state/{event_type}/{state_key}",
            get(get_keyed_state).put(put_keyed_state),
        )
        .route("/_matrix/client/r0/groups/{group_id}/join", post(join))
        .route("/_matrix/client/r0/groups/{group_id}/leave", post(leave))
        .route("/_matrix/client/r0/groups/{group_id}/kick", post(kick))
        .route("/_matrix/client/r0/groups/{group_id}/invite", post(invite))
        .route(
            "/_matrix/client/r0/groups/{group_id}/send/{event_type}/{txn_id}",
            put(send_event),
        )
        .route(
            "/_matrix/client/r0/groups/{group_id}/joined_members",
            get(joined_members),
        )
        .route(
            "/_matrix/client/r0/user/{user_id}/groups/{group_id}/tags",
            get(list_tags),
        )
        .route(
            "/_matrix/client/r0/user/{user_id}/groups/{group_id}/tags/{tag}",
            put(set_tag).delete(delete_tag),
        )
        .route(
            "/_matrix/client/r0/profile/{user_id}/displayname",
            put(set_display_name),
        )
        .route(
            "/_matrix/client/r0/profile/{user_id}/avatar_url",
            put(set_avatar_url),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn create_group(
    State(db): State<Db>,
    Caller(caller): Caller,
    Json(input): Json<CreateGroup>,
) -> Result<Json<Value>, ApiError> {
    let localpart = input
        .localpart
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let group_id = format!("+{localpart}:{SERVER_NAME}");

    let mut store = db.write().await;
    if store.groups.contains_key(&group_id) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "M_GROUP_IN_USE",
            format!("Group {group_id} already exists"),
        ));
    }
    let mut group = Group {
        members: vec![caller],
        ..Group::default()
    };
    if let Some(name) = input.profile.and_then(|p| p.name) {
        group.state.insert(
            ("m.group.name".to_string(), String::new()),
            json!({ "name": name }),
        );
    }
    store.groups.insert(group_id.clone(), group);
    tracing::info!(%group_id, "group created");
    Ok(Json(json!({ "group_id": group_id })))
}

async fn get_state(
    State(db): State<Db>,
    Caller(_): Caller,
    Path((group_id, event_type)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    read_state(&db, &group_id, event_type, String::new()).await
}

async fn get_keyed_state(
    State(db): State<Db>,
    Caller(_): Caller,
    Path((group_id, event_type, state_key)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    read_state(&db, &group_id, event_type, state_key).await
}

async fn read_state(
    db: &Db,
    group_id: &str,
    event_type: String,
    state_key: String,
) -> Result<Json<Value>, ApiError> {
    let store = db.read().await;
    let group = store
        .groups
        .get(group_id)
        .ok_or_else(|| ApiError::unknown_group(group_id))?;
    group
        .state
        .get(&(event_type, state_key))
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "M_NOT_FOUND", "Event not found"))
}

async fn put_state(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((group_id, event_type)): Path<(String, String)>,
    Json(content): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    write_state(&db, &caller, &group_id, event_type, String::new(), content).await
}

async fn put_keyed_state(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((group_id, event_type, state_key)): Path<(String, String, String)>,
    Json(content): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    write_state(&db, &caller, &group_id, event_type, state_key, content).await
}

async fn write_state(
    db: &Db,
    caller: &str,
    group_id: &str,
    event_type: String,
    state_key: String,
    content: Value,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(group_id)
        .ok_or_else(|| ApiError::unknown_group(group_id))?;
    if !group.members.iter().any(|m| m == caller) {
        return Err(ApiError::not_a_member(caller));
    }
    group.state.insert((event_type, state_key), content);
    Ok(Json(json!({ "event_id": new_event_id() })))
}

async fn join(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    group.invited.retain(|u| u != &caller);
    if !group.members.contains(&caller) {
        group.members.push(caller);
    }
    Ok(Json(json!({})))
}

async fn leave(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    let before = group.members.len();
    group.members.retain(|u| u != &caller);
    if group.members.len() == before {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "M_NOT_FOUND",
            format!("{caller} is not a member of {group_id}"),
        ));
    }
    Ok(Json(json!({})))
}

async fn kick(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(group_id): Path<String>,
    Json(target): Json<UserTarget>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    if !group.members.contains(&caller) {
        return Err(ApiError::not_a_member(&caller));
    }
    let before = group.members.len();
    group.members.retain(|u| u != &target.user_id);
    if group.members.len() == before {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "M_NOT_FOUND",
            format!("{} is not a member of {group_id}", target.user_id),
        ));
    }
    tracing::info!(%group_id, user_id = %target.user_id, reason = ?target.reason, "member kicked");
    Ok(Json(json!({})))
}

async fn invite(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(group_id): Path<String>,
    Json(target): Json<UserTarget>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    if !group.members.contains(&caller) {
        return Err(ApiError::not_a_member(&caller));
    }
    if !group.invited.contains(&target.user_id) {
        group.invited.push(target.user_id);
    }
    Ok(Json(json!({})))
}

async fn send_event(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((group_id, event_type, txn_id)): Path<(String, String, String)>,
    Json(content): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut store = db.write().await;
    let group = store
        .groups
        .get_mut(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    if !group.members.contains(&caller) {
        return Err(ApiError::not_a_member(&caller));
    }
    // A repeated transaction ID from the same sender returns the original event.
    if let Some(existing) = group
        .events
        .iter()
        .find(|e| e.sender == caller && e.txn_id == txn_id)
    {
        return Ok(Json(json!({ "event_id": existing.event_id })));
    }
    let event = Event {
        event_id: new_event_id(),
        sender: caller,
        event_type,
        txn_id,
        content,
    };
    let event_id = event.event_id.clone();
    group.events.push(event);
    Ok(Json(json!({ "event_id": event_id })))
}

async fn joined_members(
    State(db): State<Db>,
    Caller(_): Caller,
    Path(group_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = db.read().await;
    let group = store
        .groups
        .get(&group_id)
        .ok_or_else(|| ApiError::unknown_group(&group_id))?;
    let joined: Map<String, Value> = group
        .members
        .iter()
        .map(|user_id| {
            let mut entry = Map::new();
            if let Some(profile) = store.profiles.get(user_id) {
                if let Some(name) = &profile.displayname {
                    entry.insert("display_name".to_string(), json!(name));
                }
                if let Some(url) = &profile.avatar_url {
                    entry.insert("avatar_url".to_string(), json!(url));
                }
            }
            (user_id.clone(), Value::Object(entry))
        })
        .collect();
    Ok(Json(json!({ "joined": joined })))
}

fn check_own_tags(caller: &str, user_id: &str) -> Result<(), ApiError> {
    if caller != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "M_FORBIDDEN",
            "Cannot access tags of another user",
        ));
    }
    Ok(())
}

async fn list_tags(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((user_id, group_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    check_own_tags(&caller, &user_id)?;
    let store = db.read().await;
    let tags = store
        .tags
        .get(&(user_id, group_id))
        .cloned()
        .unwrap_or_default();
    Ok(Json(json!({ "tags": tags })))
}

async fn set_tag(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((user_id, group_id, tag)): Path<(String, String, String)>,
    Json(input): Json<TagOrder>,
) -> Result<Json<Value>, ApiError> {
    check_own_tags(&caller, &user_id)?;
    if let Some(order) = input.order {
        if !(0.0..=1.0).contains(&order) {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "M_INVALID_PARAM",
                "order must be between 0 and 1",
            ));
        }
    }
    let mut store = db.write().await;
    if !store.groups.contains_key(&group_id) {
        return Err(ApiError::unknown_group(&group_id));
    }
    let entry = match input.order {
        Some(order) => json!({ "order": order }),
        None => json!({}),
    };
    store
        .tags
        .entry((user_id, group_id))
        .or_default()
        .insert(tag, entry);
    Ok(Json(json!({})))
}

async fn delete_tag(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path((user_id, group_id, tag)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    check_own_tags(&caller, &user_id)?;
    let mut store = db.write().await;
    if let Some(tags) = store.tags.get_mut(&(user_id, group_id)) {
        tags.remove(&tag);
    }
    Ok(Json(json!({})))
}

fn check_own_profile(caller: &str, user_id: &str) -> Result<(), ApiError> {
    if caller != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "M_FORBIDDEN",
            "Cannot change the profile of another user",
        ));
    }
    Ok(())
}

async fn set_display_name(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
    Json(input): Json<DisplayName>,
) -> Result<Json<Value>, ApiError> {
    check_own_profile(&caller, &user_id)?;
    db.write()
        .await
        .profiles
        .entry(user_id)
        .or_default()
        .displayname = input.displayname;
    Ok(Json(json!({})))
}

/// The URL is stored as sent; clients decide whether it is a usable URI.
async fn set_avatar_url(
    State(db): State<Db>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
    Json(input): Json<AvatarUrl>,
) -> Result<Json<Value>, ApiError> {
    check_own_profile(&caller, &user_id)?;
    db.write()
        .await
        .profiles
        .entry(user_id)
        .or_default()
        .avatar_url = input.avatar_url;
    Ok(Json(json!({})))
}

fn new_event_id() -> String {
    format!("${}:{SERVER_NAME}", Uuid::new_v4().simple())
}
