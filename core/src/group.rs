//! Group handle: request building, execution and decoding per operation.
//!
//! # Design
//! `GroupResource` holds a `ClientContext` and the group address, nothing
//! else. Every operation is split the same way:
//! - `build_*` produces the `HttpRequest` without touching the network,
//! - `parse_*` (where the response carries data) decodes the raw body,
//! - the executing method sends the request through
//!   `ClientContext::execute_authenticated` with the operation's ignore-set.
//!
//! `try_*` variants are never implemented on their own: they pass the result
//! of the matching executing method through `error::attempt`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::context::ClientContext;
use crate::decode::{self, JsonObject};
use crate::error::{attempt, ErrorInfo, GroupError};
use crate::http::{HttpMethod, HttpRequest};
use crate::types::{
    ContentRef, CreateGroupBody, GroupCreationOptions, GroupProfile, InviteBody, KickBody,
    MemberProfile, TagBody,
};

const NOT_FOUND: u16 = 404;

/// State lookups treat 404 as "no such state".
const STATE_IGNORED: &[u16] = &[NOT_FOUND];
/// Leaving a group we are not in counts as having left.
const LEAVE_IGNORED: &[u16] = &[NOT_FOUND];

const NAME_EVENT: &str = "m.group.name";
const TOPIC_EVENT: &str = "m.group.topic";
const AVATAR_EVENT: &str = "m.group.avatar";

static TXN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A group on the homeserver, addressed as `+localpart:domain`.
///
/// Holds no mutable state: concurrent calls on one handle are independent
/// requests. Nothing is cached, so every accessor is a round trip.
#[derive(Debug, Clone)]
pub struct GroupResource {
    ctx: ClientContext,
    address: String,
}

impl GroupResource {
    pub fn new(ctx: ClientContext, address: impl Into<String>) -> Self {
        Self {
            ctx,
            address: address.into(),
        }
    }

    pub fn build_create_group(
        ctx: &ClientContext,
        options: &GroupCreationOptions,
    ) -> Result<HttpRequest, GroupError> {
        let url = ctx.client_path(&["create_group"]);
        HttpRequest::with_json(HttpMethod::Post, url.into(), &CreateGroupBody::from(options))
    }

    /// Extract the new group's ID from a `create_group` response.
    pub fn parse_create_group(body: &str) -> Result<String, GroupError> {
        decode::required_string(&decode::parse_object(body)?, "group_id")
    }

    /// Create a group and return a handle to it.
    pub fn create(ctx: ClientContext, options: &GroupCreationOptions) -> Result<Self, GroupError> {
        let request = Self::build_create_group(&ctx, options)?;
        let body = ctx.execute_authenticated(request, &[])?;
        let group_id = Self::parse_create_group(&body)?;
        tracing::debug!(group_id = %group_id, "group created");
        Ok(Self::new(ctx, group_id))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Same as `address`: a group's ID is its address.
    pub fn id(&self) -> &str {
        &self.address
    }

    pub fn context(&self) -> &ClientContext {
        &self.ctx
    }

    // -----------------------------------------------------------------------
    // Profile
    // -----------------------------------------------------------------------

    pub fn name(&self) -> Result<Option<String>, GroupError> {
        self.state_string(NAME_EVENT, "name")
    }

    pub fn topic(&self) -> Result<Option<String>, GroupError> {
        self.state_string(TOPIC_EVENT, "topic")
    }

    pub fn avatar_url(&self) -> Result<Option<String>, GroupError> {
        self.state_string(AVATAR_EVENT, "url")
    }

    /// The avatar as a content reference. A URL that does not parse as a URI
    /// is treated as no avatar.
    pub fn avatar(&self) -> Result<Option<ContentRef>, GroupError> {
        Ok(self.avatar_url()?.as_deref().and_then(ContentRef::parse))
    }

    /// Fetch name, topic and avatar URL. Three independent reads, so the
    /// result may mix values from before and after a concurrent change.
    pub fn profile(&self) -> Result<GroupProfile, GroupError> {
        Ok(GroupProfile {
            name: self.name()?,
            topic: self.topic()?,
            avatar_url: self.avatar_url()?,
        })
    }

    fn state_string(&self, event_type: &str, field: &str) -> Result<Option<String>, GroupError> {
        Ok(self
            .state(event_type)?
            .and_then(|content| decode::find_string(&content, field)))
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// An empty `state_key` leaves the key segment out of the path.
    pub fn build_get_state(&self, event_type: &str, state_key: &str) -> HttpRequest {
        let url = if state_key.is_empty() {
            self.ctx
                .client_path(&["groups", self.address.as_str(), "state", event_type])
        } else {
            self.ctx
                .client_path(&["groups", self.address.as_str(), "state", event_type, state_key])
        };
        HttpRequest::without_body(HttpMethod::Get, url.into())
    }

    pub fn parse_state(body: &str) -> Result<Option<JsonObject>, GroupError> {
        decode::parse_optional_object(body)
    }

    pub fn state(&self, event_type: &str) -> Result<Option<JsonObject>, GroupError> {
        self.state_with_key(event_type, "")
    }

    /// State content for `(event_type, state_key)`, or `None` when the server
    /// has none (404 or a blank body).
    pub fn state_with_key(
        &self,
        event_type: &str,
        state_key: &str,
    ) -> Result<Option<JsonObject>, GroupError> {
        let request = self.build_get_state(event_type, state_key);
        let body = self.ctx.execute_authenticated(request, STATE_IGNORED)?;
        Self::parse_state(&body)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Each server becomes one `server_name` query parameter, in order.
    pub fn build_join(&self, servers: &[&str]) -> Result<HttpRequest, GroupError> {
        let query: Vec<(&str, &str)> = servers.iter().map(|s| ("server_name", *s)).collect();
        let url = self
            .ctx
            .client_path_with_query(&["groups", self.address.as_str(), "join"], &query);
        HttpRequest::with_json(HttpMethod::Post, url.into(), &JsonObject::new())
    }

    pub fn join(&self) -> Result<(), GroupError> {
        self.join_via(&[])
    }

    pub fn join_via(&self, servers: &[&str]) -> Result<(), GroupError> {
        let request = self.build_join(servers)?;
        self.ctx.execute_authenticated(request, &[])?;
        Ok(())
    }

    pub fn try_join(&self) -> Result<Option<ErrorInfo>, GroupError> {
        attempt(self.join())
    }

    pub fn try_join_via(&self, servers: &[&str]) -> Result<Option<ErrorInfo>, GroupError> {
        attempt(self.join_via(servers))
    }

    pub fn build_leave(&self) -> Result<HttpRequest, GroupError> {
        let url = self.ctx.client_path(&["groups", self.address.as_str(), "leave"]);
        HttpRequest::with_json(HttpMethod::Post, url.into(), &JsonObject::new())
    }

    /// Leave the group. A 404 (not a member) is treated as success.
    pub fn leave(&self) -> Result<(), GroupError> {
        let request = self.build_leave()?;
        self.ctx.execute_authenticated(request, LEAVE_IGNORED)?;
        Ok(())
    }

    pub fn try_leave(&self) -> Result<Option<ErrorInfo>, GroupError> {
        attempt(self.leave())
    }

    pub fn build_kick(&self, user_id: &str, reason: Option<&str>) -> Result<HttpRequest, GroupError> {
        let url = self.ctx.client_path(&["groups", self.address.as_str(), "kick"]);
        let body = KickBody {
            user_id: user_id.to_string(),
            reason: reason.map(str::to_string),
        };
        HttpRequest::with_json(HttpMethod::Post, url.into(), &body)
    }

    pub fn kick(&self, user_id: &str, reason: Option<&str>) -> Result<(), GroupError> {
        let request = self.build_kick(user_id, reason)?;
        self.ctx.execute_authenticated(request, &[])?;
        Ok(())
    }

    pub fn try_kick(
        &self,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<Option<ErrorInfo>, GroupError> {
        attempt(self.kick(user_id, reason))
    }

    pub fn build_invite(&self, user_id: &str) -> Result<HttpRequest, GroupError> {
        let url = self.ctx.client_path(&["groups", self.address.as_str(), "invite"]);
        let body = InviteBody {
            user_id: user_id.to_string(),
        };
        HttpRequest::with_json(HttpMethod::Post, url.into(), &body)
    }

    pub fn invite(&self, user_id: &str) -> Result<(), GroupError> {
        let request = self.build_invite(user_id)?;
        self.ctx.execute_authenticated(request, &[])?;
        Ok(())
    }

    pub fn build_joined_members(&self) -> HttpRequest {
        let url = self
            .ctx
            .client_path(&["groups", self.address.as_str(), "joined_members"]);
        HttpRequest::without_body(HttpMethod::Get, url.into())
    }

    pub fn parse_joined_members(body: &str) -> Result<Vec<MemberProfile>, GroupError> {
        decode::parse_joined_members(body)
    }

    pub fn joined_users(&self) -> Result<Vec<MemberProfile>, GroupError> {
        let body = self
            .ctx
            .execute_authenticated(self.build_joined_members(), &[])?;
        Self::parse_joined_members(&body)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn build_send_event<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        txn_id: &str,
        content: &T,
    ) -> Result<HttpRequest, GroupError> {
        let url = self
            .ctx
            .client_path(&["groups", self.address.as_str(), "send", event_type, txn_id]);
        HttpRequest::with_json(HttpMethod::Put, url.into(), content)
    }

    pub fn parse_send_event(body: &str) -> Result<String, GroupError> {
        decode::required_string(&decode::parse_object(body)?, "event_id")
    }

    /// Send an event and return its ID. A response without `event_id` is a
    /// decode error.
    pub fn send_event<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        content: &T,
    ) -> Result<String, GroupError> {
        let request = self.build_send_event(event_type, &next_txn_id(), content)?;
        let body = self.ctx.execute_authenticated(request, &[])?;
        Self::parse_send_event(&body)
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    fn tag_path(&self, tag: &str) -> String {
        self.ctx
            .client_path(&[
                "user",
                self.ctx.user_id(),
                "groups",
                self.address.as_str(),
                "tags",
                tag,
            ])
            .into()
    }

    /// Fails with `InvalidTagOrder` when `order` is outside `[0, 1]`.
    pub fn build_set_tag(&self, tag: &str, order: Option<f64>) -> Result<HttpRequest, GroupError> {
        if let Some(order) = order {
            if !(0.0..=1.0).contains(&order) {
                return Err(GroupError::InvalidTagOrder(order));
            }
        }
        HttpRequest::with_json(HttpMethod::Put, self.tag_path(tag), &TagBody { order })
    }

    /// Tag the group for the current user. The order is checked before
    /// anything is sent.
    pub fn set_tag(&self, tag: &str, order: Option<f64>) -> Result<(), GroupError> {
        let request = self.build_set_tag(tag, order)?;
        self.ctx.execute_authenticated(request, &[])?;
        Ok(())
    }

    pub fn build_delete_tag(&self, tag: &str) -> HttpRequest {
        HttpRequest::without_body(HttpMethod::Delete, self.tag_path(tag))
    }

    pub fn delete_tag(&self, tag: &str) -> Result<(), GroupError> {
        self.ctx
            .execute_authenticated(self.build_delete_tag(tag), &[])?;
        Ok(())
    }
}

/// Millisecond timestamp plus a process-wide sequence number, so two sends
/// within the same millisecond still get distinct transaction IDs.
fn next_txn_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = TXN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{millis}.{seq}")
}
