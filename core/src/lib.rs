//! Synchronous client for homeserver groups.
//!
//! # Overview
//! `GroupResource` exposes group operations (join, leave, kick, invite, tag,
//! send events, read state, list members) over blocking HTTP calls. Each
//! operation has a `build_*` method producing a plain-data `HttpRequest` and,
//! where needed, a `parse_*` function decoding the response body, so request
//! shapes and decoding can be tested without a network.
//!
//! # Design
//! - `ClientContext` is an explicit, immutable value: base URL, credentials and
//!   an `HttpTransport`. Nothing is global.
//! - `ClientContext::execute_authenticated` classifies statuses. Each call
//!   passes an ignore-set of statuses that count as an empty success (404 for
//!   state lookups and `leave`).
//! - Throwing operations return `Result<T, GroupError>`. Their `try_*` twins
//!   return `Result<Option<ErrorInfo>, GroupError>` and are derived from the
//!   throwing form by `error::attempt`. Only failures the server reported
//!   with an `{errcode, error}` envelope become `ErrorInfo`; validation,
//!   transport and decode failures still come back as `Err`.
//! - Path segments are percent-encoded one by one with the `url` crate.

pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod group;
pub mod http;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use context::ClientContext;
pub use decode::JsonObject;
pub use error::{attempt, ErrorInfo, GroupError};
pub use group::GroupResource;
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, UreqTransport};
pub use types::{ContentRef, GroupCreationOptions, GroupProfile, MemberProfile};
