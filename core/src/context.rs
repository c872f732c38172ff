//! Immutable client context shared by every group handle.
//!
//! # Design
//! The context owns the base URL, credentials and transport for one
//! authenticated user. It is passed explicitly into each `GroupResource` and
//! never mutated afterwards, so clones can be used from several threads.
//! `execute_authenticated` is the single place where HTTP statuses are
//! classified into a body, a tolerated absence or a `GroupError`.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::config::ClientConfig;
use crate::error::{ErrorInfo, GroupError};
use crate::http::{HttpRequest, HttpTransport, UreqTransport};
use crate::types::ContentRef;

const CLIENT_PREFIX: [&str; 3] = ["_matrix", "client", "r0"];
const MEDIA_DOWNLOAD_PREFIX: [&str; 4] = ["_matrix", "media", "r0", "download"];

#[derive(Clone)]
pub struct ClientContext {
    base_url: Url,
    access_token: String,
    user_id: String,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("base_url", &self.base_url.as_str())
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    pub fn new(
        homeserver: &str,
        access_token: &str,
        user_id: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, GroupError> {
        let base_url = Url::parse(homeserver)
            .map_err(|e| GroupError::Config(format!("invalid homeserver URL {homeserver}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GroupError::Config(format!(
                "homeserver URL {homeserver} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            access_token: access_token.to_string(),
            user_id: user_id.to_string(),
            transport,
        })
    }

    /// Build a context that talks to the homeserver over `ureq`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, GroupError> {
        let transport = Arc::new(UreqTransport::new(config.timeout()));
        Self::new(
            &config.homeserver,
            &config.access_token,
            &config.user_id,
            transport,
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// ID of the authenticated user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Resolve a client API endpoint. Each segment is percent-encoded on its
    /// own, so a segment can never introduce extra path components.
    pub fn client_path(&self, segments: &[&str]) -> Url {
        self.resolve(&CLIENT_PREFIX, segments)
    }

    /// Like `client_path`, with query parameters appended in order. An empty
    /// parameter list leaves the URL without a query string.
    pub fn client_path_with_query(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.client_path(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Download URL for an `mxc://` content reference.
    pub fn media_download_url(&self, content: &ContentRef) -> Option<Url> {
        let server = content.server_name()?;
        let media = content.media_id()?;
        Some(self.resolve(&MEDIA_DOWNLOAD_PREFIX, &[server, media]))
    }

    fn resolve(&self, prefix: &[&str], segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        // `new` rejects cannot-be-a-base URLs, so the segments are always available.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(prefix).extend(segments);
        }
        url
    }

    /// Send `request` with the caller's credentials and classify the answer.
    ///
    /// A 2xx status yields the body. A status in `ignored` yields an empty
    /// body. Any other status fails with `GroupError::Request`.
    pub fn execute_authenticated(
        &self,
        mut request: HttpRequest,
        ignored: &[u16],
    ) -> Result<String, GroupError> {
        request.headers.push((
            "authorization".to_string(),
            format!("Bearer {}", self.access_token),
        ));
        let response = self.transport.send(&request)?;
        tracing::debug!(
            method = request.method.as_str(),
            url = %request.url,
            status = response.status,
            "group request executed"
        );

        if response.is_success() {
            return Ok(response.body);
        }
        if ignored.contains(&response.status) {
            tracing::debug!(status = response.status, url = %request.url, "ignoring status");
            return Ok(String::new());
        }

        let info = ErrorInfo::from_body(&response.body);
        tracing::warn!(
            status = response.status,
            errcode = info.as_ref().map(|i| i.errcode.as_str()),
            url = %request.url,
            "group request failed"
        );
        Err(GroupError::Request {
            status: response.status,
            info,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, HttpResponse};
    use crate::testing::ScriptedTransport;

    fn context(transport: Arc<ScriptedTransport>) -> ClientContext {
        ClientContext::new("http://localhost:8008/", "secret", "@me:hs", transport).unwrap()
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest::without_body(HttpMethod::Get, url.to_string())
    }

    #[test]
    fn client_path_encodes_each_segment() {
        let ctx = context(ScriptedTransport::new());
        let url = ctx.client_path(&["groups", "+g:hs", "tags", "a/b c"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8008/_matrix/client/r0/groups/+g:hs/tags/a%2Fb%20c"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let ctx = ClientContext::new(
            "https://example.org/matrix",
            "t",
            "@me:hs",
            ScriptedTransport::new(),
        )
        .unwrap();
        assert_eq!(
            ctx.client_path(&["groups"]).as_str(),
            "https://example.org/matrix/_matrix/client/r0/groups"
        );
    }

    #[test]
    fn from_config_parses_homeserver() {
        let config = ClientConfig {
            homeserver: "https://hs.example/matrix".to_string(),
            access_token: "t".to_string(),
            user_id: "@me:hs.example".to_string(),
            timeout_secs: Some(5),
        };
        let ctx = ClientContext::from_config(&config).unwrap();
        assert_eq!(ctx.base_url().as_str(), "https://hs.example/matrix");
        assert_eq!(ctx.base_url().host_str(), Some("hs.example"));
        assert_eq!(ctx.user_id(), "@me:hs.example");
    }

    #[test]
    fn query_is_omitted_when_empty() {
        let ctx = context(ScriptedTransport::new());
        let url = ctx.client_path_with_query(&["groups", "+g:hs", "join"], &[]);
        assert!(url.query().is_none());
        let url = ctx.client_path_with_query(
            &["groups", "+g:hs", "join"],
            &[("server_name", "a.org"), ("server_name", "b.org")],
        );
        assert_eq!(url.query(), Some("server_name=a.org&server_name=b.org"));
    }

    #[test]
    fn media_download_url_for_mxc() {
        let ctx = context(ScriptedTransport::new());
        let content = ContentRef::parse("mxc://hs.example/abc123").unwrap();
        assert_eq!(
            ctx.media_download_url(&content).unwrap().as_str(),
            "http://localhost:8008/_matrix/media/r0/download/hs.example/abc123"
        );
        let content = ContentRef::parse("https://cdn.example/a.png").unwrap();
        assert!(ctx.media_download_url(&content).is_none());
    }

    #[test]
    fn invalid_homeserver_is_a_config_error() {
        let err = ClientContext::new("not a url", "t", "@me:hs", ScriptedTransport::new())
            .unwrap_err();
        assert!(matches!(err, GroupError::Config(_)));
    }

    #[test]
    fn execute_attaches_bearer_token() {
        let transport = ScriptedTransport::new();
        transport.respond(200, "{}");
        let ctx = context(transport.clone());
        ctx.execute_authenticated(get("http://localhost:8008/x"), &[])
            .unwrap();
        let sent = transport.requests();
        assert_eq!(
            sent[0].headers,
            vec![("authorization".to_string(), "Bearer secret".to_string())]
        );
    }

    #[test]
    fn execute_returns_body_on_success() {
        let transport = ScriptedTransport::new();
        transport.respond(200, r#"{"a":1}"#);
        let body = context(transport)
            .execute_authenticated(get("http://localhost:8008/x"), &[])
            .unwrap();
        assert_eq!(body, r#"{"a":1}"#);
    }

    #[test]
    fn ignored_status_yields_empty_body() {
        let transport = ScriptedTransport::new();
        transport.respond(404, r#"{"errcode":"M_NOT_FOUND","error":"gone"}"#);
        let body = context(transport)
            .execute_authenticated(get("http://localhost:8008/x"), &[404])
            .unwrap();
        assert_eq!(body, "");
    }

    #[test]
    fn other_status_is_classified() {
        let transport = ScriptedTransport::new();
        transport.respond(404, r#"{"errcode":"M_NOT_FOUND","error":"gone"}"#);
        let err = context(transport)
            .execute_authenticated(get("http://localhost:8008/x"), &[])
            .unwrap_err();
        match err {
            GroupError::Request { status, info, .. } => {
                assert_eq!(status, 404);
                assert_eq!(info.unwrap().errcode, "M_NOT_FOUND");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unstructured_failure_has_no_info() {
        let transport = ScriptedTransport::new();
        transport.respond(502, "Bad Gateway");
        let err = context(transport)
            .execute_authenticated(get("http://localhost:8008/x"), &[404])
            .unwrap_err();
        assert!(matches!(err, GroupError::Request { status: 502, info: None, .. }));
    }

    #[test]
    fn transport_failure_propagates() {
        let transport = ScriptedTransport::new();
        transport.fail("connection refused");
        let err = context(transport)
            .execute_authenticated(get("http://localhost:8008/x"), &[404])
            .unwrap_err();
        assert!(matches!(err, GroupError::Transport(_)));
    }

    #[test]
    fn response_status_range() {
        let ok = HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: String::new(),
        };
        assert!(ok.is_success());
    }
}
