//! Value types produced and consumed by group operations.
//!
//! # Design
//! Everything here is a transient value built for one call. Member and
//! profile data are decoded straight into these structs; there is no cache and
//! no back-reference to the context that fetched them.

use serde::{Deserialize, Serialize};
use url::Url;

/// A content URI, typically `mxc://server/media-id`.
///
/// The text is kept exactly as received. Relative references are valid
/// content URIs but carry no server or media ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    raw: String,
    absolute: Option<Url>,
}

impl ContentRef {
    /// Check `raw` against RFC 3986 syntax. Returns `None` when it is not a
    /// URI reference; nothing is percent-encoded on the way.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Err(reason) = check_syntax(raw) {
            tracing::debug!(url = raw, reason, "not a valid content URI");
            return None;
        }
        let absolute = if has_scheme(raw) {
            match Url::parse(raw) {
                Ok(uri) => Some(uri),
                Err(e) => {
                    tracing::debug!(url = raw, error = %e, "not a valid content URI");
                    return None;
                }
            }
        } else {
            None
        };
        Some(Self {
            raw: raw.to_string(),
            absolute,
        })
    }

    /// The URI text as the server sent it.
    pub fn uri(&self) -> &str {
        &self.raw
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute.is_some()
    }

    fn mxc(&self) -> Option<&Url> {
        self.absolute.as_ref().filter(|uri| uri.scheme() == "mxc")
    }

    /// Origin server of an `mxc` URI.
    pub fn server_name(&self) -> Option<&str> {
        self.mxc()?.host_str().filter(|host| !host.is_empty())
    }

    /// Media ID of an `mxc` URI.
    pub fn media_id(&self) -> Option<&str> {
        let id = self.mxc()?.path().trim_start_matches('/');
        (!id.is_empty()).then_some(id)
    }
}

const FORBIDDEN: &[char] = &['<', '>', '"', '{', '}', '|', '\\', '^', '`'];

fn check_syntax(raw: &str) -> Result<(), &'static str> {
    if raw.is_empty() {
        return Err("empty");
    }
    if raw
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || FORBIDDEN.contains(&c))
    {
        return Err("forbidden character");
    }
    if raw.matches('#').count() > 1 {
        return Err("more than one fragment");
    }
    let bytes = raw.as_bytes();
    for (i, _) in raw.match_indices('%') {
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err("malformed percent escape");
        }
    }
    // A colon before the first '/', '?' or '#' must end a scheme.
    let head = raw.split(['/', '?', '#']).next().unwrap_or_default();
    if head.contains(':') && !has_scheme(raw) {
        return Err("malformed scheme");
    }
    Ok(())
}

/// `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"` before any path,
/// query or fragment delimiter.
fn has_scheme(raw: &str) -> bool {
    let head = raw.split(['/', '?', '#']).next().unwrap_or_default();
    let Some((scheme, _)) = head.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// One joined member of a group, as listed by `joined_members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar: Option<ContentRef>,
}

/// Group profile assembled from the name, topic and avatar state events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupProfile {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar_url: Option<String>,
}

impl GroupProfile {
    /// Avatar reference, or `None` when the URL is missing or not a URI.
    pub fn avatar(&self) -> Option<ContentRef> {
        self.avatar_url.as_deref().and_then(ContentRef::parse)
    }
}

/// Options for creating a new group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCreationOptions {
    pub localpart: Option<String>,
    pub name: Option<String>,
}

/// Body of `POST /create_group`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupBody {
    pub localpart: Option<String>,
    pub profile: CreateGroupProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupProfile {
    pub name: Option<String>,
}

impl From<&GroupCreationOptions> for CreateGroupBody {
    fn from(options: &GroupCreationOptions) -> Self {
        Self {
            localpart: options.localpart.clone(),
            profile: CreateGroupProfile {
                name: options.name.clone(),
            },
        }
    }
}

/// Body of `POST /groups/{id}/kick`. A missing reason is sent as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickBody {
    pub user_id: String,
    pub reason: Option<String>,
}

/// Body of `POST /groups/{id}/invite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteBody {
    pub user_id: String,
}

/// Body of `PUT /user/{me}/groups/{id}/tags/{tag}`. Without an order the body
/// is an empty object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mxc_parts() {
        let content = ContentRef::parse("mxc://example.org/SEsfnsuifSDFSSEF").unwrap();
        assert_eq!(content.server_name(), Some("example.org"));
        assert_eq!(content.media_id(), Some("SEsfnsuifSDFSSEF"));
    }

    #[test]
    fn non_mxc_uri_has_no_media_parts() {
        let content = ContentRef::parse("https://example.org/a.png").unwrap();
        assert_eq!(content.server_name(), None);
        assert_eq!(content.media_id(), None);
    }

    #[test]
    fn invalid_uri_is_absent() {
        assert!(ContentRef::parse("not a uri").is_none());
        assert!(ContentRef::parse("").is_none());
    }

    #[test]
    fn forbidden_characters_are_rejected_not_encoded() {
        for raw in [
            "mxc://hs/pic with space",
            "mxc://hs/a<b>",
            "mxc://hs/\"quoted\"",
            "mxc://hs/{x}",
            "mxc://hs/a|b",
            "mxc://hs/a\\b",
            "mxc://hs/a^b",
            "mxc://hs/a`b",
            "mxc://hs/tab\there",
            "mxc://hs/line\n",
        ] {
            assert!(ContentRef::parse(raw).is_none(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn malformed_escapes_fragments_and_schemes_are_rejected() {
        assert!(ContentRef::parse("mxc://hs/a%zz").is_none());
        assert!(ContentRef::parse("mxc://hs/a%4").is_none());
        assert!(ContentRef::parse("mxc://hs/a#b#c").is_none());
        assert!(ContentRef::parse("1mxc://hs/a").is_none());
    }

    #[test]
    fn valid_uri_text_is_kept_verbatim() {
        let content = ContentRef::parse("mxc://hs.example/a%20b").unwrap();
        assert_eq!(content.uri(), "mxc://hs.example/a%20b");
        assert_eq!(content.media_id(), Some("a%20b"));
    }

    #[test]
    fn relative_reference_is_valid_but_not_mxc() {
        let content = ContentRef::parse("avatar.png").unwrap();
        assert_eq!(content.uri(), "avatar.png");
        assert!(!content.is_absolute());
        assert_eq!(content.server_name(), None);
        assert_eq!(content.media_id(), None);
        assert!(ContentRef::parse("../img/a.png?size=32#top").is_some());
    }

    #[test]
    fn profile_avatar_degrades_to_absent() {
        let profile = GroupProfile {
            avatar_url: Some("mxc://hs/pic with space".to_string()),
            ..GroupProfile::default()
        };
        assert!(profile.avatar().is_none());
    }

    #[test]
    fn kick_body_serializes_null_reason() {
        let body = serde_json::to_value(KickBody {
            user_id: "@bob:hs".to_string(),
            reason: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"user_id": "@bob:hs", "reason": null}));
    }

    #[test]
    fn create_group_body_keeps_nulls() {
        let body = serde_json::to_value(CreateGroupBody::from(&GroupCreationOptions {
            localpart: Some("cooks".to_string()),
            name: None,
        }))
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"localpart": "cooks", "profile": {"name": null}})
        );
    }

    #[test]
    fn tag_body_without_order_is_empty() {
        let body = serde_json::to_string(&TagBody { order: None }).unwrap();
        assert_eq!(body, "{}");
    }
}
