//! Typed wrappers over the two platforms' REST surfaces
//!
//! - [`SourceApi`] - project metadata, refs and identity on the source
//! - [`DestinationApi`] - projects, repositories, groups, policies and wiki
//!   pages on the destination
//!
//! Both are thin: they build [`CallRequest`](crate::client::CallRequest)s and
//! decode bodies. Retry, auth and redaction stay in the call client.

mod destination;
mod source;

pub use destination::{DestinationApi, DestinationRepository, GitRef, MEMBERSHIP_CONFLICT};
pub use source::{ProjectStatistics, SourceApi, SourceProject, SourceRef, SourceUser};

use serde::Deserialize;

/// Destination list envelope: `{ "count": n, "value": [...] }`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub(crate) value: Vec<T>,
}

/// Percent-encode one path segment (RFC 3986 unreserved characters pass through)
#[must_use]
pub fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Inverse of [`encode_segment`]; invalid escapes are kept verbatim and
/// non-UTF-8 results are decoded lossily
#[must_use]
pub fn decode_segment(segment: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encodes_namespace_separator() {
        assert_eq!(encode_segment("group/sub/app"), "group%2Fsub%2Fapp");
        assert_eq!(encode_segment("My Project"), "My%20Project");
        assert_eq!(encode_segment("plain-name_1.0"), "plain-name_1.0");
    }

    #[test]
    fn decode_keeps_invalid_escapes() {
        assert_eq!(decode_segment("100%"), "100%");
        assert_eq!(decode_segment("a%zzb"), "a%zzb");
    }

    proptest! {
        #[test]
        fn segment_encoding_is_reversible(s in "\\PC{0,40}") {
            prop_assert_eq!(decode_segment(&encode_segment(&s)), s);
        }
    }
}
