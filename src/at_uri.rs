//! Tagged at-URI types: `FeedUri` and `PostUri`.
//!
//! Both wrap a validated `at://<did>/<collection>/<rkey>` string and refuse to
//! construct from anything else, so a `FeedUri` can never be handed to code
//! expecting a `PostUri` and vice versa.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const FEED_COLLECTION: &str = "app.bsky.feed.generator";
const POST_COLLECTION: &str = "app.bsky.feed.post";

struct Parsed<'a> {
    did: &'a str,
    collection: &'a str,
    rkey: &'a str,
}

fn parse(value: &str) -> Result<Parsed<'_>> {
    let rest = value
        .strip_prefix("at://")
        .ok_or_else(|| anyhow!("at-uri '{value}' is missing the at:// scheme"))?;

    let mut parts = rest.splitn(3, '/');
    let did = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("at-uri '{value}' is missing a did"))?;
    let collection = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("at-uri '{value}' is missing a collection"))?;
    let rkey = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("at-uri '{value}' is missing an rkey"))?;

    Ok(Parsed {
        did,
        collection,
        rkey,
    })
}

macro_rules! at_uri_type {
    ($name:ident, $collection:expr, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn did(&self) -> &str {
                parse(&self.0).expect("constructed instances are always valid").did
            }

            pub fn rkey(&self) -> &str {
                parse(&self.0).expect("constructed instances are always valid").rkey
            }
        }

        impl TryFrom<String> for $name {
            type Error = anyhow::Error;

            fn try_from(value: String) -> Result<Self> {
                let parsed = parse(&value)?;
                if parsed.collection != $collection {
                    return Err(anyhow!(
                        "at-uri '{value}' has collection '{}', expected '{}'",
                        parsed.collection,
                        $collection
                    ));
                }
                Ok(Self(value))
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::try_from(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

/// Validates an at-uri's collection segment without minting a tagged type,
/// for collections that don't otherwise need their own wrapper (e.g.
/// `app.bsky.graph.list`, referenced by the user-list block).
pub fn ensure_collection(value: &str, expected: &str) -> Result<()> {
    let parsed = parse(value)?;
    if parsed.collection != expected {
        return Err(anyhow!(
            "at-uri '{value}' has collection '{}', expected '{expected}'",
            parsed.collection
        ));
    }
    Ok(())
}

at_uri_type!(
    FeedUri,
    FEED_COLLECTION,
    "Scoped-parent identifier for a feed; collection must be `app.bsky.feed.generator`."
);
at_uri_type!(
    PostUri,
    POST_COLLECTION,
    "Canonical post identifier; collection must be `app.bsky.feed.post`."
);

impl PostUri {
    /// Build a post uri from its components without round-tripping through string parsing.
    pub fn from_parts(did: &str, rkey: &str) -> Result<Self> {
        Self::try_from(format!("at://{did}/{POST_COLLECTION}/{rkey}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_uri_accepts_post_collection() {
        let uri = PostUri::try_from(
            "at://did:plc:abc/app.bsky.feed.post/3l7vxhiu4kq2u".to_string(),
        )
        .unwrap();
        assert_eq!(uri.did(), "did:plc:abc");
        assert_eq!(uri.rkey(), "3l7vxhiu4kq2u");
    }

    #[test]
    fn post_uri_rejects_wrong_collection() {
        let err = PostUri::try_from(
            "at://did:plc:abc/app.bsky.feed.generator/feed1".to_string(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected"));
    }

    #[test]
    fn feed_uri_requires_generator_collection() {
        assert!(FeedUri::try_from(
            "at://did:plc:abc/app.bsky.feed.generator/feed1".to_string()
        )
        .is_ok());
        assert!(FeedUri::try_from(
            "at://did:plc:abc/app.bsky.feed.post/not-a-feed".to_string()
        )
        .is_err());
    }

    #[test]
    fn rejects_malformed_uris() {
        assert!(FeedUri::try_from("not-an-at-uri".to_string()).is_err());
        assert!(FeedUri::try_from("at://did:plc:abc".to_string()).is_err());
        assert!(FeedUri::try_from("at:///app.bsky.feed.generator/x".to_string()).is_err());
    }

    #[test]
    fn from_parts_roundtrips() {
        let uri = PostUri::from_parts("did:plc:abc", "rkey1").unwrap();
        assert_eq!(uri.as_str(), "at://did:plc:abc/app.bsky.feed.post/rkey1");
    }

    #[test]
    fn ensure_collection_checks_the_named_collection() {
        assert!(ensure_collection(
            "at://did:plc:abc/app.bsky.graph.list/l1",
            "app.bsky.graph.list"
        )
        .is_ok());
        assert!(ensure_collection(
            "at://did:plc:abc/app.bsky.feed.post/l1",
            "app.bsky.graph.list"
        )
        .is_err());
    }
}
