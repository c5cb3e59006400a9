//! Cache key derivation

use crate::options::NormalizedRequest;
use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 digest identifying a cached render
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// What part of a normalized request feeds the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScope {
    /// The full target URL including its canonical options text
    #[default]
    TargetUrl,
    /// Only the canonical options text; distinct pages sharing identical
    /// options share one entry
    OptionsOnly,
}

impl std::str::FromStr for KeyScope {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "url" | "target-url" => Ok(KeyScope::TargetUrl),
            "options" | "options-only" => Ok(KeyScope::OptionsOnly),
            other => Err(crate::Error::Config(format!("unknown key scope '{}'", other))),
        }
    }
}

/// Hash arbitrary text into a cache key.
pub fn fingerprint(text: &str) -> CacheKey {
    let digest = Sha256::digest(text.as_bytes());
    CacheKey(hex::encode(digest))
}

/// Derive the cache key of a normalized request.
pub fn cache_key(request: &NormalizedRequest, scope: KeyScope) -> CacheKey {
    match scope {
        KeyScope::TargetUrl => fingerprint(request.target.as_str()),
        KeyScope::OptionsOnly => fingerprint(&request.canonical),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::normalize;
    use url::Url;

    fn request(base: &str, options: &str) -> NormalizedRequest {
        let mut u = Url::parse(base).unwrap();
        u.query_pairs_mut().append_pair("options", options);
        normalize(u, 80).unwrap()
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            fingerprint("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_shape() {
        let key = fingerprint(r#"{"xMax":480}"#);
        assert_eq!(key.as_str().len(), 64);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn equal_options_give_equal_keys() {
        let a = request("https://example.com/", r#"{"yMax":1,"xMax":2}"#);
        let b = request("https://example.com/", r#"{ "xMax": 2, "yMax": 1 }"#);
        for scope in [KeyScope::TargetUrl, KeyScope::OptionsOnly] {
            assert_eq!(cache_key(&a, scope), cache_key(&b, scope));
        }
    }

    #[test]
    fn differing_options_give_distinct_keys() {
        let corpus = [
            r#"{}"#,
            r#"{"xMax":480}"#,
            r#"{"xMax":"480"}"#,
            r#"{"xMax":481}"#,
            r#"{"yMax":480}"#,
            r#"{"xMax":480,"yMax":480}"#,
            r#"{"theme":"dark"}"#,
            r#"{"theme":"light"}"#,
            r#"{"nested":{"a":1}}"#,
            r#"{"nested":{"a":[1]}}"#,
        ];
        let mut keys: Vec<CacheKey> = corpus
            .iter()
            .map(|o| cache_key(&request("https://example.com/", o), KeyScope::OptionsOnly))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), corpus.len());
    }

    #[test]
    fn scope_controls_url_collisions() {
        let a = request("https://a.example/", r#"{"xMax":480}"#);
        let b = request("https://b.example/", r#"{"xMax":480}"#);
        assert_ne!(cache_key(&a, KeyScope::TargetUrl), cache_key(&b, KeyScope::TargetUrl));
        assert_eq!(cache_key(&a, KeyScope::OptionsOnly), cache_key(&b, KeyScope::OptionsOnly));
    }

    #[test]
    fn parse_scope() {
        assert_eq!("url".parse::<KeyScope>().unwrap(), KeyScope::TargetUrl);
        assert_eq!("options".parse::<KeyScope>().unwrap(), KeyScope::OptionsOnly);
        assert!("bogus".parse::<KeyScope>().is_err());
    }
}
