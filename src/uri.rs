//! Resource names and descriptor locators.
//!
//! Two URI shapes name a resource:
//!
//! * readable — `dfs://nick@uid/path`, meaningful to people;
//! * static — `dfsf://nick@<b32-hd>` (or `dfsd://` for directories),
//!   carrying the 16-byte descriptor locator directly, base32-encoded
//!   with the six padding characters trimmed.
//!
//! The locator Hd is the first 16 bytes of SHA-1 over the readable form;
//! when a description key Kd is configured the hash is additionally
//! passed through one AES-ECB block, so knowing a readable name is not
//! enough to locate the resource. Hd is computed at construction and
//! never changes afterwards, even if the uid or nick are later filled in
//! from a descriptor.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::crypto;

static READABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^dfs://(?:(?P<nick>\w*)@)?(?:(?P<uid>\w*)/)?(?P<path>.*)$")
        .expect("readable uri pattern")
});

static STATIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^dfs[fd]://(?P<nick>\w*)@(?P<hd>\w+)$").expect("static uri pattern")
});

/// Default uid/nick applied when a parsed URI omits them, normally the
/// `[main]` identity of the configuration.
#[derive(Debug, Clone, Default)]
pub struct UriDefaults {
    pub uid: String,
    pub nick: String,
}

/// A parsed resource name with its materialized descriptor locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub uid: String,
    pub nick: String,
    pub path: String,
    hd: [u8; 16],
}

impl Uri {
    /// Build a URI from its readable components, deriving Hd under the
    /// optional description key.
    pub fn from_readable(uid: &str, nick: &str, path: &str, kd: Option<&[u8; 16]>) -> Self {
        let mut uri = Self {
            uid: uid.to_string(),
            nick: nick.to_string(),
            path: path.to_string(),
            hd: [0u8; 16],
        };
        uri.hd = derive_hd(&uri.readable(), kd);
        uri
    }

    /// A URI for a part or chained descriptor: random nick, no uid or
    /// path, random locator. Two such URIs collide with negligible
    /// probability.
    pub fn random() -> Self {
        Self {
            uid: String::new(),
            nick: crypto::random_nick(),
            path: String::new(),
            hd: crypto::random_key(),
        }
    }

    /// Parse either URI shape, applying `defaults` for missing uid/nick.
    /// Malformed input yields `None`.
    pub fn parse(input: &str, defaults: &UriDefaults, kd: Option<&[u8; 16]>) -> Option<Self> {
        if let Some(captures) = READABLE_RE.captures(input) {
            let nick = match captures.name("nick") {
                Some(m) if !m.as_str().is_empty() => m.as_str(),
                _ => defaults.nick.as_str(),
            };
            let uid = match captures.name("uid") {
                Some(m) if !m.as_str().is_empty() => m.as_str(),
                _ => defaults.uid.as_str(),
            };
            let path = match captures.name("path") {
                Some(m) if !m.as_str().is_empty() => m.as_str(),
                _ => "/",
            };
            return Some(Self::from_readable(uid, nick, path, kd));
        }
        let captures = STATIC_RE.captures(input)?;
        let nick = match captures.name("nick") {
            Some(m) if !m.as_str().is_empty() => m.as_str().to_string(),
            _ => defaults.nick.clone(),
        };
        let encoded = format!("{}======", &captures["hd"]);
        let bytes = data_encoding::BASE32.decode(encoded.as_bytes()).ok()?;
        let hd: [u8; 16] = bytes.as_slice().try_into().ok()?;
        Some(Self { uid: defaults.uid.clone(), nick, path: String::new(), hd })
    }

    /// The 16-byte descriptor locator, the DHT key of this resource's
    /// top descriptor.
    pub fn hd(&self) -> [u8; 16] {
        self.hd
    }

    /// The human readable form.
    pub fn readable(&self) -> String {
        if !self.nick.is_empty() {
            format!("dfs://{}@{}/{}", self.nick, self.uid, self.path)
        } else if !self.uid.is_empty() {
            format!("dfs://{}/{}", self.uid, self.path)
        } else {
            format!("dfs:///{}", self.path)
        }
    }

    /// The static form carrying the locator itself. The base32 padding
    /// (always `======` for a 16-byte locator) is trimmed.
    pub fn to_static(&self) -> String {
        let encoded = data_encoding::BASE32.encode(&self.hd);
        let trimmed = &encoded[..encoded.len() - 6];
        if !self.nick.is_empty() {
            format!("dfsf://{}@{}", self.nick, trimmed)
        } else {
            format!("dfsf://{}", trimmed)
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.readable())
    }
}

fn derive_hd(readable: &str, kd: Option<&[u8; 16]>) -> [u8; 16] {
    let hash = crypto::sha1_16(readable.as_bytes());
    match kd {
        Some(kd) => crypto::ecb_encrypt_block(kd, &hash),
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> UriDefaults {
        UriDefaults { uid: "defuid".to_string(), nick: "defnick".to_string() }
    }

    #[test]
    fn parses_full_readable_form() {
        let uri = Uri::parse("dfs://nick@uid/some/path", &defaults(), None).unwrap();
        assert_eq!(uri.nick, "nick");
        assert_eq!(uri.uid, "uid");
        assert_eq!(uri.path, "some/path");
        assert_eq!(uri.readable(), "dfs://nick@uid/some/path");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let uri = Uri::parse("dfs:///just/a/path", &defaults(), None).unwrap();
        assert_eq!(uri.nick, "defnick");
        assert_eq!(uri.uid, "defuid");
        assert_eq!(uri.path, "just/a/path");
    }

    #[test]
    fn malformed_input_is_absence() {
        assert!(Uri::parse("http://example.com/x", &defaults(), None).is_none());
        assert!(Uri::parse("dfsf://nick@###", &defaults(), None).is_none());
        assert!(Uri::parse("dfsf://nick@TOOSHORT", &defaults(), None).is_none());
    }

    #[test]
    fn static_form_round_trips_the_locator() {
        let uri = Uri::random();
        let stat = uri.to_static();
        assert!(stat.starts_with("dfsf://"));
        // 26 base32 chars encode the 16-byte locator once padding is cut.
        assert_eq!(stat.rsplit('@').next().unwrap().len(), 26);

        let back = Uri::parse(&stat, &defaults(), None).unwrap();
        assert_eq!(back.hd(), uri.hd());
        assert_eq!(back.nick, uri.nick);
    }

    #[test]
    fn dfsd_scheme_is_accepted() {
        let uri = Uri::random();
        let stat = uri.to_static().replacen("dfsf", "dfsd", 1);
        let back = Uri::parse(&stat, &defaults(), None).unwrap();
        assert_eq!(back.hd(), uri.hd());
    }

    #[test]
    fn locator_is_deterministic_per_key() {
        let d = defaults();
        let plain_a = Uri::parse("dfs://nick@uid/file", &d, None).unwrap();
        let plain_b = Uri::parse("dfs://nick@uid/file", &d, None).unwrap();
        assert_eq!(plain_a.hd(), plain_b.hd());

        let kd = crypto::sha1_16(b"description key");
        let keyed = Uri::parse("dfs://nick@uid/file", &d, Some(&kd)).unwrap();
        assert_ne!(keyed.hd(), plain_a.hd());
        // And it must round-trip through ECB for readers holding Kd.
        assert_eq!(crypto::ecb_decrypt_block(&kd, &keyed.hd()), plain_a.hd());
    }

    #[test]
    fn distinct_paths_get_distinct_locators() {
        let d = defaults();
        let a = Uri::parse("dfs://nick@uid/a", &d, None).unwrap();
        let b = Uri::parse("dfs://nick@uid/b", &d, None).unwrap();
        assert_ne!(a.hd(), b.hd());
    }
}
