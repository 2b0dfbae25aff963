//! Typed wrappers over grid capability strings
//!
//! Every grid object is identified by an opaque capability string of the
//! form `URI:<TAG>:<body>`. Code outside this module never inspects the
//! string; it asks for the kind, compares for byte equality, or requests a
//! downgrade. Downgrades only go in the safe direction: write → read →
//! verify. The downgraded body is a one-way hash of the stronger body, so a
//! read capability cannot be promoted back to a write capability.

mod errors;

pub use errors::{CapabilityError, CapabilityResult};

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// The kind of grid object a capability refers to, and the authority it
/// carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapKind {
    /// An immutable file blob
    ImmutableFile,
    /// An immutable directory
    ImmutableDirectory,
    /// Read authority over a mutable directory
    MutableDirectoryRead,
    /// Write authority over a mutable directory
    MutableDirectoryWrite,
    /// Existence/integrity checking only
    Verify,
}

impl CapKind {
    /// The URI tag for this kind.
    fn tag(&self) -> &'static str {
        match self {
            CapKind::ImmutableFile => "CHK",
            CapKind::ImmutableDirectory => "DIR2-CHK",
            CapKind::MutableDirectoryRead => "DIR2-RO",
            CapKind::MutableDirectoryWrite => "DIR2",
            CapKind::Verify => "VERIFY",
        }
    }

    /// Human-readable kind name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CapKind::ImmutableFile => "immutable-file",
            CapKind::ImmutableDirectory => "immutable-directory",
            CapKind::MutableDirectoryRead => "mutable-directory-read",
            CapKind::MutableDirectoryWrite => "mutable-directory-write",
            CapKind::Verify => "verify",
        }
    }
}

/// A parsed, kind-tagged capability.
///
/// Equality is byte equality of the underlying string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    kind: CapKind,
    body: String,
}

impl Capability {
    /// Parse a capability string into its typed form.
    ///
    /// The string must be `URI:<TAG>:<body>` with a known tag and a
    /// non-empty body. The body itself stays opaque (it may contain
    /// further colons).
    pub fn parse(s: &str) -> CapabilityResult<Self> {
        let rest = s
            .strip_prefix("URI:")
            .ok_or_else(|| CapabilityError::Parse(s.to_string()))?;

        // Longest tags first so DIR2-CHK/DIR2-RO are not mistaken for DIR2.
        const TAGS: [(&str, CapKind); 5] = [
            ("DIR2-CHK:", CapKind::ImmutableDirectory),
            ("DIR2-RO:", CapKind::MutableDirectoryRead),
            ("VERIFY:", CapKind::Verify),
            ("DIR2:", CapKind::MutableDirectoryWrite),
            ("CHK:", CapKind::ImmutableFile),
        ];

        for (tag, kind) in TAGS {
            if let Some(body) = rest.strip_prefix(tag) {
                if body.is_empty() || body.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err(CapabilityError::Parse(s.to_string()));
                }
                return Ok(Self {
                    kind,
                    body: body.to_string(),
                });
            }
        }

        Err(CapabilityError::Parse(s.to_string()))
    }

    /// Construct a capability of a known kind from an opaque body.
    ///
    /// Used by grid implementations when minting new objects.
    pub fn from_body(kind: CapKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// The kind of object this capability refers to.
    pub fn kind(&self) -> CapKind {
        self.kind
    }

    /// The opaque body, without the `URI:<TAG>:` prefix.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether this capability names an immutable directory.
    pub fn is_immutable_directory(&self) -> bool {
        self.kind == CapKind::ImmutableDirectory
    }

    /// Whether this capability carries at most read authority.
    pub fn is_read_only(&self) -> bool {
        self.kind != CapKind::MutableDirectoryWrite
    }

    /// Downgrade to read authority.
    ///
    /// A mutable-write capability yields the matching read capability; the
    /// derivation is a one-way hash, so the write body cannot be recovered.
    /// Capabilities that already carry at most read authority are returned
    /// unchanged. Verify capabilities cannot be upgraded.
    pub fn to_read(&self) -> CapabilityResult<Capability> {
        match self.kind {
            CapKind::MutableDirectoryWrite => Ok(Capability {
                kind: CapKind::MutableDirectoryRead,
                body: derive_body("read", &self.body),
            }),
            CapKind::Verify => Err(CapabilityError::IllegalConversion {
                from: self.kind.name(),
                target: "read",
            }),
            _ => Ok(self.clone()),
        }
    }

    /// Downgrade to a verify capability.
    ///
    /// Derived from the read form so that `to_verify(write)` and
    /// `to_verify(to_read(write))` agree. A verify capability is returned
    /// unchanged.
    pub fn to_verify(&self) -> CapabilityResult<Capability> {
        if self.kind == CapKind::Verify {
            return Ok(self.clone());
        }
        let read = self.to_read()?;
        Ok(Capability {
            kind: CapKind::Verify,
            body: derive_body("verify", &read.body),
        })
    }

    /// Require this capability to be of the given kind.
    pub fn require_kind(&self, kind: CapKind) -> CapabilityResult<&Capability> {
        if self.kind == kind {
            Ok(self)
        } else {
            Err(CapabilityError::WrongKind {
                expected: kind.name(),
                actual: self.kind.name(),
            })
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "URI:{}:{}", self.kind.tag(), self.body)
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Capability::parse(&s).map_err(D::Error::custom)
    }
}

/// One-way body derivation for downgrades: hex SHA-256 over a
/// domain-separated input.
fn derive_body(domain: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(b":");
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        let cases = [
            ("URI:CHK:aaa:bbb", CapKind::ImmutableFile),
            ("URI:DIR2-CHK:ccc", CapKind::ImmutableDirectory),
            ("URI:DIR2-RO:ddd:eee", CapKind::MutableDirectoryRead),
            ("URI:DIR2:fff:ggg", CapKind::MutableDirectoryWrite),
            ("URI:VERIFY:hhh", CapKind::Verify),
        ];
        for (s, kind) in cases {
            let cap = Capability::parse(s).unwrap();
            assert_eq!(cap.kind(), kind, "{}", s);
            assert_eq!(cap.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for s in ["", "URI:", "URI:DIR2:", "URI:BOGUS:abc", "DIR2:abc", "URI:CHK:a b"] {
            assert!(Capability::parse(s).is_err(), "{:?} should not parse", s);
        }
    }

    #[test]
    fn test_equality_is_byte_equality() {
        let a = Capability::parse("URI:CHK:aaa").unwrap();
        let b = Capability::parse("URI:CHK:aaa").unwrap();
        let c = Capability::parse("URI:CHK:aab").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_write_downgrades_to_read() {
        let write = Capability::parse("URI:DIR2:secret:fp").unwrap();
        let read = write.to_read().unwrap();
        assert_eq!(read.kind(), CapKind::MutableDirectoryRead);
        // One-way: derived body must not contain the write body
        assert!(!read.body().contains("secret"));
        // Stable
        assert_eq!(read, write.to_read().unwrap());
    }

    #[test]
    fn test_read_is_already_read() {
        let read = Capability::parse("URI:DIR2-RO:abc:def").unwrap();
        assert_eq!(read.to_read().unwrap(), read);
    }

    #[test]
    fn test_verify_agrees_across_write_and_read() {
        let write = Capability::parse("URI:DIR2:secret:fp").unwrap();
        let read = write.to_read().unwrap();
        assert_eq!(write.to_verify().unwrap(), read.to_verify().unwrap());
        assert_eq!(write.to_verify().unwrap().kind(), CapKind::Verify);
    }

    #[test]
    fn test_no_upgrade_from_verify() {
        let verify = Capability::parse("URI:VERIFY:abc").unwrap();
        assert!(matches!(
            verify.to_read(),
            Err(CapabilityError::IllegalConversion { .. })
        ));
    }

    #[test]
    fn test_require_kind() {
        let cap = Capability::parse("URI:DIR2-CHK:abc").unwrap();
        assert!(cap.require_kind(CapKind::ImmutableDirectory).is_ok());
        let err = cap.require_kind(CapKind::ImmutableFile).unwrap_err();
        assert!(matches!(err, CapabilityError::WrongKind { .. }));
    }

    #[test]
    fn test_serde_round_trip() {
        let cap = Capability::parse("URI:DIR2-RO:abc:def").unwrap();
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, "\"URI:DIR2-RO:abc:def\"");
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }

    #[test]
    fn test_is_immutable_directory() {
        assert!(Capability::parse("URI:DIR2-CHK:abc")
            .unwrap()
            .is_immutable_directory());
        assert!(!Capability::parse("URI:CHK:abc")
            .unwrap()
            .is_immutable_directory());
    }
}
