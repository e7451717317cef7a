//! Upload tokens.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an upload token in characters.
pub const TOKEN_LENGTH: usize = 64;

/// Opaque identifier correlating every request of one upload.
///
/// Tokens are lowercase ASCII alphanumeric, so they survive case-insensitive
/// lookups and filesystem paths unchanged.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadToken(String);

impl UploadToken {
    /// Generate a new random token.
    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(token)
    }

    /// Parse a token, normalizing to lowercase.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != TOKEN_LENGTH {
            return Err(crate::Error::InvalidToken(format!(
                "expected {TOKEN_LENGTH} characters, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(crate::Error::InvalidToken(
                "token must be ASCII alphanumeric".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadToken {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<UploadToken> for String {
    fn from(token: UploadToken) -> Self {
        token.0
    }
}

impl fmt::Debug for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadToken({}..)", &self.0[..8])
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_lowercase_alphanumeric() {
        let token = UploadToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LENGTH);
        assert!(
            token
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        );
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(UploadToken::generate(), UploadToken::generate());
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = "A".repeat(TOKEN_LENGTH);
        let token = UploadToken::parse(&upper).unwrap();
        assert_eq!(token.as_str(), "a".repeat(TOKEN_LENGTH));
        assert_eq!(token, UploadToken::parse(&"a".repeat(TOKEN_LENGTH)).unwrap());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(UploadToken::parse("short").is_err());
        assert!(UploadToken::parse(&"a".repeat(TOKEN_LENGTH + 1)).is_err());

        let mut traversal = "a".repeat(TOKEN_LENGTH - 3);
        traversal.push_str("../");
        assert!(UploadToken::parse(&traversal).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let token = UploadToken::generate();
        let json = serde_json::to_string(&token).unwrap();
        let decoded: UploadToken = serde_json::from_str(&json).unwrap();
        assert_eq!(token, decoded);

        assert!(serde_json::from_str::<UploadToken>("\"nope\"").is_err());
    }
}
