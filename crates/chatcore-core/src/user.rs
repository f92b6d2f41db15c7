use serde::{Deserialize, Serialize};

const MAX_USERNAME_CHARS: usize = 32;
const MIN_USERNAME_CHARS: usize = 1;

/// A validated, opaque account identifier.
///
/// Usernames are short strings chosen either by a client during
/// `register_3` (the generated 8-10 digit candidate) or, in principle,
/// supplied directly; this type enforces the wire-level shape so
/// handlers never have to re-check it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = UsernameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let len = value.chars().count();
        if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
            return Err(UsernameError::BadLength { actual: len });
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(UsernameError::InvalidCharacters);
        }
        Ok(Self(value))
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl std::str::FromStr for Username {
    type Err = UsernameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username must be {MIN_USERNAME_CHARS}-{MAX_USERNAME_CHARS} characters, got {actual}")]
    BadLength { actual: usize },
    #[error("username may only contain ascii alphanumerics, '_' and '-'")]
    InvalidCharacters,
}

/// A durable account row: credentials plus the mutable profile fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    /// Stored exactly as submitted at registration — see DESIGN.md for why
    /// this rewrite keeps the source's plaintext-password contract.
    pub password: String,
    pub nickname: Option<String>,
    pub signature: Option<String>,
    pub avatar_id: Option<String>,
    pub avatar_path: Option<String>,
}

impl User {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.username.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Username, UsernameError};

    #[test]
    fn accepts_generated_numeric_candidate() {
        assert!(Username::try_from(String::from("048213907")).is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(
            Username::try_from(String::new()).unwrap_err(),
            UsernameError::BadLength { actual: 0 }
        );
    }

    #[test]
    fn rejects_whitespace() {
        assert_eq!(
            Username::try_from(String::from("a b")).unwrap_err(),
            UsernameError::InvalidCharacters
        );
    }
}
