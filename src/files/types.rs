use std::fmt;

use serde::Serialize;

use super::error::{ErrorCode, ServiceError};

/// Caller identity for every public operation. The fingerprint partitions
/// all rows and keys; the raw api key is only ever forwarded to the
/// embedding/contextualization/rerank providers on the caller's behalf.
#[derive(Clone)]
pub struct TenantAuth {
    api_key: String,
    fingerprint: String,
    user_identity: String,
}

impl TenantAuth {
    /// Derive the fingerprint from the api key itself.
    pub fn new(api_key: impl Into<String>, user_identity: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let fingerprint = blake3::hash(api_key.as_bytes()).to_hex().to_string();
        Self {
            api_key,
            fingerprint,
            user_identity: user_identity.into(),
        }
    }

    /// Callers that already hold a precomputed hash pass it through here.
    pub fn with_fingerprint(
        api_key: impl Into<String>,
        fingerprint: impl Into<String>,
        user_identity: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            fingerprint: fingerprint.into(),
            user_identity: user_identity.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn user_identity(&self) -> &str {
        &self.user_identity
    }
}

// keep the raw key out of logs; the fingerprint is safe to print
impl fmt::Debug for TenantAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantAuth")
            .field("api_key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .field("user_identity", &self.user_identity)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
    Truncate,
}

impl WriteMode {
    /// Empty means APPEND; anything unrecognized is the caller's mistake.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        match raw.to_ascii_lowercase().as_str() {
            "" | "append" => Ok(WriteMode::Append),
            "overwrite" => Ok(WriteMode::Overwrite),
            "truncate" => Ok(WriteMode::Truncate),
            other => Err(ServiceError::new(
                ErrorCode::InvalidQuery,
                format!("unknown write mode: {other}"),
            )),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    File,
    Directory,
}

#[derive(Serialize, Debug, Clone)]
pub struct StatResult {
    pub exists: bool,
    pub entry_type: Option<EntryType>,
    pub size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StatResult {
    pub fn missing() -> Self {
        Self {
            exists: false,
            entry_type: None,
            size: 0,
            created_at: 0,
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadResult {
    pub content: Vec<u8>,
    pub content_encoding: String,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct WriteResult {
    pub bytes_written: u64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct RenameResult {
    pub moved_count: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct ListEntry {
    pub path: String,
    pub entry_type: EntryType,
    pub size: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct ListResult {
    pub entries: Vec<ListEntry>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_parsing() {
        assert_eq!(WriteMode::parse("").unwrap(), WriteMode::Append);
        assert_eq!(WriteMode::parse("APPEND").unwrap(), WriteMode::Append);
        assert_eq!(WriteMode::parse("Overwrite").unwrap(), WriteMode::Overwrite);
        assert_eq!(WriteMode::parse("truncate").unwrap(), WriteMode::Truncate);
        let err = WriteMode::parse("replace").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuery);
    }

    #[test]
    fn auth_debug_never_prints_the_key() {
        let auth = TenantAuth::new("sk-super-secret", "user-1");
        let printed = format!("{auth:?}");
        assert!(!printed.contains("sk-super-secret"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = TenantAuth::new("key", "u");
        let b = TenantAuth::new("key", "v");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), TenantAuth::new("other", "u").fingerprint());
    }
}
