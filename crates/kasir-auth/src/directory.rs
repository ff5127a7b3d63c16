//! Credential directory port and the bundled implementations
//!
//! The authenticator only ever asks one question of a directory: which
//! identity, if any, owns this PIN. How the answer is produced is the
//! directory's business. [`HashedDirectory`] keeps Argon2id hashes rather
//! than plaintext PINs; [`MemoryDirectory`] is a plaintext map for tests
//! and demos.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AuthError, ConfigError, DirectoryError};

/// Number of digits in a PIN
pub const PIN_LENGTH: usize = 6;

/// A validated six-digit PIN
///
/// The backing string is wiped when the value is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(Zeroizing<String>);

impl Pin {
    /// Parse a PIN, rejecting anything but exactly six ASCII digits
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        if raw.len() != PIN_LENGTH {
            return Err(AuthError::MalformedInput(format!(
                "PIN must be {} digits",
                PIN_LENGTH
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AuthError::MalformedInput(
                "PIN must contain only digits".to_string(),
            ));
        }
        Ok(Self(Zeroizing::new(raw.to_string())))
    }

    /// Build a PIN from digit values 0..=9
    pub(crate) fn from_digits(digits: &[u8; PIN_LENGTH]) -> Self {
        let mut raw = Zeroizing::new(String::with_capacity(PIN_LENGTH));
        for d in digits {
            raw.push(char::from(b'0' + d));
        }
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(******)")
    }
}

/// Whoever a PIN belongs to
///
/// Opaque to the authenticator: a non-empty lookup result means success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier (employee or owner id)
    pub id: String,
    /// Display name
    pub label: String,
    /// Role name as the directory knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Resolves a PIN to at most one identity
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// Look up the identity owning `pin`
    ///
    /// `Ok(None)` means no match. `Err` means the directory could not answer
    /// and says nothing about whether the PIN is right.
    async fn lookup_by_pin(&self, pin: &Pin) -> Result<Option<Identity>, DirectoryError>;
}

/// Plaintext in-memory directory
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
    entries: HashMap<String, Identity>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` under `pin`
    pub fn with_entry(mut self, pin: &Pin, identity: Identity) -> Self {
        self.insert(pin, identity);
        self
    }

    pub fn insert(&mut self, pin: &Pin, identity: Identity) {
        self.entries.insert(pin.as_str().to_string(), identity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialDirectory for MemoryDirectory {
    async fn lookup_by_pin(&self, pin: &Pin) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.entries.get(pin.as_str()).cloned())
    }
}

/// One entry of a credentials file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Argon2id PHC string
    pub pin_hash: String,
}

impl CredentialEntry {
    /// Render as a `[[credential]]` table ready to append to a credentials file
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = CredentialsFile {
            credentials: vec![self.clone()],
        };
        Ok(toml::to_string(&file)?)
    }

    fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            label: self.label.clone(),
            role: self.role.clone(),
        }
    }
}

/// Credentials file format (TOML, `[[credential]]` tables)
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default, rename = "credential")]
    credentials: Vec<CredentialEntry>,
}

/// Directory over Argon2id-hashed PINs
///
/// Hashes are salted per entry, so a lookup has to verify against every
/// entry in turn. Verification runs on the blocking pool.
#[derive(Clone, Debug)]
pub struct HashedDirectory {
    entries: Arc<Vec<CredentialEntry>>,
}

impl HashedDirectory {
    /// Build from entries, rejecting unparseable hashes up front
    pub fn new(entries: Vec<CredentialEntry>) -> Result<Self, ConfigError> {
        for entry in &entries {
            PasswordHash::new(&entry.pin_hash).map_err(|e| {
                ConfigError::Invalid(format!("Invalid PIN hash for '{}': {}", entry.id, e))
            })?;
        }
        Ok(Self {
            entries: Arc::new(entries),
        })
    }

    /// Load a TOML credentials file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: CredentialsFile = toml::from_str(contents)?;
        Self::new(file.credentials)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialDirectory for HashedDirectory {
    async fn lookup_by_pin(&self, pin: &Pin) -> Result<Option<Identity>, DirectoryError> {
        let entries = Arc::clone(&self.entries);
        let pin = pin.clone();
        tokio::task::spawn_blocking(move || find_match(&entries, &pin))
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }
}

fn find_match(entries: &[CredentialEntry], pin: &Pin) -> Option<Identity> {
    let argon2 = Argon2::default();
    entries
        .iter()
        .find(|entry| {
            PasswordHash::new(&entry.pin_hash)
                .map(|hash| argon2.verify_password(pin.as_str().as_bytes(), &hash).is_ok())
                .unwrap_or(false)
        })
        .map(CredentialEntry::identity)
}

/// Hash a PIN with Argon2id for a credentials file entry
pub fn hash_pin(pin: &Pin) -> Result<String, ConfigError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(pin.as_str().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::Invalid(format!("Failed to hash PIN: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_validation() {
        assert!(Pin::parse("123456").is_ok());
        assert!(Pin::parse("000000").is_ok());

        // Too short / too long
        assert!(matches!(Pin::parse("12345"), Err(AuthError::MalformedInput(_))));
        assert!(matches!(Pin::parse("1234567"), Err(AuthError::MalformedInput(_))));

        // Non-digits
        assert!(matches!(Pin::parse("12345a"), Err(AuthError::MalformedInput(_))));
        assert!(matches!(Pin::parse("１２３４"), Err(AuthError::MalformedInput(_))));
    }

    #[test]
    fn test_pin_debug_is_redacted() {
        let pin = Pin::parse("424242").unwrap();
        assert_eq!(format!("{:?}", pin), "Pin(******)");
    }

    #[test]
    fn test_pin_from_digits() {
        let pin = Pin::from_digits(&[0, 1, 2, 7, 8, 9]);
        assert_eq!(pin.as_str(), "012789");
    }

    #[tokio::test]
    async fn test_memory_directory_lookup() {
        let owner = Identity::new("owner-1", "Budi").with_role("owner");
        let directory =
            MemoryDirectory::new().with_entry(&Pin::parse("111111").unwrap(), owner.clone());

        let found = directory
            .lookup_by_pin(&Pin::parse("111111").unwrap())
            .await
            .unwrap();
        assert_eq!(found, Some(owner));

        let missing = directory
            .lookup_by_pin(&Pin::parse("222222").unwrap())
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_hashed_directory_lookup() {
        let pin = Pin::parse("735190").unwrap();
        let hash = hash_pin(&pin).unwrap();
        let contents = format!(
            r#"
[[credential]]
id = "owner-1"
label = "Budi"
role = "owner"
pin_hash = "{hash}"
"#
        );
        let directory = HashedDirectory::from_toml_str(&contents).unwrap();
        assert_eq!(directory.len(), 1);

        let found = directory.lookup_by_pin(&pin).await.unwrap();
        assert_eq!(
            found,
            Some(Identity::new("owner-1", "Budi").with_role("owner"))
        );

        let missing = directory
            .lookup_by_pin(&Pin::parse("735191").unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_credential_entry_round_trips_awkward_labels() {
        let pin = Pin::parse("802417").unwrap();
        let entry = CredentialEntry {
            id: "owner-1".to_string(),
            label: r#"Budi "Bos" Santoso \ Cabang 2"#.to_string(),
            role: None,
            pin_hash: hash_pin(&pin).unwrap(),
        };

        let rendered = entry.to_toml().unwrap();
        assert!(rendered.trim_start().starts_with("[[credential]]"));
        assert!(!rendered.contains("role"));

        let directory = HashedDirectory::from_toml_str(&rendered).unwrap();
        assert_eq!(directory.len(), 1);
        let found = directory.lookup_by_pin(&pin).await.unwrap();
        assert_eq!(
            found,
            Some(Identity::new("owner-1", r#"Budi "Bos" Santoso \ Cabang 2"#))
        );
    }

    #[test]
    fn test_hashed_directory_rejects_bad_hash() {
        let contents = r#"
[[credential]]
id = "cashier-2"
label = "Sari"
pin_hash = "123456"
"#;
        assert!(matches!(
            HashedDirectory::from_toml_str(contents),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_hashed_directory_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("credentials.toml");
        fs::write(&path, "").unwrap();

        let directory = HashedDirectory::load(&path).unwrap();
        assert!(directory.is_empty());
    }
}
