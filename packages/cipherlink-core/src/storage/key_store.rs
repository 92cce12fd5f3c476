//! # Key Store
//!
//! File-backed persistence for the device key pair.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY STORE LAYOUT                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  <key_dir>/                                                            │
//! │  └── <user_id>.key        0600, JSON                                   │
//! │        {                                                               │
//! │          "version": 1,                                                 │
//! │          "n": "<decimal>", "e": "<decimal>", "d": "<decimal>",         │
//! │          "p": "<decimal>", "q": "<decimal>"                            │
//! │        }                                                               │
//! │                                                                         │
//! │  Writes go to <user_id>.key.tmp first, then rename over the record.    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::KeyPair;
use crate::error::{Error, Result};

const RECORD_VERSION: u32 = 1;
const MAX_USER_ID_LEN: usize = 64;

#[derive(Serialize, Deserialize)]
struct KeyRecord {
    version: u32,
    n: String,
    e: String,
    d: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<String>,
}

impl KeyRecord {
    fn from_key_pair(key_pair: &KeyPair) -> Self {
        let public = key_pair.public_key();
        let primes = key_pair.primes();
        Self {
            version: RECORD_VERSION,
            n: public.n().to_str_radix(10),
            e: public.e().to_str_radix(10),
            d: key_pair.private_exponent().to_str_radix(10),
            p: primes.map(|(p, _)| p.to_str_radix(10)),
            q: primes.map(|(_, q)| q.to_str_radix(10)),
        }
    }

    fn into_key_pair(self) -> Result<KeyPair> {
        if self.version != RECORD_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported record version {}",
                self.version
            )));
        }

        let primes = match (self.p.as_deref(), self.q.as_deref()) {
            (Some(p), Some(q)) => Some((decimal("p", p)?, decimal("q", q)?)),
            (None, None) => None,
            _ => return Err(Error::Persistence("record has only one prime".into())),
        };

        KeyPair::from_parts(
            decimal("n", &self.n)?,
            decimal("e", &self.e)?,
            decimal("d", &self.d)?,
            primes,
        )
    }
}

fn decimal(field: &str, value: &str) -> Result<BigUint> {
    BigUint::parse_bytes(value.as_bytes(), 10)
        .ok_or_else(|| Error::Persistence(format!("field {} is not a decimal integer", field)))
}

/// Check that a user id is usable as a file name.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        && user_id != "."
        && user_id != "..";

    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "user id must be 1-{} characters of [A-Za-z0-9._-]",
            MAX_USER_ID_LEN
        )))
    }
}

/// Directory of per-user key records.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Create a store rooted at `dir`. Nothing is touched until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `user_id`.
    pub fn path_for(&self, user_id: &str) -> Result<PathBuf> {
        validate_user_id(user_id)?;
        Ok(self.dir.join(format!("{}.key", user_id)))
    }

    /// Whether a record exists for `user_id`.
    pub fn exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.path_for(user_id)?.is_file())
    }

    /// Load the key pair for `user_id`.
    ///
    /// `Ok(None)` means no record. Unreadable or inconsistent records are
    /// [`Error::Persistence`].
    pub fn load(&self, user_id: &str) -> Result<Option<KeyPair>> {
        let path = self.path_for(user_id)?;

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let record: KeyRecord = serde_json::from_str(&contents)
            .map_err(|e| Error::Persistence(format!("corrupt record: {}", e)))?;

        record.into_key_pair().map(Some)
    }

    /// Persist `key_pair` for `user_id` with owner-only permissions.
    pub fn save(&self, user_id: &str, key_pair: &KeyPair) -> Result<()> {
        let path = self.path_for(user_id)?;
        let tmp_path = self.dir.join(format!("{}.key.tmp", user_id));

        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Persistence(format!("cannot create {}: {}", self.dir.display(), e)))?;

        let json = Zeroizing::new(serde_json::to_string_pretty(&KeyRecord::from_key_pair(key_pair))?);

        let write = || -> std::io::Result<()> {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::Persistence(format!("cannot write {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Saved key pair");
        Ok(())
    }

    /// Delete the record for `user_id`. Returns whether one existed.
    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let path = self.path_for(user_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Persistence(format!("cannot delete {}: {}", path.display(), e))),
        }
    }

    /// Load the key pair for `user_id`, generating and saving a new one when
    /// the record is missing or unusable.
    ///
    /// A corrupt record is logged and replaced. Failing to write the new
    /// record is returned to the caller.
    pub fn load_or_generate(&self, user_id: &str, bit_length: u64) -> Result<KeyPair> {
        validate_user_id(user_id)?;

        match self.load(user_id) {
            Ok(Some(key_pair)) => {
                tracing::info!(
                    user_id,
                    bits = key_pair.modulus_bits(),
                    "Loaded existing key pair"
                );
                return Ok(key_pair);
            }
            Ok(None) => {
                tracing::info!(user_id, bits = bit_length, "No stored key pair, generating");
            }
            Err(Error::Persistence(reason)) => {
                tracing::warn!(user_id, %reason, "Stored key pair unusable, regenerating");
            }
            Err(e) => return Err(e),
        }

        let key_pair = KeyPair::generate(bit_length)?;
        self.save(user_id, &key_pair)?;
        Ok(key_pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{key_a, TEST_KEY_BITS};
    use tempfile::TempDir;

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());

        store.save("A", key_a()).unwrap();
        let loaded = store.load("A").unwrap().unwrap();

        assert_eq!(loaded.public_key(), key_a().public_key());
        assert_eq!(loaded.private_exponent(), key_a().private_exponent());
        assert!(loaded.primes().is_some());
        assert!(!dir.path().join("A.key.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_record_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save("A", key_a()).unwrap();

        let mode = fs::metadata(dir.path().join("A.key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_record() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("nested"));
        assert!(store.load("A").unwrap().is_none());
        assert!(!store.exists("A").unwrap());
        assert!(!store.delete("A").unwrap());
    }

    #[test]
    fn test_load_or_generate_reuses_stored_key() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save("A", key_a()).unwrap();

        let loaded = store.load_or_generate("A", TEST_KEY_BITS).unwrap();
        assert_eq!(loaded.public_key(), key_a().public_key());
    }

    #[test]
    fn test_corrupt_record_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        fs::write(dir.path().join("A.key"), "{ not json").unwrap();

        assert!(matches!(store.load("A"), Err(Error::Persistence(_))));

        let fresh = store.load_or_generate("A", TEST_KEY_BITS).unwrap();
        assert_eq!(fresh.modulus_bits(), TEST_KEY_BITS);

        let reloaded = store.load("A").unwrap().unwrap();
        assert_eq!(reloaded.public_key(), fresh.public_key());
    }

    #[test]
    fn test_inconsistent_record_rejected() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save("A", key_a()).unwrap();

        let path = dir.path().join("A.key");
        let mut record: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        record["d"] = serde_json::Value::String("12345".into());
        fs::write(&path, record.to_string()).unwrap();

        assert!(matches!(store.load("A"), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_degenerate_primes_are_regenerated() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save("A", key_a()).unwrap();

        let path = dir.path().join("A.key");
        let mut record: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let n = record["n"].clone();
        record["p"] = serde_json::Value::String("1".into());
        record["q"] = n;
        fs::write(&path, record.to_string()).unwrap();

        assert!(matches!(store.load("A"), Err(Error::Persistence(_))));

        let fresh = store.load_or_generate("A", TEST_KEY_BITS).unwrap();
        assert_ne!(fresh.public_key(), key_a().public_key());
        assert_eq!(fresh.modulus_bits(), TEST_KEY_BITS);
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("A").is_ok());
        assert!(validate_user_id("device-01.home_2").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("../etc/passwd").is_err());
        assert!(validate_user_id("..").is_err());
        assert!(validate_user_id(&"x".repeat(65)).is_err());

        let store = KeyStore::new("keys");
        assert!(matches!(
            store.load_or_generate("a/b", TEST_KEY_BITS),
            Err(Error::Validation(_))
        ));
    }
}
