// Miner identity: the secp256k1 key that labels mined blocks

use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Identity file as stored on disk
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    secret_key: String,
    public_key: String,
}

/// Miner key pair
#[derive(Clone)]
pub struct MinerIdentity {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl MinerIdentity {
    /// Generate a new identity
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;

        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    fn from_secret_bytes(bytes: &[u8]) -> Result<Self, String> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| format!("Invalid secret key: {}", e))?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Compressed public key, used as a block's `miner_key`
    pub fn miner_key(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn miner_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Save identity to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let stored = StoredIdentity {
            secret_key: hex::encode(self.secret_key.secret_bytes()),
            public_key: self.miner_key_hex(),
        };

        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| format!("Failed to serialize identity: {}", e))?;

        fs::write(path, json)
            .map_err(|e| format!("Failed to write identity file: {}", e))?;

        Ok(())
    }

    /// Load identity from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read identity file: {}", e))?;

        let stored: StoredIdentity = serde_json::from_str(&json)
            .map_err(|e| format!("Failed to deserialize identity: {}", e))?;

        let bytes = hex::decode(&stored.secret_key)
            .map_err(|e| format!("Invalid secret key encoding: {}", e))?;
        let identity = Self::from_secret_bytes(&bytes)?;

        if identity.miner_key_hex() != stored.public_key {
            return Err("Identity file public key does not match secret key".to_string());
        }
        Ok(identity)
    }

    /// Load the identity at `path`, creating and saving a fresh one if absent
    pub fn load_or_generate<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let identity = Self::generate();
        identity.save(&path)?;
        log::info!("Generated new miner identity {}", identity.miner_key_hex());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("meshcash-{}-{}.json", name, std::process::id()));
        path
    }

    #[test]
    fn test_generate_compressed_key() {
        let identity = MinerIdentity::generate();
        assert_eq!(identity.miner_key().len(), 33);
        assert_ne!(identity.miner_key(), MinerIdentity::generate().miner_key());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("identity");
        let identity = MinerIdentity::generate();
        identity.save(&path).unwrap();

        let loaded = MinerIdentity::load(&path).unwrap();
        assert_eq!(loaded.miner_key(), identity.miner_key());

        let again = MinerIdentity::load_or_generate(&path).unwrap();
        assert_eq!(again.miner_key(), identity.miner_key());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_rejects_mismatched_key() {
        let path = temp_path("mismatch");
        let stored = StoredIdentity {
            secret_key: hex::encode(MinerIdentity::generate().secret_key.secret_bytes()),
            public_key: MinerIdentity::generate().miner_key_hex(),
        };
        fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        assert!(MinerIdentity::load(&path).is_err());
        fs::remove_file(&path).unwrap();
    }
}
