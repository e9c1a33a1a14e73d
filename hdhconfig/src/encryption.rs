//! Chiffrement des mots de passe stockés dans la configuration
//!
//! The Icecast source password is the only secret the relay keeps on disk.
//! It may be written in clear or as `encrypted:<base64>`; the latter is an
//! AES-256-GCM ciphertext whose key is derived from the machine identifier,
//! so a copied config file cannot be decrypted elsewhere.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

/// Préfixe pour identifier les mots de passe chiffrés
const ENCRYPTED_PREFIX: &str = "encrypted:";

const KEY_SALT: &[u8] = b"hdhrelay-config-encryption-v1";
const NONCE_SALT: &[u8] = b"hdhrelay-nonce-v1";
const NONCE_LEN: usize = 12;

static MACHINE_KEY: OnceCell<[u8; 32]> = OnceCell::new();

/// Reads a stable machine identifier.
///
/// Linux exposes it in `/etc/machine-id` (or the dbus copy); macOS through
/// `ioreg`.
fn machine_id() -> Result<String> {
    #[cfg(target_os = "linux")]
    {
        for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = std::fs::read_to_string(candidate) {
                let id = id.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }
        Err(anyhow!("Failed to read machine-id"))
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ioreg")
            .args(["-d2", "-c", "IOPlatformExpertDevice"])
            .output()?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find(|line| line.contains("IOPlatformUUID"))
            .and_then(|line| line.split('"').nth(3))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Failed to extract IOPlatformUUID from ioreg"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(anyhow!("Unsupported platform for machine id extraction"))
    }
}

fn machine_key() -> Result<&'static [u8; 32]> {
    MACHINE_KEY.get_or_try_init(|| -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(machine_id()?.as_bytes());
        hasher.update(KEY_SALT);
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());
        Ok(key)
    })
}

fn cipher() -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(machine_key()?).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

/// Chiffre un mot de passe avec la clé dérivée de la machine
///
/// The nonce is derived from the password itself so the same password always
/// produces the same text, which keeps `config.yaml` stable across saves.
/// The output is `encrypted:` followed by base64 of `nonce || ciphertext`.
pub fn encrypt_password(password: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(NONCE_SALT);
    let digest = hasher.finalize();
    let nonce_bytes = &digest[..NONCE_LEN];

    let ciphertext = cipher()?
        .encrypt(Nonce::from_slice(nonce_bytes), password.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(&combined)))
}

/// Déchiffre un mot de passe au format `encrypted:BASE64`
///
/// Fails if the prefix is missing, the payload is malformed, or the value
/// was encrypted on another machine.
pub fn decrypt_password(encrypted: &str) -> Result<String> {
    let payload = encrypted
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| anyhow!("Invalid encrypted password format (missing prefix)"))?;

    let combined = STANDARD
        .decode(payload)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    if combined.len() <= NONCE_LEN {
        return Err(anyhow!("Invalid ciphertext (too short)"));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

    let plaintext = cipher()?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong machine or corrupted data): {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Vérifie si une valeur est un mot de passe chiffré
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Obtient le mot de passe en clair, qu'il soit chiffré ou non
pub fn get_password(value: &str) -> Result<String> {
    if is_encrypted(value) {
        decrypt_password(value)
    } else {
        Ok(value.to_string())
    }
}
