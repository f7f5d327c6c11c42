//! Scellement des secrets de configuration (mots de passe, tokens, identifiants)
//!
//! Les secrets sont chiffrés en AES-256-GCM avec une clé propre au
//! répertoire de configuration (`.secret.key`, générée au premier usage).
//! Copier `config.yaml` seul ne suffit donc pas à relire les secrets.
//!
//! Format stocké : `sealed:BASE64(nonce(12 bytes) + ciphertext)`

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::Engine;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::info;

/// Préfixe identifiant une valeur scellée
const SEALED_PREFIX: &str = "sealed:";

const KEY_FILE: &str = ".secret.key";

const NONCE_LEN: usize = 12;

fn read_key(key_path: &Path) -> Result<Key<Aes256Gcm>> {
    let encoded = fs::read_to_string(key_path)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow!("Invalid secret key file {}: {}", key_path.display(), e))?;
    if bytes.len() != 32 {
        return Err(anyhow!(
            "Invalid secret key file {}: expected 32 bytes, got {}",
            key_path.display(),
            bytes.len()
        ));
    }
    Ok(*Key::<Aes256Gcm>::from_slice(&bytes))
}

/// Charge la clé du répertoire, ou la crée si elle n'existe pas encore
///
/// La clé est écrite dans un fichier temporaire puis publiée par un lien
/// exclusif : quand deux appels se croisent, le perdant relit la clé du
/// gagnant, toujours complète.
fn load_or_create_key(config_dir: &Path) -> Result<Key<Aes256Gcm>> {
    let key_path = config_dir.join(KEY_FILE);
    if key_path.exists() {
        return read_key(&key_path);
    }

    let key = Aes256Gcm::generate_key(OsRng);
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let suffix = engine.encode(Aes256Gcm::generate_nonce(&mut OsRng));
    let tmp_path = config_dir.join(format!("{}.{}", KEY_FILE, suffix));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)?;
    file.write_all(base64::engine::general_purpose::STANDARD.encode(key).as_bytes())?;
    file.sync_all()?;
    drop(file);

    let published = fs::hard_link(&tmp_path, &key_path);
    let _ = fs::remove_file(&tmp_path);
    match published {
        Ok(()) => {
            info!(path=%key_path.display(), "Generated configuration secret key");
            Ok(key)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => read_key(&key_path),
        Err(e) => Err(e.into()),
    }
}

/// Scelle un secret avec la clé du répertoire de configuration
pub fn seal(config_dir: &Path, secret: &str) -> Result<String> {
    let key = load_or_create_key(config_dir)?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, secret.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);

    Ok(format!(
        "{}{}",
        SEALED_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(&combined)
    ))
}

/// Ouvre une valeur stockée : déchiffre si elle est scellée, sinon la rend telle quelle
pub fn open(config_dir: &Path, stored: &str) -> Result<String> {
    let Some(encoded) = stored.strip_prefix(SEALED_PREFIX) else {
        return Ok(stored.to_string());
    };

    let key = load_or_create_key(config_dir)?;
    let cipher = Aes256Gcm::new(&key);

    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;

    if combined.len() < NONCE_LEN {
        return Err(anyhow!("Invalid sealed value (too short)"));
    }

    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Indique si une valeur stockée est scellée
pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}
