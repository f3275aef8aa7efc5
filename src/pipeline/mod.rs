// clustervault/src/pipeline/mod.rs
//
// The artifact pipeline is an ordered, reversible transform chain applied to
// a raw export stream before anything touches durable storage. Each applied
// stage appends its label to the chain suffix carried on the artifact
// filename, so restore can pop stages off in exact reverse order without any
// external state.

use crate::errors::{AppError, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// Compression level applied to full exports. `Fast` and `Balanced` are
/// gzip; `MaxRatio` trades CPU for the smallest artifact via zstd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgo {
    None,
    Fast,
    Balanced,
    MaxRatio,
}

impl CompressionAlgo {
    pub fn from_selector(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "max-ratio" => Ok(Self::MaxRatio),
            other => Err(AppError::Config(format!(
                "Unknown compression selector '{}', expected none|fast|balanced|max-ratio",
                other
            ))),
        }
    }

    fn stage(self) -> Option<TransformStage> {
        match self {
            Self::None => None,
            Self::Fast | Self::Balanced => Some(TransformStage::Gzip),
            Self::MaxRatio => Some(TransformStage::Zstd),
        }
    }
}

/// One applied transform, identified on disk by its label suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStage {
    Gzip,
    Zstd,
    Encrypt,
}

impl TransformStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Zstd => "zst",
            Self::Encrypt => "enc",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        match label {
            "gz" => Ok(Self::Gzip),
            "zst" => Ok(Self::Zstd),
            "enc" => Ok(Self::Encrypt),
            other => Err(AppError::InvalidInput(format!(
                "Unknown transform label '{}' in chain suffix",
                other
            ))),
        }
    }
}

/// 256-bit symmetric key, supplied out-of-band and never stored next to the
/// artifacts it protects.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| AppError::Config(format!("Encryption key is not valid hex: {}", e)))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            AppError::Config("Encryption key must be exactly 32 bytes (64 hex chars)".to_string())
        })?;
        Ok(Self(arr))
    }

    fn cipher(&self) -> Aes256Gcm {
        // Key length is enforced at construction time.
        Aes256Gcm::new_from_slice(&self.0).unwrap()
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

/// Renders the applied stages as the dotted filename suffix, in application
/// order (e.g. `gz.enc`). Empty chain renders as an empty string.
pub fn chain_suffix(stages: &[TransformStage]) -> String {
    stages
        .iter()
        .map(|s| s.label())
        .collect::<Vec<_>>()
        .join(".")
}

/// Parses a dotted chain suffix back into stages, in application order.
pub fn parse_chain_suffix(suffix: &str) -> Result<Vec<TransformStage>> {
    if suffix.is_empty() {
        return Ok(Vec::new());
    }
    suffix.split('.').map(TransformStage::from_label).collect()
}

/// Applies the configured transform chain to a raw export stream.
///
/// Compression runs first, encryption always last, so decryption is the
/// first stage reversed on restore. Requesting encryption without a key is
/// `MissingKey` and leaves no partial output behind.
pub fn apply(
    raw: &[u8],
    compression: CompressionAlgo,
    encrypt: bool,
    key: Option<&EncryptionKey>,
) -> Result<(Vec<u8>, Vec<TransformStage>)> {
    if encrypt && key.is_none() {
        return Err(AppError::MissingKey);
    }

    let mut stages = Vec::new();
    let mut bytes = raw.to_vec();

    if let Some(stage) = compression.stage() {
        bytes = compress(&bytes, compression)?;
        stages.push(stage);
    }

    if encrypt {
        // checked above
        let key = key.ok_or(AppError::MissingKey)?;
        bytes = encrypt_bytes(&bytes, key)?;
        stages.push(TransformStage::Encrypt);
    }

    Ok((bytes, stages))
}

/// Reverses an applied chain, popping stages in reverse order.
pub fn reverse(bytes: &[u8], stages: &[TransformStage], key: Option<&EncryptionKey>) -> Result<Vec<u8>> {
    let mut current = bytes.to_vec();
    for stage in stages.iter().rev() {
        current = match stage {
            TransformStage::Encrypt => {
                let key = key.ok_or(AppError::MissingKey)?;
                decrypt_bytes(&current, key)?
            }
            TransformStage::Gzip => gunzip(&current)?,
            TransformStage::Zstd => unzstd(&current)?,
        };
    }
    Ok(current)
}

/// Decode test of the compression layer. If the outermost stage is
/// encryption, the layer is peeled first when a key is available; without a
/// key only the encrypted shape (nonce + tag minimum) can be checked.
pub fn integrity_test(bytes: &[u8], stages: &[TransformStage], key: Option<&EncryptionKey>) -> Result<bool> {
    let mut current = bytes.to_vec();
    for stage in stages.iter().rev() {
        match stage {
            TransformStage::Encrypt => match key {
                Some(key) => current = decrypt_bytes(&current, key)?,
                None => {
                    // 12-byte nonce plus the 16-byte GCM tag is the floor for
                    // any valid ciphertext, including an empty payload.
                    return Ok(current.len() >= NONCE_SIZE + 16);
                }
            },
            TransformStage::Gzip => {
                return Ok(gunzip(&current).is_ok());
            }
            TransformStage::Zstd => {
                return Ok(unzstd(&current).is_ok());
            }
        }
    }
    // Uncompressed chain: nothing format-level to test.
    Ok(true)
}

fn compress(raw: &[u8], algo: CompressionAlgo) -> Result<Vec<u8>> {
    match algo {
        CompressionAlgo::None => Ok(raw.to_vec()),
        CompressionAlgo::Fast | CompressionAlgo::Balanced => {
            let level = if algo == CompressionAlgo::Fast {
                Compression::fast()
            } else {
                Compression::default()
            };
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(raw).map_err(|e| AppError::Pipeline {
                stage: "compress".to_string(),
                reason: format!("gzip write failed: {}", e),
            })?;
            encoder.finish().map_err(|e| AppError::Pipeline {
                stage: "compress".to_string(),
                reason: format!("gzip finish failed: {}", e),
            })
        }
        CompressionAlgo::MaxRatio => {
            zstd::stream::encode_all(raw, 19).map_err(|e| AppError::Pipeline {
                stage: "compress".to_string(),
                reason: format!("zstd encode failed: {}", e),
            })
        }
    }
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| AppError::Pipeline {
        stage: "decompress".to_string(),
        reason: format!("gzip decode failed: {}", e),
    })?;
    Ok(out)
}

fn unzstd(bytes: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(bytes).map_err(|e| AppError::Pipeline {
        stage: "decompress".to_string(),
        reason: format!("zstd decode failed: {}", e),
    })
}

fn encrypt_bytes(plain: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    let cipher = key.cipher();
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plain).map_err(|e| AppError::Pipeline {
        stage: "encrypt".to_string(),
        reason: format!("AES-256-GCM encryption failed: {}", e),
    })?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_bytes(bytes: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if bytes.len() < NONCE_SIZE {
        return Err(AppError::Pipeline {
            stage: "decrypt".to_string(),
            reason: "Ciphertext shorter than nonce prefix".to_string(),
        });
    }
    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let cipher = key.cipher();
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| AppError::Pipeline {
            stage: "decrypt".to_string(),
            reason: format!("AES-256-GCM decryption failed (wrong key or corrupted artifact): {}", e),
        })
}
