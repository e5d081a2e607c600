use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

/// Errors that can occur while encrypting or decrypting provider secrets
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(&'static str),
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Symmetric encryption of provider signing secrets.
///
/// The AES-256 key is the SHA-256 digest of the registry master secret, so
/// rotating the master secret invalidates every stored provider secret.
/// Ciphertexts are stored as `"{iv_hex}:{ct_hex}"` with a fresh random IV
/// per encryption.
#[derive(Clone)]
pub struct CryptoService {
    key: [u8; 32],
}

impl CryptoService {
    pub fn new(master_secret: &str) -> Self {
        let digest = Sha256::digest(master_secret.as_bytes());
        Self { key: digest.into() }
    }

    /// Encrypt a provider secret for storage.
    pub fn encrypt_secret(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(&self.key.into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    /// Decrypt a stored `"{iv_hex}:{ct_hex}"` value back to the secret.
    pub fn decrypt_secret(&self, stored: &str) -> Result<String, CryptoError> {
        let (iv_hex, ct_hex) = stored
            .split_once(':')
            .ok_or(CryptoError::MalformedCiphertext("missing iv separator"))?;

        let iv = hex::decode(iv_hex)
            .map_err(|_| CryptoError::MalformedCiphertext("iv is not hex"))?;
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CryptoError::MalformedCiphertext("iv has wrong length"))?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|_| CryptoError::MalformedCiphertext("ciphertext is not hex"))?;
        let cipher = Aes256CbcDec::new(&self.key.into(), &iv.into());
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptoService([key redacted])")
    }
}
