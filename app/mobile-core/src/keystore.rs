//! 密钥管理模块职责：
//! 1. 保证设备有且仅有一对 Ed25519 身份密钥与一对 X25519 配对密钥，缺失时生成。
//! 2. 提供确定性的身份签名与纯函数验签。
//! 3. 解开服务端按本机配对公钥加密的配对信封。
//!
//! 两对密钥互不相关：身份密钥代表设备长期身份，装机后不轮换；
//! 配对密钥只服务于配对信封解密，丢失后重新生成即可。

use std::{fmt::Write as _, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{
    error::{CoreError, CoreResult},
    storage::KvStore,
};

/// 身份私钥存储键。
pub(crate) const IDENTITY_PRIVATE_KEY: &str = "ed25519_private_key";
/// 身份公钥存储键。
pub(crate) const IDENTITY_PUBLIC_KEY: &str = "ed25519_public_key";
/// 配对私钥存储键。
pub(crate) const PAIRING_SECRET_KEY: &str = "x25519_secret";
/// 配对公钥存储键。
pub(crate) const PAIRING_PUBLIC_KEY: &str = "x25519_public";
/// 配对信封密钥派生的域分隔串。
const PAIRING_BOX_INFO: &[u8] = b"ya-pairing-box-v1";
/// 配对信封 nonce 长度（XChaCha20-Poly1305）。
const PAIRING_NONCE_LEN: usize = 24;

/// 解码 base64 字段；失败归为密钥材料错误。
fn decode_b64(what: &str, raw: &str) -> CoreResult<Vec<u8>> {
    STANDARD
        .decode(raw.trim())
        .map_err(|err| CoreError::InvalidKey(format!("{what} is not valid base64: {err}")))
}

/// 公钥短指纹（SHA-256 前 8 字节 hex），用于日志关联。
pub fn key_id(public_key_b64: &str) -> String {
    let digest = Sha256::digest(public_key_b64.as_bytes());
    let mut out = String::with_capacity(20);
    out.push_str("kid_");
    for byte in &digest[..8] {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// 校验 Ed25519 签名；纯函数，任何解码失败都视为验签失败。
pub fn verify(message: &[u8], signature_b64: &str, public_key_b64: &str) -> bool {
    let Ok(public_raw) = STANDARD.decode(public_key_b64.trim()) else {
        return false;
    };
    let Ok(public_bytes) = <[u8; 32]>::try_from(public_raw.as_slice()) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&public_bytes) else {
        return false;
    };
    let Ok(signature_raw) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(signature_raw.as_slice()) else {
        return false;
    };
    verifying
        .verify(message, &Signature::from_bytes(&signature_bytes))
        .is_ok()
}

/// Ed25519 身份密钥对；私钥种子析构时清零。
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// 公钥原始字节。
    #[zeroize(skip)]
    public: [u8; 32],
    /// 私钥种子。
    seed: [u8; 32],
}

impl IdentityKeyPair {
    /// 生成新的身份密钥对。
    fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self {
            public: signing.verifying_key().to_bytes(),
            seed: signing.to_bytes(),
        }
    }

    /// 从存储还原身份密钥对。
    ///
    /// 私钥接受 32 字节种子与 64 字节（种子‖公钥）两种历史编码；
    /// 存储的公钥必须与私钥推导结果一致，否则视为记录损坏。
    fn from_stored(secret_b64: &str, public_b64: &str) -> CoreResult<Self> {
        let secret_raw = decode_b64("identity private key", secret_b64)?;
        if secret_raw.len() != 32 && secret_raw.len() != 64 {
            return Err(CoreError::InvalidKey(format!(
                "identity private key must be 32 or 64 bytes, got {}",
                secret_raw.len()
            )));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&secret_raw[..32]);
        let signing = SigningKey::from_bytes(&seed);
        let derived = signing.verifying_key().to_bytes();

        let public_raw = decode_b64("identity public key", public_b64)?;
        if public_raw.as_slice() != derived.as_slice() {
            return Err(CoreError::InvalidKey(
                "identity public key does not match private key".to_string(),
            ));
        }
        Ok(Self {
            public: derived,
            seed,
        })
    }

    /// 公钥（base64）。
    pub fn public_b64(&self) -> String {
        STANDARD.encode(self.public)
    }

    /// 公钥原始字节。
    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public
    }

    /// 对消息做确定性 Ed25519 签名，返回 base64。
    pub fn sign(&self, message: &[u8]) -> String {
        let signing = SigningKey::from_bytes(&self.seed);
        STANDARD.encode(signing.sign(message).to_bytes())
    }

    /// 私钥（base64），仅供本模块落盘。
    fn secret_b64(&self) -> String {
        STANDARD.encode(self.seed)
    }
}

/// X25519 配对密钥对；只用于解开发给本机的配对信封。
pub struct PairingKeyPair {
    /// 配对公钥。
    public: X25519PublicKey,
    /// 配对私钥。
    secret: StaticSecret,
}

impl PairingKeyPair {
    /// 生成新的配对密钥对。
    fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            public: X25519PublicKey::from(&secret),
            secret,
        }
    }

    /// 从存储还原配对密钥对；公钥与私钥推导结果不一致时视为记录损坏。
    fn from_stored(secret_b64: &str, public_b64: &str) -> CoreResult<Self> {
        let secret_raw = decode_b64("pairing secret key", secret_b64)?;
        let secret_bytes: [u8; 32] = secret_raw.as_slice().try_into().map_err(|_| {
            CoreError::InvalidKey(format!(
                "pairing secret key must be 32 bytes, got {}",
                secret_raw.len()
            ))
        })?;
        let secret = StaticSecret::from(secret_bytes);
        let derived = X25519PublicKey::from(&secret);

        let public_raw = decode_b64("pairing public key", public_b64)?;
        if public_raw.as_slice() != derived.as_bytes().as_slice() {
            return Err(CoreError::InvalidKey(
                "pairing public key does not match secret key".to_string(),
            ));
        }
        Ok(Self {
            public: derived,
            secret,
        })
    }

    /// 公钥（base64）。
    pub fn public_b64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// 解开服务端加密的配对信封。
    ///
    /// X25519 共享密钥经 HKDF-SHA256 派生对称密钥，再按信封 nonce 做
    /// XChaCha20-Poly1305 认证解密；信封格式或认证失败都归为解密失败，
    /// 不产生任何部分输出。
    pub fn open_envelope(
        &self,
        server_public_b64: &str,
        nonce_b64: &str,
        cipher_b64: &str,
    ) -> CoreResult<Vec<u8>> {
        let server_raw = STANDARD
            .decode(server_public_b64.trim())
            .map_err(|_| CoreError::DecryptionFailed)?;
        let server_bytes: [u8; 32] = server_raw
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::DecryptionFailed)?;
        let nonce_raw = STANDARD
            .decode(nonce_b64.trim())
            .map_err(|_| CoreError::DecryptionFailed)?;
        if nonce_raw.len() != PAIRING_NONCE_LEN {
            return Err(CoreError::DecryptionFailed);
        }
        let cipher_raw = STANDARD
            .decode(cipher_b64.trim())
            .map_err(|_| CoreError::DecryptionFailed)?;

        let shared = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(server_bytes));
        let key = derive_box_key(shared.as_bytes())?;

        let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
        aead.decrypt(XNonce::from_slice(&nonce_raw), cipher_raw.as_slice())
            .map_err(|_| CoreError::DecryptionFailed)
    }

    /// 私钥（base64），仅供本模块落盘。
    fn secret_b64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }
}

/// 从 X25519 共享密钥派生配对信封对称密钥。
pub(crate) fn derive_box_key(shared: &[u8]) -> CoreResult<[u8; 32]> {
    let mut key = [0u8; 32];
    Hkdf::<Sha256>::new(None, shared)
        .expand(PAIRING_BOX_INFO, &mut key)
        .map_err(|_| CoreError::DecryptionFailed)?;
    Ok(key)
}

/// 密钥存取服务；所有持久化经由注入的 KvStore。
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn KvStore>,
}

impl KeyStore {
    /// 构造密钥服务。
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// 读取或生成身份密钥对。
    ///
    /// 两半密钥一次落盘；损坏或残缺的记录按缺失处理并重新生成，
    /// 调用方需容忍因此发生的密钥更换。
    pub fn ensure_identity_key_pair(&self) -> CoreResult<IdentityKeyPair> {
        let secret = self.store.get(IDENTITY_PRIVATE_KEY)?;
        let public = self.store.get(IDENTITY_PUBLIC_KEY)?;
        if let (Some(secret), Some(public)) = (secret, public) {
            match IdentityKeyPair::from_stored(&secret, &public) {
                Ok(pair) => return Ok(pair),
                Err(err) => warn!("stored identity key pair unusable, regenerating: {err}"),
            }
        }

        let pair = IdentityKeyPair::generate();
        self.store.apply(&[
            (IDENTITY_PRIVATE_KEY, Some(pair.secret_b64())),
            (IDENTITY_PUBLIC_KEY, Some(pair.public_b64())),
        ])?;
        info!("generated identity key pair {}", key_id(&pair.public_b64()));
        Ok(pair)
    }

    /// 读取或生成 X25519 配对密钥对；与身份密钥使用独立存储键。
    pub fn ensure_pairing_key_pair(&self) -> CoreResult<PairingKeyPair> {
        let secret = self.store.get(PAIRING_SECRET_KEY)?;
        let public = self.store.get(PAIRING_PUBLIC_KEY)?;
        if let (Some(secret), Some(public)) = (secret, public) {
            match PairingKeyPair::from_stored(&secret, &public) {
                Ok(pair) => return Ok(pair),
                Err(err) => warn!("stored pairing key pair unusable, regenerating: {err}"),
            }
        }

        let pair = PairingKeyPair::generate();
        self.store.apply(&[
            (PAIRING_SECRET_KEY, Some(pair.secret_b64())),
            (PAIRING_PUBLIC_KEY, Some(pair.public_b64())),
        ])?;
        info!("generated pairing key pair {}", key_id(&pair.public_b64()));
        Ok(pair)
    }

    /// 加载身份密钥并对消息签名（base64）。
    ///
    /// 每次签名都重读存储，确保以持久化记录为唯一事实来源。
    pub fn sign_with_identity(&self, message: &[u8]) -> CoreResult<String> {
        Ok(self.ensure_identity_key_pair()?.sign(message))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::{Engine as _, engine::general_purpose::STANDARD};

    use super::{
        IDENTITY_PRIVATE_KEY, IDENTITY_PUBLIC_KEY, KeyStore, PAIRING_PUBLIC_KEY, key_id, verify,
    };
    use crate::{
        error::CoreError,
        storage::{KvStore, MemoryKvStore},
        testing::seal_envelope,
    };

    fn key_store() -> (KeyStore, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        (KeyStore::new(store.clone()), store)
    }

    #[test]
    fn fresh_install_generates_and_persists_identity_pair() {
        let (keys, store) = key_store();

        let first = keys.ensure_identity_key_pair().expect("generate");
        assert!(store.get(IDENTITY_PRIVATE_KEY).expect("get").is_some());
        assert_eq!(
            store.get(IDENTITY_PUBLIC_KEY).expect("get").as_deref(),
            Some(first.public_b64().as_str())
        );

        let second = keys.ensure_identity_key_pair().expect("reload");
        assert_eq!(first.public_b64(), second.public_b64());
        assert_eq!(first.sign(b"same message"), second.sign(b"same message"));
    }

    #[test]
    fn identity_signing_is_deterministic() {
        let (keys, _store) = key_store();
        let pair = keys.ensure_identity_key_pair().expect("generate");
        assert_eq!(pair.sign(b"challenge"), pair.sign(b"challenge"));
    }

    #[test]
    fn sign_then_verify_roundtrips() {
        let (keys, _store) = key_store();
        let pair = keys.ensure_identity_key_pair().expect("generate");
        let signature = pair.sign(b"arbitrary message");
        assert!(verify(b"arbitrary message", &signature, &pair.public_b64()));
        assert!(!verify(b"another message", &signature, &pair.public_b64()));
        assert!(!verify(b"arbitrary message", "not base64!!", &pair.public_b64()));
    }

    #[test]
    fn stored_64_byte_secret_is_accepted() {
        let (keys, store) = key_store();
        let pair = keys.ensure_identity_key_pair().expect("generate");

        // 旧客户端存储的是 种子‖公钥 共 64 字节。
        let seed_raw = STANDARD
            .decode(store.get(IDENTITY_PRIVATE_KEY).expect("get").expect("seed"))
            .expect("decode seed");
        let mut legacy = seed_raw.clone();
        legacy.extend_from_slice(pair.public_bytes());
        store
            .put(IDENTITY_PRIVATE_KEY, &STANDARD.encode(&legacy))
            .expect("store legacy encoding");

        let reloaded = keys.ensure_identity_key_pair().expect("reload legacy");
        assert_eq!(reloaded.public_b64(), pair.public_b64());
        assert_eq!(reloaded.sign(b"m"), pair.sign(b"m"));
    }

    #[test]
    fn mismatched_identity_halves_are_regenerated() {
        let (keys, store) = key_store();
        let original = keys.ensure_identity_key_pair().expect("generate");

        store
            .put(IDENTITY_PUBLIC_KEY, &STANDARD.encode([7u8; 32]))
            .expect("corrupt public half");

        let regenerated = keys.ensure_identity_key_pair().expect("regenerate");
        assert_ne!(regenerated.public_b64(), STANDARD.encode([7u8; 32]));
        assert_ne!(regenerated.public_b64(), original.public_b64());
        // 重新生成后两半重新一致。
        assert_eq!(
            store.get(IDENTITY_PUBLIC_KEY).expect("get").as_deref(),
            Some(regenerated.public_b64().as_str())
        );
    }

    #[test]
    fn pairing_pair_is_idempotent_and_independent() {
        let (keys, store) = key_store();
        let identity = keys.ensure_identity_key_pair().expect("identity");
        let first = keys.ensure_pairing_key_pair().expect("pairing");
        let second = keys.ensure_pairing_key_pair().expect("pairing again");

        assert_eq!(first.public_b64(), second.public_b64());
        assert_ne!(first.public_b64(), identity.public_b64());
        assert!(store.get(PAIRING_PUBLIC_KEY).expect("get").is_some());
    }

    #[test]
    fn envelope_roundtrips_through_box() {
        let (keys, _store) = key_store();
        let pairing = keys.ensure_pairing_key_pair().expect("pairing");

        let plaintext = br#"{"user_code":"777888","challenge":"ch-1"}"#;
        let (cipher, nonce, server_public) = seal_envelope(&pairing.public_b64(), plaintext);

        let opened = pairing
            .open_envelope(&server_public, &nonce, &cipher)
            .expect("open envelope");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_envelope_fails_closed() {
        let (keys, _store) = key_store();
        let pairing = keys.ensure_pairing_key_pair().expect("pairing");

        let (cipher, nonce, server_public) = seal_envelope(&pairing.public_b64(), b"payload");
        let mut tampered = STANDARD.decode(&cipher).expect("decode cipher");
        tampered[0] ^= 0x01;
        let tampered_b64 = STANDARD.encode(&tampered);

        let err = pairing
            .open_envelope(&server_public, &nonce, &tampered_b64)
            .expect_err("tampered ciphertext must not decrypt");
        assert!(matches!(err, CoreError::DecryptionFailed));
    }

    #[test]
    fn key_id_is_stable_and_prefixed() {
        let id = key_id("AAAA");
        assert!(id.starts_with("kid_"));
        assert_eq!(id, key_id("AAAA"));
        assert_ne!(id, key_id("BBBB"));
    }
}
