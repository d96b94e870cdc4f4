//! yourAssistant 移动核心库职责：
//! 1. 设备身份（Ed25519）与配对（X25519）密钥的生命周期管理。
//! 2. 邮箱注册 → 验证码校验 → 令牌签发/过期/登出 的认证状态机。
//! 3. 扫码配对协议：扫码、信封解密、签名批准。
//!
//! 聊天、媒体等界面层不直接接触密钥与令牌，只通过 `MobileCore`
//! 暴露的会话接口（取令牌 / 登出 / 扫码 / 批准）消费本库。

pub mod auth;
pub mod config;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod pairing;
pub mod runtime;
pub mod storage;
pub mod tokens;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthSession, AuthState, VerifyCodeParams};
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use keystore::{IdentityKeyPair, KeyStore, PairingKeyPair, key_id, verify};
pub use logging::{LogRuntime, init as init_logging};
pub use pairing::{PairingSession, PairingStage, PairingState, ScanOutcome};
pub use runtime::MobileCore;
pub use storage::{FileKvStore, KvStore, MemoryKvStore};
pub use tokens::{TokenRecord, TokenStore};
pub use transport::{HttpReply, HttpTransport, Transport};
