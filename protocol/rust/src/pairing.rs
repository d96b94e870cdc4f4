//! 二维码配对协议类型与解析。
//!
//! 线上存在两代二维码与扫码响应格式，字段名并不统一；
//! 所有被接受的别名集中在下方常量表，解析逻辑只认表内字段。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 二维码负载中配对会话 ID 的候选字段名。
const SESSION_ID_ALIASES: &[&str] = &["session_id", "sessionId"];
/// 服务端 X25519 公钥的候选字段名（二维码负载与扫码信封共用）。
const SERVER_KEY_ALIASES: &[&str] = &["public_key", "server_public_key", "serverPublicKey"];
/// 扫码信封中密文的候选字段名。
const CIPHER_ALIASES: &[&str] = &["cipher", "ciphertext"];
/// 扫码信封中 nonce 的候选字段名。
const NONCE_ALIASES: &[&str] = &["nonce"];
/// 明文负载中 user code 的候选字段名。
const USER_CODE_ALIASES: &[&str] = &["user_code", "userCode"];
/// 明文负载中 challenge 的候选字段名。
const CHALLENGE_ALIASES: &[&str] = &["challenge"];

/// 按别名表从 JSON 对象取第一个非空字符串字段。
fn string_field(value: &Value, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(ToString::to_string)
    })
}

/// 解析后的二维码配对负载。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequest {
    /// 配对会话 ID。
    pub session_id: String,
    /// 服务端 X25519 公钥（base64，可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_public_key: Option<String>,
}

impl PairingRequest {
    /// 解析扫描到的二维码文本。
    ///
    /// 优先按 JSON 对象解析；JSON 解析失败或缺少 session id 时，
    /// 整串文本回退为裸 session id（旧版桌面端只展示纯文本会话号）。
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(value) = serde_json::from_str::<Value>(trimmed)
            && value.is_object()
            && let Some(session_id) = string_field(&value, SESSION_ID_ALIASES)
        {
            return Self {
                session_id,
                server_public_key: string_field(&value, SERVER_KEY_ALIASES),
            };
        }
        Self {
            session_id: trimmed.to_string(),
            server_public_key: None,
        }
    }
}

/// 扫码请求（`POST /api/v1/device/qr/scan`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// 二维码中的配对会话 ID。
    pub session_id: String,
    /// 本机 X25519 配对公钥（base64），供服务端加密回包。
    pub mobile_public_key: String,
}

/// 扫码响应中的明文负载。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlainPayload {
    /// 需要用户确认的配对码（可选）。
    pub user_code: Option<String>,
    /// 待签名 challenge（可选）。
    pub challenge: Option<String>,
}

impl PlainPayload {
    /// 从 JSON 对象按别名表提取明文负载字段。
    pub fn parse(value: &Value) -> Self {
        Self {
            user_code: string_field(value, USER_CODE_ALIASES),
            challenge: string_field(value, CHALLENGE_ALIASES),
        }
    }
}

/// 扫码响应的两种形态：加密信封优先，明文负载兜底。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanResponse {
    /// 端到端加密信封，需用本机配对私钥解开。
    Encrypted {
        /// 密文（base64）。
        cipher: String,
        /// 24 字节 nonce（base64）。
        nonce: String,
        /// 服务端 X25519 公钥（base64）。
        server_public_key: String,
    },
    /// 明文负载；旧版协议直接经 HTTPS 下发。
    Plain(PlainPayload),
}

impl ScanResponse {
    /// 解析扫码响应：信封三要素齐备时判定为加密形态，否则按明文负载处理。
    /// 两种形态都不匹配时得到空明文负载（配对在扫码后即完成的场景）。
    pub fn parse(value: &Value) -> Self {
        if let (Some(cipher), Some(nonce), Some(server_public_key)) = (
            string_field(value, CIPHER_ALIASES),
            string_field(value, NONCE_ALIASES),
            string_field(value, SERVER_KEY_ALIASES),
        ) {
            return Self::Encrypted {
                cipher,
                nonce,
                server_public_key,
            };
        }
        Self::Plain(PlainPayload::parse(value))
    }
}

/// 配对批准请求（`POST /api/v1/device/approve/{user_code}`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveRequest {
    /// 身份私钥对 challenge（缺省时对 user code）的签名（base64）。
    pub mobile_signature: String,
}
