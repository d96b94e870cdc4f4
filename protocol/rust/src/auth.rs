//! 注册 / 验证码校验 / 令牌签发协议类型。

use serde::{Deserialize, Serialize};

/// 注册请求附带的设备信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// 设备平台标识（ios/android/unknown 等）。
    pub platform: String,
}

/// 邮箱注册请求（`POST /api/v1/auth/register`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// 注册邮箱。
    pub email: String,
    /// 设备 Ed25519 身份公钥（base64）。
    pub public_key: String,
    /// 设备信息。
    pub device_info: DeviceInfo,
}

/// 注册响应；字段均可缺省，未知字段忽略。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// 服务端下发的待签名 challenge（可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    /// 注册流水 ID（可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
}

/// 验证码校验请求（`POST /api/v1/auth/verify`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// 注册邮箱。
    pub email: String,
    /// 用户输入的验证码。
    pub code: String,
    /// 注册阶段下发的 challenge。
    pub challenge: String,
    /// 身份私钥对 challenge 的 Ed25519 签名（base64）。
    pub signature: String,
}

/// 令牌响应（`POST /api/v1/auth/verify` 成功时返回）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// 访问令牌。
    pub access_token: String,
    /// 令牌类型（通常为 Bearer，可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// 访问令牌有效期（秒）。
    pub expires_in: u64,
    /// 刷新令牌（可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// 授权范围（可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// OIDC id token（可选）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}
