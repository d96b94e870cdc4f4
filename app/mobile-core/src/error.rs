//! 核心错误类型：认证与配对全链路共用的错误分类。
//!
//! 携带 HTTP 状态码的变体保留服务端响应体原文，界面层按原样弹窗展示；
//! 这些失败都不做自动重试。

use thiserror::Error;

/// 认证/配对核心统一错误。
#[derive(Debug, Error)]
pub enum CoreError {
    /// 本地输入校验失败；未发起任何网络请求。
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// 当前无有效访问令牌；调用方一般应跳转登录。
    #[error("not authenticated")]
    NotAuthenticated,
    /// 注册接口返回非 2xx。
    #[error("registration failed: {status} {body}")]
    RegistrationFailed { status: u16, body: String },
    /// 验证码校验接口返回非 2xx。
    #[error("verification failed: {status} {body}")]
    VerificationFailed { status: u16, body: String },
    /// 扫码接口返回非 2xx。
    #[error("scan failed: {status} {body}")]
    ScanFailed { status: u16, body: String },
    /// 批准接口返回非 2xx。
    #[error("approve failed: {status} {body}")]
    ApproveFailed { status: u16, body: String },
    /// 配对信封认证解密失败；本次尝试作废，不信任任何部分输出。
    #[error("pairing payload decryption failed")]
    DecryptionFailed,
    /// 密钥材料无效（长度/编码/公私钥不匹配）。
    #[error("key material invalid: {0}")]
    InvalidKey(String),
    /// 持久化存储读写失败；没有可靠的密钥与令牌存储时认证与配对无法继续。
    #[error("storage failure: {0}")]
    Storage(String),
    /// 网络层请求失败（未收到 HTTP 响应）。
    #[error("network request failed: {0}")]
    Network(String),
}

/// 核心统一 Result 别名。
pub type CoreResult<T> = Result<T, CoreError>;
