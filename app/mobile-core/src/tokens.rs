//! 令牌存储模块职责：
//! 1. 作为“本机是否持有可用访问令牌”的唯一事实来源。
//! 2. 读取时自愈：残缺、过期或无法解析的记录直接清除，保证后续读取一致。
//! 3. 保存时一次落盘，不允许残留上一会话的 refresh token。

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use ya_shared_protocol::TokenResponse;

use crate::{error::CoreResult, storage::KvStore};

/// 访问令牌存储键。
pub(crate) const ACCESS_TOKEN_KEY: &str = "access_token";
/// 刷新令牌存储键。
pub(crate) const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// 过期时刻存储键（epoch 毫秒字符串）。
pub(crate) const EXPIRES_AT_KEY: &str = "expires_at";

/// 当前 epoch 毫秒。
pub(crate) fn unix_now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// 持久化令牌记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// 访问令牌。
    pub access_token: String,
    /// 刷新令牌（可选）。
    pub refresh_token: Option<String>,
    /// 过期时刻（epoch 毫秒）。
    pub expires_at_ms: u64,
}

/// 令牌存取服务。
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KvStore>,
}

impl TokenStore {
    /// 构造令牌服务。
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// 保存令牌响应。
    ///
    /// 过期时刻取 `now + expires_in`；响应未携带 refresh token 时
    /// 同一批写入里显式删除历史值。
    pub fn save(&self, token: &TokenResponse, now_ms: u64) -> CoreResult<TokenRecord> {
        let expires_at_ms = now_ms.saturating_add(token.expires_in.saturating_mul(1000));
        self.store.apply(&[
            (ACCESS_TOKEN_KEY, Some(token.access_token.clone())),
            (EXPIRES_AT_KEY, Some(expires_at_ms.to_string())),
            (REFRESH_TOKEN_KEY, token.refresh_token.clone()),
        ])?;
        Ok(TokenRecord {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at_ms,
        })
    }

    /// 读取令牌记录；字段残缺或已过期时清除存储并返回 None。
    pub fn load(&self) -> CoreResult<Option<TokenRecord>> {
        self.load_at(unix_now_ms())
    }

    /// 以显式时刻读取令牌记录，便于过期边界判定。
    pub(crate) fn load_at(&self, now_ms: u64) -> CoreResult<Option<TokenRecord>> {
        let access_token = self.store.get(ACCESS_TOKEN_KEY)?;
        let expires_raw = self.store.get(EXPIRES_AT_KEY)?;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY)?;

        let (Some(access_token), Some(expires_raw)) = (access_token, expires_raw) else {
            self.clear()?;
            return Ok(None);
        };
        let Ok(expires_at_ms) = expires_raw.trim().parse::<u64>() else {
            debug!("token record has malformed expiry, clearing");
            self.clear()?;
            return Ok(None);
        };
        if expires_at_ms <= now_ms {
            debug!("token record expired, clearing");
            self.clear()?;
            return Ok(None);
        }

        Ok(Some(TokenRecord {
            access_token,
            refresh_token,
            expires_at_ms,
        }))
    }

    /// 直接读取当前 refresh token（不触发自愈），供登出吊销使用。
    pub(crate) fn refresh_token(&self) -> CoreResult<Option<String>> {
        self.store.get(REFRESH_TOKEN_KEY)
    }

    /// 清除全部令牌字段；重复调用无副作用。
    pub fn clear(&self) -> CoreResult<()> {
        self.store.apply(&[
            (ACCESS_TOKEN_KEY, None),
            (REFRESH_TOKEN_KEY, None),
            (EXPIRES_AT_KEY, None),
        ])
    }
}
