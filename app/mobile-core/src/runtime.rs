//! 运行时装配模块职责：
//! 1. 按配置把存储、密钥、令牌、传输与会话装配成一个核心实例。
//! 2. 作为界面层的唯一入口：聊天/媒体等外围只消费这里暴露的会话接口。

use std::sync::Arc;

use tracing::info;

use crate::{
    auth::AuthSession,
    config::CoreConfig,
    error::CoreResult,
    keystore::KeyStore,
    pairing::PairingSession,
    storage::{FileKvStore, KvStore},
    tokens::TokenStore,
    transport::{HttpTransport, Transport},
};

/// 移动核心实例。
pub struct MobileCore {
    auth: Arc<AuthSession>,
    pairing: PairingSession,
}

impl MobileCore {
    /// 以默认文件存储与 HTTP 传输装配核心。
    pub fn bootstrap(config: CoreConfig) -> CoreResult<Self> {
        let store: Arc<dyn KvStore> = Arc::new(FileKvStore::open(config.state_path.clone()));
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new(&config.base_url, config.http_timeout)?);
        Self::assemble(config, store, transport)
    }

    /// 以注入的存储与传输装配核心（桥接层与测试使用）。
    pub fn assemble(
        config: CoreConfig,
        store: Arc<dyn KvStore>,
        transport: Arc<dyn Transport>,
    ) -> CoreResult<Self> {
        let keys = KeyStore::new(Arc::clone(&store));
        let tokens = TokenStore::new(Arc::clone(&store));
        let auth = Arc::new(AuthSession::initialize(
            Arc::clone(&transport),
            keys.clone(),
            tokens,
            config.platform.clone(),
        )?);
        let pairing = PairingSession::new(transport, keys, Arc::clone(&auth), config.scan_debounce);
        info!("mobile core ready base_url={}", config.base_url);
        Ok(Self { auth, pairing })
    }

    /// 认证会话（界面层取令牌、登出都经由这里）。
    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// 配对会话（扫码界面把原始文本交给这里）。
    pub fn pairing(&self) -> &PairingSession {
        &self.pairing
    }
}
