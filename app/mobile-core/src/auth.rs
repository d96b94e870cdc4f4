//! 认证会话模块职责：
//! 1. 维护 LoggedOut / AwaitingVerification / LoggedIn 状态机。
//! 2. 编排邮箱注册、验证码校验、令牌懒过期检查与登出吊销。
//! 3. 状态只经显式操作或懒过期降级变化，外部通过轮询 `state()` 读取。
//!
//! 防重复提交由界面层负责（请求在途时禁用按钮）；本模块只保证并发
//! 调用不会写出残缺的令牌记录（最后写入者胜出）。

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use tracing::{info, warn};
use ya_shared_protocol::{DeviceInfo, RegisterRequest, RegisterResponse, TokenResponse, VerifyRequest};

use crate::{
    error::{CoreError, CoreResult},
    keystore::{KeyStore, key_id},
    tokens::{TokenRecord, TokenStore, unix_now_ms},
    transport::Transport,
};

/// 注册接口路径。
const REGISTER_PATH: &str = "api/v1/auth/register";
/// 验证码校验接口路径。
const VERIFY_PATH: &str = "api/v1/auth/verify";
/// 刷新令牌吊销接口路径。
const REVOKE_PATH: &str = "oauth/revoke";

/// 认证状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthState {
    /// 未登录。
    LoggedOut,
    /// 已发送验证码，等待校验。
    AwaitingVerification {
        /// 注册邮箱。
        email: String,
        /// 注册响应携带的待签名 challenge（可选）。
        challenge: Option<String>,
    },
    /// 已登录。
    LoggedIn {
        /// 当前访问令牌。
        access_token: String,
    },
}

/// 状态名，日志用。
fn state_name(state: &AuthState) -> &'static str {
    match state {
        AuthState::LoggedOut => "logged_out",
        AuthState::AwaitingVerification { .. } => "awaiting_verification",
        AuthState::LoggedIn { .. } => "logged_in",
    }
}

/// 验证码校验参数。
#[derive(Debug, Clone)]
pub struct VerifyCodeParams {
    /// 注册邮箱。
    pub email: String,
    /// 用户输入的验证码。
    pub code: String,
    /// 注册阶段下发的 challenge。
    pub challenge: String,
}

/// 认证会话：注册、验证、令牌与登出的编排者。
pub struct AuthSession {
    transport: Arc<dyn Transport>,
    keys: KeyStore,
    tokens: TokenStore,
    /// 注册请求上报的平台标识。
    platform: String,
    state: Mutex<AuthState>,
    /// 登出代数；迟到的验证响应不得复活已登出的会话。
    generation: AtomicU64,
}

impl AuthSession {
    /// 初始化会话。
    ///
    /// 无论是否已登录都先确保两对密钥存在（首次登录前配对身份就必须可用），
    /// 初始状态由令牌存储决定。
    pub fn initialize(
        transport: Arc<dyn Transport>,
        keys: KeyStore,
        tokens: TokenStore,
        platform: impl Into<String>,
    ) -> CoreResult<Self> {
        let identity = keys.ensure_identity_key_pair()?;
        keys.ensure_pairing_key_pair()?;

        let state = match tokens.load()? {
            Some(record) => AuthState::LoggedIn {
                access_token: record.access_token,
            },
            None => AuthState::LoggedOut,
        };
        info!(
            "auth session ready {} state={}",
            key_id(&identity.public_b64()),
            state_name(&state)
        );

        Ok(Self {
            transport,
            keys,
            tokens,
            platform: platform.into(),
            state: Mutex::new(state),
            generation: AtomicU64::new(0),
        })
    }

    /// 当前认证状态快照。
    pub fn state(&self) -> AuthState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 覆盖状态。
    fn set_state(&self, next: AuthState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// 发送注册验证码。
    ///
    /// 邮箱只做最小语法检查（必须包含 `@`）；上报的公钥取当前持久化
    /// 身份公钥。成功后进入等待校验状态，并把注册响应原样交给调用方。
    pub async fn send_code(&self, email: &str) -> CoreResult<RegisterResponse> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(CoreError::InvalidInput(
                "email must contain '@'".to_string(),
            ));
        }

        let identity = self.keys.ensure_identity_key_pair()?;
        let request = RegisterRequest {
            email: email.to_string(),
            public_key: identity.public_b64(),
            device_info: DeviceInfo {
                platform: self.platform.clone(),
            },
        };
        let body = serde_json::to_value(&request).expect("register request must be serializable");

        let reply = self.transport.post_json(REGISTER_PATH, body, None).await?;
        if !reply.is_success() {
            return Err(CoreError::RegistrationFailed {
                status: reply.status,
                body: reply.body,
            });
        }

        let response: RegisterResponse = serde_json::from_value(reply.json()).unwrap_or_default();
        self.set_state(AuthState::AwaitingVerification {
            email: email.to_string(),
            challenge: response.challenge.clone(),
        });
        info!("registration code sent email={email}");
        Ok(response)
    }

    /// 校验验证码：对 challenge 做身份签名后提交。
    ///
    /// 成功则落盘令牌并进入已登录态；非 2xx 不改变状态。
    /// 若响应返回时会话已经登出（登出代数变化），令牌作废丢弃。
    pub async fn verify_code(&self, params: VerifyCodeParams) -> CoreResult<TokenRecord> {
        if params.code.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "verification code must not be empty".to_string(),
            ));
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let signature = self.keys.sign_with_identity(params.challenge.as_bytes())?;
        let request = VerifyRequest {
            email: params.email.clone(),
            code: params.code.clone(),
            challenge: params.challenge.clone(),
            signature,
        };
        let body = serde_json::to_value(&request).expect("verify request must be serializable");

        let reply = self.transport.post_json(VERIFY_PATH, body, None).await?;
        if !reply.is_success() {
            return Err(CoreError::VerificationFailed {
                status: reply.status,
                body: reply.body,
            });
        }

        let token: TokenResponse =
            serde_json::from_value(reply.json()).map_err(|err| CoreError::VerificationFailed {
                status: reply.status,
                body: format!("malformed token response: {err}"),
            })?;

        if self.generation.load(Ordering::SeqCst) != generation {
            warn!("verification completed after sign-out, dropping stale token response");
            return Err(CoreError::NotAuthenticated);
        }

        let record = self.tokens.save(&token, unix_now_ms())?;
        self.set_state(AuthState::LoggedIn {
            access_token: record.access_token.clone(),
        });
        info!("verification succeeded email={}", params.email);
        Ok(record)
    }

    /// 读取当前访问令牌；每次调用都重新校验有效期。
    ///
    /// 令牌缺失或过期时存储已被清除，已登录态静默降级为未登录——
    /// 这是已登录态唯一的非显式退出路径。
    pub fn get_access_token(&self) -> CoreResult<Option<String>> {
        match self.tokens.load()? {
            Some(record) => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                // 等待校验中的会话不被令牌读取打断。
                if !matches!(*state, AuthState::AwaitingVerification { .. }) {
                    *state = AuthState::LoggedIn {
                        access_token: record.access_token.clone(),
                    };
                }
                Ok(Some(record.access_token))
            }
            None => {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if matches!(*state, AuthState::LoggedIn { .. }) {
                    info!("access token expired, degrading to logged out");
                    *state = AuthState::LoggedOut;
                }
                Ok(None)
            }
        }
    }

    /// 登出：尽力吊销 refresh token（失败仅告警），本地状态无条件清除。
    pub async fn sign_out(&self) -> CoreResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Ok(Some(refresh_token)) = self.tokens.refresh_token() {
            let fields = vec![("token".to_string(), refresh_token)];
            match self.transport.post_form(REVOKE_PATH, &fields, None).await {
                Ok(reply) if !reply.is_success() => {
                    warn!(
                        "refresh token revocation rejected: {} {}",
                        reply.status, reply.body
                    );
                }
                Err(err) => warn!("refresh token revocation failed: {err}"),
                Ok(_) => {}
            }
        }

        self.tokens.clear()?;
        self.set_state(AuthState::LoggedOut);
        info!("signed out");
        Ok(())
    }
}
