//! 配对会话模块职责：
//! 1. 解析扫码文本并驱动 scan → approve 两步配对协议。
//! 2. 维护 Idle/Scanning/AwaitingApproval/Approving/Paired/Failed 状态机。
//! 3. 去抖重复扫码；任何失败都终止本次尝试，等待用户重新扫码。
//!
//! 配对是安全敏感操作：失败一律不自动重试，approve 只会在对应的
//! scan 完成之后发出，绝不预先发起。

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use ya_shared_protocol::{ApproveRequest, PairingRequest, PlainPayload, ScanRequest, ScanResponse};

use crate::{
    auth::AuthSession,
    error::{CoreError, CoreResult},
    keystore::KeyStore,
    transport::Transport,
};

/// 扫码接口路径。
const SCAN_PATH: &str = "api/v1/device/qr/scan";
/// 批准接口路径前缀；user code 作为路径末段。
const APPROVE_PATH_PREFIX: &str = "api/v1/device/approve";

/// 配对失败发生的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PairingStage {
    /// 扫码请求阶段（含鉴权与密钥准备）。
    Scan,
    /// 信封解密阶段。
    Decrypt,
    /// 批准阶段。
    Approve,
}

/// 配对状态机。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PairingState {
    /// 空闲，可接受新扫码。
    Idle,
    /// 扫码请求在途。
    Scanning,
    /// 等待用户确认批准。
    AwaitingApproval {
        /// 需用户确认的配对码。
        user_code: String,
        /// 待签名 challenge（可选）。
        challenge: Option<String>,
    },
    /// 批准请求在途。
    Approving,
    /// 配对完成。
    Paired,
    /// 配对失败；detail 为面向用户的错误描述。
    Failed {
        /// 失败阶段。
        stage: PairingStage,
        /// 错误描述。
        detail: String,
    },
}

/// 状态名，日志与错误提示用。
fn state_name(state: &PairingState) -> &'static str {
    match state {
        PairingState::Idle => "idle",
        PairingState::Scanning => "scanning",
        PairingState::AwaitingApproval { .. } => "awaiting_approval",
        PairingState::Approving => "approving",
        PairingState::Paired => "paired",
        PairingState::Failed { .. } => "failed",
    }
}

/// 一次扫码的综合结果，供界面逐阶段展示。
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    /// 解析后的二维码负载。
    pub request: PairingRequest,
    /// 扫码接口原始响应。
    pub scan: Value,
    /// 信封解密出的明文负载（加密形态才有）。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrypted: Option<Value>,
    /// 待批准的 user code；存在时需用户确认后调用 `approve`。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,
    /// 待签名 challenge。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

/// 配对会话。
pub struct PairingSession {
    transport: Arc<dyn Transport>,
    keys: KeyStore,
    /// 访问令牌来源。
    auth: Arc<AuthSession>,
    state: Mutex<PairingState>,
    /// 最近一次受理的扫码文本与时刻，用于重复扫码去抖。
    last_scan: Mutex<Option<(String, Instant)>>,
    /// 去抖窗口。
    debounce: Duration,
}

impl PairingSession {
    /// 构造配对会话。
    pub fn new(
        transport: Arc<dyn Transport>,
        keys: KeyStore,
        auth: Arc<AuthSession>,
        debounce: Duration,
    ) -> Self {
        Self {
            transport,
            keys,
            auth,
            state: Mutex::new(PairingState::Idle),
            last_scan: Mutex::new(None),
            debounce,
        }
    }

    /// 当前配对状态快照。
    pub fn state(&self) -> PairingState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 回到空闲态并清除去抖记录（界面重新聚焦时调用，保证新扫码从头开始）。
    pub fn reset(&self) {
        self.set_state(PairingState::Idle);
        *self
            .last_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// 处理一次扫码文本。
    ///
    /// 请求在途或去抖窗口内的相同文本直接忽略（返回 None，不产生网络调用）。
    pub async fn scan(&self, text: &str) -> CoreResult<Option<ScanOutcome>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidInput("scanned text is empty".to_string()));
        }
        if !self.begin_scan(trimmed) {
            return Ok(None);
        }
        self.run_scan(trimmed).await.map(Some)
    }

    /// 判定本次扫码是否受理：在途请求或窗口内的重复文本直接忽略。
    fn begin_scan(&self, text: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, PairingState::Scanning | PairingState::Approving) {
            return false;
        }
        let mut last = self
            .last_scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((prev_text, at)) = last.as_ref()
            && prev_text == text
            && at.elapsed() < self.debounce
        {
            return false;
        }
        *last = Some((text.to_string(), Instant::now()));
        *state = PairingState::Scanning;
        true
    }

    /// 扫码主流程：鉴权 → 扫码请求 → 可选信封解密 → 决定是否需要批准。
    async fn run_scan(&self, text: &str) -> CoreResult<ScanOutcome> {
        let request = PairingRequest::parse(text);

        let bearer = match self.auth.get_access_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(self.fail(PairingStage::Scan, CoreError::NotAuthenticated)),
            Err(err) => return Err(self.fail(PairingStage::Scan, err)),
        };
        let pairing = match self.keys.ensure_pairing_key_pair() {
            Ok(pair) => pair,
            Err(err) => return Err(self.fail(PairingStage::Scan, err)),
        };

        let scan_request = ScanRequest {
            session_id: request.session_id.clone(),
            mobile_public_key: pairing.public_b64(),
        };
        let body = serde_json::to_value(&scan_request).expect("scan request must be serializable");
        let reply = match self.transport.post_json(SCAN_PATH, body, Some(&bearer)).await {
            Ok(reply) => reply,
            Err(err) => return Err(self.fail(PairingStage::Scan, err)),
        };
        if !reply.is_success() {
            return Err(self.fail(
                PairingStage::Scan,
                CoreError::ScanFailed {
                    status: reply.status,
                    body: reply.body,
                },
            ));
        }

        let scan_payload = reply.json();
        let (decrypted, payload) = match ScanResponse::parse(&scan_payload) {
            ScanResponse::Encrypted {
                cipher,
                nonce,
                server_public_key,
            } => {
                let plaintext = match pairing.open_envelope(&server_public_key, &nonce, &cipher) {
                    Ok(bytes) => bytes,
                    Err(err) => return Err(self.fail(PairingStage::Decrypt, err)),
                };
                let value: Value = serde_json::from_slice(&plaintext)
                    .unwrap_or_else(|_| Value::Object(Default::default()));
                let payload = PlainPayload::parse(&value);
                (Some(value), payload)
            }
            ScanResponse::Plain(payload) => (None, payload),
        };

        let outcome = ScanOutcome {
            request,
            scan: scan_payload,
            decrypted,
            user_code: payload.user_code.clone(),
            challenge: payload.challenge.clone(),
        };

        match payload.user_code {
            Some(user_code) => {
                info!("pairing awaits approval user_code={user_code}");
                self.set_state(PairingState::AwaitingApproval {
                    user_code,
                    challenge: payload.challenge,
                });
            }
            None => {
                info!(
                    "pairing completed at scan step session_id={}",
                    outcome.request.session_id
                );
                self.set_state(PairingState::Paired);
            }
        }
        Ok(outcome)
    }

    /// 用户确认后批准配对：对 challenge（缺省时对 user code）签名并提交。
    ///
    /// 只在等待批准态合法——scan 必须先完成，approve 不会被预先发起。
    pub async fn approve(&self, user_code: &str) -> CoreResult<Value> {
        let user_code = user_code.trim();
        if user_code.is_empty() {
            return Err(CoreError::InvalidInput(
                "user code must not be empty".to_string(),
            ));
        }

        let challenge = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                PairingState::AwaitingApproval {
                    user_code: expected,
                    challenge,
                } => {
                    if expected != user_code {
                        return Err(CoreError::InvalidInput(format!(
                            "user code does not match pending approval ({expected})"
                        )));
                    }
                    let challenge = challenge.clone();
                    *state = PairingState::Approving;
                    challenge
                }
                other => {
                    return Err(CoreError::InvalidInput(format!(
                        "approve is only valid while awaiting approval (state {})",
                        state_name(other)
                    )));
                }
            }
        };

        let bearer = match self.auth.get_access_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(self.fail(PairingStage::Approve, CoreError::NotAuthenticated)),
            Err(err) => return Err(self.fail(PairingStage::Approve, err)),
        };

        let message = challenge.unwrap_or_else(|| user_code.to_string());
        let signature = match self.keys.sign_with_identity(message.as_bytes()) {
            Ok(signature) => signature,
            Err(err) => return Err(self.fail(PairingStage::Approve, err)),
        };
        let request = ApproveRequest {
            mobile_signature: signature,
        };
        let body = serde_json::to_value(&request).expect("approve request must be serializable");

        let path = format!("{APPROVE_PATH_PREFIX}/{user_code}");
        let reply = match self.transport.post_json(&path, body, Some(&bearer)).await {
            Ok(reply) => reply,
            Err(err) => return Err(self.fail(PairingStage::Approve, err)),
        };
        if !reply.is_success() {
            return Err(self.fail(
                PairingStage::Approve,
                CoreError::ApproveFailed {
                    status: reply.status,
                    body: reply.body,
                },
            ));
        }

        info!("pairing approved user_code={user_code}");
        self.set_state(PairingState::Paired);
        Ok(reply.json())
    }

    /// 覆盖状态。
    fn set_state(&self, next: PairingState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// 记录失败阶段并返回原错误。
    fn fail(&self, stage: PairingStage, err: CoreError) -> CoreError {
        warn!("pairing failed at {stage:?}: {err}");
        self.set_state(PairingState::Failed {
            stage,
            detail: err.to_string(),
        });
        err
    }
}
