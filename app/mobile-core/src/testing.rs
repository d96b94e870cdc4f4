//! 测试支撑：按脚本回放应答并记录出网调用的传输实现，以及配对信封封装。

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};
use serde_json::{Map, Value};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::{
    error::{CoreError, CoreResult},
    keystore::derive_box_key,
    transport::{HttpReply, Transport},
};

/// 一次被记录的出网调用。
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    /// 请求路径。
    pub(crate) path: String,
    /// JSON 请求体（表单调用转成对象记录）。
    pub(crate) body: Value,
    /// bearer 令牌。
    pub(crate) bearer: Option<String>,
    /// 是否表单调用。
    pub(crate) form: bool,
}

/// 预设应答。
enum Scripted {
    Reply {
        status: u16,
        body: String,
        delay: Duration,
    },
    NetworkError(String),
}

/// 脚本化传输：调用按顺序消费预设应答，队列耗尽时回放 `200 {}`。
pub(crate) struct MockTransport {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<VecDeque<Scripted>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
        }
    }

    /// 追加一条应答。
    pub(crate) fn push_reply(&self, status: u16, body: impl Into<String>) {
        self.push_reply_delayed(status, body, Duration::ZERO);
    }

    /// 追加一条延迟应答（模拟慢响应）。
    pub(crate) fn push_reply_delayed(
        &self,
        status: u16,
        body: impl Into<String>,
        delay: Duration,
    ) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Scripted::Reply {
                status,
                body: body.into(),
                delay,
            });
    }

    /// 追加一条网络层失败。
    pub(crate) fn push_network_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Scripted::NetworkError(message.to_string()));
    }

    /// 已记录的全部调用。
    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 已记录的调用数。
    pub(crate) fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn record(&self, path: &str, body: Value, bearer: Option<&str>, form: bool) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                path: path.to_string(),
                body,
                bearer: bearer.map(ToString::to_string),
                form,
            });
    }

    fn next(&self) -> Scripted {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Scripted::Reply {
                status: 200,
                body: "{}".to_string(),
                delay: Duration::ZERO,
            })
    }

    async fn respond(&self) -> CoreResult<HttpReply> {
        match self.next() {
            Scripted::Reply {
                status,
                body,
                delay,
            } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(HttpReply { status, body })
            }
            Scripted::NetworkError(message) => Err(CoreError::Network(message)),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply> {
        self.record(path, body, bearer, false);
        self.respond().await
    }

    async fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply> {
        let mut body = Map::new();
        for (key, value) in fields {
            body.insert(key.clone(), Value::String(value.clone()));
        }
        self.record(path, Value::Object(body), bearer, true);
        self.respond().await
    }
}

/// 以临时“服务端”X25519 密钥封一只配对信封。
///
/// 返回 (cipher, nonce, server_public)，均为 base64，与扫码信封字段对应。
pub(crate) fn seal_envelope(
    mobile_public_b64: &str,
    plaintext: &[u8],
) -> (String, String, String) {
    let mobile_raw = STANDARD
        .decode(mobile_public_b64)
        .expect("mobile public key must be base64");
    let mobile_bytes: [u8; 32] = mobile_raw
        .as_slice()
        .try_into()
        .expect("mobile public key must be 32 bytes");

    let server_secret = StaticSecret::random_from_rng(OsRng);
    let server_public = X25519PublicKey::from(&server_secret);
    let shared = server_secret.diffie_hellman(&X25519PublicKey::from(mobile_bytes));
    let key = derive_box_key(shared.as_bytes()).expect("derive box key");

    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key));
    let cipher = aead
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .expect("seal envelope");

    (
        STANDARD.encode(&cipher),
        STANDARD.encode(nonce),
        STANDARD.encode(server_public.as_bytes()),
    )
}
