//! HTTP 传输模块职责：
//! 1. 以最小接口封装 JSON/表单 POST 与 bearer 鉴权。
//! 2. 保留原始状态码与响应体文本，供上层按阶段分类并原样展示。
//! 3. 以 trait 注入会话层，便于替换实现与离线测试。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// HTTP 应答：状态码与原始响应体文本。
#[derive(Debug, Clone)]
pub struct HttpReply {
    /// HTTP 状态码。
    pub status: u16,
    /// 原始响应体文本。
    pub body: String,
}

impl HttpReply {
    /// 是否 2xx。
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 响应体解析为 JSON；空体或非 JSON 时回退为空对象。
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// 传输抽象：认证与配对会话的唯一出网途径。
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST JSON；bearer 为 None 时不携带鉴权头。
    async fn post_json(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply>;

    /// POST 表单（application/x-www-form-urlencoded）。
    async fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply>;
}

/// 基于 reqwest 的默认传输实现。
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// 构造传输实例；base_url 需为 http(s) 绝对地址。
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|err| CoreError::InvalidInput(format!("invalid base url {base_url}: {err}")))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(CoreError::InvalidInput(format!(
                    "unsupported base url scheme: {other}"
                )));
            }
        }
        base.set_query(None);
        base.set_fragment(None);
        // 结尾保留 `/`，确保 `Url::join` 在 base 自带路径前缀时不丢段。
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CoreError::Network(format!("build http client failed: {err}")))?;
        Ok(Self { client, base })
    }

    /// 将相对路径拼接到 base 上。
    pub(crate) fn endpoint(&self, path: &str) -> CoreResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|err| CoreError::InvalidInput(format!("invalid request path {path}: {err}")))
    }

    /// 发送请求并把应答收敛为统一结构。
    async fn send(&self, request: reqwest::RequestBuilder) -> CoreResult<HttpReply> {
        let response = request
            .send()
            .await
            .map_err(|err| CoreError::Network(format!("request failed: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| CoreError::Network(format!("read response body failed: {err}")))?;
        Ok(HttpReply { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply> {
        let mut request = self.client.post(self.endpoint(path)?).json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }

    async fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        bearer: Option<&str>,
    ) -> CoreResult<HttpReply> {
        let mut request = self.client.post(self.endpoint(path)?).form(&fields);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        self.send(request).await
    }
}
