// 文件职责：
// 1) 定义移动端与服务端共用的认证/配对协议数据结构。
// 2) 提供二维码负载与扫码响应的统一解析入口（字段别名表只在此维护一份）。
// 3) 作为 Rust 侧协议唯一代码源，供移动核心与未来服务端复用。

pub mod auth;
pub mod pairing;

pub use auth::{DeviceInfo, RegisterRequest, RegisterResponse, TokenResponse, VerifyRequest};
pub use pairing::{ApproveRequest, PairingRequest, PlainPayload, ScanRequest, ScanResponse};
