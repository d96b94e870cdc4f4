//! 配置模块职责：
//! 1. 读取移动核心所需环境变量并提供开发态默认值。
//! 2. 提供存储路径、请求超时、扫码去抖等运行参数。

use std::{path::PathBuf, time::Duration};

/// 默认服务端地址（开发态默认本机）。
pub(crate) const DEFAULT_BASE_URL: &str = "http://127.0.0.1:18080";
/// 默认扫码去抖窗口（毫秒）。
const DEFAULT_SCAN_DEBOUNCE_MS: u64 = 1000;
/// 默认 HTTP 请求超时（秒）。
const DEFAULT_HTTP_TIMEOUT_SEC: u64 = 15;
/// 键值存储文件名。
const STATE_FILE_NAME: &str = "state.json";

/// 移动核心运行时配置。
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// 服务端 HTTP base 地址。
    pub base_url: String,
    /// 设备平台标识，随注册请求上报。
    pub platform: String,
    /// 键值存储文件路径。
    pub state_path: PathBuf,
    /// 扫码去抖窗口。
    pub scan_debounce: Duration,
    /// HTTP 请求超时。
    pub http_timeout: Duration,
}

impl CoreConfig {
    /// 从环境变量构建配置；未设置的项使用开发态默认值。
    pub fn from_env() -> Self {
        let base_url = env_string("YA_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let platform = env_string("YA_PLATFORM").unwrap_or_else(detect_platform);
        let state_path = env_string("YA_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_storage_dir)
            .join(STATE_FILE_NAME);
        let scan_debounce = Duration::from_millis(
            env_u64("YA_SCAN_DEBOUNCE_MS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_SCAN_DEBOUNCE_MS),
        );
        let http_timeout = Duration::from_secs(
            env_u64("YA_HTTP_TIMEOUT_SEC")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SEC),
        );

        Self {
            base_url,
            platform,
            state_path,
            scan_debounce,
            http_timeout,
        }
    }
}

/// 读取并裁剪环境变量；空串视为未设置。
fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// 读取数值环境变量；无法解析时视为未设置。
fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|raw| raw.parse::<u64>().ok())
}

/// 识别运行平台；无法识别时回退 unknown。
fn detect_platform() -> String {
    match std::env::consts::OS {
        "ios" | "android" | "macos" | "linux" | "windows" => std::env::consts::OS.to_string(),
        _ => "unknown".to_string(),
    }
}

/// 默认存储目录：`~/.config/yourassistant/mobile`。
fn default_storage_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("yourassistant")
        .join("mobile")
}
