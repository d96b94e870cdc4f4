//! 本地键值存储模块职责：
//! 1. 为密钥与令牌提供字符串键值持久化的统一抽象。
//! 2. 文件实现：单 JSON 文件整表落盘，解析失败时回退空表。
//! 3. 一批写入/删除一次落盘，保证“要么全生效要么全不生效”。

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// 字符串键值存储抽象；实现需可跨线程共享。
pub trait KvStore: Send + Sync {
    /// 读取键值；键不存在时返回 None。
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// 原子应用一批写入/删除（value 为 None 表示删除），一次性落盘。
    fn apply(&self, updates: &[(&str, Option<String>)]) -> CoreResult<()>;

    /// 写入单个键值。
    fn put(&self, key: &str, value: &str) -> CoreResult<()> {
        self.apply(&[(key, Some(value.to_string()))])
    }

    /// 删除单个键；键本就不存在时也视为成功。
    fn remove(&self, key: &str) -> CoreResult<()> {
        self.apply(&[(key, None)])
    }
}

/// 文件键值存储：整表缓存在内存，写入时整体序列化落盘。
pub struct FileKvStore {
    /// 落盘文件路径。
    path: PathBuf,
    /// 内存表，读写都经过该锁。
    entries: Mutex<HashMap<String, String>>,
}

impl FileKvStore {
    /// 打开（或初始化）指定路径的键值文件；内容损坏时告警并重置为空表。
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, String>>(&bytes)
                .unwrap_or_else(|err| {
                    warn!("load kv store failed, resetting: {err}");
                    HashMap::new()
                }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// 将整表写入磁盘：先写临时文件再重命名，避免半截文件。
    fn persist(&self, entries: &HashMap<String, String>) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| CoreError::Storage(format!("create kv dir failed: {err}")))?;
        }
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|err| CoreError::Storage(format!("encode kv store failed: {err}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)
            .map_err(|err| CoreError::Storage(format!("write kv store failed: {err}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|err| CoreError::Storage(format!("finalize kv store failed: {err}")))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn apply(&self, updates: &[(&str, Option<String>)]) -> CoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // 先在副本上应用并落盘，成功后才替换内存表。
        let mut next = entries.clone();
        for (key, value) in updates {
            match value {
                Some(value) => {
                    next.insert((*key).to_string(), value.clone());
                }
                None => {
                    next.remove(*key);
                }
            }
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

/// 内存键值存储：测试与原型场景使用，不落盘。
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    /// 构造空存储。
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn apply(&self, updates: &[(&str, Option<String>)]) -> CoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in updates {
            match value {
                Some(value) => {
                    entries.insert((*key).to_string(), value.clone());
                }
                None => {
                    entries.remove(*key);
                }
            }
        }
        Ok(())
    }
}
