//! 用户设置：~/.config/tripack/config.toml
//!
//! 读取时缺失 / 损坏一律回退默认值；保存时合并进已有文件，保留未知键。

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_POLL_MINUTES: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub notifications_enabled: bool,
    pub poll_interval_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            poll_interval_minutes: DEFAULT_POLL_MINUTES,
        }
    }
}

pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/tripack/config.toml")
}

impl Settings {
    /// 从指定路径读取，任何错误都回退到默认值
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("读取配置 {} 失败，使用默认值: {}", path.display(), e);
                return Self::default();
            }
        };
        let table = match content.parse::<toml::Table>() {
            Ok(table) => table,
            Err(e) => {
                log::warn!("配置 {} 格式错误，使用默认值: {}", path.display(), e);
                return Self::default();
            }
        };

        // 逐键读取，单个键类型错误只影响该键
        let mut settings = Self::default();
        if let Some(value) = field(&table, "notifications_enabled", path) {
            settings.notifications_enabled = value;
        }
        if let Some(value) = field(&table, "poll_interval_minutes", path) {
            settings.poll_interval_minutes = value;
        }
        settings.clamped()
    }

    fn clamped(mut self) -> Self {
        self.poll_interval_minutes = self.poll_interval_minutes.max(1);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.max(1).saturating_mul(60))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// 把已知键写入已有表中，其余键原样保留
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut table = read_table(path);
        let known = to_table(&self.clone().clamped())?;
        for (key, value) in known {
            table.insert(key, value);
        }
        write_table(path, &table)
    }
}

/// 只补齐缺失的默认键，不改动已有值
pub fn ensure_defaults(path: &Path) -> Result<()> {
    let mut table = read_table(path);
    let defaults = to_table(&Settings::default())?;
    let mut changed = !path.exists();
    for (key, value) in defaults {
        if !table.contains_key(&key) {
            table.insert(key, value);
            changed = true;
        }
    }
    if changed {
        write_table(path, &table)?;
    }
    Ok(())
}

/// 读取单个键；类型不符时记录警告并忽略
fn field<T: DeserializeOwned>(table: &toml::Table, key: &str, path: &Path) -> Option<T> {
    let value = table.get(key)?.clone();
    match value.try_into::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("配置 {} 中 {} 无效，使用默认值: {}", path.display(), key, e);
            None
        }
    }
}

fn to_table(settings: &Settings) -> Result<toml::Table> {
    match toml::Value::try_from(settings)? {
        toml::Value::Table(table) => Ok(table),
        other => anyhow::bail!("设置序列化结果不是表: {}", other.type_str()),
    }
}

/// 读取为原始表；不存在或无法解析时为空表
fn read_table(path: &Path) -> toml::Table {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| content.parse::<toml::Table>().ok())
        .unwrap_or_default()
}

fn write_table(path: &Path, table: &toml::Table) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("创建配置目录 {} 失败", parent.display()))?;
    }
    let content = toml::to_string_pretty(table)?;
    fs::write(path, content).with_context(|| format!("写入配置 {} 失败", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.toml"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.poll_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "notifications_enabled = [not toml").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn partial_file_fills_missing_keys_and_ignores_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_minutes = 0\ntheme = \"dark\"\n").unwrap();
        let settings = Settings::load_from(&path);
        assert!(settings.notifications_enabled);
        assert_eq!(settings.poll_interval_minutes, 1);
    }

    #[test]
    fn one_bad_key_keeps_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "notifications_enabled = false\npoll_interval_minutes = \"x\"\n").unwrap();
        let settings = Settings::load_from(&path);
        assert!(!settings.notifications_enabled);
        assert_eq!(settings.poll_interval_minutes, DEFAULT_POLL_MINUTES);

        fs::write(&path, "notifications_enabled = \"yes\"\npoll_interval_minutes = -5\n").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn huge_interval_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_minutes = 9223372036854775807\n").unwrap();
        let settings = Settings::load_from(&path);
        assert_eq!(settings.poll_interval_minutes, 9223372036854775807);
        assert_eq!(settings.poll_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn save_preserves_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "theme = \"dark\"\nnotifications_enabled = true\n").unwrap();

        let settings = Settings {
            notifications_enabled: false,
            poll_interval_minutes: 15,
        };
        settings.save_to(&path).unwrap();

        let table: toml::Table = fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(table["theme"].as_str(), Some("dark"));
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn ensure_defaults_keeps_existing_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "poll_interval_minutes = 5\n").unwrap();

        ensure_defaults(&path).unwrap();
        let table: toml::Table = fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(table["poll_interval_minutes"].as_integer(), Some(5));
        assert_eq!(table["notifications_enabled"].as_bool(), Some(true));
    }

    #[test]
    fn ensure_defaults_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tripack/config.toml");
        ensure_defaults(&path).unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }
}
