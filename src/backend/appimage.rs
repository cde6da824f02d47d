//! AppImage 手动模式：直接操作文件，以及便携程序目录清单

use super::parser::{clean_terminal_output, parse_desktop_entry};
use super::runner::{BackendError, CommandSpec, DETAIL_TIMEOUT};
use super::types::{BackendKind, Operation, OperationOutcome, PortableEntry};
use super::Backends;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};

const SUFFIX: &str = ".appimage";

/// 文件名是否以 .AppImage 结尾（不区分大小写）
pub fn has_appimage_suffix(file_name: &str) -> bool {
    file_name.len() >= SUFFIX.len()
        && file_name.is_char_boundary(file_name.len() - SUFFIX.len())
        && file_name[file_name.len() - SUFFIX.len()..].eq_ignore_ascii_case(SUFFIX)
}

/// 去掉 .AppImage 后缀（不区分大小写），没有后缀时原样返回
pub fn strip_appimage_suffix(file_name: &str) -> &str {
    if has_appimage_suffix(file_name) {
        &file_name[..file_name.len() - SUFFIX.len()]
    } else {
        file_name
    }
}

pub fn execute(backends: &Backends, operation: Operation, target: &str) -> OperationOutcome {
    match operation {
        // 没有 Gear Lever 时集成就是复制到便携目录
        Operation::Install | Operation::Integrate => {
            match install(&backends.paths().appimage_dir, Path::new(target)) {
                Ok(dest) => OperationOutcome::ok(format!("AppImage 已安装到 {}", dest.display())),
                Err(e) => OperationOutcome::fail(format!("安装 {} 失败: {}", target, e)),
            }
        }
        Operation::Remove => remove(Path::new(target)),
        Operation::Update => OperationOutcome::unsupported(BackendKind::PortableManual, operation),
    }
}

/// 复制到便携目录并加上可执行权限，返回目标路径
pub fn install(dir: &Path, source: &Path) -> io::Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("无效的文件路径: {}", source.display()))
    })?;
    fs::create_dir_all(dir)?;
    let dest = dir.join(file_name);
    fs::copy(source, &dest)?;

    let mut perms = fs::metadata(&dest)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(&dest, perms)?;
    Ok(dest)
}

/// 删除文件；文件不存在视为失败
pub fn remove(path: &Path) -> OperationOutcome {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    if !path.exists() {
        return OperationOutcome::fail(format!("未找到 AppImage: {}", path.display()));
    }
    match fs::remove_file(path) {
        Ok(()) => OperationOutcome::ok(format!("已移除 {}", name)),
        Err(e) => OperationOutcome::fail(format!("无法删除 {}: {}", path.display(), e)),
    }
}

/// 文件信息：名称、大小、权限、可执行位、修改时间，以及 `--appimage-version` 的输出
pub fn details(backends: &Backends, path: &Path) -> Result<String, BackendError> {
    let io_error = |source| BackendError::Io {
        path: path.display().to_string(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let entry = entry_for(path, &file_name).map_err(io_error)?;
    let mode = fs::metadata(path).map_err(io_error)?.permissions().mode();
    let executable = mode & 0o111 != 0;

    let mut lines = vec![
        format!("应用名:   {}", entry.app_name),
        format!("文件名:   {}", entry.file_name),
        format!("描述:     {}", entry.description),
        format!("路径:     {}", path.display()),
        format!("大小:     {} MiB", entry.size_mib),
        format!("权限:     {:o}", mode & 0o7777),
        format!("可执行:   {}", if executable { "是" } else { "否" }),
    ];
    if let Some(modified) = entry.modified {
        lines.push(format!("修改时间: {}", modified.format("%Y-%m-%d %H:%M:%S")));
    }

    if executable {
        let spec = CommandSpec::new(&path.to_string_lossy(), ["--appimage-version"]).timeout(DETAIL_TIMEOUT);
        match backends.run(&spec) {
            Ok(output) if output.success() => {
                let version = clean_terminal_output(&output.stdout).trim().to_string();
                if !version.is_empty() {
                    lines.push(format!("AppImage 版本: {}", version));
                }
            }
            Ok(output) => log::debug!("{} --appimage-version 失败: {}", file_name, output.diagnostic()),
            Err(e) => log::debug!("{} --appimage-version 失败: {}", file_name, e),
        }
    }
    Ok(lines.join("\n"))
}

/// 在独立进程组中启动 AppImage，不等待其退出
pub fn launch(path: &Path) -> OperationOutcome {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let started = duct::cmd(path.to_path_buf(), Vec::<String>::new())
        .stdin_null()
        .stdout_null()
        .stderr_null()
        .unchecked()
        .before_spawn(|command| {
            command.process_group(0);
            Ok(())
        })
        .start();

    match started {
        Ok(handle) => {
            // 回收子进程
            let label = name.clone();
            std::thread::spawn(move || match handle.wait() {
                Ok(output) => log::debug!("{} 已退出: {:?}", label, output.status.code()),
                Err(e) => log::warn!("等待 {} 退出失败: {}", label, e),
            });
            OperationOutcome::ok(format!("已启动 {}", name))
        }
        Err(e) => OperationOutcome::fail(format!("无法启动 {}: {}", name, e)),
    }
}

/// 从文件名推导应用名：去后缀，`_`/`-` 变空格，去掉版本号，单词首字母大写
pub fn derive_app_name(file_name: &str) -> String {
    let stem = strip_appimage_suffix(file_name);
    let spaced: String = stem
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();

    let mut without_versions = String::with_capacity(spaced.len());
    let chars: Vec<char> = spaced.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            // `.数字` 视为同一个版本号
            while i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
        } else {
            without_versions.push(chars[i]);
            i += 1;
        }
    }

    without_versions
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// 读取 `<文件>.desktop` 元数据，缺失时由文件名推导
fn entry_for(path: &Path, file_name: &str) -> io::Result<PortableEntry> {
    let metadata = fs::metadata(path)?;

    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".desktop");
    let (name, comment) = match fs::read_to_string(PathBuf::from(sidecar)) {
        Ok(content) => parse_desktop_entry(&content),
        Err(_) => (None, None),
    };

    let app_name = name.unwrap_or_else(|| derive_app_name(file_name));
    let description = comment.unwrap_or_else(|| format!("AppImage: {}", app_name));
    let modified = metadata.modified().ok().map(DateTime::<Local>::from);

    Ok(PortableEntry {
        app_name,
        file_name: file_name.to_string(),
        path: path.to_path_buf(),
        description,
        size_mib: metadata.len() / (1024 * 1024),
        modified,
    })
}

/// 列出便携目录中的 AppImage，可按名称 / 文件名 / 描述过滤
pub fn list_installed(dir: &Path, query: &str) -> io::Result<Vec<PortableEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let needle = query.trim().to_lowercase();

    let mut entries = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        let file_name = dirent.file_name().to_string_lossy().to_string();
        if !has_appimage_suffix(&file_name) {
            continue;
        }
        let entry = match entry_for(&dirent.path(), &file_name) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("读取 {} 失败: {}", file_name, e);
                continue;
            }
        };
        if !needle.is_empty()
            && !entry.app_name.to_lowercase().contains(&needle)
            && !entry.file_name.to_lowercase().contains(&needle)
            && !entry.description.to_lowercase().contains(&needle)
        {
            continue;
        }
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.app_name.to_lowercase().cmp(&b.app_name.to_lowercase()));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::runner::testing::ScriptedRunner;
    use crate::backend::test_support::backends;
    use crate::backend::PortableMode;
    use std::sync::Arc;

    #[test]
    fn suffix_is_case_insensitive() {
        assert!(has_appimage_suffix("Foo.AppImage"));
        assert!(has_appimage_suffix("foo.appimage"));
        assert!(!has_appimage_suffix("foo.tar.gz"));
        assert_eq!(strip_appimage_suffix("MyApp-1.0.APPIMAGE"), "MyApp-1.0");
        assert_eq!(strip_appimage_suffix("readme"), "readme");
    }

    #[test]
    fn derives_readable_name() {
        assert_eq!(derive_app_name("my_cool-app-1.2.3-x86_64.AppImage"), "My Cool App X");
        assert_eq!(derive_app_name("Obsidian-1.6.7.AppImage"), "Obsidian");
        assert_eq!(derive_app_name("kdenlive.appimage"), "Kdenlive");
    }

    #[test]
    fn install_copies_and_marks_executable() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("Tool.AppImage");
        fs::write(&source, b"binary").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let b = backends(&runner, PortableMode::Manual, root.path());
        let outcome = execute(&b, Operation::Install, source.to_str().unwrap());
        assert!(outcome.success, "{}", outcome.message);

        let dest = b.paths().appimage_dir.join("Tool.AppImage");
        assert!(outcome.message.contains(&dest.display().to_string()));
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn install_reports_missing_source() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let b = backends(&runner, PortableMode::Manual, root.path());
        let missing = root.path().join("nope.AppImage");
        assert!(!execute(&b, Operation::Install, missing.to_str().unwrap()).success);
    }

    #[test]
    fn removing_twice_succeeds_once() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("Tool.AppImage");
        fs::write(&path, b"x").unwrap();

        let first = remove(&path);
        assert!(first.success);
        assert!(!path.exists());

        let second = remove(&path);
        assert!(!second.success);
        assert!(second.message.contains("未找到"));
    }

    #[test]
    fn update_is_not_supported_without_helper() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let b = backends(&runner, PortableMode::Manual, root.path());
        assert!(!execute(&b, Operation::Update, "").success);
    }

    #[test]
    fn inventory_reads_sidecar_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Editor-2.1.AppImage"), vec![0u8; 3 * 1024 * 1024]).unwrap();
        fs::write(
            dir.path().join("Editor-2.1.AppImage.desktop"),
            "[Desktop Entry]\nName=Super Editor\nComment=Edits text\n",
        )
        .unwrap();
        fs::write(dir.path().join("player_3.appimage"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let all = list_installed(dir.path(), "").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].app_name, "Player");
        assert_eq!(all[0].description, "AppImage: Player");
        assert_eq!(all[1].app_name, "Super Editor");
        assert_eq!(all[1].description, "Edits text");
        assert_eq!(all[1].size_mib, 3);
        assert!(all[1].modified.is_some());

        let filtered = list_installed(dir.path(), "edits").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].file_name, "Editor-2.1.AppImage");
    }

    #[test]
    fn inventory_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_installed(&dir.path().join("absent"), "").unwrap().is_empty());
    }

    #[test]
    fn details_report_file_info_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Tool-1.0.AppImage");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let argv0 = path.to_str().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on(&[argv0, "--appimage-version"], 0, "Version: effcebc\n", ""));
        let b = backends(&runner, PortableMode::Manual, dir.path());
        let text = b.details(BackendKind::PortableManual, argv0).unwrap();
        assert!(text.contains("应用名:   Tool"));
        assert!(text.contains("权限:     755"));
        assert!(text.contains("可执行:   是"));
        assert!(text.contains("AppImage 版本: Version: effcebc"));
        assert_eq!(runner.count(&[argv0, "--appimage-version"]), 1);
    }

    #[test]
    fn details_skip_version_probe_when_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Plain.AppImage");
        fs::write(&path, b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let b = backends(&runner, PortableMode::Manual, dir.path());
        let text = details(&b, &path).unwrap();
        assert!(text.contains("可执行:   否"));
        assert!(!text.contains("AppImage 版本"));
        assert!(runner.calls().is_empty());

        assert!(matches!(
            details(&b, &dir.path().join("gone.AppImage")),
            Err(BackendError::Io { .. })
        ));
    }

    #[test]
    fn launch_starts_detached_process() {
        // 标准输入为空，sh 会立即退出
        let outcome = launch(Path::new("/bin/sh"));
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.message, "已启动 sh");
    }

    #[test]
    fn launch_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!launch(&dir.path().join("missing.AppImage")).success);
    }
}
