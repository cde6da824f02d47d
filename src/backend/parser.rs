//! 输出解析函数：每个后端的文本输出 → 类型化记录，均为纯函数

use super::types::{
    DnfPackage, FlatpakApp, InstalledApp, RemoteApp, UpgradeCandidate,
};
use std::collections::HashMap;

/// 清理终端输出中的 ANSI 转义序列和特殊字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            '\r' => {
                if chars.peek() != Some(&'\n') && !result.ends_with('\n') {
                    result.push('\n');
                }
            }
            c if c.is_control() && c != '\n' && c != '\t' => {}
            _ => result.push(c),
        }
    }

    let mut cleaned_lines = Vec::new();
    let mut prev_empty = false;

    for line in result.lines() {
        let is_empty = line.trim().is_empty();
        if is_empty && prev_empty {
            continue;
        }
        cleaned_lines.push(line);
        prev_empty = is_empty;
    }

    cleaned_lines.join("\n")
}

// ========== dnf ==========

/// 解析 `dnf check-update` 输出
///
/// 典型行：`foo.x86_64   2.0-1   updates`
/// 包名过长时 dnf 会把包名单独放在一行，版本和仓库换到下一行。
/// 遇到 `Obsoleting Packages` 段落后停止（那一段不是升级）。
pub fn parse_check_update(output: &str) -> Vec<UpgradeCandidate> {
    let mut results = Vec::new();
    let mut pending_name: Option<String> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("Last metadata expiration check") {
            continue;
        }
        if line.starts_with("Obsoleting Packages") {
            break;
        }

        let pending = pending_name.take();
        let mut tokens: Vec<&str> = Vec::new();
        if let Some(name) = pending.as_deref() {
            tokens.push(name);
        }
        tokens.extend(line.split_whitespace());

        if tokens.len() == 1 {
            if tokens[0].contains('.') {
                pending_name = Some(tokens[0].to_string());
            }
            continue;
        }
        if tokens.len() < 3 || !tokens[0].contains('.') {
            continue;
        }

        results.push(UpgradeCandidate {
            identifier: tokens[0].to_string(),
            available_version: tokens[1].to_string(),
            repository: tokens[2].to_string(),
        });
    }

    results
}

/// 从 `dnf list --installed <id>` 输出中取出该包的已安装版本
pub fn parse_installed_version(output: &str, identifier: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() >= 2 && tokens[0] == identifier {
            Some(tokens[1].to_string())
        } else {
            None
        }
    })
}

fn is_dnf_list_header(line: &str) -> bool {
    line.starts_with("Installed")
        || line.starts_with("Available")
        || line.starts_with("Last")
        || line.starts_with("Extra")
        || line.starts_with("Upgradable")
}

/// 去掉 `.arch` 后缀
pub fn strip_arch(full_name: &str) -> &str {
    full_name
        .rsplit_once('.')
        .map(|(name, _)| name)
        .unwrap_or(full_name)
}

/// 解析 `dnf list [--installed|--available]` 输出，summary 留空
pub fn parse_dnf_list(output: &str) -> Vec<DnfPackage> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_dnf_list_header(line))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            Some(DnfPackage {
                name: parts[0].to_string(),
                version: parts[1].to_string(),
                repository: parts[2].to_string(),
                installed: parts[2].starts_with('@'),
                summary: String::new(),
            })
        })
        .collect()
}

/// 解析 `dnf info` 输出为 包名 → 摘要
///
/// 摘要取 `Summary` 字段；没有 Summary 时用 Description 续行拼接。
pub fn parse_dnf_info(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut current_pkg = String::new();
    let mut current_desc = String::new();
    let mut in_description = false;

    fn flush(pkg: &str, desc: &str, map: &mut HashMap<String, String>) {
        if !pkg.is_empty() && !desc.is_empty() {
            map.entry(pkg.to_string()).or_insert_with(|| desc.to_string());
        }
    }

    for raw in output.lines() {
        let line = raw.trim();
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => ("", line),
        };

        match key {
            "Name" => {
                flush(&current_pkg, &current_desc, &mut map);
                current_pkg = value.to_string();
                current_desc.clear();
                in_description = false;
            }
            "Summary" if !current_pkg.is_empty() => {
                current_desc = value.to_string();
                in_description = false;
            }
            "Description" => {
                in_description = current_desc.is_empty();
                if in_description {
                    current_desc = value.to_string();
                }
            }
            // 续行以 ": " 开头，key 为空
            "" if in_description && !value.is_empty() => {
                if !current_desc.is_empty() {
                    current_desc.push(' ');
                }
                current_desc.push_str(value);
            }
            _ => {
                if line.is_empty() {
                    in_description = false;
                }
            }
        }
    }
    flush(&current_pkg, &current_desc, &mut map);

    map
}

// ========== flatpak ==========

/// 按制表符拆分 flatpak `--columns` 输出，跳过表头
fn flatpak_rows(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output.lines().filter_map(|line| {
        if line.trim().is_empty() {
            return None;
        }
        let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
        let first = cols.first().copied().unwrap_or("");
        if first.is_empty() || first == "Application ID" || first == "Application" || first == "Name" {
            return None;
        }
        Some(cols)
    })
}

fn col(cols: &[&str], index: usize) -> String {
    cols.get(index).map(|s| s.to_string()).unwrap_or_default()
}

/// 解析 `flatpak list --app --columns=application,name,version,branch,origin`
pub fn parse_flatpak_installed(output: &str) -> Vec<InstalledApp> {
    flatpak_rows(output)
        .map(|cols| InstalledApp {
            application_id: col(&cols, 0),
            name: col(&cols, 1),
            version: col(&cols, 2),
            branch: col(&cols, 3),
            origin: col(&cols, 4),
        })
        .collect()
}

/// 解析 `flatpak remote-ls --app --columns=application,version,branch,origin`
pub fn parse_flatpak_remote(output: &str) -> Vec<RemoteApp> {
    flatpak_rows(output)
        .map(|cols| RemoteApp {
            application_id: col(&cols, 0),
            version: col(&cols, 1),
            branch: col(&cols, 2),
            origin: col(&cols, 3),
        })
        .collect()
}

/// 解析 `--columns=application,name,version,branch,description` 格式（搜索与列表通用）
pub fn parse_flatpak_apps(output: &str) -> Vec<FlatpakApp> {
    flatpak_rows(output)
        .filter(|cols| cols.len() >= 4)
        .map(|cols| {
            let description = cols
                .get(4)
                .filter(|d| !d.is_empty())
                .map(|d| d.to_string())
                .unwrap_or_else(|| "无描述".to_string());
            FlatpakApp {
                application_id: col(&cols, 0),
                name: col(&cols, 1),
                version: col(&cols, 2),
                branch: col(&cols, 3),
                description,
            }
        })
        .collect()
}

// ========== AppImage ==========

/// 从 .desktop 文件内容中读取 Name= 与 Comment=（各取第一次出现）
pub fn parse_desktop_entry(content: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut comment = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("Name=") {
            if name.is_none() && !v.trim().is_empty() {
                name = Some(v.trim().to_string());
            }
        } else if let Some(v) = line.strip_prefix("Comment=") {
            if comment.is_none() && !v.trim().is_empty() {
                comment = Some(v.trim().to_string());
            }
        }
    }
    (name, comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_update_basic_line() {
        let out = "\nLast metadata expiration check: 0:12:01 ago on Mon.\n\nfoo.x86_64   2.0-1   repo-main\n";
        let parsed = parse_check_update(out);
        assert_eq!(
            parsed,
            vec![UpgradeCandidate {
                identifier: "foo.x86_64".into(),
                available_version: "2.0-1".into(),
                repository: "repo-main".into(),
            }]
        );
    }

    #[test]
    fn check_update_joins_wrapped_names_and_stops_at_obsoletes() {
        let out = "\
a-really-long-package-name-devel.noarch
                          3.1-2          updates
bar.i686                  0.9-1          updates
Obsoleting Packages
old.x86_64                1.0-1          updates
";
        let parsed = parse_check_update(out);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].identifier, "a-really-long-package-name-devel.noarch");
        assert_eq!(parsed[0].available_version, "3.1-2");
        assert_eq!(parsed[1].identifier, "bar.i686");
    }

    #[test]
    fn check_update_ignores_status_lines() {
        let out = "Updating and loading repositories:\nRepositories loaded.\n";
        assert!(parse_check_update(out).is_empty());
    }

    #[test]
    fn installed_version_matches_exact_identifier() {
        let out = "Installed Packages\nfoo-libs.x86_64  0.5-1  @System\nfoo.x86_64  1.0-1  installed\n";
        assert_eq!(parse_installed_version(out, "foo.x86_64").as_deref(), Some("1.0-1"));
        assert_eq!(parse_installed_version(out, "baz.x86_64"), None);
    }

    #[test]
    fn dnf_list_marks_installed_repo() {
        let out = "Installed Packages\nvim.x86_64  9.1-1  @updates\nAvailable Packages\nnano.x86_64  7.2-1  main\n";
        let pkgs = parse_dnf_list(out);
        assert_eq!(pkgs.len(), 2);
        assert!(pkgs[0].installed);
        assert!(!pkgs[1].installed);
        assert_eq!(strip_arch(&pkgs[1].name), "nano");
    }

    #[test]
    fn dnf_info_takes_summary() {
        let out = "\
Name         : vim
Version      : 9.1
Summary      : The VIM editor
Description  : VIM is a powerful
             : editor.

Name         : nano
Description  : Small editor
             : for terminals.
";
        let map = parse_dnf_info(out);
        assert_eq!(map.get("vim").map(String::as_str), Some("The VIM editor"));
        assert_eq!(map.get("nano").map(String::as_str), Some("Small editor for terminals."));
    }

    #[test]
    fn flatpak_installed_rows() {
        let out = "Application ID\tName\tVersion\tBranch\tOrigin\norg.app\tApp\t1.0\tstable\tflathub\norg.other\tOther\n";
        let apps = parse_flatpak_installed(out);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].branch, "stable");
        assert_eq!(apps[0].origin, "flathub");
        assert_eq!(apps[1].version, "");
        assert_eq!(apps[1].origin, "");
    }

    #[test]
    fn flatpak_search_requires_four_columns() {
        let out = "org.a\tA\t1\tstable\tAn app\norg.b\tB\t2\tstable\nbroken\n";
        let apps = parse_flatpak_apps(out);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[1].description, "无描述");
    }

    #[test]
    fn desktop_entry_first_values_win() {
        let content = "[Desktop Entry]\nName=Foo\nName=Other\nComment=Does foo\n";
        let (name, comment) = parse_desktop_entry(content);
        assert_eq!(name.as_deref(), Some("Foo"));
        assert_eq!(comment.as_deref(), Some("Does foo"));
    }

    #[test]
    fn clean_strips_escape_sequences() {
        assert_eq!(clean_terminal_output("\x1b[1mbold\x1b[0m\n\n\nnext"), "bold\n\nnext");
    }
}
