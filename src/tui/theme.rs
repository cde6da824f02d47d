//! 主题色定义，全局统一使用

use ratatui::style::Color;

/// 分组标题
pub const PINK: Color = Color::Rgb(245, 169, 184);
/// 版本号
pub const BLUE: Color = Color::Rgb(91, 206, 250);
/// 选中行背景色
pub const SEL_BG: Color = Color::Rgb(45, 35, 55);
pub const BRIGHT_WHITE: Color = Color::Rgb(255, 255, 255);
/// 次要信息
pub const DIM: Color = Color::Rgb(130, 130, 140);
/// 选中行内的描述文字
pub const DESC_DIM: Color = Color::Rgb(180, 180, 190);
/// 通知横幅
pub const BANNER: Color = Color::Rgb(250, 200, 90);
