//! Daily story themes and illustration styles

use chrono::{Datelike, NaiveDate};

const THEMES: &[&str] = &[
    "勇气与友谊",
    "学会分享",
    "保护环境",
    "诚实的力量",
    "克服恐惧",
    "家人的爱",
    "好奇心与探索",
    "帮助他人",
    "坚持不懈",
    "尊重差异",
    "四季的变化",
    "动物朋友",
    "海底世界",
    "星空与梦想",
    "森林里的秘密",
    "感恩的心",
    "第一次独立",
    "团队合作",
    "耐心等待",
    "珍惜时间",
    "失败后重新开始",
    "倾听别人",
    "想象力的旅程",
    "善待小生命",
];

const ILLUSTRATION_STYLES: &[&str] = &[
    "新中式动漫插画",
    "水彩绘本风格",
    "宫崎骏吉卜力风格",
    "皮克斯3D动画风格",
    "温暖的彩铅手绘",
    "剪纸拼贴风格",
    "梦幻粉彩插画",
    "复古童书版画",
];

/// Theme for the given calendar day.
///
/// Deterministic: every call with the same date picks the same entry.
pub fn daily_theme(date: NaiveDate) -> &'static str {
    let day = date.num_days_from_ce().rem_euclid(THEMES.len() as i32) as usize;
    THEMES[day]
}

/// Styles the text model may choose from when writing image prompts
pub fn illustration_styles() -> &'static [&'static str] {
    ILLUSTRATION_STYLES
}
