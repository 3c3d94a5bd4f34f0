//! Text cleanup for extracted article bodies.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Share prompts and QR-code calls to action. Everything from the first
/// occurrence to the end of the text is boilerplate.
static BOILERPLATE_TRAILER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:跳转二维码|作者头像|长按识别|扫码关注|点击阅读|微信扫一扫|分享至朋友圈|scan to follow|scan with weixin).*$",
    )
    .expect("Invalid regex")
});

/// Collapse whitespace and strip trailing boilerplate.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text, " ");
    let stripped = BOILERPLATE_TRAILER.replace(&collapsed, "");
    stripped.trim().to_string()
}

/// Length of a cleaned body in characters.
#[must_use]
pub fn word_count(text: &str) -> i64 {
    text.chars().count() as i64
}
