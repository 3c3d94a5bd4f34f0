//! Shared constants used across the application.

/// Browser user agents rotated across outbound requests.
///
/// The portal serves challenge pages far sooner to non-browser agents.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
];

/// Path prefix the portal redirects to when it serves an interstitial.
pub const CHALLENGE_PATH: &str = "/antispider";

/// Text fragments that only appear on anti-bot interstitials.
pub const CHALLENGE_MARKERS: &[&str] = &[
    "seccodeImage",
    "请输入验证码",
    "异常访问请求",
    "您的访问出错了",
];
