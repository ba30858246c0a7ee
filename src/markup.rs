use regex::{Captures, Regex};
use std::sync::LazyLock;

static DISPLAY_MATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").expect("display math pattern is valid"));
static INLINE_MATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\\\((.*?)\\\)").expect("inline math pattern is valid"));

/// Rewrites LaTeX-style math delimiters into dollar form:
/// `\[ .. \]` becomes `$$..$$` and `\( .. \)` becomes `$..$`.
pub fn rewrite_math_delimiters(text: &str) -> String {
    let display = DISPLAY_MATH.replace_all(text, |caps: &Captures| format!("$${}$$", &caps[1]));
    INLINE_MATH
        .replace_all(&display, |caps: &Captures| format!("${}$", &caps[1]))
        .into_owned()
}
