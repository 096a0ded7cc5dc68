//! UTF-8 safe string helpers.
//!
//! Context excerpts shown to the gateway are cut by character count, never
//! by raw byte index, so multibyte text cannot cause a panic.

/// Return a preview of `s` up to `n` characters. If `s` is longer than `n`
/// characters, the returned string ends with `...`.
pub fn preview(s: &str, n: usize) -> String {
    let mut chars = s.chars();
    let mut prefix: String = chars.by_ref().take(n).collect();
    if chars.next().is_some() {
        prefix.push_str("...");
    }
    prefix
}

/// Largest byte index `<= max` that falls on a char boundary of `s`.
pub fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_basic_ascii() {
        assert_eq!(preview("hello world", 5), "hello...");
        assert_eq!(preview("hello world", 20), "hello world");
        assert_eq!(preview("exact", 5), "exact");
    }

    #[test]
    fn preview_multibyte() {
        let s = "宇树科技是最强的选手";
        assert_eq!(preview(s, 4), "宇树科技...");
    }

    #[test]
    fn floor_boundary_never_splits_chars() {
        let s = "aé";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 10), s.len());
        assert_eq!(floor_char_boundary("abc", 2), 2);
    }
}
