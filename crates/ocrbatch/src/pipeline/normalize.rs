//! Math-delimiter normalization for engine output fragments.
//!
//! The engine emits LaTeX-style `\(..\)` and `\[..\]` delimiters; common
//! Markdown renderers expect `$..$` and `$$..$$`. The rewrite is purely
//! mechanical and per-fragment — a fragment that cannot be normalized is
//! included verbatim by the merge engine.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Unbalanced display math delimiters ({opens} open vs {closes} close)")]
    UnbalancedDisplayMath { opens: usize, closes: usize },

    #[error("Unbalanced inline math delimiters ({opens} open vs {closes} close)")]
    UnbalancedInlineMath { opens: usize, closes: usize },
}

fn display_math_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\\\[(.*?)\\\]").expect("pattern is valid"))
}

fn inline_math_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\\\((.*?)\\\)").expect("pattern is valid"))
}

/// Rewrites `\[..\]` to `$$..$$` and `\(..\)` to `$..$`.
///
/// Delimiter counts must balance; otherwise a pairwise rewrite would attach
/// text to the wrong delimiter, so the fragment is rejected instead.
pub fn normalize_math_delimiters(text: &str) -> Result<String, NormalizeError> {
    let display_opens = text.matches(r"\[").count();
    let display_closes = text.matches(r"\]").count();
    if display_opens != display_closes {
        return Err(NormalizeError::UnbalancedDisplayMath {
            opens: display_opens,
            closes: display_closes,
        });
    }

    let inline_opens = text.matches(r"\(").count();
    let inline_closes = text.matches(r"\)").count();
    if inline_opens != inline_closes {
        return Err(NormalizeError::UnbalancedInlineMath {
            opens: inline_opens,
            closes: inline_closes,
        });
    }

    let display_normalized = display_math_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            format!("$${}$$", &caps[1])
        });
    let fully_normalized = inline_math_pattern()
        .replace_all(&display_normalized, |caps: &regex::Captures<'_>| {
            format!("${}$", &caps[1])
        });

    Ok(fully_normalized.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_math_normalized() {
        assert_eq!(
            normalize_math_delimiters(r"The area is \(a^2\).").unwrap(),
            "The area is $a^2$."
        );
    }

    #[test]
    fn test_display_math_normalized() {
        assert_eq!(
            normalize_math_delimiters(r"\[E = mc^2\]").unwrap(),
            "$$E = mc^2$$"
        );
    }

    #[test]
    fn test_mixed_and_multiline_math() {
        let input = "Intro \\(x\\) then\n\\[\ny = x^2\n\\]\nend";
        let expected = "Intro $x$ then\n$$\ny = x^2\n$$\nend";
        assert_eq!(normalize_math_delimiters(input).unwrap(), expected);
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "# Heading\n\nNo math here.";
        assert_eq!(normalize_math_delimiters(input).unwrap(), input);
    }

    #[test]
    fn test_unbalanced_display_math_rejected() {
        let result = normalize_math_delimiters(r"broken \[ math");
        assert_eq!(
            result,
            Err(NormalizeError::UnbalancedDisplayMath {
                opens: 1,
                closes: 0
            })
        );
    }

    #[test]
    fn test_unbalanced_inline_math_rejected() {
        let result = normalize_math_delimiters(r"broken math \)");
        assert_eq!(
            result,
            Err(NormalizeError::UnbalancedInlineMath {
                opens: 0,
                closes: 1
            })
        );
    }

    #[test]
    fn test_multiple_spans_each_rewritten() {
        assert_eq!(
            normalize_math_delimiters(r"\(a\) and \(b\)").unwrap(),
            "$a$ and $b$"
        );
    }
}
