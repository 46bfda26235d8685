//! Filename sanitization and template rendering.
//!
//! Stream titles come from an external API and can contain anything; they
//! are sanitized and truncated before being placed into a filename
//! template. Templates use `{placeholder}` syntax and are validated once at
//! config load against the placeholders each template is allowed to use.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Characters that are invalid in Windows filenames (superset of unix).
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive).
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Titles longer than this are truncated with a `..` marker.
const MAX_TITLE_LEN: usize = 77;

/// Placeholders recognized by the live recording filename template.
pub const LIVE_PLACEHOLDERS: &[&str] = &[
    "username",
    "stream_started",
    "record_started",
    "escaped_title",
];

/// Placeholders recognized by the VOD download filename template.
pub const VOD_PLACEHOLDERS: &[&str] = &[
    "username",
    "stream_started",
    "download_started",
    "uploaded",
    "escaped_title",
];

/// Template parsing/rendering errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unclosed '{{' in template")]
    UnclosedBrace,
}

/// Sanitize a string for use in filenames across platforms.
///
/// Control characters and characters invalid on Windows are each replaced
/// with an underscore, leading/trailing spaces and dots are trimmed, and
/// Windows reserved device names get a leading underscore. The replacement
/// is deterministic: the same input always yields the same output.
pub fn sanitize_filename(input: &str) -> String {
    if input.is_empty() {
        return "unnamed".to_string();
    }

    let result: String = input
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{}.", reserved)) {
            return format!("_{}", trimmed);
        }
    }

    trimmed.to_string()
}

/// Truncate an over-long title, keeping the first 75 characters plus `..`.
pub fn truncate_title(s: &str) -> String {
    if s.chars().count() > MAX_TITLE_LEN {
        let head: String = s.chars().take(MAX_TITLE_LEN - 2).collect();
        format!("{}..", head)
    } else {
        s.to_string()
    }
}

/// Validate that a template only uses the allowed placeholders.
pub fn validate_template(template: &str, allowed: &[&str]) -> Result<(), TemplateError> {
    for token in placeholder_names(template)? {
        if !allowed.contains(&token.as_str()) {
            return Err(TemplateError::UnknownPlaceholder(token));
        }
    }
    Ok(())
}

/// Render a template by substituting `{name}` placeholders from `values`.
///
/// Placeholders not present in `values` are an error; templates are
/// expected to have been validated at config load, so hitting one here
/// indicates a programming error rather than bad user input.
pub fn render_template(
    template: &str,
    values: &[(&str, &str)],
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }

        let mut name = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => name.push(c),
                None => return Err(TemplateError::UnclosedBrace),
            }
        }

        match values.iter().find(|(k, _)| *k == name) {
            Some((_, v)) => out.push_str(v),
            None => return Err(TemplateError::UnknownPlaceholder(name)),
        }
    }

    Ok(out)
}

/// List the placeholder names appearing in a template.
fn placeholder_names(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names = Vec::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '{' {
            continue;
        }
        let mut name = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(c) => name.push(c),
                None => return Err(TemplateError::UnclosedBrace),
            }
        }
        names.push(name);
    }

    Ok(names)
}

/// Return `path`, or the first `path (n)` variant that does not exist yet.
///
/// Matches the behavior users expect from download tools: a second
/// recording of the same stream never overwrites the first.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for n in 1u32.. {
        let file_name = match &ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
    }

    unreachable!("u32 range exhausted while deduplicating {}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_invalid_characters_replaced() {
        assert_eq!(sanitize_filename("hello/world"), "hello_world");
        assert_eq!(sanitize_filename("a:b*c?"), "a_b_c_");
        assert_eq!(sanitize_filename("file<name>test"), "file_name_test");
    }

    #[test]
    fn test_replacement_is_deterministic() {
        let input = "live: day 3/7 | what?";
        assert_eq!(sanitize_filename(input), sanitize_filename(input));
    }

    #[test]
    fn test_windows_reserved_names() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("nul.exe"), "_nul.exe");
    }

    #[test]
    fn test_leading_trailing_spaces_and_dots() {
        assert_eq!(sanitize_filename("  hello  "), "hello");
        assert_eq!(sanitize_filename("...hello..."), "hello");
    }

    #[test]
    fn test_korean_title_preserved() {
        assert_eq!(sanitize_filename("안녕하세요 방송"), "안녕하세요 방송");
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short"), "short");

        let long: String = std::iter::repeat('x').take(100).collect();
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), 77);
        assert!(truncated.ends_with(".."));
    }

    #[test]
    fn test_truncate_title_multibyte() {
        let long: String = std::iter::repeat('가').take(100).collect();
        let truncated = truncate_title(&long);
        assert_eq!(truncated.chars().count(), 77);
    }

    #[test]
    fn test_render_live_template() {
        let rendered = render_template(
            "[{username}]{stream_started}_{escaped_title}.ts",
            &[
                ("username", "foo"),
                ("stream_started", "24-01-01 10_00_00"),
                ("escaped_title", "hello world"),
            ],
        )
        .unwrap();
        assert_eq!(rendered, "[foo]24-01-01 10_00_00_hello world.ts");
    }

    #[test]
    fn test_render_template_with_sanitized_title() {
        let title = sanitize_filename("hello/world");
        let rendered =
            render_template("{escaped_title}.ts", &[("escaped_title", &title)]).unwrap();
        assert_eq!(rendered, "hello_world.ts");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let err = render_template("{nope}", &[("username", "foo")]).unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("nope".to_string()));
    }

    #[test]
    fn test_render_unclosed_brace() {
        let err = render_template("{username", &[("username", "foo")]).unwrap_err();
        assert_eq!(err, TemplateError::UnclosedBrace);
    }

    #[test]
    fn test_validate_template() {
        assert!(validate_template("[{username}]{escaped_title}", LIVE_PLACEHOLDERS).is_ok());
        assert_eq!(
            validate_template("{uploaded}", LIVE_PLACEHOLDERS),
            Err(TemplateError::UnknownPlaceholder("uploaded".to_string()))
        );
        assert!(validate_template("{uploaded}", VOD_PLACEHOLDERS).is_ok());
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");

        assert_eq!(unique_path(&base), base);

        std::fs::write(&base, b"x").unwrap();
        let second = unique_path(&base);
        assert_eq!(second, dir.path().join("rec (1).ts"));

        std::fs::write(&second, b"x").unwrap();
        assert_eq!(unique_path(&base), dir.path().join("rec (2).ts"));
    }
}
