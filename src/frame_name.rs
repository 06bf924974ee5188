//! Resolves image sequence patterns to concrete frame paths.
//!
//! Two padding conventions are understood:
//!
//! * a run of `#` characters, replaced by the zero padded frame number
//!   (`shot.####.exr` -> `shot.0007.exr`). Only the first run is substituted.
//! * a printf style `%0Nd` token (`shot.%04d.exr`, also `%Nd` and `%d`). `%%` is a
//!   literal percent sign. A pattern that cannot be formatted is used literally.
//!
//! Any other pattern names a single file and is returned unchanged.

use std::path::PathBuf;

/// Concrete path of `frame` in the sequence described by `pattern`.
///
/// # Examples
///
/// ```rust
/// use distortion_tools::frame_name::resolve_frame_path;
/// use std::path::PathBuf;
///
/// assert_eq!(resolve_frame_path("shot.####.exr", 7), PathBuf::from("shot.0007.exr"));
/// assert_eq!(resolve_frame_path("shot.%05d.png", 42), PathBuf::from("shot.00042.png"));
/// assert_eq!(resolve_frame_path("still.png", 3), PathBuf::from("still.png"));
/// ```
pub fn resolve_frame_path(pattern: &str, frame: i64) -> PathBuf {
    PathBuf::from(resolve_frame_name(pattern, frame))
}

/// String form of [`resolve_frame_path`].
pub fn resolve_frame_name(pattern: &str, frame: i64) -> String {
    if let Some(start) = pattern.find('#') {
        let run = pattern[start..]
            .find(|c: char| c != '#')
            .unwrap_or(pattern.len() - start);
        if run > u16::MAX as usize {
            return pattern.to_string();
        }
        return format!(
            "{}{:0width$}{}",
            &pattern[..start],
            frame,
            &pattern[start + run..],
            width = run
        );
    }

    if pattern.contains('%') {
        if let Some(name) = format_printf(pattern, frame) {
            return name;
        }
    }

    pattern.to_string()
}

/// Formats a pattern holding exactly one `%d` conversion with optional zero padding
/// and width. Returns `None` for anything else.
fn format_printf(pattern: &str, frame: i64) -> Option<String> {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut substituted = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let zero_pad = chars.next_if_eq(&'0').is_some();
        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
            width = width.checked_mul(10)?.checked_add(digit as usize)?;
            chars.next();
        }
        // Wider fields cannot be expressed as a format width.
        if width > u16::MAX as usize {
            return None;
        }

        match chars.next() {
            Some('d') | Some('i') if !substituted => {
                if zero_pad {
                    out.push_str(&format!("{frame:0width$}"));
                } else {
                    out.push_str(&format!("{frame:width$}"));
                }
                substituted = true;
            }
            _ => return None,
        }
    }

    substituted.then_some(out)
}
