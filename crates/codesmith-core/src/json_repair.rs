//! Lenient parsing of model JSON.
//!
//! Models wrap JSON in markdown fences, add prose around it, leave trailing
//! commas, or stop mid-object when they hit a token limit. [`parse_lenient`]
//! tries progressively more invasive fixes before giving up.

use serde::de::DeserializeOwned;

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening fence line.
    let body = match rest.find('\n') {
        Some(nl) if rest[..nl].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[nl + 1..],
        _ => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` to its matching `}`, or to the end of input when
/// the object is never closed.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Best-effort syntactic repair.
///
/// Normalizes smart quotes, drops trailing commas and stray closers, closes
/// an unterminated string, and appends missing `}` / `]` in nesting order.
/// Pure; never fails. The output is not guaranteed to be valid JSON.
pub fn repair(text: &str) -> String {
    let text = text
        .replace(|c: char| c == '\u{201C}' || c == '\u{201D}', "\"")
        .replace(|c: char| c == '\u{2018}' || c == '\u{2019}', "'");

    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            } else if c == '\n' {
                out.push_str("\\n");
                continue;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if !closers.contains(&c) {
                    continue;
                }
                while let Some(close) = closers.pop() {
                    trim_trailing_comma(&mut out);
                    out.push(close);
                    if close == c {
                        break;
                    }
                }
            }
            c if c.is_control() && c != '\n' && c != '\t' && c != '\r' => {}
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    if out.ends_with(':') {
        out.push_str("null");
    }
    while let Some(close) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(close);
    }
    out
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}

/// Parse `T` from model output, repairing as needed.
///
/// Attempts in order: the fence-stripped text, the extracted object, and the
/// repaired object. Returns the first parse error when all fail.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let clean = strip_markdown_fences(text);
    let first_err = match serde_json::from_str::<T>(clean) {
        Ok(v) => return Ok(v),
        Err(e) => e.to_string(),
    };
    let Some(object) = extract_object(clean) else {
        return Err(first_err);
    };
    if let Ok(v) = serde_json::from_str::<T>(object) {
        return Ok(v);
    }
    serde_json::from_str::<T>(&repair(object)).map_err(|_| first_err)
}
