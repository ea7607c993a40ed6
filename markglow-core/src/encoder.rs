//! Lossless text encoding for `chunk` event payloads.

/// Encode `text` as a JSON string literal.
///
/// Backslash is escaped first so the backslashes introduced by later
/// substitutions are not escaped again. Remaining C0 control characters are
/// written as `\u00XX` so the literal is always valid JSON.
pub fn encode(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");

    let mut out = String::with_capacity(escaped.len() + 2);
    out.push('"');
    for c in escaped.chars() {
        if c < '\u{20}' {
            out.push_str(&format!("\\u{:04x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out.push('"');
    out
}
