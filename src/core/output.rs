//! Bounded rendering of untrusted text for log lines and stderr.

/// Collapse whitespace, escape control characters and cap the length.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let mut escaped = String::with_capacity(input.len());
    for word in input.split_whitespace() {
        if !escaped.is_empty() {
            escaped.push(' ');
        }
        for c in word.chars() {
            if c.is_control() {
                escaped.extend(c.escape_default());
            } else {
                escaped.push(c);
            }
        }
    }
    let mut chars = escaped.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}
