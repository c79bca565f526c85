//! Sanitization of caller-supplied and worker-supplied text.
//!
//! Every free-text value that crosses into a worker request or out of a worker
//! response passes through one of these functions.

/// Single-line text: markup stripped, control characters removed, runs of
/// whitespace (including line breaks) collapsed to one space, trimmed.
pub fn text(input: &str) -> String {
    collapse_line(&strip_tags(input))
}

/// Multi-line text: like [`text`] but line breaks survive. Blank lines at the
/// start and end are dropped; interior blank lines are kept.
pub fn textarea(input: &str) -> String {
    let stripped = strip_tags(input).replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = stripped.split('\n').map(collapse_line).collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new(),
    }
}

/// An absolute `http` or `https` URL with a host, normalised by the URL parser.
pub fn url(input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("url is empty".to_string());
    }
    let parsed = url::Url::parse(trimmed).map_err(|e| format!("'{trimmed}' is not a valid URL: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("scheme '{}' is not http or https", parsed.scheme()));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(format!("'{trimmed}' has no host"));
    }
    Ok(parsed.to_string())
}

fn collapse_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for c in input.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

/// Removes markup tags. The contents of `script` and `style` elements go too.
/// A `<` that does not open a tag (as in `a < b`) is kept.
fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let opens_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        if !opens_tag {
            out.push('<');
            rest = after;
            continue;
        }
        let Some(end) = after.find('>') else {
            rest = "";
            break;
        };
        let name = after[..end]
            .chars()
            .take_while(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        rest = &after[end + 1..];
        if name == "script" || name == "style" {
            let closing = format!("</{name}");
            rest = match rest.to_ascii_lowercase().find(&closing) {
                Some(idx) => &rest[idx..],
                None => "",
            };
        }
    }
    out.push_str(rest);
    out
}
