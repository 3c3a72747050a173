//! Tag spelling normalization.
//!
//! The YAML loader resolves `!!` tags against the core schema and silently drops the
//! ones it does not know, so a `!!js/function` scalar would load as a plain string.
//! Before parsing, the secondary handle is rewritten to the local `!js/function` tag,
//! which reaches the document converter intact. Only tags in node position are touched:
//! quoted scalars, comments and block scalar bodies are copied unchanged.

use std::borrow::Cow;

const SECONDARY_TAG: &str = "!!js/function";
const LOCAL_TAG: &str = "!js/function";

/// Rewrite `!!js/function` node tags to `!js/function`.
pub fn normalize_function_tags(text: &str) -> Cow<'_, str> {
    if !text.contains(SECONDARY_TAG) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut scanner = TagScanner::default();
    for line in text.split_inclusive('\n') {
        scanner.line(line, &mut out);
    }
    Cow::Owned(out)
}

#[derive(Default)]
struct TagScanner {
    /// Open quote of a scalar continuing onto the next line
    quote: Option<u8>,
    /// Indent a line must exceed to stay inside the current block scalar
    block_parent: Option<usize>,
}

impl TagScanner {
    fn line(&mut self, line: &str, out: &mut String) {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if let Some(parent) = self.block_parent {
            if line.trim().is_empty() || indent > parent {
                out.push_str(line);
                return;
            }
            self.block_parent = None;
        }

        let bytes = line.as_bytes();
        let mut copied = 0;
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            match self.quote {
                Some(b'\'') => {
                    if byte == b'\'' {
                        if bytes.get(i + 1) == Some(&b'\'') {
                            i += 1;
                        } else {
                            self.quote = None;
                        }
                    }
                }
                Some(_) => {
                    if byte == b'\\' {
                        i += 1;
                    } else if byte == b'"' {
                        self.quote = None;
                    }
                }
                None => {
                    let at_token =
                        i == 0 || matches!(bytes[i - 1], b' ' | b'\t' | b'[' | b'{' | b',');
                    match byte {
                        b'#' if i == 0 || matches!(bytes[i - 1], b' ' | b'\t') => break,
                        b'\'' | b'"' if at_token => self.quote = Some(byte),
                        b'!' if at_token && is_secondary_tag(&line[i..]) => {
                            out.push_str(&line[copied..i]);
                            out.push_str(LOCAL_TAG);
                            i += SECONDARY_TAG.len();
                            copied = i;
                            continue;
                        }
                        b'|' | b'>' if at_token && opens_block(&line[i + 1..]) => {
                            self.block_parent = Some(block_parent(line, indent, i));
                            break;
                        }
                        _ => {}
                    }
                }
            }
            i += 1;
        }
        out.push_str(&line[copied..]);
    }
}

fn is_secondary_tag(rest: &str) -> bool {
    rest.strip_prefix(SECONDARY_TAG).is_some_and(|after| {
        after
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || matches!(c, ',' | ']' | '}'))
    })
}

/// Whether the text after a `|` or `>` makes it a block scalar header.
fn opens_block(rest: &str) -> bool {
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit() || c == '+' || c == '-');
    let trimmed = rest.trim();
    trimmed.is_empty() || (rest.starts_with([' ', '\t']) && trimmed.starts_with('#'))
}

/// Indent of the node owning a block scalar whose indicator sits at byte `at`: the key's
/// column for a mapping value, the line indent for a sequence entry or a document root.
fn block_parent(line: &str, indent: usize, at: usize) -> usize {
    let mut column = indent;
    while let Some(rest) = line[column..].strip_prefix('-') {
        if !rest.starts_with([' ', '\t']) {
            break;
        }
        column = line.len() - rest.trim_start_matches([' ', '\t']).len();
    }
    let owner = &line[column..at];
    if owner.contains(": ") || owner.contains(":\t") {
        column
    } else {
        indent
    }
}
