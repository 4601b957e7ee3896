//! Sanitizer
//!
//! Turns the generator's raw text into a plain candidate query. Makes no
//! safety decision and never fails; an empty result is for the validator to
//! reject.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?is)```sql(.*?)```").unwrap();
}

/// Normalize raw generated text into a candidate query string.
pub fn sanitize(raw: &str) -> String {
    let printable = to_printable_ascii(raw);
    let trimmed = printable.trim();

    let candidate = match SQL_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => trimmed,
    };

    // Comments go while line breaks still end them.
    join_lines(&strip_comments(candidate)).trim().to_string()
}

/// Keep printable ASCII and line breaks. Any other whitespace becomes a
/// space so that neighbouring tokens stay separate.
fn to_printable_ascii(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| match c {
            '\n' | '\r' => Some(c),
            ' '..='~' => Some(c),
            c if c.is_whitespace() => Some(' '),
            _ => None,
        })
        .collect()
}

fn join_lines(sql: &str) -> String {
    sql.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Remove `--` line comments and `/* */` block comments that sit outside
/// string literals and quoted identifiers. An unterminated block comment
/// runs to the end of the text.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                while chars.peek().map_or(false, |next| *next != '\n' && *next != '\r') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}
