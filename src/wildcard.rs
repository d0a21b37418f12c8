//! Shell-style wildcard matching
//!
//! `*` matches any run of characters (including none) and `?` matches exactly
//! one character. Everything else matches literally. The whole text must
//! match.

use regex::Regex;

/// Compile a wildcard pattern into an anchored regex
fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut literal = String::new();

    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                re.push_str(&regex::escape(&literal));
                literal.clear();
                re.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    re.push_str(&regex::escape(&literal));
    re.push('$');

    Regex::new(&re)
}

/// Whether `text` matches the wildcard `pattern`
pub fn is_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return pattern == text;
    }
    compile(pattern).is_ok_and(|re| re.is_match(text))
}
