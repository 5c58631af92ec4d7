//! Case-escaping for module identifiers.
//!
//! Module paths are case-sensitive but end up as path segments on
//! case-insensitive filesystems, so every uppercase ASCII letter is
//! rewritten as `!` followed by its lowercase form
//! (`github.com/Azure` becomes `github.com/!azure`).  The mapping is
//! reversible as long as the input itself never contains `!`; inputs that
//! do are passed through unguarded and the encoded form becomes ambiguous.

/// Escape every uppercase ASCII letter as `!` plus its lowercase form.
///
/// All other characters pass through unchanged, including non-ASCII ones.
/// Pure and total: always terminates, never fails.
pub fn encode_bangs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
