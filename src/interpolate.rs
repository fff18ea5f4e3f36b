//! Variable interpolation for outbound text.
//!
//! Substitution syntax is `{{name}}`. Rendering is a single left-to-right
//! pass: a substituted value is never re-scanned for further `{{...}}`
//! tokens, so a contact answering with `{{admin_token}}` cannot trigger a
//! second round of substitution. Missing variables are emitted as the
//! literal token unchanged, which keeps operator typos visible in
//! transcripts instead of silently blanking them.
//!
//! # Examples
//!
//! ```
//! use chatflow::interpolate::render;
//! use rustc_hash::FxHashMap;
//!
//! let mut vars = FxHashMap::default();
//! vars.insert("name".to_string(), "João".to_string());
//!
//! assert_eq!(render("Hello {{name}}!", &vars), "Hello João!");
//! assert_eq!(render("Hi {{missing}}", &vars), "Hi {{missing}}");
//! ```

use rustc_hash::FxHashMap;

/// Render a template against the conversation's variable set.
///
/// Tokens are `{{name}}` with optional interior whitespace (`{{ name }}`).
/// Unterminated `{{` sequences are copied through verbatim.
#[must_use]
pub fn render(template: &str, variables: &FxHashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let raw_name = &after_open[..close];
                let name = raw_name.trim();
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    // Literal passthrough, normalized to the raw token.
                    None => {
                        out.push_str("{{");
                        out.push_str(raw_name);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // No closing braces anywhere ahead; emit the tail as-is.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Collect the distinct variable names referenced by a template, in order of
/// first appearance. Useful for authoring-side lint checks.
#[must_use]
pub fn referenced_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        let name = after_open[..close].trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after_open[close + 2..];
    }
    names
}
