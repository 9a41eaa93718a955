//! Custom action delimiters.
//!
//! Templates are compiled by tera, whose expression tags are `{{ ... }}`.
//! When a definition configures another pair, sources are rewritten before
//! parsing: text inside the custom pair becomes a tera expression, and the
//! tera openers `{{`, `{%` and `{#` outside it are emitted verbatim.
//!
//! Only expressions are remapped. Control blocks (`if`, `for`) keep tera's
//! `{% ... %}` syntax only under the default pair; with a custom pair, put
//! branching in helpers or in the data.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

const DEFAULT_LEFT: &str = "{{";
const DEFAULT_RIGHT: &str = "}}";
const TERA_OPENERS: [(&str, &str); 3] = [
    ("{{", "{{ \"{{\" }}"),
    ("{%", "{{ \"{%\" }}"),
    ("{#", "{{ \"{#\" }}"),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            left: DEFAULT_LEFT.to_string(),
            right: DEFAULT_RIGHT.to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.left == DEFAULT_LEFT && self.right == DEFAULT_RIGHT
    }

    /// Rewrite `source` into tera's native expression syntax.
    ///
    /// Fails with a description when an action is left unclosed.
    pub fn translate<'a>(&self, source: &'a str) -> Result<Cow<'a, str>, String> {
        if self.is_default() || self.left.is_empty() || self.right.is_empty() {
            return Ok(Cow::Borrowed(source));
        }

        let mut out = String::with_capacity(source.len());
        let mut rest = source;
        while let Some(start) = rest.find(&self.left) {
            push_literal(&mut out, &rest[..start]);
            let action = &rest[start + self.left.len()..];
            let end = action.find(&self.right).ok_or_else(|| {
                let line = source[..source.len() - rest.len() + start].matches('\n').count() + 1;
                format!("unclosed action starting with `{}` on line {line}", self.left)
            })?;
            out.push_str(DEFAULT_LEFT);
            out.push_str(&action[..end]);
            out.push_str(DEFAULT_RIGHT);
            rest = &action[end + self.right.len()..];
        }
        push_literal(&mut out, rest);
        Ok(Cow::Owned(out))
    }
}

fn push_literal(out: &mut String, text: &str) {
    let mut rest = text;
    while let Some(at) = rest.find('{') {
        out.push_str(&rest[..at]);
        let tail = &rest[at..];
        match TERA_OPENERS.iter().find(|(opener, _)| tail.starts_with(*opener)) {
            Some((opener, escaped)) => {
                out.push_str(escaped);
                rest = &tail[opener.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
}
