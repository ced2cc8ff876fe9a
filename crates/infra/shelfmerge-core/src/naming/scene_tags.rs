use crate::error::Result;
use crate::naming::TitleNormalizer;
use regex::Regex;
use std::collections::HashSet;

/// Strips configured scene-tag tokens from titles.
///
/// A scene tag is a bracketed token such as `[Official]`, `(Color)` or
/// `{Digital}` whose inner text, token-normalized, appears in the configured
/// tag set. Only non-nested bracket groups are considered.
#[derive(Debug)]
pub struct SceneTagMatcher {
    tag_keys: HashSet<String>,
    bracketed: Regex,
}

impl SceneTagMatcher {
    pub fn new(tags: &[String], normalizer: &TitleNormalizer) -> Result<Self> {
        let tag_keys = tags
            .iter()
            .map(|t| normalizer.token_key(t))
            .filter(|k| !k.is_empty())
            .collect();
        let bracketed =
            Regex::new(r"[\[({][^\[\](){}]*[\])}]").map_err(anyhow::Error::from)?;
        Ok(Self { tag_keys, bracketed })
    }

    pub fn is_empty(&self) -> bool {
        self.tag_keys.is_empty()
    }

    /// Remove every bracketed token whose inner text matches a configured
    /// tag. Returns `None` when nothing was stripped or stripping would
    /// leave an empty title.
    pub fn strip(&self, raw: &str, normalizer: &TitleNormalizer) -> Option<String> {
        if self.tag_keys.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(raw.len());
        let mut last = 0;
        let mut stripped_any = false;
        for m in self.bracketed.find_iter(raw) {
            let inner = &raw[m.start() + 1..m.end() - 1];
            if self.tag_keys.contains(&normalizer.token_key(inner)) {
                out.push_str(&raw[last..m.start()]);
                last = m.end();
                stripped_any = true;
            }
        }
        if !stripped_any {
            return None;
        }
        out.push_str(&raw[last..]);

        let collapsed = collapse_whitespace(&out);
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            pending = true;
        } else {
            if pending && !out.is_empty() {
                out.push(' ');
            }
            pending = false;
            out.push(c);
        }
    }
    out
}
