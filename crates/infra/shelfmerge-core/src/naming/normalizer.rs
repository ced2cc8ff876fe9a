use std::collections::HashMap;
use std::sync::Mutex;

/// Entries per cache before the whole cache is dropped and rebuilt.
/// Title sets are small; the cap only guards pathological inputs.
const CACHE_CAP: usize = 4096;

/// Normalizes raw directory names into comparison keys.
///
/// Two shapes are produced:
/// - title keys: lowercase, letters and digits only ("The Manga-Alpha!" ->
///   "themangaalpha") — the grouping identity;
/// - token keys: lowercase words separated by single spaces ("The  Manga
///   Alpha" -> "the manga alpha") — used by the scene-tag matcher.
///
/// Both are idempotent and cached.
#[derive(Debug, Default)]
pub struct TitleNormalizer {
    title_keys: Mutex<HashMap<String, String>>,
    token_keys: Mutex<HashMap<String, String>>,
}

impl TitleNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title_key(&self, raw: &str) -> String {
        cached(&self.title_keys, raw, normalize_title_key)
    }

    pub fn token_key(&self, raw: &str) -> String {
        cached(&self.token_keys, raw, normalize_token_key)
    }
}

fn cached(
    cache: &Mutex<HashMap<String, String>>,
    raw: &str,
    compute: fn(&str) -> String,
) -> String {
    if let Ok(map) = cache.lock()
        && let Some(hit) = map.get(raw)
    {
        return hit.clone();
    }
    let value = compute(raw);
    if let Ok(mut map) = cache.lock() {
        if map.len() >= CACHE_CAP {
            map.clear();
        }
        map.insert(raw.to_string(), value.clone());
    }
    value
}

/// Lowercase, keep only letters and digits (Unicode-aware).
pub fn normalize_title_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lowercase, keep letters and digits, collapse everything else into single
/// word separators.
pub fn normalize_token_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn title_key_drops_punctuation_and_case() {
        assert_eq!(normalize_title_key("The Manga-Alpha!"), "themangaalpha");
        assert_eq!(normalize_title_key("Manga Alpha"), "mangaalpha");
        assert_eq!(normalize_title_key("  "), "");
    }

    #[test]
    fn title_key_is_unicode_aware() {
        assert_eq!(normalize_title_key("Café Crème"), "cafécrème");
        assert_eq!(normalize_title_key("進撃の巨人"), "進撃の巨人");
    }

    #[test]
    fn title_key_is_idempotent() {
        let once = normalize_title_key("The Manga Alpha [Official]");
        assert_eq!(normalize_title_key(&once), once);
    }

    #[test]
    fn token_key_collapses_separators() {
        assert_eq!(normalize_token_key("The  Manga -- Alpha"), "the manga alpha");
        assert_eq!(normalize_token_key("(Color)"), "color");
        assert_eq!(normalize_token_key("***"), "");
    }

    #[test]
    fn token_key_is_idempotent() {
        let once = normalize_token_key("Digital (Color) v2");
        assert_eq!(normalize_token_key(&once), once);
    }

    #[test]
    fn cached_values_match_uncached() {
        let normalizer = TitleNormalizer::new();
        assert_eq!(
            normalizer.title_key("The Manga Alpha"),
            normalize_title_key("The Manga Alpha")
        );
        // Second call comes from the cache.
        assert_eq!(normalizer.title_key("The Manga Alpha"), "themangaalpha");
        assert_eq!(
            normalizer.token_key("The Manga Alpha"),
            "the manga alpha"
        );
    }
}
