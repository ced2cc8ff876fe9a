use crate::config::EquivalentsDoc;
use crate::error::{MergeError, Result};
use crate::naming::{SceneTagMatcher, TitleNormalizer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Maps raw titles to canonical display names through the alias table.
///
/// Built once per pass set-up from `manga_equivalents.yml`. Construction
/// fails on any ambiguity: two canonicals sharing a normalized key, or one
/// alias claimed by two different canonicals. Groups are therefore disjoint
/// by construction.
#[derive(Debug)]
pub struct EquivalenceService {
    canonical_by_key: HashMap<String, String>,
    normalizer: Arc<TitleNormalizer>,
    matcher: Option<SceneTagMatcher>,
    stripped_cache: Mutex<HashMap<String, Option<String>>>,
}

impl EquivalenceService {
    pub fn new(
        doc: &EquivalentsDoc,
        normalizer: Arc<TitleNormalizer>,
        matcher: Option<SceneTagMatcher>,
    ) -> Result<Self> {
        let mut canonical_by_key: HashMap<String, String> = HashMap::new();

        for (canonical, aliases) in &doc.groups {
            let key = normalizer.title_key(canonical);
            if key.is_empty() {
                return Err(MergeError::ConfigConflict {
                    message: format!("canonical '{canonical}' normalizes to an empty key"),
                });
            }
            insert_mapping(&mut canonical_by_key, key, canonical, canonical)?;
            expand_variants(
                &mut canonical_by_key,
                canonical,
                canonical,
                &normalizer,
                matcher.as_ref(),
            )?;

            for alias in aliases {
                let alias_key = normalizer.title_key(alias);
                if alias_key.is_empty() {
                    return Err(MergeError::ConfigConflict {
                        message: format!(
                            "alias '{alias}' of canonical '{canonical}' normalizes to an empty key"
                        ),
                    });
                }
                insert_mapping(&mut canonical_by_key, alias_key, canonical, alias)?;
                expand_variants(
                    &mut canonical_by_key,
                    alias,
                    canonical,
                    &normalizer,
                    matcher.as_ref(),
                )?;
            }
        }

        Ok(Self {
            canonical_by_key,
            normalizer,
            matcher,
            stripped_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a raw title to its canonical display name, if grouped.
    ///
    /// An input that normalizes to an empty key never resolves. When a
    /// scene-tag matcher is configured, the matcher-stripped variant of the
    /// input is tried as well (and cached per raw input).
    pub fn try_resolve_canonical(&self, raw: &str) -> Option<String> {
        let key = self.normalizer.title_key(raw);
        if key.is_empty() {
            return None;
        }
        if let Some(canonical) = self.canonical_by_key.get(&key) {
            return Some(canonical.clone());
        }

        let matcher = self.matcher.as_ref()?;
        let stripped = {
            if let Ok(cache) = self.stripped_cache.lock()
                && let Some(hit) = cache.get(raw)
            {
                hit.clone()
            } else {
                let computed = matcher.strip(raw, &self.normalizer);
                if let Ok(mut cache) = self.stripped_cache.lock() {
                    cache.insert(raw.to_string(), computed.clone());
                }
                computed
            }
        };
        let stripped = stripped?;
        self.canonical_by_key
            .get(&self.normalizer.title_key(&stripped))
            .cloned()
    }
}

fn insert_mapping(
    map: &mut HashMap<String, String>,
    key: String,
    canonical: &str,
    origin: &str,
) -> Result<()> {
    if let Some(existing) = map.get(&key) {
        if existing != canonical {
            return Err(MergeError::ConfigConflict {
                message: format!(
                    "'{origin}' maps to both '{existing}' and '{canonical}' (normalized key '{key}')"
                ),
            });
        }
        return Ok(());
    }
    map.insert(key, canonical.to_string());
    Ok(())
}

fn expand_variants(
    map: &mut HashMap<String, String>,
    raw: &str,
    canonical: &str,
    normalizer: &TitleNormalizer,
    matcher: Option<&SceneTagMatcher>,
) -> Result<()> {
    if let Some(matcher) = matcher
        && let Some(stripped) = matcher.strip(raw, normalizer)
    {
        let key = normalizer.title_key(&stripped);
        if !key.is_empty() {
            insert_mapping(map, key, canonical, raw)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(groups: &[(&str, &[&str])]) -> EquivalentsDoc {
        let mut map = BTreeMap::new();
        for (canonical, aliases) in groups {
            map.insert(
                (*canonical).to_string(),
                aliases.iter().map(|a| (*a).to_string()).collect(),
            );
        }
        EquivalentsDoc { groups: map }
    }

    fn service(groups: &[(&str, &[&str])]) -> Result<EquivalenceService> {
        EquivalenceService::new(&doc(groups), Arc::new(TitleNormalizer::new()), None)
    }

    #[test]
    fn resolves_canonical_and_aliases() {
        let svc = service(&[("Manga Alpha", &["The Manga Alpha", "Manga-Alpha"])]).unwrap();
        assert_eq!(
            svc.try_resolve_canonical("manga alpha"),
            Some("Manga Alpha".to_string())
        );
        assert_eq!(
            svc.try_resolve_canonical("The Manga Alpha"),
            Some("Manga Alpha".to_string())
        );
        assert_eq!(
            svc.try_resolve_canonical("MANGA-ALPHA"),
            Some("Manga Alpha".to_string())
        );
        assert_eq!(svc.try_resolve_canonical("Manga Beta"), None);
    }

    #[test]
    fn empty_input_never_resolves() {
        let svc = service(&[("Manga Alpha", &[])]).unwrap();
        assert_eq!(svc.try_resolve_canonical(""), None);
        assert_eq!(svc.try_resolve_canonical("!!!"), None);
    }

    #[test]
    fn conflicting_alias_fails_construction() {
        let err = service(&[("A", &["x"]), ("B", &["x"])]).unwrap_err();
        assert!(matches!(err, MergeError::ConfigConflict { .. }));
        assert!(format!("{err}").contains('x'));
    }

    #[test]
    fn duplicate_canonical_key_fails_construction() {
        let err = service(&[("Manga Alpha", &[]), ("manga-alpha", &[])]).unwrap_err();
        assert!(matches!(err, MergeError::ConfigConflict { .. }));
    }

    #[test]
    fn alias_repeated_within_group_is_fine() {
        let svc = service(&[("Manga Alpha", &["manga alpha", "Manga-Alpha"])]).unwrap();
        assert_eq!(
            svc.try_resolve_canonical("Manga Alpha"),
            Some("Manga Alpha".to_string())
        );
    }

    #[test]
    fn matcher_aware_resolution_strips_scene_tags() {
        let normalizer = Arc::new(TitleNormalizer::new());
        let matcher =
            SceneTagMatcher::new(&["Official".to_string()], &normalizer).unwrap();
        let svc = EquivalenceService::new(
            &doc(&[("Manga Alpha", &["The Manga Alpha"])]),
            Arc::clone(&normalizer),
            Some(matcher),
        )
        .unwrap();

        assert_eq!(
            svc.try_resolve_canonical("The Manga Alpha [Official]"),
            Some("Manga Alpha".to_string())
        );
        // Cached second lookup takes the same path.
        assert_eq!(
            svc.try_resolve_canonical("The Manga Alpha [Official]"),
            Some("Manga Alpha".to_string())
        );
    }
}
