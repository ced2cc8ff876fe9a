use crate::snapshot::types::{MountSnapshotEntry, SnapshotWarning, WARN_SNAPSHOT_LINE};
use crate::utils::paths::mountpoint_key;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;

const EXPECTED_KEYS: [&str; 4] = ["TARGET", "FSTYPE", "SOURCE", "OPTIONS"];

/// Parse `KEY="value"` pairs output from the mount-listing tool.
///
/// Values use octal `\NNN` escapes for whitespace and backslash; inside
/// quotes a backslash escapes the following character, so the value ends at
/// the first unescaped `"`. Lines missing any of the four expected keys are
/// skipped with a `MOUNT-SNAP-002` warning. Entries are deduplicated by
/// mountpoint (first occurrence wins) and sorted by mountpoint.
pub fn parse_pairs_output(raw: &str) -> (Vec<MountSnapshotEntry>, Vec<SnapshotWarning>) {
    let mut entries: Vec<MountSnapshotEntry> = Vec::new();
    let mut warnings: Vec<SnapshotWarning> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_line(trimmed) {
            Some(fields) => {
                let mountpoint = PathBuf::from(&fields["TARGET"]);
                if seen.insert(mountpoint_key(&mountpoint)) {
                    entries.push(MountSnapshotEntry {
                        mountpoint,
                        fs_type: fields["FSTYPE"].clone(),
                        source: fields["SOURCE"].clone(),
                        options: fields["OPTIONS"].clone(),
                        healthy: None,
                    });
                }
            }
            None => warnings.push(SnapshotWarning {
                code: WARN_SNAPSHOT_LINE,
                message: format!("skipping malformed mount line: {}", snippet(trimmed)),
            }),
        }
    }

    entries.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
    (entries, warnings)
}

fn snippet(line: &str) -> &str {
    let end = line
        .char_indices()
        .nth(120)
        .map_or(line.len(), |(idx, _)| idx);
    &line[..end]
}

/// Parse one line of `KEY="value"` tokens. Returns `None` unless every
/// expected key is present exactly as specified.
fn parse_line(line: &str) -> Option<HashMap<String, String>> {
    let mut fields = HashMap::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        // KEY
        let mut key_end = start;
        loop {
            match chars.peek() {
                Some(&(idx, '=')) => {
                    key_end = idx;
                    chars.next();
                    break;
                }
                Some(&(_, c)) if c.is_ascii_alphanumeric() || c == '_' || c == '-' => {
                    chars.next();
                }
                _ => return None,
            }
        }
        let key = &line[start..key_end];
        if key.is_empty() {
            return None;
        }

        // Opening quote
        match chars.next() {
            Some((_, '"')) => {}
            _ => return None,
        }

        // Quoted value with backslash-parity tracking
        let mut value_bytes: Vec<u8> = Vec::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '"' => {
                    closed = true;
                    break;
                }
                '\\' => {
                    let Some((_, next)) = chars.next() else {
                        return None;
                    };
                    // \NNN octal escapes encode whitespace and backslash
                    if next.is_digit(8) {
                        let mut code = next.to_digit(8)?;
                        for _ in 0..2 {
                            match chars.peek() {
                                Some(&(_, d)) if d.is_digit(8) => {
                                    code = code * 8 + d.to_digit(8)?;
                                    chars.next();
                                }
                                _ => break,
                            }
                        }
                        value_bytes.push(code as u8);
                    } else {
                        let mut utf8 = [0u8; 4];
                        value_bytes.extend_from_slice(next.encode_utf8(&mut utf8).as_bytes());
                    }
                }
                other => {
                    let mut utf8 = [0u8; 4];
                    value_bytes.extend_from_slice(other.encode_utf8(&mut utf8).as_bytes());
                }
            }
        }
        if !closed {
            return None;
        }

        fields.insert(
            key.to_string(),
            String::from_utf8_lossy(&value_bytes).into_owned(),
        );
    }

    if EXPECTED_KEYS.iter().all(|k| fields.contains_key(*k)) {
        Some(fields)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_well_formed_lines() {
        let raw = concat!(
            "TARGET=\"/merged/Alpha\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"a1b2c3\" OPTIONS=\"ro,allow_other\"\n",
            "TARGET=\"/merged/Beta\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"d4e5f6\" OPTIONS=\"ro\"\n",
        );
        let (entries, warnings) = parse_pairs_output(raw);
        assert!(warnings.is_empty());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mountpoint, PathBuf::from("/merged/Alpha"));
        assert_eq!(entries[0].fs_type, "fuse.mergerfs");
        assert_eq!(entries[0].source, "a1b2c3");
        assert_eq!(entries[1].options, "ro");
    }

    #[test]
    fn unescapes_octal_whitespace() {
        let raw = "TARGET=\"/merged/Manga\\040Alpha\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"s\" OPTIONS=\"rw\"\n";
        let (entries, warnings) = parse_pairs_output(raw);
        assert!(warnings.is_empty());
        assert_eq!(entries[0].mountpoint, PathBuf::from("/merged/Manga Alpha"));
    }

    #[test]
    fn unescapes_backslash_escapes() {
        let raw = r#"TARGET="/m/a\\b" FSTYPE="ext4" SOURCE="/dev/sda" OPTIONS="rw""#;
        let (entries, _) = parse_pairs_output(raw);
        assert_eq!(entries[0].mountpoint, PathBuf::from(r"/m/a\b"));
    }

    #[test]
    fn trailing_escaped_quote_does_not_end_value() {
        let raw = "TARGET=\"/m/quo\\\"te\" FSTYPE=\"ext4\" SOURCE=\"s\" OPTIONS=\"rw\"";
        let (entries, warnings) = parse_pairs_output(raw);
        assert!(warnings.is_empty());
        assert_eq!(entries[0].mountpoint, PathBuf::from("/m/quo\"te"));
    }

    #[test]
    fn missing_key_yields_line_warning() {
        let raw = concat!(
            "TARGET=\"/merged/Alpha\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"s\" OPTIONS=\"ro\"\n",
            "TARGET=\"/merged/Broken\" FSTYPE=\"fuse.mergerfs\"\n",
        );
        let (entries, warnings) = parse_pairs_output(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WARN_SNAPSHOT_LINE);
        assert!(warnings[0].message.contains("/merged/Broken"));
    }

    #[test]
    fn garbage_never_panics() {
        for raw in [
            "not pairs at all",
            "TARGET=",
            "TARGET=\"unterminated",
            "TARGET=\"x\" FSTYPE=\"\\",
            "=\"\"",
            "\u{0}\u{1}\u{2}",
        ] {
            let (entries, warnings) = parse_pairs_output(raw);
            assert!(entries.is_empty());
            assert_eq!(warnings.len(), 1, "input: {raw:?}");
        }
    }

    #[test]
    fn duplicate_mountpoints_are_deduplicated() {
        let raw = concat!(
            "TARGET=\"/merged/Alpha\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"first\" OPTIONS=\"ro\"\n",
            "TARGET=\"/merged/Alpha\" FSTYPE=\"fuse.mergerfs\" SOURCE=\"second\" OPTIONS=\"ro\"\n",
        );
        let (entries, _) = parse_pairs_output(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "first");
    }

    #[test]
    fn entries_are_sorted_by_mountpoint() {
        let raw = concat!(
            "TARGET=\"/merged/Zeta\" FSTYPE=\"f\" SOURCE=\"s\" OPTIONS=\"o\"\n",
            "TARGET=\"/merged/Alpha\" FSTYPE=\"f\" SOURCE=\"s\" OPTIONS=\"o\"\n",
        );
        let (entries, _) = parse_pairs_output(raw);
        assert_eq!(entries[0].mountpoint, PathBuf::from("/merged/Alpha"));
        assert_eq!(entries[1].mountpoint, PathBuf::from("/merged/Zeta"));
    }
}
