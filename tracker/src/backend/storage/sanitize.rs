//! Text sanitization for stored records.
//!
//! Collections written by older builds (and the occasional corrupted storage
//! write) can contain control characters or binary garbage. Every string is
//! cleaned in two passes:
//!
//! 1. control characters `U+0000..U+001F` and `U+007F..U+009F` are removed;
//! 2. runs of three or more characters outside printable ASCII, Cyrillic
//!    (`U+0400..U+04FF`) and whitespace are removed.
//!
//! Only maximal runs are removed and their neighbours are always allowed
//! characters, so cleaning an already clean string changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use shared::{CowEntry, MAX_CATTLE_ID_LEN};

static CONTROL_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1F\x7F-\x9F]").expect("valid control char regex"));
static GARBAGE_RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\x20-\x7E\x{0400}-\x{04FF}\s]{3,}").expect("valid garbage run regex")
});

/// Minimum share of readable characters for an id to count as legible
const MIN_LEGIBLE_RATIO: f64 = 0.7;

/// Clean a single string
pub fn sanitize_text(text: &str) -> String {
    let without_controls = CONTROL_CHARS_RE.replace_all(text, "");
    GARBAGE_RUN_RE.replace_all(&without_controls, "").into_owned()
}

fn clean(field: &mut String) -> bool {
    let cleaned = sanitize_text(field);
    if cleaned != *field {
        *field = cleaned;
        true
    } else {
        false
    }
}

/// Clean every string inside an arbitrary JSON value, keys included.
/// Returns true if anything changed.
pub fn sanitize_value(value: &mut Value) -> bool {
    match value {
        Value::String(s) => clean(s),
        Value::Array(items) => items.iter_mut().fold(false, |changed, v| sanitize_value(v) | changed),
        Value::Object(map) => {
            let dirty_keys = map.keys().any(|k| sanitize_text(k) != *k);
            let mut changed = false;
            if dirty_keys {
                let entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
                for (k, v) in entries {
                    map.insert(sanitize_text(&k), v);
                }
                changed = true;
            }
            map.values_mut().fold(changed, |changed, v| sanitize_value(v) | changed)
        }
        _ => false,
    }
}

/// Clean every string field of an entry in place, nested records included.
/// Returns true if anything changed.
pub fn sanitize_entry(entry: &mut CowEntry) -> bool {
    let mut changed = false;
    for field in [
        &mut entry.cattle_id,
        &mut entry.nickname,
        &mut entry.group,
        &mut entry.birth_date,
        &mut entry.calving_date,
        &mut entry.insemination_date,
        &mut entry.exit_date,
        &mut entry.dry_start_date,
        &mut entry.bull,
        &mut entry.inseminator,
        &mut entry.code,
        &mut entry.status,
        &mut entry.note,
        &mut entry.protocol.name,
        &mut entry.protocol.start_date,
        &mut entry.date_added,
        &mut entry.user_id,
        &mut entry.last_modified_by,
    ] {
        changed |= clean(field);
    }

    for record in &mut entry.insemination_history {
        for field in [
            &mut record.date,
            &mut record.bull,
            &mut record.inseminator,
            &mut record.code,
        ] {
            changed |= clean(field);
        }
    }

    for record in &mut entry.action_history {
        for field in [
            &mut record.date_time,
            &mut record.user_name,
            &mut record.action,
            &mut record.details,
        ] {
            changed |= clean(field);
        }
    }

    for value in &mut entry.uzi_history {
        changed |= sanitize_value(value);
    }

    changed
}

/// Return a cleaned copy of an entry
pub fn sanitized(entry: &CowEntry) -> CowEntry {
    let mut copy = entry.clone();
    sanitize_entry(&mut copy);
    copy
}

fn is_readable(c: char) -> bool {
    matches!(c, '\u{20}'..='\u{7E}' | '\u{0400}'..='\u{04FF}') || c.is_whitespace()
}

/// Whether a string looks like something a person typed
pub fn is_legible(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    if total > MAX_CATTLE_ID_LEN {
        return false;
    }
    let readable = text.chars().filter(|c| is_readable(*c)).count();
    (readable as f64 / total as f64) >= MIN_LEGIBLE_RATIO
}

/// Whether a (sanitized) cattle id is acceptable for a stored record
pub fn is_valid_cattle_id(cattle_id: &str) -> bool {
    !cattle_id.trim().is_empty()
        && cattle_id.chars().count() <= MAX_CATTLE_ID_LEN
        && is_legible(cattle_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{ActionRecord, InseminationRecord};

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(sanitize_text("12\u{0}3\u{1F}4\u{7F}5\u{85}"), "12345");
        assert_eq!(sanitize_text("line\nbreak\ttab"), "linebreaktab");
    }

    #[test]
    fn test_strips_garbage_runs_only() {
        assert_eq!(sanitize_text("Бурёнка 101"), "Бурёнка 101");
        assert_eq!(sanitize_text("ab\u{FFFD}\u{FFFD}\u{FFFD}cd"), "abcd");
        // Runs shorter than three survive
        assert_eq!(sanitize_text("№5 ✓✓"), "№5 ✓✓");
        assert_eq!(sanitize_text("🐄🐄🐄 cow"), " cow");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "plain",
            "x\u{1}\u{2}y",
            "a✓✓b✓✓✓c",
            "✓✓\u{0}✓✓",
            "Корова №12 — стельная",
            "\u{FFFD}\u{FFFD}a\u{FFFD}\u{FFFD}\u{FFFD}",
        ];
        for sample in samples {
            let once = sanitize_text(sample);
            assert_eq!(sanitize_text(&once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_sanitize_entry_touches_nested_records() {
        let mut entry = CowEntry::new("1\u{0}01");
        entry.protocol.name = "Ovsynch\u{7}".to_string();
        entry.insemination_history.push(InseminationRecord {
            date: "2024-02-15".to_string(),
            bull: "Б\u{1}ык".to_string(),
            ..InseminationRecord::default()
        });
        entry.action_history.push(ActionRecord {
            details: "ok\u{9F}".to_string(),
            ..ActionRecord::default()
        });
        entry.uzi_history.push(json!({ "result\u{1}": ["a\u{2}b"] }));

        assert!(sanitize_entry(&mut entry));
        assert_eq!(entry.cattle_id, "101");
        assert_eq!(entry.protocol.name, "Ovsynch");
        assert_eq!(entry.insemination_history[0].bull, "Бык");
        assert_eq!(entry.action_history[0].details, "ok");
        assert_eq!(entry.uzi_history[0], json!({ "result": ["ab"] }));

        let again = sanitized(&entry);
        assert_eq!(again, entry);
        assert!(!sanitize_entry(&mut entry));
    }

    #[test]
    fn test_cattle_id_validation() {
        assert!(is_valid_cattle_id("101"));
        assert!(is_valid_cattle_id("Зорька-5"));
        assert!(!is_valid_cattle_id(""));
        assert!(!is_valid_cattle_id("   "));
        assert!(!is_valid_cattle_id(&"9".repeat(101)));
        assert!(is_valid_cattle_id(&"9".repeat(100)));
        // Mostly unreadable characters
        assert!(!is_valid_cattle_id("1✓✓"));
        assert!(!is_valid_cattle_id("a\u{FFFD}\u{FFFD}"));
    }
}
