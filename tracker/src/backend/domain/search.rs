use shared::CowEntry;

/// Case-insensitive substring search over cattle id, nickname, status and
/// bull. A blank query returns the list unchanged.
pub fn search_entries(query: &str, entries: &[CowEntry]) -> Vec<CowEntry> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return entries.to_vec();
    }

    entries
        .iter()
        .filter(|entry| {
            [&entry.cattle_id, &entry.nickname, &entry.status, &entry.bull]
                .iter()
                .any(|field| field.to_lowercase().contains(&query))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn herd() -> Vec<CowEntry> {
        let mut a = CowEntry::new("101");
        a.nickname = "Зорька".to_string();
        a.status = "Стельная".to_string();
        let mut b = CowEntry::new("A-202");
        b.bull = "Atlant".to_string();
        b.note = "зорька в заметке".to_string();
        vec![a, b]
    }

    #[test]
    fn test_empty_query_returns_list() {
        let entries = herd();
        assert_eq!(search_entries("", &entries), entries);
        assert_eq!(search_entries("   ", &entries), entries);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let entries = herd();
        let ids = |q: &str| -> Vec<String> {
            search_entries(q, &entries).into_iter().map(|e| e.cattle_id).collect()
        };

        assert_eq!(ids("ЗОРЬ"), vec!["101"]);
        assert_eq!(ids("стельная"), vec!["101"]);
        assert_eq!(ids("atl"), vec!["A-202"]);
        assert_eq!(ids("a-2"), vec!["A-202"]);
        assert_eq!(ids("0"), vec!["101", "A-202"]);
        assert!(ids("нет такой").is_empty());
    }
}
