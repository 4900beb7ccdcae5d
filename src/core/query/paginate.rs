// src/core/query/paginate.rs

//! Pagination over a deterministic, already-filtered record sequence. The
//! token is an opaque string carrying the next record's sort key; per-page 0
//! means everything; a token pointing at a deleted key resumes at the next
//! existing key past it. Under `reverse`, iteration and token comparison
//! both flip.

/// One page plus the token of the record immediately following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Paginates `iter`, which must yield `(sort_key, item)` in the request's
/// iteration order (ascending normally, descending under `reverse`).
pub fn paginate<T>(
    iter: impl Iterator<Item = (String, T)>,
    per_page: u32,
    next_token: &str,
    reverse: bool,
) -> Page<T> {
    let in_range = |key: &str| {
        if next_token.is_empty() {
            true
        } else if reverse {
            key <= next_token
        } else {
            key >= next_token
        }
    };

    let mut items = Vec::new();
    let mut token = None;
    for (key, item) in iter {
        if !in_range(&key) {
            continue;
        }
        if per_page > 0 && items.len() == per_page as usize {
            token = Some(key);
            break;
        }
        items.push(item);
    }

    Page {
        items,
        next_token: token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq() -> Vec<(String, u32)> {
        ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), i as u32))
            .collect()
    }

    #[test]
    fn per_page_zero_returns_all() {
        let page = paginate(seq().into_iter(), 0, "", false);
        assert_eq!(page.items, vec![0, 1, 2, 3, 4]);
        assert_eq!(page.next_token, None);
    }

    #[test]
    fn pages_concatenate_to_full_sequence() {
        let mut all = Vec::new();
        let mut token = String::new();
        loop {
            let page = paginate(seq().into_iter(), 2, &token, false);
            all.extend(page.items);
            match page.next_token {
                Some(t) => token = t,
                None => break,
            }
        }
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn deleted_token_resumes_at_next_key() {
        // "bb" does not exist; resumption starts at "c".
        let page = paginate(seq().into_iter(), 2, "bb", false);
        assert_eq!(page.items, vec![2, 3]);
        assert_eq!(page.next_token, Some("e".to_string()));
    }

    #[test]
    fn reverse_flips_order_and_token() {
        let rev: Vec<(String, u32)> = seq().into_iter().rev().collect();
        let page = paginate(rev.into_iter(), 2, "d", true);
        assert_eq!(page.items, vec![3, 2]);
        assert_eq!(page.next_token, Some("b".to_string()));
    }
}
