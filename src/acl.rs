//! Access-control check.
//!
//! A pure allow-list: no priorities, no deny rules. A chain declares the
//! permissions it requires with [`middleware::acl`](crate::middleware::acl)
//! before the handlers it protects; the dispatcher calls [`authorize`]
//! before each route handler.

use std::collections::HashSet;

/// True iff `required` is empty or shares at least one id with `granted`.
pub fn authorize<'a, I>(granted: I, required: &HashSet<String>) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    required.is_empty() || granted.into_iter().any(|p| required.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_requirement_always_passes() {
        assert!(authorize(&Vec::<String>::new(), &HashSet::new()));
        assert!(authorize(&vec!["x".to_owned()], &HashSet::new()));
    }

    #[test]
    fn any_overlap_grants() {
        let granted = vec!["read".to_owned(), "write".to_owned()];
        assert!(authorize(&granted, &set(&["write", "admin"])));
    }

    #[test]
    fn disjoint_sets_deny() {
        let granted = vec!["read".to_owned()];
        assert!(!authorize(&granted, &set(&["admin"])));
        assert!(!authorize(&Vec::<String>::new(), &set(&["admin"])));
    }
}
