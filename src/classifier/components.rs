//! Metric path decomposition

/// Leading `.`-separated segments of `path`, at most `n` of them
///
/// Paths with fewer than `n` segments yield all of them; the suffix after the
/// `n`-th segment is dropped, never appended to the last one.
///
/// # Examples
///
/// ```
/// use metric_attributor::classifier::split_components;
///
/// assert_eq!(split_components("a.b.c.d", 3), vec!["a", "b", "c"]);
/// assert_eq!(split_components("a.b.c.d", 5), vec!["a", "b", "c", "d"]);
/// assert!(split_components("a.b.c.d", 0).is_empty());
/// ```
pub fn split_components(path: &str, n: usize) -> Vec<&str> {
    path.split('.').take(n).collect()
}
