use similar::TextDiff;

/// Line-based unified diff between two texts.
///
/// Output depends only on the inputs, so a stored pair always renders the
/// same bytes. Identical inputs produce an empty string.
pub fn unified_diff(
    old: &str,
    new: &str,
    old_label: &str,
    new_label: &str,
    context: usize,
) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(context)
        .header(old_label, new_label)
        .to_string()
}
