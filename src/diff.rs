use similar::{capture_diff_slices, Algorithm, DiffTag};

/// Line diff between two snapshots, prefixed the way notifications show it.
///
/// Unchanged lines are only emitted when `include_equal` is set.
pub fn render_diff(previous: &str, current: &str, include_equal: bool, separator: &str) -> String {
    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = current.lines().collect();

    let mut out: Vec<String> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {
                if include_equal {
                    out.extend(old[old_range].iter().map(|l| l.to_string()));
                }
            }
            DiffTag::Delete => {
                out.extend(old[old_range].iter().map(|l| format!("(removed) {}", l)));
            }
            DiffTag::Insert => {
                out.extend(new[new_range].iter().map(|l| format!("(added) {}", l)));
            }
            DiffTag::Replace => {
                out.extend(old[old_range].iter().map(|l| format!("(changed) {}", l)));
                out.extend(new[new_range].iter().map(|l| format!("(into) {}", l)));
            }
        }
    }
    out.join(separator)
}
