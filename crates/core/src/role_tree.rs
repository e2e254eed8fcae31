use std::collections::HashSet;

use crate::schemas::RoleNode;

/// Jaccard similarity over `(role, name)` pairs. Two empty trees are
/// identical by definition.
pub fn jaccard_similarity(a: &[RoleNode], b: &[RoleNode]) -> f64 {
    let set_a: HashSet<(&str, Option<&str>)> = a
        .iter()
        .map(|n| (n.role.as_str(), n.name.as_deref()))
        .collect();
    let set_b: HashSet<(&str, Option<&str>)> = b
        .iter()
        .map(|n| (n.role.as_str(), n.name.as_deref()))
        .collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let inter = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}
