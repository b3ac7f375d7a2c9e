//! Apply/delete ordering of repository paths.
//!
//! Only namespaces are special: they must exist before their contents are
//! applied and must go after their contents are deleted. Nothing else is
//! ordered.

use super::resource::NAMESPACES_KIND;

fn is_namespace_path(path: &str) -> bool {
    path.split('/').next() == Some(NAMESPACES_KIND)
}

/// Namespaces first, everything else after; relative order is kept.
pub fn order_for_apply(paths: Vec<String>) -> Vec<String> {
    let (mut first, rest): (Vec<_>, Vec<_>) =
        paths.into_iter().partition(|p| is_namespace_path(p));
    first.extend(rest);
    first
}

/// Namespaces last, everything else before; relative order is kept.
pub fn order_for_delete(paths: Vec<String>) -> Vec<String> {
    let (namespaces, mut ordered): (Vec<_>, Vec<_>) =
        paths.into_iter().partition(|p| is_namespace_path(p));
    ordered.extend(namespaces);
    ordered
}
