//! Namespace denylist applied to every object entering the cache.

use regex::Regex;
use std::sync::LazyLock;

/// System namespaces that never participate in the cache: anything prefixed
/// `openshift-` or `kube-`, plus a handful of exact control-plane names.
static NAMESPACE_IGNORE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(openshift|kube)-|^open-cluster-management-agent-addon$|^open-cluster-management-agent$|^dedicated-admin$|^kube-node-lease$|^kube-public$|^kube-system$",
    )
    .unwrap()
});

/// Returns true if objects in `namespace` may enter the cache.
pub fn allow_namespace(namespace: &str) -> bool {
    !NAMESPACE_IGNORE_PATTERN.is_match(namespace)
}
