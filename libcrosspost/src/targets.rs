//! Target identifier resolution
//!
//! Posts name their destinations as free-form identifiers: a bare platform
//! name (`"Twitter"`) or a platform name with a sub-target suffix
//! (`"Facebook:123"`). Resolution groups them by base platform name, keeping
//! first-seen order so results come back in a deterministic order.
//!
//! Known platform names are canonicalised (`"twitter"` and `"X"` both become
//! `"Twitter"`), so one platform is never published to twice.

use std::collections::{HashMap, HashSet};

use crate::types::PlatformName;

/// Separator between a base platform name and its sub-target id
pub const SUB_TARGET_SEPARATOR: char = ':';

/// One base platform with the sub-targets requested for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub base: String,
    /// Empty when only the bare platform name was requested
    pub sub_targets: Vec<String>,
}

impl ResolvedTarget {
    pub fn has_sub_targets(&self) -> bool {
        !self.sub_targets.is_empty()
    }
}

/// Split an identifier into its base name and optional sub-target id
///
/// Only the first separator counts, so sub-target ids may themselves
/// contain `:`. Surrounding whitespace is ignored and an empty suffix is
/// treated as a bare name.
pub fn split_identifier(identifier: &str) -> (&str, Option<&str>) {
    let identifier = identifier.trim();
    match identifier.split_once(SUB_TARGET_SEPARATOR) {
        Some((base, sub)) if !sub.trim().is_empty() => (base.trim(), Some(sub.trim())),
        Some((base, _)) => (base.trim(), None),
        None => (identifier, None),
    }
}

/// Canonical spelling of a base name; unknown names are kept verbatim
pub fn canonical_base(base: &str) -> String {
    base.parse::<PlatformName>()
        .map(|platform| platform.as_str().to_string())
        .unwrap_or_else(|_| base.to_string())
}

/// Group identifiers by canonical base platform name
///
/// Repeated bare names and repeated sub-targets collapse to their first
/// occurrence. When a base appears both bare and suffixed, the suffixed
/// sub-targets win. Blank identifiers are skipped.
pub fn resolve_targets<S: AsRef<str>>(identifiers: &[S]) -> Vec<ResolvedTarget> {
    let mut resolved: Vec<ResolvedTarget> = Vec::new();
    let mut index_by_base: HashMap<String, usize> = HashMap::new();
    let mut seen_sub_targets: HashSet<(usize, String)> = HashSet::new();

    for identifier in identifiers {
        let (base, sub) = split_identifier(identifier.as_ref());
        if base.is_empty() {
            continue;
        }

        let base = canonical_base(base);
        let index = *index_by_base.entry(base.clone()).or_insert_with(|| {
            resolved.push(ResolvedTarget {
                base,
                sub_targets: Vec::new(),
            });
            resolved.len() - 1
        });

        if let Some(sub) = sub {
            if seen_sub_targets.insert((index, sub.to_string())) {
                resolved[index].sub_targets.push(sub.to_string());
            }
        }
    }

    resolved
}

/// Expand bare names to the sub-target identifiers the post originally used
///
/// Used by retries: asking to retry `"Facebook"` on a post that targeted
/// `"Facebook:A"` and `"Facebook:B"` retries both pages. Suffixed
/// identifiers, and bare names with no stored sub-targets, pass through.
pub fn expand_with_stored<S: AsRef<str>, T: AsRef<str>>(
    requested: &[S],
    stored: &[T],
) -> Vec<String> {
    let mut expanded = Vec::new();

    for identifier in requested {
        let identifier = identifier.as_ref();
        let (base, sub) = split_identifier(identifier);
        if sub.is_some() {
            expanded.push(identifier.trim().to_string());
            continue;
        }

        let base = canonical_base(base);
        let stored_for_base: Vec<String> = stored
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| matches!(split_identifier(s), (b, Some(_)) if canonical_base(b) == base))
            .map(|s| s.trim().to_string())
            .collect();

        if stored_for_base.is_empty() {
            expanded.push(base);
        } else {
            expanded.extend(stored_for_base);
        }
    }

    expanded
}
