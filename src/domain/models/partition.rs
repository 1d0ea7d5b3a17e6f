use serde::{Deserialize, Serialize};

/// Which partitions a run should touch.
///
/// With no explicit `include` list the partitions are discovered from the raw
/// table; `exclude` is applied in both cases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSelector {
    include: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl PartitionSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Some(partitions.into_iter().map(Into::into).collect()),
            exclude: Vec::new(),
        }
    }

    pub fn excluding<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(partitions.into_iter().map(Into::into));
        self
    }

    pub fn requires_discovery(&self) -> bool {
        self.include.is_none()
    }

    pub fn matches(&self, partition_key: &str) -> bool {
        let included = match &self.include {
            Some(list) => list.iter().any(|p| p == partition_key),
            None => true,
        };
        included && !self.exclude.iter().any(|p| p == partition_key)
    }

    /// Resolves the final, de-duplicated and sorted partition list.
    ///
    /// `discovered` is only consulted when no explicit list was configured.
    pub fn resolve(&self, discovered: Vec<String>) -> Vec<String> {
        let candidates = match &self.include {
            Some(list) => list.clone(),
            None => discovered,
        };
        let mut partitions: Vec<String> = candidates
            .into_iter()
            .filter(|p| self.matches(p))
            .collect();
        partitions.sort();
        partitions.dedup();
        partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_uses_discovered_partitions() {
        let selector = PartitionSelector::all();
        let resolved = selector.resolve(vec!["b".into(), "a".into(), "a".into()]);

        assert!(selector.requires_discovery());
        assert_eq!(resolved, vec!["a", "b"]);
    }

    #[test]
    fn test_explicit_list_ignores_discovery() {
        let selector = PartitionSelector::only(["1"]);
        let resolved = selector.resolve(vec!["1".into(), "2".into()]);

        assert!(!selector.requires_discovery());
        assert_eq!(resolved, vec!["1"]);
    }

    #[test]
    fn test_exclude_applies_to_both_modes() {
        let discovered = vec!["1".to_string(), "2".to_string(), "3".to_string()];

        let all = PartitionSelector::all().excluding(["2"]);
        assert_eq!(all.resolve(discovered.clone()), vec!["1", "3"]);

        let only = PartitionSelector::only(["1", "2"]).excluding(["2"]);
        assert_eq!(only.resolve(discovered), vec!["1"]);
    }
}
