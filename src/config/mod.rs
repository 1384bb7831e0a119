//! Configuration system
//!
//! Global YAML configuration plus the per-repository policy map. The map is
//! resolved into a read-only `PolicyTable` once, at process start; policy
//! resolution after that point is a pure lookup with no I/O.

mod policy;
mod sync_config;

pub use policy::{
    FieldSpec, ItemFilters, PolicyRecord, PrFieldSpec, ProjectFieldMap, RepoPolicy,
    TransitionSpec, UpdateEntry,
};
pub use sync_config::{
    GithubSettings, JiraInstance, JiraSettings, PagureSettings, SourceMap, SyncConfig,
};

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Source;
use crate::{Result, SyncError};

/// Resolved policy table: one validated record per mapped repository
///
/// Built once at startup; read-only afterwards. Unmapped repositories
/// resolve to `None`, which adapters treat as a silent drop.
#[derive(Debug, Default)]
pub struct PolicyTable {
    records: HashMap<(Source, String), Arc<PolicyRecord>>,
    ordered: Vec<Arc<PolicyRecord>>,
}

impl PolicyTable {
    /// Resolve and validate every mapped repository.
    ///
    /// All problems are collected and reported together; any problem is
    /// fatal.
    pub fn build(config: &SyncConfig) -> Result<Self> {
        let mut errors: Vec<String> = Vec::new();
        let mut records = HashMap::new();
        let mut ordered = Vec::new();

        let sources = [
            (Source::GitHub, &config.map.github),
            (Source::Pagure, &config.map.pagure),
        ];

        for (source, map) in sources {
            for (upstream, raw) in map {
                let instance = match config.instance_for(raw.jira_instance.as_deref()) {
                    Some(name) if config.jira.instances.contains_key(name) => name.to_string(),
                    Some(name) => {
                        errors.push(format!(
                            "map.{}.{}: unknown jira instance '{}'",
                            source, upstream, name
                        ));
                        continue;
                    }
                    None => {
                        errors.push(format!(
                            "map.{}.{}: no jira_instance set and no default_instance configured",
                            source, upstream
                        ));
                        continue;
                    }
                };

                match PolicyRecord::resolve(source, upstream, raw, &instance) {
                    Ok(record) => {
                        let record = Arc::new(record);
                        records.insert((source, upstream.clone()), Arc::clone(&record));
                        ordered.push(record);
                    }
                    Err(e) => errors.push(e.to_string()),
                }
            }
        }

        if !errors.is_empty() {
            return Err(SyncError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(Self { records, ordered })
    }

    /// Look up the policy for one repository; `None` means unmapped
    pub fn resolve(&self, source: Source, upstream: &str) -> Option<Arc<PolicyRecord>> {
        self.records
            .get(&(source, upstream.to_string()))
            .map(Arc::clone)
    }

    /// All resolved policies, in configuration order
    pub fn records(&self) -> &[Arc<PolicyRecord>] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> SyncConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const VALID: &str = r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
  default_instance: default
map:
  github:
    org/repo:
      project: FACTORY
      sync: [issue]
  pagure:
    some/repo:
      project: INFRA
      sync: [issue, pullrequest]
"#;

    #[test]
    fn test_build_and_resolve() {
        let table = PolicyTable::build(&config(VALID)).unwrap();
        assert_eq!(table.len(), 2);

        let record = table.resolve(Source::GitHub, "org/repo").unwrap();
        assert_eq!(record.project, "FACTORY");
        assert_eq!(record.instance, "default");
        assert!(record.sync_issues);
        assert!(!record.sync_prs);

        assert!(table.resolve(Source::GitHub, "org/unmapped").is_none());
        assert!(table.resolve(Source::Pagure, "org/repo").is_none());
    }

    #[test]
    fn test_unknown_instance_is_fatal() {
        let bad = r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
map:
  github:
    org/repo:
      project: FACTORY
      jira_instance: missing
"#;
        let err = PolicyTable::build(&config(bad)).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_no_default_instance_is_fatal() {
        let bad = r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
map:
  github:
    org/repo: {project: FACTORY}
"#;
        let err = PolicyTable::build(&config(bad)).unwrap_err();
        assert!(err.to_string().contains("default_instance"));
    }

    #[test]
    fn test_all_errors_reported_together() {
        let bad = r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
  default_instance: default
map:
  github:
    org/one:
      project: ''
    org/two:
      project: FACTORY
      sync: [wiki]
"#;
        let err = PolicyTable::build(&config(bad)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("org/one"));
        assert!(message.contains("org/two"));
    }
}
