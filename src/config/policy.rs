//! Per-repository sync policy
//!
//! The configuration file maps each `(platform, owner/repo)` pair to a
//! policy describing what gets synced and how. Update lists mix bare field
//! names with parameterized entries (`{'tags': {'overwrite': true}}`), so
//! raw entries parse into a tagged-variant `FieldSpec` list exactly once,
//! at load time. Ambiguous or unknown configuration is rejected there;
//! nothing is re-parsed per item.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::model::Source;
use crate::{Result, SyncError};

/// One raw entry of an `issue_updates`/`pr_updates` list: either a bare
/// field name or a single-key map carrying options
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UpdateEntry {
    Flag(String),
    Options(BTreeMap<String, serde_yaml::Value>),
}

/// Normalized issue-field sync directive
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Title,
    Description,
    Comments,
    Url,
    UpstreamId,
    Priority,
    GithubProjectFields,
    Tags { overwrite: bool },
    FixVersion { overwrite: bool },
    Assignee { overwrite: bool },
    Transition(TransitionSpec),
    OnClose { apply_labels: Vec<String> },
}

/// Target of a close transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionSpec {
    /// Transition to whatever "closed" status the ticket offers
    Generic,
    /// Transition to a named custom status
    Named(String),
}

impl FieldSpec {
    fn name(&self) -> &'static str {
        match self {
            FieldSpec::Title => "title",
            FieldSpec::Description => "description",
            FieldSpec::Comments => "comments",
            FieldSpec::Url => "url",
            FieldSpec::UpstreamId => "upstream_id",
            FieldSpec::Priority => "priority",
            FieldSpec::GithubProjectFields => "github_project_fields",
            FieldSpec::Tags { .. } => "tags",
            FieldSpec::FixVersion { .. } => "fixVersion",
            FieldSpec::Assignee { .. } => "assignee",
            FieldSpec::Transition(_) => "transition",
            FieldSpec::OnClose { .. } => "on_close",
        }
    }
}

/// Normalized PR-field sync directive
#[derive(Debug, Clone, PartialEq)]
pub enum PrFieldSpec {
    /// Transition to this status when a linked PR is merged
    MergeTransition(String),
    /// Transition to this status when a PR first links to the ticket
    LinkTransition(String),
}

/// GitHub project-board field mapping: which board field feeds which value,
/// with an optional value-translation table (`"P0" -> "Blocker"`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFieldMap {
    pub gh_field: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Status/label/milestone predicates applied before an item enters the
/// pipeline
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemFilters {
    pub status: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub milestone: Option<u64>,
}

impl ItemFilters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.labels.is_empty() && self.milestone.is_none()
    }

    /// Check an item against the configured predicates
    pub fn pass(&self, status: Option<&str>, labels: &[String], milestone: Option<u64>) -> bool {
        if let Some(ref want) = self.status {
            match status {
                Some(actual) if actual.eq_ignore_ascii_case(want) => {}
                _ => return false,
            }
        }

        if !self.labels.is_empty() {
            let found = labels
                .iter()
                .any(|l| self.labels.iter().any(|want| want == l));
            if !found {
                return false;
            }
        }

        if let Some(want) = self.milestone {
            if milestone != Some(want) {
                return false;
            }
        }

        true
    }
}

/// Raw per-repository policy as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoPolicy {
    pub project: String,
    pub component: Option<String>,
    #[serde(default)]
    pub sync: Vec<String>,
    #[serde(default)]
    pub issue_updates: Vec<UpdateEntry>,
    #[serde(default)]
    pub pr_updates: Vec<UpdateEntry>,
    #[serde(default)]
    pub filters: ItemFilters,
    pub owner: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(rename = "type")]
    pub default_type: Option<String>,
    #[serde(default)]
    pub issue_types: BTreeMap<String, String>,
    #[serde(rename = "epic-link")]
    pub epic_link: Option<String>,
    #[serde(rename = "qa-contact")]
    pub qa_contact: Option<String>,
    pub default_status: Option<String>,
    pub github_project_number: Option<u64>,
    #[serde(default)]
    pub github_project_fields: BTreeMap<String, ProjectFieldMap>,
    pub jira_instance: Option<String>,
    #[serde(default)]
    pub mapping: Vec<BTreeMap<String, String>>,
}

/// Resolved, validated per-repository policy
///
/// Read-only after load; shared by Arc into every intermediary object
/// constructed for the repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyRecord {
    pub source: Source,
    pub upstream: String,
    pub project: String,
    pub component: Option<String>,
    pub instance: String,
    pub sync_issues: bool,
    pub sync_prs: bool,
    pub issue_fields: Vec<FieldSpec>,
    pub pr_fields: Vec<PrFieldSpec>,
    pub filters: ItemFilters,
    pub owner: Option<String>,
    pub labels: Vec<String>,
    pub issue_types: BTreeMap<String, String>,
    pub default_type: Option<String>,
    pub epic_link: Option<String>,
    pub qa_contact: Option<String>,
    pub default_status: Option<String>,
    pub github_project_number: Option<u64>,
    pub github_project_fields: BTreeMap<String, ProjectFieldMap>,
    pub fixversion_template: Option<String>,
}

impl PolicyRecord {
    /// Whether a field directive is configured
    pub fn wants(&self, name: &str) -> bool {
        self.issue_fields.iter().any(|f| f.name() == name)
    }

    /// Apply the optional fixVersion template (`release-XXX`) to an
    /// upstream milestone name
    pub fn map_fix_version(&self, milestone: &str) -> String {
        match &self.fixversion_template {
            Some(template) => template.replace("XXX", milestone),
            None => milestone.to_string(),
        }
    }

    /// Resolve a raw policy into a validated record
    pub fn resolve(
        source: Source,
        upstream: &str,
        raw: &RepoPolicy,
        instance: &str,
    ) -> Result<PolicyRecord> {
        let at = format!("map.{}.{}", source, upstream);

        if raw.project.is_empty() {
            return Err(SyncError::Config(format!("{}: empty project key", at)));
        }

        let mut sync_issues = false;
        let mut sync_prs = false;
        for kind in &raw.sync {
            match kind.as_str() {
                "issue" => sync_issues = true,
                "pullrequest" => sync_prs = true,
                other => {
                    return Err(SyncError::Config(format!(
                        "{}: unknown sync kind '{}' (expected 'issue' or 'pullrequest')",
                        at, other
                    )));
                }
            }
        }

        let issue_fields = parse_issue_updates(&raw.issue_updates, &at)?;
        let pr_fields = parse_pr_updates(&raw.pr_updates, &at)?;

        if raw
            .issue_fields_want_project_board()
            && raw.github_project_fields.is_empty()
        {
            return Err(SyncError::Config(format!(
                "{}: 'github_project_fields' update requested but no field mappings defined",
                at
            )));
        }

        let fixversion_template = raw
            .mapping
            .iter()
            .find_map(|entry| entry.get("fixVersion").cloned());

        Ok(PolicyRecord {
            source,
            upstream: upstream.to_string(),
            project: raw.project.clone(),
            component: raw.component.clone(),
            instance: instance.to_string(),
            sync_issues,
            sync_prs,
            issue_fields,
            pr_fields,
            filters: raw.filters.clone(),
            owner: raw.owner.clone(),
            labels: raw.labels.clone(),
            issue_types: raw.issue_types.clone(),
            default_type: raw.default_type.clone(),
            epic_link: raw.epic_link.clone(),
            qa_contact: raw.qa_contact.clone(),
            default_status: raw.default_status.clone(),
            github_project_number: raw.github_project_number,
            github_project_fields: raw.github_project_fields.clone(),
            fixversion_template,
        })
    }
}

impl RepoPolicy {
    fn issue_fields_want_project_board(&self) -> bool {
        self.issue_updates.iter().any(|e| match e {
            UpdateEntry::Flag(name) => name == "github_project_fields",
            UpdateEntry::Options(map) => map.contains_key("github_project_fields"),
        })
    }
}

fn parse_issue_updates(entries: &[UpdateEntry], at: &str) -> Result<Vec<FieldSpec>> {
    let mut specs: Vec<FieldSpec> = Vec::new();

    for entry in entries {
        let spec = match entry {
            UpdateEntry::Flag(name) => match name.as_str() {
                "title" => FieldSpec::Title,
                "description" => FieldSpec::Description,
                "comments" => FieldSpec::Comments,
                "url" => FieldSpec::Url,
                "upstream_id" => FieldSpec::UpstreamId,
                "priority" => FieldSpec::Priority,
                "github_project_fields" => FieldSpec::GithubProjectFields,
                "transition" => FieldSpec::Transition(TransitionSpec::Generic),
                other => {
                    return Err(SyncError::Config(format!(
                        "{}: unknown issue update '{}'",
                        at, other
                    )));
                }
            },
            UpdateEntry::Options(map) => {
                let (name, options) = single_entry(map, at)?;
                match name {
                    "tags" => FieldSpec::Tags {
                        overwrite: overwrite_flag(name, options, at)?,
                    },
                    "fixVersion" => FieldSpec::FixVersion {
                        overwrite: overwrite_flag(name, options, at)?,
                    },
                    "assignee" => FieldSpec::Assignee {
                        overwrite: overwrite_flag(name, options, at)?,
                    },
                    "transition" => match options {
                        serde_yaml::Value::Bool(true) => {
                            FieldSpec::Transition(TransitionSpec::Generic)
                        }
                        serde_yaml::Value::String(target) => {
                            FieldSpec::Transition(TransitionSpec::Named(target.clone()))
                        }
                        _ => {
                            return Err(SyncError::Config(format!(
                                "{}: 'transition' must be true or a status name",
                                at
                            )));
                        }
                    },
                    "on_close" => {
                        let labels = options
                            .get("apply_labels")
                            .and_then(|v| v.as_sequence())
                            .map(|seq| {
                                seq.iter()
                                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                    .collect::<Vec<_>>()
                            })
                            .unwrap_or_default();
                        if labels.is_empty() {
                            return Err(SyncError::Config(format!(
                                "{}: 'on_close' requires a non-empty 'apply_labels' list",
                                at
                            )));
                        }
                        FieldSpec::OnClose {
                            apply_labels: labels,
                        }
                    }
                    other => {
                        return Err(SyncError::Config(format!(
                            "{}: unknown issue update '{}'",
                            at, other
                        )));
                    }
                }
            }
        };

        // A field named twice is ambiguous (possibly with conflicting
        // overwrite flags); refuse at load time rather than at use time.
        if specs.iter().any(|existing| existing.name() == spec.name()) {
            return Err(SyncError::Config(format!(
                "{}: duplicate issue update entry '{}'",
                at,
                spec.name()
            )));
        }

        specs.push(spec);
    }

    Ok(specs)
}

fn parse_pr_updates(entries: &[UpdateEntry], at: &str) -> Result<Vec<PrFieldSpec>> {
    let mut specs: Vec<PrFieldSpec> = Vec::new();

    for entry in entries {
        let spec = match entry {
            UpdateEntry::Flag(name) => {
                return Err(SyncError::Config(format!(
                    "{}: unknown pr update '{}'",
                    at, name
                )));
            }
            UpdateEntry::Options(map) => {
                let (name, options) = single_entry(map, at)?;
                let target = options.as_str().ok_or_else(|| {
                    SyncError::Config(format!("{}: '{}' must name a status", at, name))
                })?;
                match name {
                    "merge_transition" => PrFieldSpec::MergeTransition(target.to_string()),
                    "link_transition" => PrFieldSpec::LinkTransition(target.to_string()),
                    other => {
                        return Err(SyncError::Config(format!(
                            "{}: unknown pr update '{}'",
                            at, other
                        )));
                    }
                }
            }
        };

        let duplicate = specs.iter().any(|existing| {
            std::mem::discriminant(existing) == std::mem::discriminant(&spec)
        });
        if duplicate {
            return Err(SyncError::Config(format!(
                "{}: duplicate pr update entry",
                at
            )));
        }

        specs.push(spec);
    }

    Ok(specs)
}

fn single_entry<'a>(
    map: &'a BTreeMap<String, serde_yaml::Value>,
    at: &str,
) -> Result<(&'a str, &'a serde_yaml::Value)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        _ => Err(SyncError::Config(format!(
            "{}: update entries must have exactly one key",
            at
        ))),
    }
}

fn overwrite_flag(name: &str, options: &serde_yaml::Value, at: &str) -> Result<bool> {
    options
        .get("overwrite")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| {
            SyncError::Config(format!(
                "{}: '{}' requires an 'overwrite' boolean",
                at, name
            ))
        })
}
