//! Field merge composer ("custom scraper").
//!
//! A [`MergeConfig`] assigns every field of a media kind to one provider.
//! [`plan_item`] turns that assignment into the job graph of one item: one
//! scrape job per distinct provider, preceded by whatever searches and id
//! lookups those scrapes need. Shared dependencies resolve once. After the
//! graph has run, [`merge`] folds the scrape outputs into a single
//! [`MergedRecord`] where each field carries exactly one provenance.
//!
//! There is no automatic fallback: when an assigned provider fails its
//! fields stay empty and are reported as [`FieldError`]s.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use reelscrape_common::{CanonicalId, Field, Locale, MediaKind, MergedRecord, ProviderName};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classify::{ErrorKind, ScrapeError};
use super::graph::{Job, JobGraph, JobOutput, JobState, NodeIndex, TargetSpec};
use super::item::MediaItem;
use super::provider::{ProviderDescriptor, ScrapeTarget, SearchQuery, SearchTerm};
use super::registry::ProviderRegistry;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-kind, per-field provider assignment plus per-provider locales.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// `kind -> field -> provider`.
    #[serde(default)]
    pub assignments: BTreeMap<MediaKind, BTreeMap<Field, ProviderName>>,
    /// Locale each provider is queried in. Providers not listed use the
    /// engine default.
    #[serde(default)]
    pub locales: BTreeMap<ProviderName, Locale>,
}

impl MergeConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every field in `fields` for `kind` to `provider`.
    pub fn single(
        provider: impl Into<ProviderName>,
        kind: MediaKind,
        fields: impl IntoIterator<Item = Field>,
    ) -> Self {
        let provider = provider.into();
        let mut config = Self::new();
        for field in fields {
            config = config.assign(kind, field, provider.clone());
        }
        config
    }

    /// Builder: assign one field.
    pub fn assign(mut self, kind: MediaKind, field: Field, provider: impl Into<ProviderName>) -> Self {
        self.assignments
            .entry(kind)
            .or_default()
            .insert(field, provider.into());
        self
    }

    /// Builder: query `provider` in `locale`.
    pub fn with_locale(mut self, provider: impl Into<ProviderName>, locale: Locale) -> Self {
        self.locales.insert(provider.into(), locale);
        self
    }

    /// Fold another configuration into this one; its entries win.
    pub fn extend(&mut self, other: MergeConfig) {
        for (kind, fields) in other.assignments {
            self.assignments.entry(kind).or_default().extend(fields);
        }
        self.locales.extend(other.locales);
    }

    /// The assignment for `kind`, empty if none.
    pub fn fields_for(&self, kind: MediaKind) -> BTreeMap<Field, ProviderName> {
        self.assignments.get(&kind).cloned().unwrap_or_default()
    }

    /// Distinct providers assigned any field of `kind`.
    pub fn providers_for(&self, kind: MediaKind) -> BTreeSet<ProviderName> {
        self.assignments
            .get(&kind)
            .map(|fields| fields.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Check every assignment of the given kinds against the registry.
    ///
    /// Returns one [`ConfigIssue`] per field assigned to a provider that is
    /// unknown, unconfigured, or cannot serve the kind/field, and one entry
    /// (with no field) per kind that has no assignment at all.
    pub fn check(&self, registry: &ProviderRegistry, kinds: &BTreeSet<MediaKind>) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for &kind in kinds {
            let fields = self.fields_for(kind);
            if fields.is_empty() {
                issues.push(ConfigIssue {
                    kind,
                    field: None,
                    message: format!("no fields assigned for {kind}"),
                });
                continue;
            }
            for (field, provider) in fields {
                let message = match registry.get(provider.as_str()) {
                    None => Some(format!("unknown provider '{provider}'")),
                    Some(p) if !p.is_available() => {
                        Some(format!("{provider} is not configured"))
                    }
                    Some(p) if !p.descriptor().supports_kind(kind) => {
                        Some(format!("{provider} does not support {kind}"))
                    }
                    Some(p) if !p.descriptor().supports_field(kind, field) => {
                        Some(format!("{provider} cannot supply {field} for {kind}"))
                    }
                    Some(_) => None,
                };
                if let Some(message) = message {
                    issues.push(ConfigIssue {
                        kind,
                        field: Some(field),
                        message,
                    });
                }
            }
        }
        issues
    }
}

/// One problem found by [`MergeConfig::check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub kind: MediaKind,
    pub field: Option<Field>,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.field {
            Some(field) => write!(f, "{}.{field}: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Collapse configuration issues into the error that aborts a batch.
pub fn issues_to_error(issues: &[ConfigIssue]) -> Option<ScrapeError> {
    if issues.is_empty() {
        return None;
    }
    let joined = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Some(ScrapeError::invalid_config(joined))
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The job graph of one item plus where each assigned field comes from.
#[derive(Debug, Clone)]
pub struct ItemPlan {
    /// Jobs to run.
    pub graph: JobGraph,
    /// `field -> provider` for the item's kind.
    pub assignment: BTreeMap<Field, ProviderName>,
    /// The scrape node that fetches the item for each provider.
    pub scrape_nodes: BTreeMap<ProviderName, NodeIndex>,
}

/// Where a provider's anchor id comes from.
enum IdSource {
    Known(CanonicalId),
    Node {
        index: NodeIndex,
        namespace: ProviderName,
    },
}

/// Build the job graph for one item.
///
/// For every provider assigned a field of the item's kind:
///
/// - a known id in the provider's namespace (or in the namespace it requires)
///   is used directly, so no search runs;
/// - a provider that requires another provider's id depends on that
///   provider's scrape, which is added with an empty field set when nothing
///   is assigned to it;
/// - otherwise the provider searches for the item (or, for seasons, episodes
///   and albums, for the parent).
///
/// Every failure here is `InvalidConfiguration`.
pub fn plan_item(
    item: &MediaItem,
    config: &MergeConfig,
    registry: &ProviderRegistry,
    default_locale: &Locale,
) -> Result<ItemPlan, ScrapeError> {
    item.validate()?;
    let assignment = config.fields_for(item.kind);
    if assignment.is_empty() {
        return Err(ScrapeError::invalid_config(format!(
            "no fields assigned for {}",
            item.kind
        )));
    }

    let mut planner = Planner {
        item,
        config,
        registry,
        default_locale,
        assignment: &assignment,
        graph: JobGraph::new(),
        searches: HashMap::new(),
        anchors: HashMap::new(),
        scrapes: BTreeMap::new(),
        visiting: Vec::new(),
    };
    for provider in config.providers_for(item.kind) {
        planner.scrape_node(&provider)?;
    }

    debug!(
        item_id = %item.id,
        jobs = planner.graph.len(),
        providers = planner.scrapes.len(),
        "Planned item"
    );
    Ok(ItemPlan {
        graph: planner.graph,
        scrape_nodes: planner.scrapes,
        assignment,
    })
}

struct Planner<'a> {
    item: &'a MediaItem,
    config: &'a MergeConfig,
    registry: &'a ProviderRegistry,
    default_locale: &'a Locale,
    assignment: &'a BTreeMap<Field, ProviderName>,
    graph: JobGraph,
    searches: HashMap<ProviderName, NodeIndex>,
    /// Id-only scrapes of the parent entity, for dependent items.
    anchors: HashMap<ProviderName, NodeIndex>,
    scrapes: BTreeMap<ProviderName, NodeIndex>,
    visiting: Vec<ProviderName>,
}

impl Planner<'_> {
    /// The kind of the entity ids are resolved for: the parent for dependent
    /// items, the item itself otherwise.
    fn anchor_kind(&self) -> MediaKind {
        self.item.kind.parent().unwrap_or(self.item.kind)
    }

    fn anchor_known_ids(&self) -> &[CanonicalId] {
        match (&self.item.parent, self.item.kind.is_dependent()) {
            (Some(parent), true) => &parent.known_ids,
            _ => &self.item.known_ids,
        }
    }

    fn locale_for(&self, provider: &ProviderName) -> Result<Locale, ScrapeError> {
        let descriptor = self.descriptor(provider)?;
        let wanted = self
            .config
            .locales
            .get(provider)
            .unwrap_or(self.default_locale);
        Ok(descriptor.resolve_locale(wanted))
    }

    fn descriptor(&self, provider: &ProviderName) -> Result<&ProviderDescriptor, ScrapeError> {
        self.registry
            .descriptor(provider.as_str())
            .ok_or_else(|| ScrapeError::invalid_config(format!("unknown provider '{provider}'")))
    }

    fn require_kind(&self, provider: &ProviderName, kind: MediaKind) -> Result<(), ScrapeError> {
        if self.descriptor(provider)?.supports_kind(kind) {
            Ok(())
        } else {
            Err(ScrapeError::invalid_config(format!(
                "{provider} does not support {kind}"
            )))
        }
    }

    /// The scrape of the item itself by `provider`.
    fn scrape_node(&mut self, provider: &ProviderName) -> Result<NodeIndex, ScrapeError> {
        if let Some(&index) = self.scrapes.get(provider) {
            return Ok(index);
        }
        self.require_kind(provider, self.item.kind)?;

        let source = self.id_source(provider)?;
        let child = self.item.child_key.clone();
        let (target, parent) = match source {
            IdSource::Known(id) => {
                let target = match child {
                    Some(key) => ScrapeTarget::Child { parent: id, key },
                    None => ScrapeTarget::Entity { id },
                };
                (TargetSpec::Known(target), None)
            }
            IdSource::Node { index, namespace } => {
                (TargetSpec::FromParent { namespace, child }, Some(index))
            }
        };
        let fields = self
            .assignment
            .iter()
            .filter(|(_, p)| *p == provider)
            .map(|(field, _)| *field)
            .collect();

        let job = Job::Scrape {
            provider: provider.clone(),
            kind: self.item.kind,
            target,
            locale: self.locale_for(provider)?,
            fields,
        };
        let index = self.graph.add(job, parent)?;
        self.scrapes.insert(provider.clone(), index);
        Ok(index)
    }

    /// An id-only scrape of the anchor entity, used to discover the ids
    /// another provider needs.
    fn anchor_scrape(&mut self, provider: &ProviderName) -> Result<NodeIndex, ScrapeError> {
        if !self.item.kind.is_dependent() {
            return self.scrape_node(provider);
        }
        if let Some(&index) = self.anchors.get(provider) {
            return Ok(index);
        }
        let kind = self.anchor_kind();
        self.require_kind(provider, kind)?;

        let (target, parent) = match self.id_source(provider)? {
            IdSource::Known(id) => (TargetSpec::Known(ScrapeTarget::Entity { id }), None),
            IdSource::Node { index, namespace } => (
                TargetSpec::FromParent {
                    namespace,
                    child: None,
                },
                Some(index),
            ),
        };
        let job = Job::Scrape {
            provider: provider.clone(),
            kind,
            target,
            locale: self.locale_for(provider)?,
            fields: BTreeSet::new(),
        };
        let index = self.graph.add(job, parent)?;
        self.anchors.insert(provider.clone(), index);
        Ok(index)
    }

    /// How `provider` gets the anchor id it addresses entities by.
    fn id_source(&mut self, provider: &ProviderName) -> Result<IdSource, ScrapeError> {
        if self.visiting.contains(provider) {
            let chain = self
                .visiting
                .iter()
                .map(ProviderName::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(ScrapeError::invalid_config(format!(
                "provider id requirements form a cycle: {chain} -> {provider}"
            )));
        }
        self.visiting.push(provider.clone());
        let source = self.id_source_inner(provider);
        self.visiting.pop();
        source
    }

    fn id_source_inner(&mut self, provider: &ProviderName) -> Result<IdSource, ScrapeError> {
        let required = self.descriptor(provider)?.requires_id_from.clone();
        let namespace = required.clone().unwrap_or_else(|| provider.clone());

        if let Some(id) = reelscrape_common::id_for(self.anchor_known_ids(), &namespace) {
            return Ok(IdSource::Known(id.clone()));
        }

        let index = match required {
            Some(required) => {
                if self.registry.get(required.as_str()).is_none() {
                    return Err(ScrapeError::invalid_config(format!(
                        "{provider} requires ids from '{required}', which is not registered"
                    )));
                }
                self.anchor_scrape(&required)?
            }
            None => self.search_node(provider)?,
        };
        Ok(IdSource::Node { index, namespace })
    }

    /// A search for the anchor entity by `provider`.
    fn search_node(&mut self, provider: &ProviderName) -> Result<NodeIndex, ScrapeError> {
        if let Some(&index) = self.searches.get(provider) {
            return Ok(index);
        }
        let kind = self.anchor_kind();
        self.require_kind(provider, kind)?;

        let (title, year) = match (&self.item.parent, self.item.kind.is_dependent()) {
            (Some(parent), true) => (parent.title.clone(), parent.year),
            _ => (self.item.title.clone(), self.item.year),
        };
        // A known id in a namespace the provider can look up beats a title search.
        let descriptor = self.descriptor(provider)?;
        let lookup = self.anchor_known_ids().iter().find(|id| {
            descriptor
                .id_formats
                .iter()
                .any(|format| format.recognize(&id.value).as_ref() == Some(*id))
        });
        let term = match lookup {
            Some(id) => SearchTerm::Id(id.clone()),
            None => SearchTerm::Text(title),
        };

        let job = Job::Search {
            provider: provider.clone(),
            query: SearchQuery {
                kind,
                term,
                year,
                locale: self.locale_for(provider)?,
            },
            prefer_year: year,
        };
        let index = self.graph.add(job, None)?;
        self.searches.insert(provider.clone(), index);
        Ok(index)
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// A field that could not be filled because its provider failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: Field,
    pub provider: ProviderName,
    pub error: ScrapeError,
}

/// Result of scraping one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Every assigned provider answered.
    Succeeded { record: MergedRecord },
    /// Some fields are missing because their providers failed.
    Partial {
        record: MergedRecord,
        field_errors: Vec<FieldError>,
    },
    /// Nothing could be fetched.
    Failed {
        error: ScrapeError,
        field_errors: Vec<FieldError>,
    },
}

impl ItemOutcome {
    /// The merged record, unless the item failed.
    pub fn record(&self) -> Option<&MergedRecord> {
        match self {
            Self::Succeeded { record } | Self::Partial { record, .. } => Some(record),
            Self::Failed { .. } => None,
        }
    }

    /// Per-field errors (empty on success).
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Succeeded { .. } => &[],
            Self::Partial { field_errors, .. } | Self::Failed { field_errors, .. } => field_errors,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Fold the outputs of a finished graph into the item's outcome.
///
/// Every assigned field ends up either in the record or in the field errors:
/// a provider that answered without a value for it reports `NotFound`.
pub fn merge(item: &MediaItem, plan: &ItemPlan, graph: &JobGraph) -> ItemOutcome {
    let mut record = MergedRecord::new(item.id, item.kind);
    for id in &item.known_ids {
        record.add_id(id.clone());
    }
    for (_, node) in graph.indexed() {
        if node.job().media_kind() != item.kind {
            continue;
        }
        if let Some(output) = node.output() {
            for id in output.ids() {
                record.add_id(id);
            }
        }
    }

    let mut field_errors = Vec::new();
    for (field, provider) in &plan.assignment {
        let Some(node) = plan.scrape_nodes.get(provider).and_then(|&i| graph.node(i)) else {
            continue;
        };
        match (node.state(), node.output()) {
            (JobState::Done, Some(JobOutput::Scrape(output))) => match output.fields.get(field) {
                Some(value) => {
                    record.insert(*field, value.clone());
                }
                None => field_errors.push(FieldError {
                    field: *field,
                    provider: provider.clone(),
                    error: ScrapeError::not_found(provider, format!("no value for {field}")),
                }),
            },
            _ => {
                let error = node.error().cloned().unwrap_or_else(|| {
                    ScrapeError::missing_dependency(format!("{provider} job did not finish"))
                });
                field_errors.push(FieldError {
                    field: *field,
                    provider: provider.clone(),
                    error,
                });
            }
        }
    }

    if field_errors.is_empty() {
        return ItemOutcome::Succeeded { record };
    }
    if !record.is_empty() {
        return ItemOutcome::Partial {
            record,
            field_errors,
        };
    }

    // Report the failure that started the cascade rather than its fallout.
    let error = graph
        .indexed()
        .filter_map(|(_, node)| node.error())
        .find(|e| e.kind() != ErrorKind::MissingDependency)
        .or_else(|| field_errors.first().map(|fe| &fe.error))
        .cloned()
        .unwrap_or_else(|| ScrapeError::missing_dependency("no provider answered"));
    ItemOutcome::Failed {
        error,
        field_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::classify::ProviderError;
    use crate::scrape::graph::ScrapeOutput;
    use crate::scrape::item::ParentRef;
    use crate::scrape::provider::{
        FetchedEntity, IdFormat, Provider, ScrapeRequest, SearchResult,
    };
    use async_trait::async_trait;
    use reelscrape_common::{ChildKey, FieldValue, Value};
    use std::sync::Arc;

    struct Described(ProviderDescriptor);

    #[async_trait]
    impl Provider for Described {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.0
        }

        async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, ProviderError> {
            Ok(Vec::new())
        }

        async fn fetch(&self, _request: &ScrapeRequest) -> Result<FetchedEntity, ProviderError> {
            Ok(FetchedEntity::default())
        }
    }

    const SHOW_FIELDS: [Field; 3] = [Field::Title, Field::Plot, Field::SeasonPoster];

    /// `a`: searchable catalogue. `b`: artwork keyed by `a` ids. `c`: keyed by `b`.
    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        let all_kinds = |d: ProviderDescriptor| {
            [MediaKind::Movie, MediaKind::TvShow, MediaKind::Season, MediaKind::Episode]
                .into_iter()
                .fold(d, |d, kind| d.with_kind(kind, SHOW_FIELDS))
        };
        registry.register(Arc::new(Described(
            all_kinds(ProviderDescriptor::new("a", "A"))
                .with_locales(Locale::english(), vec![Locale::english()])
                .with_id_format(IdFormat::new("imdb", r"^tt\d{7,8}$").unwrap()),
        )));
        registry.register(Arc::new(Described(
            all_kinds(ProviderDescriptor::new("b", "B")).requires_id_from("a"),
        )));
        registry.register(Arc::new(Described(
            all_kinds(ProviderDescriptor::new("c", "C")).requires_id_from("b"),
        )));
        registry
    }

    fn jobs(plan: &ItemPlan) -> Vec<(String, Option<NodeIndex>)> {
        plan.graph
            .indexed()
            .map(|(_, node)| (node.job().label(), node.parent()))
            .collect()
    }

    #[test]
    fn title_only_movie_searches_then_scrapes() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);
        let item = MediaItem::movie("Example Movie", 1999);
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();

        assert_eq!(
            jobs(&plan),
            vec![
                ("search movie via a".to_string(), None),
                ("scrape movie via a".to_string(), Some(NodeIndex::new(0))),
            ]
        );
    }

    #[test]
    fn known_id_skips_search() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);
        let item = MediaItem::movie("Example Movie", 1999).with_id(CanonicalId::new("a", "603"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();

        assert_eq!(plan.graph.len(), 1);
        let node = plan.graph.node(NodeIndex::new(0)).unwrap();
        assert!(matches!(
            node.job(),
            Job::Scrape {
                target: TargetSpec::Known(ScrapeTarget::Entity { .. }),
                ..
            }
        ));
    }

    #[test]
    fn recognised_foreign_id_becomes_lookup() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);
        let item = MediaItem::movie("Example Movie", 1999)
            .with_id(CanonicalId::new("imdb", "tt0000001"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();

        let Job::Search { query, .. } = plan.graph.node(NodeIndex::new(0)).unwrap().job() else {
            panic!("expected a search first");
        };
        assert_eq!(query.term, SearchTerm::Id(CanonicalId::new("imdb", "tt0000001")));
    }

    #[test]
    fn dependency_provider_is_scraped_once_with_empty_fields() {
        // b and c both end up needing a's scrape; a has no fields of its own.
        let config = MergeConfig::new()
            .assign(MediaKind::TvShow, Field::Title, "b")
            .assign(MediaKind::TvShow, Field::SeasonPoster, "c");
        let item = MediaItem::new(MediaKind::TvShow, "Show");
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();

        assert_eq!(
            jobs(&plan),
            vec![
                ("search tv_show via a".to_string(), None),
                ("scrape tv_show via a".to_string(), Some(NodeIndex::new(0))),
                ("scrape tv_show via b".to_string(), Some(NodeIndex::new(1))),
                ("scrape tv_show via c".to_string(), Some(NodeIndex::new(2))),
            ]
        );
        let Job::Scrape { fields, .. } = plan.graph.node(NodeIndex::new(1)).unwrap().job() else {
            panic!("expected a scrape");
        };
        assert!(fields.is_empty());
        assert_eq!(plan.scrape_nodes.len(), 3);
    }

    #[test]
    fn episode_resolves_show_then_scrapes_child() {
        let config = MergeConfig::new()
            .assign(MediaKind::Episode, Field::Title, "a")
            .assign(MediaKind::Episode, Field::Plot, "b");
        let item = MediaItem::episode(ParentRef::titled("The Wire").with_year(2002), 1, 3);
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();

        assert_eq!(
            jobs(&plan),
            vec![
                ("search tv_show via a".to_string(), None),
                ("scrape episode via a".to_string(), Some(NodeIndex::new(0))),
                ("scrape tv_show via a".to_string(), Some(NodeIndex::new(0))),
                ("scrape episode via b".to_string(), Some(NodeIndex::new(2))),
            ]
        );
        let Job::Scrape { target, .. } = plan.graph.node(NodeIndex::new(3)).unwrap().job() else {
            panic!("expected a scrape");
        };
        assert_eq!(
            target,
            &TargetSpec::FromParent {
                namespace: "a".into(),
                child: Some(ChildKey::Episode {
                    season: 1,
                    episode: 3
                }),
            }
        );
    }

    #[test]
    fn known_parent_id_needs_no_jobs_before_child() {
        let config = MergeConfig::single("a", MediaKind::Season, [Field::Title]);
        let show = ParentRef::titled("The Wire").with_id(CanonicalId::new("a", "1438"));
        let plan = plan_item(&MediaItem::season(show, 2), &config, &registry(), &Locale::english())
            .unwrap();
        assert_eq!(plan.graph.len(), 1);
    }

    #[test]
    fn requirement_cycle_is_invalid_configuration() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Described(
            ProviderDescriptor::new("x", "X")
                .with_kind(MediaKind::Movie, [Field::Title])
                .requires_id_from("y"),
        )));
        registry.register(Arc::new(Described(
            ProviderDescriptor::new("y", "Y")
                .with_kind(MediaKind::Movie, [Field::Title])
                .requires_id_from("x"),
        )));
        let config = MergeConfig::single("x", MediaKind::Movie, [Field::Title]);
        let err = plan_item(&MediaItem::movie("M", 2000), &config, &registry, &Locale::english())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn provider_locale_falls_back_to_default() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title])
            .with_locale("a", "ja-JP".parse().unwrap());
        let plan = plan_item(&MediaItem::movie("M", 2000), &config, &registry(), &Locale::english())
            .unwrap();
        let Job::Search { query, .. } = plan.graph.node(NodeIndex::new(0)).unwrap().job() else {
            panic!("expected a search");
        };
        assert_eq!(query.locale, Locale::english());
    }

    #[test]
    fn check_reports_each_bad_field() {
        let config = MergeConfig::new()
            .assign(MediaKind::Movie, Field::Title, "a")
            .assign(MediaKind::Movie, Field::Tracks, "a")
            .assign(MediaKind::Movie, Field::Plot, "zzz");
        let kinds = BTreeSet::from([MediaKind::Movie, MediaKind::Album]);
        let issues = config.check(&registry(), &kinds);

        assert_eq!(issues.len(), 3);
        assert!(issues.iter().any(|i| i.field == Some(Field::Tracks)));
        assert!(issues.iter().any(|i| i.field == Some(Field::Plot)));
        assert!(issues.iter().any(|i| i.kind == MediaKind::Album && i.field.is_none()));
        assert!(issues_to_error(&issues).is_some());
        assert!(issues_to_error(&[]).is_none());
    }

    #[test]
    fn extend_overrides_entries() {
        let mut base = MergeConfig::single("a", MediaKind::Movie, [Field::Title, Field::Plot]);
        base.extend(MergeConfig::new().assign(MediaKind::Movie, Field::Plot, "b"));
        assert_eq!(base.fields_for(MediaKind::Movie)[&Field::Plot], "b");
        assert_eq!(base.providers_for(MediaKind::Movie).len(), 2);
    }

    fn run_to_end(plan: &ItemPlan, outputs: &[(usize, Result<JobOutput, ScrapeError>)]) -> JobGraph {
        let mut graph = plan.graph.clone();
        graph.prime();
        for (index, outcome) in outputs {
            let index = NodeIndex::new(*index);
            graph.mark_running(index).unwrap();
            match outcome {
                Ok(output) => {
                    graph.complete(index, output.clone()).unwrap();
                }
                Err(e) => {
                    graph.fail(index, e.clone()).unwrap();
                }
            }
        }
        graph
    }

    fn scrape_output(provider: &str, kind: MediaKind, fields: &[(Field, &str)]) -> JobOutput {
        JobOutput::Scrape(ScrapeOutput {
            provider: provider.into(),
            kind,
            ids: vec![CanonicalId::new(provider, "1")],
            fields: fields
                .iter()
                .map(|(f, v)| (*f, FieldValue::new(Value::from(*v), provider.into())))
                .collect(),
        })
    }

    #[test]
    fn merge_keeps_configured_provenance() {
        let config = MergeConfig::new()
            .assign(MediaKind::Movie, Field::Title, "a")
            .assign(MediaKind::Movie, Field::Plot, "b");
        let item = MediaItem::movie("M", 2000)
            .with_id(CanonicalId::new("a", "1"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();
        // Both scrapes are addressed by the known `a` id, so neither searches.
        let graph = run_to_end(
            &plan,
            &[
                (0, Ok(scrape_output("a", MediaKind::Movie, &[(Field::Title, "M"), (Field::Plot, "from a")]))),
                (1, Ok(scrape_output("b", MediaKind::Movie, &[(Field::Plot, "from b")]))),
            ],
        );

        let outcome = merge(&item, &plan, &graph);
        let record = outcome.record().unwrap();
        assert!(outcome.is_success());
        assert_eq!(record.provenance(Field::Title).unwrap(), "a");
        assert_eq!(record.provenance(Field::Plot).unwrap(), "b");
        assert_eq!(record.get(Field::Plot).and_then(Value::as_text), Some("from b"));
        assert_eq!(record.ids.len(), 2);
    }

    #[test]
    fn failed_provider_leaves_its_fields_empty() {
        let config = MergeConfig::new()
            .assign(MediaKind::Movie, Field::Title, "a")
            .assign(MediaKind::Movie, Field::Plot, "b");
        let item = MediaItem::movie("M", 2000).with_id(CanonicalId::new("a", "1"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();
        let graph = run_to_end(
            &plan,
            &[
                (0, Ok(scrape_output("a", MediaKind::Movie, &[(Field::Title, "M")]))),
                (1, Err(ScrapeError::not_found(&"b".into(), "no artwork"))),
            ],
        );

        let outcome = merge(&item, &plan, &graph);
        let ItemOutcome::Partial { record, field_errors } = outcome else {
            panic!("expected partial outcome");
        };
        assert_eq!(record.field_set(), BTreeSet::from([Field::Title]));
        assert_eq!(field_errors.len(), 1);
        assert_eq!(field_errors[0].field, Field::Plot);
        assert_eq!(field_errors[0].error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn field_missing_from_answer_makes_item_partial() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title, Field::Plot]);
        let item = MediaItem::movie("M", 2000).with_id(CanonicalId::new("a", "1"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();
        let graph = run_to_end(
            &plan,
            &[(0, Ok(scrape_output("a", MediaKind::Movie, &[(Field::Title, "M")])))],
        );

        let ItemOutcome::Partial { record, field_errors } = merge(&item, &plan, &graph) else {
            panic!("expected partial outcome");
        };
        assert_eq!(record.field_set(), BTreeSet::from([Field::Title]));
        assert_eq!(field_errors.len(), 1);
        assert_eq!(field_errors[0].field, Field::Plot);
        assert_eq!(field_errors[0].provider, "a");
        assert_eq!(field_errors[0].error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_answer_fails_the_item() {
        let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title, Field::Plot]);
        let item = MediaItem::movie("M", 2000).with_id(CanonicalId::new("a", "1"));
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();
        let graph = run_to_end(&plan, &[(0, Ok(scrape_output("a", MediaKind::Movie, &[])))]);

        let ItemOutcome::Failed { error, field_errors } = merge(&item, &plan, &graph) else {
            panic!("expected failure");
        };
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(field_errors.len(), 2);
    }

    #[test]
    fn whole_item_failure_reports_root_cause() {
        let config = MergeConfig::new()
            .assign(MediaKind::TvShow, Field::Title, "a")
            .assign(MediaKind::TvShow, Field::SeasonPoster, "b");
        let item = MediaItem::new(MediaKind::TvShow, "Missing Show");
        let plan = plan_item(&item, &config, &registry(), &Locale::english()).unwrap();
        let graph = run_to_end(&plan, &[(0, Err(ScrapeError::not_found(&"a".into(), "no match")))]);

        let ItemOutcome::Failed { error, field_errors } = merge(&item, &plan, &graph) else {
            panic!("expected failure");
        };
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(field_errors.len(), 2);
        assert!(field_errors
            .iter()
            .all(|fe| fe.error.kind() == ErrorKind::MissingDependency));
    }
}
