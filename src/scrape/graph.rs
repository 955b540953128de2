//! Arena-backed job graph and its state machine.
//!
//! One [`JobGraph`] is built per media item. Nodes live in a `Vec` and point
//! at their (single) parent by [`NodeIndex`]; a node cannot run before its
//! parent is `Done`, and a failed node takes all of its descendants down with
//! it as `MissingDependency`.
//!
//! ```text
//! Pending ──prime──▶ Ready ──▶ Running ──▶ Done
//!    │                 ▲           │
//!    └──prime──▶ Blocked            └──▶ Failed ──▶ descendants Failed
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use reelscrape_common::{CanonicalId, ChildKey, Field, FieldValue, Locale, MediaKind, ProviderName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classify::ScrapeError;
use super::provider::{ScrapeTarget, SearchQuery, SearchResult};

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Position of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Wrap a raw arena index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// The raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a job node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Blocked,
    Ready,
    Running,
    Done,
    Failed,
}

impl JobState {
    /// Returns `true` for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Whether a node searches or scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Search,
    Scrape,
}

/// Where a scrape job gets the id it is called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// The target is fully known when the graph is built.
    Known(ScrapeTarget),
    /// Take the id in `namespace` from the parent's output; address the
    /// child entity `child` below it when set.
    FromParent {
        namespace: ProviderName,
        child: Option<ChildKey>,
    },
}

/// What a node does when it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Find the id of an entity.
    Search {
        provider: ProviderName,
        query: SearchQuery,
        /// Prefer the first candidate released in this year.
        prefer_year: Option<u16>,
    },
    /// Fetch fields of an entity.
    Scrape {
        provider: ProviderName,
        kind: MediaKind,
        target: TargetSpec,
        locale: Locale,
        fields: BTreeSet<Field>,
    },
}

impl Job {
    /// Search or scrape.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Search { .. } => JobKind::Search,
            Self::Scrape { .. } => JobKind::Scrape,
        }
    }

    /// The provider the job calls.
    pub fn provider(&self) -> &ProviderName {
        match self {
            Self::Search { provider, .. } | Self::Scrape { provider, .. } => provider,
        }
    }

    /// The media kind of the entity the job addresses.
    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::Search { query, .. } => query.kind,
            Self::Scrape { kind, .. } => *kind,
        }
    }

    /// Short description for logs and progress labels.
    pub fn label(&self) -> String {
        format!("{:?} {} via {}", self.kind(), self.media_kind(), self.provider()).to_lowercase()
    }
}

/// Output of a scrape job: the requested fields of one entity, tagged with
/// the single provider that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutput {
    /// The producing provider.
    pub provider: ProviderName,
    /// Kind of the fetched entity.
    pub kind: MediaKind,
    /// Ids the provider reported (its own plus cross references).
    pub ids: Vec<CanonicalId>,
    /// Field values, restricted to the requested fields.
    pub fields: BTreeMap<Field, FieldValue>,
}

/// Successful outcome of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// The selected candidate of a search.
    Search(SearchResult),
    /// The fetched entity.
    Scrape(ScrapeOutput),
}

impl JobOutput {
    /// The id in `namespace` this output makes available to children.
    pub fn id_in(&self, namespace: &ProviderName) -> Option<&CanonicalId> {
        match self {
            Self::Search(result) => result.id.is_from(namespace).then_some(&result.id),
            Self::Scrape(output) => reelscrape_common::id_for(&output.ids, namespace),
        }
    }

    /// Every id this output carries.
    pub fn ids(&self) -> Vec<CanonicalId> {
        match self {
            Self::Search(result) => vec![result.id.clone()],
            Self::Scrape(output) => output.ids.clone(),
        }
    }
}

/// One node of the graph.
#[derive(Debug, Clone)]
pub struct JobNode {
    job: Job,
    parent: Option<NodeIndex>,
    state: JobState,
    outcome: Option<Result<JobOutput, ScrapeError>>,
}

impl JobNode {
    /// What the node does.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The node this one waits for.
    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// The stored output once `Done`.
    pub fn output(&self) -> Option<&JobOutput> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// The stored error once `Failed`.
    pub fn error(&self) -> Option<&ScrapeError> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }
}

/// A rejected state transition. The graph is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("no node {0} in graph")]
    UnknownNode(NodeIndex),

    #[error("node {node} cannot go from {from} to {to}")]
    Invalid {
        node: NodeIndex,
        from: JobState,
        to: JobState,
    },
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// The job DAG of one media item.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: Vec<JobNode>,
}

impl JobGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(job, parent)` pairs.
    ///
    /// Parents may point anywhere in the list; out-of-range parents and
    /// parent cycles are rejected with `InvalidConfiguration`.
    pub fn from_nodes(nodes: Vec<(Job, Option<NodeIndex>)>) -> Result<Self, ScrapeError> {
        let len = nodes.len();
        for (i, (_, parent)) in nodes.iter().enumerate() {
            if let Some(parent) = parent {
                if parent.0 >= len {
                    return Err(ScrapeError::invalid_config(format!(
                        "job #{i} refers to missing parent {parent}"
                    )));
                }
            }
        }

        for start in 0..len {
            let mut current = nodes[start].1;
            let mut steps = 0;
            while let Some(parent) = current {
                steps += 1;
                if parent.0 == start || steps > len {
                    return Err(ScrapeError::invalid_config(format!(
                        "job #{start} depends on itself"
                    )));
                }
                current = nodes[parent.0].1;
            }
        }

        Ok(Self {
            nodes: nodes
                .into_iter()
                .map(|(job, parent)| JobNode {
                    job,
                    parent,
                    state: JobState::Pending,
                    outcome: None,
                })
                .collect(),
        })
    }

    /// Append a node whose parent (if any) already exists. Nodes added this
    /// way cannot form a cycle.
    pub fn add(&mut self, job: Job, parent: Option<NodeIndex>) -> Result<NodeIndex, ScrapeError> {
        if let Some(parent) = parent {
            if parent.0 >= self.nodes.len() {
                return Err(ScrapeError::invalid_config(format!(
                    "parent {parent} does not exist"
                )));
            }
        }
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(JobNode {
            job,
            parent,
            state: JobState::Pending,
            outcome: None,
        });
        Ok(index)
    }

    /// Move every `Pending` node to `Ready` (no parent, or parent already
    /// `Done`) or `Blocked`. Returns the nodes that became ready.
    pub fn prime(&mut self) -> Vec<NodeIndex> {
        let mut ready = Vec::new();
        for i in 0..self.nodes.len() {
            if self.nodes[i].state != JobState::Pending {
                continue;
            }
            let parent_done = self.nodes[i]
                .parent
                .map(|p| self.nodes[p.0].state == JobState::Done)
                .unwrap_or(true);
            self.nodes[i].state = if parent_done {
                ready.push(NodeIndex(i));
                JobState::Ready
            } else {
                JobState::Blocked
            };
        }
        ready
    }

    /// `Ready -> Running`.
    pub fn mark_running(&mut self, index: NodeIndex) -> Result<(), TransitionError> {
        self.transition(index, JobState::Ready, JobState::Running)?;
        Ok(())
    }

    /// `Running -> Done`, storing the output. Returns the children that
    /// became `Ready`.
    pub fn complete(
        &mut self,
        index: NodeIndex,
        output: JobOutput,
    ) -> Result<Vec<NodeIndex>, TransitionError> {
        self.transition(index, JobState::Running, JobState::Done)?;
        self.nodes[index.0].outcome = Some(Ok(output));

        let mut ready = Vec::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.parent == Some(index) && node.state == JobState::Blocked {
                node.state = JobState::Ready;
                ready.push(NodeIndex(i));
            }
        }
        Ok(ready)
    }

    /// `Running -> Failed` (or `Ready -> Failed` for a job that could not be
    /// started). Every non-terminal descendant fails with
    /// `MissingDependency`; those nodes are returned.
    pub fn fail(
        &mut self,
        index: NodeIndex,
        error: ScrapeError,
    ) -> Result<Vec<NodeIndex>, TransitionError> {
        let from = self.node_checked(index)?.state;
        if !matches!(from, JobState::Running | JobState::Ready) {
            return Err(TransitionError::Invalid {
                node: index,
                from,
                to: JobState::Failed,
            });
        }

        let reason = format!("{} failed: {error}", self.nodes[index.0].job.label());
        let node = &mut self.nodes[index.0];
        node.state = JobState::Failed;
        node.outcome = Some(Err(error));

        let mut cascaded = Vec::new();
        let mut frontier = vec![index];
        while let Some(failed) = frontier.pop() {
            for i in 0..self.nodes.len() {
                let node = &mut self.nodes[i];
                if node.parent == Some(failed) && !node.state.is_terminal() {
                    node.state = JobState::Failed;
                    node.outcome = Some(Err(ScrapeError::missing_dependency(reason.clone())));
                    cascaded.push(NodeIndex(i));
                    frontier.push(NodeIndex(i));
                }
            }
        }
        Ok(cascaded)
    }

    /// A node by index.
    pub fn node(&self, index: NodeIndex) -> Option<&JobNode> {
        self.nodes.get(index.0)
    }

    /// State of a node.
    pub fn state(&self, index: NodeIndex) -> Option<JobState> {
        self.node(index).map(JobNode::state)
    }

    /// The parent's output of a node, if the node has a `Done` parent.
    pub fn parent_output(&self, index: NodeIndex) -> Option<&JobOutput> {
        let parent = self.node(index)?.parent?;
        self.node(parent)?.output()
    }

    /// All nodes currently `Ready`.
    pub fn ready(&self) -> Vec<NodeIndex> {
        self.indexed()
            .filter(|(_, node)| node.state == JobState::Ready)
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns `true` once every node is `Done` or `Failed`.
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|node| node.state.is_terminal())
    }

    /// Nodes with their indices.
    pub fn indexed(&self) -> impl Iterator<Item = (NodeIndex, &JobNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeIndex(i), node))
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_checked(&self, index: NodeIndex) -> Result<&JobNode, TransitionError> {
        self.nodes
            .get(index.0)
            .ok_or(TransitionError::UnknownNode(index))
    }

    fn transition(
        &mut self,
        index: NodeIndex,
        from: JobState,
        to: JobState,
    ) -> Result<(), TransitionError> {
        let current = self.node_checked(index)?.state;
        if current != from {
            return Err(TransitionError::Invalid {
                node: index,
                from: current,
                to,
            });
        }
        self.nodes[index.0].state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::classify::ErrorKind;
    use crate::scrape::provider::SearchTerm;
    use proptest::prelude::*;

    fn search_job(provider: &str) -> Job {
        Job::Search {
            provider: provider.into(),
            query: SearchQuery {
                kind: MediaKind::TvShow,
                term: SearchTerm::Text("Show".into()),
                year: None,
                locale: Locale::english(),
            },
            prefer_year: None,
        }
    }

    fn search_output(provider: &str) -> JobOutput {
        JobOutput::Search(SearchResult {
            id: CanonicalId::new(provider, "1"),
            title: "Show".into(),
            year: None,
            overview: None,
            confidence: 1.0,
            rank: 0,
        })
    }

    /// show -> season -> episode
    fn chain() -> JobGraph {
        JobGraph::from_nodes(vec![
            (search_job("a"), None),
            (search_job("a"), Some(NodeIndex(0))),
            (search_job("a"), Some(NodeIndex(1))),
        ])
        .unwrap()
    }

    #[test]
    fn prime_sets_roots_ready_and_children_blocked() {
        let mut graph = chain();
        assert_eq!(graph.prime(), vec![NodeIndex(0)]);
        assert_eq!(graph.state(NodeIndex(1)), Some(JobState::Blocked));
        assert_eq!(graph.state(NodeIndex(2)), Some(JobState::Blocked));
    }

    #[test]
    fn completing_parent_readies_direct_children_only() {
        let mut graph = chain();
        graph.prime();
        graph.mark_running(NodeIndex(0)).unwrap();
        let ready = graph.complete(NodeIndex(0), search_output("a")).unwrap();
        assert_eq!(ready, vec![NodeIndex(1)]);
        assert_eq!(graph.state(NodeIndex(2)), Some(JobState::Blocked));
        assert!(graph.parent_output(NodeIndex(1)).is_some());
    }

    #[test]
    fn failure_cascades_missing_dependency() {
        let mut graph = chain();
        graph.prime();
        graph.mark_running(NodeIndex(0)).unwrap();
        let err = ScrapeError::not_found(&"a".into(), "no such show");
        let cascaded = graph.fail(NodeIndex(0), err.clone()).unwrap();

        assert_eq!(cascaded.len(), 2);
        assert_eq!(graph.node(NodeIndex(0)).unwrap().error(), Some(&err));
        for i in [1, 2] {
            let node = graph.node(NodeIndex(i)).unwrap();
            assert_eq!(node.state(), JobState::Failed);
            assert_eq!(node.error().unwrap().kind(), ErrorKind::MissingDependency);
        }
        assert!(graph.is_finished());
    }

    #[test]
    fn node_never_runs_twice() {
        let mut graph = chain();
        graph.prime();
        graph.mark_running(NodeIndex(0)).unwrap();
        assert_eq!(
            graph.mark_running(NodeIndex(0)),
            Err(TransitionError::Invalid {
                node: NodeIndex(0),
                from: JobState::Running,
                to: JobState::Running,
            })
        );
    }

    #[test]
    fn terminal_states_are_final() {
        let mut graph = chain();
        graph.prime();
        graph.mark_running(NodeIndex(0)).unwrap();
        graph.complete(NodeIndex(0), search_output("a")).unwrap();

        assert!(graph.complete(NodeIndex(0), search_output("a")).is_err());
        assert!(graph
            .fail(NodeIndex(0), ScrapeError::missing_dependency("late"))
            .is_err());
        assert_eq!(graph.state(NodeIndex(0)), Some(JobState::Done));
    }

    #[test]
    fn blocked_node_cannot_start() {
        let mut graph = chain();
        graph.prime();
        assert!(graph.mark_running(NodeIndex(1)).is_err());
        assert_eq!(graph.state(NodeIndex(1)), Some(JobState::Blocked));
    }

    #[test]
    fn unknown_node_is_rejected() {
        let mut graph = chain();
        assert_eq!(
            graph.mark_running(NodeIndex(9)),
            Err(TransitionError::UnknownNode(NodeIndex(9)))
        );
    }

    #[test]
    fn construction_rejects_bad_parents_and_cycles() {
        let out_of_range = JobGraph::from_nodes(vec![(search_job("a"), Some(NodeIndex(3)))]);
        assert!(matches!(
            out_of_range,
            Err(ScrapeError::InvalidConfiguration { .. })
        ));

        let self_loop = JobGraph::from_nodes(vec![(search_job("a"), Some(NodeIndex(0)))]);
        assert!(self_loop.is_err());

        let cycle = JobGraph::from_nodes(vec![
            (search_job("a"), Some(NodeIndex(1))),
            (search_job("a"), Some(NodeIndex(0))),
        ]);
        assert!(cycle.is_err());

        let forward = JobGraph::from_nodes(vec![
            (search_job("a"), Some(NodeIndex(1))),
            (search_job("a"), None),
        ]);
        assert!(forward.is_ok());
    }

    #[test]
    fn add_rejects_missing_parent() {
        let mut graph = JobGraph::new();
        assert!(graph.add(search_job("a"), Some(NodeIndex(0))).is_err());
        let root = graph.add(search_job("a"), None).unwrap();
        assert!(graph.add(search_job("a"), Some(root)).is_ok());
    }

    // A random forest: node i's parent is drawn from 0..i (or none). Nodes are
    // then driven in an arbitrary order, each either succeeding or failing.
    fn forest() -> impl Strategy<Value = Vec<Option<usize>>> {
        (1usize..24).prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(None::<usize>).boxed()
                    } else {
                        proptest::option::of(0..i).boxed()
                    }
                })
                .collect::<Vec<_>>()
        })
    }

    proptest! {
        #[test]
        fn child_never_runs_before_parent_done(
            parents in forest(),
            picks in proptest::collection::vec((any::<prop::sample::Index>(), any::<bool>()), 0..64),
        ) {
            let nodes = parents
                .iter()
                .map(|p| (search_job("a"), p.map(NodeIndex)))
                .collect();
            let mut graph = JobGraph::from_nodes(nodes).unwrap();
            let mut ready = graph.prime();

            for (pick, succeed) in picks {
                if ready.is_empty() {
                    break;
                }
                let index = ready.remove(pick.index(ready.len()));
                if let Some(parent) = graph.node(index).unwrap().parent() {
                    prop_assert_eq!(graph.state(parent), Some(JobState::Done));
                }
                graph.mark_running(index).unwrap();

                if succeed {
                    ready.extend(graph.complete(index, search_output("a")).unwrap());
                } else {
                    let cascaded = graph
                        .fail(index, ScrapeError::missing_dependency("boom"))
                        .unwrap();
                    ready.retain(|i| !cascaded.contains(i));
                }
            }

            for (index, node) in graph.indexed() {
                if matches!(node.state(), JobState::Running | JobState::Done) {
                    if let Some(parent) = node.parent() {
                        prop_assert_eq!(graph.state(parent), Some(JobState::Done));
                    }
                }
                if node.state() == JobState::Failed {
                    for (_, child) in graph.indexed() {
                        if child.parent() == Some(index) {
                            prop_assert_eq!(child.state(), JobState::Failed);
                        }
                    }
                }
            }
        }
    }
}
