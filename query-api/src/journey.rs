use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use common_types::{AppFilter, AppFilterParams, IssueGroup, IssueKind};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{ApiError, Result};
use crate::groups::{find_app, groups_by_fingerprint};
use crate::store::{JourneyEvent, JourneyStep};

type IssueKey = (IssueKind, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub sessions: HashSet<Uuid>,
}

/// Screen transitions and per screen issue occurrences, before issue
/// groups are resolved.
#[derive(Debug, Default)]
pub struct JourneyGraph {
    nodes: Vec<String>,
    node_index: HashSet<String>,
    edges: Vec<Edge>,
    edge_index: HashMap<(String, String), usize>,
    issues: HashMap<String, HashMap<IssueKey, u64>>,
    bidirectional: bool,
}

impl JourneyGraph {
    /// Walks events in timestamp order keeping the current screen of
    /// every session. Issues before a session's first screen are dropped.
    pub fn build(events: &[JourneyEvent], bidirectional: bool) -> Self {
        let mut ordered: Vec<&JourneyEvent> = events.iter().collect();
        ordered.sort_by_key(|event| event.timestamp);

        let mut graph = JourneyGraph {
            bidirectional,
            ..Default::default()
        };
        let mut current: HashMap<Uuid, String> = HashMap::new();

        for event in ordered {
            match &event.step {
                JourneyStep::Screen(name) => {
                    graph.add_node(name);
                    if let Some(previous) = current.get(&event.session_id) {
                        if previous != name {
                            graph.add_transition(previous.clone(), name.clone(), event.session_id);
                        }
                    }
                    current.insert(event.session_id, name.clone());
                }
                JourneyStep::Issue { kind, fingerprint } => {
                    if let Some(node) = current.get(&event.session_id) {
                        *graph
                            .issues
                            .entry(node.clone())
                            .or_default()
                            .entry((*kind, fingerprint.clone()))
                            .or_default() += 1;
                    }
                }
            }
        }

        graph
    }

    fn add_node(&mut self, name: &str) {
        if self.node_index.insert(name.to_string()) {
            self.nodes.push(name.to_string());
        }
    }

    fn add_transition(&mut self, source: String, target: String, session_id: Uuid) {
        let reverse = (target.clone(), source.clone());
        let key = if self.bidirectional && self.edge_index.contains_key(&reverse) {
            reverse
        } else {
            (source, target)
        };

        let index = match self.edge_index.get(&key) {
            Some(index) => *index,
            None => {
                self.edges.push(Edge {
                    source: key.0.clone(),
                    target: key.1.clone(),
                    sessions: HashSet::new(),
                });
                self.edge_index.insert(key, self.edges.len() - 1);
                self.edges.len() - 1
            }
        };
        self.edges[index].sessions.insert(session_id);
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Fingerprints of every issue seen on any node, per kind.
    pub fn fingerprints(&self, kind: IssueKind) -> Vec<String> {
        let mut fingerprints: Vec<String> = self
            .issues
            .values()
            .flat_map(|counts| counts.keys())
            .filter(|(k, _)| *k == kind)
            .map(|(_, fingerprint)| fingerprint.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        fingerprints.sort();
        fingerprints
    }

    /// Resolves fingerprints to groups. Fingerprints without a group are
    /// left out.
    pub fn into_journey(self, groups: &HashMap<IssueKey, IssueGroup>) -> Journey {
        let summaries = |counts: Option<&HashMap<IssueKey, u64>>, kind: IssueKind| {
            let mut summaries: Vec<IssueSummary> = counts
                .into_iter()
                .flatten()
                .filter(|((k, _), _)| *k == kind)
                .filter_map(|(key, count)| {
                    groups.get(key).map(|group| IssueSummary {
                        id: group.id,
                        title: group.title(),
                        count: *count,
                    })
                })
                .collect();
            summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
            summaries
        };

        let nodes = self
            .nodes
            .iter()
            .map(|name| {
                let counts = self.issues.get(name);
                Node {
                    id: name.clone(),
                    issues: NodeIssues {
                        crashes: summaries(counts, IssueKind::Exception),
                        anrs: summaries(counts, IssueKind::Anr),
                    },
                }
            })
            .collect();

        let links = self
            .edges
            .iter()
            .map(|edge| Link {
                source: edge.source.clone(),
                target: edge.target.clone(),
                value: edge.sessions.len() as u64,
            })
            .collect();

        Journey { nodes, links }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueSummary {
    pub id: Uuid,
    pub title: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeIssues {
    pub crashes: Vec<IssueSummary>,
    pub anrs: Vec<IssueSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub issues: NodeIssues,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub source: String,
    pub target: String,
    /// Distinct sessions that made the transition.
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Journey {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

pub async fn get_journey(
    State(state): State<AppState>,
    Path(app_id): Path<Uuid>,
    Query(params): Query<AppFilterParams>,
) -> Result<Json<Journey>> {
    let filter = AppFilter::from_params(app_id, &params, Utc::now())?;
    find_app(&state.pg_pool, app_id)
        .await?
        .ok_or(ApiError::AppNotFound(app_id))?;

    let events = state.events.journey_events(&filter).await?;
    let graph = JourneyGraph::build(&events, filter.bigraph);

    let mut groups = HashMap::new();
    for kind in [IssueKind::Exception, IssueKind::Anr] {
        let fingerprints = graph.fingerprints(kind);
        for group in groups_by_fingerprint(&state.pg_pool, kind, app_id, &fingerprints).await? {
            groups.insert((kind, group.fingerprint.clone()), group);
        }
    }

    tracing::debug!(
        app_id = %app_id,
        events = events.len(),
        nodes = graph.nodes().len(),
        links = graph.edges().len(),
        "journey built"
    );

    Ok(Json(graph.into_journey(&groups)))
}
