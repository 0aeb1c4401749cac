//! Resolver - binds requirements to providers.
//!
//! Per requirement: `Unresolved -> {Resolved | Unresolvable}`.
//!
//! 1. Policies that search existing entities look through the graph, then
//!    each external resource registry. Among graph candidates the one whose
//!    path shares the longest prefix with the requirer's path wins, older
//!    insertion first on ties.
//! 2. Policies that build pick the most specific template whose scope
//!    encloses the requirer and whose own hard requirements are satisfiable,
//!    earlier registration first on ties. The built node joins the graph
//!    beside the requirer and has its own requirements resolved before the
//!    original requirement is marked resolved.
//! 3. Every attempt yields a [`BuildReceipt`]. Within one epoch (one turn) a
//!    requirement is resolved at most once; repeat calls return the first
//!    receipt without touching the graph.

mod receipt;

pub use receipt::*;

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use story_graph::{
    BuildContext, Builder, Criteria, Edge, EdgeKind, EdgeRemovalPolicy, Entity, Graph, GraphError, Node, Registry,
    Requirement, RequirementId, ScopePath, Template, Uid,
};

/// A successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub provider: Uid,
    pub operation: Operation,
}

/// A failed resolution. Callers branch on `hard`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub hard: bool,
    pub reason: String,
}

pub type Resolution = Result<Resolved, Unresolved>;

/// Owner of a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirer {
    Node(Uid),
    Edge(Uid),
}

impl Requirer {
    pub fn uid(&self) -> Uid {
        match self {
            Requirer::Node(uid) | Requirer::Edge(uid) => *uid,
        }
    }
}

/// Search spaces beyond the graph itself.
#[derive(Clone, Copy)]
pub struct ProvisionSources<'a> {
    pub templates: &'a Registry<Template>,
    /// Extra registries searched by policies that accept existing entities.
    pub resources: &'a [Registry<Node>],
}

#[derive(Debug, Clone)]
pub struct Resolver {
    max_depth: usize,
    epoch: u64,
    receipts: HashMap<RequirementId, BuildReceipt>,
}

impl Resolver {
    /// Create a resolver; `max_depth` bounds nested template builds.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            epoch: 0,
            receipts: HashMap::new(),
        }
    }

    /// Start a new epoch. Requirements left unresolvable become eligible again.
    pub fn begin_epoch(&mut self) {
        self.epoch += 1;
        self.receipts.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Receipt recorded for `id` during the current epoch.
    pub fn receipt(&self, id: RequirementId) -> Option<&BuildReceipt> {
        self.receipts.get(&id)
    }

    /// Resolve every requirement declared by `node`.
    pub fn resolve_node(
        &mut self,
        graph: &mut Graph,
        node: Uid,
        sources: &ProvisionSources<'_>,
    ) -> Result<PlanningReceipt, GraphError> {
        let mut planning = PlanningReceipt::default();
        let failures = self.resolve_requires(graph, node, sources, 0, &mut planning.receipts)?;

        for (id, unresolved) in failures {
            if unresolved.hard {
                planning.unresolved_hard_requirements.push(id);
            } else {
                warn!(node = %node, requirement = %id, reason = %unresolved.reason, "soft requirement waived");
                planning.waived_soft_requirements.push(id);
            }
        }
        Ok(planning)
    }

    /// Resolve the requirements of transitions leaving `node`.
    ///
    /// A hard failure only makes its edge unavailable.
    pub fn resolve_edges(
        &mut self,
        graph: &mut Graph,
        node: Uid,
        sources: &ProvisionSources<'_>,
    ) -> Result<PlanningReceipt, GraphError> {
        let pending: Vec<(Uid, Vec<RequirementId>)> = graph
            .edges_out(node)
            .filter(|edge| edge.kind.is_transition() && !edge.requires.is_empty())
            .map(|edge| (edge.uid, edge.requires.iter().map(|r| r.id).collect()))
            .collect();

        let mut planning = PlanningReceipt::default();
        for (edge, ids) in pending {
            for id in ids {
                let resolution =
                    self.resolve_at(graph, Requirer::Edge(edge), id, sources, 0, &mut planning.receipts)?;
                match resolution {
                    Ok(_) => {}
                    Err(Unresolved { hard: true, .. }) => {
                        if !planning.unavailable_transitions.contains(&edge) {
                            planning.unavailable_transitions.push(edge);
                        }
                    }
                    Err(Unresolved { hard: false, .. }) => {
                        planning.waived_soft_requirements.push(id);
                    }
                }
            }
        }
        Ok(planning)
    }

    /// Resolve a single requirement.
    pub fn resolve_requirement(
        &mut self,
        graph: &mut Graph,
        requirer: Requirer,
        id: RequirementId,
        sources: &ProvisionSources<'_>,
    ) -> Result<Resolution, GraphError> {
        let mut receipts = Vec::new();
        self.resolve_at(graph, requirer, id, sources, 0, &mut receipts)
    }

    fn resolve_requires(
        &mut self,
        graph: &mut Graph,
        node: Uid,
        sources: &ProvisionSources<'_>,
        depth: usize,
        receipts: &mut Vec<BuildReceipt>,
    ) -> Result<Vec<(RequirementId, Unresolved)>, GraphError> {
        let ids: Vec<RequirementId> = graph
            .node(node)
            .ok_or(GraphError::NodeNotFound(node))?
            .requires
            .iter()
            .map(|r| r.id)
            .collect();

        let mut failures = Vec::new();
        for id in ids {
            if let Err(unresolved) = self.resolve_at(graph, Requirer::Node(node), id, sources, depth, receipts)? {
                failures.push((id, unresolved));
            }
        }
        Ok(failures)
    }

    fn resolve_at(
        &mut self,
        graph: &mut Graph,
        requirer: Requirer,
        id: RequirementId,
        sources: &ProvisionSources<'_>,
        depth: usize,
        receipts: &mut Vec<BuildReceipt>,
    ) -> Result<Resolution, GraphError> {
        let requirement = requirement(graph, requirer, id)?.clone();

        if let Some(receipt) = self.receipts.get(&id) {
            debug!(requirement = %id, "already resolved this epoch");
            receipts.push(receipt.clone());
            return Ok(outcome(receipt));
        }

        let base = BuildReceipt {
            requirer: requirer.uid(),
            provisioner_id: None,
            requirement_id: id,
            provider_id: None,
            operation: Operation::Existing,
            accepted: false,
            hard_req: requirement.hard,
            reason: None,
        };

        if let Some(provider) = requirement.satisfied_by() {
            if provider_exists(graph, sources, provider) {
                let receipt = BuildReceipt {
                    provider_id: Some(provider),
                    operation: Operation::Reuse,
                    accepted: true,
                    ..base
                };
                self.record(receipt, receipts);
                return Ok(Ok(Resolved {
                    provider,
                    operation: Operation::Reuse,
                }));
            }
        }

        let anchor = match requirer {
            Requirer::Node(uid) => uid,
            Requirer::Edge(uid) => graph.edge(uid).ok_or(GraphError::EdgeNotFound(uid))?.source,
        };
        debug!(
            requirer = %requirer.uid(),
            requirement = %requirement.describe(),
            policy = ?requirement.policy,
            depth,
            "resolving"
        );

        if depth > self.max_depth {
            let reason = format!("{}: nesting deeper than {} builds", requirement.key, self.max_depth);
            return self.fail(graph, requirer, &requirement, base, reason, receipts);
        }

        let path = graph.path(anchor);
        if requirement.policy.searches_existing() {
            if let Some((provisioner, provider)) = find_existing(graph, sources, &requirement, anchor, &path) {
                let receipt = BuildReceipt {
                    provisioner_id: Some(provisioner),
                    provider_id: Some(provider),
                    accepted: true,
                    ..base
                };
                return self.accept(graph, requirer, &requirement, receipt, receipts);
            }
        }

        if !requirement.policy.builds_from_template() {
            let reason = format!("no existing provider for {}", requirement.key);
            return self.fail(graph, requirer, &requirement, base, reason, receipts);
        }

        let base = BuildReceipt {
            operation: Operation::Create,
            ..base
        };
        let Some(template) = self.select_template(graph, sources, &requirement, &path, depth) else {
            let reason = format!("no satisfiable template provides {}", requirement.key);
            return self.fail(graph, requirer, &requirement, base, reason, receipts);
        };

        let built = {
            let requirer_node = graph.node(anchor);
            let ctx = BuildContext {
                template,
                requirement: &requirement,
                requirer: requirer_node,
                graph: &*graph,
            };
            template.build(&ctx)
        };
        let built_label = built.path_segment();
        let provider = match graph.parent(anchor).map(|parent| parent.uid) {
            Some(parent) => graph.add_child(parent, built)?,
            None => graph.add_node(built)?,
        };
        info!(
            template = template.label.as_deref().unwrap_or("?"),
            provider = %provider,
            key = %requirement.key,
            "built provider"
        );

        let mark = receipts.len();
        let nested = self.resolve_requires(graph, provider, sources, depth + 1, receipts)?;
        if nested.iter().any(|(_, unresolved)| unresolved.hard) {
            // Roll back the half-built provider and whatever was built for it.
            let orphans: Vec<Uid> = receipts[mark..]
                .iter()
                .filter(|r| r.accepted && r.operation == Operation::Create)
                .filter_map(|r| r.provider_id)
                .chain(std::iter::once(provider))
                .collect();
            for orphan in orphans {
                if graph.contains_node(orphan) {
                    graph.remove_node(orphan, EdgeRemovalPolicy::Cascade)?;
                }
            }
            debug!(provider = %provider, key = %requirement.key, "discarded unready provider");

            let reason = format!(
                "built {} for {} but its own hard requirements failed",
                built_label, requirement.key
            );
            let receipt = BuildReceipt {
                provisioner_id: Some(Provisioner::Template(template.uid)),
                provider_id: None,
                ..base
            };
            return self.fail(graph, requirer, &requirement, receipt, reason, receipts);
        }

        let receipt = BuildReceipt {
            provisioner_id: Some(Provisioner::Template(template.uid)),
            provider_id: Some(provider),
            accepted: true,
            ..base
        };
        self.accept(graph, requirer, &requirement, receipt, receipts)
    }

    fn accept(
        &mut self,
        graph: &mut Graph,
        requirer: Requirer,
        requirement: &Requirement,
        receipt: BuildReceipt,
        receipts: &mut Vec<BuildReceipt>,
    ) -> Result<Resolution, GraphError> {
        let provider = receipt.provider_id.ok_or(GraphError::RequirementNotFound(requirement.id))?;

        if let Requirer::Node(node) = requirer {
            if graph.contains_node(provider) {
                link(graph, node, provider, EdgeKind::Requires)?;
                link(graph, provider, node, EdgeKind::Fulfills)?;
                if let Some(kind) = requirement.link {
                    link(graph, node, provider, kind)?;
                }
            }
        }
        requirement_mut(graph, requirer, requirement.id)?.mark_resolved(provider);

        debug!(requirement = %requirement.id, provider = %provider, operation = ?receipt.operation, "resolved");
        let resolved = Resolved {
            provider,
            operation: receipt.operation,
        };
        self.record(receipt, receipts);
        Ok(Ok(resolved))
    }

    fn fail(
        &mut self,
        graph: &mut Graph,
        requirer: Requirer,
        requirement: &Requirement,
        base: BuildReceipt,
        reason: String,
        receipts: &mut Vec<BuildReceipt>,
    ) -> Result<Resolution, GraphError> {
        requirement_mut(graph, requirer, requirement.id)?.mark_unresolvable(reason.clone());
        debug!(requirement = %requirement.id, hard = requirement.hard, reason = %reason, "unresolvable");

        let receipt = BuildReceipt {
            accepted: false,
            reason: Some(reason.clone()),
            ..base
        };
        self.record(receipt, receipts);
        Ok(Err(Unresolved {
            hard: requirement.hard,
            reason,
        }))
    }

    fn record(&mut self, receipt: BuildReceipt, receipts: &mut Vec<BuildReceipt>) {
        self.receipts.insert(receipt.requirement_id, receipt.clone());
        receipts.push(receipt);
    }

    fn select_template<'s>(
        &self,
        graph: &Graph,
        sources: &ProvisionSources<'s>,
        requirement: &Requirement,
        path: &ScopePath,
        depth: usize,
    ) -> Option<&'s Template> {
        let criteria = template_criteria(requirement);
        let scope = path.parent();

        sources
            .templates
            .find_providers(&requirement.key)
            .into_iter()
            .filter(|template| criteria.matches(*template, None))
            .filter_map(|template| template.specificity(path).map(|s| (s, template)))
            .filter(|(_, template)| {
                self.satisfiable(graph, sources, template, &scope, depth + 1, &mut HashSet::new())
            })
            .max_by(|(a, ta), (b, tb)| {
                let order = |t: &Template| sources.templates.insertion_order(t.uid).unwrap_or(u64::MAX);
                a.cmp(b).then(order(*tb).cmp(&order(*ta)))
            })
            .map(|(_, template)| template)
    }

    /// Whether every hard requirement a template would stamp onto its node
    /// can be met, without touching the graph.
    fn satisfiable(
        &self,
        graph: &Graph,
        sources: &ProvisionSources<'_>,
        template: &Template,
        scope: &ScopePath,
        depth: usize,
        visiting: &mut HashSet<Uid>,
    ) -> bool {
        if depth > self.max_depth || !visiting.insert(template.uid) {
            return false;
        }

        let stamped: &[Requirement] = match &template.builder {
            Builder::Blueprint(node) => node.requires.as_slice(),
            Builder::Custom(_) => &[],
        };
        let ok = template
            .requires
            .iter()
            .chain(stamped)
            .filter(|r| r.hard)
            .all(|r| self.can_satisfy(graph, sources, r, scope, depth, visiting));

        visiting.remove(&template.uid);
        ok
    }

    fn can_satisfy(
        &self,
        graph: &Graph,
        sources: &ProvisionSources<'_>,
        requirement: &Requirement,
        scope: &ScopePath,
        depth: usize,
        visiting: &mut HashSet<Uid>,
    ) -> bool {
        if requirement.policy.searches_existing() && has_existing(graph, sources, requirement) {
            return true;
        }
        if !requirement.policy.builds_from_template() {
            return false;
        }

        let criteria = template_criteria(requirement);
        sources
            .templates
            .find_providers(&requirement.key)
            .into_iter()
            .filter(|template| criteria.matches(*template, None))
            .filter(|template| template.specificity(scope).is_some())
            .any(|template| self.satisfiable(graph, sources, template, scope, depth + 1, visiting))
    }
}

fn outcome(receipt: &BuildReceipt) -> Resolution {
    match (receipt.accepted, receipt.provider_id) {
        (true, Some(provider)) => Ok(Resolved {
            provider,
            operation: receipt.operation,
        }),
        _ => Err(Unresolved {
            hard: receipt.hard_req,
            reason: receipt.reason.clone().unwrap_or_default(),
        }),
    }
}

fn requirement(graph: &Graph, requirer: Requirer, id: RequirementId) -> Result<&Requirement, GraphError> {
    let found = match requirer {
        Requirer::Node(uid) => graph.node(uid).ok_or(GraphError::NodeNotFound(uid))?.requirement(id),
        Requirer::Edge(uid) => graph.edge(uid).ok_or(GraphError::EdgeNotFound(uid))?.requirement(id),
    };
    found.ok_or(GraphError::RequirementNotFound(id))
}

fn requirement_mut(
    graph: &mut Graph,
    requirer: Requirer,
    id: RequirementId,
) -> Result<&mut Requirement, GraphError> {
    let found = match requirer {
        Requirer::Node(uid) => graph
            .node_mut(uid)
            .ok_or(GraphError::NodeNotFound(uid))?
            .requirement_mut(id),
        Requirer::Edge(uid) => graph
            .edge_mut(uid)
            .ok_or(GraphError::EdgeNotFound(uid))?
            .requirement_mut(id),
    };
    found.ok_or(GraphError::RequirementNotFound(id))
}

/// Templates are filtered on kind and tags only; label and path describe
/// the provider, which does not exist yet.
fn template_criteria(requirement: &Requirement) -> Criteria {
    Criteria {
        label: None,
        path: None,
        ..requirement.criteria.clone()
    }
}

fn provider_exists(graph: &Graph, sources: &ProvisionSources<'_>, provider: Uid) -> bool {
    graph.contains_node(provider) || sources.resources.iter().any(|r| r.contains(provider))
}

fn find_existing(
    graph: &Graph,
    sources: &ProvisionSources<'_>,
    requirement: &Requirement,
    requirer: Uid,
    requirer_path: &ScopePath,
) -> Option<(Provisioner, Uid)> {
    let best = graph
        .find_providers(&requirement.key)
        .into_iter()
        .filter(|node| node.uid != requirer && node.is_ready())
        .filter_map(|node| {
            let path = graph.path(node.uid);
            requirement.criteria.matches(node, Some(&path)).then(|| {
                let order = graph.insertion_order(node.uid).unwrap_or(u64::MAX);
                (path.common_prefix_len(requirer_path), order, node.uid)
            })
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    if let Some((_, _, uid)) = best {
        return Some((Provisioner::Graph, uid));
    }

    // Resources rank the same way; registry order then insertion order break ties.
    sources
        .resources
        .iter()
        .enumerate()
        .flat_map(|(index, registry)| {
            registry
                .find_providers(&requirement.key)
                .into_iter()
                .enumerate()
                .map(move |(seq, node)| (index, seq, node))
        })
        .filter(|(_, _, node)| node.is_ready())
        .filter_map(|(index, seq, node)| {
            let path = node.path();
            requirement.criteria.matches(node, path.as_ref()).then(|| {
                let specificity = path.map_or(0, |p| p.common_prefix_len(requirer_path));
                (specificity, index, seq, node.uid)
            })
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(b.2.cmp(&a.2)))
        .map(|(_, index, _, uid)| (Provisioner::Resources(index), uid))
}

fn has_existing(graph: &Graph, sources: &ProvisionSources<'_>, requirement: &Requirement) -> bool {
    let in_graph = graph
        .find_providers(&requirement.key)
        .into_iter()
        .filter(|node| node.is_ready())
        .any(|node| requirement.criteria.matches(node, Some(&graph.path(node.uid))));
    in_graph
        || sources.resources.iter().any(|registry| {
            registry
                .find_providers(&requirement.key)
                .into_iter()
                .filter(|node| node.is_ready())
                .any(|node| requirement.criteria.matches(node, node.path().as_ref()))
        })
}

/// Add `source -> destination` of `kind` unless one already exists.
fn link(graph: &mut Graph, source: Uid, destination: Uid, kind: EdgeKind) -> Result<(), GraphError> {
    let exists = graph
        .edges_out(source)
        .any(|edge| edge.kind == kind && edge.destination == destination);
    if !exists {
        graph.add_edge(Edge::new(source, destination, kind))?;
    }
    Ok(())
}
