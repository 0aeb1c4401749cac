use serde::{Deserialize, Serialize};

use story_graph::{RequirementId, Uid};

/// Where a provider came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum Provisioner {
    /// An existing node in the graph.
    Graph,
    /// An external resource registry, by position.
    Resources(usize),
    /// A template, by uid.
    Template(Uid),
}

/// What the resolver did for one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Searched for an existing provider.
    Existing,
    /// Built a new provider from a template.
    Create,
    /// Kept a provider bound in an earlier step.
    Reuse,
}

/// Record of one resolution attempt, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReceipt {
    /// The node or edge owning the requirement.
    pub requirer: Uid,
    pub provisioner_id: Option<Provisioner>,
    pub requirement_id: RequirementId,
    pub provider_id: Option<Uid>,
    pub operation: Operation,
    pub accepted: bool,
    pub hard_req: bool,
    pub reason: Option<String>,
}

/// Per-step summary of resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningReceipt {
    pub receipts: Vec<BuildReceipt>,
    /// Hard requirements of the visited nodes that could not be satisfied.
    pub unresolved_hard_requirements: Vec<RequirementId>,
    /// Soft requirements that could not be satisfied and were waived.
    pub waived_soft_requirements: Vec<RequirementId>,
    /// Edges whose own hard requirements failed; they stay unavailable.
    pub unavailable_transitions: Vec<Uid>,
}

impl PlanningReceipt {
    pub fn is_blocked(&self) -> bool {
        !self.unresolved_hard_requirements.is_empty()
    }

    /// Receipts that built a new provider.
    pub fn builds(&self) -> impl Iterator<Item = &BuildReceipt> {
        self.receipts
            .iter()
            .filter(|r| r.accepted && r.operation == Operation::Create)
    }

    /// Reasons for every rejected hard requirement, in order.
    pub fn hard_failure_reasons(&self) -> Vec<String> {
        self.receipts
            .iter()
            .filter(|r| {
                !r.accepted && r.hard_req && self.unresolved_hard_requirements.contains(&r.requirement_id)
            })
            .filter_map(|r| r.reason.clone())
            .collect()
    }

    pub fn merge(&mut self, other: PlanningReceipt) {
        self.receipts.extend(other.receipts);
        self.unresolved_hard_requirements
            .extend(other.unresolved_hard_requirements);
        self.waived_soft_requirements.extend(other.waived_soft_requirements);
        self.unavailable_transitions.extend(other.unavailable_transitions);
    }
}
