//! Context Assembler - builds the layered namespace a node's handlers read.
//!
//! Layers are assembled outermost first so every GATHER handler sees the
//! layers already built around it:
//! 1. **Global**: process-wide variables, then global-owned handlers
//! 2. **Domain**: one layer per graph domain, outermost domain first
//! 3. **Graph**: graph locals, then graph-owned handlers
//! 4. **Ancestors**: one layer per ancestor, root to nearest parent
//! 5. **Node**: the cursor node itself
//!
//! A node-like layer holds the owner's locals, then provider bindings for
//! its resolved requirements, then the output of handlers it owns. Within a
//! layer handlers merge in ascending priority, registration order among
//! equals, so the higher-priority or later-registered handler wins a key.
//! The finished namespace looks keys up narrowest layer first.

mod namespace;

pub use namespace::*;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use story_graph::{Entity, Graph, GraphError, Locals, Node, Registry, Uid};

use crate::capability::{CapabilityCache, HandlerCtx, Handler, Owner, Phase, Tier};
use crate::render::Renderer;

/// Assembles namespaces from the engine's variable sources and GATHER handlers.
pub struct ContextAssembler<'a> {
    capabilities: &'a CapabilityCache,
    globals: &'a Locals,
    domains: &'a BTreeMap<String, Locals>,
    resources: &'a [Registry<Node>],
    renderer: &'a dyn Renderer,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(
        capabilities: &'a CapabilityCache,
        globals: &'a Locals,
        domains: &'a BTreeMap<String, Locals>,
        resources: &'a [Registry<Node>],
        renderer: &'a dyn Renderer,
    ) -> Self {
        Self {
            capabilities,
            globals,
            domains,
            resources,
            renderer,
        }
    }

    /// Build the namespace for `node`.
    pub fn gather(&self, graph: &Graph, node: Uid) -> Result<LayeredNamespace, GraphError> {
        let target = graph.node(node).ok_or(GraphError::NodeNotFound(node))?;
        let mut namespace = LayeredNamespace::new();

        let mut global = Layer::new(Tier::Global, "global");
        global.merge(self.globals.clone());
        self.run_gather(graph, target, &Owner::Global, &mut global, &namespace);
        namespace.push_inner(global);

        for domain in &graph.domains {
            let mut layer = Layer::new(Tier::Domain, domain.as_str());
            if let Some(locals) = self.domains.get(domain) {
                layer.merge(locals.clone());
            }
            self.run_gather(graph, target, &Owner::Domain(domain.clone()), &mut layer, &namespace);
            namespace.push_inner(layer);
        }

        let mut graph_layer = Layer::new(Tier::Graph, graph.label.as_deref().unwrap_or("graph"));
        graph_layer.merge(graph.locals.clone());
        self.run_gather(graph, target, &Owner::Graph, &mut graph_layer, &namespace);
        namespace.push_inner(graph_layer);

        for ancestor in graph.iter_ancestors(node).into_iter().rev() {
            let layer = self.node_layer(graph, target, ancestor, Tier::Ancestors, &namespace);
            namespace.push_inner(layer);
        }

        let layer = self.node_layer(graph, target, target, Tier::Node, &namespace);
        namespace.push_inner(layer);

        debug!(node = %node, layers = namespace.len(), "namespace assembled");
        Ok(namespace)
    }

    fn node_layer(
        &self,
        graph: &Graph,
        target: &Node,
        owner: &Node,
        tier: Tier,
        outer: &LayeredNamespace,
    ) -> Layer {
        let mut layer = Layer::new(tier, owner.path_segment()).owned_by(owner.uid);
        layer.merge(owner.locals.clone());
        layer.merge(self.bindings(graph, owner));
        self.run_gather(graph, target, &Owner::Node(owner.uid), &mut layer, outer);
        layer
    }

    /// Namespace entries for the owner's resolved requirements.
    pub fn bindings(&self, graph: &Graph, owner: &Node) -> Locals {
        owner
            .requires
            .iter()
            .filter_map(|req| {
                let provider = req.satisfied_by()?;
                let binding = self.provider_binding(graph, provider)?;
                Some((req.binding_name().to_string(), binding))
            })
            .collect()
    }

    /// `{uid, label, kind, ...locals}` for a provider in the graph or a
    /// resource registry.
    fn provider_binding(&self, graph: &Graph, provider: Uid) -> Option<Value> {
        let node = graph
            .node(provider)
            .or_else(|| self.resources.iter().find_map(|registry| registry.get(provider)))?;

        let mut object: Map<String, Value> = node
            .locals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        object.insert("uid".to_string(), Value::String(node.uid.to_string()));
        object.insert(
            "label".to_string(),
            node.label().map_or(Value::Null, |l| Value::String(l.to_string())),
        );
        object.insert("kind".to_string(), Value::String(node.kind.clone()));
        Some(Value::Object(object))
    }

    fn run_gather(
        &self,
        graph: &Graph,
        target: &Node,
        owner: &Owner,
        layer: &mut Layer,
        outer: &LayeredNamespace,
    ) {
        let mut capabilities: Vec<_> = self
            .capabilities
            .owned_by(Phase::GatherContext, owner)
            .enumerate()
            .collect();
        capabilities.sort_by_key(|(seq, capability)| (capability.priority, *seq));

        let ctx = HandlerCtx {
            graph,
            node: target,
            namespace: outer,
            phase: Phase::GatherContext,
            renderer: self.renderer,
        };
        for (_, capability) in capabilities {
            if !capability.should_run(&ctx) {
                continue;
            }
            if let Handler::Gather(gather) = &capability.handler {
                layer.merge(gather(&ctx));
            }
        }
    }
}
