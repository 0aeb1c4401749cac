//! Engine context - the long-lived half of the engine.
//!
//! Holds everything that outlives a single story: configuration, the
//! capability cache, templates, global and domain variables, resource
//! registries and the renderer. A [`Ledger`] carries the per-story state
//! and the two meet in a [`Frame`] for one turn at a time.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

use story_graph::{Graph, GraphError, Locals, Node, Registry, Template, Uid};

use crate::builtins::default_capabilities;
use crate::capability::{Capability, CapabilityCache};
use crate::config::EngineConfig;
use crate::context_assembler::{ContextAssembler, LayeredNamespace};
use crate::error::{CapabilityError, EngineError};
use crate::frame::{Frame, TurnReport};
use crate::ledger::Ledger;
use crate::render::{PlaceholderRenderer, Renderer};
use crate::resolver::ProvisionSources;

pub struct EngineContext {
    pub config: EngineConfig,
    pub capabilities: CapabilityCache,
    pub templates: Registry<Template>,
    pub globals: Locals,
    pub domains: BTreeMap<String, Locals>,
    pub resources: Vec<Registry<Node>>,
    renderer: Box<dyn Renderer>,
}

impl EngineContext {
    /// Validate `config` and register the default capabilities.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let mut capabilities = CapabilityCache::new();
        for capability in default_capabilities() {
            capabilities.register(capability)?;
        }
        let renderer = Box::new(PlaceholderRenderer::new(config.strict_rendering));
        info!(
            step_budget = config.step_budget,
            max_resolution_depth = config.max_resolution_depth,
            "engine context ready"
        );

        Ok(Self {
            config,
            capabilities,
            templates: Registry::new(),
            globals: Locals::new(),
            domains: BTreeMap::new(),
            resources: Vec::new(),
            renderer,
        })
    }

    /// Swap the renderer used for content templates.
    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn register(&mut self, capability: Capability) -> Result<(), CapabilityError> {
        debug!(name = %capability.name, phase = %capability.phase, "registering capability");
        self.capabilities.register(capability)
    }

    pub fn add_template(&mut self, template: Template) -> Result<Uid, GraphError> {
        self.templates.add(template)
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(key.into(), value.into());
    }

    pub fn set_domain_var(
        &mut self,
        domain: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) {
        self.domains
            .entry(domain.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// Append a resource registry. Returns its index, searched in order
    /// after the graph.
    pub fn add_resources(&mut self, registry: Registry<Node>) -> usize {
        self.resources.push(registry);
        self.resources.len() - 1
    }

    pub fn assembler(&self) -> ContextAssembler<'_> {
        ContextAssembler::new(
            &self.capabilities,
            &self.globals,
            &self.domains,
            &self.resources,
            self.renderer(),
        )
    }

    pub fn sources(&self) -> ProvisionSources<'_> {
        ProvisionSources {
            templates: &self.templates,
            resources: &self.resources,
        }
    }

    /// Namespace `node` would see if the cursor were on it.
    pub fn gather(&self, graph: &Graph, node: Uid) -> Result<LayeredNamespace, GraphError> {
        self.assembler().gather(graph, node)
    }

    /// Run one turn from the ledger's cursor.
    pub fn step(&self, ledger: &mut Ledger) -> Result<TurnReport, EngineError> {
        Frame::new(self, ledger).run_turn()
    }

    /// Take a choice edge out of the cursor node and run the turn after it.
    pub fn choose(&self, ledger: &mut Ledger, edge: Uid) -> Result<TurnReport, EngineError> {
        Frame::new(self, ledger).choose(edge)
    }

    /// Remove a node using the configured edge removal policy.
    pub fn remove_node(&self, ledger: &mut Ledger, uid: Uid) -> Result<Node, EngineError> {
        ledger.remove_node(uid, self.config.edge_removal)
    }
}
