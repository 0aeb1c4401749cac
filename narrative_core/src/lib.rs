//! # Narrative Core (The Cortex)
//!
//! The execution core of the narrative engine. It takes a `story_graph`
//! graph and a cursor and advances the story one turn at a time: resolving
//! what the current node needs, assembling the variables its handlers see,
//! applying effects and writing the journal.
//!
//! ## Core Components
//!
//! - **capability**: phases, tiers and the priority-ordered capability cache
//! - **context_assembler**: layered namespace built from global, domain, graph, ancestor and node variables
//! - **resolver**: satisfies requirements from the graph, resource registries or templates
//! - **frame**: the per-turn driver and the subroutine call stack
//! - **journal**: append-only, step-marked output stream
//! - **ledger**: persistent per-story state and the key-value store seam
//! - **engine**: long-lived context tying configuration, capabilities and templates together
//!
//! ## Design Philosophy
//!
//! - **Phase-Driven**: Every turn runs the same fixed phase sequence; behavior is added by registering capabilities, not by editing the driver
//! - **Narrowest Wins**: Node variables shadow ancestors, which shadow the graph, domains and globals
//! - **Auditable**: Every resolution and handler leaves a receipt

pub mod builtins;
pub mod capability;
pub mod config;
pub mod context_assembler;
pub mod engine;
pub mod error;
pub mod frame;
pub mod journal;
pub mod ledger;
pub mod render;
pub mod resolver;

pub use capability::*;
pub use config::*;
pub use context_assembler::*;
pub use engine::*;
pub use error::*;
pub use frame::*;
pub use journal::*;
pub use ledger::*;
pub use render::*;
pub use resolver::*;
