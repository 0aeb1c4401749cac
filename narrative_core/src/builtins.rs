//! Default capabilities registered with every engine context.
//!
//! They are ordinary global capabilities at fixed priorities, so scripts can
//! run before or after them by picking a priority.

use tracing::warn;

use story_graph::{Edge, EdgeKind, EffectError, EffectTarget, Scope};

use crate::capability::{priority, Capability, EffectCtx, HandlerCtx, Owner, Phase, Transition};
use crate::error::HandlerError;
use crate::journal::Fragment;

pub const RENDER_CONTENT: &str = "render_content";
pub const CHOICE_MENU: &str = "choice_menu";
pub const NODE_EFFECTS: &str = "node_effects";
pub const POST_EFFECTS: &str = "post_effects";
pub const COUNT_VISIT: &str = "count_visit";
pub const FOLLOW_REDIRECTS: &str = "follow_redirects";
pub const FOLLOW_CONTINUES: &str = "follow_continues";

pub fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability::effect(NODE_EFFECTS, Phase::ApplyEffects, Owner::Global, |ctx| {
            apply_effects(ctx, false)
        })
        .when(|ctx| !ctx.node.effects.is_empty()),
        Capability::journal(RENDER_CONTENT, Owner::Global, render_content)
            .when(|ctx| ctx.node.content_template.is_some()),
        Capability::journal(CHOICE_MENU, Owner::Global, |ctx| Ok(choice_menu(ctx)))
            .with_priority(priority::LATE),
        Capability::effect(POST_EFFECTS, Phase::BookKeeping, Owner::Global, |ctx| {
            apply_effects(ctx, true)
        })
        .when(|ctx| !ctx.node.post_effects.is_empty()),
        Capability::effect(COUNT_VISIT, Phase::BookKeeping, Owner::Global, count_visit)
            .with_priority(priority::LAST),
        Capability::transition(FOLLOW_REDIRECTS, Phase::Redirect, Owner::Global, |ctx| {
            follow_single(ctx, EdgeKind::Redirect)
        })
        .with_priority(priority::LAST),
        Capability::transition(FOLLOW_CONTINUES, Phase::Continues, Owner::Global, |ctx| {
            follow_single(ctx, EdgeKind::Continue)
        })
        .with_priority(priority::LAST),
    ]
}

/// Whether a transition can be taken right now, with the reason if not.
///
/// Every condition must hold against `scope` and every hard requirement on
/// the edge must be resolved.
pub fn availability(edge: &Edge, scope: &dyn Scope) -> Result<(), String> {
    if let Some(failed) = edge.conditions.iter().find(|c| !c.evaluate(scope)) {
        return Err(format!("requires {}", failed.describe()));
    }
    if let Some(missing) = edge.requires.iter().find(|r| r.hard && !r.is_resolved()) {
        return Err(format!("requires {}", missing.key));
    }
    Ok(())
}

fn render_content(ctx: &HandlerCtx<'_>) -> Result<Vec<Fragment>, HandlerError> {
    let Some(template) = &ctx.node.content_template else {
        return Ok(Vec::new());
    };
    let text = ctx.renderer.render(template, ctx.namespace)?;
    Ok(vec![Fragment::content(ctx.node.uid, text)])
}

fn choice_menu(ctx: &HandlerCtx<'_>) -> Vec<Fragment> {
    ctx.graph
        .edges_out(ctx.node.uid)
        .filter(|edge| edge.kind == EdgeKind::Choice)
        .map(|edge| {
            let reason = availability(edge, ctx.namespace).err();
            Fragment::Choice {
                edge: edge.uid,
                label: edge.display_label(),
                active: reason.is_none(),
                unavailable_reason: reason,
            }
        })
        .collect()
}

fn apply_effects(ctx: &mut EffectCtx<'_>, post: bool) -> Result<(), HandlerError> {
    let cursor = ctx.cursor;
    let node = ctx
        .graph
        .node(cursor)
        .ok_or(EffectError::TargetNotFound(cursor))?;
    let effects = if post {
        node.post_effects.clone()
    } else {
        node.effects.clone()
    };

    for effect in &effects {
        match effect.target() {
            EffectTarget::Node => {
                let node = ctx
                    .graph
                    .node_mut(cursor)
                    .ok_or(EffectError::TargetNotFound(cursor))?;
                effect.apply(&mut node.locals)?;
            }
            EffectTarget::Graph => effect.apply(&mut ctx.graph.locals)?,
        }
    }
    Ok(())
}

fn count_visit(ctx: &mut EffectCtx<'_>) -> Result<(), HandlerError> {
    let cursor = ctx.cursor;
    let node = ctx
        .graph
        .node_mut(cursor)
        .ok_or(EffectError::TargetNotFound(cursor))?;
    node.visits += 1;
    Ok(())
}

/// Follow the only available edge of `kind`. Zero or several: stay put.
fn follow_single(ctx: &HandlerCtx<'_>, kind: EdgeKind) -> Option<Transition> {
    let eligible: Vec<&Edge> = ctx
        .graph
        .edges_out(ctx.node.uid)
        .filter(|edge| edge.kind == kind)
        .filter(|edge| availability(edge, ctx.namespace).is_ok())
        .collect();

    match eligible.as_slice() {
        [edge] => Some(Transition::along(edge)),
        [] => None,
        several => {
            warn!(
                node = %ctx.node.uid,
                kind = kind.as_str(),
                count = several.len(),
                "ambiguous automatic transition, waiting for a choice"
            );
            None
        }
    }
}
