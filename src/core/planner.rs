//! SG-004: Plan generation: diff the synthesized graph against the lock.

use super::synth::Assembly;
use super::types::*;

/// Generate a change plan by comparing the assembly to the last lock.
/// Lock entries with no counterpart in the assembly are planned for destruction.
pub fn plan(assembly: &Assembly, lock: Option<&StackLock>) -> SynthPlan {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for node in &assembly.nodes {
        let action = match lock.and_then(|l| l.resources.get(&node.path)) {
            Some(rl) if rl.hash == node.hash && rl.logical_id == node.logical_id => PlanAction::NoOp,
            Some(_) => PlanAction::Update,
            None => PlanAction::Create,
        };
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            description: describe_action(&node.path, &node.resource_type, &action),
            path: node.path.clone(),
            stack: node.stack.clone(),
            logical_id: node.logical_id.clone(),
            resource_type: node.resource_type.clone(),
            action,
        });
    }

    if let Some(lock) = lock {
        for (path, rl) in &lock.resources {
            if assembly.nodes.iter().any(|n| &n.path == path) {
                continue;
            }
            to_destroy += 1;
            let stack = path
                .split_once('/')
                .map(|(s, _)| s.to_string())
                .unwrap_or_else(|| lock.stack.clone());
            changes.push(PlannedChange {
                description: describe_action(path, &rl.resource_type, &PlanAction::Destroy),
                path: path.clone(),
                stack,
                logical_id: rl.logical_id.clone(),
                resource_type: rl.resource_type.clone(),
                action: PlanAction::Destroy,
            });
        }
    }

    SynthPlan {
        name: assembly.name.clone(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

fn describe_action(path: &str, resource_type: &str, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", path, resource_type),
        PlanAction::Update => format!("{}: update {} (rendered template changed)", path, resource_type),
        PlanAction::Destroy => format!("{}: destroy {}", path, resource_type),
        PlanAction::NoOp => format!("{}: no changes", path),
    }
}
