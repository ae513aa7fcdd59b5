//! Terminal rendering for plans and simulation runs.

use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use phoenix_stack_core::{NodeId, Plan};
use phoenix_stack_engine::{ApplyReport, EngineError, StackEvent};

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn join(ids: &[&NodeId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

/// One row per node, in creation order.
pub fn plan_table(plan: &Plan) -> Table {
    let mut table = table();
    table.set_header(vec![
        Cell::new("#"),
        Cell::new("Node"),
        Cell::new("Kind"),
        Cell::new("Depends on"),
        Cell::new("Secrets"),
    ]);

    let secrets: Vec<&NodeId> = plan
        .nodes()
        .filter(|n| plan.secret_consumers(n.id()).is_some())
        .map(|n| n.id())
        .collect();

    for (i, id) in plan.creation_order().iter().enumerate() {
        let Some(node) = plan.node(id) else { continue };
        let derived: Vec<&NodeId> = secrets
            .iter()
            .copied()
            .filter(|secret| plan.is_secret_consumer(secret, id))
            .collect();
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(id.as_str()),
            Cell::new(node.kind().as_str()),
            Cell::new(join(&plan.upstream(id))),
            Cell::new(join(&derived)),
        ]);
    }
    table
}

pub fn format_event(event: &StackEvent) -> String {
    match event {
        StackEvent::Created { node, kind } => format!("  + {node} ({kind})"),
        StackEvent::Failed { node, error } => format!("  ! {node}: {error}"),
        StackEvent::Skipped { node, blocked_by } => {
            let blocked: Vec<&NodeId> = blocked_by.iter().collect();
            format!("  ~ {node} (blocked by {})", join(&blocked))
        }
        StackEvent::Destroyed { node } => format!("  - {node}"),
        StackEvent::Retained { node } => format!("  = {node} (retained)"),
    }
}

/// A failed node, with a remediation hint when the provider code has one.
pub fn format_failure(error: &EngineError) -> String {
    match error.suggestion() {
        Some(hint) => format!("  ! {error}\n    hint: {hint}"),
        None => format!("  ! {error}"),
    }
}

pub fn apply_summary(report: &ApplyReport) -> Table {
    let mut table = table();
    table.set_header(vec![Cell::new("Result"), Cell::new("Nodes")]);
    table.add_row(vec![Cell::new("created"), Cell::new(report.created.len())]);
    table.add_row(vec![Cell::new("failed"), Cell::new(report.failed.len())]);
    table.add_row(vec![Cell::new("skipped"), Cell::new(report.skipped.len())]);
    table.add_row(vec![
        Cell::new("secrets generated"),
        Cell::new(report.secrets_generated),
    ]);
    table
}
