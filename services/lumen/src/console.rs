//! Text rendering for the terminal front end.

use lumen_core::interpreter::NOT_UNDERSTOOD;
use lumen_core::{CommandRegistry, PipelineOutcome};
use std::fmt::Write;

/// Lists every registered command with its parameters and defaults.
pub fn describe_commands(registry: &CommandRegistry) -> String {
    let mut out = String::from("Available commands:\n");
    for spec in registry.schemas() {
        let _ = writeln!(out, "  {} - {}", spec.name, spec.description);
        for (name, param) in &spec.parameters {
            let _ = writeln!(
                out,
                "      {}: {} (default: {:?})",
                name, param.description, param.default
            );
        }
    }
    out
}

/// Lines to print for the outcome of one utterance.
pub fn render(outcome: &PipelineOutcome) -> Vec<String> {
    match outcome {
        PipelineOutcome::Silence => Vec::new(),
        PipelineOutcome::NotUnderstood => vec![NOT_UNDERSTOOD.to_string()],
        PipelineOutcome::Executed { command, outcome } => {
            let mut lines = vec![format!("[{}]", command)];
            lines.extend(outcome.report.iter().map(|line| format!("  {}", line)));
            lines
        }
        PipelineOutcome::Failed { command, error } => {
            vec![format!("[{}] failed: {}", command, error)]
        }
    }
}
