//! Selection of few-shot examples for the interpreter prompt.

use crate::command::Example;
use std::collections::HashSet;

/// Limits applied when the example pool is too large for the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExampleBudget {
    /// Maximum number of examples in the prompt.
    pub cap: usize,
    /// How many examples the first, one-per-command pass may take.
    pub coverage: usize,
}

impl Default for ExampleBudget {
    fn default() -> Self {
        Self {
            cap: 12,
            coverage: 6,
        }
    }
}

impl ExampleBudget {
    pub fn new(cap: usize, coverage: usize) -> Self {
        Self { cap, coverage }
    }
}

/// Trims `examples` to the budget.
///
/// Pools within the cap are returned untouched. Otherwise the first example
/// of each command is taken in order until every command is covered or the
/// coverage limit is hit, then the remaining room is filled with examples
/// that carry at least one parameter, in order, without repeats.
pub fn balance(examples: Vec<Example>, budget: ExampleBudget) -> Vec<Example> {
    if examples.len() <= budget.cap {
        return examples;
    }
    let coverage = budget.coverage.min(budget.cap);

    let mut chosen: Vec<Example> = Vec::with_capacity(budget.cap);
    let mut covered: HashSet<&str> = HashSet::new();

    for example in &examples {
        if chosen.len() >= coverage {
            break;
        }
        if covered.insert(example.command.as_str()) {
            chosen.push(example.clone());
        }
    }

    for example in &examples {
        if chosen.len() >= budget.cap {
            break;
        }
        if !example.parameters.is_empty() && !chosen.contains(example) {
            chosen.push(example.clone());
        }
    }

    chosen
}
