//! Step budget helpers.

/// Whether another step may run given the executed count and the budget.
pub fn has_step_budget(step_index: u32, max_steps: u32) -> bool {
    step_index < max_steps
}

/// Whether the stepping phase is over: the environment reported completion or
/// the budget is spent.
pub fn stepping_finished(done: bool, step_index: u32, max_steps: u32) -> bool {
    done || !has_step_budget(step_index, max_steps)
}
