/// Why the locator cascade could not produce an element. Recorded as a
/// `[FAILED]` state; execution continues with the next step.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("Insufficient selector info for {action}")]
    InsufficientInfo { action: String },

    #[error("No visible element matched '{description}'")]
    NoMatch { description: String },

    #[error("Locator budget of {budget_ms}ms exhausted for '{description}'")]
    BudgetExhausted { description: String, budget_ms: u64 },
}
