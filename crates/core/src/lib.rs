pub mod archivist;
pub mod capture;
pub mod completion;
pub mod constitution;
pub mod detectors;
pub mod driver;
pub mod executor;
pub mod locator;
pub mod metrics;
pub mod observer;
pub mod orchestrator;
pub mod overrides;
pub mod planner;
pub mod report;
pub mod role_tree;
pub mod rules;
pub mod schemas;
pub mod store;
pub mod strategy;
pub mod trace;

mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub use archivist::Archivist;
pub use completion::{classify_plan, slugify, validate_completion, CompletionError, PlanMode};
pub use constitution::{
    AgentConstitution, ConstitutionReport, ConstitutionViolation, FailureStore, ValidationFailure,
    ValidationLevel, ValidationRule,
};
pub use detectors::Detectors;
pub use driver::{BrowserContext, BrowserLauncher, BrowserSession, Locator, Page, Rect, TextMatch, Viewport};
pub use error::LocatorError;
pub use executor::{ExecutionOutcome, Executor, HealAdjustments};
pub use observer::Observer;
pub use orchestrator::{task_slug, Orchestrator, RunSummary};
pub use overrides::apply_site_overrides;
pub use planner::Planner;
pub use schemas::{
    Action, ExecutionPlan, PlanContext, PlanStep, RoleNode, Significance, UIState,
};
pub use strategy::{SelectorStrategy, StrategyGenerator, StrategyKind};
