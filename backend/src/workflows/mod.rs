// Workflow Automation Engine
//
// Event-driven automation for projects, tasks and invoices.
// Triggers decide eligibility, conditions guard, actions perform side effects.

pub mod actions;
pub mod conditions;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod models;
pub mod template;
pub mod triggers;

pub use actions::{ActionDeclaration, ActionError, ActionResult, ActionStatus, ActionType};
pub use conditions::{Condition, ConditionEvaluator, ConditionGroup, ConditionOperator, ConditionTree, LogicalOperator};
pub use context::{EntityRef, ExecutionContext, FieldChange, TriggeredBy};
pub use dispatch::WorkflowTriggers;
pub use engine::{ExecutionOptions, WorkflowEngine};
pub use executor::ActionExecutor;
pub use handlers::{ActionCollaborators, ActionHandler, ActionRegistry, HandlerContext};
pub use models::{ExecutionResult, ExecutionStatus, LogLevel, Workflow, WorkflowExecution, WorkflowLog, WorkflowStats};
pub use template::TemplateMode;
pub use triggers::{EntityLookup, TriggerDeclaration, TriggerEvaluator, TriggerType};
