pub mod executor;
pub mod machine;
pub mod parsing;
pub mod planner;
pub mod prompts;
pub mod transcript;

pub use executor::{ModelTaskExecutor, TaskExecutor, executor_input};
pub use machine::{PlanMachine, PlanOutcome, PlanState};
pub use parsing::{ParsedResponse, parse_priority_plans, parse_response};
pub use planner::{Clarifier, PlanProposal, Planner, PriorityPlans};
pub use transcript::{Transcript, trim_messages};
