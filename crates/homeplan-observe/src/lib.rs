mod status;

pub use status::StatusReporter;

use homeplan_core::{
    PlanStatus, PriorityVariant, RegisteredPlan, StatusConfig, StatusSink, Task, TaskStatus,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Install the stderr `tracing` subscriber. `RUST_LOG` wins when set.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "homeplan=debug" } else { "homeplan=warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Sink used when status mirroring is disabled.
#[derive(Debug, Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn register_plan(&mut self, goal_text: &str, tasks: &[Task]) -> Option<RegisteredPlan> {
        debug!(goal = goal_text, tasks = tasks.len(), "status mirroring disabled");
        None
    }

    fn update_plan_status(&mut self, _status: PlanStatus, _final_text: Option<&str>) {}

    fn update_task_status(&mut self, _task: &Task, _status: TaskStatus, _result: Option<&str>) {}
}

/// Reporter for `cfg`, or a [`NullStatusSink`] when disabled or unbuildable.
pub fn status_sink(cfg: &StatusConfig, priority: Option<PriorityVariant>) -> Box<dyn StatusSink> {
    if !cfg.enabled {
        return Box::new(NullStatusSink);
    }
    match StatusReporter::new(cfg) {
        Ok(reporter) => match priority {
            Some(variant) => Box::new(reporter.with_priority(variant)),
            None => Box::new(reporter),
        },
        Err(err) => {
            warn!(error = %err, "status reporter unavailable; continuing without status mirroring");
            Box::new(NullStatusSink)
        }
    }
}
