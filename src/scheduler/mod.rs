pub mod adapter;
pub mod coordinator;

pub use adapter::ExecutionAdapter;
pub use coordinator::{
    Priority, ScheduledExecution, Scheduler, StateChange, StateChangeListener, ExecutionStatus, TaskDescriptor,
    WorkFn, WorkFuture, WorkResult,
};
