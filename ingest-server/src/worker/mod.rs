//! Background work: a Postgres job queue and the dispatcher that drains it.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::Dispatcher;
pub use queue::{ImportPayload, Job, JobQueue, JobRecord, JobStatus, JobType};
