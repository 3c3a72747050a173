//! Named durable queues: storage, workers and the dispatcher.

pub mod backend;
pub mod dispatcher;
pub mod processor;
pub mod record;
pub mod schedule;
pub mod store;
mod worker;

pub use backend::QueueBackend;
pub use dispatcher::JobDispatcher;
pub use processor::{GenericProcessor, JobProcessor, Processors};
pub use record::{
    JobPayload, JobRecord, JobStatus, NewJob, QueueListing, ScheduleRecord, Submission,
};
pub use store::SledQueueBackend;
