pub mod destroy_job;
pub mod get_job;
pub mod insert_job;
pub mod lockers;
pub mod poll_jobs;
pub mod set_error;
pub mod unlock_job;
