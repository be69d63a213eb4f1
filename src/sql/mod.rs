pub mod claim_jobs;
pub mod count_by_state;
pub mod finalize_job;
pub mod get_job;
pub mod insert_job;
pub mod orders;
pub mod return_jobs;
