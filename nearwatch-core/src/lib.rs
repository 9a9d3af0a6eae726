pub mod alerts;
pub mod crypto;
pub mod gate;
pub mod geo;
pub mod matching;
pub mod models;
pub mod notify;
pub mod privacy;
pub mod retention;
pub mod schema;
pub mod settings;
pub mod store;
pub mod submissions;

use nearwatch_shared::types::job::Job;

/// A persisted record plus the background jobs its creation implies. The
/// caller hands `jobs` to the queue once the request has committed.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub record: T,
    pub jobs: Vec<Job>,
}

impl<T> Committed<T> {
    pub fn new(record: T, jobs: Vec<Job>) -> Self {
        Self { record, jobs }
    }
}
