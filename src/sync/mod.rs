mod puller;
mod worker;

pub use puller::{SyncSummary, Syncer};
pub use worker::{TickReport, Worker, WorkerExit};
