mod args;
mod batch;
mod driver;
mod proc;
mod progress;
mod types;
mod write;

pub use args::*;
pub use batch::{BatchError, BatchRunner, ItemOutcome, ItemProcessor, ItemReport};
pub use driver::{
    AdjustArgs, AnnotateArgs, BatchArgs, Command, IdentifyArgs, MZIdentifier, MZIdentifierError,
};
pub use proc::SearchContext;
pub use progress::{BatchSummary, ProgressRecord};
pub use types::DEFAULT_WORKERS;
pub use write::{write_report, Report};
