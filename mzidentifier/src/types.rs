/// The capacity of the queue of peak lists waiting for a worker
pub(crate) const BUFFER_SIZE: usize = 1_000;
/// The number of worker threads used when none is requested
pub const DEFAULT_WORKERS: usize = 4;
/// The number of organisms listed per peak list by an exhaustive batch
pub const EXHAUSTIVE_TOP: usize = 10;
