use std::io;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use mzidentifier::{MZIdentifier, MZIdentifierError};

#[cfg(feature = "mimalloc")]
use mimalloc::MiMalloc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy()
}

/// Log to STDERR and, if requested, to a file. The returned guard must live until
/// the program exits or buffered file records are lost.
fn init_logging(args: &MZIdentifier) -> io::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer()
        .compact()
        .with_writer(io::stderr)
        .with_filter(env_filter());

    if let Some(log_path) = args.log_file.as_deref() {
        let handle = std::fs::File::create(log_path)?;
        let (writer, guard) = tracing_appender::non_blocking(handle);
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_timer(fmt::time::ChronoLocal::rfc_3339())
            .with_writer(writer)
            .with_filter(env_filter());
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry().with(stderr_layer).init();
        Ok(None)
    }
}

fn main() -> Result<(), MZIdentifierError> {
    let args = MZIdentifier::parse();
    let _guard = init_logging(&args)?;
    args.main()
}
