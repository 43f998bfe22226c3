use std::process::ExitCode;

use tracing::error;

fn main() -> ExitCode {
    cffsat_engine::worker::init_worker_tracing();
    match cffsat_engine::worker::serve_stdio() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker failed");
            ExitCode::from(2)
        }
    }
}
