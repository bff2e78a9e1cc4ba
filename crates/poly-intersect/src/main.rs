use std::process::ExitCode;

mod commands;
mod logging;
mod settings;

use settings::Settings;

fn main() -> ExitCode {
    let settings = Settings::from_cli();

    #[cfg(feature = "profiling")]
    let _trace_guard = logging::setup_logging_and_profiling(settings.trace.as_deref());
    #[cfg(not(feature = "profiling"))]
    logging::setup_logging();

    match commands::execute(&settings) {
        Ok(output) => {
            println!("{output:#}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            let root = e.root();
            if !std::ptr::eq(root, &e) {
                tracing::error!("Caused by: {root}");
            }
            ExitCode::FAILURE
        }
    }
}
