/*!
Logging and profiling setup for the command-line front end.

Logs always go to stderr so stdout only carries the JSON result. The filter comes from
`RUST_LOG`, falling back to a build-dependent default. With the `profiling` feature a
Chrome trace (viewable in Perfetto) can additionally be recorded with `--trace <file>`.
*/

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("debug,reqwest=info,hyper_util=info,rustls=info")
        } else {
            EnvFilter::new("info")
        }
    })
}

fn fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fmt::layer().with_writer(std::io::stderr).with_filter(env_filter())
}

/// Initialize logging; the returned guard flushes the trace file when dropped.
#[cfg(feature = "profiling")]
pub fn setup_logging_and_profiling(
    trace: Option<&std::path::Path>,
) -> Option<tracing_chrome::FlushGuard> {
    let (chrome_layer, guard) = match trace {
        Some(path) => {
            let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file(path)
                .include_args(true)
                .build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(chrome_layer)
        .with(fmt_layer())
        .init();

    match trace {
        Some(path) => tracing::info!("Recording Chrome trace to {}", path.display()),
        None => tracing::debug!("Logging initialized (no trace requested)"),
    }
    guard
}

#[cfg(not(feature = "profiling"))]
pub fn setup_logging() {
    tracing_subscriber::registry().with(fmt_layer()).init();
    tracing::debug!("Logging initialized (profiling disabled in this build)");
}
