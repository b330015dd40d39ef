//! Diagnostic tracing for the cmdtask binary.
//!
//! cmdtask writes to three places, and only the last one is controlled here:
//! captured command output goes to stdout, the verbose echo and
//! `Failed ---> <cmd>` notices go through [`Console`](crate::io::console::Console),
//! and `tracing` events (spawn, wait, cancel, watchdog) go to stderr filtered
//! by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. `RUST_LOG` selects the level; unset means `warn`,
/// so abandoned output readers and failed reaps still show up.
///
/// ```bash
/// RUST_LOG=cmdtask::command=debug cmdtask run --timeout 5 "make test"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
