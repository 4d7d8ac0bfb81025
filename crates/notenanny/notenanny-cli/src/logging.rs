use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the stderr subscriber. `RUST_LOG` wins over the `-v`/`-q` counts.
pub fn init(verbose: u8, quiet: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .context("install log subscriber")
}

pub fn default_directive(verbose: u8, quiet: u8) -> &'static str {
    match i16::from(verbose) - i16::from(quiet) {
        ..=-2 => "error",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::default_directive;

    #[test]
    fn verbosity_flags_shift_the_level() {
        assert_eq!(default_directive(0, 0), "info");
        assert_eq!(default_directive(1, 0), "debug");
        assert_eq!(default_directive(3, 0), "trace");
        assert_eq!(default_directive(0, 1), "warn");
        assert_eq!(default_directive(0, 5), "error");
    }
}
