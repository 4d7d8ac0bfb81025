use crate::CancellationToken;
use anyhow::{Context, Result, bail};
use once_cell::sync::OnceCell;

static INTERRUPT_TOKEN: OnceCell<CancellationToken> = OnceCell::new();

/// Exit status after a second interrupt, as a shell reports SIGINT.
const FORCED_EXIT_STATUS: i32 = 130;

/// Route SIGINT/SIGTERM to `token`. The first signal cancels it (the running
/// child is terminated by the executor and no further write-back happens);
/// a second signal exits immediately.
pub fn install_interrupt_handler(token: &CancellationToken) -> Result<()> {
    if INTERRUPT_TOKEN.set(token.clone()).is_err() {
        bail!("interrupt handler already installed");
    }
    install_platform_handler(token)
}

#[cfg(unix)]
fn install_platform_handler(token: &CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    for signo in [SIGINT, SIGTERM] {
        // Registered first, so it sees the flag as the previous signal left it.
        flag::register_conditional_shutdown(signo, FORCED_EXIT_STATUS, token.flag())
            .with_context(|| format!("install shutdown handler for signal {signo}"))?;
        flag::register(signo, token.flag())
            .with_context(|| format!("install handler for signal {signo}"))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn install_platform_handler(_token: &CancellationToken) -> Result<()> {
    tracing::warn!("interrupt handling is only wired up on unix targets");
    Ok(())
}
