#![cfg(unix)]

use std::time::{Duration, Instant};

use anyhow::Result;
use notenanny_process::{CancellationToken, install_interrupt_handler};
use signal_hook::consts::SIGINT;
use signal_hook::low_level::raise;

// One test per binary: the handler is process-wide and a second SIGINT exits.
#[test]
fn first_interrupt_cancels_the_token() -> Result<()> {
    let token = CancellationToken::new();
    install_interrupt_handler(&token)?;
    assert!(install_interrupt_handler(&CancellationToken::new()).is_err());
    assert!(!token.is_cancelled());

    raise(SIGINT)?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while !token.is_cancelled() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(token.is_cancelled());
    Ok(())
}
