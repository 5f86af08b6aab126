//! Error handling utilities

use tracing::error;

/// Report a fatal error and exit.
///
/// Configuration problems exit with 2, everything else with 1. With `-v` the
/// full cause chain is printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    use crate::error::Error;

    error!("Fatal error: {}", error);
    eprintln!("Error: {error}");

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    let exit_code = match error.downcast_ref::<Error>() {
        Some(Error::Config(_)) => 2,
        _ => 1,
    };
    std::process::exit(exit_code)
}
