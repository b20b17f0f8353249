//! Adaptive Layout - interaction-driven widget ordering
//!
//! Command-line front end over a file-backed store.

// Use the library crate for all modules
use adaptive_layout::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging is initialized by the CLI once --verbose and the config are known
    cli::run().await
}
