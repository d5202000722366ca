//! tidewatch daemon - hook ingest server and session state engine
//!
//! Accepts hook events from Claude Code sessions over a Unix socket or
//! loopback TCP, keeps every session's phase and conversation history,
//! and routes approval decisions back to the waiting agent.

fn main() -> anyhow::Result<()> {
    tided::cli::main()
}
