//! Binary entrypoint that replays session events from stdin.

use std::process::ExitCode;

use session_accumulator::start_replay;

/// Replay JSON-lines session events and drain the background writer.
fn main() -> ExitCode {
    start_replay::run()
}
