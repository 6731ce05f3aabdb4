//! Startup helpers for the session replay binary.
//!
//! Reads JSON-lines session events from stdin and writes one JSON result per
//! line to stdout.

use std::process::ExitCode;

use anyhow::Context;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::session::{self, AccumulatorConfig, SessionEvent, SessionManager};

/// Counters for one replay run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    /// Events applied successfully.
    pub applied: usize,
    /// Lines that failed to parse or were rejected.
    pub rejected: usize,
}

/// Run the replay (used by the `session-replay` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` once stdin is exhausted, `1` on bootstrap failure.
#[must_use]
pub fn run() -> ExitCode {
    session::init_tracing();
    tracing::info!("Starting session replay v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(replay_stdin()) {
        Ok(stats) => {
            tracing::info!(applied = stats.applied, rejected = stats.rejected, "Replay finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Replay failed: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn replay_stdin() -> anyhow::Result<ReplayStats> {
    let config = AccumulatorConfig::from_env().context("loading configuration")?;
    let grace = config.writer.drain_grace();
    let manager = SessionManager::from_config(config)
        .await
        .context("initializing session backends")?;

    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    let stats = replay(&manager, input, &mut output).await;

    let report = manager.shutdown(grace).await;
    if !report.completed {
        tracing::warn!(
            abandoned = report.abandoned,
            waited_ms = report.waited_ms,
            "Writer did not drain before exit"
        );
    }
    stats
}

/// Apply every event in `input` to `manager`, writing one result line each.
///
/// Blank lines are skipped. A line that fails to parse or is rejected by the
/// manager produces an error record; replay continues with the next line.
///
/// # Errors
/// Returns an error only if reading `input` or writing `output` fails.
pub async fn replay<R, W>(
    manager: &SessionManager,
    input: R,
    output: &mut W,
) -> anyhow::Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = input.lines();
    let mut line_no = 0_usize;

    while let Some(line) = lines.next_line().await.context("reading events")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<SessionEvent>(&line) {
            Ok(event) => match manager.handle(event).await {
                Ok(outcome) => {
                    stats.applied += 1;
                    json!({ "line": line_no, "ok": true, "outcome": outcome })
                }
                Err(e) => {
                    stats.rejected += 1;
                    json!({ "line": line_no, "ok": false, "error": e.to_string() })
                }
            },
            Err(e) => {
                stats.rejected += 1;
                tracing::debug!(line = line_no, "Unparseable event: {e}");
                json!({ "line": line_no, "ok": false, "error": format!("invalid event: {e}") })
            }
        };

        let mut encoded = serde_json::to_vec(&record).context("encoding result")?;
        encoded.push(b'\n');
        output.write_all(&encoded).await.context("writing result")?;
    }

    output.flush().await.context("flushing output")?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionBackends;
    use serde_json::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn test_replay_writes_one_record_per_event() {
        let manager =
            SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory())
                .unwrap();
        let input = concat!(
            r#"{"type":"start","session_id":"s1","conversation_id":"c1"}"#,
            "\n\n",
            r#"{"type":"turn","session_id":"s1","role":"user","content":"hello"}"#,
            "\n",
            "not json\n",
            r#"{"type":"end","session_id":"s1"}"#,
            "\n",
        );

        let mut output = Vec::new();
        let stats = replay(&manager, input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 3, rejected: 1 });

        let records: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["outcome"]["outcome"], "started");
        assert_eq!(records[1]["line"], 3);
        assert_eq!(records[1]["outcome"]["message"]["sequence"], 1);
        assert_eq!(records[2]["ok"], false);
        assert_eq!(records[3]["outcome"]["summary"]["total_messages"], 1);

        let report = manager.shutdown(Duration::from_secs(1)).await;
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_replay_reports_unknown_session() {
        let manager =
            SessionManager::new(AccumulatorConfig::default(), SessionBackends::in_memory())
                .unwrap();
        let input = r#"{"type":"end","session_id":"ghost"}"#;

        let mut output = Vec::new();
        let stats = replay(&manager, input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(stats.rejected, 1);

        let record: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(record["error"], "unknown session: ghost");
    }
}
