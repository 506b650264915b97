//! Fan-out driver: batched parallel dispatch across many hosts, with
//! inter-batch delay, connection retry, and order-of-completion result
//! emission.

use rc_core::{MessageOptions, RcError, Response};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::config::ClientConfig;
use crate::output;
use crate::session::Session;

/// One host's outcome: either a response or the error that prevented
/// getting one.
pub struct HostResult {
    pub host: String,
    pub outcome: Result<Response, RcError>,
}

/// Dial `host`, retrying up to `retry` times on dial failure, then send
/// `command` once connected. A failed send (as opposed to a failed dial)
/// is never retried — it surfaces directly as a `WriteFailure`.
async fn dispatch(config: ClientConfig, host: String, command: String, retry: u32) -> HostResult {
    let mut attempt = 0;
    loop {
        match Session::start(&config, &host).await {
            Ok(session) => {
                let response = session.send(&command, MessageOptions::default()).await;
                session.stop().await;
                let outcome = response.ok_or_else(|| {
                    RcError::WriteFailure(std::io::Error::other("no response received"))
                });
                return HostResult { host, outcome };
            }
            Err(e) => {
                if attempt < retry {
                    attempt += 1;
                    continue;
                }
                return HostResult {
                    host,
                    outcome: Err(e),
                };
            }
        }
    }
}

/// Dispatch a single batch of hosts in parallel and drain exactly as many
/// results as were dispatched, in completion order.
async fn run_batch(config: &ClientConfig, hosts: &[String], command: &str) {
    let (tx, mut rx) = mpsc::channel(hosts.len().max(1));

    for host in hosts {
        let config = config.clone();
        let host = host.clone();
        let command = command.to_string();
        let tx = tx.clone();
        let retry = config.retry;
        tokio::spawn(async move {
            let result = dispatch(config, host, command, retry).await;
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    for _ in 0..hosts.len() {
        let Some(result) = rx.recv().await else {
            break;
        };
        match result.outcome {
            Ok(response) => output::print_response(Some(&result.host), &response, config.verbose),
            Err(e) => output::print_error(Some(&result.host), &e, config.verbose),
        }
    }
}

/// Read hostnames line-by-line from `reader`, batch up to
/// `config.batch_size` at a time, and dispatch each batch in turn,
/// sleeping `config.delay_ms` before every batch after the first.
///
/// Always exits 0 once every batch has completed, matching the
/// streaming-mode contract.
pub async fn run_streaming<R>(config: &ClientConfig, command: &str, reader: R) -> i32
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut first_batch = true;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading host from stdin");
                break;
            }
        };

        let host = line.trim().to_lowercase();
        if host.is_empty() {
            continue;
        }
        batch.push(host);

        if batch.len() >= config.batch_size {
            if !first_batch && config.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
            }
            first_batch = false;
            run_batch(config, &batch, command).await;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        if !first_batch && config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;
        }
        run_batch(config, &batch, command).await;
    }

    0
}

/// Single-host mode: dial, send once, print, and exit with the response's
/// own exit code (or `-1` on dial/send failure).
pub async fn run_single(config: &ClientConfig, host: &str, command: &str) -> i32 {
    let result = dispatch(
        config.clone(),
        host.to_string(),
        command.to_string(),
        config.retry,
    )
    .await;
    match result.outcome {
        Ok(response) => {
            output::print_response(None, &response, config.verbose);
            response.exit_code
        }
        Err(e) => {
            output::print_error(None, &e, config.verbose);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streaming_skips_blank_and_lowercases_hosts() {
        let input = b"  Host1  \n\nHOST2\n" as &[u8];
        let mut lines = BufReader::new(input).lines();
        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let host = line.trim().to_lowercase();
            if !host.is_empty() {
                seen.push(host);
            }
        }
        assert_eq!(seen, vec!["host1".to_string(), "host2".to_string()]);
    }
}
