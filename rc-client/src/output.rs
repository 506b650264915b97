//! Client-side presentation: colorized stdout/stderr in the common case,
//! raw canonical JSON on stderr when `--verbose` is set.

use colored::Colorize;
use rc_core::Response;

/// Render one response to the terminal for a given host.
///
/// In non-verbose mode, captured stdout is printed in green and stderr in
/// red, matching the "output is good, errors are bad" convention used
/// across the fleet-administration tooling this client descends from.
/// In verbose mode, the raw response is serialized to canonical JSON on
/// stderr instead, with coloring suppressed entirely.
pub fn print_response(host: Option<&str>, response: &Response, verbose: bool) {
    if let Some(host) = host {
        println!("{}", format!("== {host} ==").bold());
    }

    if verbose {
        match response.to_frame() {
            Ok(frame) => eprintln!("{frame}"),
            Err(e) => eprintln!("failed to serialize response: {e}"),
        }
        return;
    }

    if !response.stdout.is_empty() {
        print!("{}", response.stdout.green());
    }
    if !response.stderr.is_empty() {
        eprint!("{}", response.stderr.red());
    }
}

/// Render a failed dispatch attempt (dial failure, write failure, ...).
pub fn print_error(host: Option<&str>, error: &rc_core::RcError, verbose: bool) {
    if let Some(host) = host {
        println!("{}", format!("== {host} ==").bold());
    }
    if verbose {
        eprintln!("{{\"error\":{:?}}}", error.to_string());
    } else {
        eprintln!("{}", error.to_string().red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_response_is_canonical_json() {
        let resp = Response {
            id: "1".to_string(),
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            signal: None,
        };
        // Smoke test: serialization must not panic and must round-trip.
        let frame = resp.to_frame().unwrap();
        assert!(frame.contains("\"id\":\"1\""));
    }
}
