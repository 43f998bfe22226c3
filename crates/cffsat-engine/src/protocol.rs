//! JSON exchange between a race and a worker process.
//!
//! The parent writes one [`WorkerRequest`] to the worker's stdin and closes it.
//! The worker answers with one [`WorkerReply`] line on stdout. Anything else a
//! worker leaves behind (exit status, stderr) is interpreted by the runner.

use std::io::{Read, Write};

use cffsat_formula::Formula;
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::solve::Verdict;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error on worker channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed worker message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker produced no reply")]
    NoReply,
}

/// Sent by the parent. Borrowing the formula keeps one copy per race.
#[derive(Debug, Serialize)]
pub struct WorkerRequestRef<'a> {
    pub engine: Engine,
    pub formula: &'a Formula,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_bytes: Option<u64>,
}

/// Owned form of [`WorkerRequestRef`], read by the worker.
#[derive(Debug, Deserialize)]
pub struct WorkerRequest {
    pub engine: Engine,
    pub formula: Formula,
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub engine: Engine,
    pub verdict: Verdict,
    pub solve_secs: f64,
}

pub fn write_request<W: Write>(writer: W, request: &WorkerRequestRef<'_>) -> Result<(), ProtocolError> {
    serde_json::to_writer(writer, request)?;
    Ok(())
}

pub fn read_request<R: Read>(reader: R) -> Result<WorkerRequest, ProtocolError> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn write_reply<W: Write>(mut writer: W, reply: &WorkerReply) -> Result<(), ProtocolError> {
    serde_json::to_writer(&mut writer, reply)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Parse the last non-empty line of a worker's stdout as its reply.
pub fn parse_reply(stdout: &[u8]) -> Result<WorkerReply, ProtocolError> {
    let line = stdout
        .split(|&b| b == b'\n')
        .rev()
        .find(|line| !line.iter().all(u8::is_ascii_whitespace))
        .ok_or(ProtocolError::NoReply)?;
    Ok(serde_json::from_slice(line)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_travels_through_a_buffer() {
        let formula = Formula::new(2, vec![vec![1, -2]]).unwrap();
        let mut buf = Vec::new();
        write_request(
            &mut buf,
            &WorkerRequestRef {
                engine: Engine::Splr,
                formula: &formula,
                memory_limit_bytes: None,
            },
        )
        .unwrap();
        let request = read_request(buf.as_slice()).unwrap();
        assert_eq!(request.engine, Engine::Splr);
        assert_eq!(request.formula, formula);
        assert_eq!(request.memory_limit_bytes, None);
    }

    #[test]
    fn test_parse_reply_skips_trailing_blank_lines() {
        let mut buf = b"noise\n".to_vec();
        write_reply(
            &mut buf,
            &WorkerReply {
                engine: Engine::Varisat,
                verdict: Verdict::Unsat,
                solve_secs: 0.5,
            },
        )
        .unwrap();
        buf.extend_from_slice(b"\n  \n");
        let reply = parse_reply(&buf).unwrap();
        assert_eq!(reply.verdict, Verdict::Unsat);
    }

    #[test]
    fn test_parse_reply_rejects_empty_and_garbage() {
        assert!(matches!(parse_reply(b""), Err(ProtocolError::NoReply)));
        assert!(matches!(parse_reply(b"{\"engine\":"), Err(ProtocolError::Json(_))));
    }
}
