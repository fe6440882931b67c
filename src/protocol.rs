//! Worker protocol
//!
//! Message contract between the supervisor and the isolated worker process:
//! - The request travels as one JSON document on the worker's stdin
//! - Protocol messages travel as newline-delimited JSON on the worker's stdout
//! - Native failures travel as one [`WorkerFailure`](crate::error::WorkerFailure)
//!   record on stderr, followed by a non-zero exit
//!
//! Any number of `Log` messages may precede exactly one terminal message
//! (`Answer` or `AnswerTypeInvalid`).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::answer::Answer;
use crate::error::SolutionError;

/// Parameters for one execution, passed by value across the isolation boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(rename = "solutionFileName")]
    pub solution_file_path: PathBuf,
    #[serde(rename = "functionToExecute")]
    pub function_name: String,
    #[serde(rename = "input")]
    pub raw_input: String,
    #[serde(rename = "lines")]
    pub input_lines: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(
        solution_file_path: impl Into<PathBuf>,
        function_name: impl Into<String>,
        raw_input: impl Into<String>,
    ) -> Self {
        let raw_input = raw_input.into();
        let input_lines = raw_input.lines().map(str::to_string).collect();
        Self {
            solution_file_path: solution_file_path.into(),
            function_name: function_name.into(),
            raw_input,
            input_lines,
        }
    }
}

/// Request as received by the worker, before required fields are checked
#[derive(Debug, Default, Deserialize)]
pub struct WorkerData {
    #[serde(rename = "solutionFileName")]
    solution_file_path: Option<PathBuf>,
    #[serde(rename = "functionToExecute")]
    function_name: Option<String>,
    #[serde(rename = "input")]
    raw_input: Option<String>,
    #[serde(rename = "lines")]
    input_lines: Option<Vec<String>>,
}

impl WorkerData {
    pub fn parse(json: &str) -> Result<Self, SolutionError> {
        serde_json::from_str(json)
            .map_err(|e| SolutionError::internal(format!("Invalid worker data: {}", e)))
    }

    pub fn into_request(self) -> Result<ExecutionRequest, SolutionError> {
        let missing = |field: &str| SolutionError::MissingWorkerData {
            field: field.to_string(),
        };

        Ok(ExecutionRequest {
            solution_file_path: self
                .solution_file_path
                .ok_or_else(|| missing("solutionFileName"))?,
            function_name: self
                .function_name
                .ok_or_else(|| missing("functionToExecute"))?,
            raw_input: self.raw_input.ok_or_else(|| missing("input"))?,
            input_lines: self.input_lines.ok_or_else(|| missing("lines"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProtocolMessage {
    Log {
        level: String,
        message: String,
        #[serde(default)]
        meta: Vec<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        answer: Answer,
        execution_time_ns: u64,
    },
    #[serde(rename_all = "camelCase")]
    AnswerTypeInvalid { answer_type: String },
}

/// Decode one stdout line from the worker
pub fn decode_line(line: &str) -> Result<ProtocolMessage, SolutionError> {
    serde_json::from_str(line).map_err(|e| {
        SolutionError::protocol(format!(
            "unrecognized message {:?}: {}",
            truncate(line, 200),
            e
        ))
    })
}

/// Destination for protocol messages inside the worker.
///
/// Sinks are driven from a forwarding thread while the solution runs.
pub trait MessageSink: Send {
    fn send(&mut self, message: &ProtocolMessage) -> Result<(), SolutionError>;
}

/// Writes each message as one JSON line
pub struct LineSink<W: Write> {
    writer: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> MessageSink for LineSink<W> {
    fn send(&mut self, message: &ProtocolMessage) -> Result<(), SolutionError> {
        let line = serde_json::to_string(message)
            .map_err(|e| SolutionError::internal(format!("Failed to encode message: {}", e)))?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| SolutionError::internal(format!("Failed to post message: {}", e)))
    }
}

impl MessageSink for Vec<ProtocolMessage> {
    fn send(&mut self, message: &ProtocolMessage) -> Result<(), SolutionError> {
        self.push(message.clone());
        Ok(())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_splits_lines() {
        let request = ExecutionRequest::new("solutions/day01.js", "levelOne", "1\n2\n3\n");
        assert_eq!(request.input_lines, vec!["1", "2", "3"]);
        assert_eq!(request.raw_input, "1\n2\n3\n");
    }

    #[test]
    fn test_worker_data_requires_every_field() {
        let data = WorkerData::parse(
            r#"{"solutionFileName":"day01.js","functionToExecute":"levelOne","input":"abc"}"#,
        )
        .unwrap();

        assert_eq!(
            data.into_request(),
            Err(SolutionError::MissingWorkerData {
                field: "lines".into()
            })
        );

        let data = WorkerData::parse(r#"{"input":"abc","lines":["abc"]}"#).unwrap();
        assert_eq!(
            data.into_request(),
            Err(SolutionError::MissingWorkerData {
                field: "solutionFileName".into()
            })
        );
    }

    #[test]
    fn test_request_survives_the_boundary() {
        let request = ExecutionRequest::new("day02.js", "levelTwo", "a\nb");
        let json = serde_json::to_string(&request).unwrap();
        let received = WorkerData::parse(&json).unwrap().into_request().unwrap();
        assert_eq!(received, request);
    }

    #[test]
    fn test_message_shapes() {
        let answer = ProtocolMessage::Answer {
            answer: Answer::Number(42.0),
            execution_time_ns: 2222,
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(
            value,
            json!({"type": "answer", "answer": 42.0, "executionTimeNs": 2222})
        );

        let invalid = ProtocolMessage::AnswerTypeInvalid {
            answer_type: "object".into(),
        };
        let value = serde_json::to_value(&invalid).unwrap();
        assert_eq!(value, json!({"type": "answerTypeInvalid", "answerType": "object"}));
    }

    #[test]
    fn test_decode_log_and_unknown_tags() {
        let log = decode_line(r#"{"type":"log","level":"info","message":"hi","meta":[1]}"#).unwrap();
        assert_eq!(
            log,
            ProtocolMessage::Log {
                level: "info".into(),
                message: "hi".into(),
                meta: vec![json!(1)],
            }
        );

        let err = decode_line(r#"{"type":"progress","percent":50}"#).unwrap_err();
        assert!(matches!(err, SolutionError::Protocol { .. }));
    }

    #[test]
    fn test_line_sink_writes_one_message_per_line() {
        let mut buffer = Vec::new();
        {
            let mut sink = LineSink::new(&mut buffer);
            sink.send(&ProtocolMessage::Log {
                level: "info".into(),
                message: "one".into(),
                meta: vec![],
            })
            .unwrap();
            sink.send(&ProtocolMessage::AnswerTypeInvalid {
                answer_type: "boolean".into(),
            })
            .unwrap();
        }

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(matches!(
            decode_line(lines[1]).unwrap(),
            ProtocolMessage::AnswerTypeInvalid { .. }
        ));
    }
}
