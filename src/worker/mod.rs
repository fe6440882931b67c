//! Worker entry point
//!
//! Runs inside the isolated worker process. It loads the user's solution,
//! calls the requested level function once, times the call and reports the
//! result over the protocol.
//!
//! The worker does NOT:
//! - Load `.env` or read the session token
//! - Check answer emptiness (only the answer's type)
//! - Install a logging subscriber (stdout is reserved for the protocol)

pub mod engine;

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Instant;

use crate::error::{SolutionError, WorkerFailure};
use crate::protocol::{ExecutionRequest, LineSink, MessageSink, ProtocolMessage, WorkerData};
use engine::SolutionModule;

/// Exit status of a worker that reported a native failure
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Monotonic time source, in nanoseconds
pub trait Clock {
    fn now_ns(&self) -> u64;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Execute one request and post the outcome to `sink`.
///
/// Console output reaches `sink` while the solution runs, always ahead of
/// the terminal message. Load failures and exceptions thrown by the
/// solution are returned as errors for the native channel; invalid answer
/// types are posted as `AnswerTypeInvalid` messages.
pub fn run(
    request: &ExecutionRequest,
    sink: &mut dyn MessageSink,
    clock: &dyn Clock,
) -> Result<(), SolutionError> {
    let (sender, receiver) = mpsc::channel();

    thread::scope(|scope| {
        let forwarder = scope.spawn(move || forward(receiver, sink));
        let executed = execute(request, sender, clock);
        let forwarded = forwarder
            .join()
            .unwrap_or_else(|_| Err(SolutionError::internal("Message forwarder panicked")));
        executed.and(forwarded)
    })
}

fn execute(
    request: &ExecutionRequest,
    messages: Sender<ProtocolMessage>,
    clock: &dyn Clock,
) -> Result<(), SolutionError> {
    let mut solution = SolutionModule::load(&request.solution_file_path, messages.clone())?;
    let function = solution.function(&request.function_name)?;
    let argument = solution.prepare_input(&request.raw_input, &request.input_lines)?;

    let start = clock.now_ns();
    let returned = solution.call(&function, argument);
    let end = clock.now_ns();

    let returned = returned.map_err(|cause| SolutionError::UserSolutionThrew {
        function: request.function_name.clone(),
        cause,
    })?;

    let answer_type = returned.type_name();
    let message = match returned.into_answer() {
        Ok(answer) => ProtocolMessage::Answer {
            answer,
            execution_time_ns: end.saturating_sub(start),
        },
        Err(_) => ProtocolMessage::AnswerTypeInvalid { answer_type },
    };
    // A closed channel means the forwarder already failed and reports why
    let _ = messages.send(message);
    Ok(())
}

/// Pass messages on in order until every sender is gone
fn forward(messages: Receiver<ProtocolMessage>, sink: &mut dyn MessageSink) -> Result<(), SolutionError> {
    for message in messages {
        sink.send(&message)?;
    }
    Ok(())
}

/// Process entry for the hidden `worker` subcommand; returns the exit code
pub fn main_entry() -> i32 {
    let mut sink = LineSink::new(std::io::stdout());

    let result = read_request(std::io::stdin().lock())
        .and_then(|request| run(&request, &mut sink, &MonotonicClock::new()));

    match result {
        Ok(()) => 0,
        Err(error) => {
            report_failure(&mut std::io::stderr().lock(), error);
            FAILURE_EXIT_CODE
        }
    }
}

fn read_request(mut reader: impl Read) -> Result<ExecutionRequest, SolutionError> {
    let mut json = String::new();
    reader
        .read_to_string(&mut json)
        .map_err(|e| SolutionError::internal(format!("Failed to read worker data: {}", e)))?;
    WorkerData::parse(&json)?.into_request()
}

fn report_failure(writer: &mut impl Write, error: SolutionError) {
    let failure = WorkerFailure { error };
    match serde_json::to_string(&failure) {
        Ok(line) => {
            let _ = writeln!(writer, "{}", line);
        }
        Err(_) => {
            let _ = writeln!(writer, "{}", failure.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Answer;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::error::Error;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FakeClock {
        readings: RefCell<VecDeque<u64>>,
    }

    impl FakeClock {
        fn new(readings: &[u64]) -> Self {
            Self {
                readings: RefCell::new(readings.iter().copied().collect()),
            }
        }
    }

    impl Clock for FakeClock {
        fn now_ns(&self) -> u64 {
            self.readings.borrow_mut().pop_front().unwrap()
        }
    }

    fn solution(dir: &TempDir, source: &str) -> PathBuf {
        let path = dir.path().join("day01.js");
        std::fs::write(&path, source).unwrap();
        path
    }

    fn execute(
        source: &str,
        function: &str,
        input: &str,
    ) -> (Result<(), SolutionError>, Vec<ProtocolMessage>) {
        let dir = TempDir::new().unwrap();
        let path = solution(&dir, source);
        let request = ExecutionRequest::new(path, function, input);
        let mut messages = Vec::new();
        let result = run(&request, &mut messages, &FakeClock::new(&[4567, 6789]));
        (result, messages)
    }

    #[test]
    fn test_posts_answer_with_elapsed_time() {
        let (result, messages) = execute(
            "export function levelOne({ lines }) { return lines.map(Number).reduce((a, b) => a + b, 0); }",
            "levelOne",
            "1\n2\n3",
        );

        result.unwrap();
        assert_eq!(
            messages,
            vec![ProtocolMessage::Answer {
                answer: Answer::Number(6.0),
                execution_time_ns: 6789 - 4567,
            }]
        );
    }

    #[test]
    fn test_receives_raw_input_and_lines() {
        let (result, messages) = execute(
            "export const levelTwo = ({ input, lines }) => `${input.length}:${lines.length}`;",
            "levelTwo",
            "ab\ncd",
        );

        result.unwrap();
        assert!(matches!(
            &messages[0],
            ProtocolMessage::Answer { answer: Answer::Text(text), .. } if text == "5:2"
        ));
    }

    #[test]
    fn test_object_return_is_answer_type_invalid() {
        let (result, messages) = execute("export function levelOne() { return {}; }", "levelOne", "x");

        result.unwrap();
        assert_eq!(
            messages,
            vec![ProtocolMessage::AnswerTypeInvalid {
                answer_type: "object".into()
            }]
        );
    }

    #[test]
    fn test_other_invalid_types() {
        let cases = [
            ("return true;", "boolean"),
            ("return [1, 2];", "array"),
            ("return undefined;", "undefined"),
            ("return null;", "null"),
            ("return () => 1;", "function"),
            ("return Promise.resolve(1);", "promise"),
            ("return NaN;", "number (NaN)"),
            ("return Infinity;", "number (Infinity)"),
        ];

        for (body, expected) in cases {
            let source = format!("export function levelOne() {{ {} }}", body);
            let (result, messages) = execute(&source, "levelOne", "x");
            result.unwrap();
            assert_eq!(
                messages,
                vec![ProtocolMessage::AnswerTypeInvalid {
                    answer_type: expected.into()
                }],
                "for `{}`",
                body
            );
        }
    }

    #[test]
    fn test_empty_string_is_still_an_answer() {
        let (result, messages) = execute("export function levelOne() { return ''; }", "levelOne", "x");

        result.unwrap();
        assert!(matches!(
            &messages[0],
            ProtocolMessage::Answer { answer: Answer::Text(text), .. } if text.is_empty()
        ));
    }

    #[test]
    fn test_thrown_error_preserves_cause() {
        let (result, messages) = execute(
            "export function levelOne() { throw new RangeError('boom'); }",
            "levelOne",
            "x",
        );

        assert!(messages.is_empty());
        let err = result.unwrap_err();
        assert!(matches!(
            &err,
            SolutionError::UserSolutionThrew { function, .. } if function == "levelOne"
        ));
        let cause = err
            .source()
            .and_then(|s| s.downcast_ref::<crate::error::ThrownValue>())
            .unwrap();
        assert_eq!(cause.name, "RangeError");
        assert_eq!(cause.message, "boom");
    }

    #[test]
    fn test_thrown_literal_is_wrapped() {
        let (result, _) = execute("export function levelOne() { throw 'nope'; }", "levelOne", "x");

        match result.unwrap_err() {
            SolutionError::UserSolutionThrew { cause, .. } => {
                assert_eq!(cause.name, "string");
                assert_eq!(cause.message, "nope");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let request = ExecutionRequest::new("/nonexistent/day05.js", "levelOne", "x");
        let mut messages = Vec::new();
        let err = run(&request, &mut messages, &MonotonicClock::new()).unwrap_err();
        assert!(matches!(err, SolutionError::UserSolutionFileNotFound { .. }));
    }

    #[test]
    fn test_syntax_error() {
        let (result, messages) = execute("export function levelOne( { return 1; }", "levelOne", "x");

        assert!(messages.is_empty());
        assert!(matches!(
            result.unwrap_err(),
            SolutionError::UserSolutionSyntaxError { .. }
        ));
    }

    #[test]
    fn test_missing_or_uncallable_export() {
        let (result, _) = execute("export function levelOne() { return 1; }", "levelTwo", "x");
        assert!(matches!(
            result.unwrap_err(),
            SolutionError::UserSolutionMissingFunction { function, .. } if function == "levelTwo"
        ));

        let (result, _) = execute("export const levelOne = 42;", "levelOne", "x");
        assert!(matches!(
            result.unwrap_err(),
            SolutionError::UserSolutionMissingFunction { .. }
        ));
    }

    #[test]
    fn test_top_level_throw() {
        let (result, _) = execute(
            "throw new TypeError('bad setup');\nexport function levelOne() { return 1; }",
            "levelOne",
            "x",
        );

        match result.unwrap_err() {
            SolutionError::UserSolutionThrew { function, cause } => {
                assert_eq!(function, engine::MODULE_TOP_LEVEL);
                assert_eq!(cause.name, "TypeError");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_console_output_precedes_answer() {
        let (result, messages) = execute(
            "export function levelOne({ lines }) {\n\
             console.log('parsed', lines.length);\n\
             console.warn('careful');\n\
             return 'done';\n\
             }",
            "levelOne",
            "a\nb",
        );

        result.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            ProtocolMessage::Log {
                level: "info".into(),
                message: "parsed".into(),
                meta: vec![serde_json::json!(2)],
            }
        );
        assert!(matches!(&messages[1], ProtocolMessage::Log { level, .. } if level == "warn"));
        assert!(matches!(&messages[2], ProtocolMessage::Answer { .. }));
    }

    #[test]
    fn test_console_output_is_flushed_before_throw() {
        let (result, messages) = execute(
            "export function levelOne() { console.error('about to fail'); throw new Error('x'); }",
            "levelOne",
            "x",
        );

        assert!(result.is_err());
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], ProtocolMessage::Log { level, .. } if level == "error"));
    }

    #[test]
    fn test_string_object_is_a_text_answer() {
        let (result, messages) = execute(
            "export function levelOne() { return new String(' abc '); }",
            "levelOne",
            "x",
        );

        result.unwrap();
        match &messages[0] {
            ProtocolMessage::Answer { answer, .. } => {
                assert_eq!(answer, &Answer::Text(" abc ".into()));
                assert_eq!(answer.normalize().unwrap(), "abc");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_thrown_stack_is_kept() {
        let (result, _) = execute(
            "export function levelOne() { const e = new Error('x'); e.stack = 'at levelOne'; throw e; }",
            "levelOne",
            "x",
        );

        match result.unwrap_err() {
            SolutionError::UserSolutionThrew { cause, .. } => {
                assert_eq!(cause.name, "Error");
                assert_eq!(cause.stack.as_deref(), Some("at levelOne"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_top_level_console_output_is_forwarded() {
        let (result, messages) = execute(
            "console.log('loading');\nexport function levelOne() { return 1; }",
            "levelOne",
            "x",
        );

        result.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], ProtocolMessage::Log { message, .. } if message == "loading"));
    }

    struct ClosedSink;

    impl MessageSink for ClosedSink {
        fn send(&mut self, _message: &ProtocolMessage) -> Result<(), SolutionError> {
            Err(SolutionError::internal("Failed to post message: broken pipe"))
        }
    }

    #[test]
    fn test_sink_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = solution(
            &dir,
            "export function levelOne() { console.log('a'); console.log('b'); return 1; }",
        );
        let request = ExecutionRequest::new(path, "levelOne", "x");

        let err = run(&request, &mut ClosedSink, &FakeClock::new(&[1, 2])).unwrap_err();
        assert!(matches!(err, SolutionError::Internal { .. }));
    }

    #[test]
    fn test_read_request_reports_missing_fields() {
        let err = read_request(r#"{"solutionFileName":"day01.js","input":"x","lines":["x"]}"#.as_bytes())
            .unwrap_err();
        assert_eq!(
            err,
            SolutionError::MissingWorkerData {
                field: "functionToExecute".into()
            }
        );
    }

    #[test]
    fn test_failure_report_is_parseable() {
        let mut buffer = Vec::new();
        report_failure(&mut buffer, SolutionError::EmptyInput);
        let line = String::from_utf8(buffer).unwrap();
        let failure: WorkerFailure = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(failure.error, SolutionError::EmptyInput);
    }
}
