//! Joins the lines of a stack trace into one record.
//!
//! Each container stream runs its own state machine over consecutive messages. A line that starts
//! or continues a Java, JavaScript, Python, Go or Ruby trace is held back; the held lines are
//! released as one record, joined with newlines, once a line breaks the trace or the stream has
//! been quiet for the flush interval.

use std::{
    collections::HashMap,
    sync::LazyLock,
    time::{Duration, Instant},
};

use regex::Regex;

use super::FunctionTransform;
use crate::event::LogRecord;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_LINES: usize = 1000;
const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum State {
    Start,
    JavaStartException,
    JavaAfterException,
    Java,
    Python,
    PythonCode,
    GoAfterPanic,
    GoAfterSignal,
    GoGoroutine,
    GoFrame1,
    GoFrame2,
    RubyBeforeRailsTrace,
    Ruby,
}

struct Rule {
    from: &'static [State],
    pattern: Regex,
    to: State,
}

fn rule(from: &'static [State], pattern: &str, to: State) -> Rule {
    Rule {
        from,
        pattern: Regex::new(pattern).expect("exception patterns are valid"),
        to,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use State::*;
    vec![
        // Java and JavaScript (V8) share their frame syntax.
        rule(
            &[Start, JavaStartException],
            r"(?:Exception|Error|Throwable|V8 errors stack trace)[:\r\n]",
            JavaAfterException,
        ),
        rule(&[JavaAfterException], r"^[\t ]*nested exception is:[\t ]*", JavaStartException),
        rule(&[JavaAfterException], r"^[\r\n]*$", JavaAfterException),
        rule(&[JavaAfterException, Java], r"^[\t ]+(?:eval )?at ", Java),
        rule(&[JavaAfterException, Java], r"^[\t ]*(?:Caused by|Suppressed):", JavaAfterException),
        rule(&[JavaAfterException, Java], r"^[\t ]*... \d+ (?:more|common frames omitted)", Java),
        // Python
        rule(&[Start], r"^Traceback \(most recent call last\):$", Python),
        rule(&[Python], r"^[\t ]+File ", PythonCode),
        rule(&[PythonCode], r"[^\t ]", Python),
        rule(&[Python], r"^(?:[^\s.():]+\.)*[^\s.():]+:", Start),
        // Go
        rule(&[Start], r"\bpanic: ", GoAfterPanic),
        rule(&[Start], r"http: panic serving", GoGoroutine),
        rule(&[GoAfterPanic, GoAfterSignal, GoFrame1], r"^$", GoGoroutine),
        rule(&[GoAfterPanic], r"^\[signal ", GoAfterSignal),
        rule(&[GoGoroutine], r"^goroutine \d+ \[[^\]]+\]:$", GoFrame1),
        rule(&[GoFrame1], r"^(?:[^\s.:]+\.)*[^\s.():]+\(|^created by ", GoFrame2),
        rule(&[GoFrame2], r"^\s", GoFrame1),
        // Ruby
        rule(&[Start], r"Error \(.*\):$", RubyBeforeRailsTrace),
        rule(&[RubyBeforeRailsTrace], r"^  $", Ruby),
        rule(&[RubyBeforeRailsTrace, Ruby], r"^[\t ]+.*?\.rb:\d+:in `", Ruby),
        rule(&[Start, Ruby], r"^[\t ]+from .*?\.rb:\d+:in `", Ruby),
    ]
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Detection {
    NoTrace,
    StartTrace,
    InsideTrace,
    EndTrace,
}

#[derive(Debug, Default)]
struct Detector {
    state: Option<State>,
}

impl Detector {
    fn state(&self) -> State {
        self.state.unwrap_or(State::Start)
    }

    fn transition(&mut self, line: &str) -> bool {
        let current = self.state();
        match RULES
            .iter()
            .find(|rule| rule.from.contains(&current) && rule.pattern.is_match(line))
        {
            Some(rule) => {
                self.state = Some(rule.to);
                true
            }
            None => {
                self.state = Some(State::Start);
                false
            }
        }
    }

    fn update(&mut self, line: &str) -> Detection {
        let before = self.transition(line);
        if !before {
            // Falling out of a trace may put us at the start of the next one.
            self.transition(line);
        }
        let after = self.state() != State::Start;
        match (before, after) {
            (true, true) => Detection::InsideTrace,
            (true, false) => Detection::EndTrace,
            (false, true) => Detection::StartTrace,
            (false, false) => Detection::NoTrace,
        }
    }
}

#[derive(Default)]
struct Accumulator {
    detector: Detector,
    held: Vec<LogRecord>,
    bytes: usize,
    last_seen: Option<Instant>,
}

impl Accumulator {
    fn hold(&mut self, record: LogRecord, now: Instant) {
        self.bytes += record.message.len();
        self.held.push(record);
        self.last_seen = Some(now);
    }

    fn release(&mut self, output: &mut Vec<LogRecord>) {
        let mut held = std::mem::take(&mut self.held).into_iter();
        self.bytes = 0;
        let Some(mut first) = held.next() else {
            return;
        };
        for record in held {
            first.message.push('\n');
            first.message.push_str(&record.message);
            first.offset = record.offset;
            first.finalizers.merge(record.finalizers);
        }
        output.push(first);
    }
}

/// The `detectMultilineException` filter.
pub struct DetectExceptions {
    streams: HashMap<String, Accumulator>,
    flush_interval: Duration,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for DetectExceptions {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

impl DetectExceptions {
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            streams: HashMap::new(),
            flush_interval,
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    fn push(&mut self, output: &mut Vec<LogRecord>, record: LogRecord, now: Instant) {
        let Some(key) = record.kubernetes.as_ref().map(|meta| meta.container_key()) else {
            output.push(record);
            return;
        };
        let max_lines = self.max_lines;
        let max_bytes = self.max_bytes;
        let stream = self.streams.entry(key).or_default();

        match stream.detector.update(&record.message) {
            Detection::InsideTrace => stream.hold(record, now),
            Detection::EndTrace => {
                stream.hold(record, now);
                stream.release(output);
            }
            Detection::NoTrace => {
                stream.release(output);
                output.push(record);
            }
            Detection::StartTrace => {
                stream.release(output);
                stream.hold(record, now);
            }
        }

        if stream.held.len() >= max_lines || stream.bytes >= max_bytes {
            stream.release(output);
            stream.detector = Detector::default();
        }
    }
}

impl FunctionTransform for DetectExceptions {
    fn transform(&mut self, output: &mut Vec<LogRecord>, record: LogRecord) {
        self.push(output, record, Instant::now());
    }

    fn flush_expired(&mut self, output: &mut Vec<LogRecord>, now: Instant) {
        let interval = self.flush_interval;
        self.streams.retain(|_, stream| {
            let expired = stream
                .last_seen
                .is_none_or(|seen| now.duration_since(seen) >= interval);
            if expired {
                stream.release(output);
            }
            !expired
        });
    }

    fn flush(&mut self, output: &mut Vec<LogRecord>) {
        for (_, mut stream) in self.streams.drain() {
            stream.release(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::event::{KubernetesMeta, LogSource, LogType};

    const JAVA: &str = "Exception in thread \"main\" java.lang.IllegalStateException: boom
\tat com.example.App.run(App.java:12)
\tat com.example.App.main(App.java:5)
Caused by: java.io.IOException: disk
\tat com.example.Store.write(Store.java:40)
\t... 2 more";

    const PYTHON: &str = "Traceback (most recent call last):
  File \"/app/main.py\", line 10, in <module>
    main()
  File \"/app/main.py\", line 6, in main
    raise ValueError(\"bad\")
ValueError: bad";

    const GO: &str = "panic: runtime error: index out of range

goroutine 1 [running]:
main.main()
\t/app/main.go:8 +0x1d
exit status 2";

    const JS: &str = "Error: connection refused
    at Socket.connect (net.js:10:5)
    at main (/app/index.js:3:1)";

    const RUBY: &str = "NoMethodError (undefined method `name' for nil):
  app/controllers/users_controller.rb:12:in `show'
  app/controllers/application_controller.rb:3:in `wrap'";

    fn record(container: &str, message: &str) -> LogRecord {
        let mut record = LogRecord::new(message, LogType::Application, LogSource::Container, Arc::from("s"));
        record.kubernetes = Some(KubernetesMeta {
            namespace_name: "ns".into(),
            pod_name: "pod".into(),
            container_name: container.into(),
            ..Default::default()
        });
        record
    }

    fn run(lines: &[&str]) -> Vec<String> {
        let mut transform = DetectExceptions::default();
        let mut output = Vec::new();
        for line in lines {
            transform.transform(&mut output, record("c", line));
        }
        transform.flush(&mut output);
        output.into_iter().map(|record| record.message).collect()
    }

    fn with_neighbours(trace: &str) -> Vec<String> {
        let mut lines = vec!["before"];
        lines.extend(trace.lines());
        lines.push("after");
        run(&lines)
    }

    #[test]
    fn joins_java_trace() {
        assert_eq!(with_neighbours(JAVA), vec!["before", JAVA, "after"]);
    }

    #[test]
    fn joins_python_trace() {
        assert_eq!(with_neighbours(PYTHON), vec!["before", PYTHON, "after"]);
    }

    #[test]
    fn joins_go_panic() {
        let trace = GO.rsplit_once('\n').unwrap().0;
        assert_eq!(
            run(&GO.lines().collect::<Vec<_>>()),
            vec![trace, "exit status 2"]
        );
    }

    #[test]
    fn joins_javascript_trace() {
        assert_eq!(with_neighbours(JS), vec!["before", JS, "after"]);
    }

    #[test]
    fn joins_ruby_trace() {
        assert_eq!(with_neighbours(RUBY), vec!["before", RUBY, "after"]);
    }

    #[test]
    fn plain_lines_pass_through() {
        assert_eq!(run(&["a", "b", "c"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn streams_are_independent() {
        let mut transform = DetectExceptions::default();
        let mut output = Vec::new();
        let mut js = JS.lines();
        transform.transform(&mut output, record("a", js.next().unwrap()));
        transform.transform(&mut output, record("b", "unrelated"));
        for line in js {
            transform.transform(&mut output, record("a", line));
        }
        transform.transform(&mut output, record("a", "done"));

        let messages: Vec<_> = output.iter().map(|record| record.message.as_str()).collect();
        assert_eq!(messages, vec!["unrelated", JS, "done"]);
    }

    #[test]
    fn quiet_stream_is_flushed() {
        let mut transform = DetectExceptions::new(Duration::from_millis(100));
        let mut output = Vec::new();
        let start = Instant::now();
        for line in JS.lines() {
            transform.push(&mut output, record("c", line), start);
        }
        transform.flush_expired(&mut output, start + Duration::from_millis(50));
        assert!(output.is_empty());

        transform.flush_expired(&mut output, start + Duration::from_millis(150));
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].message, JS);
    }

    #[test]
    fn records_without_container_pass_through() {
        let mut transform = DetectExceptions::default();
        let mut output = Vec::new();
        transform.transform(
            &mut output,
            LogRecord::new("Error: x", LogType::Infrastructure, LogSource::Node, Arc::from("j")),
        );
        assert_eq!(output.len(), 1);
    }
}
