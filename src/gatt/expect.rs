use std::time::Duration;

use bon::Builder;
use regex::Regex;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace};

use super::session::{DEFAULT_POLL_INTERVAL, GattTransport};
use crate::error::ExpectError;
use crate::protocol::FAILURE_MARKERS;

pub(crate) const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Caller-supplied expectation checked against every buffered line.
#[derive(Debug, Clone)]
pub enum Expectation {
    /// The line must equal this text exactly.
    Literal(String),
    /// The line must match this pattern; every match is retained.
    Pattern(Regex),
}

/// Options for one send/wait cycle.
#[derive(Debug, Clone, Builder)]
pub struct ExpectOptions {
    expect: Option<Expectation>,
    #[builder(into)]
    success_marker: Option<String>,
    #[builder(default = DEFAULT_EXPECT_TIMEOUT)]
    timeout: Duration,
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    poll_interval: Duration,
}

impl Default for ExpectOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Capture groups of one pattern match, group 0 first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PatternMatch {
    groups: Vec<Option<String>>,
}

impl PatternMatch {
    fn from_captures(captures: &regex::Captures<'_>) -> Self {
        Self {
            groups: captures
                .iter()
                .map(|group| group.map(|value| value.as_str().to_string()))
                .collect(),
        }
    }

    /// Returns capture group `index`, if it participated in the match.
    #[must_use]
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(Option::as_deref)
    }
}

/// Result of one successful send/wait cycle.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExpectOutcome {
    output: Vec<String>,
    matches: Vec<PatternMatch>,
    success: bool,
}

impl ExpectOutcome {
    /// Returns the output captured during the cycle.
    #[must_use]
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Returns every pattern match in arrival order.
    #[must_use]
    pub fn matches(&self) -> &[PatternMatch] {
        &self.matches
    }

    /// Returns whether the success marker was seen.
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Marker {
    Success,
    Failure(String),
}

/// Recognises the success marker and the generic failure markers.
#[derive(Debug)]
struct MarkerMatcher {
    pattern: Regex,
    success_marker: Option<String>,
}

impl MarkerMatcher {
    fn new(success_marker: Option<&str>) -> Result<Self, regex::Error> {
        let alternatives = success_marker
            .into_iter()
            .chain(FAILURE_MARKERS)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            pattern: Regex::new(&format!("^(.*?)({alternatives})(.*)$"))?,
            success_marker: success_marker.map(str::to_string),
        })
    }

    fn classify(&self, line: &str) -> Option<Marker> {
        let captures = self.pattern.captures(line)?;
        let marker = captures.get(2)?.as_str();
        if self.success_marker.as_deref() == Some(marker) {
            return Some(Marker::Success);
        }
        let detail = captures.get(3).map_or("", |value| value.as_str()).trim();
        Some(Marker::Failure(detail.to_string()))
    }
}

/// Sends `command` and polls the session output until it resolves.
///
/// The cycle completes when either the success marker or a failure marker
/// has been seen, or when the last line is the idle prompt and the
/// expectation has matched. A failure marker always rejects, even when the
/// expectation also matched.
///
/// # Errors
///
/// Returns [`ExpectError::ToolFatal`] when the tool printed a failure marker,
/// [`ExpectError::Timeout`] when nothing resolved the cycle in time, and
/// [`ExpectError::Session`] when the command could not be written.
#[instrument(skip(session, options), level = "debug", fields(timeout = ?options.timeout))]
pub async fn send_and_expect(
    session: &dyn GattTransport,
    command: &str,
    options: &ExpectOptions,
) -> Result<ExpectOutcome, ExpectError> {
    let markers = MarkerMatcher::new(options.success_marker.as_deref()).map_err(|error| {
        ExpectError::ToolFatal {
            detail: format!("invalid success marker: {error}"),
            output: Vec::new(),
        }
    })?;
    let lines = session.lines().clone();
    let prompt = session.prompt().to_string();

    lines.clear();
    session.send(command).await?;

    let poll = async {
        loop {
            sleep(options.poll_interval).await;
            let output = lines.snapshot();
            if let Some(resolution) =
                evaluate(output, &prompt, &markers, options.expect.as_ref())
            {
                return resolution;
            }
        }
    };

    match timeout(options.timeout, poll).await {
        Ok(resolution) => resolution,
        Err(_elapsed) => {
            let output = lines.snapshot();
            debug!(lines = output.len(), "no resolution before timeout");
            Err(ExpectError::Timeout { output })
        }
    }
}

fn evaluate(
    output: Vec<String>,
    prompt: &str,
    markers: &MarkerMatcher,
    expect: Option<&Expectation>,
) -> Option<Result<ExpectOutcome, ExpectError>> {
    let mut success = false;
    let mut failure: Option<String> = None;
    let mut satisfied = false;
    let mut matches = Vec::new();

    for line in &output {
        trace!(line, "inspecting");
        match markers.classify(line) {
            Some(Marker::Success) => success = true,
            Some(Marker::Failure(detail)) => {
                failure.get_or_insert(detail);
            }
            None => {}
        }
        match expect {
            Some(Expectation::Literal(text)) if line == text => satisfied = true,
            Some(Expectation::Pattern(pattern)) => {
                if let Some(captures) = pattern.captures(line) {
                    matches.push(PatternMatch::from_captures(&captures));
                    satisfied = true;
                }
            }
            _ => {}
        }
    }

    if let Some(detail) = failure {
        return Some(Err(ExpectError::ToolFatal { detail, output }));
    }
    let idle = output.last().is_some_and(|line| line == prompt);
    if success || (idle && satisfied) {
        return Some(Ok(ExpectOutcome {
            output,
            matches,
            success,
        }));
    }
    None
}
