use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::time::sleep;
use tracing::info;

use super::line_buffer::LineLog;
use super::session::{GattClient, GattTransport, TargetAddress, wait_for_prompt};
use crate::error::SessionError;

const FAKE_PROMPT_TIMEOUT: Duration = Duration::from_secs(5);
const FAKE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Output the fake tool prints in response to one command.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FakeReply {
    lines: Vec<String>,
    delay: Duration,
    print_prompt: bool,
}

impl FakeReply {
    /// Prints `lines` followed by the idle prompt.
    #[must_use]
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            print_prompt: true,
        }
    }

    /// Prints nothing at all, so the caller eventually times out.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            lines: Vec::new(),
            delay: Duration::ZERO,
            print_prompt: false,
        }
    }

    /// Delays the output by `delay`.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Omits the idle prompt after the lines.
    #[must_use]
    pub fn without_prompt(mut self) -> Self {
        self.print_prompt = false;
        self
    }
}

#[derive(Debug)]
struct ReplyRule {
    command_prefix: String,
    replies: VecDeque<FakeReply>,
}

impl ReplyRule {
    /// Pops the next reply, repeating the last one forever.
    fn next_reply(&mut self) -> Option<FakeReply> {
        if self.replies.len() > 1 {
            return self.replies.pop_front();
        }
        self.replies.front().cloned()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    rules: Vec<ReplyRule>,
    sent: Vec<String>,
    opened_sessions: usize,
    closed_sessions: usize,
}

/// Scripted stand-in for `gatttool`, used in tests and demos.
///
/// Replies are matched by command prefix; queued replies are consumed in
/// order and the last one repeats. Unscripted commands print nothing.
#[derive(Debug, Clone, Builder)]
pub struct FakeGattTool {
    #[builder(skip)]
    state: Arc<Mutex<FakeState>>,
    /// Whether a freshly opened session prints its ready prompt.
    #[builder(default = true)]
    ready_prompt: bool,
    #[builder(default = FAKE_PROMPT_TIMEOUT)]
    prompt_timeout: Duration,
}

impl Default for FakeGattTool {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FakeGattTool {
    /// Queues `reply` for commands starting with `command_prefix`.
    #[must_use]
    pub fn on(self, command_prefix: &str, reply: FakeReply) -> Self {
        {
            let mut state = self.lock();
            match state
                .rules
                .iter()
                .position(|rule| rule.command_prefix == command_prefix)
            {
                Some(index) => state.rules[index].replies.push_back(reply),
                None => state.rules.push(ReplyRule {
                    command_prefix: command_prefix.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Returns every command sent across all sessions.
    #[must_use]
    pub fn sent_commands(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Returns how many sent commands start with `prefix`.
    #[must_use]
    pub fn count_sent(&self, prefix: &str) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    /// Returns `(opened, closed)` session counts.
    #[must_use]
    pub fn session_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.opened_sessions, state.closed_sessions)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GattClient for FakeGattTool {
    async fn open(
        &self,
        adapter: &str,
        target: &TargetAddress,
    ) -> Result<Box<dyn GattTransport>, SessionError> {
        info!(adapter, address = target.address(), "using fake gatttool");
        let session = FakeGattSession {
            tool: self.clone(),
            lines: LineLog::new(),
            prompt: target.prompt(),
        };
        self.lock().opened_sessions += 1;
        if self.ready_prompt {
            session.lines.push_chunk(&format!("{} ", session.prompt));
        }
        wait_for_prompt(&session, self.prompt_timeout, FAKE_POLL_INTERVAL).await?;
        Ok(Box::new(session))
    }
}

/// Session handed out by [`FakeGattTool`].
#[derive(Debug)]
struct FakeGattSession {
    tool: FakeGattTool,
    lines: LineLog,
    prompt: String,
}

#[async_trait]
impl GattTransport for FakeGattSession {
    async fn send(&self, text: &str) -> Result<(), SessionError> {
        let reply = {
            let mut state = self.tool.lock();
            state.sent.push(text.to_string());
            state
                .rules
                .iter_mut()
                .find(|rule| text.starts_with(rule.command_prefix.as_str()))
                .and_then(ReplyRule::next_reply)
        };
        let Some(reply) = reply else {
            return Ok(());
        };

        // Readline returns the cursor to column zero before printing.
        let mut output = String::from("\r");
        for line in &reply.lines {
            output.push_str(line);
            output.push('\n');
        }
        if reply.print_prompt {
            output.push_str(&format!("{} ", self.prompt));
        }
        if reply.delay.is_zero() {
            self.lines.push_chunk(&output);
        } else {
            let lines = self.lines.clone();
            tokio::spawn(async move {
                sleep(reply.delay).await;
                lines.push_chunk(&output);
            });
        }
        Ok(())
    }

    fn lines(&self) -> &LineLog {
        &self.lines
    }

    fn prompt(&self) -> &str {
        &self.prompt
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        let mut state = self.tool.lock();
        state.sent.push("exit".to_string());
        state.closed_sessions += 1;
        Ok(())
    }
}
