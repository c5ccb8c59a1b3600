//! Interactive chat session: reads lines from stdin, answers after a
//! simulated thinking delay, and keeps the telemetry simulator ticking.
//!
//! Everything runs on one task. Deferred work (replies, the second half of a
//! purge) sits in a FIFO and fires in the order it was scheduled.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::{Instant, Interval};
use tracing::{debug, info};

use crate::config::GideonConfig;
use crate::conversation::{
    Conversation, PURGE_DONE, PURGE_REQUESTED, RESTARTED, SETTINGS_TITLE, VOICE_UNSUPPORTED,
};
use crate::memory::MemoryStore;
use crate::responder::Responder;
use crate::telemetry::{TelemetrySimulator, TelemetrySnapshot};

/// Fallback horizon for deadlines that would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const COMMAND_HELP: &str = "Commands: /purge /memory /settings /voice /telemetry /help /quit";

/// Direct commands that bypass the responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Purge,
    Memory,
    Settings,
    Voice,
    Telemetry,
    Help,
    Quit,
}

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Command(Command),
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(cmd) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    match cmd.to_lowercase().as_str() {
        "purge" | "clear" => Input::Command(Command::Purge),
        "memory" => Input::Command(Command::Memory),
        "settings" => Input::Command(Command::Settings),
        "voice" => Input::Command(Command::Voice),
        "telemetry" => Input::Command(Command::Telemetry),
        "help" => Input::Command(Command::Help),
        "quit" | "exit" => Input::Command(Command::Quit),
        _ => Input::Unknown(line.to_string()),
    }
}

/// Work deferred until a point in time.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Answer a user message that has already been recorded.
    Reply(String),
    /// Clear the log and announce the restart.
    FinishPurge,
}

/// FIFO of deferred jobs. A job never fires before the ones queued ahead of
/// it, even if its own deadline is earlier.
#[derive(Debug, Default)]
pub struct Schedule {
    queue: VecDeque<(Instant, Job)>,
}

impl Schedule {
    pub fn push(&mut self, due: Instant, job: Job) {
        self.queue.push_back((due, job));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Deadline of the job at the head of the queue.
    pub fn next_due(&self) -> Option<Instant> {
        self.queue.front().map(|(due, _)| *due)
    }

    /// Pop the head job if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Job> {
        if self.next_due()? <= now {
            self.queue.pop_front().map(|(_, job)| job)
        } else {
            None
        }
    }
}

/// Whether the session loop should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Chat session state, independent of where input comes from.
pub struct Session<W: Write> {
    conversation: Conversation,
    simulator: TelemetrySimulator,
    schedule: Schedule,
    rng: StdRng,
    config: GideonConfig,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(conversation: Conversation, config: GideonConfig, out: W) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        Self {
            conversation,
            simulator: TelemetrySimulator::new(TelemetrySnapshot::default()),
            schedule: Schedule::default(),
            rng,
            config,
            out,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Print the welcome banner.
    pub fn greet(&mut self) -> Result<()> {
        let welcome = self.conversation.welcome_message();
        print_assistant(&mut self.out, &welcome)?;
        writeln!(self.out, "{COMMAND_HELP}")?;
        Ok(())
    }

    /// React to one line of input received at `now`.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Result<Flow> {
        match parse_input(line) {
            Input::Empty => {}
            Input::Message(text) => {
                self.conversation.append(&text, true);
                let due = deadline(now, self.thinking_delay());
                self.schedule.push(due, Job::Reply(text));
            }
            Input::Command(Command::Purge) => {
                self.say(PURGE_REQUESTED)?;
                let due = deadline(now, self.config.purge_delay());
                self.schedule.push(due, Job::FinishPurge);
            }
            Input::Command(Command::Memory) => {
                let report = self.conversation.memory_report();
                self.say(&report)?;
            }
            Input::Command(Command::Settings) => {
                self.say(SETTINGS_TITLE)?;
                let report = self.conversation.settings_report();
                self.say(&report)?;
            }
            Input::Command(Command::Voice) => {
                self.say(VOICE_UNSUPPORTED)?;
            }
            Input::Command(Command::Telemetry) => {
                write!(self.out, "{}", self.simulator.snapshot().display())?;
            }
            Input::Command(Command::Help) => {
                writeln!(self.out, "{COMMAND_HELP}")?;
            }
            Input::Command(Command::Quit) => return Ok(Flow::Quit),
            Input::Unknown(cmd) => {
                writeln!(self.out, "Unknown command {cmd}. {COMMAND_HELP}")?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Run every job that is due at `now`, in scheduling order.
    pub fn run_due(&mut self, now: Instant) -> Result<()> {
        while let Some(job) = self.schedule.pop_due(now) {
            debug!(?job, "running deferred job");
            match job {
                Job::Reply(text) => {
                    let reply = self
                        .conversation
                        .reply_to(&text, self.simulator.snapshot());
                    debug!(rule = reply.rule, "reply sent");
                    print_assistant(&mut self.out, &reply.text)?;
                }
                Job::FinishPurge => {
                    self.conversation.purge();
                    self.say(PURGE_DONE)?;
                    self.say(RESTARTED)?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn tick_telemetry(&mut self) {
        self.simulator.tick(&mut self.rng);
    }

    /// Record an assistant turn and print it.
    fn say(&mut self, text: &str) -> Result<()> {
        self.conversation.append(text, false);
        print_assistant(&mut self.out, text)
    }

    fn thinking_delay(&mut self) -> Duration {
        let jitter = if self.config.thinking_jitter_ms > 0 {
            self.rng.gen_range(0..=self.config.thinking_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.thinking_delay_ms.saturating_add(jitter))
    }
}

/// `now + delay`, pinned to `now + FAR_FUTURE` if that is not representable.
fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Print an assistant message behind the `>` prompt marker.
fn print_assistant(out: &mut impl Write, text: &str) -> Result<()> {
    for (i, line) in text.lines().enumerate() {
        if i == 0 {
            writeln!(out, "> {line}")?;
        } else {
            writeln!(out, "  {line}")?;
        }
    }
    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

/// Run an interactive chat session on stdin/stdout until `/quit`, end of
/// input, or ctrl-c. Replies still pending at end of input are delivered.
pub async fn run(config: GideonConfig) -> Result<()> {
    let memory_path = config.resolved_memory_path();
    let store = MemoryStore::open(&memory_path).with_history_limit(config.history_limit);
    info!(
        path = %memory_path.display(),
        turns = store.memory.conversation_history.len(),
        facts = store.memory.learned_facts.len(),
        "memory loaded"
    );

    let responder = Responder::new(config.seed);
    debug!(rules = ?responder.rule_names(), "responder ready");
    let conversation = Conversation::new(store, responder);
    let mut ticker = config
        .telemetry_interval()
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));
    let mut session = Session::new(conversation, config, std::io::stdout());
    session.greet()?;

    // Set up ctrl-c handler for graceful shutdown.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, shutting down...");
            shutdown_tx.send(true).ok();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    loop {
        if !input_open && session.schedule().is_empty() {
            break;
        }

        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.with_context(|| "reading stdin")? {
                    Some(line) => {
                        if session.handle_line(&line, Instant::now())? == Flow::Quit {
                            input_open = false;
                        }
                    }
                    None => input_open = false,
                }
            }
            _ = sleep_until_due(session.schedule().next_due()) => {
                session.run_due(Instant::now())?;
            }
            _ = next_tick(&mut ticker) => {
                session.tick_telemetry();
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    let memory = &session.conversation().store().memory;
    info!(
        turns = memory.conversation_history.len(),
        facts = memory.learned_facts.len(),
        "chat session ended"
    );
    Ok(())
}
