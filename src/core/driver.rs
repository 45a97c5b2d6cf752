//! Session driver
//!
//! The remote program has no command API: it reads keystrokes into whatever
//! mode it is in. The driver owns the only copy of [`SessionState`] and
//! serializes every outbound request into a keystroke script, one command in
//! flight at a time. It performs no I/O itself: the caller feeds it
//! observations (cursor line, classifier cues, the clock) and drains the
//! bytes to write and the completed tickets.
//!
//! ```text
//!            submit
//!   Command ────────► AwaitingInput / AwaitingPromptReply / AwaitingListing
//!      ▲                               │
//!      └──── script done / timeout ────┘
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;

use super::classify::{ChatEvent, Cue, EventKind, ListingKind};
use crate::config::{Config, KeysConfig, QueuePolicy};
use crate::error::{BridgeError, Result};

/// Identifies a submitted request
pub type Ticket = u64;

/// Which input mode the remote is believed to be in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Command,
    AwaitingInput,
    AwaitingPromptReply,
    AwaitingListing,
}

/// Single-key commands with no reply dialog
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawKey {
    Review,
    Help,
}

/// Something the caller wants the remote to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Chat(String),
    Goto(String),
    Emote(String),
    Private {
        to: String,
        /// Room the recipient is in; defaults to ours
        room: Option<String>,
        text: String,
    },
    Listing(ListingKind),
    /// Who listing of another room; leaves our roster alone
    WhoIn(String),
    /// Recent history of another room
    Peek(String),
    /// Review a given number of history lines
    ReviewLines(u32),
    Raw(RawKey),
}

impl Request {
    /// Short label used in logs and errors
    pub fn describe(&self) -> String {
        match self {
            Request::Chat(_) => "chat".to_string(),
            Request::Goto(room) => format!("goto {}", room),
            Request::Emote(_) => "emote".to_string(),
            Request::Private { to, .. } => format!("private to {}", to),
            Request::Listing(ListingKind::Who) => "who".to_string(),
            Request::Listing(ListingKind::Rooms) => "room list".to_string(),
            Request::Listing(ListingKind::Idle) => "idle list".to_string(),
            Request::Raw(RawKey::Review) => "review".to_string(),
            Request::Raw(RawKey::Help) => "help".to_string(),
            Request::WhoIn(room) => format!("who in {}", room),
            Request::Peek(room) => format!("peek {}", room),
            Request::ReviewLines(n) => format!("review {} lines", n),
        }
    }

    fn mode(&self) -> Mode {
        match self {
            Request::Chat(_) => Mode::AwaitingInput,
            Request::Goto(_) | Request::Emote(_) | Request::Private { .. } | Request::ReviewLines(_) => {
                Mode::AwaitingPromptReply
            }
            Request::Listing(_) | Request::WhoIn(_) => Mode::AwaitingListing,
            Request::Peek(_) | Request::Raw(_) => Mode::Command,
        }
    }

    fn validate(&self) -> Result<()> {
        fn non_empty(what: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(BridgeError::Malformed(format!("empty {}", what)));
            }
            Ok(())
        }
        fn one_word(what: &str, value: &str) -> Result<()> {
            non_empty(what, value)?;
            if value.trim().chars().any(char::is_whitespace) {
                return Err(BridgeError::Malformed(format!("{} must be a single word", what)));
            }
            Ok(())
        }

        match self {
            Request::Chat(text) => non_empty("message", text),
            Request::Emote(text) => non_empty("action", text),
            Request::Goto(room) => one_word("room name", room),
            Request::Private { to, room, text } => {
                one_word("recipient", to)?;
                if let Some(room) = room {
                    one_word("room name", room)?;
                }
                non_empty("message", text)
            }
            Request::WhoIn(room) | Request::Peek(room) => one_word("room name", room),
            Request::ReviewLines(0) => Err(BridgeError::Malformed("line count must be positive".to_string())),
            Request::Listing(_) | Request::ReviewLines(_) | Request::Raw(_) => Ok(()),
        }
    }
}

/// Control characters would be read as keystrokes by the remote
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Driver settings, resolved from [`Config`]
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub keys: KeysConfig,
    pub input_prompt: Regex,
    pub goto_prompt: Regex,
    pub emote_prompt: Regex,
    pub private_prompt: Regex,
    pub review_prompt: Regex,
    pub timeout: Duration,
    pub listing_timeout: Duration,
    pub settle: Duration,
    pub command_gap: Duration,
    pub queue: QueuePolicy,
    pub queue_limit: usize,
    pub abort_keys: Option<String>,
}

impl DriverConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let session = &config.session;
        let prompts = &config.prompts;
        Ok(Self {
            keys: config.keys.clone(),
            input_prompt: Regex::new(&prompts.input)?,
            goto_prompt: Regex::new(&prompts.goto)?,
            emote_prompt: Regex::new(&prompts.emote)?,
            private_prompt: Regex::new(&prompts.private)?,
            review_prompt: Regex::new(&prompts.review)?,
            timeout: session.timeout(),
            listing_timeout: session.listing_timeout(),
            settle: session.settle(),
            command_gap: session.command_gap(),
            queue: session.queue,
            queue_limit: session.queue_limit,
            abort_keys: Some(session.abort_keys.clone()).filter(|k| !k.is_empty()),
        })
    }
}

#[derive(Clone, Debug)]
enum Step {
    Keys(String),
    /// Wait for the cursor line to match; with `settle`, proceed anyway once it elapses
    Prompt { pattern: Regex, settle: Option<Duration> },
    AwaitRoom(String),
    AwaitListing(ListingKind),
}

/// The command currently driving the remote
#[derive(Debug)]
pub struct OutboundCommand {
    pub ticket: Ticket,
    pub request: Request,
    script: VecDeque<Step>,
    pub timeout: Duration,
    pub deadline: Instant,
    wait_until: Option<Instant>,
}

impl OutboundCommand {
    /// Confirmation the command is waiting on, if it got that far
    pub fn awaiting(&self) -> Option<String> {
        self.script.iter().find_map(|step| match step {
            Step::AwaitRoom(room) => Some(format!("room {}", room)),
            Step::AwaitListing(kind) => Some(format!("{:?} listing", kind)),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub username: String,
    pub host: Option<String>,
}

/// Everything the driver believes about the remote session
#[derive(Debug)]
pub struct SessionState {
    pub mode: Mode,
    pub identity: String,
    pub current_room: String,
    pub pending: Option<OutboundCommand>,
    /// Users from the most recent who listing
    pub roster: Vec<RosterEntry>,
}

impl SessionState {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            mode: Mode::Command,
            identity: identity.into(),
            current_room: DEFAULT_ROOM.to_string(),
            pending: None,
            roster: Vec::new(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|cmd| cmd.deadline)
    }
}

/// Room `com` puts new sessions in
pub const DEFAULT_ROOM: &str = "lobby";

/// Outcome of one submitted request
#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub result: Result<()>,
}

/// Snapshot for status displays
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub mode: Mode,
    pub identity: String,
    pub room: String,
    pub in_flight: Option<String>,
    pub queued: usize,
    pub roster: usize,
}

pub struct SessionDriver {
    config: DriverConfig,
    state: SessionState,
    queue: VecDeque<(Ticket, Request)>,
    next_ticket: Ticket,
    /// Earliest start of the next command (command gap)
    ready_at: Option<Instant>,
    output: Vec<u8>,
    completions: Vec<Completion>,
    closed: bool,
}

impl SessionDriver {
    pub fn new(config: DriverConfig, identity: impl Into<String>) -> Self {
        Self {
            config,
            state: SessionState::new(identity),
            queue: VecDeque::new(),
            next_ticket: 1,
            ready_at: None,
            output: Vec::new(),
            completions: Vec::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_room(&self) -> &str {
        &self.state.current_room
    }

    pub fn status(&self) -> Status {
        Status {
            mode: self.state.mode,
            identity: self.state.identity.clone(),
            room: self.state.current_room.clone(),
            in_flight: self.state.pending.as_ref().map(|cmd| cmd.request.describe()),
            queued: self.queue.len(),
            roster: self.state.roster.len(),
        }
    }

    /// Accept a request; it starts now or waits its turn in the queue
    pub fn submit(&mut self, request: Request, now: Instant) -> Result<Ticket> {
        if self.closed {
            return Err(BridgeError::Disconnected);
        }
        request.validate()?;

        let busy = self.state.pending.is_some() || !self.queue.is_empty();
        if busy {
            if self.config.queue == QueuePolicy::Reject {
                return Err(BridgeError::Busy);
            }
            if self.queue.len() >= self.config.queue_limit {
                return Err(BridgeError::QueueFull(self.queue.len()));
            }
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        tracing::debug!("queued #{} {}", ticket, request.describe());
        self.queue.push_back((ticket, request));
        self.start_next(now);
        Ok(ticket)
    }

    /// The cursor line after a feed; used to spot prompts
    pub fn observe_screen(&mut self, cursor_line: &str, now: Instant) {
        let Some(cmd) = self.state.pending.as_mut() else {
            return;
        };
        let matched = matches!(
            cmd.script.front(),
            Some(Step::Prompt { pattern, .. }) if pattern.is_match(cursor_line)
        );
        if matched {
            tracing::trace!("prompt matched: {:?}", cursor_line);
            cmd.script.pop_front();
            cmd.wait_until = None;
            self.advance(now);
            self.start_next(now);
        }
    }

    pub fn observe_cue(&mut self, cue: &Cue, now: Instant) {
        match cue {
            Cue::RoomConfirmed(room) => {
                if !room.eq_ignore_ascii_case(&self.state.current_room) {
                    tracing::info!("now in room {}", room);
                }
                self.state.current_room = room.clone();
                self.complete_step(now, |step| matches!(step, Step::AwaitRoom(target) if target.eq_ignore_ascii_case(room)));
            }
            Cue::ListingStarted(kind) => {
                if *kind == ListingKind::Who && self.owns_roster() {
                    self.state.roster.clear();
                }
            }
            Cue::ListingFinished(kind) => {
                self.complete_step(now, |step| matches!(step, Step::AwaitListing(k) if k == kind));
            }
        }
    }

    /// Who-list rows feed the roster
    pub fn observe_event(&mut self, event: &ChatEvent) {
        if event.kind != EventKind::WhoList || !self.owns_roster() {
            return;
        }
        if let Some(username) = &event.username {
            self.state.roster.push(RosterEntry {
                username: username.clone(),
                host: event.host.clone(),
            });
        }
    }

    /// Advance timers: command timeouts, prompt settle delays, queued starts
    pub fn tick(&mut self, now: Instant) {
        if let Some(cmd) = self.state.pending.as_mut() {
            if now >= cmd.deadline {
                let error = BridgeError::Timeout {
                    command: cmd.request.describe(),
                    after: cmd.timeout,
                };
                if let Some(keys) = &self.config.abort_keys {
                    self.output.extend_from_slice(keys.as_bytes());
                }
                self.finish(now, Err(error));
            } else if cmd.wait_until.is_some_and(|t| now >= t) {
                // The prompt never showed; type anyway
                tracing::debug!("settle delay elapsed for #{}", cmd.ticket);
                cmd.wait_until = None;
                if matches!(cmd.script.front(), Some(Step::Prompt { .. })) {
                    cmd.script.pop_front();
                }
                self.advance(now);
            }
        }
        self.start_next(now);
    }

    /// Next instant [`tick`](Self::tick) has work to do
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state.pending {
            Some(cmd) => Some(cmd.wait_until.map_or(cmd.deadline, |w| w.min(cmd.deadline))),
            None if !self.queue.is_empty() => self.ready_at,
            None => None,
        }
    }

    /// Keystrokes to write to the transport
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    /// Session over: fail everything pending and refuse new work
    pub fn close(&mut self) {
        self.closed = true;
        if let Some(cmd) = self.state.pending.take() {
            self.completions.push(Completion {
                ticket: cmd.ticket,
                result: Err(BridgeError::Disconnected),
            });
        }
        for (ticket, _) in self.queue.drain(..) {
            self.completions.push(Completion {
                ticket,
                result: Err(BridgeError::Disconnected),
            });
        }
        self.state.mode = Mode::Command;
        self.state.roster.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Leave the remote program, then [`close`](Self::close).
    ///
    /// An interrupted dialog gets the abort keys first so the quit key lands
    /// in command mode.
    pub fn quit(&mut self) {
        if self.closed {
            return;
        }
        if self.state.pending.is_some() {
            if let Some(keys) = &self.config.abort_keys {
                self.output.extend_from_slice(keys.as_bytes());
            }
        }
        self.output.extend_from_slice(self.config.keys.quit.as_bytes());
        self.close();
    }

    /// Who rows belong to our room unless another room was asked for
    fn owns_roster(&self) -> bool {
        !matches!(
            self.state.pending.as_ref().map(|cmd| &cmd.request),
            Some(Request::WhoIn(_))
        )
    }

    fn start_next(&mut self, now: Instant) {
        while self.state.pending.is_none() {
            if self.ready_at.is_some_and(|t| now < t) {
                return;
            }
            let Some((ticket, request)) = self.queue.pop_front() else {
                return;
            };
            let script = self.compile(&request);
            let timeout = match request {
                Request::Listing(_) | Request::WhoIn(_) => self.config.listing_timeout,
                _ => self.config.timeout,
            };
            tracing::debug!("starting #{} {}", ticket, request.describe());
            self.state.mode = request.mode();
            self.state.pending = Some(OutboundCommand {
                ticket,
                request,
                script,
                timeout,
                deadline: now + timeout,
                wait_until: None,
            });
            self.advance(now);
        }
    }

    /// Run the script until it has to wait for the remote
    fn advance(&mut self, now: Instant) {
        loop {
            let Some(cmd) = self.state.pending.as_mut() else {
                return;
            };
            match cmd.script.pop_front() {
                None => {
                    self.finish(now, Ok(()));
                    return;
                }
                Some(Step::Keys(keys)) => self.output.extend_from_slice(keys.as_bytes()),
                Some(step) => {
                    if let Step::Prompt { settle: Some(settle), .. } = &step {
                        if cmd.wait_until.is_none() {
                            cmd.wait_until = Some(now + *settle);
                        }
                    }
                    cmd.script.push_front(step);
                    return;
                }
            }
        }
    }

    fn complete_step(&mut self, now: Instant, matches_step: impl Fn(&Step) -> bool) {
        let Some(cmd) = self.state.pending.as_mut() else {
            return;
        };
        if cmd.script.front().is_some_and(&matches_step) {
            cmd.script.pop_front();
            cmd.wait_until = None;
            self.advance(now);
            self.start_next(now);
        }
    }

    fn finish(&mut self, now: Instant, result: Result<()>) {
        if let Some(cmd) = self.state.pending.take() {
            match &result {
                Ok(()) => tracing::debug!("#{} {} done", cmd.ticket, cmd.request.describe()),
                Err(e) => tracing::warn!("#{} {} failed: {}", cmd.ticket, cmd.request.describe(), e),
            }
            self.completions.push(Completion {
                ticket: cmd.ticket,
                result,
            });
        }
        self.state.mode = Mode::Command;
        self.ready_at = Some(now + self.config.command_gap);
    }

    fn compile(&self, request: &Request) -> VecDeque<Step> {
        let keys = &self.config.keys;
        let line = |text: &str| Step::Keys(format!("{}{}", sanitize(text), keys.terminator));
        let prompt = |pattern: &Regex| Step::Prompt {
            pattern: pattern.clone(),
            settle: None,
        };

        let steps = match request {
            Request::Chat(text) => vec![
                Step::Keys(keys.input.clone()),
                Step::Prompt {
                    pattern: self.config.input_prompt.clone(),
                    settle: Some(self.config.settle),
                },
                line(text),
            ],
            Request::Goto(room) => {
                let room = sanitize(room);
                vec![
                    Step::Keys(keys.goto.clone()),
                    prompt(&self.config.goto_prompt),
                    line(&room),
                    Step::AwaitRoom(room),
                ]
            }
            Request::Emote(text) => vec![Step::Keys(keys.emote.clone()), prompt(&self.config.emote_prompt), line(text)],
            Request::Private { to, room, text } => {
                let room = room.as_deref().unwrap_or(&self.state.current_room);
                vec![
                    Step::Keys(format!("{}{} {}{}", keys.private, sanitize(to), sanitize(room), keys.terminator)),
                    prompt(&self.config.private_prompt),
                    line(text),
                ]
            }
            Request::Listing(kind) => {
                let key = match kind {
                    ListingKind::Who => &keys.who,
                    ListingKind::Rooms => &keys.rooms,
                    ListingKind::Idle => &keys.idle,
                };
                vec![Step::Keys(key.clone()), Step::AwaitListing(*kind)]
            }
            Request::WhoIn(room) => vec![
                Step::Keys(format!("{}{}{}", keys.who_room, sanitize(room), keys.terminator)),
                Step::AwaitListing(ListingKind::Who),
            ],
            Request::Peek(room) => vec![Step::Keys(format!("{}{}{}", keys.peek, sanitize(room), keys.terminator))],
            Request::ReviewLines(n) => vec![
                Step::Keys(format!("{}{}", keys.review_count, keys.terminator)),
                Step::Prompt {
                    pattern: self.config.review_prompt.clone(),
                    settle: Some(self.config.settle),
                },
                line(&n.to_string()),
            ],
            Request::Raw(raw) => {
                let key = match raw {
                    RawKey::Review => &keys.review,
                    RawKey::Help => &keys.help,
                };
                vec![Step::Keys(key.clone())]
            }
        };
        steps.into()
    }
}
