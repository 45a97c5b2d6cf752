//! Session management
//!
//! One remote session: the virtual screen, the line tracker and classifier
//! reading it, and the driver deciding what to type next. No I/O happens
//! here; the bridge engine moves bytes between a transport and [`Session`].

use tokio::time::Instant;

use super::classify::{ChatEvent, Classifier};
use super::driver::{Completion, DriverConfig, Request, SessionDriver, Status, Ticket};
use super::term::{Response, Screen};
use super::tracker::LineTracker;
use crate::config::Config;
use crate::error::Result;

/// What one chunk of remote output produced
#[derive(Debug, Default)]
pub struct Ingest {
    /// Replies owed to the remote (cursor reports, device attributes)
    pub responses: Vec<Response>,
    pub events: Vec<ChatEvent>,
}

pub struct Session {
    screen: Screen,
    tracker: LineTracker,
    classifier: Classifier,
    driver: SessionDriver,
}

impl Session {
    pub fn new(config: &Config) -> Result<Self> {
        let identity = config.identity.username.clone();
        Ok(Self {
            screen: Screen::with_settle_limit(
                config.terminal.cols,
                config.terminal.rows,
                config.terminal.settle_history,
            ),
            tracker: LineTracker::new(),
            classifier: Classifier::new(identity.clone())?.with_unknown(config.bridge.emit_unknown),
            driver: SessionDriver::new(DriverConfig::from_config(config)?, identity),
        })
    }

    /// Feed raw remote output through screen, tracker, classifier and driver
    pub fn ingest(&mut self, bytes: &[u8], now: Instant) -> Ingest {
        let responses = self.screen.feed(bytes);
        let mut events = Vec::new();

        for line in self.tracker.poll(self.screen.state()) {
            // Room is re-read per line: a header earlier in this chunk may have moved us
            let event = self.classifier.classify(&line.text, self.driver.current_room());
            if let Some(event) = &event {
                self.driver.observe_event(event);
            }
            for cue in self.classifier.take_cues() {
                self.driver.observe_cue(&cue, now);
            }
            events.extend(event);
        }

        self.driver.observe_screen(&self.screen.cursor_line(), now);
        Ingest { responses, events }
    }

    pub fn submit(&mut self, request: Request, now: Instant) -> Result<Ticket> {
        self.driver.submit(request, now)
    }

    pub fn tick(&mut self, now: Instant) {
        self.driver.tick(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.driver.deadline()
    }

    /// Keystrokes the driver wants written
    pub fn take_output(&mut self) -> Vec<u8> {
        self.driver.take_output()
    }

    pub fn take_completions(&mut self) -> Vec<Completion> {
        self.driver.take_completions()
    }

    pub fn close(&mut self) {
        self.driver.close();
    }

    /// Type the quit key and close
    pub fn quit(&mut self) {
        self.driver.quit();
    }

    pub fn status(&self) -> Status {
        self.driver.status()
    }

    /// Lines lost because the settle window overflowed
    pub fn lost_lines(&self) -> u64 {
        self.tracker.lost()
    }
}
