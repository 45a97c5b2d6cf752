//! Message classifier
//!
//! Maps finalized screen lines onto typed chat events. Patterns are tried in
//! a fixed order, most specific first, and a line that matches nothing is
//! dropped. Listing output (room list, who list, idle list) is recognized by
//! its column header and consumed row by row until the block ends.

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Kind of a classified line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Chat,
    System,
    Emote,
    Private,
    RoomList,
    WhoList,
    IdleList,
    Unknown,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Chat,
        EventKind::System,
        EventKind::Emote,
        EventKind::Private,
        EventKind::RoomList,
        EventKind::WhoList,
        EventKind::IdleList,
        EventKind::Unknown,
    ];
}

/// A line the remote printed, typed
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatEvent {
    pub kind: EventKind,
    /// Local wall clock at extraction
    pub timestamp: DateTime<Local>,
    pub username: Option<String>,
    pub host: Option<String>,
    pub content: String,
    /// Best-known room at the time the line was seen
    pub room: String,
    pub raw: String,
    /// Written by our own identity (echo of something we sent)
    pub self_origin: bool,
}

/// Listing blocks the remote prints on request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Rooms,
    Who,
    Idle,
}

impl ListingKind {
    fn event_kind(self) -> EventKind {
        match self {
            ListingKind::Rooms => EventKind::RoomList,
            ListingKind::Who => EventKind::WhoList,
            ListingKind::Idle => EventKind::IdleList,
        }
    }
}

/// Side observations the session driver cares about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cue {
    /// The remote announced the room we are in
    RoomConfirmed(String),
    ListingStarted(ListingKind),
    ListingFinished(ListingKind),
}

struct Patterns {
    rooms_header: Regex,
    who_header: Regex,
    idle_header: Regex,
    room_row: Regex,
    who_row: Regex,
    idle_row: Regex,
    room_header: Regex,
    system: Regex,
    presence: Regex,
    room_created: Regex,
    idle_warning: Regex,
    private: Regex,
    chat: Regex,
    emote: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            rooms_header: Regex::new(r"(?i)^\s*room(?:\s+name)?\s+(?:users|#|count)")?,
            who_header: Regex::new(r"(?i)^\s*user(?:name)?\s+(?:host|from)\b")?,
            idle_header: Regex::new(r"(?i)^\s*user(?:name)?\s+(?:\S+\s+)*idle\b")?,
            room_row: Regex::new(r"^\s*([\w.\-]+)\s+(\d+)(?:\s+.*)?$")?,
            who_row: Regex::new(r"^\s*(\w+)\s+([\w.\-]+)(?:\s+.*)?$")?,
            idle_row: Regex::new(r"^\s*(\w+)\s+([\w.\-:]+)(?:\s+.*)?$")?,
            room_header: Regex::new(r"^\[you are in '([^']+)'")?,
            system: Regex::new(r"^(?:\*\*\*|Unlinking|Linking|COM\b|Lobby\b)")?,
            presence: Regex::new(r"^(\w+)@([\w.\-]+)\s+(?:appears|disappears|has joined|has left)\b")?,
            room_created: Regex::new(r"(?i)^(?:creating|created)\s+(?:new\s+)?room\b|\bnew room\b")?,
            idle_warning: Regex::new(r"(?i)^you have been idle")?,
            private: Regex::new(r"^From\s+(\w+)@([\w.\-]+):\s*(.+)$")?,
            chat: Regex::new(r"^\[(\w+)(?:@([\w.\-]+))?\]\s+(.+)$")?,
            emote: Regex::new(r"^(\w+)@([\w.\-]+)\s+(DUMPs|\.+)\s*(.+)$")?,
        })
    }
}

/// Classifier with its listing sub-machine
pub struct Classifier {
    patterns: Patterns,
    identity: String,
    emit_unknown: bool,
    listing: Option<ListingKind>,
    cues: Vec<Cue>,
}

impl Classifier {
    pub fn new(identity: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: Patterns::compile()?,
            identity: identity.into(),
            emit_unknown: false,
            listing: None,
            cues: Vec::new(),
        })
    }

    /// Yield `Unknown` events for lines nothing else matched
    pub fn with_unknown(mut self, emit_unknown: bool) -> Self {
        self.emit_unknown = emit_unknown;
        self
    }

    /// Listing block currently being consumed
    pub fn listing(&self) -> Option<ListingKind> {
        self.listing
    }

    /// Cues published since the last call
    pub fn take_cues(&mut self) -> Vec<Cue> {
        std::mem::take(&mut self.cues)
    }

    pub fn classify(&mut self, line: &str, current_room: &str) -> Option<ChatEvent> {
        let text = line.trim_end();

        if let Some(kind) = self.header_kind(text) {
            self.finish_listing();
            self.listing = Some(kind);
            self.cues.push(Cue::ListingStarted(kind));
            return None;
        }

        if let Some(kind) = self.listing {
            if text.trim().is_empty() {
                self.finish_listing();
                return None;
            }
            // Notices can interleave with a block without ending it
            if let Some(event) = self.notice(text, current_room) {
                return Some(event);
            }
            if let Some(event) = self.listing_row(kind, text, current_room) {
                return Some(event);
            }
            self.finish_listing();
        }

        self.classify_line(text, current_room)
    }

    fn finish_listing(&mut self) {
        if let Some(kind) = self.listing.take() {
            self.cues.push(Cue::ListingFinished(kind));
        }
    }

    fn header_kind(&self, text: &str) -> Option<ListingKind> {
        let p = &self.patterns;
        if p.rooms_header.is_match(text) {
            Some(ListingKind::Rooms)
        } else if p.idle_header.is_match(text) {
            Some(ListingKind::Idle)
        } else if p.who_header.is_match(text) {
            Some(ListingKind::Who)
        } else {
            None
        }
    }

    fn listing_row(&self, kind: ListingKind, text: &str, room: &str) -> Option<ChatEvent> {
        let p = &self.patterns;
        let (username, host) = match kind {
            ListingKind::Rooms => {
                p.room_row.captures(text)?;
                (None, None)
            }
            ListingKind::Who => {
                let caps = p.who_row.captures(text)?;
                (Some(caps[1].to_string()), Some(caps[2].to_string()))
            }
            ListingKind::Idle => {
                let caps = p.idle_row.captures(text)?;
                (Some(caps[1].to_string()), None)
            }
        };
        let mut event = self.event(kind.event_kind(), text, room, text.trim());
        event.username = username;
        event.host = host;
        Some(event)
    }

    fn classify_line(&mut self, text: &str, room: &str) -> Option<ChatEvent> {
        if text.trim().is_empty() {
            return None;
        }
        if let Some(event) = self.notice(text, room) {
            return Some(event);
        }
        let p = &self.patterns;

        if let Some(caps) = p.private.captures(text) {
            let mut event = self.event(EventKind::Private, text, room, caps[3].trim());
            event.username = Some(caps[1].to_string());
            event.host = Some(caps[2].to_string());
            return Some(event);
        }

        if let Some(caps) = p.chat.captures(text) {
            let mut event = self.event(EventKind::Chat, text, room, caps[3].trim());
            event.username = Some(caps[1].to_string());
            event.host = caps.get(2).map(|m| m.as_str().to_string());
            event.self_origin = self.is_self(&caps[1]);
            return Some(event);
        }

        if let Some(caps) = p.emote.captures(text) {
            let content = format!("{} {}", &caps[3], caps[4].trim());
            let mut event = self.event(EventKind::Emote, text, room, &content);
            event.username = Some(caps[1].to_string());
            event.host = Some(caps[2].to_string());
            event.self_origin = self.is_self(&caps[1]);
            return Some(event);
        }

        if self.emit_unknown {
            return Some(self.event(EventKind::Unknown, text, room, text));
        }
        tracing::trace!("unclassified line: {:?}", text);
        None
    }

    /// Room headers, system lines, presence changes
    fn notice(&mut self, text: &str, room: &str) -> Option<ChatEvent> {
        let p = &self.patterns;

        if let Some(caps) = p.room_header.captures(text) {
            let confirmed = caps[1].to_string();
            self.cues.push(Cue::RoomConfirmed(confirmed.clone()));
            return Some(self.event(EventKind::System, text, &confirmed, text));
        }

        if p.system.is_match(text)
            || p.room_created.is_match(text)
            || p.idle_warning.is_match(text)
        {
            return Some(self.event(EventKind::System, text, room, text));
        }
        if let Some(caps) = p.presence.captures(text) {
            let mut event = self.event(EventKind::System, text, room, text);
            event.username = Some(caps[1].to_string());
            event.host = Some(caps[2].to_string());
            return Some(event);
        }
        None
    }

    fn is_self(&self, username: &str) -> bool {
        !self.identity.is_empty() && username.eq_ignore_ascii_case(&self.identity)
    }

    fn event(&self, kind: EventKind, raw: &str, room: &str, content: &str) -> ChatEvent {
        ChatEvent {
            kind,
            timestamp: Local::now(),
            username: None,
            host: None,
            content: content.to_string(),
            room: room.to_string(),
            raw: raw.to_string(),
            self_origin: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new("me").unwrap()
    }

    fn kind_of(line: &str) -> Option<EventKind> {
        classifier().classify(line, "lobby").map(|e| e.kind)
    }

    #[test]
    fn test_chat_line() {
        let event = classifier().classify("[alice@sdf] hello there  ", "lobby").unwrap();

        assert_eq!(event.kind, EventKind::Chat);
        assert_eq!(event.username.as_deref(), Some("alice"));
        assert_eq!(event.host.as_deref(), Some("sdf"));
        assert_eq!(event.content, "hello there");
        assert_eq!(event.room, "lobby");
        assert!(!event.self_origin);
    }

    #[test]
    fn test_chat_without_host() {
        let event = classifier().classify("[bob] hi", "anonradio").unwrap();

        assert_eq!(event.kind, EventKind::Chat);
        assert_eq!(event.host, None);
        assert_eq!(event.room, "anonradio");
    }

    #[test]
    fn test_self_origin_is_case_insensitive() {
        let event = classifier().classify("[ME@sdf] echo", "lobby").unwrap();
        assert!(event.self_origin);

        let event = classifier().classify("me@sdf DUMPs a pail", "lobby").unwrap();
        assert!(event.self_origin);
    }

    #[test]
    fn test_private_and_emote() {
        let event = classifier().classify("From carol@sdf: psst", "lobby").unwrap();
        assert_eq!(event.kind, EventKind::Private);
        assert_eq!(event.content, "psst");
        assert_eq!(event.username.as_deref(), Some("carol"));

        let event = classifier().classify("bob@sdf DUMPs a bucket of water", "lobby").unwrap();
        assert_eq!(event.kind, EventKind::Emote);
        assert_eq!(event.content, "DUMPs a bucket of water");

        let event = classifier().classify("bob@sdf ... waves", "lobby").unwrap();
        assert_eq!(event.kind, EventKind::Emote);
        assert_eq!(event.content, "... waves");
    }

    #[test]
    fn test_system_notices() {
        assert_eq!(kind_of("*** you have mail"), Some(EventKind::System));
        assert_eq!(kind_of("Unlinking TTY .."), Some(EventKind::System));
        assert_eq!(kind_of("COM 5.0 by smj"), Some(EventKind::System));
        assert_eq!(kind_of("dave@sdf appears in the room"), Some(EventKind::System));
        assert_eq!(kind_of("eve@sdf has left"), Some(EventKind::System));
        assert_eq!(kind_of("You have been idle for 10 minutes"), Some(EventKind::System));
    }

    #[test]
    fn test_unmatched_lines() {
        assert_eq!(kind_of("just some text"), None);
        assert_eq!(kind_of(""), None);

        let mut c = classifier().with_unknown(true);
        assert_eq!(c.classify("just some text", "lobby").map(|e| e.kind), Some(EventKind::Unknown));
        assert_eq!(c.classify("   ", "lobby"), None);
    }

    #[test]
    fn test_room_header_publishes_cue() {
        let mut c = classifier();
        let event = c.classify("[you are in 'anonradio' among 7]", "lobby").unwrap();

        assert_eq!(event.kind, EventKind::System);
        assert_eq!(event.room, "anonradio");
        assert_eq!(c.take_cues(), vec![Cue::RoomConfirmed("anonradio".into())]);
        assert!(c.take_cues().is_empty());
    }

    #[test]
    fn test_room_listing_block() {
        let mut c = classifier();
        let lines = ["room        users  topic", "lobby       12     chatter", "anonradio   4", "spacebar    1   ", ""];

        let events: Vec<ChatEvent> = lines.iter().filter_map(|l| c.classify(l, "lobby")).collect();

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.kind == EventKind::RoomList));
        assert_eq!(events[0].content, "lobby       12     chatter");
        assert_eq!(events[1].content, "anonradio   4");
        assert_eq!(events[2].content, "spacebar    1");
        assert_eq!(c.listing(), None);
        assert_eq!(
            c.take_cues(),
            vec![Cue::ListingStarted(ListingKind::Rooms), Cue::ListingFinished(ListingKind::Rooms)]
        );
    }

    #[test]
    fn test_who_listing_ended_by_chat() {
        let mut c = classifier();

        assert!(c.classify("username   host    room", "lobby").is_none());
        let row = c.classify("alice      sdf     lobby", "lobby").unwrap();
        assert_eq!(row.kind, EventKind::WhoList);
        assert_eq!(row.username.as_deref(), Some("alice"));
        assert_eq!(row.host.as_deref(), Some("sdf"));

        let chat = c.classify("[bob@sdf] hi", "lobby").unwrap();
        assert_eq!(chat.kind, EventKind::Chat);
        assert_eq!(c.listing(), None);
    }

    #[test]
    fn test_notices_inside_who_block() {
        let mut c = classifier();

        assert!(c.classify("username   host", "lobby").is_none());
        let notice = c.classify("Unlinking TTY ..", "lobby").unwrap();
        assert_eq!(notice.kind, EventKind::System);
        assert_eq!(notice.username, None);
        assert_eq!(c.classify("COM 5.0 by smj", "lobby").unwrap().kind, EventKind::System);

        // The block is still open
        assert_eq!(c.listing(), Some(ListingKind::Who));
        let row = c.classify("alice      sdf", "lobby").unwrap();
        assert_eq!(row.kind, EventKind::WhoList);
    }

    #[test]
    fn test_header_switches_listing() {
        let mut c = classifier();

        c.classify("user  host", "lobby");
        c.classify("user  idle", "lobby");
        let row = c.classify("alice 5m", "lobby").unwrap();

        assert_eq!(row.kind, EventKind::IdleList);
        assert_eq!(
            c.take_cues(),
            vec![
                Cue::ListingStarted(ListingKind::Who),
                Cue::ListingFinished(ListingKind::Who),
                Cue::ListingStarted(ListingKind::Idle),
            ]
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let lines = ["[a@b] x", "From c@d: y", "e@f DUMPs z", "*** w", "nothing"];
        let first: Vec<_> = lines.iter().map(|l| kind_of(l)).collect();
        let second: Vec<_> = lines.iter().map(|l| kind_of(l)).collect();
        assert_eq!(first, second);
    }
}
