//! Line diff tracker
//!
//! Turns the screen's settle log into an ordered stream of finalized lines.
//! The tracker only keeps a watermark, the key of the last record it handed
//! out, so polling the same state twice yields nothing new.

use super::term::TerminalState;

/// A screen row that will not change any more
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedLine {
    pub text: String,
    /// (epoch, index) settle key
    pub key: (u64, u64),
}

#[derive(Default)]
pub struct LineTracker {
    watermark: Option<(u64, u64)>,
    lost: u64,
}

impl LineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines settled since the previous poll, in screen order
    pub fn poll(&mut self, state: &TerminalState) -> Vec<FinalizedLine> {
        let mut lines = Vec::new();

        for record in state.screen.settled() {
            let key = record.key();
            if self.watermark.is_some_and(|w| key <= w) {
                continue;
            }

            let missing = self.missing_before(key);
            if missing > 0 {
                self.lost += missing;
                tracing::warn!(
                    "settle window overflowed: {} line(s) lost before {:?} (poll more often or raise settle_history)",
                    missing,
                    key
                );
            }

            lines.push(FinalizedLine {
                text: record.text.clone(),
                key,
            });
            self.watermark = Some(key);
        }

        lines
    }

    /// Records skipped between the watermark and `key`
    fn missing_before(&self, key: (u64, u64)) -> u64 {
        match self.watermark {
            Some((epoch, index)) if epoch == key.0 => key.1.saturating_sub(index + 1),
            // A new epoch (or the first poll) starts at index 0
            _ => key.1,
        }
    }

    /// Total lines lost to settle window overflow
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Screen;
    use proptest::prelude::*;

    fn texts(lines: &[FinalizedLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut screen = Screen::new(40, 5);
        let mut tracker = LineTracker::new();

        screen.feed(b"[alice@sdf] hel");
        assert!(tracker.poll(screen.state()).is_empty());

        screen.feed(b"lo\r\n");
        let lines = tracker.poll(screen.state());
        assert_eq!(texts(&lines), vec!["[alice@sdf] hello"]);
        assert!(tracker.poll(screen.state()).is_empty());
    }

    #[test]
    fn test_scrolled_off_rows_are_finalized() {
        let mut screen = Screen::new(20, 3);
        let mut tracker = LineTracker::new();

        // Cursor-addressed writes without line feeds, then scroll them away
        screen.feed(b"\x1b[1;1Htop\x1b[3;1H\x1b[2S");
        let lines = tracker.poll(screen.state());
        assert_eq!(texts(&lines), vec!["top"]);
    }

    #[test]
    fn test_new_epoch_after_clear() {
        let mut screen = Screen::new(20, 5);
        let mut tracker = LineTracker::new();

        screen.feed(b"one\r\ntwo\r\n");
        assert_eq!(texts(&tracker.poll(screen.state())), vec!["one", "two"]);

        screen.feed(b"\x1b[2J\x1b[Hthree\r\n");
        assert_eq!(texts(&tracker.poll(screen.state())), vec!["three"]);
        assert_eq!(tracker.lost(), 0);
    }

    #[test]
    fn test_overflow_is_counted() {
        let mut screen = Screen::with_settle_limit(20, 5, 2);
        let mut tracker = LineTracker::new();

        screen.feed(b"a\r\nb\r\nc\r\nd\r\n");
        let lines = tracker.poll(screen.state());

        assert_eq!(texts(&lines), vec!["c", "d"]);
        assert_eq!(tracker.lost(), 2);
    }

    proptest! {
        #[test]
        fn polling_never_duplicates_or_skips(
            lines in proptest::collection::vec("[a-z ]{0,30}", 1..20),
            cuts in proptest::collection::vec(0usize..400, 0..10),
            extra_polls in proptest::collection::vec(any::<bool>(), 12),
        ) {
            let stream: String = lines.iter().map(|l| format!("{}\r\n", l)).collect();
            let bytes = stream.as_bytes();

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            cuts.sort_unstable();
            cuts.push(bytes.len());

            let mut screen = Screen::new(40, 6);
            let mut tracker = LineTracker::new();
            let mut seen = Vec::new();
            let mut start = 0;
            for (i, cut) in cuts.into_iter().enumerate() {
                screen.feed(&bytes[start..cut]);
                start = cut;
                seen.extend(tracker.poll(screen.state()));
                if extra_polls.get(i).copied().unwrap_or(false) {
                    seen.extend(tracker.poll(screen.state()));
                }
            }

            let expected: Vec<String> = lines.iter().map(|l| l.trim_end().to_string()).collect();
            let got: Vec<String> = seen.iter().map(|l| l.text.clone()).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
