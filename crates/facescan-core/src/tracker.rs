//! Multi-frame identity confirmation.
//!
//! A single search can match the wrong person on a blurred or half-turned
//! face. [`DetectionTracker`] keeps the last few per-frame verdicts and only
//! confirms a person once they dominate the window.

use std::collections::VecDeque;

pub const DEFAULT_TRACKER_WINDOW: usize = 10;
pub const DEFAULT_TRACKER_CONFIRM: usize = 5;

/// Sliding window of per-frame identities (`None` = nobody recognized).
#[derive(Debug, Clone)]
pub struct DetectionTracker {
    window: usize,
    confirm: usize,
    history: VecDeque<Option<String>>,
}

impl Default for DetectionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKER_WINDOW, DEFAULT_TRACKER_CONFIRM)
    }
}

impl DetectionTracker {
    /// `confirm` is clamped into `1..=window`; a zero window is treated as 1.
    pub fn new(window: usize, confirm: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            confirm: confirm.clamp(1, window),
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn confirm_threshold(&self) -> usize {
        self.confirm
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append one frame's verdict, evicting the oldest once the window is full.
    pub fn add_detection(&mut self, person: Option<&str>) {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(person.map(str::to_owned));
    }

    /// The person seen in at least `confirm` entries of the window, if any.
    ///
    /// A confirmation clears the history so the same person is not reported
    /// again on the next frame. A full window without a confirmation is also
    /// cleared, so counting starts afresh.
    pub fn confirmed_person(&mut self) -> Option<String> {
        let leader = self.leader();
        match leader {
            Some((person, count)) if count >= self.confirm => {
                tracing::debug!(person = %person, count, window = self.history.len(), "identity confirmed");
                self.reset();
                Some(person)
            }
            _ => {
                if self.history.len() >= self.window {
                    tracing::debug!(window = self.window, "window full without confirmation; resetting");
                    self.reset();
                }
                None
            }
        }
    }

    /// Add a verdict and check for a confirmation in one step.
    pub fn observe(&mut self, person: Option<&str>) -> Option<String> {
        self.add_detection(person);
        self.confirmed_person()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Most frequent named person; ties go to whoever appeared first.
    fn leader(&self) -> Option<(String, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for name in self.history.iter().flatten() {
            match counts.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some((_, c)) => *c += 1,
                None => counts.push((name.as_str(), 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for (name, count) in counts {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((name, count));
            }
        }
        best.map(|(name, count)| (name.to_string(), count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut DetectionTracker, verdicts: &[Option<&str>]) -> Vec<Option<String>> {
        verdicts.iter().map(|v| tracker.observe(*v)).collect()
    }

    #[test]
    fn test_confirms_at_five_of_ten() {
        let mut tracker = DetectionTracker::default();
        let out = feed(
            &mut tracker,
            &[Some("alice"), None, Some("alice"), Some("bob"), Some("alice"), None, Some("alice")],
        );
        assert!(out.iter().all(Option::is_none));

        assert_eq!(tracker.observe(Some("alice")).as_deref(), Some("alice"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_four_of_ten_never_confirms() {
        let mut tracker = DetectionTracker::default();
        let verdicts = [
            Some("alice"), None, Some("alice"), Some("bob"), None,
            Some("alice"), Some("bob"), None, Some("alice"), Some("bob"),
        ];
        let out = feed(&mut tracker, &verdicts);
        assert!(out.iter().all(Option::is_none));
        // Full window without a winner starts over.
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_full_window_drops_old_votes() {
        let mut tracker = DetectionTracker::default();
        let mut verdicts = vec![Some("alice"); 4];
        verdicts.extend([None; 6]);
        assert!(feed(&mut tracker, &verdicts).iter().all(Option::is_none));

        // The first four votes are gone; four more are not enough.
        assert!(feed(&mut tracker, &[Some("alice"); 4]).iter().all(Option::is_none));
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.observe(Some("alice")).as_deref(), Some("alice"));
    }

    #[test]
    fn test_add_detection_evicts_oldest() {
        let mut tracker = DetectionTracker::new(3, 2);
        tracker.add_detection(Some("alice"));
        tracker.add_detection(None);
        tracker.add_detection(None);
        tracker.add_detection(Some("alice"));
        assert_eq!(tracker.len(), 3);
        // Only one "alice" left in the window.
        assert!(tracker.confirmed_person().is_none());
    }

    #[test]
    fn test_all_none_never_confirms() {
        let mut tracker = DetectionTracker::default();
        assert!(feed(&mut tracker, &[None; 25]).iter().all(Option::is_none));
    }

    #[test]
    fn test_new_clamps_threshold() {
        let tracker = DetectionTracker::new(0, 9);
        assert_eq!((tracker.window(), tracker.confirm_threshold()), (1, 1));
        let tracker = DetectionTracker::new(10, 0);
        assert_eq!(tracker.confirm_threshold(), 1);
    }
}
