//! Majority-vote smoothing over the last few raw predictions.

use std::collections::VecDeque;

use crate::PredictionResult;

pub const SMOOTHING_WINDOW: usize = 5;
/// Below this many entries predictions pass through unsmoothed.
pub const MIN_SMOOTHING_VOTES: usize = 3;

#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    entries: VecDeque<PredictionResult>,
}

impl SmoothingWindow {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(SMOOTHING_WINDOW),
        }
    }

    /// Record `raw` and return the prediction to forward.
    ///
    /// With at least `MIN_SMOOTHING_VOTES` entries the result carries the most
    /// frequent label and the mean confidence of the whole window. On a tie in
    /// votes the label whose first occurrence is oldest wins.
    pub fn push(&mut self, raw: PredictionResult) -> PredictionResult {
        if self.entries.len() >= SMOOTHING_WINDOW {
            self.entries.pop_front();
        }
        self.entries.push_back(raw.clone());

        if self.entries.len() < MIN_SMOOTHING_VOTES {
            return raw;
        }

        // (label, votes) in first-occurrence order
        let mut tally: Vec<(&str, usize)> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match tally.iter_mut().find(|(label, _)| *label == entry.label) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((entry.label.as_str(), 1)),
            }
        }
        let mut winner = tally[0];
        for candidate in &tally[1..] {
            if candidate.1 > winner.1 {
                winner = *candidate;
            }
        }

        let total: f32 = self.entries.iter().map(|e| e.confidence).sum();
        let mean = total / self.entries.len() as f32;
        raw.smoothed_as(winner.0, mean)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for SmoothingWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(label: &str, confidence: f32) -> PredictionResult {
        PredictionResult::new(label, confidence, 1, 10)
    }

    #[test]
    fn passes_through_until_three_votes() {
        let mut window = SmoothingWindow::new();
        let first = window.push(raw("A", 0.9));
        assert!(!first.smoothed);
        assert_eq!(first.label, "A");
        let second = window.push(raw("B", 0.8));
        assert!(!second.smoothed);
        assert_eq!(second.label, "B");
        let third = window.push(raw("B", 0.5));
        assert!(third.smoothed);
        assert_eq!(third.label, "B");
    }

    #[test]
    fn majority_label_with_mean_of_all_confidences() {
        let mut window = SmoothingWindow::new();
        let mut last = None;
        for (label, conf) in [("A", 0.9), ("A", 0.8), ("B", 0.7), ("A", 0.6), ("B", 0.5)] {
            last = Some(window.push(raw(label, conf)));
        }
        let result = last.unwrap();
        assert!(result.smoothed);
        assert_eq!(result.label, "A");
        assert!((result.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn never_holds_more_than_five() {
        let mut window = SmoothingWindow::new();
        for i in 0..6 {
            window.push(raw(if i == 0 { "Z" } else { "Y" }, 0.5));
        }
        assert_eq!(window.len(), SMOOTHING_WINDOW);
        // "Z" was evicted, so it can no longer win a vote.
        let result = window.push(raw("Z", 0.5));
        assert_eq!(result.label, "Y");
    }

    #[test]
    fn tie_goes_to_earliest_first_occurrence() {
        let mut window = SmoothingWindow::new();
        window.push(raw("B", 0.5));
        window.push(raw("A", 0.5));
        window.push(raw("A", 0.5));
        let result = window.push(raw("B", 0.5));
        assert_eq!(result.label, "B");
    }
}
