//! Grouping timed words into captions.

use crate::records::SubtitleSegment;

/// A script token with its final timing
#[derive(Debug, Clone, PartialEq)]
pub struct TimedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentRules {
    pub max_words: usize,
    /// Silence between words that starts a new caption
    pub pause_threshold: f64,
}

fn ends_sentence(word: &str) -> bool {
    word.contains(['.', '!', '?'])
}

/// Break after `max_words` words, before a pause longer than the threshold,
/// after sentence punctuation, and at the last word.
pub fn segment(words: &[TimedWord], rules: SegmentRules) -> Vec<SubtitleSegment> {
    let mut segments = Vec::new();
    let mut current: Vec<&TimedWord> = Vec::new();

    for (i, word) in words.iter().enumerate() {
        current.push(word);

        let next = words.get(i + 1);
        let should_break = match next {
            None => true,
            Some(next) => {
                current.len() >= rules.max_words.max(1)
                    || next.start - word.end > rules.pause_threshold
                    || ends_sentence(&word.text)
            }
        };

        if should_break {
            if let (Some(first), Some(last)) = (current.first(), current.last()) {
                segments.push(SubtitleSegment {
                    start: first.start,
                    end: last.end.max(first.start),
                    text: current.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "),
                });
            }
            current.clear();
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> TimedWord {
        TimedWord {
            text: text.to_string(),
            start,
            end,
        }
    }

    const RULES: SegmentRules = SegmentRules {
        max_words: 5,
        pause_threshold: 0.3,
    };

    #[test]
    fn test_breaks_on_word_limit() {
        let words: Vec<_> = (0..7)
            .map(|i| word(&format!("w{}", i), i as f64 * 0.2, i as f64 * 0.2 + 0.15))
            .collect();

        let segments = segment(&words, RULES);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "w0 w1 w2 w3 w4");
        assert_eq!(segments[1].text, "w5 w6");
        assert_eq!(segments[1].start, 1.0);
    }

    #[test]
    fn test_breaks_on_pause_and_punctuation() {
        let words = vec![
            word("Do.", 0.0, 0.3),
            word("Or", 0.35, 0.5),
            word("do", 0.5, 0.7),
            word("not", 1.2, 1.5),
            word("there", 1.5, 1.8),
        ];

        let texts: Vec<_> = segment(&words, RULES).into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["Do.", "Or do", "not there"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(segment(&[], RULES).is_empty());
    }
}
