//! Approximate name matching for quick-fix suggestions
//!
//! Candidates are scored by the best interleaved, case-insensitive character
//! alignment with the input: the total number of aligned characters and the
//! longest run of consecutive aligned characters. The alignment is searched
//! depth-first with an explicit stack so memory stays bounded by the input
//! length regardless of how many alternatives exist.

use std::cmp::Ordering;

/// Default minimum ratio of matched characters to candidate length
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Upper bound on search steps spent aligning one candidate
const MAX_STEPS: usize = 50_000;

const EPSILON: f64 = 1e-9;

/// Alignment quality of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchScore {
    pub matched: usize,
    pub longest_run: usize,
}

impl PartialOrd for MatchScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatchScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.matched
            .cmp(&other.matched)
            .then(self.longest_run.cmp(&other.longest_run))
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    input: usize,
    candidate: usize,
    matched: usize,
    run: usize,
    longest_run: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyMatcher {
    threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a candidate of `candidate_len` characters is worth aligning
    /// against an input of `input_len` characters
    pub fn within_bounds(&self, input_len: usize, candidate_len: usize) -> bool {
        let input = input_len as f64;
        let candidate = candidate_len as f64;
        candidate + EPSILON >= input * self.threshold
            && candidate <= input / self.threshold + EPSILON
    }

    /// Best suggestion for `input`, several equally good candidates joined by `,`
    pub fn best_match<'a, I>(&self, input: &str, candidates: I, exclude: &[&str]) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let matches = self.best_matches(input, candidates, exclude);
        if matches.is_empty() {
            None
        } else {
            Some(matches.join(","))
        }
    }

    /// All equally best candidates in the order they were offered.
    ///
    /// Excluded candidates are dropped before scoring so they can never
    /// occupy the best slot.
    pub fn best_matches<'a, I>(&self, input: &str, candidates: I, exclude: &[&str]) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let input_chars = lowercase_chars(input);
        if input_chars.is_empty() {
            return Vec::new();
        }

        let mut best: Option<MatchScore> = None;
        let mut winners: Vec<String> = Vec::new();

        for candidate in candidates {
            if exclude.iter().any(|e| e.eq_ignore_ascii_case(candidate)) {
                continue;
            }
            let candidate_chars = lowercase_chars(candidate);
            if candidate_chars == input_chars {
                return vec![candidate.to_string()];
            }
            if candidate_chars.is_empty()
                || !self.within_bounds(input_chars.len(), candidate_chars.len())
            {
                continue;
            }

            let score = align(&input_chars, &candidate_chars);
            let ratio = score.matched as f64 / candidate_chars.len() as f64;
            if ratio + EPSILON < self.threshold {
                continue;
            }

            match best.map(|b| score.cmp(&b)) {
                None | Some(Ordering::Greater) => {
                    best = Some(score);
                    winners.clear();
                    winners.push(candidate.to_string());
                }
                Some(Ordering::Equal) => {
                    if !winners.iter().any(|w| w == candidate) {
                        winners.push(candidate.to_string());
                    }
                }
                Some(Ordering::Less) => {}
            }
        }
        winners
    }

    /// Score a single candidate without threshold or bounds filtering
    pub fn score(input: &str, candidate: &str) -> MatchScore {
        align(&lowercase_chars(input), &lowercase_chars(candidate))
    }
}

fn lowercase_chars(s: &str) -> Vec<char> {
    s.chars().flat_map(char::to_lowercase).collect()
}

/// Depth-first search for the alignment maximising matched characters, then
/// the longest consecutive run
fn align(input: &[char], candidate: &[char]) -> MatchScore {
    let perfect = input.len().min(candidate.len());
    let mut best = MatchScore::default();
    let mut stack = vec![Frame {
        input: 0,
        candidate: 0,
        matched: 0,
        run: 0,
        longest_run: 0,
    }];
    let mut steps = 0;

    while let Some(frame) = stack.pop() {
        steps += 1;
        if steps > MAX_STEPS {
            break;
        }

        let reached = MatchScore {
            matched: frame.matched,
            longest_run: frame.longest_run,
        };
        if reached > best {
            best = reached;
            if best.matched == perfect && best.longest_run == perfect {
                break;
            }
        }

        if frame.input >= input.len() || frame.candidate >= candidate.len() {
            continue;
        }

        let remaining = (input.len() - frame.input).min(candidate.len() - frame.candidate);
        let bound = frame.matched + remaining;
        if bound < best.matched
            || (bound == best.matched && frame.longest_run.max(frame.run + remaining) <= best.longest_run)
        {
            continue;
        }

        // Skip this input character
        stack.push(Frame {
            input: frame.input + 1,
            run: 0,
            ..frame
        });

        // Align it with each later occurrence; nearest occurrence is explored first
        let wanted = input[frame.input];
        for position in (frame.candidate..candidate.len()).rev() {
            if candidate[position] != wanted {
                continue;
            }
            let run = if position == frame.candidate && frame.run > 0 {
                frame.run + 1
            } else {
                1
            };
            stack.push(Frame {
                input: frame.input + 1,
                candidate: position + 1,
                matched: frame.matched + 1,
                run,
                longest_run: frame.longest_run.max(run),
            });
        }
    }
    best
}
