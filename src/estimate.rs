use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::config::Calibration;
use crate::overhead::Overhead;

pub const MIN_REPORTED_CAPACITY: u64 = 10_000;
pub const MAX_REPORTED_CAPACITY: u64 = 2_000_000;
pub const DEFAULT_MODEL_CAPACITY: u64 = 500_000;

#[derive(Debug, Clone, Copy)]
pub struct CapacityRule {
    pub family: &'static str,
    pub matches: fn(&str) -> bool,
    pub capacity: u64,
}

/// Evaluated top to bottom; the first matching rule wins. Matching is by
/// case-sensitive substring on the model id.
pub static MODEL_CAPACITY_RULES: [CapacityRule; 5] = [
    CapacityRule {
        family: "sonnet",
        matches: is_sonnet,
        capacity: 1_000_000,
    },
    CapacityRule {
        family: "claude",
        matches: is_claude,
        capacity: 200_000,
    },
    CapacityRule {
        family: "gpt-4",
        matches: is_gpt4,
        capacity: 128_000,
    },
    CapacityRule {
        family: "gemini",
        matches: is_gemini,
        capacity: 1_048_576,
    },
    CapacityRule {
        family: "grok",
        matches: is_grok,
        capacity: 128_000,
    },
];

fn is_sonnet(id: &str) -> bool {
    id.contains("sonnet")
}

fn is_claude(id: &str) -> bool {
    id.contains("claude") || id.contains("opus") || id.contains("haiku")
}

fn is_gpt4(id: &str) -> bool {
    id.contains("gpt-4")
}

fn is_gemini(id: &str) -> bool {
    id.contains("gemini")
}

fn is_grok(id: &str) -> bool {
    id.contains("grok")
}

pub fn matching_rule(model_id: &str) -> Option<&'static CapacityRule> {
    MODEL_CAPACITY_RULES
        .iter()
        .find(|rule| (rule.matches)(model_id))
}

pub fn capacity_for_model(model_id: &str) -> u64 {
    matching_rule(model_id).map_or(DEFAULT_MODEL_CAPACITY, |rule| rule.capacity)
}

pub trait Tokenizer {
    fn count_tokens(&self, text: &str) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimateSource {
    Authoritative,
    Transcript,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContextEstimate {
    pub consumed_tokens: u64,
    pub capacity: u64,
    pub percent: u64,
    pub remaining: i64,
    pub source: EstimateSource,
}

impl ContextEstimate {
    pub fn new(consumed_tokens: u64, capacity: u64, source: EstimateSource) -> Self {
        let capacity = capacity.max(1);
        Self {
            consumed_tokens,
            capacity,
            percent: consumed_tokens.saturating_mul(100) / capacity,
            remaining: signed(capacity).saturating_sub(signed(consumed_tokens)),
            source,
        }
    }
}

fn signed(tokens: u64) -> i64 {
    i64::try_from(tokens).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct EstimateRequest<'a> {
    pub authoritative_tokens: Option<u64>,
    pub reported_capacity: Option<u64>,
    pub model_id: &'a str,
    pub transcript: Option<&'a Path>,
    pub overhead: &'a Overhead,
}

pub struct TokenEstimator<'a> {
    calibration: &'a Calibration,
    chars_per_token: u64,
    tokenizer: Option<Box<dyn Tokenizer + 'a>>,
}

impl<'a> TokenEstimator<'a> {
    pub fn new(calibration: &'a Calibration, chars_per_token: u64) -> Self {
        Self {
            calibration,
            chars_per_token: chars_per_token.max(1),
            tokenizer: None,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: impl Tokenizer + 'a) -> Self {
        self.tokenizer = Some(Box::new(tokenizer));
        self
    }

    pub fn estimate(&self, request: EstimateRequest<'_>) -> Option<ContextEstimate> {
        if let Some(tokens) = request.authoritative_tokens.filter(|tokens| *tokens > 0) {
            return Some(self.from_authoritative(
                tokens,
                request.reported_capacity,
                request.model_id,
            ));
        }

        let transcript = request.transcript?;
        let transcript_tokens = self.transcript_tokens(transcript)?;
        Some(self.from_transcript(transcript_tokens, request.overhead.total()))
    }

    fn from_authoritative(
        &self,
        tokens: u64,
        reported_capacity: Option<u64>,
        model_id: &str,
    ) -> ContextEstimate {
        let capacity = reported_capacity
            .filter(|cap| (MIN_REPORTED_CAPACITY..=MAX_REPORTED_CAPACITY).contains(cap))
            .unwrap_or_else(|| capacity_for_model(model_id));
        let consumed = clamp_over_reported(tokens, capacity);
        ContextEstimate::new(consumed, capacity, EstimateSource::Authoritative)
    }

    fn from_transcript(&self, transcript_tokens: u64, overhead_total: u64) -> ContextEstimate {
        let cal = self.calibration;
        let mut consumed = transcript_tokens
            .saturating_add(overhead_total)
            .saturating_sub(cal.message_overlap);
        if consumed > cal.sanity_ceiling {
            debug!(
                estimate = consumed,
                ceiling = cal.sanity_ceiling,
                "transcript estimate above ceiling; recomputing conservatively"
            );
            consumed = (transcript_tokens / 10).saturating_add(overhead_total);
        }
        ContextEstimate::new(consumed, cal.fallback_capacity, EstimateSource::Transcript)
    }

    fn transcript_tokens(&self, path: &Path) -> Option<u64> {
        let size = match fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return None,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "transcript unavailable");
                return None;
            }
        };

        if let Some(tokenizer) = &self.tokenizer
            && size <= self.calibration.large_transcript_bytes
        {
            match fs::read_to_string(path) {
                Ok(text) => {
                    if let Some(count) = tokenizer.count_tokens(&text) {
                        return Some(count);
                    }
                }
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "transcript not readable as text");
                }
            }
        }

        Some(size / self.chars_per_token)
    }
}

pub fn clamp_over_reported(tokens: u64, capacity: u64) -> u64 {
    if tokens > capacity {
        capacity.saturating_mul(3) / 4
    } else {
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn fixed_overhead(total_extra: u64) -> Overhead {
        Overhead {
            system_prompt: 3_100,
            system_tools: 11_800,
            memory: total_extra,
            ..Overhead::default()
        }
    }

    struct WordCounter<'c> {
        calls: &'c Cell<u32>,
    }

    impl Tokenizer for WordCounter<'_> {
        fn count_tokens(&self, text: &str) -> Option<u64> {
            self.calls.set(self.calls.get() + 1);
            Some(text.split_whitespace().count() as u64)
        }
    }

    #[test]
    fn model_table_maps_known_families() {
        assert_eq!(capacity_for_model("claude-sonnet-4-20250514"), 1_000_000);
        assert_eq!(capacity_for_model("claude-3-5-sonnet-20241022"), 1_000_000);
        assert_eq!(capacity_for_model("claude-3-opus"), 200_000);
        assert_eq!(capacity_for_model("gpt-4o-mini"), 128_000);
        assert_eq!(capacity_for_model("gemini-1.5-pro"), 1_048_576);
        assert_eq!(capacity_for_model("grok-2"), 128_000);
        assert_eq!(capacity_for_model("llama-3"), 500_000);
        assert_eq!(capacity_for_model(""), 500_000);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rule = matching_rule("claude-3-5-sonnet-20241022").expect("rule");
        assert_eq!(rule.family, "sonnet");
        assert_eq!(matching_rule("claude-3-haiku").map(|r| r.family), Some("claude"));
        assert!(matching_rule("llama-3").is_none());
    }

    #[test]
    fn model_table_is_case_sensitive() {
        assert_eq!(capacity_for_model("Claude Opus"), 500_000);
        assert_eq!(capacity_for_model("GPT-4"), 500_000);
    }

    #[test]
    fn percent_truncates() {
        let estimate = ContextEstimate::new(129_000, 200_000, EstimateSource::Authoritative);
        assert_eq!(estimate.percent, 64);
        assert_eq!(estimate.remaining, 71_000);
    }

    #[test]
    fn over_capacity_estimate_exceeds_hundred_percent() {
        let estimate = ContextEstimate::new(250_000, 200_000, EstimateSource::Transcript);
        assert_eq!(estimate.percent, 125);
        assert_eq!(estimate.remaining, -50_000);

        let saturated = ContextEstimate::new(u64::MAX, 200_000, EstimateSource::Transcript);
        assert_eq!(saturated.remaining, 200_000 - i64::MAX);
    }

    #[test]
    fn clamp_is_three_quarters_of_capacity() {
        for (tokens, capacity) in [(200_001, 200_000), (5_000_000, 128_000), (11, 10)] {
            let clamped = clamp_over_reported(tokens, capacity);
            assert_eq!(clamped, capacity * 3 / 4);
            assert!(clamped <= capacity);
        }
        assert_eq!(clamp_over_reported(200_000, 200_000), 200_000);
    }

    #[test]
    fn authoritative_count_trusts_reported_capacity_in_range() {
        let cal = Calibration::default();
        let overhead = Overhead::default();
        let estimator = TokenEstimator::new(&cal, 125);

        let estimate = estimator
            .estimate(EstimateRequest {
                authoritative_tokens: Some(50_000),
                reported_capacity: Some(100_000),
                model_id: "claude-3-opus",
                transcript: None,
                overhead: &overhead,
            })
            .expect("estimate");
        assert_eq!(estimate.capacity, 100_000);
        assert_eq!(estimate.percent, 50);
        assert_eq!(estimate.source, EstimateSource::Authoritative);
    }

    #[test]
    fn out_of_range_reported_capacity_uses_model_table() {
        let cal = Calibration::default();
        let overhead = Overhead::default();
        let estimator = TokenEstimator::new(&cal, 125);

        for reported in [Some(9_999), Some(2_000_001), None] {
            let estimate = estimator
                .estimate(EstimateRequest {
                    authoritative_tokens: Some(64_000),
                    reported_capacity: reported,
                    model_id: "gpt-4o-mini",
                    transcript: None,
                    overhead: &overhead,
                })
                .expect("estimate");
            assert_eq!(estimate.capacity, 128_000);
            assert_eq!(estimate.percent, 50);
        }
    }

    #[test]
    fn over_reported_authoritative_count_is_clamped() {
        let cal = Calibration::default();
        let overhead = Overhead::default();
        let estimate = TokenEstimator::new(&cal, 125)
            .estimate(EstimateRequest {
                authoritative_tokens: Some(300_000),
                reported_capacity: Some(200_000),
                model_id: "claude-3-opus",
                transcript: None,
                overhead: &overhead,
            })
            .expect("estimate");
        assert_eq!(estimate.consumed_tokens, 150_000);
        assert_eq!(estimate.percent, 75);
        assert_eq!(estimate.remaining, 50_000);
    }

    #[test]
    fn zero_authoritative_count_without_transcript_is_unavailable() {
        let cal = Calibration::default();
        let overhead = Overhead::default();
        let estimate = TokenEstimator::new(&cal, 125).estimate(EstimateRequest {
            authoritative_tokens: Some(0),
            reported_capacity: Some(200_000),
            model_id: "claude-3-opus",
            transcript: None,
            overhead: &overhead,
        });
        assert_eq!(estimate, None);
    }

    #[test]
    fn transcript_path_divides_bytes_adds_overhead_and_subtracts_overlap() {
        let tmp = TempDir::new().expect("temp dir");
        let transcript = tmp.path().join("session.jsonl");
        fs::write(&transcript, vec![b'x'; 1_250_000]).expect("write");

        let cal = Calibration::default();
        let overhead = fixed_overhead(1_600);
        let estimate = TokenEstimator::new(&cal, 125)
            .estimate(EstimateRequest {
                authoritative_tokens: None,
                reported_capacity: Some(1_000_000),
                model_id: "claude-sonnet-4",
                transcript: Some(&transcript),
                overhead: &overhead,
            })
            .expect("estimate");

        // 10_000 transcript + 16_500 overhead - 6_000 overlap
        assert_eq!(estimate.consumed_tokens, 20_500);
        assert_eq!(estimate.capacity, 200_000);
        assert_eq!(estimate.percent, 10);
        assert_eq!(estimate.source, EstimateSource::Transcript);
    }

    #[test]
    fn runaway_transcript_estimate_is_recomputed_conservatively() {
        let tmp = TempDir::new().expect("temp dir");
        let transcript = tmp.path().join("huge.jsonl");
        fs::write(&transcript, vec![b'x'; 500_000]).expect("write");

        let cal = Calibration::default();
        let overhead = fixed_overhead(0);
        let estimate = TokenEstimator::new(&cal, 1)
            .estimate(EstimateRequest {
                authoritative_tokens: None,
                reported_capacity: None,
                model_id: "",
                transcript: Some(&transcript),
                overhead: &overhead,
            })
            .expect("estimate");

        assert_eq!(estimate.consumed_tokens, 50_000 + 14_900);
        assert_eq!(estimate.percent, 32);
    }

    #[test]
    fn transcript_estimate_is_not_clamped_at_capacity() {
        let tmp = TempDir::new().expect("temp dir");
        let transcript = tmp.path().join("long.jsonl");
        fs::write(&transcript, vec![b'x'; 300_000]).expect("write");

        let cal = Calibration::default();
        let overhead = fixed_overhead(0);
        let estimate = TokenEstimator::new(&cal, 1)
            .estimate(EstimateRequest {
                authoritative_tokens: None,
                reported_capacity: None,
                model_id: "",
                transcript: Some(&transcript),
                overhead: &overhead,
            })
            .expect("estimate");

        assert_eq!(estimate.consumed_tokens, 308_900);
        assert_eq!(estimate.percent, 154);
        assert_eq!(estimate.remaining, -108_900);
    }

    #[test]
    fn huge_overhead_saturates_instead_of_overflowing() {
        let cal = Calibration::default();
        let estimate = TokenEstimator::new(&cal, 1).from_transcript(1_000, u64::MAX);
        assert_eq!(estimate.consumed_tokens, u64::MAX);
        assert_eq!(estimate.remaining, 200_000 - i64::MAX);
    }

    #[test]
    fn pluggable_tokenizer_is_used_below_size_threshold() {
        let tmp = TempDir::new().expect("temp dir");
        let transcript = tmp.path().join("session.jsonl");
        fs::write(&transcript, "one two three four").expect("write");

        let cal = Calibration {
            message_overlap: 0,
            ..Calibration::default()
        };
        let overhead = Overhead::default();
        let calls = Cell::new(0);
        let estimate = TokenEstimator::new(&cal, 125)
            .with_tokenizer(WordCounter { calls: &calls })
            .estimate(EstimateRequest {
                authoritative_tokens: None,
                reported_capacity: None,
                model_id: "",
                transcript: Some(&transcript),
                overhead: &overhead,
            })
            .expect("estimate");
        assert_eq!(calls.get(), 1);
        assert_eq!(estimate.consumed_tokens, 4);
    }

    #[test]
    fn oversized_transcript_skips_tokenizer() {
        let tmp = TempDir::new().expect("temp dir");
        let transcript = tmp.path().join("session.jsonl");
        fs::write(&transcript, "a b c d e f g h i j").expect("write");

        let cal = Calibration {
            message_overlap: 0,
            large_transcript_bytes: 4,
            ..Calibration::default()
        };
        let overhead = Overhead::default();
        let calls = Cell::new(0);
        let estimate = TokenEstimator::new(&cal, 2)
            .with_tokenizer(WordCounter { calls: &calls })
            .estimate(EstimateRequest {
                authoritative_tokens: None,
                reported_capacity: None,
                model_id: "",
                transcript: Some(&transcript),
                overhead: &overhead,
            })
            .expect("estimate");
        assert_eq!(calls.get(), 0);
        assert_eq!(estimate.consumed_tokens, 19 / 2);
    }

    #[test]
    fn missing_transcript_is_unavailable() {
        let tmp = TempDir::new().expect("temp dir");
        let cal = Calibration::default();
        let overhead = Overhead::default();
        let missing = tmp.path().join("missing.jsonl");
        let estimate = TokenEstimator::new(&cal, 125).estimate(EstimateRequest {
            authoritative_tokens: None,
            reported_capacity: None,
            model_id: "claude-3-opus",
            transcript: Some(&missing),
            overhead: &overhead,
        });
        assert_eq!(estimate, None);
    }
}
