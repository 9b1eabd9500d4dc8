use std::collections::HashSet;

use crate::config::GroundingConfig;
use crate::error::ProviderError;
use crate::models::Grade;

/// Evidence shorter than this (after normalization) cannot ground anything
const MIN_EVIDENCE_CHARS: usize = 4;

/// Quote marks stripped before comparing evidence with content
const QUOTE_CHARS: &[char] = &[
    '"', '\'', '`', '“', '”', '‘', '’', '「', '」', '『', '』', '«', '»',
];

/// Result of checking a grade's evidence against the record content
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingCheck {
    pub grounded: bool,
    /// Evidence items that matched the content
    pub matched: usize,
    pub errors: Vec<String>,
}

/// Parse the model's raw output into a grade.
///
/// Markdown code fences around the JSON are tolerated. Unparsable output and
/// out-of-range scores are transient errors: the same request may well
/// produce a usable answer next time.
pub fn parse_grade(raw: &str) -> Result<Grade, ProviderError> {
    let cleaned = strip_code_fence(raw);
    let grade: Grade = serde_json::from_str(cleaned)
        .map_err(|e| ProviderError::Transient(format!("unparsable grade: {}", e)))?;

    if !grade.scores_in_bounds() {
        return Err(ProviderError::Transient(format!(
            "score out of range: overall {} criteria {:?}",
            grade.score, grade.criteria
        )));
    }

    Ok(grade)
}

pub(crate) fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Check that a grade's rationale is backed by evidence taken from `content`.
///
/// An evidence item counts when it occurs verbatim in the content (ignoring
/// quote marks, punctuation, case and whitespace runs), or when it is a close
/// paraphrase of one passage:
/// - word-separated text: enough of the item's word trigrams occur in the
///   content as contiguous word runs;
/// - unsegmented text (Japanese, Chinese, Korean): the longest run of
///   characters it shares with the content covers enough of the item.
pub fn check_grounding(grade: &Grade, content: &str, config: &GroundingConfig) -> GroundingCheck {
    let mut errors = Vec::new();

    if grade.rationale.trim().is_empty() {
        errors.push("rationale is empty".to_string());
    }
    if grade.evidence.is_empty() {
        errors.push("no evidence cited".to_string());
    }

    let content_norm = normalize_text(content);
    let content_words = words(content);
    let content_trigrams: HashSet<&[String]> = content_words.windows(3).collect();
    let content_chars: Vec<char> = content.chars().filter(|c| c.is_alphanumeric()).collect();

    let mut matched = 0;
    for item in &grade.evidence {
        let evidence = normalize_text(item);
        if evidence.chars().filter(|c| !c.is_whitespace()).count() < MIN_EVIDENCE_CHARS {
            continue;
        }

        let grounded = if content_norm.contains(&evidence) {
            true
        } else if evidence.chars().any(is_unsegmented) {
            let evidence_chars: Vec<char> = item.chars().filter(|c| c.is_alphanumeric()).collect();
            shared_run_ratio(&evidence_chars, &content_chars) >= config.min_paraphrase_overlap
        } else {
            let evidence_words = words(item);
            contains_run(&content_words, &evidence_words)
                || trigram_overlap(&evidence_words, &content_trigrams) >= config.min_paraphrase_overlap
        };
        if grounded {
            matched += 1;
        }
    }

    if !grade.evidence.is_empty() && matched == 0 {
        errors.push("no evidence item matches the content".to_string());
    }

    GroundingCheck {
        grounded: errors.is_empty(),
        matched,
        errors,
    }
}

/// Lowercase, drop quote marks, collapse whitespace
fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !QUOTE_CHARS.contains(c))
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased alphanumeric word tokens; punctuation separates words
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Scripts written without spaces between words
fn is_unsegmented(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF      // hiragana, katakana
            | 0x3400..=0x4DBF // CJK extension A
            | 0x4E00..=0x9FFF // CJK unified ideographs
            | 0xF900..=0xFAFF // CJK compatibility ideographs
            | 0xAC00..=0xD7AF // hangul syllables
    )
}

/// Whether `needle` occurs in `haystack` as a contiguous word run
fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Fraction of the evidence's word trigrams that occur in the content.
/// Items of fewer than three words have no trigrams and must match verbatim.
fn trigram_overlap(evidence: &[String], content_trigrams: &HashSet<&[String]>) -> f64 {
    let trigrams: Vec<&[String]> = evidence.windows(3).collect();
    if trigrams.is_empty() {
        return 0.0;
    }
    let shared = trigrams
        .iter()
        .filter(|t| content_trigrams.contains(*t))
        .count();
    shared as f64 / trigrams.len() as f64
}

/// Length of the longest character run shared with the content, as a
/// fraction of the evidence length
fn shared_run_ratio(evidence: &[char], content: &[char]) -> f64 {
    if evidence.is_empty() || content.is_empty() {
        return 0.0;
    }
    // Longest common substring, one DP row at a time
    let mut previous = vec![0usize; content.len() + 1];
    let mut current = vec![0usize; content.len() + 1];
    let mut longest = 0;
    for &e in evidence {
        for (j, &c) in content.iter().enumerate() {
            current[j + 1] = if e == c { previous[j] + 1 } else { 0 };
            longest = longest.max(current[j + 1]);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    longest as f64 / evidence.len() as f64
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const CONTENT: &str = "Customer: My flight was cancelled.\n\
        Agent: I'm very sorry for the trouble. I have rebooked you on the 3pm flight \
        and sent the new itinerary to your email.";

    fn grade(evidence: &[&str]) -> Grade {
        Grade {
            score: 4,
            criteria: BTreeMap::new(),
            rationale: "Apologized and rebooked quickly".to_string(),
            evidence: evidence.iter().map(|e| e.to_string()).collect(),
            improvement: None,
        }
    }

    #[test]
    fn test_verbatim_quote_is_grounded() {
        let check = check_grounding(
            &grade(&["\"I'm very  sorry for the TROUBLE.\""]),
            CONTENT,
            &GroundingConfig::default(),
        );
        assert!(check.grounded, "{:?}", check.errors);
        assert_eq!(check.matched, 1);
    }

    #[test]
    fn test_paraphrase_is_grounded() {
        let check = check_grounding(
            &grade(&["rebooked you on the 3pm flight and sent the itinerary by email"]),
            CONTENT,
            &GroundingConfig::default(),
        );
        assert!(check.grounded, "{:?}", check.errors);
    }

    #[test]
    fn test_japanese_quote_is_grounded() {
        let content = "お客様：予約を変更したいです。\n担当者：ご不安なお気持ち、お察しいたします。";
        let check = check_grounding(
            &grade(&["「ご不安なお気持ち、お察しいたします」"]),
            content,
            &GroundingConfig::default(),
        );
        assert!(check.grounded, "{:?}", check.errors);
    }

    #[test]
    fn test_fabricated_commentary_is_ungrounded() {
        let check = check_grounding(
            &grade(&["The agent demonstrated excellent product knowledge throughout"]),
            CONTENT,
            &GroundingConfig::default(),
        );
        assert!(!check.grounded);
        assert_eq!(check.matched, 0);
    }

    /// An order-delay call long enough to contain most common letter pairs
    const LONG_TRANSCRIPT: &str = "Agent: Good afternoon, this is Kenji from the online store support line. \
        How can I help you today? Customer: Hi, I ordered a pair of running shoes two weeks ago \
        and the tracking page still says the parcel is waiting at the regional depot. I needed \
        them for a race this weekend. Agent: Let me check that order for you. Could you read me \
        the order number from your confirmation email? Customer: Sure, it is 58213. Agent: Thank \
        you. I can see the parcel was held because the depot had a backlog after the storm last \
        Tuesday. I have asked the carrier to prioritize it, and it should be delivered by Friday \
        morning. I will also refund the express shipping fee to your card, which usually takes \
        three to five business days. Customer: Okay, that helps a lot. Will I get an email when \
        it ships? Agent: Yes, you will receive a new tracking link today. Is there anything else \
        I can do for you? Customer: No, that is all, thanks. Agent: Have a great race.";

    #[test]
    fn test_invented_praise_against_long_transcript_is_ungrounded() {
        assert!(LONG_TRANSCRIPT.split_whitespace().count() > 100);
        let check = check_grounding(
            &grade(&[
                "The agent demonstrated outstanding empathy and resolved the situation professionally",
            ]),
            LONG_TRANSCRIPT,
            &GroundingConfig::default(),
        );
        assert!(!check.grounded, "{:?}", check);
        assert_eq!(check.matched, 0);
    }

    #[test]
    fn test_paraphrase_against_long_transcript_is_grounded() {
        let check = check_grounding(
            &grade(&["asked the carrier to prioritize it and it should arrive by Friday morning"]),
            LONG_TRANSCRIPT,
            &GroundingConfig::default(),
        );
        assert!(check.grounded, "{:?}", check.errors);
    }

    #[test]
    fn test_scattered_words_do_not_count_as_paraphrase() {
        // Every word occurs in the transcript, but never in this order
        let check = check_grounding(
            &grade(&["the race was held at the depot by the carrier"]),
            LONG_TRANSCRIPT,
            &GroundingConfig::default(),
        );
        assert!(!check.grounded);
    }

    #[test]
    fn test_japanese_paraphrase_needs_a_shared_passage() {
        let content = "お客様：予約を変更したいです。\n担当者：ご不安なお気持ち、お察しいたします。明日の便に変更いたしました。";
        let close = check_grounding(
            &grade(&["お気持ちお察しいたします"]),
            content,
            &GroundingConfig::default(),
        );
        assert!(close.grounded, "{:?}", close.errors);

        let invented = check_grounding(
            &grade(&["丁寧で素晴らしい対応をしていた"]),
            content,
            &GroundingConfig::default(),
        );
        assert!(!invented.grounded);
    }

    #[test]
    fn test_missing_evidence_is_ungrounded() {
        let check = check_grounding(&grade(&[]), CONTENT, &GroundingConfig::default());
        assert!(!check.grounded);
        assert!(check.errors.iter().any(|e| e.contains("no evidence")));
    }

    #[test]
    fn test_tiny_evidence_ignored() {
        let check = check_grounding(&grade(&["I"]), CONTENT, &GroundingConfig::default());
        assert!(!check.grounded);
    }

    #[test]
    fn test_parse_grade_with_code_fence() {
        let raw = "```json\n{\"score\": 4, \"criteria\": {\"clarity\": 5}, \"rationale\": \"ok\", \"evidence\": [\"x\"]}\n```";
        let grade = parse_grade(raw).unwrap();
        assert_eq!(grade.score, 4);
        assert_eq!(grade.criteria.get("clarity"), Some(&5));
        assert!(grade.improvement.is_none());
    }

    #[test]
    fn test_parse_grade_rejects_out_of_range() {
        let err = parse_grade(r#"{"score": 7, "rationale": "ok", "evidence": []}"#).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_grade_rejects_prose() {
        let err = parse_grade("The agent did well.").unwrap_err();
        assert!(err.is_transient());
    }
}
