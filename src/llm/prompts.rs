use crate::llm::backend::GradingRequest;
use crate::models::{InteractionRecord, SourceKind, CRITERIA, MAX_SCORE, MIN_SCORE};

/// Instruction sent alongside audio for speech-to-text with hold detection
pub const TRANSCRIPTION_PROMPT: &str = r#"Transcribe this customer support phone call and measure hold time.

1. Transcribe the audio verbatim, one line per speaker turn, prefixed with "Agent:" or "Customer:" when the speaker is clear. Do not summarize, translate or add commentary.
2. Detect every stretch where the customer is put on hold (hold music or silence after the agent asks them to wait). Give start and end in seconds from the beginning of the call, and the phrase that announced the hold.
3. Give the total length of the recording in seconds.
4. Output MUST be a single JSON object with no surrounding text:

{
  "text": "<full transcript>",
  "total_duration_sec": <number>,
  "hold_total_sec": <number>,
  "hold_segments": [
    {"start": <number>, "end": <number>, "duration": <number>, "trigger": "<phrase>"}
  ]
}"#;

/// System prompt for grading (non-negotiable constraints)
pub const SYSTEM_PROMPT: &str = r#"You are a QA specialist grading one customer support interaction. You MUST follow these rules:

1. Grade only what is in the interaction text. Do not invent events, words or intent.
2. Every claim in your rationale MUST be backed by evidence from the interaction.
3. Each "evidence" item MUST be an exact quote copied from the interaction, or a close paraphrase of a specific passage.
4. Output MUST be a single JSON object matching the schema below, with no surrounding text.

SCORING:
- Scores are integers from 1 (poor) to 5 (excellent).
- "score" is the overall grade; "criteria" grades politeness, clarity, accuracy and empathy separately.

SCHEMA:
{
  "score": 4,
  "criteria": {"politeness": 4, "clarity": 5, "accuracy": 4, "empathy": 3},
  "rationale": "Why the interaction earned this grade, referring to the evidence.",
  "evidence": ["exact quote from the interaction", "another quote"],
  "improvement": "One concrete suggestion for the agent."
}"#;

/// Appended to the user prompt on the retry after an ungrounded response
pub const STRICT_EVIDENCE_ADDENDUM: &str = r#"## IMPORTANT
Your previous answer did not cite the interaction. This time:
- Copy at least one passage from the interaction above VERBATIM into "evidence".
- Do not paraphrase loosely and do not describe the interaction in your own words inside "evidence".
- If the interaction contains nothing gradable, still quote the passage your score is based on.
"#;

/// How strongly the prompt insists on verbatim evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrictness {
    Standard,
    Strict,
}

/// Build the grading request for a record
pub fn build_grading_request(record: &InteractionRecord, strictness: PromptStrictness) -> GradingRequest {
    let mut prompt = String::new();

    let channel = match record.source_kind {
        SourceKind::Email => "Email",
        SourceKind::Phone => "Phone call (machine transcript)",
    };

    prompt.push_str(&format!("# Interaction: {}\n", record.id));
    prompt.push_str(&format!("Channel: {}\n", channel));
    prompt.push_str(&format!("Agent: {}\n", record.agent()));
    if let Some(counterpart) = record.participants.get(1) {
        prompt.push_str(&format!("Counterpart: {}\n", counterpart));
    }
    match record.timestamp {
        Some(ts) => prompt.push_str(&format!("Date: {}\n", ts.format("%Y-%m-%d %H:%M"))),
        None => prompt.push_str("Date: unknown\n"),
    }
    if let Some(subject) = &record.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    prompt.push('\n');

    prompt.push_str("## Content\n");
    prompt.push_str("```\n");
    prompt.push_str(record.content.trim());
    prompt.push_str("\n```\n\n");

    prompt.push_str("## Instructions\n");
    prompt.push_str(&format!(
        "Grade the agent's handling of this interaction from {} to {} overall and on each of: {}.\n",
        MIN_SCORE,
        MAX_SCORE,
        CRITERIA.join(", ")
    ));
    prompt.push_str("Quote the passages your grade is based on in \"evidence\".\n");

    if strictness == PromptStrictness::Strict {
        prompt.push('\n');
        prompt.push_str(STRICT_EVIDENCE_ADDENDUM);
    }

    GradingRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: prompt,
    }
}
