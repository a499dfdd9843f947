//! Final stage of a job: the synthesized report, or the forced-choice
//! decision for multi-candidate jobs.

use crate::types::{AgentProfile, OrchestratorConfig, DECISION_AGENT_ID, DECISION_AGENT_NAME};
use conclave_agent::AgentInvoker;
use conclave_core::{ConclaveError, ConclaveResult};
use conclave_store::{ParticipantRef, Phase, Step, Subject};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Section headings every synthesized report must contain.
pub const REPORT_SECTIONS: [&str; 5] = [
    "Consensus",
    "Disagreements",
    "Key Risks",
    "Action Plan",
    "Confidence",
];

/// Title prefix marking a report built locally after synthesis failed.
pub const FALLBACK_TITLE: &str = "# Fallback report";

const DECISION_LABEL: &str = "DECISION:";

/// Cut `text` to at most `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{} [...]", &text[..byte]),
        None => text.to_string(),
    }
}

/// The last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((byte, _)) => &text[byte..],
        None => text,
    }
}

/// Render the step log for the final call.
///
/// Each step is clipped to `step_chars`; when the whole exceeds `max_chars`
/// the oldest entries are dropped and replaced by an omission marker.
pub fn build_transcript(steps: &[Step], step_chars: usize, max_chars: usize) -> String {
    let entries: Vec<String> = steps
        .iter()
        .map(|s| {
            format!(
                "[{} round {}] {}: {}",
                s.phase,
                s.round,
                s.agent_name,
                clip(&s.content, step_chars)
            )
        })
        .collect();

    let mut kept = Vec::new();
    let mut used = 0usize;
    for entry in entries.iter().rev() {
        let len = entry.chars().count() + 2;
        if used + len > max_chars && !kept.is_empty() {
            break;
        }
        used += len;
        kept.push(entry.as_str());
    }
    kept.reverse();

    let omitted = entries.len() - kept.len();
    let body = kept.join("\n\n");
    if omitted > 0 {
        format!("[... {omitted} earlier entries omitted ...]\n\n{body}")
    } else {
        body
    }
}

/// Prompt asking for the structured final report.
pub fn synthesis_prompt(synthesizer: &AgentProfile, subject: &Subject, transcript: &str) -> String {
    let sections: Vec<String> = REPORT_SECTIONS.iter().map(|s| format!("## {s}")).collect();
    format!(
        "{}\n\n# Final report: {}\n\nBelow is the complete record of the panel's analysis and debate.\n\n{}\n\n\
         Write the final report in Markdown using exactly these sections, in this order:\n{}\n\n\
         Under Confidence give an overall confidence level (low, medium or high) and what would change it.",
        synthesizer.prompt,
        subject.name,
        transcript,
        sections.join("\n")
    )
}

/// Report used when the synthesis call fails. Deterministic for given inputs.
pub fn fallback_report(subject: &Subject, error: &ConclaveError, transcript: &str, excerpt_chars: usize) -> String {
    let excerpt = tail(transcript, excerpt_chars);
    format!(
        "{FALLBACK_TITLE}: {}\n\nSynthesis failed: {error}\n\n## Transcript excerpt\n\n{excerpt}",
        subject.name
    )
}

/// Prompt asking for a single named candidate.
pub fn decision_prompt(synthesizer: &AgentProfile, subject: &Subject, transcript: &str) -> String {
    format!(
        "{}\n\n# Decision: {}\n\nBelow is the complete record of the panel's analysis and debate.\n\n{}\n\n\
         You must choose exactly one of these candidates: {}.\n\
         Explain your choice briefly, then finish with a single line of the form\n\
         {DECISION_LABEL} <candidate>",
        synthesizer.prompt,
        subject.name,
        transcript,
        subject.ids.join(", ")
    )
}

/// Find the candidate named on a `DECISION:` line, if exactly one is.
///
/// The last such line wins.
pub fn parse_decision<'a>(reply: &str, candidates: &'a [String]) -> Option<&'a str> {
    reply.lines().rev().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', '>', '-', ' ']);
        let head = line.get(..DECISION_LABEL.len() - 1)?;
        if !head.eq_ignore_ascii_case("decision") {
            return None;
        }
        let rest = line[DECISION_LABEL.len() - 1..]
            .trim_start_matches(['*', ' '])
            .strip_prefix([':', '：'])?;
        let value = rest
            .trim()
            .trim_matches(['*', '`', '"', '\'', '.', ' '])
            .to_lowercase();
        if let Some(exact) = candidates.iter().find(|c| c.to_lowercase() == value) {
            return Some(exact.as_str());
        }
        let named: Vec<&String> = candidates
            .iter()
            .filter(|c| value.contains(&c.to_lowercase()))
            .collect();
        match named.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    })
}

/// Candidate mentioned first in `reply`.
pub fn earliest_mention<'a>(reply: &str, candidates: &'a [String]) -> Option<&'a str> {
    let haystack = reply.to_lowercase();
    candidates
        .iter()
        .filter_map(|c| haystack.find(&c.to_lowercase()).map(|pos| (pos, c)))
        .min_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| b.len().cmp(&a.len())))
        .map(|(_, c)| c.as_str())
}

/// Outcome of the forced-choice stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The chosen candidate.
    pub choice: String,
    /// Step content; always begins with `DECISION: <choice>`.
    pub content: String,
}

/// Turn the decision call's outcome into exactly one chosen candidate.
pub fn resolve_decision(candidates: &[String], reply: &ConclaveResult<String>) -> Decision {
    let first = candidates.first().map(String::as_str).unwrap_or_default();
    let (choice, note, body) = match reply {
        Ok(text) => match parse_decision(text, candidates) {
            Some(c) => (c, None, text.trim().to_string()),
            None => match earliest_mention(text, candidates) {
                Some(c) => (
                    c,
                    Some("no unambiguous decision line; chose the earliest-mentioned candidate"),
                    text.trim().to_string(),
                ),
                None => (
                    first,
                    Some("no candidate named in the reply; chose the first candidate"),
                    text.trim().to_string(),
                ),
            },
        },
        Err(e) => (
            first,
            Some("decision call failed; chose the first candidate"),
            e.to_string(),
        ),
    };

    let mut content = format!("{DECISION_LABEL} {choice}");
    if let Some(note) = note {
        content.push_str(&format!("\n\n({note})"));
    }
    if !body.is_empty() {
        content.push_str("\n\n");
        content.push_str(&body);
    }
    Decision {
        choice: choice.to_string(),
        content,
    }
}

/// Runs the single final call of a job.
pub struct SynthesisStage {
    invoker: Arc<dyn AgentInvoker>,
    synthesizer: AgentProfile,
    step_chars: usize,
    max_chars: usize,
    excerpt_chars: usize,
}

impl SynthesisStage {
    /// Stage calling `synthesizer`, with transcript limits from `config`.
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        synthesizer: AgentProfile,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            invoker,
            synthesizer,
            step_chars: config.transcript_step_chars,
            max_chars: config.transcript_max_chars,
            excerpt_chars: config.fallback_excerpt_chars,
        }
    }

    /// Profile making the final call.
    pub fn synthesizer(&self) -> &AgentProfile {
        &self.synthesizer
    }

    /// Produce the final report. Never fails; a failed call yields the
    /// fallback report.
    pub async fn synthesize(&self, job_id: Uuid, subject: &Subject, steps: &[Step]) -> String {
        let transcript = build_transcript(steps, self.step_chars, self.max_chars);
        let prompt = synthesis_prompt(&self.synthesizer, subject, &transcript);
        let outcome = match self.invoker.invoke(&self.synthesizer.binding(), &prompt).await {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => Err(ConclaveError::Synthesis("synthesizer returned an empty report".into())),
            Err(e) => Err(ConclaveError::Synthesis(e.to_string())),
        };
        match outcome {
            Ok(report) => {
                info!(job_id = %job_id, chars = report.len(), "Report synthesized");
                report
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Synthesis failed, using fallback report");
                fallback_report(subject, &e, &transcript, self.excerpt_chars)
            }
        }
    }

    /// Make the forced choice and build its step.
    pub async fn decide(&self, job_id: Uuid, subject: &Subject, steps: &[Step]) -> (Decision, Step) {
        let transcript = build_transcript(steps, self.step_chars, self.max_chars);
        let prompt = decision_prompt(&self.synthesizer, subject, &transcript);
        let reply = self.invoker.invoke(&self.synthesizer.binding(), &prompt).await;
        if let Err(e) = &reply {
            warn!(job_id = %job_id, error = %e, "Decision call failed");
        }
        let decision = resolve_decision(&subject.ids, &reply);
        info!(job_id = %job_id, choice = %decision.choice, "Decision made");
        let decider = ParticipantRef {
            agent_id: DECISION_AGENT_ID.to_string(),
            name: DECISION_AGENT_NAME.to_string(),
        };
        let step = Step::new(Phase::Decision, 1, &decider, decision.content.clone());
        (decision, step)
    }
}
