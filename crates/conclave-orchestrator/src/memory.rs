//! Prompt assembly from the job's step log.

use crate::types::AgentProfile;
use conclave_store::{Phase, Step, Subject};

const NO_MEMORY: &str = "none";

/// Builds per-participant prompts for analysis and debate rounds.
///
/// Memory is never stored separately; it is derived from the steps recorded
/// so far, so a reloaded job yields the same prompts. Failed invocations are
/// left out of every view.
#[derive(Debug, Clone)]
pub struct MemoryAssembler {
    memory_depth: usize,
    history_window_factor: usize,
}

impl MemoryAssembler {
    /// `memory_depth` own analyses are recalled; the debate window spans
    /// `participants × history_window_factor` steps.
    pub fn new(memory_depth: usize, history_window_factor: usize) -> Self {
        Self {
            memory_depth,
            history_window_factor,
        }
    }

    /// The agent's analysis outputs so far, oldest first.
    pub fn agent_memory<'a>(steps: &'a [Step], agent_id: &str) -> Vec<&'a str> {
        steps
            .iter()
            .filter(|s| s.phase == Phase::Analysis && s.agent_id == agent_id && !s.is_error())
            .map(|s| s.content.as_str())
            .collect()
    }

    /// Prompt for `agent` in analysis round `round`.
    pub fn analysis_prompt(
        &self,
        agent: &AgentProfile,
        subject: &Subject,
        context: &str,
        steps: &[Step],
        round: u32,
    ) -> String {
        let memory = Self::agent_memory(steps, &agent.id);
        let recalled = &memory[memory.len().saturating_sub(self.memory_depth)..];
        let recalled = if recalled.is_empty() {
            NO_MEMORY.to_string()
        } else {
            recalled
                .iter()
                .enumerate()
                .map(|(i, text)| format!("[{}] {}", i + 1, text))
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let mut prompt = String::new();
        prompt.push_str(&agent.prompt);
        prompt.push_str(&format!(
            "\n\n# Analysis round {round}: {}\n",
            subject.name
        ));
        if subject.is_multi_candidate() {
            prompt.push_str(&format!(
                "Compare the candidates {} and say which one your perspective favours.\n",
                subject.ids.join(", ")
            ));
        }
        prompt.push_str("\n## Subject data\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n## Your previous analysis\n\n");
        prompt.push_str(&recalled);
        prompt.push_str(
            "\n\nBuild on your previous analysis instead of repeating it. \
             Add new evidence, refine or correct earlier conclusions.",
        );
        prompt
    }

    /// Prompt for `agent` in debate round `round`.
    pub fn debate_prompt(
        &self,
        agent: &AgentProfile,
        subject: &Subject,
        participants: &[AgentProfile],
        steps: &[Step],
        round: u32,
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(&agent.prompt);
        prompt.push_str(&format!(
            "\n\n# Debate round {round}: {}\n\nYou are in a debate with the other analysts on this panel.\n",
            subject.name
        ));

        let peer_views: Vec<String> = participants
            .iter()
            .filter(|p| p.id != agent.id)
            .filter_map(|p| {
                latest_output(steps, &p.id).map(|s| format!("### {}\n\n{}", p.name, s.content))
            })
            .collect();
        if !peer_views.is_empty() {
            prompt.push_str("\n## Latest view of each peer\n\n");
            prompt.push_str(&peer_views.join("\n\n"));
            prompt.push('\n');
        }

        let window = participants.len() * self.history_window_factor;
        let debate: Vec<&Step> = steps
            .iter()
            .filter(|s| s.phase == Phase::Debate && !s.is_error())
            .collect();
        let recent = &debate[debate.len().saturating_sub(window)..];
        if !recent.is_empty() {
            prompt.push_str("\n## Recent debate\n\n");
            let lines: Vec<String> = recent
                .iter()
                .map(|s| format!("[round {}] {}: {}", s.round, s.agent_name, s.content))
                .collect();
            prompt.push_str(&lines.join("\n\n"));
            prompt.push('\n');
        }

        prompt.push_str(
            "\nRebut the points you disagree with and support the ones you accept, \
             citing evidence for each. Do not simply agree.",
        );
        prompt
    }
}

fn latest_output<'a>(steps: &'a [Step], agent_id: &str) -> Option<&'a Step> {
    steps
        .iter()
        .rev()
        .find(|s| s.agent_id == agent_id && !s.is_error())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conclave_store::ParticipantRef;

    fn agent(id: &str) -> AgentProfile {
        AgentProfile::new(id, format!("Agent {id}"), format!("ROLE-{id}"))
    }

    fn step(phase: Phase, round: u32, id: &str, content: &str) -> Step {
        let p = ParticipantRef {
            agent_id: id.into(),
            name: format!("Agent {id}"),
        };
        Step::new(phase, round, &p, content)
    }

    #[test]
    fn test_first_analysis_uses_sentinel() {
        let m = MemoryAssembler::new(2, 2);
        let prompt = m.analysis_prompt(&agent("a"), &Subject::single("X"), "DATA", &[], 1);
        assert!(prompt.starts_with("ROLE-a"));
        assert!(prompt.contains("DATA"));
        assert!(prompt.contains("## Your previous analysis\n\nnone"));
    }

    #[test]
    fn test_analysis_recalls_last_two_own_outputs() {
        let steps = vec![
            step(Phase::Analysis, 1, "a", "first"),
            step(Phase::Analysis, 1, "b", "other"),
            step(Phase::Analysis, 2, "a", "second"),
            step(Phase::Analysis, 3, "a", "third"),
        ];
        let m = MemoryAssembler::new(2, 2);
        let prompt = m.analysis_prompt(&agent("a"), &Subject::single("X"), "D", &steps, 4);
        assert!(!prompt.contains("first"));
        assert!(prompt.contains("second"));
        assert!(prompt.contains("third"));
        assert!(!prompt.contains("other"));
    }

    #[test]
    fn test_error_steps_are_not_memory() {
        let steps = vec![step(
            Phase::Analysis,
            1,
            "a",
            "[ERROR] Agent a analysis failed: timeout",
        )];
        assert!(MemoryAssembler::agent_memory(&steps, "a").is_empty());
    }

    #[test]
    fn test_debate_shows_peers_not_self() {
        let participants = vec![agent("a"), agent("b"), agent("c")];
        let steps = vec![
            step(Phase::Analysis, 1, "a", "A-view"),
            step(Phase::Analysis, 1, "b", "B-old"),
            step(Phase::Analysis, 2, "b", "B-new"),
        ];
        let m = MemoryAssembler::new(2, 2);
        let prompt = m.debate_prompt(&participants[0], &Subject::single("X"), &participants, &steps, 1);
        assert!(prompt.contains("B-new"));
        assert!(!prompt.contains("B-old"));
        assert!(!prompt.contains("A-view"));
        // c has no output yet, so no section for it.
        assert!(!prompt.contains("### Agent c"));
        assert!(prompt.contains("Rebut"));
    }

    #[test]
    fn test_debate_window_is_bounded() {
        let participants = vec![agent("a"), agent("b")];
        let mut steps = Vec::new();
        for round in 1..=3 {
            steps.push(step(Phase::Debate, round, "a", &format!("a-d{round}")));
            steps.push(step(Phase::Debate, round, "b", &format!("b-d{round}")));
        }
        let m = MemoryAssembler::new(2, 1);
        let prompt = m.debate_prompt(&participants[0], &Subject::single("X"), &participants, &steps, 4);
        let history = prompt.split("## Recent debate").nth(1).unwrap();
        assert!(history.contains("a-d3"));
        assert!(history.contains("b-d3"));
        assert!(!history.contains("a-d2"));
    }
}
