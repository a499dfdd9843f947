use crate::types::{AgentProfile, SYNTHESIZER_ROLE};
use parking_lot::RwLock;

/// Lookup of agent profiles by id.
pub trait AgentDirectory: Send + Sync {
    /// Profile with the given id, if any.
    fn get(&self, id: &str) -> Option<AgentProfile>;

    /// All profiles ordered by `sort_order`, then id.
    fn list(&self) -> Vec<AgentProfile>;
}

/// Directory kept in process memory.
pub struct InMemoryAgentDirectory {
    agents: RwLock<Vec<AgentProfile>>,
}

impl InMemoryAgentDirectory {
    /// Directory holding exactly `agents`.
    pub fn new(agents: Vec<AgentProfile>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    /// Directory seeded with [`default_profiles`].
    pub fn with_defaults() -> Self {
        Self::new(default_profiles())
    }

    /// Insert a profile, replacing any with the same id.
    pub fn upsert(&self, profile: AgentProfile) {
        let mut agents = self.agents.write();
        match agents.iter_mut().find(|a| a.id == profile.id) {
            Some(existing) => *existing = profile,
            None => agents.push(profile),
        }
    }

    /// Toggle an agent. Returns false for unknown ids.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut agents = self.agents.write();
        match agents.iter_mut().find(|a| a.id == id) {
            Some(agent) => {
                agent.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryAgentDirectory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AgentDirectory for InMemoryAgentDirectory {
    fn get(&self, id: &str) -> Option<AgentProfile> {
        self.agents.read().iter().find(|a| a.id == id).cloned()
    }

    fn list(&self) -> Vec<AgentProfile> {
        let mut agents = self.agents.read().clone();
        agents.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.id.cmp(&b.id)));
        agents
    }
}

/// The built-in roster of analyst roles.
pub fn default_profiles() -> Vec<AgentProfile> {
    vec![
        analyst("technical", "Technical Analyst", TECHNICAL_PROMPT, 1),
        analyst("capital_flow", "Capital Flow Analyst", CAPITAL_FLOW_PROMPT, 2),
        analyst("fundamental", "Fundamental Analyst", FUNDAMENTAL_PROMPT, 3),
        analyst("industry", "Industry Analyst", INDUSTRY_PROMPT, 4),
        analyst("sentiment", "Sentiment Analyst", SENTIMENT_PROMPT, 5),
        analyst("bullish", "Bull Advocate", BULLISH_PROMPT, 6),
        analyst("bearish", "Bear Advocate", BEARISH_PROMPT, 7),
    ]
}

fn analyst(id: &str, name: &str, prompt: &str, sort_order: i32) -> AgentProfile {
    let mut profile = AgentProfile::new(id, name, prompt);
    profile.sort_order = sort_order;
    profile
}

/// Profile used for the final synthesis or decision call.
pub fn synthesizer_profile() -> AgentProfile {
    AgentProfile::new("synthesizer", "Chief Analyst", SYNTHESIZER_PROMPT).with_kind(SYNTHESIZER_ROLE)
}

const TECHNICAL_PROMPT: &str = r#"You are a technical analysis expert. From the subject data, analyse:
1. Candlestick patterns and what they imply
2. Indicators such as MA, EMA, MACD, RSI, KDJ, BOLL and OBV
3. Trend direction and strength
4. Key support and resistance levels
5. A concrete trading recommendation

Ignore any indicator that is clearly missing or inconsistent instead of forcing a reading.

Debate guidance: argue strictly from the technical perspective and answer opposing points with evidence rather than simply agreeing."#;

const CAPITAL_FLOW_PROMPT: &str = r#"You are a capital flow expert. From the subject data, analyse:
1. Direction and size of main capital movements
2. Flows by order size (super large, large, medium, small)
3. Patterns and trends in the flow
4. Overall strength of the flow
5. A concrete trading recommendation

Debate guidance: argue strictly from the capital flow perspective and answer opposing points with evidence rather than simply agreeing."#;

const FUNDAMENTAL_PROMPT: &str = r#"You are a fundamental analysis expert. From the subject data, analyse:
1. Valuation (PE, PB, PS, PCF)
2. Financial indicators (ROE, EPS, BPS)
3. Overall financial health
4. Investment value
5. A concrete trading recommendation

Debate guidance: argue strictly from the fundamental perspective and answer opposing points with evidence rather than simply agreeing."#;

const INDUSTRY_PROMPT: &str = r#"You are an industry analysis expert. From the subject data, analyse:
1. The subject's ranking within its industry
2. Performance against industry averages
3. Comparison with the strongest peers
4. Competitive position
5. A concrete trading recommendation

Debate guidance: argue strictly from the industry perspective and answer opposing points with evidence rather than simply agreeing."#;

const SENTIMENT_PROMPT: &str = r#"You are a market sentiment expert. From the subject data, analyse:
1. Relevant news and its likely price impact
2. Sentiment on forums and social platforms
3. Level of market attention
4. Strength of the prevailing sentiment
5. A concrete trading recommendation

Debate guidance: argue strictly from the sentiment perspective and answer opposing points with evidence rather than simply agreeing."#;

const BULLISH_PROMPT: &str = r#"You are a bullish analyst. Build the strongest case that the subject will rise:
1. Bullish technical signals such as breakouts and momentum
2. Supportive inflows and accumulation
3. Fundamental strengths and signs of undervaluation
4. Sector and market tailwinds
5. A clear optimistic trading outlook

Debate guidance: keep a bullish stance but stay objective, and answer opposing points with evidence."#;

const BEARISH_PROMPT: &str = r#"You are a bearish analyst. Build the strongest case that the subject will fall or underperform:
1. Bearish technical signals such as breakdowns and fading momentum
2. Outflows and distribution
3. Weaknesses, overvaluation and financial risks
4. Sector and market headwinds
5. A clear cautious trading outlook

Debate guidance: keep a bearish stance but stay objective, and answer opposing points with evidence."#;

const SYNTHESIZER_PROMPT: &str = r#"You are the chief analyst chairing a panel of specialist agents. You read the full record of their analysis and debate and produce the final verdict. Weigh arguments by the evidence behind them, not by how often they are repeated."#;
