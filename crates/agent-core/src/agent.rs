//! Typed agent roster
//!
//! Each stage is staffed by one or more agent roles. The roster is resolved
//! once at startup, validated, and never mutated afterwards; the stage
//! executor reads it to tell the collaborator which roles a stage calls for.

use crate::{Error, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Agent persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    MarketResearcher,
    FinancialDataExpert,
    TechnicalAnalyst,
    FundamentalAnalyst,
    RiskAssessor,
    IndustryExpert,
    MarketSentimentAnalyst,
    InvestmentAdvisor,
    ReportGenerator,
    QualityMonitor,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketResearcher => "market_researcher",
            Self::FinancialDataExpert => "financial_data_expert",
            Self::TechnicalAnalyst => "technical_analyst",
            Self::FundamentalAnalyst => "fundamental_analyst",
            Self::RiskAssessor => "risk_assessor",
            Self::IndustryExpert => "industry_expert",
            Self::MarketSentimentAnalyst => "market_sentiment_analyst",
            Self::InvestmentAdvisor => "investment_advisor",
            Self::ReportGenerator => "report_generator",
            Self::QualityMonitor => "quality_monitor",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    MarketData,
    FinancialStatements,
    TechnicalIndicators,
    Valuation,
    RiskModeling,
    IndustryResearch,
    NewsSentiment,
    Recommendation,
    ReportWriting,
    QualityReview,
}

/// One role bound to one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub role: AgentRole,
    pub capabilities: BTreeSet<Capability>,
    pub stage: Stage,
}

impl AgentProfile {
    pub fn new(
        role: AgentRole,
        stage: Stage,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            role,
            capabilities: capabilities.into_iter().collect(),
            stage,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Validated, immutable stage → roles binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoster {
    by_stage: BTreeMap<Stage, Vec<AgentProfile>>,
}

impl AgentRoster {
    /// Build a roster, checking that every stage is staffed and no role is
    /// bound twice
    pub fn from_profiles(profiles: impl IntoIterator<Item = AgentProfile>) -> Result<Self> {
        let mut by_stage: BTreeMap<Stage, Vec<AgentProfile>> = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for profile in profiles {
            if !seen.insert(profile.role) {
                return Err(Error::InitializationFailed(format!(
                    "role {} is bound more than once",
                    profile.role
                )));
            }
            if profile.capabilities.is_empty() {
                return Err(Error::InitializationFailed(format!(
                    "role {} has no capabilities",
                    profile.role
                )));
            }
            by_stage.entry(profile.stage).or_default().push(profile);
        }

        if let Some(missing) = Stage::ALL.iter().find(|s| !by_stage.contains_key(*s)) {
            return Err(Error::InitializationFailed(format!(
                "no agent bound to stage {missing}"
            )));
        }

        Ok(Self { by_stage })
    }

    /// The standard three-crew line-up: data collection, analysis, decision
    pub fn standard() -> Self {
        use AgentRole as R;
        use Capability as C;

        let by_stage = [
            AgentProfile::new(R::MarketResearcher, Stage::DataCollection, [C::MarketData]),
            AgentProfile::new(
                R::FinancialDataExpert,
                Stage::DataCollection,
                [C::MarketData, C::FinancialStatements],
            ),
            AgentProfile::new(
                R::TechnicalAnalyst,
                Stage::DataCollection,
                [C::MarketData, C::TechnicalIndicators],
            ),
            AgentProfile::new(
                R::FundamentalAnalyst,
                Stage::Fundamental,
                [C::FinancialStatements, C::Valuation],
            ),
            AgentProfile::new(R::RiskAssessor, Stage::Risk, [C::RiskModeling]),
            AgentProfile::new(R::IndustryExpert, Stage::Industry, [C::IndustryResearch]),
            AgentProfile::new(
                R::MarketSentimentAnalyst,
                Stage::Sentiment,
                [C::NewsSentiment],
            ),
            AgentProfile::new(R::InvestmentAdvisor, Stage::Decision, [C::Recommendation]),
            AgentProfile::new(R::ReportGenerator, Stage::Decision, [C::ReportWriting]),
            AgentProfile::new(R::QualityMonitor, Stage::Decision, [C::QualityReview]),
        ]
        .into_iter()
        .fold(BTreeMap::<Stage, Vec<AgentProfile>>::new(), |mut acc, p| {
            acc.entry(p.stage).or_default().push(p);
            acc
        });

        Self { by_stage }
    }

    /// Profiles bound to `stage`
    pub fn for_stage(&self, stage: Stage) -> &[AgentProfile] {
        self.by_stage.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Role names bound to `stage`, in declaration order
    pub fn role_names(&self, stage: Stage) -> Vec<&'static str> {
        self.for_stage(stage).iter().map(|p| p.role.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_stage.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRoster {
    fn default() -> Self {
        Self::standard()
    }
}
