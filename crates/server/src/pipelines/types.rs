use cadence_core::model::{
    DestinationConfig, PipelineRun, QualityRule, SourceConfig, TransformStep,
};
use cadence_pipeline::RunSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Quality rule as submitted. Types and severities are checked by
/// validation before conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRuleRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub column: String,
    pub rule_type: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub severity: Option<String>,
}

impl QualityRuleRequest {
    /// `None` when the type or severity does not parse.
    pub fn to_rule(&self, index: usize) -> Option<QualityRule> {
        Some(QualityRule {
            id: self
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("rule_{}", index + 1)),
            column: self.column.trim().to_string(),
            rule_type: self.rule_type.parse().ok()?,
            value: self.value.clone(),
            severity: match self.severity.as_deref() {
                Some(s) => s.parse().ok()?,
                None => Default::default(),
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipelineRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_type: String,
    #[serde(default)]
    pub source_config: SourceConfig,
    #[serde(default)]
    pub connection_ref: Option<Uuid>,
    #[serde(default)]
    pub source_query: Option<String>,
    pub destination_type: String,
    #[serde(default)]
    pub destination_config: DestinationConfig,
    #[serde(default)]
    pub transformation_steps: Vec<TransformStep>,
    #[serde(default)]
    pub quality_rules: Vec<QualityRuleRequest>,
    #[serde(default)]
    pub row_limit: Option<i64>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePipelineRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source_type: Option<String>,
    pub source_config: Option<SourceConfig>,
    pub connection_ref: Option<Uuid>,
    pub source_query: Option<String>,
    pub destination_type: Option<String>,
    pub destination_config: Option<DestinationConfig>,
    pub transformation_steps: Option<Vec<TransformStep>>,
    pub quality_rules: Option<Vec<QualityRuleRequest>>,
    pub row_limit: Option<i64>,
    /// An empty string clears the schedule.
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

/// Where a run's status came from: the live registry while it runs, the
/// run row afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum RunView {
    Live(RunSnapshot),
    Stored(PipelineRun),
}
