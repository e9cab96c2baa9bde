//! Classification of planner telemetry activities.
//!
//! The agent reports its planning internals as `event` activities whose
//! `valueType` names the step. Four step kinds are understood; anything else
//! is surfaced as [`PlannerStep::Unknown`] so the caller can log and skip it.

use crate::agent::Activity;
use crate::error::{BenchError, Result};
use serde_json::{Map, Value};

pub const PLAN_RECEIVED: &str = "DynamicPlanReceived";
pub const STEP_TRIGGERED: &str = "DynamicPlanStepTriggered";
pub const STEP_BIND_UPDATE: &str = "DynamicPlanStepBindUpdate";
pub const STEP_FINISHED: &str = "DynamicPlanStepFinished";

const MISSING: &str = "N/A";

/// Tool definition advertised with a new plan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolDefinition {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub schema_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerStep {
    PlanReceived {
        tool_definitions: Vec<ToolDefinition>,
    },
    StepTriggered {
        thought: String,
        task_dialog_id: String,
        step_type: String,
    },
    StepBindUpdate {
        task_dialog_id: String,
        arguments: String,
    },
    StepFinished {
        task_dialog_id: String,
    },
    Unknown(String),
}

/// Flattened columns of a planner step, ready to become a table row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlannerFields {
    pub step_kind: String,
    pub thought: String,
    pub tool: String,
    pub tool_type: String,
    pub arguments: String,
}

impl PlannerStep {
    /// Classify a telemetry activity. Returns an error when a known kind
    /// lacks one of its required fields.
    pub fn from_activity(activity: &Activity) -> Result<Self> {
        let value_type = activity.value_type.as_deref().unwrap_or_default();
        let empty = Map::new();
        let value = activity
            .value
            .as_ref()
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        Self::classify(value_type, value)
    }

    pub fn classify(value_type: &str, value: &Map<String, Value>) -> Result<Self> {
        let required = |field: &str| -> Result<String> {
            value
                .get(field)
                .map(value_to_text)
                .ok_or_else(|| BenchError::MalformedTelemetry {
                    value_type: value_type.to_string(),
                    field: field.to_string(),
                })
        };
        let optional = |field: &str| value.get(field).map(value_to_text).unwrap_or_default();

        let step = match value_type {
            PLAN_RECEIVED => {
                let defs = value
                    .get("toolDefinitions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| BenchError::MalformedTelemetry {
                        value_type: value_type.to_string(),
                        field: "toolDefinitions".into(),
                    })?;
                Self::PlanReceived {
                    tool_definitions: defs.iter().map(ToolDefinition::from_value).collect(),
                }
            }
            STEP_TRIGGERED => Self::StepTriggered {
                thought: optional("thought"),
                task_dialog_id: required("taskDialogId")?,
                step_type: optional("type"),
            },
            STEP_BIND_UPDATE => Self::StepBindUpdate {
                task_dialog_id: required("taskDialogId")?,
                arguments: required("arguments")?,
            },
            STEP_FINISHED => Self::StepFinished {
                task_dialog_id: required("taskDialogId")?,
            },
            other => Self::Unknown(other.to_string()),
        };
        Ok(step)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::PlanReceived { .. } => PLAN_RECEIVED,
            Self::StepTriggered { .. } => STEP_TRIGGERED,
            Self::StepBindUpdate { .. } => STEP_BIND_UPDATE,
            Self::StepFinished { .. } => STEP_FINISHED,
            Self::Unknown(kind) => kind,
        }
    }

    /// Column mapping for the planner table. `None` for unknown kinds.
    pub fn fields(&self) -> Option<PlannerFields> {
        let mut fields = PlannerFields {
            step_kind: self.kind().to_string(),
            ..PlannerFields::default()
        };
        match self {
            Self::PlanReceived { tool_definitions } => {
                fields.thought = join_definitions(tool_definitions, |d| {
                    format!(
                        "displayName: {}, description: {}",
                        d.display_name.as_deref().unwrap_or(MISSING),
                        d.description.as_deref().unwrap_or(MISSING)
                    )
                });
                fields.tool_type = join_definitions(tool_definitions, |d| {
                    format!("schemaName: {}", d.schema_name.as_deref().unwrap_or(MISSING))
                });
            }
            Self::StepTriggered {
                thought,
                task_dialog_id,
                step_type,
            } => {
                fields.thought = thought.clone();
                fields.tool = task_dialog_id.clone();
                fields.tool_type = step_type.clone();
            }
            Self::StepBindUpdate {
                task_dialog_id,
                arguments,
            } => {
                fields.tool = task_dialog_id.clone();
                fields.arguments = arguments.clone();
            }
            Self::StepFinished { task_dialog_id } => {
                fields.tool = task_dialog_id.clone();
            }
            Self::Unknown(_) => return None,
        }
        Some(fields)
    }
}

impl ToolDefinition {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).map(value_to_text);
        Self {
            display_name: text("displayName"),
            description: text("description"),
            schema_name: text("schemaName"),
        }
    }
}

fn join_definitions<F>(defs: &[ToolDefinition], render: F) -> String
where
    F: Fn(&ToolDefinition) -> String,
{
    defs.iter().map(render).collect::<Vec<_>>().join(" \n ")
}

/// Strings verbatim, everything else as compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
