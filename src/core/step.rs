//! Step domain model

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Kind of work a step performs
///
/// Serialized as a lowercase string; anything not built in becomes `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepType {
    Extraction,
    Preprocessing,
    Training,
    Prediction,
    Save,
    Custom(String),
}

impl StepType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "extraction" => StepType::Extraction,
            "preprocessing" => StepType::Preprocessing,
            "training" => StepType::Training,
            "prediction" => StepType::Prediction,
            "save" => StepType::Save,
            _ => StepType::Custom(s.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepType::Extraction => "extraction",
            StepType::Preprocessing => "preprocessing",
            StepType::Training => "training",
            StepType::Prediction => "prediction",
            StepType::Save => "save",
            StepType::Custom(name) => name,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(StepType::parse(&raw))
    }
}

/// A single configured step of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Human-readable step name
    pub name: String,

    /// Which handler runs this step
    pub step_type: StepType,

    /// Zero-based position, unique within the pipeline
    pub order: u32,

    /// Step-type specific configuration, passed to the handler as-is
    #[serde(default)]
    pub config: Value,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, step_type: StepType, order: u32, config: Value) -> Self {
        Self {
            name: name.into(),
            step_type,
            order,
            config,
        }
    }

    /// Label used in run logs: `name (type)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.step_type)
    }
}
