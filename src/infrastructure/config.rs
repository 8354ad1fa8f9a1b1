use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningSettings {
    pub enabled: bool,
    pub min_samples: u32,
    pub min_agreement: f64,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_samples: 3,
            min_agreement: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PredictionSettings {
    pub use_learned: bool,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self { use_learned: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub app_name: String,
    pub learning: LearningSettings,
    pub prediction: PredictionSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            app_name: "AvailSync".to_string(),
            learning: LearningSettings::default(),
            prediction: PredictionSettings::default(),
        }
    }
}

impl AppSettings {
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.learning.min_samples == 0 {
            return Err(InfraError::InvalidConfig(
                "learning.minSamples must be > 0".to_string(),
            ));
        }
        if !(0.5..=1.0).contains(&self.learning.min_agreement) {
            return Err(InfraError::InvalidConfig(
                "learning.minAgreement must be between 0.5 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        APP_JSON,
        serde_json::json!({
            "schema": SUPPORTED_SCHEMA,
            "appName": "AvailSync",
            "learning": {
                "enabled": true,
                "minSamples": 3,
                "minAgreement": 0.8
            },
            "prediction": {
                "useLearned": true
            }
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    let mut raw = read_config(&config_dir.join(APP_JSON))?;
    if let Some(object) = raw.as_object_mut() {
        object.remove("schema");
    }
    let settings: AppSettings = serde_json::from_value(raw)?;
    settings.validate()?;
    Ok(settings)
}
