//! Typed view of generation job payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a caller asks the generation queue to build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub service_name: String,
    /// Template id resolved against the template store.
    pub template: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub resources: ResourceHints,
    /// Caller-supplied substitution values, matched case-insensitively
    /// against `{{KEY}}` tokens in template files.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub requester: Option<String>,
    #[serde(default)]
    pub skip_image_build: bool,
}

fn default_environment() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHints {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl Default for ResourceHints {
    fn default() -> Self {
        Self {
            cpu: Some("500m".to_string()),
            memory: Some("512Mi".to_string()),
        }
    }
}

impl GenerationRequest {
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, String> {
        let request: Self =
            serde_json::from_value(payload.clone()).map_err(|e| format!("invalid payload: {e}"))?;
        if request.service_name.trim().is_empty() {
            return Err("serviceName must not be empty".to_string());
        }
        if request.template.trim().is_empty() {
            return Err("template must not be empty".to_string());
        }
        Ok(request)
    }

    /// Substitution map with canonical upper-case keys: the built-ins plus
    /// caller variables (caller values win on collision).
    pub fn substitutions(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("SERVICE_NAME".to_string(), self.service_name.clone());
        map.insert("ENVIRONMENT".to_string(), self.environment.clone());
        if let Some(cpu) = &self.resources.cpu {
            map.insert("CPU".to_string(), cpu.clone());
        }
        if let Some(memory) = &self.resources.memory {
            map.insert("MEMORY".to_string(), memory.clone());
        }
        for (key, value) in &self.variables {
            map.insert(key.to_uppercase(), value.clone());
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_payload_gets_defaults() {
        let request = GenerationRequest::from_payload(&json!({
            "serviceName": "billing-api",
            "template": "rest-api",
        }))
        .unwrap();

        assert_eq!(request.environment, "dev");
        assert!(!request.skip_image_build);
        assert_eq!(request.resources.cpu.as_deref(), Some("500m"));
    }

    #[test]
    fn test_missing_template_rejected() {
        assert!(GenerationRequest::from_payload(&json!({"serviceName": "x"})).is_err());
        assert!(
            GenerationRequest::from_payload(&json!({"serviceName": "x", "template": "  "}))
                .is_err()
        );
    }

    #[test]
    fn test_caller_variables_override_builtins() {
        let request = GenerationRequest::from_payload(&json!({
            "serviceName": "billing-api",
            "template": "rest-api",
            "variables": {"environment": "prod", "team": "payments"},
        }))
        .unwrap();

        let subs = request.substitutions();
        assert_eq!(subs["ENVIRONMENT"], "prod");
        assert_eq!(subs["TEAM"], "payments");
        assert_eq!(subs["SERVICE_NAME"], "billing-api");
    }
}
