//! Scripted collaborators shared by unit tests.

use crate::llm::LanguageModel;
use crate::BackendError;
use async_trait::async_trait;
use std::sync::Mutex;

/// Answers a prompt with the response of the first rule whose key the
/// prompt contains.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    rules: Vec<(String, String)>,
    pub(crate) prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new(rules: &[(&str, &str)]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(key, response)| (key.to_string(), response.to_string()))
                .collect(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().map(|prompts| prompts.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.rules
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .ok_or_else(|| BackendError::Request("no scripted response".to_string()))
    }
}
