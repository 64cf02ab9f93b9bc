//! Fixed model catalog

use async_trait::async_trait;
use tracing::info;

use parley_common::SessionId;

use super::{CollaboratorError, ModelSwitcher};

/// Accepts switches to any configured model name, nothing else
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    default: String,
    available: Vec<String>,
}

impl ModelCatalog {
    pub fn new(default: String, available: Vec<String>) -> Self {
        Self { default, available }
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }
}

#[async_trait]
impl ModelSwitcher for ModelCatalog {
    fn default_model(&self) -> String {
        self.default.clone()
    }

    async fn switch_model(&self, session: SessionId, model: &str) -> Result<(), CollaboratorError> {
        if !self.available.iter().any(|m| m == model) {
            return Err(CollaboratorError::UnknownModel(model.to_string()));
        }
        info!(%session, model, "Model switched");
        Ok(())
    }
}
