#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn family(&self) -> Option<ModelFamily> {
        ModelFamily::of(&self.id)
    }
}

/// Vendor family inferred from a model id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Gpt,
    Claude,
}

impl ModelFamily {
    pub fn of(model_id: &str) -> Option<Self> {
        let model_id = model_id.trim();
        if model_id.starts_with("gpt") {
            Some(Self::Gpt)
        } else if model_id.starts_with("claude") {
            Some(Self::Claude)
        } else {
            None
        }
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4-turbo-preview";

pub fn default_models() -> Vec<Model> {
    vec![
        Model::from_id("gpt-4-turbo-preview").with_description("General purpose default"),
        Model::from_id("gpt-4").with_description("Stable GPT-4 deployment"),
        Model::from_id("gpt-3.5-turbo").with_description("Fast, low-cost replies"),
        Model::from_id("claude-3-opus-20240229").with_description("Long-form reasoning"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_follows_id_prefix() {
        assert_eq!(ModelFamily::of("gpt-4"), Some(ModelFamily::Gpt));
        assert_eq!(ModelFamily::of(" claude-3-opus"), Some(ModelFamily::Claude));
        assert_eq!(ModelFamily::of("llama-3"), None);
    }

    #[test]
    fn default_catalog_contains_default_model() {
        assert!(
            default_models()
                .iter()
                .any(|model| model.id == DEFAULT_MODEL && model.family().is_some())
        );
    }
}
