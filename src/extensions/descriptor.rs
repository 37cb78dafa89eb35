use serde::{Deserialize, Serialize};

use super::ExtensionError;

/// What the host sends to have an extension activated.
///
/// Accepts both the host's snake_case field names (`public_url`,
/// `main_script_url`) and the camelCase ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "assetBaseUrl", alias = "public_url")]
    pub asset_base_url: Option<String>,
    #[serde(default, rename = "mainModuleUrl", alias = "main_script_url")]
    pub main_module_url: Option<String>,
}

impl ActivationDescriptor {
    pub fn new(id: impl Into<String>, main_module_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            asset_base_url: None,
            main_module_url: Some(main_module_url.into()),
        }
    }

    pub fn with_asset_base_url(mut self, url: impl Into<String>) -> Self {
        self.asset_base_url = Some(url.into());
        self
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The module URL, or a configuration error when it is absent or empty.
    pub fn module_url(&self) -> Result<&str, ExtensionError> {
        match self.main_module_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(ExtensionError::Configuration {
                id: self.id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_host_field_names() {
        let descriptor = ActivationDescriptor::from_json(json!({
            "id": "todo",
            "public_url": "lenz://todo",
            "main_script_url": "lenz://todo/main.js",
        }))
        .unwrap();
        assert_eq!(descriptor.asset_base_url.as_deref(), Some("lenz://todo"));
        assert_eq!(descriptor.module_url().unwrap(), "lenz://todo/main.js");
    }

    #[test]
    fn accepts_camel_case_names() {
        let descriptor = ActivationDescriptor::from_json(json!({
            "id": "todo",
            "assetBaseUrl": "lenz://todo",
            "mainModuleUrl": "lenz://todo/main.js",
        }))
        .unwrap();
        assert_eq!(descriptor.module_url().unwrap(), "lenz://todo/main.js");
    }

    #[test]
    fn missing_or_blank_module_url_is_configuration_error() {
        for value in [json!({"id": "a"}), json!({"id": "a", "mainModuleUrl": "  "})] {
            let descriptor = ActivationDescriptor::from_json(value).unwrap();
            assert!(matches!(
                descriptor.module_url(),
                Err(ExtensionError::Configuration { .. })
            ));
        }
    }
}
