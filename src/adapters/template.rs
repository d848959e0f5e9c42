//! Rendering of locked resource templates against a selected object
//!
//! Templates use minijinja syntax with the selected object (serialized as it
//! is stored in the API) as the context:
//!
//! ```yaml
//! apiVersion: v1
//! kind: ResourceQuota
//! metadata:
//!   name: standard-quota
//!   namespace: "{{ metadata.name }}"
//! ```

use kube::api::DynamicObject;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde::Serialize;

use crate::crd::LockedResourceTemplate;
use crate::engine::LockedResource;
use crate::{Error, Result};

/// Renders object templates into locked resources
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Render one template for one selected object
    pub fn render<T: Serialize>(
        &self,
        template: &LockedResourceTemplate,
        context: &T,
    ) -> Result<LockedResource> {
        let rendered = self
            .env
            .render_str(&template.object_template, Value::from_serialize(context))
            .map_err(|e| Error::TemplateError(format!("failed to render template: {}", e)))?;

        let object: DynamicObject = serde_yaml::from_str(&rendered).map_err(|e| {
            Error::TemplateError(format!("rendered template is not a valid object: {}", e))
        })?;

        if object.types.as_ref().map_or(true, |t| t.kind.is_empty()) {
            return Err(Error::TemplateError(
                "rendered object must set apiVersion and kind".to_string(),
            ));
        }
        if object.metadata.name.as_deref().map_or(true, str::is_empty) {
            return Err(Error::TemplateError(
                "rendered object must set metadata.name".to_string(),
            ));
        }

        Ok(LockedResource {
            object,
            excluded_paths: template.excluded_paths.clone(),
        })
    }

    /// Render every template for every selected object
    pub fn render_all<T: Serialize>(
        &self,
        templates: &[LockedResourceTemplate],
        objects: &[T],
    ) -> Result<Vec<LockedResource>> {
        let mut resources = Vec::with_capacity(templates.len() * objects.len());
        for object in objects {
            for template in templates {
                resources.push(self.render(template, object)?);
            }
        }
        Ok(resources)
    }
}
