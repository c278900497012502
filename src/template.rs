//! Shared template environment.
//!
//! All macros render through one lazily-created `minijinja` engine. The
//! environment lives in the object registry under a well-known key, so the
//! first macro to load creates it and every later macro reuses the identical
//! instance.
//!
//! The delimiters are non-default: `{ ... }` for expressions, `{% ... %}`
//! for statements and `{# ... #}` for comments, so that parameter
//! references read naturally inside command text (`G1 X{X}`).

use crate::error::{HostError, HostResult};
use crate::registry::{HostObject, ObjectRegistry};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Value};
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// Registry key under which the shared environment is stored.
const TEMPLATE_ENV_KEY: &str = "template_environment";

/// Process-wide template engine shared by all macros.
pub struct TemplateEnvironment {
    env: Mutex<Environment<'static>>,
}

impl HostObject for TemplateEnvironment {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl TemplateEnvironment {
    fn new() -> HostResult<Self> {
        let syntax = SyntaxConfig::builder()
            .block_delimiters("{%", "%}")
            .variable_delimiters("{", "}")
            .comment_delimiters("{#", "#}")
            .build()
            .map_err(|err| {
                HostError::Config(format!("Invalid template delimiter configuration: {err}"))
            })?;
        let mut env = Environment::new();
        env.set_syntax(syntax);
        Ok(TemplateEnvironment {
            env: Mutex::new(env),
        })
    }

    /// Fetch the shared environment from `registry`, creating and storing it
    /// on first use. Repeated calls return the identical instance.
    pub fn get_or_create(registry: &Arc<ObjectRegistry>) -> HostResult<Arc<TemplateEnvironment>> {
        if let Some(object) = registry.lookup_object(TEMPLATE_ENV_KEY) {
            return object.as_any().downcast::<TemplateEnvironment>().map_err(|_| {
                HostError::Config(format!(
                    "Host object '{TEMPLATE_ENV_KEY}' has an unexpected type"
                ))
            });
        }
        let env = Arc::new(TemplateEnvironment::new()?);
        registry.add_object(TEMPLATE_ENV_KEY, Arc::clone(&env) as Arc<dyn HostObject>)?;
        Ok(env)
    }

    /// Compile `source` into the engine under `name`.
    ///
    /// Parsing is eager; syntax errors surface here, at load time.
    pub fn compile(
        self: &Arc<Self>,
        name: &str,
        source: &str,
    ) -> Result<MacroTemplate, minijinja::Error> {
        self.env
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_template_owned(name.to_string(), source.to_string())?;
        Ok(MacroTemplate {
            env: Arc::clone(self),
            name: name.to_string(),
        })
    }
}

/// Owned handle to one compiled template in the shared environment.
pub struct MacroTemplate {
    env: Arc<TemplateEnvironment>,
    name: String,
}

impl MacroTemplate {
    /// Render with `context`, producing command text.
    pub fn render(&self, context: Value) -> Result<String, minijinja::Error> {
        let env = self.env.env.lock().unwrap_or_else(PoisonError::into_inner);
        let template = env.get_template(&self.name)?;
        template.render(context)
    }
}
