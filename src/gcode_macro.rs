//! Operator-defined G-code macros.
//!
//! A `[gcode_macro.<name>]` config section defines a command that expands,
//! through the shared template environment, into further G-code. The
//! template sees the merged call parameters (defaults overlaid by call-time
//! values, call-time winning) both as top-level variables and under
//! `params`, plus a `status` object giving a consistent point-in-time view
//! of every subsystem it touches. The rendered text is resubmitted through
//! [`GCodeDispatch`], so a macro may invoke other macros but never re-enter
//! itself: each definition carries a re-entrancy flag that is engaged only
//! around dispatch and released on every exit path.

use crate::config::{ConfigSection, Settings};
use crate::error::{HostError, HostResult};
use crate::gcode::GCodeDispatch;
use crate::registry::ObjectRegistry;
use crate::template::{MacroTemplate, TemplateEnvironment};
use minijinja::value::Object;
use minijinja::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Config option prefix for call-time parameter fallbacks.
const DEFAULT_PARAMETER_PREFIX: &str = "default_parameter_";

/// Description installed for every macro alias.
const MACRO_DESC: &str = "G-Code macro";

/// Fallback snapshot for subsystems that are missing or status-incapable.
fn disabled_status() -> Value {
    Value::from_iter([("is_enabled", Value::from(false))])
}

/// Point-in-time view of subsystem status for one macro invocation.
///
/// Templates index this as `status.<name>` or `status['<name>']`. The first
/// successful query pins the evaluation time; every snapshot taken during
/// the invocation observes that same instant, and repeated queries for one
/// subsystem return the memoized copy. An accessor is created fresh per
/// invocation and never shared.
pub struct StatusAccessor {
    registry: Arc<ObjectRegistry>,
    eventtime: Mutex<Option<f64>>,
    cache: Mutex<HashMap<String, Value>>,
}

impl StatusAccessor {
    /// Bind a fresh accessor to the registry.
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        StatusAccessor {
            registry,
            eventtime: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn fetch(&self, name: &str) -> Value {
        let name = name.trim();
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return cached.clone();
        }
        let Some(object) = self.registry.lookup_object(name) else {
            return disabled_status();
        };
        let Some(source) = object.status_source() else {
            return disabled_status();
        };
        let eventtime = {
            let mut slot = self.eventtime.lock().unwrap_or_else(PoisonError::into_inner);
            *slot.get_or_insert_with(|| self.registry.reactor().monotonic())
        };
        let mut status = source.status(eventtime);
        status.insert("is_enabled".to_string(), serde_json::Value::Bool(true));
        let value = Value::from_serialize(&status);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.clone());
        value
    }
}

impl fmt::Debug for StatusAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusAccessor").finish_non_exhaustive()
    }
}

impl Object for StatusAccessor {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        Some(self.fetch(&key.to_string()))
    }
}

/// Scoped hold on a macro's re-entrancy flag.
///
/// Acquisition is an atomic test-and-set; release happens in `Drop`, so the
/// flag clears on every exit path out of dispatch, including executor
/// errors.
struct ScriptGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ScriptGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<ScriptGuard<'a>> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
            .then_some(ScriptGuard { flag })
    }
}

impl Drop for ScriptGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One operator-defined macro bound to a registered command name.
pub struct GCodeMacro {
    alias: String,
    template: MacroTemplate,
    default_params: HashMap<String, String>,
    in_script: AtomicBool,
    registry: Arc<ObjectRegistry>,
    gcode: Arc<GCodeDispatch>,
}

impl fmt::Debug for GCodeMacro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GCodeMacro")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

impl GCodeMacro {
    /// Build a macro from its config section and register its alias.
    ///
    /// The section name carries the alias after the section-type prefix
    /// (`"gcode_macro park_head"` becomes `PARK_HEAD`). The required
    /// `gcode` option holds the template body; `default_parameter_*`
    /// options supply call-time fallbacks, with the prefix stripped and the
    /// remainder upper-cased.
    pub fn load(
        section: &ConfigSection,
        registry: &Arc<ObjectRegistry>,
        gcode: &Arc<GCodeDispatch>,
    ) -> HostResult<Arc<GCodeMacro>> {
        let alias = section
            .name()
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| {
                HostError::Config(format!(
                    "Section '{}' is missing a macro name",
                    section.name()
                ))
            })?
            .to_uppercase();
        let script = section.get("gcode")?;
        let env = TemplateEnvironment::get_or_create(registry)?;
        let template = env.compile(&alias, script).map_err(|err| {
            error!(alias = %alias, error = ?err, "error loading macro template");
            HostError::TemplateCompile {
                alias: alias.clone(),
                reason: last_line(&err),
            }
        })?;

        let mut default_params = HashMap::new();
        for option in section.get_prefix_options(DEFAULT_PARAMETER_PREFIX) {
            let name = option[DEFAULT_PARAMETER_PREFIX.len()..].to_uppercase();
            default_params.insert(name, section.get(option)?.to_string());
        }

        let gcode_macro = Arc::new(GCodeMacro {
            alias,
            template,
            default_params,
            in_script: AtomicBool::new(false),
            registry: Arc::clone(registry),
            gcode: Arc::clone(gcode),
        });
        let handler = Arc::clone(&gcode_macro);
        gcode.register_command(&gcode_macro.alias, MACRO_DESC, move |request| {
            handler.invoke(&request.params)
        })?;
        Ok(gcode_macro)
    }

    /// The registered command name.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Expand and dispatch this macro with `params` as call-time overrides.
    pub fn invoke(&self, params: &HashMap<String, String>) -> HostResult<()> {
        if self.in_script.load(Ordering::Acquire) {
            return Err(HostError::MacroRecursion {
                alias: self.alias.clone(),
            });
        }

        let mut merged = self.default_params.clone();
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
        let mut context: Vec<(String, Value)> = merged
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        context.push((
            "params".to_string(),
            Value::from_iter(merged.iter().map(|(key, value)| (key.clone(), value.clone()))),
        ));
        context.push((
            "status".to_string(),
            Value::from_object(StatusAccessor::new(Arc::clone(&self.registry))),
        ));

        let script = self
            .template
            .render(Value::from_iter(context))
            .map_err(|err| {
                error!(alias = %self.alias, error = ?err, "error evaluating macro template");
                HostError::TemplateRender {
                    alias: self.alias.clone(),
                    reason: last_line(&err),
                }
            })?;

        // Engaged only around dispatch; a render failure must never leave
        // the flag set.
        let Some(_guard) = ScriptGuard::acquire(&self.in_script) else {
            return Err(HostError::MacroRecursion {
                alias: self.alias.clone(),
            });
        };
        self.gcode.run_script(&script)
    }
}

fn last_line(err: &minijinja::Error) -> String {
    let text = err.to_string();
    text.lines().last().unwrap_or(&text).to_string()
}

/// Load every `[gcode_macro.<name>]` section from `settings`.
///
/// Sections load in sorted order; the first failure aborts the load and
/// propagates as a configuration error.
pub fn load_macros(
    settings: &Settings,
    registry: &Arc<ObjectRegistry>,
    gcode: &Arc<GCodeDispatch>,
) -> HostResult<Vec<Arc<GCodeMacro>>> {
    settings
        .macro_sections()?
        .iter()
        .map(|section| GCodeMacro::load(section, registry, gcode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HostObject, StatusMap, StatusSource};
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::AtomicUsize;

    struct MockSubsystem {
        calls: AtomicUsize,
        seen_time: Mutex<Option<f64>>,
    }

    impl MockSubsystem {
        fn new() -> Self {
            MockSubsystem {
                calls: AtomicUsize::new(0),
                seen_time: Mutex::new(None),
            }
        }
    }

    impl StatusSource for MockSubsystem {
        fn status(&self, eventtime: f64) -> StatusMap {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_time.lock().unwrap() = Some(eventtime);
            let mut status = StatusMap::new();
            status.insert("x_position".to_string(), json!(12.5));
            status.insert("homed".to_string(), json!(true));
            status
        }
    }

    impl HostObject for MockSubsystem {
        fn status_source(&self) -> Option<&dyn StatusSource> {
            Some(self)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct NoStatus;

    impl HostObject for NoStatus {
        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn load_from_toml(
        toml: &str,
    ) -> (Arc<ObjectRegistry>, Arc<GCodeDispatch>, Vec<Arc<GCodeMacro>>) {
        let registry = Arc::new(ObjectRegistry::new());
        let gcode = Arc::new(GCodeDispatch::new());
        let settings = Settings::from_toml(toml).unwrap();
        let macros = load_macros(&settings, &registry, &gcode).unwrap();
        (registry, gcode, macros)
    }

    #[test]
    fn alias_derives_from_section_name_upper_cased() {
        let (_, gcode, macros) = load_from_toml("[gcode_macro.park_head]\ngcode = \"G28\"");
        assert_eq!(macros[0].alias(), "PARK_HEAD");
        assert_eq!(gcode.command_desc("PARK_HEAD").unwrap(), "G-Code macro");
    }

    #[test]
    fn default_parameter_names_are_upper_cased() {
        let (_, _, macros) = load_from_toml(
            "[gcode_macro.m]\ngcode = \"G28\"\ndefault_parameter_speed = \"3000\"",
        );
        assert_eq!(macros[0].default_params["SPEED"], "3000");
    }

    #[test]
    fn compile_failure_aborts_load_with_alias() {
        let registry = Arc::new(ObjectRegistry::new());
        let gcode = Arc::new(GCodeDispatch::new());
        let settings =
            Settings::from_toml("[gcode_macro.broken]\ngcode = \"{% if X %}G1\"").unwrap();
        let err = load_macros(&settings, &registry, &gcode).unwrap_err();
        match err {
            HostError::TemplateCompile { alias, .. } => assert_eq!(alias, "BROKEN"),
            other => panic!("unexpected error: {other:?}"),
        }
        // The broken macro must not have been registered.
        assert!(gcode.command_desc("BROKEN").is_none());
    }

    #[test]
    fn missing_gcode_option_is_a_config_error() {
        let registry = Arc::new(ObjectRegistry::new());
        let gcode = Arc::new(GCodeDispatch::new());
        let settings = Settings::from_toml("[gcode_macro.empty]\nx = \"1\"").unwrap();
        let err = load_macros(&settings, &registry, &gcode).unwrap_err();
        assert!(err.to_string().contains("Option 'gcode'"));
    }

    #[test]
    fn render_failure_leaves_flag_clear() {
        let (_, _, macros) = load_from_toml(
            "[gcode_macro.bad]\ngcode = \"G1 X{X.bogus()}\"\ndefault_parameter_X = \"1\"",
        );
        let err = macros[0].invoke(&HashMap::new()).unwrap_err();
        assert!(matches!(err, HostError::TemplateRender { .. }));
        assert!(!macros[0].in_script.load(Ordering::Acquire));
        // A second attempt fails the same way, not with a recursion error.
        let err = macros[0].invoke(&HashMap::new()).unwrap_err();
        assert!(matches!(err, HostError::TemplateRender { .. }));
    }

    #[test]
    fn accessor_memoizes_repeated_queries() {
        let registry = Arc::new(ObjectRegistry::new());
        let toolhead = Arc::new(MockSubsystem::new());
        registry.add_object("toolhead", Arc::clone(&toolhead) as _).unwrap();
        let accessor = StatusAccessor::new(Arc::clone(&registry));
        let first = accessor.fetch("toolhead");
        let second = accessor.fetch("toolhead");
        assert_eq!(toolhead.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.get_attr("x_position").unwrap(), second.get_attr("x_position").unwrap());
        assert_eq!(first.get_attr("is_enabled").unwrap(), Value::from(true));
    }

    #[test]
    fn accessor_trims_subsystem_names() {
        let registry = Arc::new(ObjectRegistry::new());
        let toolhead = Arc::new(MockSubsystem::new());
        registry.add_object("toolhead", Arc::clone(&toolhead) as _).unwrap();
        let accessor = StatusAccessor::new(Arc::clone(&registry));
        accessor.fetch(" toolhead ");
        accessor.fetch("toolhead");
        assert_eq!(toolhead.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn accessor_shares_one_eventtime_across_subsystems() {
        let registry = Arc::new(ObjectRegistry::new());
        let toolhead = Arc::new(MockSubsystem::new());
        let extruder = Arc::new(MockSubsystem::new());
        registry.add_object("toolhead", Arc::clone(&toolhead) as _).unwrap();
        registry.add_object("extruder", Arc::clone(&extruder) as _).unwrap();
        let accessor = StatusAccessor::new(Arc::clone(&registry));
        accessor.fetch("toolhead");
        accessor.fetch("extruder");
        let first = toolhead.seen_time.lock().unwrap().unwrap();
        let second = extruder.seen_time.lock().unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fresh_accessor_observes_a_fresh_instant() {
        let registry = Arc::new(ObjectRegistry::new());
        let toolhead = Arc::new(MockSubsystem::new());
        registry.add_object("toolhead", Arc::clone(&toolhead) as _).unwrap();
        StatusAccessor::new(Arc::clone(&registry)).fetch("toolhead");
        let first = toolhead.seen_time.lock().unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        StatusAccessor::new(Arc::clone(&registry)).fetch("toolhead");
        let second = toolhead.seen_time.lock().unwrap().unwrap();
        assert!(second > first);
    }

    #[test]
    fn unknown_subsystem_yields_disabled_sentinel() {
        let registry = Arc::new(ObjectRegistry::new());
        let accessor = StatusAccessor::new(Arc::clone(&registry));
        let value = accessor.fetch("toolhead");
        assert_eq!(value.get_attr("is_enabled").unwrap(), Value::from(false));
    }

    #[test]
    fn status_incapable_object_yields_disabled_sentinel() {
        let registry = Arc::new(ObjectRegistry::new());
        registry.add_object("beeper", Arc::new(NoStatus)).unwrap();
        let accessor = StatusAccessor::new(Arc::clone(&registry));
        let value = accessor.fetch("beeper");
        assert_eq!(value.get_attr("is_enabled").unwrap(), Value::from(false));
    }
}
