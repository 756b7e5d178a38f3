//! Process-wide settings with scoped overrides.
//!
//! The active [`Settings`] come from the innermost scope that is open for
//! the caller, whether a [`SettingsGuard`] or a [`scope_async`] block, and
//! fall back to the process-wide base set with [`install`].
//!
//! Guards belong to the tokio task that created them (or to plain thread
//! code outside any task), so sibling tasks on one thread never observe
//! each other's overrides. Guards pop themselves on drop, so an override
//! never outlives its scope even when the scope unwinds.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::filter::{FieldType, Operator};
use crate::translate::{Backend, ConditionHook, Dialect, FilterHook};

/// Replacement for the built-in operator catalogue.
pub type OperatorsGenerator = Arc<dyn Fn(&FieldType) -> Vec<Operator> + Send + Sync>;

/// Builds the external parameter name from `(name, operator, alias)`.
pub type AliasGenerator = Arc<dyn Fn(&str, Operator, Option<&str>) -> String + Send + Sync>;

/// Process-wide configuration.
#[derive(Clone, Default)]
pub struct Settings {
    disabled_operators: BTreeSet<Operator>,
    operators_generator: Option<OperatorsGenerator>,
    alias_generator: Option<AliasGenerator>,
    default_dialect: Dialect,
    filter_hooks: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    condition_hooks: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("disabled_operators", &self.disabled_operators)
            .field("operators_generator", &self.operators_generator.is_some())
            .field("alias_generator", &self.alias_generator.is_some())
            .field("default_dialect", &self.default_dialect)
            .field("filter_hooks", &self.filter_hooks.len())
            .field("condition_hooks", &self.condition_hooks.len())
            .finish()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from `STRAINER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(raw) = lookup("STRAINER_DISABLED_OPERATORS") {
            for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match name.parse::<Operator>() {
                    Ok(op) => {
                        settings.disabled_operators.insert(op);
                    }
                    Err(_) => {
                        tracing::warn!(
                            operator = %name,
                            "ignoring unknown operator in STRAINER_DISABLED_OPERATORS"
                        );
                    }
                }
            }
        }

        if let Some(raw) = lookup("STRAINER_DEFAULT_DIALECT") {
            settings.default_dialect = raw
                .parse()
                .context("STRAINER_DEFAULT_DIALECT must be one of postgres, mysql, sqlite")?;
        }

        match lookup("STRAINER_ALIAS_STYLE").as_deref().map(str::trim) {
            None | Some("") | Some("brackets") => {}
            Some("underscore") => {
                settings.alias_generator = Some(Arc::new(|name, op, alias| {
                    format!("{}__{}", alias.unwrap_or(name), op.as_str())
                }));
            }
            Some(other) => {
                anyhow::bail!("STRAINER_ALIAS_STYLE must be brackets or underscore, got {other}")
            }
        }

        Ok(settings)
    }

    pub fn disabled_operators(&self) -> &BTreeSet<Operator> {
        &self.disabled_operators
    }

    pub fn is_disabled(&self, op: Operator) -> bool {
        self.disabled_operators.contains(&op)
    }

    pub fn operators_generator(&self) -> Option<&OperatorsGenerator> {
        self.operators_generator.as_ref()
    }

    pub fn alias_generator(&self) -> Option<&AliasGenerator> {
        self.alias_generator.as_ref()
    }

    pub fn default_dialect(&self) -> Dialect {
        self.default_dialect
    }

    /// Process-wide filter hook registered for backend `B`.
    pub fn filter_hook<B: Backend>(&self) -> Option<Arc<dyn FilterHook<B>>> {
        self.filter_hooks
            .get(&TypeId::of::<B>())
            .and_then(|hook| hook.downcast_ref::<Arc<dyn FilterHook<B>>>())
            .cloned()
    }

    /// Process-wide condition hook registered for backend `B`.
    pub fn condition_hook<B: Backend>(&self) -> Option<Arc<dyn ConditionHook<B>>> {
        self.condition_hooks
            .get(&TypeId::of::<B>())
            .and_then(|hook| hook.downcast_ref::<Arc<dyn ConditionHook<B>>>())
            .cloned()
    }

    pub fn disable(mut self, op: Operator) -> Self {
        self.disabled_operators.insert(op);
        self
    }

    pub fn with_disabled_operators<I>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = Operator>,
    {
        self.disabled_operators = ops.into_iter().collect();
        self
    }

    pub fn with_operators_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&FieldType) -> Vec<Operator> + Send + Sync + 'static,
    {
        self.operators_generator = Some(Arc::new(generator));
        self
    }

    pub fn with_alias_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str, Operator, Option<&str>) -> String + Send + Sync + 'static,
    {
        self.alias_generator = Some(Arc::new(generator));
        self
    }

    pub fn with_default_dialect(mut self, dialect: Dialect) -> Self {
        self.default_dialect = dialect;
        self
    }

    pub fn with_filter_hook<B: Backend>(mut self, hook: Arc<dyn FilterHook<B>>) -> Self {
        self.filter_hooks.insert(TypeId::of::<B>(), Arc::new(hook));
        self
    }

    pub fn with_condition_hook<B: Backend>(mut self, hook: Arc<dyn ConditionHook<B>>) -> Self {
        self.condition_hooks
            .insert(TypeId::of::<B>(), Arc::new(hook));
        self
    }
}

static GLOBAL: LazyLock<RwLock<Arc<Settings>>> =
    LazyLock::new(|| RwLock::new(Arc::new(Settings::default())));

/// Scope ids increase with nesting, so the larger id is the inner scope.
static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

fn next_scope() -> u64 {
    NEXT_SCOPE.fetch_add(1, Ordering::Relaxed)
}

struct Override {
    scope: u64,
    task: Option<tokio::task::Id>,
    settings: Arc<Settings>,
}

thread_local! {
    static OVERRIDES: RefCell<Vec<Override>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_SETTINGS: (u64, Arc<Settings>);
}

/// The settings in effect for the caller.
pub fn current() -> Arc<Settings> {
    let task = tokio::task::try_id();
    let guarded = OVERRIDES.with(|overrides| {
        overrides
            .borrow()
            .iter()
            .rev()
            .find(|o| o.task == task)
            .map(|o| (o.scope, Arc::clone(&o.settings)))
    });
    let task_scoped = TASK_SETTINGS
        .try_with(|(scope, settings)| (*scope, Arc::clone(settings)))
        .ok();

    guarded
        .into_iter()
        .chain(task_scoped)
        .max_by_key(|(scope, _)| *scope)
        .map(|(_, settings)| settings)
        .unwrap_or_else(|| GLOBAL.read().clone())
}

/// Replace the process-wide base settings.
pub fn install(settings: Settings) {
    tracing::debug!(?settings, "installing settings");
    *GLOBAL.write() = Arc::new(settings);
}

/// Override the settings for the current task until the guard drops.
#[must_use = "the override is popped as soon as the guard is dropped"]
pub fn override_with(settings: Settings) -> SettingsGuard {
    let scope = next_scope();
    OVERRIDES.with(|overrides| {
        overrides.borrow_mut().push(Override {
            scope,
            task: tokio::task::try_id(),
            settings: Arc::new(settings),
        });
    });
    SettingsGuard {
        scope,
        _not_send: PhantomData,
    }
}

/// Override a copy of the current settings until the guard drops.
#[must_use = "the override is popped as soon as the guard is dropped"]
pub fn scoped<F>(edit: F) -> SettingsGuard
where
    F: FnOnce(Settings) -> Settings,
{
    let base = (*current()).clone();
    override_with(edit(base))
}

/// Run `fut` with `settings` active across its awaits.
///
/// The block is an inner scope of whatever was active when it started.
pub async fn scope_async<F: Future>(settings: Settings, fut: F) -> F::Output {
    TASK_SETTINGS
        .scope((next_scope(), Arc::new(settings)), fut)
        .await
}

/// Pops its override on drop.
pub struct SettingsGuard {
    scope: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SettingsGuard {
    fn drop(&mut self) {
        // The thread-local may already be gone during thread teardown.
        let _ = OVERRIDES.try_with(|overrides| {
            overrides.borrow_mut().retain(|o| o.scope != self.scope);
        });
    }
}

impl fmt::Debug for SettingsGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsGuard")
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn from_vars_defaults() {
        let settings = Settings::from_vars(|_| None).unwrap();
        assert!(settings.disabled_operators().is_empty());
        assert_eq!(settings.default_dialect(), Dialect::Postgres);
        assert!(settings.alias_generator().is_none());
    }

    #[test]
    fn from_vars_reads_disabled_operators() {
        let settings =
            Settings::from_vars(vars(&[("STRAINER_DISABLED_OPERATORS", "like, ilike,bogus")]))
                .unwrap();
        assert!(settings.is_disabled(Operator::Like));
        assert!(settings.is_disabled(Operator::Ilike));
        assert_eq!(settings.disabled_operators().len(), 2);
    }

    #[test]
    fn from_vars_rejects_unknown_dialect() {
        let err = Settings::from_vars(vars(&[("STRAINER_DEFAULT_DIALECT", "oracle")])).unwrap_err();
        assert!(err.to_string().contains("STRAINER_DEFAULT_DIALECT"));
    }

    #[test]
    fn from_vars_underscore_aliases() {
        let settings =
            Settings::from_vars(vars(&[("STRAINER_ALIAS_STYLE", "underscore")])).unwrap();
        let generator = settings.alias_generator().unwrap();
        assert_eq!(generator("age", Operator::Gt, None), "age__gt");
        assert_eq!(generator("age", Operator::In, Some("a")), "a__in");
    }

    #[test]
    fn guard_restores_on_drop() {
        assert!(!current().is_disabled(Operator::NotIlike));
        {
            let _outer = scoped(|s| s.disable(Operator::NotIlike));
            assert!(current().is_disabled(Operator::NotIlike));
            {
                let _inner = override_with(Settings::new());
                assert!(!current().is_disabled(Operator::NotIlike));
            }
            assert!(current().is_disabled(Operator::NotIlike));
        }
        assert!(!current().is_disabled(Operator::NotIlike));
    }

    #[test]
    fn guard_restores_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = scoped(|s| s.disable(Operator::NotLike));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!current().is_disabled(Operator::NotLike));
    }

    #[tokio::test]
    async fn task_scope_is_isolated() {
        let scoped_task = tokio::spawn(scope_async(
            Settings::new().disable(Operator::Contains),
            async { current().is_disabled(Operator::Contains) },
        ));
        let plain_task = tokio::spawn(async { current().is_disabled(Operator::Contains) });

        assert!(scoped_task.await.unwrap());
        assert!(!plain_task.await.unwrap());
    }

    #[test]
    fn guards_dropped_out_of_order_only_remove_themselves() {
        let outer = scoped(|s| s.disable(Operator::Ge));
        let inner = scoped(|s| s.disable(Operator::Le));
        drop(outer);
        assert!(current().is_disabled(Operator::Le));
        drop(inner);
        assert!(!current().is_disabled(Operator::Ge));
        assert!(!current().is_disabled(Operator::Le));
    }
}
