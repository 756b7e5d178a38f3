#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Settings integration tests.
//!
//! Tests for how environment-loaded, installed, and scoped settings change
//! declarations and resolution.

use std::thread;

use strainer_kernel::config::{self, Settings};
use strainer_kernel::filter::{FieldSet, FieldType, FilterResolver, FilterValue, Operator};
use strainer_kernel::translate::Dialect;
use tokio::task::{self, LocalSet};

fn resolver() -> FilterResolver {
    FilterResolver::new(
        FieldSet::builder()
            .add("age", FieldType::Int)
            .add("name", FieldType::Str)
            .build()
            .unwrap(),
    )
}

fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |key| {
        pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
    }
}

// -------------------------------------------------------------------------
// Environment
// -------------------------------------------------------------------------

#[test]
fn environment_settings_shape_parameters() {
    let settings = Settings::from_vars(lookup(&[
        ("STRAINER_ALIAS_STYLE", "underscore"),
        ("STRAINER_DISABLED_OPERATORS", "not_like,not_ilike"),
        ("STRAINER_DEFAULT_DIALECT", "sqlite3"),
    ]))
    .unwrap();
    assert_eq!(settings.default_dialect(), Dialect::Sqlite);

    let _guard = config::override_with(settings);
    let resolver = resolver();
    let aliases: Vec<&str> = resolver.params().aliases().collect();
    assert!(aliases.contains(&"name__ilike"));
    assert!(!aliases.contains(&"name__not_like"));
    assert!(!aliases.iter().any(|a| a.contains('[')));

    let values = resolver.resolve_query("age__ge=3").unwrap();
    assert_eq!(values.get_op("age", Operator::Ge), Some(&FilterValue::Int(3)));
}

#[test]
fn unknown_alias_style_is_rejected() {
    let err = Settings::from_vars(lookup(&[("STRAINER_ALIAS_STYLE", "dots")])).unwrap_err();
    assert!(err.to_string().contains("STRAINER_ALIAS_STYLE"));
}

// -------------------------------------------------------------------------
// Scoping
// -------------------------------------------------------------------------

#[test]
fn installed_settings_apply_until_replaced() {
    config::install(Settings::new().disable(Operator::Overlap));
    let installed = config::current().is_disabled(Operator::Overlap);
    config::install(Settings::new());

    assert!(installed);
    assert!(!config::current().is_disabled(Operator::Overlap));
}

#[test]
fn guards_do_not_leak_across_threads() {
    let _guard = config::scoped(|s| s.disable(Operator::Gt));
    assert!(!resolver().params().aliases().any(|a| a == "age[gt]"));

    let other = thread::spawn(|| config::current().is_disabled(Operator::Gt))
        .join()
        .unwrap();
    assert!(!other);
}

#[test]
fn declarations_capture_settings_at_build_time() {
    let resolver = {
        let _guard = config::scoped(|s| s.disable(Operator::Lt));
        resolver()
    };
    assert!(resolver.resolve_query("age[lt]=3").unwrap().is_empty());
    assert!(FieldSet::builder()
        .add("age", FieldType::Int)
        .build()
        .unwrap()
        .field("age")
        .unwrap()
        .allows(Operator::Lt));
}

#[tokio::test]
async fn task_scope_survives_awaits() {
    let settings = Settings::new().with_default_dialect(Dialect::MySql);
    let dialect = config::scope_async(settings, async {
        tokio::task::yield_now().await;
        config::current().default_dialect()
    })
    .await;
    assert_eq!(dialect, Dialect::MySql);
}

#[tokio::test]
async fn guard_inside_task_scope_is_innermost() {
    let settings = Settings::new().with_default_dialect(Dialect::MySql);
    let dialect = config::scope_async(settings, async {
        let _guard = config::override_with(Settings::new().with_default_dialect(Dialect::Sqlite));
        config::current().default_dialect()
    })
    .await;
    assert_eq!(dialect, Dialect::Sqlite);
}

#[tokio::test]
async fn task_scope_inside_guard_is_innermost() {
    let _guard = config::scoped(|s| s.disable(Operator::Like));
    let inner = config::scope_async(Settings::new(), async {
        tokio::task::yield_now().await;
        config::current().is_disabled(Operator::Like)
    })
    .await;

    assert!(!inner);
    assert!(config::current().is_disabled(Operator::Like));
}

#[tokio::test]
async fn sibling_local_tasks_do_not_share_guards() {
    let local = LocalSet::new();
    let (holder, sibling) = local
        .run_until(async {
            let holder = task::spawn_local(async {
                let _guard = config::scoped(|s| s.disable(Operator::Ilike));
                task::yield_now().await;
                task::yield_now().await;
                config::current().is_disabled(Operator::Ilike)
            });
            let sibling = task::spawn_local(async {
                task::yield_now().await;
                config::current().is_disabled(Operator::Ilike)
            });
            (holder.await.unwrap(), sibling.await.unwrap())
        })
        .await;

    assert!(holder);
    assert!(!sibling);
}
