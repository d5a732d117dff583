//! Plugin context tests for fob-plugin-driver.
//!
//! These tests verify what a hook can reach through its context:
//! - Per-plugin cache namespaces and their identity rules
//! - Warning and error tagging
//! - Re-entrant module resolution
//! - Assets, watch files and graph queries

mod helpers;

use std::sync::Arc;

use fob_plugin_driver::{
    CacheRoot, CompositeKey, DriverConfig, ErrorCode, Log, MemoryGraph, Plugin, PluginError, hook_names,
};
use helpers::{build, build_with};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn cache_user(plugin: Plugin) -> Plugin {
    plugin.sync_hook("buildStart", |ctx, args| {
        let key = args[0].as_str().unwrap_or("key");
        let had = ctx.cache().has(key)?;
        let previous = ctx.cache().get(key)?;
        ctx.cache().set(key, json!({ "seen": true }))?;
        Ok(Some(json!({ "had": had, "previous": previous })))
    })
}

#[tokio::test]
async fn test_cache_namespace_round_trip_through_hooks() {
    let build = build(vec![cache_user(Plugin::new("cachy"))]);

    let first = build
        .driver
        .hook_first("buildStart", vec![json!("answer")], None)
        .await
        .unwrap();
    assert_eq!(first, Some(json!({ "had": false, "previous": null })));

    let second = build
        .driver
        .hook_first("buildStart", vec![json!("answer")], None)
        .await
        .unwrap();
    assert_eq!(second, Some(json!({ "had": true, "previous": { "seen": true } })));

    let snapshot = build.cache.snapshot();
    assert_eq!(snapshot["cachy"][""]["answer"].value, json!({ "seen": true }));
}

#[tokio::test]
async fn test_cache_survives_into_next_build() {
    let first = build(vec![cache_user(Plugin::new("cachy"))]);
    first
        .driver
        .hook_seq("buildStart", vec![json!("answer")], None)
        .await
        .unwrap();

    // Persist, age once, and hand the cache to a fresh driver.
    let serialized = serde_json::to_string(&first.cache).unwrap();
    let restored: CacheRoot = serde_json::from_str(&serialized).unwrap();
    assert_eq!(restored.age(10), 0);
    assert_eq!(restored.snapshot()["cachy"][""]["answer"].last_access_count, 1);

    let second = build_with(
        vec![cache_user(Plugin::new("cachy"))],
        MemoryGraph::new(),
        restored,
        &DriverConfig::default(),
    );
    let result = second
        .driver
        .hook_first("buildStart", vec![json!("answer")], None)
        .await
        .unwrap();
    assert_eq!(result, Some(json!({ "had": true, "previous": { "seen": true } })));
    assert_eq!(second.cache.snapshot()["cachy"][""]["answer"].last_access_count, 0);
}

#[tokio::test]
async fn test_unread_entries_expire() {
    let build = build(vec![cache_user(Plugin::new("cachy"))]);
    build
        .driver
        .hook_seq("buildStart", vec![json!("stale")], None)
        .await
        .unwrap();

    assert_eq!(build.cache.age(1), 0);
    assert_eq!(build.cache.age(1), 1);
    assert!(build.cache.is_empty());
}

#[tokio::test]
async fn test_cache_keys_separate_namespaces() {
    let build = build(vec![
        cache_user(Plugin::new("twin").with_cache_key("-left")),
        cache_user(Plugin::new("twin").with_cache_key("-right")),
    ]);

    build
        .driver
        .hook_seq("buildStart", vec![json!("k")], None)
        .await
        .unwrap();

    assert!(build.cache.contains_namespace(&CompositeKey::new("twin", Some("-left"))));
    assert!(build.cache.contains_namespace(&CompositeKey::new("twin", Some("-right"))));
    assert!(!build.cache.contains_namespace(&CompositeKey::new("twin", None)));
}

#[tokio::test]
async fn test_name_and_cache_key_that_concatenate_alike_stay_apart() {
    let build = build(vec![
        cache_user(Plugin::new("ab")),
        cache_user(Plugin::new("a").with_cache_key("b")),
    ]);

    build
        .driver
        .hook_seq("buildStart", vec![json!("k")], None)
        .await
        .unwrap();

    assert!(build.cache.contains_namespace(&CompositeKey::new("ab", None)));
    assert!(build.cache.contains_namespace(&CompositeKey::new("a", Some("b"))));

    let snapshot = build.cache.snapshot();
    assert_eq!(snapshot["ab"][""]["k"].value, json!({ "seen": true }));
    assert_eq!(snapshot["a"]["b"]["k"].value, json!({ "seen": true }));
}

#[tokio::test]
async fn test_age_cache_uses_configured_expiry() {
    let config = DriverConfig {
        cache_expiry: 1,
        ..DriverConfig::default()
    };
    let build = build_with(
        vec![cache_user(Plugin::new("cachy"))],
        MemoryGraph::new(),
        CacheRoot::new(),
        &config,
    );
    build
        .driver
        .hook_seq("buildStart", vec![json!("stale")], None)
        .await
        .unwrap();

    assert_eq!(build.driver.age_cache(), 0);
    assert_eq!(build.driver.age_cache(), 1);
    assert!(build.cache.is_empty());
}

#[test]
fn test_age_cache_without_cache_is_a_noop() {
    let config = DriverConfig {
        cache: false,
        cache_expiry: 0,
        ..DriverConfig::default()
    };
    let build = build_with(vec![Plugin::new("p")], MemoryGraph::new(), CacheRoot::new(), &config);

    assert_eq!(build.driver.age_cache(), 0);
}

#[tokio::test]
async fn test_duplicate_plugin_names_cannot_use_cache() {
    let build = build(vec![
        cache_user(Plugin::new("dup")),
        Plugin::new("dup").sync_hook("buildEnd", |ctx, _args| {
            ctx.cache().set("k", json!(1))?;
            Ok(None)
        }),
    ]);

    for hook in ["buildStart", "buildEnd"] {
        let err = build
            .driver
            .hook_seq(hook, vec![json!("k")], None)
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(&ErrorCode::PluginError), "{hook}");
        assert_eq!(err.plugin_code(), Some(&ErrorCode::DuplicatePluginName), "{hook}");
        assert_eq!(err.plugin(), Some("dup"));
        assert_eq!(err.hook(), Some(hook));
    }

    for index in [0, 1] {
        let ctx = build.driver.context(index).unwrap();
        let err = ctx.cache().has("k").unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::DuplicatePluginName));
    }
}

#[tokio::test]
async fn test_duplicate_plugins_without_cache_access_are_fine() {
    let build = build(vec![Plugin::new("dup"), Plugin::new("dup")]);
    build.driver.hook_seq("buildStart", vec![], None).await.unwrap();
    assert!(!build.driver.context(0).unwrap().cache().is_enabled());
}

#[tokio::test]
async fn test_anonymous_plugin_cannot_use_cache() {
    let build = build(vec![cache_user(Plugin::anonymous().with_cache_key("v1"))]);

    let err = build
        .driver
        .hook_seq("buildStart", vec![json!("k")], None)
        .await
        .unwrap_err();

    assert_eq!(err.plugin_code(), Some(&ErrorCode::AnonymousPluginCache));
    assert_eq!(err.plugin(), Some("Plugin at position 1"));
    assert!(err.message().contains("Plugin at position 1"));
}

#[tokio::test]
async fn test_disabled_cache_is_noop() {
    let config = DriverConfig {
        cache: false,
        ..DriverConfig::default()
    };
    let build = build_with(
        vec![cache_user(Plugin::anonymous()), cache_user(Plugin::new("named"))],
        MemoryGraph::new(),
        CacheRoot::new(),
        &config,
    );

    for _ in 0..2 {
        build
            .driver
            .hook_seq("buildStart", vec![json!("k")], None)
            .await
            .unwrap();
    }
    let context = build.driver.context(1).unwrap();
    assert_eq!(context.cache().get("k").unwrap(), None);
    assert!(build.cache.is_empty());
}

#[tokio::test]
async fn test_warnings_are_tagged_with_plugin() {
    let build = build(vec![
        Plugin::new("linter").sync_hook("buildEnd", |ctx, _args| {
            ctx.warn("plain warning");
            ctx.warn(Log::new("coded warning").with_code("UNUSED").with_id("src/a.js"));
            Ok(None)
        }),
        Plugin::anonymous().sync_hook("buildEnd", |ctx, _args| {
            ctx.warn(String::from("from nowhere"));
            Ok(None)
        }),
    ]);

    build.driver.hook_seq("buildEnd", vec![], None).await.unwrap();

    let warnings = build.graph.warnings();
    assert_eq!(warnings.len(), 3);

    assert_eq!(warnings[0].code, Some(ErrorCode::PluginWarning));
    assert_eq!(warnings[0].plugin.as_deref(), Some("linter"));
    assert_eq!(warnings[0].plugin_code, None);

    assert_eq!(warnings[1].plugin_code, Some(ErrorCode::Custom("UNUSED".into())));
    assert_eq!(warnings[1].id.as_deref(), Some("src/a.js"));

    assert_eq!(warnings[2].plugin.as_deref(), Some("(anonymous plugin)"));
}

#[tokio::test]
async fn test_context_error_is_tagged_and_fatal() {
    let build = build(vec![Plugin::new("strict").sync_hook("transform", |ctx, _args| {
        let error = ctx.error(Log::new("not allowed").with_code("FORBIDDEN"));
        assert_eq!(error.code(), Some(&ErrorCode::PluginError));
        assert_eq!(error.plugin(), Some("strict"));
        Err(error.into())
    })]);

    let err = build
        .driver
        .hook_seq("transform", vec![], None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(&ErrorCode::PluginError));
    assert_eq!(err.plugin_code(), Some(&ErrorCode::Custom("FORBIDDEN".into())));
    assert_eq!(err.plugin(), Some("strict"));
    assert_eq!(err.hook(), Some("transform"));
}

#[tokio::test]
async fn test_resolve_id_reenters_driver() {
    let build = build(vec![
        Plugin::new("alias").sync_hook(hook_names::RESOLVE_ID, |_ctx, args| {
            Ok(match args[0].as_str() {
                Some("@/utils") => Some(json!("/project/src/utils.js")),
                _ => None,
            })
        }),
        Plugin::new("loader").hook(hook_names::LOAD, |ctx, _args| async move {
            let resolved = ctx.resolve_id("@/utils", Some("/project/src/main.js")).await?;
            Ok(Some(json!({ "resolved": resolved })))
        }),
    ]);

    let result = build
        .driver
        .hook_first(hook_names::LOAD, vec![json!("/project/src/main.js")], None)
        .await
        .unwrap();

    assert_eq!(result, Some(json!({ "resolved": "/project/src/utils.js" })));
}

#[tokio::test]
async fn test_resolve_id_after_driver_dropped() {
    let build = build(vec![Plugin::new("keeper")]);
    let context = build.driver.context(0).unwrap().clone();
    drop(build);

    let err = context.resolve_id("./a", None).await.unwrap_err();
    assert!(err.message().contains("no longer running"));
}

#[tokio::test]
async fn test_assets_through_context() {
    let emitted = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&emitted);
    let build = build(vec![Plugin::new("assets").sync_hook("generateBundle", move |ctx, _args| {
        let id = ctx.emit_asset("logo.svg", None)?;
        ctx.set_asset_source(&id, b"<svg/>".to_vec())?;
        let err = ctx.set_asset_source(&id, b"<svg></svg>".to_vec()).unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::AssetSourceAlreadySet));
        let err = ctx.get_asset_file_name(&id).unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::AssetNotFinalised));
        *slot.lock() = Some(id);
        Ok(None)
    })]);

    build.driver.hook_seq("generateBundle", vec![], None).await.unwrap();
    build.driver.finalise_assets().unwrap();

    let id = emitted.lock().clone().expect("asset emitted");
    let file_name = build.driver.get_asset_file_name(&id).unwrap();
    assert!(file_name.starts_with("assets/logo-"), "{file_name}");
    assert!(file_name.ends_with(".svg"), "{file_name}");
    assert_eq!(
        build.driver.context(0).unwrap().get_asset_file_name(&id).unwrap(),
        file_name
    );
}

#[tokio::test]
async fn test_invalid_asset_name_fails_hook() {
    let build = build(vec![Plugin::new("assets").sync_hook("generateBundle", |ctx, _args| {
        ctx.emit_asset("../escape.txt", Some(b"x".to_vec()))?;
        Ok(None)
    })]);

    let err = build
        .driver
        .hook_seq("generateBundle", vec![], None)
        .await
        .unwrap_err();
    assert_eq!(err.plugin_code(), Some(&ErrorCode::InvalidAssetName));
}

#[tokio::test]
async fn test_watch_files_only_during_build() {
    let build = build(vec![Plugin::new("watcher").sync_hook("transform", |ctx, args| {
        let id = args[0].as_str().unwrap_or_default();
        ctx.add_watch_file(id)?;
        Ok(None)
    })]);

    build
        .driver
        .hook_seq("transform", vec![json!("tailwind.config.js")], None)
        .await
        .unwrap();
    build
        .driver
        .hook_seq("transform", vec![json!("tailwind.config.js")], None)
        .await
        .unwrap();
    assert_eq!(build.graph.watch_files(), ["tailwind.config.js"]);

    build.graph.finish();
    let err = build
        .driver
        .hook_seq("transform", vec![json!("late.css")], None)
        .await
        .unwrap_err();
    assert_eq!(err.plugin_code(), Some(&ErrorCode::WatchFileAfterBuild));
    assert_eq!(build.graph.watch_files(), ["tailwind.config.js"]);
}

#[tokio::test]
async fn test_graph_queries_are_forwarded() {
    let graph = MemoryGraph::new()
        .with_externals(["react"])
        .with_parser(|code, _options| Ok(json!({ "type": "Program", "length": code.len() })));
    graph.add_module("/src/main.js");
    let build = build_with(vec![Plugin::new("inspector")], graph, CacheRoot::new(), &DriverConfig::default());
    let ctx = build.driver.context(0).unwrap();

    assert!(ctx.is_external("react", Some("/src/main.js"), false));
    assert!(!ctx.is_external("./local", Some("/src/main.js"), false));
    assert_eq!(ctx.parse("let a;", None).unwrap(), json!({ "type": "Program", "length": 6 }));
    assert_eq!(ctx.module_ids(), ["/src/main.js"]);
    assert_eq!(ctx.meta().version, env!("CARGO_PKG_VERSION"));
    assert_eq!(ctx.plugin_name(), "inspector");
}

#[tokio::test]
async fn test_parse_without_parser_fails() {
    let build = build(vec![Plugin::new("inspector")]);
    let err = build.driver.context(0).unwrap().parse("x", None).unwrap_err();
    assert_eq!(err.code(), Some(&ErrorCode::ParseError));
}

#[test]
fn test_plugin_error_is_a_diagnostic() {
    use miette::Diagnostic;

    let err = PluginError::new(Log::new("bad").with_code("DUPLICATE_PLUGIN_NAME"));
    assert_eq!(
        Diagnostic::code(&err).map(|code| code.to_string()),
        Some("DUPLICATE_PLUGIN_NAME".to_string())
    );
    assert!(Diagnostic::help(&err).is_some());
    assert_eq!(
        serde_json::to_value(err.log()).unwrap()["code"],
        Value::String("DUPLICATE_PLUGIN_NAME".into())
    );
}
