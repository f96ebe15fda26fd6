//! Runtime wiring: configuration, platform selection and plugin registration.

use std::sync::Arc;

use capacitor_core::{
    ExceptionCode, ImplementationContext, Implementations, InProcessBridge, MethodTable,
    NativePlugin, WebImplementation, WebPlugin,
};
use capacitor_runtime::{Capacitor, CapacitorConfig, RuntimeError};
use figment::Jail;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
struct GreeterConfig {
    #[serde(default)]
    greeting: Option<String>,
}

struct GreeterWeb {
    base: WebPlugin,
    greeting: String,
}

impl WebImplementation for GreeterWeb {
    fn web_plugin(&self) -> &WebPlugin {
        &self.base
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("greet", |this: Arc<Self>, (): ()| async move {
            Ok(json!({ "message": this.greeting }))
        })
    }
}

fn greeter() -> Implementations {
    Implementations::new().web(|ctx: ImplementationContext| async move {
        let config: GreeterConfig = ctx.config_as()?;
        Ok(GreeterWeb {
            base: WebPlugin::new(),
            greeting: config.greeting.unwrap_or_else(|| "hello".to_string()),
        })
    })
}

fn quiet(config: CapacitorConfig) -> Capacitor {
    Capacitor::builder()
        .config(config)
        .init_logging(false)
        .build()
        .unwrap()
}

#[tokio::test]
async fn plugin_section_reaches_fallback_factory() {
    let mut config = CapacitorConfig::default();
    config
        .plugins
        .insert("Greeter".into(), json!({"greeting": "bonjour"}));
    let cap = quiet(config);

    let greeter = cap.register_plugin("Greeter", greeter());
    let reply = greeter.call("greet", Value::Null).await.unwrap();
    assert_eq!(reply, json!({"message": "bonjour"}));
}

#[tokio::test]
async fn lowercased_env_section_still_matches() {
    let mut config = CapacitorConfig::default();
    config
        .plugins
        .insert("greeter".into(), json!({"greeting": "hallo"}));
    let cap = quiet(config);

    let greeter = cap.register_plugin("Greeter", greeter());
    let reply = greeter.call("greet", Value::Null).await.unwrap();
    assert_eq!(reply["message"], "hallo");
}

#[tokio::test]
async fn native_platform_without_header_is_unimplemented() {
    let bridge = Arc::new(
        InProcessBridge::new("ios")
            .with_plugin(NativePlugin::new("Echo").promise("echo", |v| async move { Ok(v) })),
    );
    let cap = Capacitor::builder()
        .config(CapacitorConfig::default())
        .bridge(bridge)
        .init_logging(false)
        .build()
        .unwrap();

    assert!(cap.is_native_platform());
    assert!(cap.is_plugin_available("Echo"));
    assert!(!cap.is_plugin_available("Greeter"));

    let echo = cap.register_plugin("Echo", Implementations::new());
    assert_eq!(echo.call("echo", json!({"v": 1})).await.unwrap(), json!({"v": 1}));

    let greeter = cap.register_plugin("Greeter", greeter());
    let err = greeter.call("greet", Value::Null).await.unwrap_err();
    assert_eq!(err.code(), Some(ExceptionCode::Unimplemented));
    assert_eq!(
        err.message(),
        "\"Greeter\" plugin is not implemented on ios"
    );
}

#[tokio::test]
async fn registered_plugins_are_listed() {
    let cap = quiet(CapacitorConfig::default());
    let first = cap.register_plugin("Greeter", greeter());
    let again = cap.register_plugin("Greeter", Implementations::new());

    assert_eq!(first.name(), again.name());
    assert_eq!(cap.plugins().len(), 1);
    assert!(cap.get_plugin("Greeter").is_some());
    assert!(cap.get_plugin("Missing").is_none());
}

#[test]
fn builder_loads_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "capacitor.toml",
            r#"
            [logging]
            logging_behavior = "none"

            [platform]
            override = "android"

            [server]
            webview_server_url = "https://app.local"
            "#,
        )?;

        let cap = Capacitor::builder()
            .search_path(jail.directory())
            .without_env()
            .build()
            .unwrap();

        assert_eq!(cap.get_platform(), "android");
        assert!(!cap.is_logging_enabled());
        assert_eq!(
            cap.convert_file_src("/sdcard/a.jpg"),
            "https://app.local/_capacitor_file_/sdcard/a.jpg"
        );
        Ok(())
    });
}

#[test]
fn invalid_file_fails_build() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "capacitor.toml",
            "[server]\nwebview_server_url = \"ftp://nowhere\"\n",
        )?;
        let result = Capacitor::builder()
            .search_path(jail.directory())
            .without_env()
            .init_logging(false)
            .build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
        Ok(())
    });
}

#[test]
fn global_instance_installs_once() {
    assert!(Capacitor::global().is_none());

    let cap = quiet(CapacitorConfig::default()).install().unwrap();
    let global = Capacitor::global().unwrap();
    assert!(Arc::ptr_eq(&cap, &global));

    let second = quiet(CapacitorConfig::default()).install();
    assert!(matches!(second, Err(RuntimeError::AlreadyInstalled)));
}
