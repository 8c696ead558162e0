use common::{
    init_structured_logging, LoggingConfig, OperationTimer, PerformanceMetrics, ProcessContext,
    StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::Level;

#[test]
fn test_entry_flattens_fields() {
    let mut fields = HashMap::new();
    fields.insert("agent".to_string(), Value::String("SynthesisAgent".to_string()));

    let entry = StructuredLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: "WARN".to_string(),
        target: "query_orchestrator::flow::controller".to_string(),
        message: "Stage failed".to_string(),
        fields,
        context: None,
        performance: None,
    };

    let json = serde_json::to_value(&entry).expect("serialize entry");
    assert_eq!(json["agent"], "SynthesisAgent");
    assert!(json.get("context").is_none());
    assert!(json.get("performance").is_none());
}

#[test]
fn test_process_context_defaults() {
    let context = ProcessContext::default();
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
    assert!(!context.app_version.is_empty());
}

#[test]
fn test_performance_metrics_round_trip() {
    let metrics = PerformanceMetrics {
        duration_ms: Some(15),
        tokens_used: None,
        items_processed: Some(3),
    };
    let decoded: PerformanceMetrics =
        serde_json::from_value(serde_json::to_value(&metrics).expect("serialize"))
            .expect("deserialize");
    assert_eq!(decoded, metrics);
}

#[test]
fn test_logging_config_presets() {
    let default = LoggingConfig::default();
    assert_eq!(default.level, Level::INFO);
    assert!(!default.json_output);

    let production = LoggingConfig::production();
    assert!(production.json_output);
    assert!(!production.color_output);
}

#[test]
fn test_init_twice_fails() {
    let config = LoggingConfig {
        level: Level::DEBUG,
        json_output: true,
        ..LoggingConfig::default()
    };
    // Another test binary may not have installed a subscriber, but a second
    // install in this process must always fail.
    let _ = init_structured_logging(config.clone());
    assert!(init_structured_logging(config).is_err());

    let mut timer = OperationTimer::new("logging_smoke");
    timer.add_field("items", 2);
    timer.finish();
}
