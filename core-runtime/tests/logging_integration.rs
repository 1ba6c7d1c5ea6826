//! Integration tests for logging and the event bus

use bridge_traits::time::LogLevel;
use core_runtime::events::{
    ConversionEvent, CoreEvent, EventBus, EventSeverity, EventStream, UploadEvent,
};
use core_runtime::logging::{redact_if_sensitive, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_logging_configuration() {
    // Logging can only be initialized once per process, so only the builder is exercised
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(true)
        .with_spans(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(config.redact_pii);
    assert!(config.enable_spans);
}

#[test]
fn test_pii_redaction_tokens() {
    assert_eq!(redact_if_sensitive("access_token", "ghp_x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("authorization", "Bearer x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("api_key", "k"), "[REDACTED]");
}

#[test]
fn test_pii_redaction_emails() {
    let redacted = redact_if_sensitive("author", "jane@example.com");

    assert!(redacted.starts_with('j'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_path_stripping() {
    assert_eq!(
        strip_path("/home/jane/.cache/media/video_Clip_Jane_2024-02-01.webm"),
        "video_Clip_Jane_2024-02-01.webm"
    );
    assert_eq!(strip_path("D:\\data\\file.txt"), "file.txt");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_pii_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true)
        .with_filter("core_conversion=debug,provider_github=trace");

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
    assert_eq!(
        config.filter.as_deref(),
        Some("core_conversion=debug,provider_github=trace")
    );
}

#[tokio::test]
async fn test_late_subscriber_only_sees_new_events() {
    let bus = EventBus::new(16);
    let _early = bus.subscribe();

    bus.emit(CoreEvent::Upload(UploadEvent::Started {
        file_name: "music_A_B_2024-01-01.mp3".to_string(),
    }))
    .unwrap();

    // A screen mounting after the fact still receives the next terminal event
    let mut late = EventStream::new(bus.subscribe())
        .filter(|event| event.severity() >= EventSeverity::Info);

    bus.emit(CoreEvent::Conversion(ConversionEvent::Completed {
        job_id: "job-2".to_string(),
        kind: "video".to_string(),
        original_size: 100,
        converted_size: 60,
    }))
    .unwrap();

    let event = late.recv().await.unwrap();
    assert!(matches!(
        event,
        CoreEvent::Conversion(ConversionEvent::Completed { .. })
    ));
    assert!(late.try_recv().is_none());
}
