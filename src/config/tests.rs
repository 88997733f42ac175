use super::*;

fn raw_with_origin() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.origin.base_url = Some("https://origin.test".to_string());
    raw
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_with_origin();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        isr_default_duration: Some("1 minute".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.isr.default_duration,
        Some(DurationSpec::from("1 minute"))
    );
}

#[test]
fn isr_defaults_match_cache_defaults() {
    let settings = Settings::from_raw(raw_with_origin()).expect("valid settings");
    let isr = &settings.isr;

    assert_eq!(isr.key, "fetch");
    assert_eq!(isr.cache_name, None);
    assert!(isr.stale_while_revalidate);
    assert!(!isr.enable_durable_tier);
    assert_eq!(isr.default_duration, None);
    assert_eq!(isr.cache_config(), IsrConfig::default());
}

#[test]
fn public_url_defaults_to_listener_address() {
    let settings = Settings::from_raw(raw_with_origin()).expect("valid settings");
    assert_eq!(settings.server.public_url.as_str(), "http://127.0.0.1:3000/");
}

#[test]
fn origin_url_is_required() {
    let err = Settings::from_raw(RawSettings::default()).expect_err("missing origin");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "origin.base_url",
            ..
        }
    ));
}

#[test]
fn invalid_duration_fails_fast() {
    let mut raw = raw_with_origin();
    raw.isr.long_term_kv_duration = Some(DurationSpec::from("1 fortnight"));

    let err = Settings::from_raw(raw).expect_err("invalid duration");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "isr.long_term_kv_duration",
            ..
        }
    ));
}

#[test]
fn empty_key_is_rejected() {
    let mut raw = raw_with_origin();
    raw.isr.key = Some(String::new());

    let err = Settings::from_raw(raw).expect_err("empty key");
    assert!(matches!(err, LoadError::Invalid { key: "isr.key", .. }));
}

#[test]
fn hook_triggers_are_parsed() {
    let mut raw = raw_with_origin();
    raw.isr.refresh_header = Some("refresh-cache".to_string());
    raw.isr.avoid_cookie = Some("DATA-PREVIEW=true".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.isr.refresh_header.as_ref().map(HeaderName::as_str),
        Some("refresh-cache")
    );
    assert_eq!(
        settings.isr.avoid_cookie,
        Some(("DATA-PREVIEW".to_string(), "true".to_string()))
    );
}

#[test]
fn malformed_cookie_trigger_is_rejected() {
    let mut raw = raw_with_origin();
    raw.isr.avoid_cookie = Some("DATA-PREVIEW".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = raw_with_origin();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["isr-cache"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "isr-cache",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin-url",
        "https://origin.test",
        "--isr-stale-while-revalidate",
        "false",
        "--isr-revalidation-concurrency",
        "8",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.origin_url.as_deref(),
                Some("https://origin.test")
            );
            assert_eq!(serve.overrides.isr_stale_while_revalidate, Some(false));
            assert_eq!(serve.overrides.isr_revalidation_concurrency, Some(8));
        }
    }
}
