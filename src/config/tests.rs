use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.minify.max_age = Some(60);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        minify_max_age: Some(0),
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.minify.max_age, 0);
}

#[test]
fn defaults_describe_a_working_service() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.assets.root, PathBuf::from(DEFAULT_ASSET_ROOT));
    assert_eq!(settings.assets.max_files, 10);
    assert_eq!(settings.assets.allowed_extensions, vec!["css", "js", "html"]);
    assert_eq!(settings.minify.max_age, 1800);
    assert!(settings.minify.public);
    assert_eq!(settings.minify.encodings, DEFAULT_ENCODINGS.to_vec());
    assert_eq!(settings.minify.charset.as_deref(), Some("utf-8"));
    assert_eq!(settings.minify.docs_url, DEFAULT_DOCS_URL);
    assert!(settings.html.break_before_attributes);
    assert_eq!(settings.html.dynamic_tags, vec!["mfunc", "mclude"]);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.entry_limit, 512);
}

#[test]
fn encodings_are_parsed_and_identity_dropped() {
    let mut raw = RawSettings::default();
    raw.minify.encodings = Some(vec!["x-gzip".into(), "identity".into()]);
    raw.minify.force_encoding = Some("br".into());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.minify.encodings, vec![ContentEncoding::Gzip]);
    assert_eq!(settings.minify.forced_encoding, Some(ContentEncoding::Br));

    let mut raw = RawSettings::default();
    raw.minify.encodings = Some(vec!["compress".into()]);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "minify.encodings",
            ..
        })
    ));
}

#[test]
fn external_minifiers_are_keyed_by_content_type() {
    let mut raw = RawSettings::default();
    let mut external = BTreeMap::new();
    external.insert(
        "css".to_string(),
        RawExternalCommand {
            program: Some(PathBuf::from("csso")),
            args: Some(vec!["{input}".to_string()]),
        },
    );
    raw.minify.external = Some(external);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let css = settings
        .minify
        .external
        .get(&ContentType::Css)
        .expect("css minifier");
    assert_eq!(css.program, PathBuf::from("csso"));
    assert_eq!(css.args, vec!["{input}"]);

    let mut raw = RawSettings::default();
    let mut external = BTreeMap::new();
    external.insert("png".to_string(), RawExternalCommand::default());
    raw.minify.external = Some(external);
    assert!(Settings::from_raw(raw).is_err());
}

fn invalid_key(mutate: impl FnOnce(&mut RawSettings)) -> &'static str {
    let mut raw = RawSettings::default();
    mutate(&mut raw);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => key,
        other => panic!("expected invalid settings, got {other:?}"),
    }
}

#[test]
fn rejects_invalid_values() {
    assert_eq!(invalid_key(|raw| raw.server.port = Some(0)), "server.port");
    assert_eq!(
        invalid_key(|raw| raw.assets.max_files = Some(0)),
        "assets.max_files"
    );
    assert_eq!(
        invalid_key(|raw| raw.assets.allowed_extensions = Some(vec!["png".into()])),
        "assets.allowed_extensions"
    );
    assert_eq!(
        invalid_key(|raw| {
            raw.assets.groups = Some(BTreeMap::from([("empty".to_string(), Vec::new())]))
        }),
        "assets.groups"
    );
    assert_eq!(
        invalid_key(|raw| raw.minify.encode_level = Some(10)),
        "minify.encode_level"
    );
    assert_eq!(
        invalid_key(|raw| raw.minify.docs_url = Some(" ".into())),
        "minify.docs_url"
    );
    assert_eq!(
        invalid_key(|raw| raw.cache.entry_limit = Some(0)),
        "cache.entry_limit"
    );
    assert_eq!(
        invalid_key(|raw| raw.logging.level = Some("loud".into())),
        "logging.level"
    );
}

#[test]
fn empty_charset_disables_the_parameter() {
    let mut raw = RawSettings::default();
    raw.minify.charset = Some(String::new());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.minify.charset, None);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        logging: LoggingOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["tessera"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "tessera",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--assets-root",
        "/srv/assets",
        "--cache-enabled",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.assets_root.as_deref(),
                Some(std::path::Path::new("/srv/assets"))
            );
            assert_eq!(serve.overrides.cache_enabled, Some(false));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_build_arguments() {
    let args = CliArgs::parse_from([
        "tessera",
        "build",
        "--type",
        "css",
        "--debug",
        "-o",
        "/tmp/site.css",
        "a.css",
        "b.css",
    ]);

    match args.command.expect("build command") {
        Command::Build(build) => {
            assert_eq!(build.content_type.as_deref(), Some("css"));
            assert!(build.debug);
            assert_eq!(build.output.as_deref(), Some(std::path::Path::new("/tmp/site.css")));
            assert_eq!(build.files, vec![PathBuf::from("a.css"), PathBuf::from("b.css")]);

            let mut raw = RawSettings::default();
            raw.apply_build_overrides(&build);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert!(settings.minify.debug);
        }
        _ => panic!("wrong command parsed"),
    }
}
