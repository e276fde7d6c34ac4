use std::{
    collections::BTreeMap,
    fs,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, SystemTime},
};

use tempfile::TempDir;
use tessera::{
    application::{
        combine::CacheArtifact,
        context::RequestContext,
        negotiate::ClientHeaders,
        resolve::SourceResolver,
        serve::{AssetService, BufferedResponse, Served},
        source::Source,
    },
    cache::{ArtifactStore, CacheConfig, MemoryStore, StoreError},
    domain::content_type::ContentType,
};
use time::OffsetDateTime;

/// Counts writes so tests can tell builds from hits.
struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(&CacheConfig::default()),
            writes: AtomicUsize::new(0),
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for CountingStore {
    fn is_valid(&self, key: &str, since: OffsetDateTime) -> bool {
        self.inner.is_valid(key, since)
    }

    fn get_size(&self, key: &str) -> Result<u64, StoreError> {
        self.inner.get_size(key)
    }

    fn store(&self, key: &str, artifact: &CacheArtifact) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // Widen the race window between concurrent builders.
        thread::sleep(Duration::from_millis(5));
        self.inner.store(key, artifact)
    }

    fn fetch(&self, key: &str) -> Result<CacheArtifact, StoreError> {
        self.inner.fetch(key)
    }
}

fn asset_root() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::create_dir(dir.path().join("css")).expect("mkdir");
    fs::write(dir.path().join("css/base.css"), "body{margin:0}").expect("write");
    fs::write(
        dir.path().join("css/theme.css"),
        "@import url(fonts.css);a{color:red}",
    )
    .expect("write");
    fs::write(dir.path().join("app.js"), "var app = 1;").expect("write");
    fs::write(dir.path().join("menu.js"), "menu()").expect("write");
    dir
}

fn resolver(root: &TempDir) -> SourceResolver {
    let groups = BTreeMap::from([(
        "site".to_string(),
        vec!["css/base.css".to_string(), "css/theme.css".to_string()],
    )]);
    SourceResolver::new(
        root.path(),
        10,
        vec!["css".into(), "js".into()],
        groups,
    )
}

#[test]
fn group_sources_combine_with_bubbled_imports() {
    let root = asset_root();
    let resolved = resolver(&root)
        .resolve_group("site")
        .expect("resolved")
        .expect("group exists");
    assert_eq!(resolved.content_type, ContentType::Css);

    let mut ctx = RequestContext::new(ContentType::Css);
    ctx.bubble_css_imports = true;
    let store = Arc::new(MemoryStore::new(&CacheConfig::default()));
    let service = AssetService::with_store(store.clone());

    let mut sink = BufferedResponse::new();
    service
        .serve(&resolved.sources, &ctx, &ClientHeaders::default(), &mut sink)
        .expect("served");

    assert_eq!(sink.status, 200);
    assert_eq!(
        String::from_utf8(sink.body).expect("utf-8"),
        "@import url(fonts.css);body{margin:0}a{color:red}"
    );
    assert_eq!(
        sink.headers
            .iter()
            .find(|(name, _)| name == "Content-Type")
            .map(|(_, value)| value.as_str()),
        Some("text/css; charset=utf-8")
    );
    assert!(!store.is_empty());
}

#[test]
fn scripts_from_a_file_list_are_joined_with_statement_separator() {
    let root = asset_root();
    let resolved = resolver(&root)
        .resolve_files(None, "app.js, menu.js")
        .expect("resolved");

    let ctx = RequestContext::new(ContentType::Js).quiet();
    let output =
        AssetService::uncached().serve_quiet(&resolved.sources, &ctx, &ClientHeaders::default());

    assert!(output.success);
    assert_eq!(output.content.as_ref(), b"var app = 1;\n;menu()");
    assert_eq!(
        output.header("Content-Length"),
        Some(output.content.len().to_string().as_str())
    );
}

#[test]
fn quiet_mode_answers_a_matching_etag_with_304() {
    let root = asset_root();
    let resolved = resolver(&root)
        .resolve_files(Some("css"), "base.css")
        .expect("resolved");
    let ctx = RequestContext::new(ContentType::Css).quiet();
    let service = AssetService::with_store(Arc::new(MemoryStore::new(&CacheConfig::default())));

    let first = service.serve_quiet(&resolved.sources, &ctx, &ClientHeaders::default());
    let etag = first.header("ETag").expect("etag").to_string();

    let client = ClientHeaders {
        if_none_match: Some(etag),
        ..ClientHeaders::default()
    };
    let second = service.serve_quiet(&resolved.sources, &ctx, &client);
    assert!(second.success);
    assert_eq!(second.status, 304);
    assert!(second.content.is_empty());
}

#[test]
fn concurrent_misses_build_the_artifact_once() {
    let root = asset_root();
    let resolved = resolver(&root)
        .resolve_files(None, "app.js,menu.js")
        .expect("resolved");
    let store = Arc::new(CountingStore::new());
    let service = AssetService::with_store(store.clone());
    let ctx = RequestContext::new(ContentType::Js);

    let bodies: Vec<Vec<u8>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let sources = resolved.sources.clone();
                let ctx = &ctx;
                scope.spawn(move || {
                    let mut sink = BufferedResponse::new();
                    service
                        .serve(&sources, ctx, &ClientHeaders::default(), &mut sink)
                        .expect("served");
                    sink.body
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });

    // identity plus br, gzip and deflate
    assert_eq!(store.writes(), 4);
    assert!(bodies.iter().all(|body| body == &bodies[0]));
}

#[test]
fn touching_a_source_produces_a_fresh_artifact() -> io::Result<()> {
    let root = asset_root();
    let path = root.path().join("app.js");
    let store = Arc::new(CountingStore::new());
    let service = AssetService::with_store(store.clone());
    let ctx = RequestContext::new(ContentType::Js);

    let first = Source::from_path(&path).expect("source");
    let mut sink = BufferedResponse::new();
    let served = service
        .serve(&[first], &ctx, &ClientHeaders::default(), &mut sink)
        .expect("served");
    assert!(matches!(served, Served::Sent { status: 200, .. }));
    assert_eq!(store.writes(), 4);

    fs::write(&path, "var app = 2;")?;
    let later = SystemTime::now() + Duration::from_secs(5);
    fs::File::options().write(true).open(&path)?.set_modified(later)?;

    let touched = Source::from_path(&path).expect("source");
    let mut sink = BufferedResponse::new();
    service
        .serve(&[touched], &ctx, &ClientHeaders::default(), &mut sink)
        .expect("served");
    assert_eq!(store.writes(), 8);
    assert_eq!(sink.body, b"var app = 2;");
    Ok(())
}

#[test]
fn resolver_keeps_requests_inside_the_root() {
    let root = asset_root();
    let resolver = resolver(&root);

    for files in ["../etc/passwd.css", "css/../../x.css", "missing.css", "app.js,css/base.css"] {
        let err = resolver
            .resolve_files(None, files)
            .expect_err("rejected request");
        assert!(err.is_client_error(), "{files}: {err}");
    }
    assert!(resolver.resolve_group("nope").expect("lookup").is_none());
}
