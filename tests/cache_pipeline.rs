//! End-to-end behavior of the interceptor over a shared store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use pipecache::{
    CacheConfig, CacheDirective, CacheInterceptor, Cacheable, InvalidateDirective,
    PipelineError, ReadDirective,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetUser {
    id: u64,
}

impl Cacheable for GetUser {
    fn cache_directive() -> Option<CacheDirective> {
        Some(
            ReadDirective::new("user:{Id}")
                .region("users")
                .ttl(Duration::from_secs(60))
                .into(),
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct UpdateUser {
    id: u64,
    name: String,
}

impl Cacheable for UpdateUser {
    fn cache_directive() -> Option<CacheDirective> {
        Some(InvalidateDirective::region("users").into())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct User {
    id: u64,
    name: String,
}

struct UserDb {
    name: std::sync::Mutex<String>,
    loads: AtomicUsize,
}

impl UserDb {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            name: std::sync::Mutex::new("ana".to_string()),
            loads: AtomicUsize::new(0),
        })
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

async fn get_user(
    interceptor: &CacheInterceptor,
    db: &Arc<UserDb>,
    id: u64,
) -> Result<User, PipelineError> {
    let db = Arc::clone(db);
    interceptor
        .execute(GetUser { id }, move |request: GetUser| async move {
            db.loads.fetch_add(1, Ordering::SeqCst);
            let name = db.name.lock().expect("db lock").clone();
            Ok(User {
                id: request.id,
                name,
            })
        })
        .await
}

async fn update_user(
    interceptor: &CacheInterceptor,
    db: &Arc<UserDb>,
    id: u64,
    name: &str,
    fail: bool,
) -> Result<(), PipelineError> {
    let db = Arc::clone(db);
    interceptor
        .execute(
            UpdateUser {
                id,
                name: name.to_string(),
            },
            move |request: UpdateUser| async move {
                if fail {
                    return Err(PipelineError::message("unique constraint violated"));
                }
                *db.name.lock().expect("db lock") = request.name;
                Ok(())
            },
        )
        .await
}

fn interceptor() -> CacheInterceptor {
    CacheInterceptor::with_config(CacheConfig::default())
}

#[tokio::test]
async fn read_then_invalidate_region_recomputes() {
    let interceptor = interceptor();
    let db = UserDb::new();

    let first = get_user(&interceptor, &db, 42).await.expect("loads");
    assert_eq!(first.name, "ana");
    assert!(interceptor.store().contains("user:42"));

    let second = get_user(&interceptor, &db, 42).await.expect("cached");
    assert_eq!(second, first);
    assert_eq!(db.loads(), 1);

    interceptor.store().invalidate_region("users");
    get_user(&interceptor, &db, 42).await.expect("reloads");
    assert_eq!(db.loads(), 2);
}

#[tokio::test]
async fn successful_write_makes_reads_fresh() {
    let interceptor = interceptor();
    let db = UserDb::new();

    assert_eq!(get_user(&interceptor, &db, 1).await.expect("loads").name, "ana");
    assert_eq!(get_user(&interceptor, &db, 2).await.expect("loads").name, "ana");

    update_user(&interceptor, &db, 1, "bea", false)
        .await
        .expect("write succeeds");

    assert_eq!(get_user(&interceptor, &db, 1).await.expect("fresh").name, "bea");
    assert_eq!(get_user(&interceptor, &db, 2).await.expect("fresh").name, "bea");
    assert_eq!(db.loads(), 4);
}

#[tokio::test]
async fn failed_write_leaves_cache_untouched() {
    let interceptor = interceptor();
    let db = UserDb::new();
    get_user(&interceptor, &db, 42).await.expect("loads");

    let err = update_user(&interceptor, &db, 42, "bea", true)
        .await
        .expect_err("write fails");
    assert!(matches!(err, PipelineError::Handler(_)));

    assert_eq!(interceptor.store().region_version("users"), 0);
    assert!(interceptor.store().contains("user:42"));
    assert_eq!(get_user(&interceptor, &db, 42).await.expect("cached").name, "ana");
    assert_eq!(db.loads(), 1);
}

#[tokio::test]
async fn concurrent_identical_requests_run_handler_once() {
    let interceptor = interceptor();
    let db = UserDb::new();

    let results = join_all((0..16).map(|_| get_user(&interceptor, &db, 7))).await;

    assert_eq!(db.loads(), 1);
    for result in results {
        assert_eq!(
            result.expect("every caller gets the value"),
            User {
                id: 7,
                name: "ana".to_string()
            }
        );
    }
}

#[tokio::test]
async fn concurrent_callers_share_one_failure_and_next_call_retries() {
    let interceptor = interceptor();
    let attempts = Arc::new(AtomicUsize::new(0));

    let load = || {
        let attempts = Arc::clone(&attempts);
        interceptor.execute(GetUser { id: 9 }, move |_| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PipelineError::message("database unavailable"))
            } else {
                Ok(9_u64)
            }
        })
    };

    let results = join_all((0..8).map(|_| load())).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(
            result.expect_err("shared failure").to_string(),
            "handler failed: database unavailable"
        );
    }
    assert!(!interceptor.store().contains("user:9"));

    assert_eq!(load().await.expect("retried"), 9);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_directive_ttl() {
    let interceptor = interceptor();
    let db = UserDb::new();

    get_user(&interceptor, &db, 42).await.expect("loads");
    tokio::time::advance(Duration::from_secs(59)).await;
    get_user(&interceptor, &db, 42).await.expect("still cached");
    assert_eq!(db.loads(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!interceptor.store().contains("user:42"));
    get_user(&interceptor, &db, 42).await.expect("recomputed");
    assert_eq!(db.loads(), 2);
}

#[tokio::test]
async fn registering_types_validates_directives_up_front() {
    let interceptor = interceptor();
    interceptor.register::<GetUser>().expect("read directive compiles");
    interceptor
        .register::<UpdateUser>()
        .expect("invalidate directive compiles");
    assert_eq!(interceptor.directives().len(), 2);
}
