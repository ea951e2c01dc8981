use actix_web::body::{self, BoxBody, MessageBody};
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::http::{Method, StatusCode};
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse};
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry cap; reaching it culls the oldest third.
pub const MAX_ENTRIES: usize = 300;

#[derive(Clone)]
struct CachedPage {
    stored_at: Instant,
    headers: HeaderMap,
    body: Bytes,
}

/// Whole-response cache for GET requests keyed by path and query string.
///
/// Entries live for a fixed TTL and are never invalidated by writes; a page
/// can lag behind the database by up to `ttl`. Only 200 responses are kept.
#[derive(Clone)]
pub struct PageCache {
    ttl: Duration,
    store: Arc<DashMap<String, CachedPage>>,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, store: Arc::new(DashMap::new()) }
    }

    fn lookup(&self, key: &str) -> Option<CachedPage> {
        let hit = self.store.get(key).map(|e| e.value().clone())?;
        if hit.stored_at.elapsed() < self.ttl {
            return Some(hit);
        }
        self.store.remove(key);
        None
    }

    fn insert(&self, key: String, headers: HeaderMap, body: Bytes) {
        // sweep expired entries so distinct query strings cannot pile up
        let ttl = self.ttl;
        self.store.retain(|_, v| v.stored_at.elapsed() < ttl);
        if self.store.len() >= MAX_ENTRIES {
            self.cull();
        }
        self.store.insert(key, CachedPage { stored_at: Instant::now(), headers, body });
    }

    fn cull(&self) {
        let mut ages: Vec<(Instant, String)> =
            self.store.iter().map(|e| (e.value().stored_at, e.key().clone())).collect();
        ages.sort_unstable();
        let drop = (ages.len() / 3).max(1);
        for (_, key) in ages.into_iter().take(drop) {
            self.store.remove(&key);
        }
        tracing::debug!(dropped = drop, "page cache culled");
    }
}

impl<S, B> Transform<S, ServiceRequest> for PageCache
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = PageCacheMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PageCacheMiddleware { service: Rc::new(service), cache: self.clone() }))
    }
}

pub struct PageCacheMiddleware<S> {
    service: Rc<S>,
    cache: PageCache,
}

impl<S, B> Service<ServiceRequest> for PageCacheMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let cache = self.cache.clone();
        Box::pin(async move {
            if req.method() != Method::GET {
                return svc.call(req).await.map(ServiceResponse::map_into_boxed_body);
            }
            let key = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_default();

            if let Some(hit) = cache.lookup(&key) {
                tracing::debug!(%key, "page cache hit");
                let mut res = HttpResponse::with_body(StatusCode::OK, hit.body);
                *res.headers_mut() = hit.headers;
                return Ok(req.into_response(res.map_into_boxed_body()));
            }

            let res = svc.call(req).await?;
            if res.status() != StatusCode::OK {
                return Ok(res.map_into_boxed_body());
            }
            let (req, res) = res.into_parts();
            let (head, payload) = res.into_parts();
            let bytes = body::to_bytes(payload).await.map_err(|e| {
                let e: Box<dyn std::error::Error> = e.into();
                actix_web::error::ErrorInternalServerError(e.to_string())
            })?;
            tracing::debug!(%key, size = bytes.len(), "page cache store");
            cache.insert(key, head.headers().clone(), bytes.clone());
            let res = head.set_body(bytes).map_into_boxed_body();
            Ok(ServiceResponse::new(req, res))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};
    use std::sync::atomic::{AtomicUsize, Ordering};

    macro_rules! counting_app {
        ($ttl:expr, $hits:ident) => {{
            let counter = $hits.clone();
            test::init_service(
                App::new().service(
                    web::resource("/")
                        .wrap(PageCache::new($ttl))
                        .route(web::get().to(move || {
                            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            async move { HttpResponse::Ok().content_type("text/html").body(format!("render {n}")) }
                        })),
                ),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn serves_stale_copy_within_ttl() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_app!(Duration::from_secs(20), hits);
        let first = test::call_and_read_body(&app, test::TestRequest::get().uri("/").to_request()).await;
        let second = test::call_and_read_body(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // query string is part of the key
        let other = test::call_and_read_body(&app, test::TestRequest::get().uri("/?page=2").to_request()).await;
        assert_eq!(other, Bytes::from_static(b"render 2"));
    }

    #[actix_web::test]
    async fn cached_response_keeps_headers() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_app!(Duration::from_secs(20), hits);
        let _ = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.headers().get("content-type").unwrap(), "text/html");
    }

    #[actix_web::test]
    async fn expires_after_ttl() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = counting_app!(Duration::from_millis(30), hits);
        let _ = test::call_and_read_body(&app, test::TestRequest::get().uri("/").to_request()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(body, Bytes::from_static(b"render 2"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[core::prelude::v1::test]
    fn entry_count_is_bounded() {
        let cache = PageCache::new(Duration::from_secs(60));
        assert!(cache.store.is_empty());
        for i in 0..(3 * MAX_ENTRIES) {
            cache.insert(format!("/?x={i}"), HeaderMap::new(), Bytes::from_static(b"x"));
            assert!(cache.store.len() <= MAX_ENTRIES);
        }
        // the newest page survives a cull, the oldest does not
        assert!(cache.lookup(&format!("/?x={}", 3 * MAX_ENTRIES - 1)).is_some());
        assert!(cache.lookup("/?x=0").is_none());
    }
}
