use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use blogfeed::repo::SharedRepo;
use blogfeed::storage::FsImageStore;
use blogfeed::{config, AppConfig, AppState, PageCache, SecurityHeaders};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!("Bootstrapping blogfeed");
    info!(
        media = %settings.media_dir.display(),
        cache_ttl_secs = settings.page_cache_ttl.as_secs(),
        hsts = settings.enable_hsts,
        "configuration loaded"
    );

    let repo = match build_repo(&settings).await {
        Ok(r) => r,
        Err(e) => {
            error!("repository setup failed: {e:#}");
            std::process::exit(1);
        }
    };
    let image_store = Arc::new(FsImageStore::new(settings.media_dir.clone()));
    // one cache for all workers
    let page_cache = PageCache::new(settings.page_cache_ttl);
    let security = SecurityHeaders::new(settings.enable_hsts);
    let bind_addr = settings.bind_addr.clone();
    let state = web::Data::new(AppState::new(repo, image_store, settings));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(security.clone())
            .app_data(state.clone())
            .configure(config(page_cache.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");

    server.run().await
}

#[cfg(feature = "postgres-store")]
async fn build_repo(settings: &AppConfig) -> anyhow::Result<SharedRepo> {
    use anyhow::Context;
    use sqlx::postgres::PgPoolOptions;

    let db_url = settings.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new().max_connections(5).connect_lazy(db_url).context("invalid DATABASE_URL")?;
    let repo = blogfeed::repo::pg::PgRepo::new(pool);
    repo.migrate().await.context("running migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(settings: &AppConfig) -> anyhow::Result<SharedRepo> {
    use blogfeed::repo::inmem::InMemRepo;

    let repo = match &settings.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using in-memory repository backend with snapshots");
            InMemRepo::with_snapshot(dir)
        }
        None => {
            info!("Using in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}
