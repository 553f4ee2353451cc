use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use pinboard::auth::Accounts;
use pinboard::openapi::ApiDoc;
use pinboard::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use pinboard::repo::Repo;
use pinboard::storage::build_image_store;
use pinboard::{config, AppConfig, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // `pinboard hash-password` reads a password on stdin and prints an ADMIN_ACCOUNTS hash
    if std::env::args().nth(1).as_deref() == Some("hash-password") {
        let mut password = String::new();
        std::io::stdin().read_line(&mut password)?;
        println!("{}", pinboard::auth::hash_password(password.trim_end_matches(['\r', '\n'])));
        return Ok(());
    }

    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping pinboard server");

    let cfg = AppConfig::from_env();
    tokio::fs::create_dir_all(&cfg.data_dir).await?;
    info!(
        public_base_url = %cfg.public_base_url,
        auto_flag_threshold = cfg.auto_flag_threshold,
        max_upload_bytes = cfg.max_upload_bytes,
        "configuration loaded"
    );

    let repo = build_repo(&cfg).await?;
    let image_store = build_image_store(&cfg.data_dir).await?;
    let accounts = Accounts::from_env();
    if accounts.is_empty() {
        warn!("ADMIN_ACCOUNTS is empty; dashboard login is disabled");
    }
    let rate_limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(true), RateLimitConfig::from_env());

    let state = AppState::new(repo, image_store)
        .with_config(cfg.clone())
        .with_accounts(accounts)
        .with_rate_limiter(rate_limiter);

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let frontend_url = cfg.frontend_url.clone();
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev servers for the dashboard and capture page
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.host.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.host, cfg.port);

    server.run().await?;
    Ok(())
}

/// Postgres when DATABASE_URL is set, otherwise the in-memory store
/// snapshotted under DATA_DIR.
async fn build_repo(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    #[cfg(feature = "postgres-store")]
    {
        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            use sqlx::postgres::PgPoolOptions;
            let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await?;
            let repo = pinboard::repo::pg::PgRepo::new(pool);
            repo.migrate().await?;
            info!("Using Postgres repository backend");
            return Ok(Arc::new(repo));
        }
    }

    #[cfg(feature = "inmem-store")]
    let repo: anyhow::Result<Arc<dyn Repo>> = {
        let path = cfg.data_dir.join("state.json");
        info!(path = %path.display(), "Using in-memory repository backend");
        Ok(Arc::new(pinboard::repo::inmem::InMemRepo::with_snapshot(path)))
    };
    #[cfg(not(feature = "inmem-store"))]
    let repo: anyhow::Result<Arc<dyn Repo>> = {
        let _ = cfg;
        Err(anyhow::anyhow!("DATABASE_URL must be set when the inmem-store feature is disabled"))
    };
    repo
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    let required = ["JWT_SECRET"];
    let missing: Vec<_> = required.iter().filter(|v| env::var(v).is_err()).collect();
    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {:?}", missing);
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    if env::var("ADMIN_ACCOUNTS").is_err() {
        eprintln!("Warning: ADMIN_ACCOUNTS not set; nobody can sign in to the dashboard");
    }
}
