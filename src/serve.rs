//! Purpose: Provide the read-only HTTP/JSON API over the motorcycle catalog.
//! Exports: `ServeConfig`, `serve`, `validate_config`, `cors_layer`.
//! Role: Axum router; each handler runs one store query and normalizes the rows.
//! Invariants: Error bodies are always `{"error": "<message>"}`.
//! Invariants: Missing single listings are 404; empty lists are 200 with `[]`.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use motos_api::core::error::{Error, ErrorKind};
use motos_api::core::listing::{Listing, RawListing};
use motos_api::core::normalize::normalize;
use motos_api::core::store::ListingStore;

const API_VERSION: &str = "1.0";
const NOT_FOUND_MESSAGE: &str = "not found";
// Fixed value reported by /api/test; it is not derived from the table.
const PLACEHOLDER_TOTAL_MOTOS: u64 = 12;

const ROUTES: [(&str, &str); 5] = [
    ("/api/motos", "Todas las motos"),
    ("/api/motos/destacadas", "Motos destacadas"),
    ("/api/categorias", "Todas las categorías"),
    ("/api/motos/categoria/:nombre", "Motos por categoría"),
    ("/api/motos/:id", "Moto por ID"),
];

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub allow_non_loopback: bool,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Clone)]
struct AppState {
    store: ListingStore,
    database: String,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;
    let cors = cors_layer(&config.cors_allowed_origins)?;

    init_tracing();

    let store = ListingStore::open_read_only(&config.db_path)?;
    let state = Arc::new(AppState {
        store,
        database: database_label(&config.db_path),
    });

    let app = router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, db = %config.db_path.display(), "motos api listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutting down");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/test", get(api_test))
        .route("/api/motos", get(list_motos))
        .route("/api/motos/destacadas", get(list_featured))
        .route("/api/motos/categoria/:categoria", get(list_by_category))
        .route("/api/motos/:id", get(get_moto))
        .route("/api/categorias", get(list_categories))
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if !config.db_path.is_file() {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("database file not found")
            .with_path(&config.db_path)
            .with_hint(format!(
                "Create it with `motos-api init --db {}` or pass --db.",
                config.db_path.display()
            )));
    }

    Ok(())
}

/// Permissive when no origins are configured; otherwise an explicit allow-list.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, Error> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let mut allowed = Vec::with_capacity(origins.len());
    for origin in origins {
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --cors-origin: {origin}"))
                .with_hint("Use a full origin like https://shop.example.com."));
        }
        let value = HeaderValue::from_str(origin).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --cors-origin: {origin}"))
                .with_source(err)
        })?;
        allowed.push(value);
    }
    Ok(layer.allow_origin(AllowOrigin::list(allowed)))
}

fn database_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn with_store<T, F>(state: &AppState, query: F) -> Result<T, Error>
where
    F: FnOnce(&ListingStore) -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || query(&store))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("query task failed")
                .with_source(err)
        })?
}

#[derive(Debug, Serialize)]
struct RouteEntry {
    metodo: &'static str,
    ruta: &'static str,
    descripcion: &'static str,
}

async fn index(State(state): State<Arc<AppState>>) -> Response {
    let routes = ROUTES
        .iter()
        .map(|&(ruta, descripcion)| RouteEntry {
            metodo: "GET",
            ruta,
            descripcion,
        })
        .collect::<Vec<_>>();
    json_response(json!({
        "mensaje": "API Tienda de Motos",
        "version": API_VERSION,
        "base_datos": state.database,
        "rutas": routes,
    }))
}

async fn api_test() -> Response {
    json_response(json!({
        "status": "ok",
        "message": "API funcionando correctamente",
        "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).ok(),
        "total_motos": PLACEHOLDER_TOTAL_MOTOS,
    }))
}

async fn list_motos(State(state): State<Arc<AppState>>) -> Response {
    info!("GET /api/motos");
    let result = with_store(&state, |store| store.list_all()).await;
    listings_response(result, "motos")
}

async fn list_featured(State(state): State<Arc<AppState>>) -> Response {
    info!("GET /api/motos/destacadas");
    let result = with_store(&state, |store| store.list_featured()).await;
    listings_response(result, "featured motos")
}

async fn list_by_category(
    State(state): State<Arc<AppState>>,
    AxumPath(categoria): AxumPath<String>,
) -> Response {
    info!("GET /api/motos/categoria/{categoria}");
    let query_category = categoria.clone();
    let result = with_store(&state, move |store| store.list_by_category(&query_category)).await;
    listings_response(result, &format!("motos in category {categoria}"))
}

async fn list_categories(State(state): State<Arc<AppState>>) -> Response {
    info!("GET /api/categorias");
    match with_store(&state, |store| store.list_categories()).await {
        Ok(categories) => {
            info!(count = categories.len(), "sending categories");
            json_response(categories)
        }
        Err(err) => error_response(err),
    }
}

async fn get_moto(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    info!("GET /api/motos/{id}");
    // A non-integer id can never match a row.
    let Ok(id) = id.parse::<i64>() else {
        return error_response(not_found());
    };
    match with_store(&state, move |store| store.get_by_id(id)).await {
        Ok(Some(raw)) => {
            let listing = normalize(raw);
            info!(
                id = listing.id,
                "sending {} {}",
                listing.marca.as_deref().unwrap_or_default(),
                listing.modelo.as_deref().unwrap_or_default()
            );
            json_response(listing)
        }
        Ok(None) => error_response(not_found()),
        Err(err) => error_response(err),
    }
}

fn not_found() -> Error {
    Error::new(ErrorKind::NotFound).with_message(NOT_FOUND_MESSAGE)
}

fn listings_response(result: Result<Vec<RawListing>, Error>, label: &str) -> Response {
    match result {
        Ok(rows) => {
            let listings = rows.into_iter().map(normalize).collect::<Vec<Listing>>();
            info!(count = listings.len(), "sending {label}");
            json_response(listings)
        }
        Err(err) => error_response(err),
    }
}

fn json_response(payload: impl Serialize) -> Response {
    (StatusCode::OK, Json(payload)).into_response()
}

fn error_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Database | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(err: Error) -> Response {
    let status = error_status(err.kind());
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    let message = err.message().unwrap_or("error").to_string();
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::{
        AppState, ErrorKind, ServeConfig, api_test, cors_layer, error_status, get_moto, index,
        list_by_category, list_categories, list_featured, list_motos, validate_config,
    };
    use axum::extract::{Path as AxumPath, State};
    use axum::http::StatusCode;
    use axum::response::Response;
    use motos_api::core::store::{ListingStore, create_schema};
    use rusqlite::{Connection, params};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn state_with_rows(rows: &[(i64, &str, i64, &str)]) -> Arc<AppState> {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("schema");
        for (id, categoria, destacado, colores) in rows {
            conn.execute(
                "INSERT INTO motos (id, marca, modelo, categoria, destacado, precio, descuento, colores)
                 VALUES (?1, 'Marca', 'Modelo', ?2, ?3, '15000', 0, ?4)",
                params![id, categoria, destacado, colores],
            )
            .expect("insert");
        }
        Arc::new(AppState {
            store: ListingStore::from_connection(conn),
            database: "web_motos".to_string(),
        })
    }

    fn broken_state() -> Arc<AppState> {
        Arc::new(AppState {
            store: ListingStore::from_connection(Connection::open_in_memory().expect("open")),
            database: "web_motos".to_string(),
        })
    }

    async fn body_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn config(bind: &str, db_path: std::path::PathBuf) -> ServeConfig {
        ServeConfig {
            bind: bind.parse().expect("bind"),
            db_path,
            allow_non_loopback: false,
            cors_allowed_origins: Vec::new(),
        }
    }

    #[tokio::test]
    async fn list_motos_normalizes_rows() {
        let state = state_with_rows(&[(2, "sport", 0, "[\"red\"]"), (1, "touring", 1, "")]);
        let (status, body) = body_json(list_motos(State(state)).await).await;
        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().expect("array");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[0]["precio"], json!(15000.0));
        assert_eq!(items[0]["colores"], json!([]));
        assert_eq!(items[1]["colores"], json!(["red"]));
        assert_eq!(items[1]["especificaciones"], json!({}));
    }

    #[tokio::test]
    async fn featured_and_category_filters() {
        let state = state_with_rows(&[
            (1, "touring", 1, ""),
            (2, "sport", 0, ""),
            (3, "touring", 0, ""),
        ]);
        let (_, featured) = body_json(list_featured(State(state.clone())).await).await;
        assert_eq!(featured.as_array().map(Vec::len), Some(1));
        assert_eq!(featured[0]["id"], 1);
        assert_eq!(featured[0]["destacado"], json!(true));

        let (status, touring) = body_json(
            list_by_category(State(state.clone()), AxumPath("touring".to_string())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<i64> = touring
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|item| item["id"].as_i64())
            .collect();
        assert_eq!(ids, vec![1, 3]);

        let (status, empty) =
            body_json(list_by_category(State(state), AxumPath("enduro".to_string())).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(empty, json!([]));
    }

    #[tokio::test]
    async fn categories_are_distinct_and_sorted() {
        let state = state_with_rows(&[(1, "touring", 0, ""), (2, "touring", 0, ""), (3, "sport", 0, "")]);
        let (status, body) = body_json(list_categories(State(state)).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["sport", "touring"]));
    }

    #[tokio::test]
    async fn get_moto_found_and_missing() {
        let state = state_with_rows(&[(7, "sport", 1, "[\"black\"]")]);
        let (status, body) =
            body_json(get_moto(State(state.clone()), AxumPath("7".to_string())).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 7);
        assert_eq!(body["colores"], json!(["black"]));

        let (status, body) =
            body_json(get_moto(State(state.clone()), AxumPath("8".to_string())).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "not found" }));

        let (status, _) =
            body_json(get_moto(State(state), AxumPath("abc".to_string())).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_moto_requires_an_exact_integer_id() {
        let state = state_with_rows(&[(7, "sport", 1, "")]);
        for id in ["7abc", "7.0", " 7", "+7"] {
            let (status, body) =
                body_json(get_moto(State(state.clone()), AxumPath(id.to_string())).await).await;
            let expected = if id == "+7" {
                StatusCode::OK
            } else {
                StatusCode::NOT_FOUND
            };
            assert_eq!(status, expected, "{id:?}: {body}");
        }
    }

    #[tokio::test]
    async fn database_errors_become_500_with_message() {
        let (status, body) = body_json(list_motos(State(broken_state())).await).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"].as_str().expect("error message");
        assert!(message.contains("no such table"));

        let (status, _) = body_json(list_categories(State(broken_state())).await).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn index_lists_routes_and_test_reports_placeholder() {
        let (status, body) = body_json(index(State(state_with_rows(&[]))).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], "1.0");
        assert_eq!(body["base_datos"], "web_motos");
        assert_eq!(body["rutas"].as_array().expect("routes").len(), 5);
        assert_eq!(body["rutas"][0]["metodo"], "GET");

        let (status, body) = body_json(api_test().await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["total_motos"], 12);
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn error_kinds_map_to_status() {
        assert_eq!(error_status(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(error_status(ErrorKind::Usage), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_status(ErrorKind::Database),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn non_loopback_requires_allow_flag() {
        let temp = tempfile::NamedTempFile::new().expect("tempfile");
        let mut config = config("0.0.0.0:0", temp.path().to_path_buf());
        let err = validate_config(&config).expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);

        config.allow_non_loopback = true;
        validate_config(&config).expect("config ok");
    }

    #[test]
    fn missing_database_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config("127.0.0.1:0", temp.path().join("missing.db"));
        let err = validate_config(&config).expect_err("expected not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.hint().is_some());
    }

    #[test]
    fn cors_origins_must_be_full_origins() {
        assert!(cors_layer(&[]).is_ok());
        assert!(cors_layer(&["https://shop.example.com".to_string()]).is_ok());
        let err = cors_layer(&["shop.example.com".to_string()]).expect_err("bare host");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
