//! Minimal sluice example: JSON endpoints, sessions, permissions and files.
//!
//! Run with:
//!   RUST_LOG=info,sluice=debug cargo run --example basic [config.toml]
//!
//! Try:
//!   curl http://localhost:8080/users/42
//!   curl -c jar -b jar http://localhost:8080/visits
//!   curl -X POST http://localhost:8080/users -d 'name=alice'                 # 401
//!   curl -X POST http://localhost:8080/users -H 'x-token: root' -d 'name=alice'
//!   curl -u admin:secret http://localhost:8080/admin/stats
//!   curl -H 'range: bytes=0-99' http://localhost:8080/files/Cargo.toml

use std::sync::Arc;

use http::StatusCode;
use sluice::{
    Config, Content, Context, Dispatcher, HttpError, MemoryStore, Outcome, Principal, RequestView,
    Response, Router, Server, SessionManager, chain, fail, middleware,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).expect("loading config"),
        None => Config::default(),
    };

    let mut api = Router::new()
        .middleware(middleware::header("x-served-by", "sluice"))
        .middleware(middleware::acl_auth(token_auth));
    if let Some(cors) = config.cors.clone() {
        api = api.middleware(middleware::cors(cors));
    }
    let api = api
        .query("users/:id", get_user)
        .query("visits", visits)
        .query("files/*name", serve_file)
        .mutation_chain("users", chain![middleware::acl(["users:write"]), create_user]);

    let admin = Router::with_prefix("admin")
        .middleware(middleware::basic_auth("sluice admin", |name, password| {
            Ok(name == "admin" && password == "secret")
        }))
        .query("stats", stats);

    let app = Dispatcher::from_config(&config.dispatch)
        .sessions(SessionManager::new(Arc::new(MemoryStore::new())))
        .mount(api)
        .mount(admin)
        .build();

    Server::from_config(&config.server)
        .serve(app)
        .await
        .expect("server error");
}

struct Root;

impl Principal for Root {
    fn permissions(&self) -> &[String] {
        static GRANTED: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
        GRANTED.get_or_init(|| vec!["users:write".to_owned()])
    }
}

// x-token: root → a principal allowed to create users.
fn token_auth(view: &RequestView<'_>) -> Result<Option<Arc<dyn Principal>>, HttpError> {
    match view.header("x-token") {
        None => Ok(None),
        Some("root") => Ok(Some(Arc::new(Root))),
        Some(_) => Err(HttpError::new(StatusCode::FORBIDDEN, "unknown token")),
    }
}

// GET /users/:id
fn get_user(ctx: &mut Context) -> Result<Response, HttpError> {
    let id: u64 = ctx
        .param("id")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "id must be a number"))?;
    Ok(Response::json(serde_json::json!({ "id": id, "name": "alice" }).to_string()))
}

// POST /users (form body)
fn create_user(ctx: &mut Context) -> Outcome {
    let Some(name) = ctx.form().value("name").map(str::to_owned) else {
        return fail(StatusCode::BAD_REQUEST, "name is required");
    };
    Outcome::Rendered(
        Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/99")
            .json(serde_json::json!({ "id": 99, "name": name }).to_string()),
    )
}

// GET /visits: a per-client counter kept in the session.
fn visits(ctx: &mut Context) -> Result<String, HttpError> {
    let mut session = ctx.session()?;
    let count = session.get::<u64>("visits")?.unwrap_or(0) + 1;
    session.set("visits", count)?;
    ctx.save_session(&session)?;
    Ok(format!("visit #{count}\n"))
}

// GET /files/*name, served from the working directory.
fn serve_file(ctx: &mut Context) -> Result<Content, HttpError> {
    let name = ctx.param("name").unwrap_or_default();
    if !is_relative_name(name) {
        return Err(HttpError::new(StatusCode::BAD_REQUEST, "bad path"));
    }
    Content::file(name)
}

fn is_relative_name(name: &str) -> bool {
    !name.starts_with('/') && !name.split('/').any(|segment| segment == "..")
}

// GET /admin/stats
fn stats(ctx: &mut Context) -> String {
    let user = ctx.basic_user().map(|u| u.name.as_str()).unwrap_or("?");
    format!("hello {user}\n")
}
