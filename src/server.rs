//! Web layer.
//!
//! Stitches the pipeline together per question:
//! auth → classify → retrieve context → generate → render markdown → log →
//! render page. Dashboard routes only read the log.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Redirect to `/login` |
//! | `GET`  | `/login` | Login form |
//! | `POST` | `/login` | Verify credentials, set the session cookie |
//! | `GET`  | `/logout` | Clear the session cookie |
//! | `GET`  | `/chat` | Empty conversation |
//! | `POST` | `/ask` | Answer one question, log it, render the conversation |
//! | `GET`  | `/logs` | Every log row as CSV |
//! | `GET`  | `/dashboard` | Filtered log report (admins) |
//! | `GET`  | `/dashboard/export` | Filtered log rows as CSV (admins) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Unauthenticated requests to protected pages are redirected to `/login`.
//! Failures of the index, model or database surface as a generic 500 page;
//! details go to the log only.

use anyhow::Context;
use axum::{
    extract::{FromRequestParts, Query, RawQuery, State},
    http::{header, request::Parts, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use minijinja::context;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tower_http::trace::TraceLayer;

use crate::auth::{cookie_value, Authenticator, SESSION_COOKIE};
use crate::classify::{classify, PromptType};
use crate::config::{self, Config};
use crate::db;
use crate::embedding::{EmbeddingProvider, OpenAIEmbedder};
use crate::generate::OpenAiGenerator;
use crate::index::TranscriptIndex;
use crate::logstore::{self, LogFilter, LogStore};
use crate::markdown;
use crate::migrate;
use crate::models::{HistoryTurn, LogEntry, NewLogEntry};
use crate::templates::Templates;
use crate::traits::{AnswerGenerator, AnswerRequest, ContextRetriever};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: LogStore,
    retriever: Arc<dyn ContextRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    auth: Arc<Authenticator>,
    templates: Arc<Templates>,
}

impl AppState {
    /// Assemble the state. Fails when the token secret is missing or too short.
    pub fn new(
        config: Config,
        store: LogStore,
        retriever: Arc<dyn ContextRetriever>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> anyhow::Result<Self> {
        let auth = Authenticator::from_config(&config.auth)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            retriever,
            generator,
            auth: Arc::new(auth),
            templates: Arc::new(Templates::new()?),
        })
    }
}

/// Build the router for `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/login", get(handle_login_page).post(handle_login))
        .route("/logout", get(handle_logout))
        .route("/chat", get(handle_chat))
        .route("/ask", axum::routing::post(handle_ask))
        .route("/logs", get(handle_logs_csv))
        .route("/dashboard", get(handle_dashboard))
        .route("/dashboard/export", get(handle_dashboard_export))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the web server.
///
/// Requires `OPENAI_API_KEY` and a built transcript index; both are checked
/// before the listener is bound. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let api_key = config::openai_api_key()?;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(OpenAIEmbedder::new(&config.embedding, api_key.clone())?);
    let index = TranscriptIndex::load(config, embedder).await?;

    let generator = OpenAiGenerator::new(&config.llm, api_key)?;
    let state = AppState::new(
        config.clone(),
        LogStore::new(pool),
        Arc::new(index),
        Arc::new(generator),
    )?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    println!("Tutor listening on http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}

// ============ Error response ============

/// Error page returned by handlers.
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: "Acesso restrito a administradores.".to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Ocorreu um erro inesperado. Tente novamente em instantes.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let page = error_pages().and_then(|templates| {
            templates
                .render(
                    "error.html",
                    context! { status => self.status.to_string(), message => &self.message },
                )
                .map_err(|e| tracing::warn!(error = ?e, "error page failed to render"))
                .ok()
        });
        match page {
            Some(html) => (self.status, Html(html)).into_response(),
            None => (self.status, self.message).into_response(),
        }
    }
}

/// Error pages are rendered outside of any handler, so they use their own
/// environment instead of the one in [`AppState`].
fn error_pages() -> Option<&'static Templates> {
    static PAGES: OnceLock<Option<Templates>> = OnceLock::new();
    PAGES
        .get_or_init(|| {
            Templates::new()
                .map_err(|e| tracing::error!(error = ?e, "error templates failed to compile"))
                .ok()
        })
        .as_ref()
}

// ============ Session extractors ============

/// The authenticated caller. Missing or invalid sessions redirect to `/login`.
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, SESSION_COOKIE)
            .ok_or_else(|| Redirect::to("/login").into_response())?;

        match state.auth.verify_token(token) {
            Ok(claims) => Ok(CurrentUser(claims.sub)),
            Err(e) => {
                tracing::debug!(error = %e, "rejected session token");
                Err(Redirect::to("/login").into_response())
            }
        }
    }
}

/// A caller listed in `auth.admin_users`. Other users get 403.
pub struct AdminUser(pub String);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(username) = CurrentUser::from_request_parts(parts, state).await?;
        if state.auth.is_admin(&username) {
            Ok(AdminUser(username))
        } else {
            tracing::warn!(user = %username, "non-admin tried to open the dashboard");
            Err(AppError::forbidden().into_response())
        }
    }
}

// ============ Login ============

async fn handle_index() -> Redirect {
    Redirect::to("/login")
}

async fn handle_login_page(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let html = state.templates.render("login.html", context! {})?;
    Ok(Html(html))
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let username = form.username.trim();

    if !state.auth.authenticate(username, &form.password) {
        tracing::warn!(user = %username, "failed login");
        let html = state.templates.render(
            "login.html",
            context! {
                error => "Usuário ou senha inválidos.",
                attempted_username => username,
            },
        )?;
        return Ok((StatusCode::UNAUTHORIZED, Html(html)).into_response());
    }

    let token = state.auth.issue_token(username)?;
    tracing::info!(user = %username, "login");
    Ok((
        [(header::SET_COOKIE, state.auth.session_cookie(&token))],
        Redirect::to("/chat"),
    )
        .into_response())
}

async fn handle_logout(State(state): State<AppState>) -> Response {
    (
        [(header::SET_COOKIE, state.auth.clear_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

// ============ Chat ============

#[derive(Serialize)]
struct ChatPage<'a> {
    username: &'a str,
    history: &'a [HistoryTurn],
    chips: &'a [String],
    progress: u8,
    module: Option<&'a str>,
    lesson: Option<&'a str>,
}

async fn handle_chat(
    State(state): State<AppState>,
    CurrentUser(username): CurrentUser,
) -> Result<Html<String>, AppError> {
    let html = state.templates.render(
        "chat.html",
        ChatPage {
            username: &username,
            history: &[],
            chips: &state.config.chat.chips,
            progress: 0,
            module: None,
            lesson: None,
        },
    )?;
    Ok(Html(html))
}

#[derive(Deserialize)]
struct AskForm {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    history: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    lesson: Option<String>,
}

/// Parse the page-carried history. Anything malformed becomes an empty history.
fn parse_history(raw: Option<&str>) -> Vec<HistoryTurn> {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return Vec::new(),
    };
    match serde_json::from_str(raw) {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(error = %e, "discarding malformed conversation history");
            Vec::new()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn handle_ask(
    State(state): State<AppState>,
    CurrentUser(username): CurrentUser,
    Form(form): Form<AskForm>,
) -> Result<Response, AppError> {
    let question = match non_empty(form.question) {
        Some(q) => q,
        None => return Ok(Redirect::to("/chat").into_response()),
    };
    let module = non_empty(form.module);
    let lesson = non_empty(form.lesson);
    let mut history = parse_history(form.history.as_deref());

    let chips = &state.config.chat.chips;
    let offered = history.last().map(|t| t.quick_replies.as_slice()).unwrap_or(&[]);
    let is_chip = chips.iter().chain(offered).any(|c| c == &question);
    let is_first_question = history.is_empty() && !is_chip;
    let prompt_type = classify(&question);

    let context = state.retriever.retrieve(&question).await?;
    let generated = state
        .generator
        .generate(AnswerRequest {
            question: &question,
            context: &context,
            history: &history,
            prompt_type,
            is_first_question,
        })
        .await?;
    let answer_html = markdown::render(&generated.markdown);

    let id = state
        .store
        .append(&NewLogEntry {
            username: username.clone(),
            question: question.clone(),
            answer: answer_html.clone(),
            context,
            prompt_type: prompt_type.as_str().to_string(),
            module: module.clone(),
            lesson: lesson.clone(),
            created_at: None,
        })
        .await?;
    if prompt_type == PromptType::HealthPlan {
        state.store.record_health_plan(&username, &question).await?;
    }
    tracing::info!(
        id,
        user = %username,
        prompt_type = %prompt_type,
        chip = is_chip,
        "question answered"
    );

    let quick_replies = if generated.quick_replies.is_empty() {
        chips.clone()
    } else {
        generated.quick_replies.clone()
    };
    history.push(HistoryTurn {
        question: question.clone(),
        answer: answer_html,
        quick_replies: generated.quick_replies,
        chip: is_chip.then(|| question.clone()),
        progress: generated.progress,
    });

    let html = state.templates.render(
        "chat.html",
        ChatPage {
            username: &username,
            history: &history,
            chips: &quick_replies,
            progress: generated.progress,
            module: module.as_deref(),
            lesson: lesson.as_deref(),
        },
    )?;
    Ok(Html(html).into_response())
}

// ============ Logs and dashboard ============

fn csv_response(rows: &[LogEntry], filename: &str) -> Result<Response, AppError> {
    let body = logstore::to_csv(rows)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

async fn handle_logs_csv(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Result<Response, AppError> {
    let rows = state.store.all().await?;
    csv_response(&rows, "logs.csv")
}

fn check_filter(filter: &LogFilter) -> Result<(), AppError> {
    filter
        .date_bounds()
        .map(|_| ())
        .map_err(|e| AppError::bad_request(e.to_string()))
}

async fn handle_dashboard(
    State(state): State<AppState>,
    AdminUser(username): AdminUser,
    Query(filter): Query<LogFilter>,
    RawQuery(query): RawQuery,
) -> Result<Html<String>, AppError> {
    check_filter(&filter)?;
    let rows = state.store.filtered(&filter).await?;
    let summary = state.store.summary(&filter).await?;

    let html = state.templates.render(
        "dashboard.html",
        context! {
            username => username,
            filtered => !filter.is_empty(),
            filter => filter,
            query => query,
            summary => summary,
            rows => rows,
        },
    )?;
    Ok(Html(html))
}

async fn handle_dashboard_export(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(filter): Query<LogFilter>,
) -> Result<Response, AppError> {
    check_filter(&filter)?;
    let rows = state.store.filtered(&filter).await?;
    csv_response(&rows, "logs_export.csv")
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
