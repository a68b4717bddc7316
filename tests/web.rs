//! In-process tests for the web layer.
//!
//! The router runs against a real SQLite log in a temp dir, with fixed
//! retrieval and generation implementations standing in for the hosted
//! models.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;
use tutor_chat::classify::PromptType;
use tutor_chat::config::Config;
use tutor_chat::logstore::LogStore;
use tutor_chat::models::{GeneratedAnswer, NewLogEntry, TIMESTAMP_FORMAT};
use tutor_chat::server::{router, AppState};
use tutor_chat::traits::{AnswerGenerator, AnswerRequest, ContextRetriever};
use tutor_chat::{auth, db, migrate};

const PASSWORD: &str = "N4nd@M4c#2025";

// ─── Stubs ──────────────────────────────────────────────────────────

struct FixedRetriever;

#[async_trait]
impl ContextRetriever for FixedRetriever {
    async fn retrieve(&self, _question: &str) -> Result<String> {
        Ok("Aula 3: reciprocidade".to_string())
    }
}

/// What the generator was asked, per call.
#[derive(Debug, Clone)]
struct SeenRequest {
    question: String,
    history_len: usize,
    prompt_type: PromptType,
    is_first_question: bool,
}

#[derive(Default)]
struct RecordingGenerator {
    seen: Mutex<Vec<SeenRequest>>,
}

impl RecordingGenerator {
    fn last(&self) -> SeenRequest {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    async fn generate(&self, request: AnswerRequest<'_>) -> Result<GeneratedAnswer> {
        self.seen.lock().unwrap().push(SeenRequest {
            question: request.question.to_string(),
            history_len: request.history.len(),
            prompt_type: request.prompt_type,
            is_first_question: request.is_first_question,
        });
        Ok(GeneratedAnswer {
            markdown: format!("**Resposta** sobre: {}", request.question),
            quick_replies: vec!["Novo Tema".to_string()],
            progress: 30,
        })
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct TestApp {
    _tmp: TempDir,
    app: Router,
    store: LogStore,
    generator: Arc<RecordingGenerator>,
}

fn test_config(tmp: &TempDir, admins: &[&str]) -> Config {
    let root = tmp.path();
    let admins = admins
        .iter()
        .map(|a| format!("\"{}\"", a))
        .collect::<Vec<_>>()
        .join(", ");
    let toml_str = format!(
        r#"
[db]
path = "{root}/logs.sqlite"

[index]
dir = "{root}/storage"
transcript = "{root}/transcricoes.txt"

[auth]
username = "aluno1"
password_hash = "{hash}"
secret_key = "web-test-secret-0123456789abcdef"
admin_users = [{admins}]

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display(),
        hash = auth::hash_password(PASSWORD).unwrap(),
        admins = admins,
    );
    toml::from_str(&toml_str).unwrap()
}

async fn spawn_app(admins: &[&str]) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, admins);
    config.validate().unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = LogStore::new(pool);

    let generator = Arc::new(RecordingGenerator::default());
    let state = AppState::new(
        config,
        store.clone(),
        Arc::new(FixedRetriever),
        generator.clone(),
    )
    .unwrap();

    TestApp {
        _tmp: tmp,
        app: router(state),
        store,
        generator,
    }
}

fn form(pairs: &[(&str, &str)]) -> String {
    serde_urlencoded::to_string(pairs).unwrap()
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, body: String, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(c) = cookie {
            builder = builder.header(header::COOKIE, c);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Log in and return the `token=...` cookie pair.
    async fn login(&self) -> String {
        let resp = self
            .post_form(
                "/login",
                form(&[("username", "aluno1"), ("password", PASSWORD)]),
                None,
            )
            .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let set_cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn ask(&self, cookie: &str, pairs: &[(&str, &str)]) -> Response<Body> {
        self.post_form("/ask", form(pairs), Some(cookie)).await
    }
}

async fn body_text(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(resp: &Response<Body>) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

fn entry(user: &str, question: &str, ts: &str) -> NewLogEntry {
    NewLogEntry {
        username: user.to_string(),
        question: question.to_string(),
        answer: "<p>ok</p>".to_string(),
        context: String::new(),
        prompt_type: "general".to_string(),
        module: Some("M1".to_string()),
        lesson: None,
        created_at: Some(NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap()),
    }
}

// ─── Login ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_root_redirects_to_login() {
    let t = spawn_app(&["aluno1"]).await;
    let resp = t.get("/", None).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");
}

#[tokio::test]
async fn test_login_success_sets_cookie_and_redirects() {
    let t = spawn_app(&["aluno1"]).await;
    let resp = t
        .post_form(
            "/login",
            form(&[("username", "aluno1"), ("password", PASSWORD)]),
            None,
        )
        .await;

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/chat");
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn test_login_failure_shows_error_without_cookie() {
    let t = spawn_app(&["aluno1"]).await;
    let resp = t
        .post_form(
            "/login",
            form(&[("username", "aluno1"), ("password", "wrong")]),
            None,
        )
        .await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    let body = body_text(resp).await;
    assert!(body.contains("Usuário ou senha inválidos."));
}

#[tokio::test]
async fn test_protected_pages_redirect_without_session() {
    let t = spawn_app(&["aluno1"]).await;
    for uri in ["/chat", "/logs", "/dashboard"] {
        let resp = t.get(uri, None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{}", uri);
        assert_eq!(location(&resp), "/login");
    }

    let resp = t.get("/chat", Some("token=not.a.token")).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;
    let resp = t.get("/logout", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/login");
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("Max-Age=0"));
}

// ─── Ask ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_page_renders_for_session() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;
    let resp = t.get("/chat", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("Olá, aluno1!"));
    assert!(body.contains("Ver Exemplo de Plano"));
}

#[tokio::test]
async fn test_ask_without_question_redirects_and_logs_nothing() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;

    let resp = t.ask(&cookie, &[("history", "[]")]).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/chat");

    let resp = t.ask(&cookie, &[("question", "   ")]).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    assert_eq!(t.store.count().await.unwrap(), 0);
    assert!(t.generator.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_ask_logs_one_row_and_renders_answer() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;

    let resp = t
        .ask(
            &cookie,
            &[
                ("question", "Como aplicar a reciprocidade?"),
                ("history", "[]"),
                ("module", "M2"),
                ("lesson", ""),
            ],
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("<strong>Resposta</strong>"));
    assert!(body.contains("Novo Tema"));

    let rows = t.store.all().await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.username, "aluno1");
    assert_eq!(row.question, "Como aplicar a reciprocidade?");
    assert!(row.answer.starts_with("<p><strong>Resposta</strong>"));
    assert_eq!(row.context.as_deref(), Some("Aula 3: reciprocidade"));
    assert_eq!(row.prompt_type.as_deref(), Some("general"));
    assert_eq!(row.module.as_deref(), Some("M2"));
    assert_eq!(row.lesson, None);
    assert_eq!(t.store.count_health_plan().await.unwrap(), 0);

    let seen = t.generator.last();
    assert!(seen.is_first_question);
    assert_eq!(seen.history_len, 0);
}

#[tokio::test]
async fn test_health_plan_question_writes_side_log() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;

    let resp = t
        .ask(&cookie, &[("question", "Como monto um Health Plan?")])
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert_eq!(t.store.count().await.unwrap(), 1);
    assert_eq!(t.store.count_health_plan().await.unwrap(), 1);
    assert_eq!(t.generator.last().prompt_type, PromptType::HealthPlan);
}

#[tokio::test]
async fn test_history_is_carried_and_malformed_history_ignored() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;

    let history = r#"[{"question": "oi", "answer": "<p>olá</p>"}, {"question": "e aí", "answer": "<p>tudo</p>"}]"#;
    t.ask(&cookie, &[("question", "Próxima dúvida"), ("history", history)])
        .await;
    let seen = t.generator.last();
    assert_eq!(seen.history_len, 2);
    assert!(!seen.is_first_question);

    let resp = t
        .ask(&cookie, &[("question", "Outra dúvida"), ("history", "{broken")])
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let seen = t.generator.last();
    assert_eq!(seen.question, "Outra dúvida");
    assert_eq!(seen.history_len, 0);
    assert!(seen.is_first_question);
    assert_eq!(t.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_chip_question_is_not_first_question() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;

    t.ask(&cookie, &[("question", "Modelo no Canva")]).await;
    let seen = t.generator.last();
    assert!(!seen.is_first_question);
    assert_eq!(seen.prompt_type, PromptType::Template);
}

// ─── Logs and dashboard ─────────────────────────────────────────────

#[tokio::test]
async fn test_logs_csv_header_matches_columns() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;
    t.store
        .append(&entry("aluno1", "primeira", "2025-03-01T10:00:00"))
        .await
        .unwrap();

    let resp = t.get("/logs", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("logs.csv"));
    let body = body_text(resp).await;
    let mut lines = body.lines();
    assert_eq!(
        lines.next().unwrap(),
        "id,username,question,answer,context,prompt_type,module,lesson,created_at"
    );
    assert!(lines.next().unwrap().starts_with("1,aluno1,primeira,"));
}

#[tokio::test]
async fn test_dashboard_filters_are_conjunctive() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;
    for e in [
        entry("aluno1", "antes do periodo", "2025-02-28T23:00:00"),
        entry("aluno1", "dentro do periodo", "2025-03-02T08:00:00"),
        entry("aluno2", "outro usuario", "2025-03-02T09:00:00"),
        entry("aluno1", "ultimo dia", "2025-03-03T23:59:59"),
        entry("aluno1", "depois do periodo", "2025-03-04T00:00:00"),
    ] {
        t.store.append(&e).await.unwrap();
    }

    let resp = t
        .get(
            "/dashboard/export?usuario=aluno1&data_inicio=2025-03-01&data_fim=2025-03-03",
            Some(&cookie),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    let questions: Vec<&str> = body
        .lines()
        .skip(1)
        .map(|l| l.split(',').nth(2).unwrap())
        .collect();
    assert_eq!(questions, vec!["ultimo dia", "dentro do periodo"]);

    let resp = t
        .get("/dashboard?usuario=aluno2&modulo=&palavra=", Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_text(resp).await;
    assert!(body.contains("outro usuario"));
    assert!(!body.contains("dentro do periodo"));
    assert!(body.contains("/dashboard/export?usuario=aluno2"));
    assert!(body.contains("Limpar filtros"));

    // blank parameters count as no filter
    let resp = t
        .get("/dashboard?usuario=&modulo=&data_fim=", Some(&cookie))
        .await;
    let body = body_text(resp).await;
    assert!(body.contains("depois do periodo"));
    assert!(!body.contains("Limpar filtros"));
}

#[tokio::test]
async fn test_dashboard_rejects_malformed_date() {
    let t = spawn_app(&["aluno1"]).await;
    let cookie = t.login().await;
    let resp = t
        .get("/dashboard?data_inicio=03%2F01%2F2025", Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let html = body_text(resp).await;
    assert!(html.contains("<h2>400 Bad Request</h2>"));
    assert!(html.contains("data_inicio"));
    assert!(html.contains(r#"href="/chat""#));
    let resp = t
        .get("/dashboard/export?data_fim=amanha", Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dashboard_forbidden_for_non_admin() {
    let t = spawn_app(&["prof"]).await;
    let cookie = t.login().await;

    let resp = t.get("/dashboard", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let html = body_text(resp).await;
    assert!(html.contains("<h2>403 Forbidden</h2>"));
    assert!(html.contains("Acesso restrito a administradores."));
    assert!(html.contains("Assistente do Curso"));
    let resp = t.get("/dashboard/export", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // non-admins still reach the chat and the raw log export
    let resp = t.get("/logs", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health() {
    let t = spawn_app(&["aluno1"]).await;
    let resp = t.get("/health", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}
