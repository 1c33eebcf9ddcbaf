use crate::embeddings::Embedder;
use crate::index::VerseStore;
use crate::rag::{QueryOutcome, QueryPipeline};
use anyhow::{Context, Result};
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use std::env;
use std::sync::Arc;

/// Configuration for the web form
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub title: String,
    /// Address under which a tunnel publishes the local port
    pub public_url: Option<String>,
}

impl ServerConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(port) => port.parse().context("PORT must be a port number")?,
            Err(_) => 7860,
        };
        let title = env::var("APP_TITLE").unwrap_or_else(|_| "Sutra saradhi".to_string());
        let public_url = env::var("PUBLIC_URL").ok();

        Ok(ServerConfig {
            host,
            port,
            title,
            public_url,
        })
    }
}

/// Form and API payload
#[derive(Debug, Deserialize)]
pub struct QueryForm {
    pub query: String,
}

struct AppState<E, S> {
    pipeline: QueryPipeline<E, S>,
    title: String,
}

/// Build the router serving the form and the JSON endpoint
pub fn router<E, S>(pipeline: QueryPipeline<E, S>, title: impl Into<String>) -> Router
where
    E: Embedder + 'static,
    S: VerseStore + 'static,
{
    let state = Arc::new(AppState {
        pipeline,
        title: title.into(),
    });

    Router::new()
        .route("/", get(show_form::<E, S>).post(submit_form::<E, S>))
        .route("/api/query", post(query_api::<E, S>))
        .with_state(state)
}

/// Serve until the process is stopped
pub async fn serve<E, S>(config: ServerConfig, pipeline: QueryPipeline<E, S>) -> Result<()>
where
    E: Embedder + 'static,
    S: VerseStore + 'static,
{
    let address = format!("{}:{}", config.host, config.port);
    let app = router(pipeline, config.title.clone());

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!("Serving {} on http://{}", config.title, address);
    if let Some(public_url) = &config.public_url {
        println!("Public URL: {}", public_url);
    }

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn show_form<E, S>(State(state): State<Arc<AppState<E, S>>>) -> Html<String>
where
    E: Embedder,
    S: VerseStore,
{
    Html(render_page(&state.title, "", None))
}

async fn submit_form<E, S>(
    State(state): State<Arc<AppState<E, S>>>,
    Form(form): Form<QueryForm>,
) -> Response
where
    E: Embedder,
    S: VerseStore,
{
    match state.pipeline.answer(&form.query).await {
        Ok(outcome) => {
            Html(render_page(&state.title, &form.query, Some(&outcome.render()))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn query_api<E, S>(
    State(state): State<Arc<AppState<E, S>>>,
    Json(form): Json<QueryForm>,
) -> Response
where
    E: Embedder,
    S: VerseStore,
{
    match state.pipeline.answer(&form.query).await {
        Ok(outcome) => Json::<QueryOutcome>(outcome).into_response(),
        Err(e) => internal_error(e),
    }
}

const INTERNAL_ERROR_BODY: &str = "Something went wrong while answering. Please try again.";

/// Details stay in the log, the public body is fixed
fn internal_error(e: anyhow::Error) -> Response {
    error!("Query failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY).into_response()
}

fn render_page(title: &str, query: &str, output: Option<&str>) -> String {
    let title = escape_html(title);
    let output = output
        .map(|text| format!("<pre>{}</pre>", escape_html(text)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<h1>{title}</h1>
<form method="post" action="/">
<input type="text" name="query" value="{query}" size="80" autofocus>
<button type="submit">Submit</button>
</form>
{output}
</body>
</html>
"#,
        title = title,
        query = escape_html(query),
        output = output
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
