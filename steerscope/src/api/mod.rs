//! HTTP API and pages for the Steer and Microscope dashboards
//!
//! Every browser tab gets its own dashboards. The id travels in the
//! `x-session-id` header; requests without a valid id are issued a new one.

mod session;

pub use session::{SessionStore, DEFAULT_SESSION_IDLE, SESSION_HEADER};

use crate::client::{FeatureCandidate, NeuronpediaApi};
use crate::dashboard::{MicroscopeCommand, MicroscopeDashboard, Notice, SteerCommand, SteerDashboard};
use crate::render::{render_inspection, render_transcript, ChatSide};
use crate::selection::FeatureSelection;
use crate::steering::SteeringParams;
use crate::tokenizer::Token;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use session::{new_session_id, valid_session_id};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// API state
pub struct ApiState {
    pub api: Arc<dyn NeuronpediaApi>,
    steer_model_id: String,
    steer: SessionStore<SteerDashboard>,
    microscope: SessionStore<MicroscopeDashboard>,
}

impl ApiState {
    pub fn new(api: Arc<dyn NeuronpediaApi>, steer_model_id: impl Into<String>) -> Self {
        Self::with_session_idle(api, steer_model_id, DEFAULT_SESSION_IDLE)
    }

    /// Sessions untouched for `idle` are dropped
    pub fn with_session_idle(
        api: Arc<dyn NeuronpediaApi>,
        steer_model_id: impl Into<String>,
        idle: Duration,
    ) -> Self {
        Self {
            api,
            steer_model_id: steer_model_id.into(),
            steer: SessionStore::new(idle),
            microscope: SessionStore::new(idle),
        }
    }

    async fn steer_session(&self, id: &str) -> Arc<Mutex<SteerDashboard>> {
        self.steer
            .get_or_create(id, || SteerDashboard::new(self.steer_model_id.clone()))
            .await
    }

    async fn microscope_session(&self, id: &str) -> Arc<Mutex<MicroscopeDashboard>> {
        self.microscope
            .get_or_create(id, MicroscopeDashboard::new)
            .await
    }

    /// Drop both dashboards of a session
    pub async fn end_session(&self, id: &str) -> bool {
        let steer = self.steer.remove(id).await;
        let microscope = self.microscope.remove(id).await;
        steer || microscope
    }
}

/// Session id from the request, or a fresh one
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| valid_session_id(id))
        .map(str::to_string)
        .unwrap_or_else(new_session_id)
}

/// JSON body plus the session id it belongs to
type SessionReply<T> = ([(&'static str, String); 1], Json<T>);

/// Steer dashboard snapshot
#[derive(Debug, Serialize)]
pub struct SteerView {
    pub notice: Option<Notice>,
    pub model_id: String,
    pub candidates: Vec<FeatureCandidate>,
    pub selections: Vec<FeatureSelection>,
    pub params: SteeringParams,
    /// Rendered default-model chat column
    pub default_chat_html: String,
    /// Rendered steered-model chat column
    pub steered_chat_html: String,
}

impl SteerView {
    fn from_dashboard(dashboard: &SteerDashboard, notice: Option<Notice>) -> Self {
        let session = dashboard.session();
        Self {
            notice,
            model_id: dashboard.model_id().to_string(),
            candidates: dashboard.selection().candidates().to_vec(),
            selections: dashboard.selection().selections().to_vec(),
            params: dashboard.params().clone(),
            default_chat_html: render_transcript(ChatSide::Default, session.default_transcript()),
            steered_chat_html: render_transcript(ChatSide::Steered, session.steered_transcript()),
        }
    }
}

/// Microscope dashboard snapshot
#[derive(Debug, Serialize)]
pub struct MicroscopeView {
    pub notice: Option<Notice>,
    pub sentence: String,
    pub tokens: Vec<Token>,
    pub selected_token: Option<String>,
    pub descriptions: Vec<String>,
    /// Logits, histograms and activations for the inspected explanation
    pub inspection_html: Option<String>,
}

impl MicroscopeView {
    fn from_dashboard(dashboard: &MicroscopeDashboard, notice: Option<Notice>) -> Self {
        let session = dashboard.session();
        Self {
            notice,
            sentence: session.sentence().to_string(),
            tokens: session.tokens().to_vec(),
            selected_token: session.selected_token().map(str::to_string),
            descriptions: session.descriptions().into_iter().map(str::to_string).collect(),
            inspection_html: session.inspection().map(render_inspection),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(steer_page))
        .route("/microscope", get(microscope_page))
        .route("/health", get(health_check))
        .route("/api/steer", get(steer_state).post(steer_command))
        .route("/api/microscope", get(microscope_state).post(microscope_command))
        .route("/api/session", delete(end_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn steer_state(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> SessionReply<SteerView> {
    let id = session_id(&headers);
    let session = state.steer_session(&id).await;
    let dashboard = session.lock().await;
    let view = SteerView::from_dashboard(&dashboard, dashboard.last_notice().cloned());
    ([(SESSION_HEADER, id)], Json(view))
}

/// Apply a steer command; remote calls finish before the response
async fn steer_command(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(command): Json<SteerCommand>,
) -> SessionReply<SteerView> {
    let id = session_id(&headers);
    let session = state.steer_session(&id).await;
    let mut dashboard = session.lock().await;
    let notice = dashboard.dispatch(state.api.as_ref(), command).await;
    let view = SteerView::from_dashboard(&dashboard, notice);
    ([(SESSION_HEADER, id)], Json(view))
}

async fn microscope_state(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> SessionReply<MicroscopeView> {
    let id = session_id(&headers);
    let session = state.microscope_session(&id).await;
    let dashboard = session.lock().await;
    let view = MicroscopeView::from_dashboard(&dashboard, dashboard.last_notice().cloned());
    ([(SESSION_HEADER, id)], Json(view))
}

async fn microscope_command(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(command): Json<MicroscopeCommand>,
) -> SessionReply<MicroscopeView> {
    let id = session_id(&headers);
    let session = state.microscope_session(&id).await;
    let mut dashboard = session.lock().await;
    let notice = dashboard.dispatch(state.api.as_ref(), command).await;
    let view = MicroscopeView::from_dashboard(&dashboard, notice);
    ([(SESSION_HEADER, id)], Json(view))
}

async fn end_session(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> StatusCode {
    if let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| valid_session_id(id))
    {
        state.end_session(id).await;
    }
    StatusCode::NO_CONTENT
}

async fn steer_page() -> Html<&'static str> {
    Html(STEER_HTML)
}

async fn microscope_page() -> Html<&'static str> {
    Html(MICROSCOPE_HTML)
}

const STEER_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Neuronpedia Steer</title>
    <style>
        :root {
            --bg: #f7f7f9;
            --card: #ffffff;
            --accent: #d0d4dc;
            --highlight: #4f46e5;
            --text: #1f2933;
            --muted: #6b7280;
            --success: #15803d;
            --warning: #b45309;
            --error: #b91c1c;
        }
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, 'Segoe UI', sans-serif;
            background: var(--bg);
            color: var(--text);
            min-height: 100vh;
            padding: 20px;
        }
        .layout { display: grid; grid-template-columns: 340px 1fr; gap: 20px; max-width: 1400px; margin: 0 auto; }
        .card { background: var(--card); border: 1px solid var(--accent); border-radius: 12px; padding: 16px; margin-bottom: 16px; }
        h1 { font-size: 1.4rem; margin-bottom: 16px; }
        h2 { font-size: 1rem; margin-bottom: 10px; }
        label { font-size: 0.8rem; color: var(--muted); display: block; margin: 8px 0 4px; }
        input[type=text], input[type=number], textarea {
            width: 100%;
            border: 1px solid var(--accent);
            border-radius: 8px;
            padding: 8px;
            font-family: inherit;
        }
        input[type=range] { width: 100%; }
        button {
            background: var(--highlight);
            color: white;
            border: none;
            padding: 8px 16px;
            border-radius: 8px;
            cursor: pointer;
            margin-top: 8px;
        }
        button.secondary { background: var(--muted); }
        button:disabled { opacity: 0.5; cursor: not-allowed; }
        .candidate, .selection { border-bottom: 1px solid var(--accent); padding: 8px 0; font-size: 0.85rem; }
        .coords { color: var(--muted); font-size: 0.75rem; }
        .chats { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; }
        .chat { border-radius: 12px; padding: 16px; min-height: 200px; }
        .chat p { margin-bottom: 8px; white-space: pre-wrap; }
        #notice { padding: 10px; border-radius: 8px; margin-bottom: 16px; display: none; }
        #notice.info { display: block; background: #e0e7ff; }
        #notice.success { display: block; background: #dcfce7; color: var(--success); }
        #notice.warning { display: block; background: #fef3c7; color: var(--warning); }
        #notice.error { display: block; background: #fee2e2; color: var(--error); }
        nav { margin-bottom: 16px; font-size: 0.9rem; }
    </style>
</head>
<body>
    <nav><a href="/">Steer</a> | <a href="/microscope">Microscope</a> | <a href="#" onclick="resetSession(); return false;">New session</a></nav>
    <h1>Neuronpedia Steer <span class="coords" id="modelId"></span></h1>
    <div id="notice"></div>
    <div class="layout">
        <div>
            <div class="card">
                <h2>Search Features</h2>
                <input type="text" id="query" placeholder="e.g. dogs">
                <button id="searchBtn" onclick="search()">Search</button>
                <div id="candidates"></div>
            </div>
            <div class="card">
                <h2>Selected Features</h2>
                <div id="selections"></div>
            </div>
            <div class="card">
                <h2>Settings</h2>
                <label>Temperature <span id="temperatureVal"></span></label>
                <input type="range" id="temperature" min="-2" max="2" step="0.1" onchange="setParams()">
                <label>Tokens</label>
                <input type="number" id="n_tokens" min="1" onchange="setParams()">
                <label>Frequency penalty</label>
                <input type="number" id="freq_penalty" onchange="setParams()">
                <label>Seed</label>
                <input type="number" id="seed" onchange="setParams()">
                <label>Strength multiplier</label>
                <input type="number" id="strength_multiplier" onchange="setParams()">
                <label><input type="checkbox" id="steer_special_tokens" onchange="setParams()"> Steer special tokens</label>
            </div>
        </div>
        <div>
            <div class="chats">
                <div id="defaultChat"></div>
                <div id="steeredChat"></div>
            </div>
            <div class="card" style="margin-top: 16px;">
                <textarea id="message" rows="3" placeholder="Type your message here..."></textarea>
                <button id="sendBtn" onclick="submitMessage()">Send</button>
            </div>
        </div>
    </div>

    <script>
        const SESSION_KEY = 'steerscope-session';

        function showError(message) {
            const notice = document.getElementById('notice');
            notice.className = 'error';
            notice.textContent = message;
        }

        async function send(command) {
            const headers = { 'Content-Type': 'application/json' };
            const sessionId = sessionStorage.getItem(SESSION_KEY);
            if (sessionId) headers['X-Session-Id'] = sessionId;
            const response = await fetch('/api/steer', {
                method: command ? 'POST' : 'GET',
                headers,
                body: command ? JSON.stringify(command) : undefined
            });
            const issued = response.headers.get('X-Session-Id');
            if (issued) sessionStorage.setItem(SESSION_KEY, issued);
            if (!response.ok) {
                showError(`Request failed (${response.status}): ${await response.text()}`);
                return null;
            }
            const view = await response.json();
            render(view);
            return view;
        }

        async function resetSession() {
            const sessionId = sessionStorage.getItem(SESSION_KEY);
            if (sessionId) {
                await fetch('/api/session', { method: 'DELETE', headers: { 'X-Session-Id': sessionId } });
                sessionStorage.removeItem(SESSION_KEY);
            }
            send(null);
        }

        function escapeHtml(text) {
            const div = document.createElement('div');
            div.textContent = text;
            return div.innerHTML;
        }

        function render(view) {
            document.getElementById('modelId').textContent = view.model_id;

            const notice = document.getElementById('notice');
            notice.className = view.notice ? view.notice.level : '';
            notice.textContent = view.notice ? view.notice.message : '';

            document.getElementById('candidates').innerHTML = view.candidates.map((c, i) => `
                <div class="candidate">
                    ${escapeHtml(c.description)}
                    <div class="coords">${escapeHtml(c.layer)} #${c.index}</div>
                    <button class="secondary" onclick="select(${i})">Select</button>
                </div>`).join('');
            window.candidates = view.candidates;

            document.getElementById('selections').innerHTML = view.selections.length
                ? view.selections.map((s, i) => `
                <div class="selection">
                    ${escapeHtml(s.description)}
                    <div class="coords">${escapeHtml(s.layer)} #${s.index}, strength ${s.strength}</div>
                    <input type="range" min="-100" max="100" value="${s.strength}" onchange="setStrength(${i}, this.value)">
                    <button class="secondary" onclick="removeSelection(${i})">Remove</button>
                </div>`).join('')
                : '<p class="coords">No features selected.</p>';
            window.selections = view.selections;

            const p = view.params;
            document.getElementById('temperature').value = p.temperature;
            document.getElementById('temperatureVal').textContent = p.temperature;
            document.getElementById('n_tokens').value = p.n_tokens;
            document.getElementById('freq_penalty').value = p.freq_penalty;
            document.getElementById('seed').value = p.seed;
            document.getElementById('strength_multiplier').value = p.strength_multiplier;
            document.getElementById('steer_special_tokens').checked = p.steer_special_tokens;

            document.getElementById('defaultChat').innerHTML = view.default_chat_html;
            document.getElementById('steeredChat').innerHTML = view.steered_chat_html;
        }

        async function search() {
            const btn = document.getElementById('searchBtn');
            btn.disabled = true;
            try {
                await send({ command: 'search', query: document.getElementById('query').value });
            } finally {
                btn.disabled = false;
            }
        }

        function select(i) {
            send({ command: 'select', description: window.candidates[i].description });
        }

        function setStrength(i, value) {
            send({ command: 'set_strength', description: window.selections[i].description, value: parseInt(value, 10) });
        }

        function removeSelection(i) {
            send({ command: 'remove', description: window.selections[i].description });
        }

        // Blank or non-numeric inputs are left out so the server keeps its defaults
        function numberField(id, parse) {
            const value = parse(document.getElementById(id).value);
            return Number.isFinite(value) ? value : undefined;
        }

        function setParams() {
            const int = v => parseInt(v, 10);
            send({
                command: 'set_params',
                params: {
                    temperature: numberField('temperature', parseFloat),
                    n_tokens: numberField('n_tokens', int),
                    freq_penalty: numberField('freq_penalty', int),
                    seed: numberField('seed', int),
                    strength_multiplier: numberField('strength_multiplier', int),
                    steer_special_tokens: document.getElementById('steer_special_tokens').checked
                }
            });
        }

        async function submitMessage() {
            const btn = document.getElementById('sendBtn');
            const box = document.getElementById('message');
            btn.disabled = true;
            btn.textContent = 'Generating...';
            try {
                const view = await send({ command: 'submit', text: box.value });
                if (view && (!view.notice || !['error', 'warning'].includes(view.notice.level))) {
                    box.value = '';
                }
            } catch (err) {
                alert('Error: ' + err.message);
            } finally {
                btn.disabled = false;
                btn.textContent = 'Send';
            }
        }

        send(null);
    </script>
</body>
</html>
"##;

const MICROSCOPE_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Neuronpedia Microscope</title>
    <style>
        :root {
            --bg: #f7f7f9;
            --card: #ffffff;
            --accent: #d0d4dc;
            --highlight: #4f46e5;
            --text: #1f2933;
            --muted: #6b7280;
        }
        * { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, 'Segoe UI', sans-serif;
            background: var(--bg);
            color: var(--text);
            padding: 20px;
        }
        .container { max-width: 1400px; margin: 0 auto; }
        .card { background: var(--card); border: 1px solid var(--accent); border-radius: 12px; padding: 16px; margin-bottom: 16px; }
        h1 { font-size: 1.4rem; margin-bottom: 16px; }
        h3 { margin: 12px 0 8px; font-size: 1rem; }
        input[type=text] { width: 100%; border: 1px solid var(--accent); border-radius: 8px; padding: 8px; }
        button { background: var(--highlight); color: white; border: none; padding: 8px 14px; border-radius: 8px; cursor: pointer; margin: 4px; }
        button.token { background: #eef2ff; color: var(--text); }
        button.token.selected { background: var(--highlight); color: white; }
        select { width: 100%; padding: 8px; border-radius: 8px; margin-bottom: 8px; }
        .logit-columns { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; }
        table { border-collapse: collapse; width: 100%; font-size: 0.85rem; }
        th, td { border-bottom: 1px solid var(--accent); padding: 6px; text-align: left; vertical-align: top; }
        figure { margin: 12px 0; }
        figcaption { font-weight: 600; margin-bottom: 4px; }
        #notice { padding: 10px; border-radius: 8px; margin-bottom: 16px; display: none; }
        #notice.info { display: block; background: #e0e7ff; }
        #notice.success { display: block; background: #dcfce7; }
        #notice.warning { display: block; background: #fef3c7; }
        #notice.error { display: block; background: #fee2e2; }
        nav { margin-bottom: 16px; font-size: 0.9rem; }
    </style>
</head>
<body>
    <div class="container">
        <nav><a href="/">Steer</a> | <a href="/microscope">Microscope</a> | <a href="#" onclick="resetSession(); return false;">New session</a></nav>
        <h1>Neuronpedia Microscope</h1>
        <div id="notice"></div>
        <div class="card">
            <input type="text" id="sentence" placeholder="Enter a sentence" onchange="setSentence()">
            <div id="tokens"></div>
        </div>
        <div class="card" id="explanationsCard" style="display: none;">
            <h3>Explanations for <span id="selectedToken"></span></h3>
            <select id="descriptions"></select>
            <button id="inspectBtn" onclick="inspect()">Inspect</button>
        </div>
        <div class="card" id="inspection" style="display: none;"></div>
    </div>

    <script>
        const SESSION_KEY = 'steerscope-session';

        function showError(message) {
            const notice = document.getElementById('notice');
            notice.className = 'error';
            notice.textContent = message;
        }

        async function send(command) {
            const headers = { 'Content-Type': 'application/json' };
            const sessionId = sessionStorage.getItem(SESSION_KEY);
            if (sessionId) headers['X-Session-Id'] = sessionId;
            const response = await fetch('/api/microscope', {
                method: command ? 'POST' : 'GET',
                headers,
                body: command ? JSON.stringify(command) : undefined
            });
            const issued = response.headers.get('X-Session-Id');
            if (issued) sessionStorage.setItem(SESSION_KEY, issued);
            if (!response.ok) {
                showError(`Request failed (${response.status}): ${await response.text()}`);
                return null;
            }
            const view = await response.json();
            render(view);
            return view;
        }

        async function resetSession() {
            const sessionId = sessionStorage.getItem(SESSION_KEY);
            if (sessionId) {
                await fetch('/api/session', { method: 'DELETE', headers: { 'X-Session-Id': sessionId } });
                sessionStorage.removeItem(SESSION_KEY);
            }
            send(null);
        }

        function render(view) {
            const notice = document.getElementById('notice');
            notice.className = view.notice ? view.notice.level : '';
            notice.textContent = view.notice ? view.notice.message : '';

            document.getElementById('sentence').value = view.sentence;

            const tokens = document.getElementById('tokens');
            tokens.innerHTML = '';
            view.tokens.forEach(token => {
                const btn = document.createElement('button');
                btn.className = 'token' + (token.text === view.selected_token ? ' selected' : '');
                btn.textContent = token.text;
                btn.onclick = () => send({ command: 'select_token', position: token.position });
                tokens.appendChild(btn);
            });

            const card = document.getElementById('explanationsCard');
            card.style.display = view.selected_token ? 'block' : 'none';
            document.getElementById('selectedToken').textContent = view.selected_token || '';
            const select = document.getElementById('descriptions');
            select.innerHTML = '';
            view.descriptions.forEach(description => {
                const option = document.createElement('option');
                option.value = description;
                option.textContent = description;
                select.appendChild(option);
            });
            document.getElementById('inspectBtn').disabled = view.descriptions.length === 0;

            const inspection = document.getElementById('inspection');
            inspection.style.display = view.inspection_html ? 'block' : 'none';
            inspection.innerHTML = view.inspection_html || '';
        }

        function setSentence() {
            send({ command: 'set_sentence', text: document.getElementById('sentence').value });
        }

        async function inspect() {
            const btn = document.getElementById('inspectBtn');
            btn.disabled = true;
            btn.textContent = 'Loading...';
            try {
                await send({ command: 'inspect', description: document.getElementById('descriptions').value });
            } finally {
                btn.disabled = false;
                btn.textContent = 'Inspect';
            }
        }

        send(null);
    </script>
</body>
</html>
"##;
