use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::auth::{AuthUser, Authenticator, HttpIdentityProvider};
use crate::cache::{Clock, SystemClock};
use crate::columns::{ViolationField, ViolationTab};
use crate::config::Config;
use crate::downloader;
use crate::error::AppError;
use crate::filter::{self, ListingSummary, ViolationFilter};
use crate::mailer::{generate_ticket_reference, Mailer, SupportTicket, TicketSender};
use crate::models::{ClientOverview, Tenant, Violation};
use crate::sheets::HttpSheetsClient;
use crate::store::{BulkUpdateResult, ResolveOutcome, SheetStore};
use crate::tenancy::subdomain_from_host;

pub struct AppState {
    pub store: Arc<SheetStore>,
    pub auth: Arc<Authenticator>,
    /// `None` when outbound mail is not configured.
    pub mailer: Option<Arc<dyn TicketSender>>,
    pub root_domain: String,
    /// Read the tenant host from `X-Forwarded-Host` when set.
    pub trust_forwarded_host: bool,
}

type SharedState = Arc<AppState>;

#[derive(Debug, Default, Deserialize)]
struct ListingQuery {
    tab: Option<String>,
    /// Staff-only tenant override.
    tenant: Option<String>,
    since: Option<NaiveDate>,
    days: Option<u32>,
    status: Option<String>,
    impact: Option<String>,
    search: Option<String>,
    /// Export format: `csv` (default), `xlsx` or `pdf`.
    format: Option<String>,
}

impl ListingQuery {
    fn tab(&self) -> Result<ViolationTab, AppError> {
        parse_tab(self.tab.as_deref())
    }

    fn filter(&self) -> ViolationFilter {
        ViolationFilter {
            since: self.since,
            days: self.days,
            status: self.status.clone(),
            impact: self.impact.clone(),
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TenantQuery {
    tenant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshQuery {
    #[serde(default)]
    refresh: bool,
}

#[derive(Deserialize)]
struct FieldUpdate {
    tab: Option<String>,
    field: String,
    value: String,
}

#[derive(Deserialize)]
struct BulkFieldUpdate {
    tab: Option<String>,
    ids: Vec<String>,
    field: String,
    value: String,
}

#[derive(Deserialize)]
struct SupportRequest {
    subject: String,
    message: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Serialize)]
struct TenantResponse {
    tenant: Tenant,
    user: AuthUser,
}

#[derive(Serialize)]
struct ViolationListing {
    tenant: String,
    tab: ViolationTab,
    summary: ListingSummary,
    violations: Vec<Violation>,
}

#[derive(Serialize)]
struct UpdateResponse {
    id: String,
    field: ViolationField,
    status: &'static str,
}

#[derive(Serialize)]
struct ResolveResponse {
    id: String,
    outcome: ResolveOutcome,
}

#[derive(Serialize)]
struct SupportResponse {
    reference: String,
    status: &'static str,
}

/// Build the HTTP router. Everything under `/api` requires a session.
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/tenant", get(get_tenant))
        .route("/api/violations", get(list_violations))
        .route("/api/violations/bulk", post(bulk_update))
        .route("/api/violations/:id", patch(update_violation))
        .route("/api/violations/:id/resolve", post(resolve_violation))
        .route("/api/support", post(submit_support))
        .route("/api/export", get(export_violations))
        .route("/api/team/clients", get(team_clients))
        .route(
            "/api/team/clients/:subdomain/violations",
            get(team_violations),
        )
        .route(
            "/api/team/clients/:subdomain/violations/:id",
            patch(team_update_violation),
        )
        .route(
            "/api/team/clients/:subdomain/violations/:id/resolve",
            post(team_resolve_violation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(cors_layer(&state.root_domain))
        .with_state(state)
}

/// Start the server with production backends.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sheets = HttpSheetsClient::new(config.sheets_client_config())?;
    let store = SheetStore::new(Arc::new(sheets), config.store_config(), clock.clone());

    let provider = HttpIdentityProvider::new(config.auth_userinfo_url.clone())?;
    let auth = Authenticator::new(
        Arc::new(provider),
        &config.team_emails,
        config.session_cookie.clone(),
        config.auth_cache_ttl,
        clock,
    );

    let mailer: Option<Arc<dyn TicketSender>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(Mailer::new(smtp)?)),
        None => {
            log::warn!("SMTP_HOST not set, support tickets are disabled");
            None
        }
    };

    let state = Arc::new(AppState {
        store: Arc::new(store),
        auth: Arc::new(auth),
        mailer,
        root_domain: config.root_domain.clone(),
        trust_forwarded_host: config.trust_forwarded_host,
    });

    let app = router(state).nest_service("/static", ServeDir::new(&config.static_dir));

    let listener = TcpListener::bind(config.bind_addr).await?;
    log::info!(
        "Listening on http://{} (root domain {})",
        config.bind_addr,
        config.root_domain
    );
    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(root_domain: &str) -> CorsLayer {
    let root = root_domain.to_ascii_lowercase();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .ok()
                .and_then(|o| o.split_once("://").map(|(_, rest)| rest.to_ascii_lowercase()))
                .map(|host| {
                    let host = host.split(':').next().unwrap_or_default();
                    host == root || host.ends_with(&format!(".{}", root))
                })
                .unwrap_or(false)
        }))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Reject requests without a verified session and expose the caller to
/// handlers as an [`AuthUser`] extension.
async fn require_auth(
    State(state): State<SharedState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie = jar.get(state.auth.cookie_name()).map(|c| c.value().to_string());
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = Authenticator::token_from(cookie.as_deref(), authorization)
        .ok_or(AppError::Unauthenticated)?;
    let user = state.auth.authenticate(&token).await?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn parse_tab(raw: Option<&str>) -> Result<ViolationTab, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse().map_err(AppError::BadRequest),
        None => Ok(ViolationTab::Active),
    }
}

fn parse_field(raw: &str) -> Result<ViolationField, AppError> {
    raw.parse().map_err(AppError::BadRequest)
}

fn require_staff(user: &AuthUser) -> Result<(), AppError> {
    if user.is_staff {
        Ok(())
    } else {
        Err(AppError::Forbidden("team access only".to_string()))
    }
}

/// Host the request was addressed to. `X-Forwarded-Host` is client
/// controlled unless a proxy rewrites it, so it is only read when trusted.
fn request_host(headers: &HeaderMap, trust_forwarded: bool) -> Option<&str> {
    let forwarded = headers
        .get("x-forwarded-host")
        .filter(|_| trust_forwarded);
    forwarded
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
}

/// The tenant a request is about: the Host subdomain, or `?tenant=` for
/// staff. The caller must own the tenant or be staff.
async fn current_tenant(
    state: &AppState,
    headers: &HeaderMap,
    user: &AuthUser,
    tenant_override: Option<&str>,
) -> Result<Tenant, AppError> {
    let from_override = tenant_override
        .map(str::trim)
        .filter(|t| !t.is_empty() && user.is_staff)
        .map(str::to_ascii_lowercase);

    let subdomain = match from_override {
        Some(subdomain) => subdomain,
        None => request_host(headers, state.trust_forwarded_host)
            .and_then(|host| subdomain_from_host(host, &state.root_domain))
            .ok_or_else(|| {
                AppError::BadRequest("no tenant subdomain in request host".to_string())
            })?,
    };

    team_tenant(state, user, &subdomain).await
}

async fn team_tenant(
    state: &AppState,
    user: &AuthUser,
    subdomain: &str,
) -> Result<Tenant, AppError> {
    let tenant = state.store.tenant_by_subdomain(subdomain).await?;
    if !user.can_access(&tenant) {
        log::warn!("{} denied access to {}", user.email, tenant.subdomain);
        return Err(AppError::Forbidden(format!(
            "no access to {}",
            tenant.subdomain
        )));
    }
    Ok(tenant)
}

async fn filtered_violations(
    state: &AppState,
    tenant: &Tenant,
    query: &ListingQuery,
) -> Result<(ViolationTab, Vec<Violation>), AppError> {
    let tab = query.tab()?;
    let violations = state.store.violations(tenant, tab).await?;
    let mut violations = query.filter().apply(violations, state.store.clock().now());
    filter::sort_newest_first(&mut violations);
    Ok((tab, violations))
}

async fn listing(
    state: &AppState,
    tenant: &Tenant,
    query: &ListingQuery,
) -> Result<Json<ViolationListing>, AppError> {
    let (tab, violations) = filtered_violations(state, tenant, query).await?;
    Ok(Json(ViolationListing {
        tenant: tenant.subdomain.clone(),
        tab,
        summary: filter::summarize(&violations),
        violations,
    }))
}

async fn apply_update(
    state: &AppState,
    tenant: &Tenant,
    user: &AuthUser,
    id: String,
    body: FieldUpdate,
) -> Result<Json<UpdateResponse>, AppError> {
    let tab = parse_tab(body.tab.as_deref())?;
    let field = parse_field(&body.field)?;
    if !user.is_staff && !field.is_client_editable() {
        return Err(AppError::Forbidden(format!("{} is not editable", field)));
    }

    state
        .store
        .update_violation_field(tenant, tab, &id, field, &body.value)
        .await?;
    Ok(Json(UpdateResponse {
        id,
        field,
        status: "updated",
    }))
}

async fn apply_resolve(
    state: &AppState,
    tenant: &Tenant,
    user: &AuthUser,
    id: String,
) -> Result<Json<ResolveResponse>, AppError> {
    let outcome = state.store.resolve_violation(tenant, &id).await?;
    log::info!("{} resolved {} for {} ({:?})", user.email, id, tenant.subdomain, outcome);
    Ok(Json(ResolveResponse { id, outcome }))
}

// Tenant routes

async fn get_tenant(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
) -> Result<Json<TenantResponse>, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    Ok(Json(TenantResponse { tenant, user }))
}

async fn list_violations(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ViolationListing>, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    listing(&state, &tenant, &query).await
}

async fn update_violation(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<TenantQuery>,
    Json(body): Json<FieldUpdate>,
) -> Result<Json<UpdateResponse>, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    apply_update(&state, &tenant, &user, id, body).await
}

async fn bulk_update(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
    Json(body): Json<BulkFieldUpdate>,
) -> Result<Json<BulkUpdateResult>, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    let tab = parse_tab(body.tab.as_deref())?;
    let field = parse_field(&body.field)?;
    if !user.is_staff && !field.is_client_editable() {
        return Err(AppError::Forbidden(format!("{} is not editable", field)));
    }
    if body.ids.is_empty() {
        return Err(AppError::BadRequest("no ids given".to_string()));
    }

    let result = state
        .store
        .bulk_update(&tenant, tab, &body.ids, field, &body.value)
        .await?;
    Ok(Json(result))
}

async fn resolve_violation(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<ResolveResponse>, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    apply_resolve(&state, &tenant, &user, id).await
}

async fn submit_support(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
    Json(body): Json<SupportRequest>,
) -> Result<Json<SupportResponse>, AppError> {
    let mailer = state.mailer.clone().ok_or(AppError::MailDisabled)?;
    if body.subject.trim().is_empty() || body.message.trim().is_empty() {
        return Err(AppError::BadRequest(
            "subject and message are required".to_string(),
        ));
    }
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;

    let ticket = SupportTicket {
        reference: generate_ticket_reference(),
        store_name: tenant.store_name.clone(),
        subdomain: tenant.subdomain.clone(),
        reply_to: user.email.clone(),
        category: body
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "general".to_string()),
        subject: body.subject.trim().to_string(),
        message: body.message.trim().to_string(),
        submitted_at: state.store.clock().now(),
    };

    mailer
        .send_ticket(&ticket)
        .await
        .map_err(|e| AppError::Mail(e.to_string()))?;

    Ok(Json(SupportResponse {
        reference: ticket.reference,
        status: "sent",
    }))
}

async fn export_violations(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    Query(query): Query<ListingQuery>,
) -> Result<Response, AppError> {
    let tenant = current_tenant(&state, &headers, &user, query.tenant.as_deref()).await?;
    let (tab, violations) = filtered_violations(&state, &tenant, &query).await?;

    let format = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .trim()
        .to_ascii_lowercase();
    let (content_type, body) = match format.as_str() {
        "csv" => (
            "text/csv; charset=utf-8",
            downloader::to_csv(&violations, tab).into_bytes(),
        ),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            downloader::to_xlsx(&violations, tab).map_err(|e| AppError::Export(e.to_string()))?,
        ),
        "pdf" => (
            "application/pdf",
            downloader::to_pdf(&violations, tab).map_err(|e| AppError::Export(e.to_string()))?,
        ),
        other => {
            return Err(AppError::BadRequest(format!(
                "unsupported export format '{}'",
                other
            )))
        }
    };

    let filename = format!(
        "{}-{}-violations-{}.{}",
        tenant.subdomain,
        tab.as_str(),
        state.store.clock().now().format("%Y-%m-%d"),
        format
    );
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}

// Team routes

async fn team_clients(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Vec<ClientOverview>>, AppError> {
    require_staff(&user)?;
    if query.refresh {
        state.store.invalidate_caches();
    }
    Ok(Json(state.store.client_overviews().await?))
}

async fn team_violations(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Path(subdomain): Path<String>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ViolationListing>, AppError> {
    require_staff(&user)?;
    let tenant = team_tenant(&state, &user, &subdomain).await?;
    listing(&state, &tenant, &query).await
}

async fn team_update_violation(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Path((subdomain, id)): Path<(String, String)>,
    Json(body): Json<FieldUpdate>,
) -> Result<Json<UpdateResponse>, AppError> {
    require_staff(&user)?;
    let tenant = team_tenant(&state, &user, &subdomain).await?;
    apply_update(&state, &tenant, &user, id, body).await
}

async fn team_resolve_violation(
    State(state): State<SharedState>,
    Extension(user): Extension<AuthUser>,
    Path((subdomain, id)): Path<(String, String)>,
) -> Result<Json<ResolveResponse>, AppError> {
    require_staff(&user)?;
    let tenant = team_tenant(&state, &user, &subdomain).await?;
    apply_resolve(&state, &tenant, &user, id).await
}
