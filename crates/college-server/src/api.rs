use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use college_shared::constants::MARKDOWN_EXTENSIONS;
use college_shared::{AskResponse, DirectoryUser, Identity, Page, PageRequest, UserId};
use college_store::{
    AssignedTopic, Dataset, DatasetPermission, NewChatMessage, SavedChat, Topic, TopicAssignment,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{require_identity, DirectoryKind, DirectoryPage, IdentityResolver};
use crate::chats::{ChatDetail, ChatEngine, NewChat};
use crate::config::ServerConfig;
use crate::datasets::{DatasetEngine, DatasetView, NewDataset, ReindexReport};
use crate::error::EngineError;
use crate::permissions::{NewGrant, PermissionEngine};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::topics::{NewTopic, TopicEngine};

/// Headroom on top of the document limit for multipart framing and the
/// other form fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub datasets: DatasetEngine,
    pub topics: TopicEngine,
    pub permissions: PermissionEngine,
    pub chats: ChatEngine,
    pub identity: Arc<dyn IdentityResolver>,
    /// Uploads and questions are metered separately, so one never eats the
    /// other's allowance.
    pub upload_limiter: RateLimiter,
    pub ask_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::from(Any)
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(%origin, "invalid CORS origin, allowing any");
                AllowOrigin::from(Any)
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    let upload_limited =
        middleware::from_fn_with_state(state.upload_limiter.clone(), rate_limit_middleware);
    let ask_limited =
        middleware::from_fn_with_state(state.ask_limiter.clone(), rate_limit_middleware);

    // The identity layer wraps every route layer below, so the rate limiter
    // always sees a resolved identity.
    let api = Router::new()
        .route(
            "/datasets",
            post(create_dataset)
                .route_layer(upload_limited)
                .get(list_datasets),
        )
        .route(
            "/datasets/:id",
            get(get_dataset).put(update_dataset).delete(delete_dataset),
        )
        .route("/datasets/:id/ask", post(ask_dataset).route_layer(ask_limited))
        .route("/datasets/:id/reindex", post(reindex_dataset))
        .route(
            "/datasets/:id/permissions",
            post(grant_permission).get(list_dataset_permissions),
        )
        .route(
            "/datasets/:id/permissions/:teacher_id",
            delete(revoke_permission),
        )
        .route("/permissions", get(list_permissions))
        .route("/datasets/:id/chats", post(create_chat).get(list_chats))
        .route(
            "/chats/:id",
            get(get_chat).put(update_chat).delete(delete_chat),
        )
        .route("/chats/:id/download", get(download_chat))
        .route("/topics", post(create_topic))
        .route("/topics/my", get(my_topics))
        .route("/topics/all", get(all_topics))
        .route("/topics/assigned", get(assigned_topics))
        .route(
            "/topics/:id/students",
            post(add_students).get(topic_students),
        )
        .route("/topics/:id/students/:student_id", delete(remove_student))
        .route("/students/search", get(search_students))
        .route("/teachers/search", get(search_teachers))
        .layer(middleware::from_fn_with_state(
            state.identity.clone(),
            require_identity,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(
            state.config.max_file_size + MULTIPART_OVERHEAD,
        ))
        .layer(cors_layer(&state.config.cors_allow_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

impl PageQuery {
    fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

// ─── Datasets ───

#[derive(Serialize)]
struct CreateDatasetResponse {
    dataset_id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
    message: &'static str,
}

#[derive(Deserialize)]
struct UpdateDatasetRequest {
    title: Option<String>,
    content: Option<String>,
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

fn has_markdown_extension(filename: &str) -> bool {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

fn multipart_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::ValidationFailed(format!("multipart error: {e}"))
}

async fn create_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, EngineError> {
    let mut title = String::new();
    let mut assignment_id = None;
    let mut content: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => title = field.text().await.map_err(multipart_error)?,
            "assignment_id" => {
                let raw = field.text().await.map_err(multipart_error)?;
                let id = Uuid::parse_str(raw.trim()).map_err(|_| {
                    EngineError::ValidationFailed("invalid assignment_id".to_string())
                })?;
                assignment_id = Some(id);
            }
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                if !has_markdown_extension(&filename) {
                    return Err(EngineError::ValidationFailed(
                        "only markdown files (.md, .markdown) are allowed".to_string(),
                    ));
                }
                content = Some(field.bytes().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let assignment_id = assignment_id
        .ok_or_else(|| EngineError::ValidationFailed("assignment_id is required".to_string()))?;
    let content =
        content.ok_or_else(|| EngineError::ValidationFailed("file is required".to_string()))?;

    let dataset = state
        .datasets
        .create(
            &actor,
            NewDataset {
                title,
                assignment_id,
                content: content.to_vec(),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDatasetResponse {
            dataset_id: dataset.id,
            title: dataset.title,
            created_at: dataset.created_at,
            message: "dataset created, indexing in background",
        }),
    ))
}

async fn list_datasets(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<Dataset>>, EngineError> {
    Ok(Json(state.datasets.list(&actor, q.request()).await?))
}

async fn get_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<DatasetView>, EngineError> {
    Ok(Json(state.datasets.get(&actor, id).await?))
}

async fn update_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDatasetRequest>,
) -> Result<Json<Dataset>, EngineError> {
    Ok(Json(
        state
            .datasets
            .update(&actor, id, req.title, req.content)
            .await?,
    ))
}

async fn delete_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, EngineError> {
    state.datasets.delete(&actor, id).await?;
    Ok(Json(MessageResponse {
        message: "dataset deleted",
    }))
}

async fn ask_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, EngineError> {
    Ok(Json(state.datasets.ask(&actor, id, &req.question).await?))
}

async fn reindex_dataset(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReindexReport>, EngineError> {
    Ok(Json(state.datasets.reindex(&actor, id).await?))
}

// ─── Permissions ───

#[derive(Deserialize)]
struct GrantRequest {
    teacher_id: String,
    #[serde(default)]
    teacher_name: String,
}

async fn grant_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantRequest>,
) -> Result<(StatusCode, Json<DatasetPermission>), EngineError> {
    let perm = state
        .permissions
        .grant(
            &actor,
            id,
            NewGrant {
                teacher_id: UserId::new(req.teacher_id),
                teacher_name: req.teacher_name,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(perm)))
}

async fn revoke_permission(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path((id, teacher_id)): Path<(Uuid, String)>,
) -> Result<Json<MessageResponse>, EngineError> {
    state
        .permissions
        .revoke(&actor, id, UserId::new(teacher_id))
        .await?;
    Ok(Json(MessageResponse {
        message: "permission revoked",
    }))
}

async fn list_dataset_permissions(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DatasetPermission>>, EngineError> {
    Ok(Json(state.permissions.list_for_dataset(&actor, id).await?))
}

async fn list_permissions(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<DatasetPermission>>, EngineError> {
    Ok(Json(state.permissions.list_all(&actor, q.request()).await?))
}

// ─── Saved chats ───

#[derive(Deserialize)]
struct CreateChatRequest {
    title: String,
    #[serde(default)]
    messages: Vec<NewChatMessage>,
}

#[derive(Deserialize)]
struct UpdateChatRequest {
    title: Option<String>,
    messages: Option<Vec<NewChatMessage>>,
}

async fn create_chat(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(dataset_id): Path<Uuid>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<ChatDetail>), EngineError> {
    let chat = state
        .chats
        .create(
            &actor,
            dataset_id,
            NewChat {
                title: req.title,
                messages: req.messages,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn list_chats(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(dataset_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<SavedChat>>, EngineError> {
    Ok(Json(state.chats.list(&actor, dataset_id, q.request()).await?))
}

async fn get_chat(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatDetail>, EngineError> {
    Ok(Json(state.chats.get(&actor, id).await?))
}

async fn update_chat(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateChatRequest>,
) -> Result<Json<ChatDetail>, EngineError> {
    Ok(Json(
        state
            .chats
            .update(&actor, id, req.title, req.messages)
            .await?,
    ))
}

async fn delete_chat(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, EngineError> {
    state.chats.delete(&actor, id).await?;
    Ok(Json(MessageResponse {
        message: "chat deleted",
    }))
}

async fn download_chat(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, EngineError> {
    let (body, filename) = state.chats.download(&actor, id).await?;
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        [
            (CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

// ─── Topics ───

#[derive(Deserialize)]
struct CreateTopicRequest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    students: Vec<DirectoryUser>,
}

#[derive(Deserialize)]
struct AddStudentsRequest {
    students: Vec<DirectoryUser>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn create_topic(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<Topic>), EngineError> {
    let topic = state
        .topics
        .create_topic(
            &actor,
            NewTopic {
                title: req.title,
                description: req.description,
                students: req.students,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

async fn my_topics(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<Topic>>, EngineError> {
    Ok(Json(state.topics.list_my_topics(&actor, q.request()).await?))
}

async fn all_topics(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<PageQuery>,
) -> Result<Json<Page<Topic>>, EngineError> {
    Ok(Json(state.topics.list_all_topics(&actor, q.request()).await?))
}

async fn assigned_topics(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
) -> Result<Json<Vec<AssignedTopic>>, EngineError> {
    Ok(Json(state.topics.assigned_topics(&actor).await?))
}

async fn add_students(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddStudentsRequest>,
) -> Result<Json<Vec<TopicAssignment>>, EngineError> {
    let added = state.topics.add_students(&actor, id, req.students).await?;
    info!(topic_id = %id, added = added.len(), "roster extended via API");
    Ok(Json(added))
}

async fn topic_students(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TopicAssignment>>, EngineError> {
    Ok(Json(state.topics.topic_students(&actor, id).await?))
}

async fn remove_student(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Path((id, student_id)): Path<(Uuid, String)>,
) -> Result<Json<MessageResponse>, EngineError> {
    state
        .topics
        .remove_student(&actor, id, UserId::new(student_id))
        .await?;
    Ok(Json(MessageResponse {
        message: "student removed from topic",
    }))
}

async fn search_students(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<DirectoryPage>, EngineError> {
    Ok(Json(
        state
            .topics
            .search(&actor, DirectoryKind::Students, &q.q)
            .await?,
    ))
}

async fn search_teachers(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<DirectoryPage>, EngineError> {
    Ok(Json(
        state
            .topics
            .search(&actor, DirectoryKind::Teachers, &q.q)
            .await?,
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_with_rate(h: &Harness, rate: f64) -> Router {
        build_router(AppState {
            datasets: h.datasets.clone(),
            topics: h.topics.clone(),
            permissions: h.permissions.clone(),
            chats: h.chats.clone(),
            identity: h.identity.clone(),
            upload_limiter: RateLimiter::per_user(rate),
            ask_limiter: RateLimiter::per_user(rate),
            config: Arc::new(ServerConfig::default()),
        })
    }

    fn app(h: &Harness) -> Router {
        app_with_rate(h, 100.0)
    }

    fn request(method: Method, uri: &str, token: &str, json: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        match json {
            Some(v) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn multipart(assignment_id: Uuid, filename: &str) -> (String, Body) {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nMy essay\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"assignment_id\"\r\n\r\n{id}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: text/markdown\r\n\r\n# Essay\r\n--{b}--\r\n",
            b = boundary,
            id = assignment_id,
            f = filename,
        );
        (format!("multipart/form-data; boundary={boundary}"), Body::from(body))
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let h = Harness::new();
        let resp = app(&h)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let h = Harness::new();
        let resp = app(&h)
            .oneshot(Request::get("/api/v1/datasets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app(&h)
            .oneshot(request(Method::GET, "/api/v1/datasets", "root:x", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn topic_creation_is_gated_by_role() {
        let h = Harness::new();
        let body = serde_json::json!({
            "title": "Volcanoes",
            "students": [{ "id": "s1", "username": "Samira" }],
        });

        let resp = app(&h)
            .oneshot(request(Method::POST, "/api/v1/topics", "student:s1", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(json_body(resp).await["error"].as_str().unwrap().starts_with("Access denied"));

        let resp = app(&h)
            .oneshot(request(Method::POST, "/api/v1/topics", "teacher:t1", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = app(&h)
            .oneshot(request(Method::GET, "/api/v1/topics/assigned", "student:s1", None))
            .await
            .unwrap();
        let assigned = json_body(resp).await;
        assert_eq!(assigned.as_array().unwrap().len(), 1);
        assert_eq!(assigned[0]["has_dataset"], false);
    }

    #[tokio::test]
    async fn upload_checks_extension_and_creates() {
        let h = Harness::new();
        let assignment = h.assign("t1", "s1").await;

        let (ct, body) = multipart(assignment.id, "essay.txt");
        let req = Request::post("/api/v1/datasets")
            .header(AUTHORIZATION, "Bearer student:s1")
            .header(CONTENT_TYPE, ct)
            .body(body)
            .unwrap();
        let resp = app(&h).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let (ct, body) = multipart(assignment.id, "essay.MD");
        let req = Request::post("/api/v1/datasets")
            .header(AUTHORIZATION, "Bearer student:s1")
            .header(CONTENT_TYPE, ct)
            .body(body)
            .unwrap();
        let resp = app(&h).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = json_body(resp).await;
        assert_eq!(created["title"], "My essay");
        assert!(created["dataset_id"].is_string());
    }

    #[tokio::test]
    async fn ask_is_rate_limited_per_user() {
        let h = Harness::new();
        h.indexing.fail_indexing(true);
        let ds = h.settled_dataset("s1").await;
        let app = app_with_rate(&h, 1.0);
        let uri = format!("/api/v1/datasets/{}/ask", ds.id);
        let q = serde_json::json!({ "question": "why?" });

        // burst of two, both rejected as not yet indexed
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(request(Method::POST, &uri, "teacher:t5", Some(q.clone())))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::CONFLICT);
        }
        let resp = app
            .clone()
            .oneshot(request(Method::POST, &uri, "teacher:t5", Some(q.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        // other users and other routes are unaffected
        let resp = app
            .clone()
            .oneshot(request(Method::POST, &uri, "teacher:t6", Some(q)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = app
            .oneshot(request(Method::GET, "/api/v1/datasets", "teacher:t5", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ask_burst_leaves_upload_allowance_intact() {
        let h = Harness::new();
        h.indexing.fail_indexing(true);
        let ds = h.settled_dataset("s1").await;
        let second = h.assign("t1", "s1").await;
        let app = app_with_rate(&h, 1.0);
        let uri = format!("/api/v1/datasets/{}/ask", ds.id);
        let q = serde_json::json!({ "question": "why?" });

        let burst = [
            StatusCode::CONFLICT,
            StatusCode::CONFLICT,
            StatusCode::TOO_MANY_REQUESTS,
        ];
        for expected in burst {
            let resp = app
                .clone()
                .oneshot(request(Method::POST, &uri, "student:s1", Some(q.clone())))
                .await
                .unwrap();
            assert_eq!(resp.status(), expected);
        }

        let (ct, body) = multipart(second.id, "second.md");
        let req = Request::post("/api/v1/datasets")
            .header(AUTHORIZATION, "Bearer student:s1")
            .header(CONTENT_TYPE, ct)
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn chat_download_sets_attachment_headers() {
        let h = Harness::new();
        let ds = crate::testing::insert_dataset(&h.store, "s1").await;
        let chat = serde_json::json!({
            "title": "Review",
            "messages": [{ "question": "Q1", "answer": "A1" }],
        });
        let resp = app(&h)
            .oneshot(request(
                Method::POST,
                &format!("/api/v1/datasets/{}/chats", ds.id),
                "admin:a1",
                Some(chat),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = json_body(resp).await["id"].as_str().unwrap().to_string();

        let resp = app(&h)
            .oneshot(request(
                Method::GET,
                &format!("/api/v1/chats/{id}/download"),
                "admin:a1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"Review.md\""
        );
        let text = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("**Q:** Q1"));
    }

    #[tokio::test]
    async fn duplicate_grant_is_conflict() {
        let h = Harness::new();
        let ds = crate::testing::insert_dataset(&h.store, "s1").await;
        let uri = format!("/api/v1/datasets/{}/permissions", ds.id);
        let body = serde_json::json!({ "teacher_id": "t1", "teacher_name": "Ms Sampson" });

        let resp = app(&h)
            .oneshot(request(Method::POST, &uri, "admin:a1", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app(&h)
            .oneshot(request(Method::POST, &uri, "admin:a1", Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app(&h)
            .oneshot(request(
                Method::DELETE,
                &format!("{uri}/t1"),
                "admin:a1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
