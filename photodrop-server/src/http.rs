use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::Json;
use axum::routing::{get, post};
use chrono::Local;
use photodrop_common::{PhotoDescriptor, PhotoList};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{NewPhoto, PUBLIC_PREFIX, PendingPhoto, StorageError};

/// Multipart field carrying the uploaded file.
pub const PHOTO_FIELD: &str = "photo";

pub fn router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let static_files =
        ServeDir::new(state.store.root()).append_index_html_on_directories(false);

    Router::new()
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/photos", get(photos_handler))
        .nest_service(PUBLIC_PREFIX, static_files)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_http_server(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PhotoDescriptor>, ApiError> {
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::no_photo());
    };

    // Dropping this on any early return removes the written file.
    let mut stored: Option<PendingPhoto> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(PHOTO_FIELD) {
            continue;
        }
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            // A plain text field that happens to share the name.
            continue;
        };

        if stored.is_some() {
            return Err(ApiError::Validation(format!(
                "Only one `{PHOTO_FIELD}` file may be uploaded"
            )));
        }

        let now = Local::now();
        let (pending, file) = state.store.allocate(PHOTO_FIELD, &original_name, &now).await?;
        write_field(field, file, pending.photo()).await?;

        tracing::info!(
            original = %original_name,
            path = %pending.photo().path.display(),
            "stored uploaded photo"
        );
        stored = Some(pending);
    }

    let photo = stored.ok_or_else(ApiError::no_photo)?.commit();
    let url = format!(
        "http://{}:{}{}",
        request_hostname(&headers, &uri),
        state.public_port,
        photo.url_path()
    );

    Ok(Json(PhotoDescriptor {
        message: "Photo uploaded successfully".to_string(),
        filename: photo.filename,
        url,
    }))
}

async fn write_field(mut field: Field<'_>, mut file: File, photo: &NewPhoto) -> Result<(), ApiError> {
    let write_error = |source| StorageError::Write {
        path: photo.path.clone(),
        source,
    };

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk).await.map_err(write_error)?;
    }
    file.flush().await.map_err(write_error)?;

    Ok(())
}

async fn photos_handler(State(state): State<Arc<AppState>>) -> Json<PhotoList> {
    let photos = match state.store.list_photos().await {
        Ok(photos) => photos,
        Err(e) => {
            tracing::warn!(
                root = %state.store.root().display(),
                error = %e,
                "failed to read upload root, returning empty listing"
            );
            Vec::new()
        }
    };

    Json(PhotoList { photos })
}

/// Hostname the client used to reach us, without its port.
fn request_hostname(headers: &HeaderMap, uri: &Uri) -> String {
    let from_header = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(strip_port)
        .filter(|host| !host.is_empty());

    from_header
        .or_else(|| uri.host())
        .unwrap_or("localhost")
        .to_string()
}

fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    match authority.rsplit_once(':') {
        Some((host, _)) => host,
        None => authority,
    }
}
