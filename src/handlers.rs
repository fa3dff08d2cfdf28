use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::MultipartRejection,
        rejection::{PathRejection, QueryRejection},
        Multipart, OriginalUri, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::access::can_delete;
use crate::auth::{self, CurrentUser};
use crate::config::Config;
use crate::db;
use crate::error::{AppError, Result};
use crate::license::days_remaining;
use crate::models::{File, FileWithOwner, NewUser};
use crate::pagination::{Page, PageQuery, PageWindow, MSG_INVALID_PAGE};
use crate::validation::{
    self, validate_extension, FieldErrors, LICENSE_CHECK, LOGIN, MSG_BAD_CREDENTIALS,
    MSG_EMPTY_FILE, MSG_NOT_A_FILE, MSG_NO_FILE, MSG_NO_FILENAME, NON_FIELD_ERRORS, REGISTRATION,
};
use crate::AppState;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UserDetails {
    email: String,
    username: String,
}

#[derive(Debug, Serialize)]
pub struct AuthToken {
    token: String,
}

#[derive(Debug, Serialize)]
pub struct LicenseStatus {
    days_to_license_end: u32,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    id: i64,
    file: String,
    post_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SharedFileEntry {
    id: i64,
    username: String,
    file: String,
    post_date: DateTime<Utc>,
}

impl FileEntry {
    fn new(config: &Config, file: File) -> Self {
        Self {
            id: file.id,
            file: media_url(config, &file.name),
            post_date: file.post_date,
        }
    }
}

impl SharedFileEntry {
    fn new(config: &Config, entry: FileWithOwner) -> Self {
        Self {
            id: entry.file.id,
            username: entry.username,
            file: media_url(config, &entry.file.name),
            post_date: entry.file.post_date,
        }
    }
}

fn media_url(config: &Config, name: &str) -> String {
    format!("{}{}", config.media_url, name)
}

/// An empty body reads as an empty object so every missing field is reported.
fn parse_json_body(body: &Bytes) -> Result<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("JSON parse error - {}", e)))
}

/// A query string that does not deserialize (say, `page` given twice) is
/// reported like any other unusable page.
fn page_query(query: std::result::Result<Query<PageQuery>, QueryRejection>) -> Result<PageQuery> {
    query.map(|Query(query)| query).map_err(|e| {
        warn!(error = %e, "Rejected page query");
        AppError::NotFound(MSG_INVALID_PAGE.to_string())
    })
}

fn not_found() -> AppError {
    AppError::NotFound("Not found.".to_string())
}

fn file_error(message: impl Into<String>) -> AppError {
    AppError::Validation(FieldErrors::single(UPLOAD_FIELD, message))
}

pub async fn register_user(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse> {
    let body = parse_json_body(&body)?;
    // Uniqueness is checked for every well-formed field even when others
    // failed, so the caller sees all problems at once.
    let (cleaned, mut errors) = validation::clean(&body, REGISTRATION);
    let taken = db::taken_user_fields(&state.db, cleaned.text("email"), cleaned.text("username")).await?;
    for field in taken {
        errors.add(field, format!("user with this {} already exists.", field));
    }
    if !errors.is_empty() {
        return Err(errors.into());
    }

    let email = cleaned.text("email").unwrap_or_default();
    let username = cleaned.text("username").unwrap_or_default();
    let password = cleaned.text("password").unwrap_or_default();

    let password_hash = state.hasher.hash(password.to_string()).await?;
    let new_user = NewUser {
        username,
        email,
        password_hash: &password_hash,
    };
    let user = match db::insert_user(&state.db, &new_user, Utc::now()).await {
        Ok(user) => user,
        Err(e) => {
            return Err(match db::unique_violation_field(&e) {
                Some(field) => {
                    FieldErrors::single(field, format!("user with this {} already exists.", field))
                        .into()
                }
                None => e.into(),
            })
        }
    };

    info!(user_id = user.id.0, username = %user.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(UserDetails {
            email: user.email,
            username: user.username,
        }),
    ))
}

pub async fn login_user(State(state): State<AppState>, body: Bytes) -> Result<Json<AuthToken>> {
    let body = parse_json_body(&body)?;
    let cleaned = validation::validate(&body, LOGIN)?;
    let username = cleaned.text("username").unwrap_or_default();
    let password = cleaned.text("password").unwrap_or_default();

    let Some(user) = state.hasher.authenticate(&state.db, username, password).await? else {
        warn!(username = %username, "Rejected login");
        return Err(FieldErrors::single(NON_FIELD_ERRORS, MSG_BAD_CREDENTIALS).into());
    };

    let token = auth::get_or_create_token(&state.db, &user).await?;
    Ok(Json(AuthToken { token }))
}

pub async fn user_details(CurrentUser(user): CurrentUser) -> Json<UserDetails> {
    Json(UserDetails {
        email: user.email,
        username: user.username,
    })
}

pub async fn trial_license_check(CurrentUser(user): CurrentUser, body: Bytes) -> Result<Json<LicenseStatus>> {
    let body = parse_json_body(&body)?;
    let cleaned = validation::validate(&body, LICENSE_CHECK)?;
    let duration = cleaned
        .integer("license_duration")
        .unwrap_or(validation::DEFAULT_LICENSE_DURATION);
    let duration = u32::try_from(duration).map_err(|_| {
        FieldErrors::single(
            "license_duration",
            format!("Ensure this value is less than or equal to {}.", u32::MAX),
        )
    })?;

    Ok(Json(LicenseStatus {
        days_to_license_end: days_remaining(Utc::now(), user.date_joined, duration),
    }))
}

pub async fn list_user_files(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    OriginalUri(uri): OriginalUri,
    query: std::result::Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<FileEntry>>> {
    let query = page_query(query)?;
    let count = db::count_files_of(&state.db, user.id).await?;
    let window = PageWindow::resolve(query.page.as_deref(), count, state.config.page_size)?;
    let files = db::list_files_of(&state.db, user.id, window.limit(), window.offset()).await?;

    let results = files
        .into_iter()
        .map(|file| FileEntry::new(&state.config, file))
        .collect();
    Ok(Json(window.into_page(uri.path(), count, results)))
}

pub async fn list_all_files(
    State(state): State<AppState>,
    _user: CurrentUser,
    OriginalUri(uri): OriginalUri,
    query: std::result::Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<SharedFileEntry>>> {
    let query = page_query(query)?;
    let count = db::count_all_files(&state.db).await?;
    let window = PageWindow::resolve(query.page.as_deref(), count, state.config.page_size)?;
    let files = db::list_all_files(&state.db, window.limit(), window.offset()).await?;

    let results = files
        .into_iter()
        .map(|entry| SharedFileEntry::new(&state.config, entry))
        .collect();
    Ok(Json(window.into_page(uri.path(), count, results)))
}

pub async fn upload_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    let mut multipart = multipart.map_err(|_| file_error(MSG_NOT_A_FILE))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(file_error(MSG_NOT_A_FILE));
        };
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((file_name, data));
        break;
    }

    let (file_name, data) = upload.ok_or_else(|| file_error(MSG_NO_FILE))?;
    if file_name.trim().is_empty() {
        return Err(file_error(MSG_NO_FILENAME));
    }
    if data.is_empty() {
        return Err(file_error(MSG_EMPTY_FILE));
    }
    validate_extension(&file_name).map_err(|e| file_error(e.to_string()))?;

    let name = state.media.save(&file_name, &data).await?;
    let file = match db::insert_file(&state.db, user.id, &name, Utc::now()).await {
        Ok(file) => file,
        Err(e) => {
            if let Err(cleanup) = state.media.remove(&name).await {
                warn!(name = %name, error = %cleanup, "Could not remove content of failed upload");
            }
            return Err(e.into());
        }
    };

    info!(file_id = file.id, user_id = user.id.0, name = %file.name, bytes = data.len(), "File stored");

    Ok((StatusCode::CREATED, Json(FileEntry::new(&state.config, file))))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(format!("Multipart form parse error - {}", e.body_text()))
    }
}

/// Removes the record and its content. The content is moved aside first and
/// put back if the record cannot be deleted.
pub async fn delete_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    file_id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<StatusCode> {
    // Ids that are not integers cannot name a file.
    let Ok(Path(file_id)) = file_id else {
        return Err(not_found());
    };
    let file = db::find_file(&state.db, file_id).await?.ok_or_else(not_found)?;

    if !can_delete(user.id, file.user_id) {
        warn!(file_id, user_id = user.id.0, owner_id = file.user_id.0, "Refused delete of foreign file");
        return Err(AppError::Forbidden(
            "You cannot delete files of other users.".to_string(),
        ));
    }

    let staged = state.media.stage_removal(&file.name).await?;
    if staged.is_none() {
        warn!(file_id, name = %file.name, "File content already missing");
    }

    let removed = match db::delete_file(&state.db, file_id).await {
        Ok(removed) => removed,
        Err(e) => {
            if let Some(staged) = staged {
                if let Err(restore) = state.media.restore(staged).await {
                    tracing::error!(file_id, error = %restore, "Could not restore staged content");
                }
            }
            return Err(e.into());
        }
    };

    if let Some(staged) = staged {
        if let Err(e) = state.media.purge(staged).await {
            warn!(file_id, error = %e, "Staged content left behind");
        }
    }

    if !removed {
        return Err(not_found());
    }

    info!(file_id, user_id = user.id.0, "File deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve_media(State(state): State<AppState>, Path(name): Path<String>) -> Result<Response> {
    let path = state.media.path_of(&name).ok_or_else(not_found)?;
    let file = fs::File::open(&path).await.map_err(|_| not_found())?;

    let mime_type = mime_guess::from_path(&path).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000".to_string()),
        ],
        body,
    )
        .into_response())
}
