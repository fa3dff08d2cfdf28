use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, ErrorCode, OptionalExtension, Result, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{File, FileWithOwner, NewUser, User, UserId};

pub type DbConnection = Arc<Mutex<Connection>>;

/// Opens (or creates) the database at `path`. `":memory:"` gives a private in-memory store.
pub fn establish_connection(path: &str) -> Result<DbConnection> {
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            date_joined TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            post_date TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS files_user_id ON files (user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_tokens (
            key TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL UNIQUE,
            created TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(Arc::new(Mutex::new(conn)))
}

fn parse_timestamp(idx: usize, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const USER_COLUMNS: &str = "id, username, email, password_hash, date_joined";

fn user_from_row(row: &Row<'_>) -> Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        date_joined: parse_timestamp(4, &row.get::<_, String>(4)?)?,
    })
}

fn file_from_row(row: &Row<'_>) -> Result<File> {
    Ok(File {
        id: row.get(0)?,
        user_id: UserId(row.get(1)?),
        name: row.get(2)?,
        post_date: parse_timestamp(3, &row.get::<_, String>(3)?)?,
    })
}

/// Maps a UNIQUE violation on `users` back to the offending field.
pub fn unique_violation_field(err: &rusqlite::Error) -> Option<&'static str> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => {
            if msg.contains("users.email") {
                Some("email")
            } else if msg.contains("users.username") {
                Some("username")
            } else {
                None
            }
        }
        _ => None,
    }
}

pub async fn insert_user(db: &DbConnection, new_user: &NewUser<'_>, now: DateTime<Utc>) -> Result<User> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO users (username, email, password_hash, date_joined) VALUES (?, ?, ?, ?)",
        params![
            new_user.username,
            new_user.email,
            new_user.password_hash,
            now.to_rfc3339()
        ],
    )?;

    Ok(User {
        id: UserId(conn.last_insert_rowid()),
        username: new_user.username.to_string(),
        email: new_user.email.to_string(),
        password_hash: new_user.password_hash.to_string(),
        date_joined: now,
    })
}

/// Which of `email` / `username` already belong to a user. A `None` value is
/// skipped, so callers can pass only the fields that are well formed.
pub async fn taken_user_fields(
    db: &DbConnection,
    email: Option<&str>,
    username: Option<&str>,
) -> Result<Vec<&'static str>> {
    let conn = db.lock().await;
    let mut taken = Vec::new();

    let checks = [
        ("email", email, "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)"),
        ("username", username, "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?)"),
    ];
    for (field, value, sql) in checks {
        let Some(value) = value else { continue };
        let exists: bool = conn.query_row(sql, [value], |row| row.get(0))?;
        if exists {
            taken.push(field);
        }
    }

    Ok(taken)
}

pub async fn find_user_by_username(db: &DbConnection, username: &str) -> Result<Option<User>> {
    let conn = db.lock().await;
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"),
        [username],
        user_from_row,
    )
    .optional()
}

pub async fn find_user_by_token(db: &DbConnection, key: &str) -> Result<Option<User>> {
    let conn = db.lock().await;
    conn.query_row(
        "SELECT u.id, u.username, u.email, u.password_hash, u.date_joined
         FROM auth_tokens t JOIN users u ON u.id = t.user_id
         WHERE t.key = ?",
        [key],
        user_from_row,
    )
    .optional()
}

/// Returns the user's token, storing `candidate` first if they have none.
pub async fn get_or_create_token(
    db: &DbConnection,
    user_id: UserId,
    candidate: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT OR IGNORE INTO auth_tokens (key, user_id, created) VALUES (?, ?, ?)",
        params![candidate, user_id.0, now.to_rfc3339()],
    )?;
    conn.query_row(
        "SELECT key FROM auth_tokens WHERE user_id = ?",
        [user_id.0],
        |row| row.get(0),
    )
}

pub async fn insert_file(db: &DbConnection, owner: UserId, name: &str, now: DateTime<Utc>) -> Result<File> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO files (user_id, name, post_date) VALUES (?, ?, ?)",
        params![owner.0, name, now.to_rfc3339()],
    )?;

    Ok(File {
        id: conn.last_insert_rowid(),
        user_id: owner,
        name: name.to_string(),
        post_date: now,
    })
}

pub async fn find_file(db: &DbConnection, id: i64) -> Result<Option<File>> {
    let conn = db.lock().await;
    conn.query_row(
        "SELECT id, user_id, name, post_date FROM files WHERE id = ?",
        [id],
        file_from_row,
    )
    .optional()
}

/// Returns whether a row was removed.
pub async fn delete_file(db: &DbConnection, id: i64) -> Result<bool> {
    let conn = db.lock().await;
    let removed = conn.execute("DELETE FROM files WHERE id = ?", [id])?;
    Ok(removed > 0)
}

pub async fn count_files_of(db: &DbConnection, owner: UserId) -> Result<usize> {
    let conn = db.lock().await;
    conn.query_row(
        "SELECT COUNT(*) FROM files WHERE user_id = ?",
        [owner.0],
        |row| row.get(0),
    )
}

pub async fn count_all_files(db: &DbConnection) -> Result<usize> {
    let conn = db.lock().await;
    conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
}

/// Newest first.
pub async fn list_files_of(db: &DbConnection, owner: UserId, limit: usize, offset: usize) -> Result<Vec<File>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, post_date FROM files
         WHERE user_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
    )?;
    let files = stmt
        .query_map(params![owner.0, limit, offset], file_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}

/// Newest first, annotated with the owner's username.
pub async fn list_all_files(db: &DbConnection, limit: usize, offset: usize) -> Result<Vec<FileWithOwner>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT f.id, f.user_id, f.name, f.post_date, u.username
         FROM files f JOIN users u ON u.id = f.user_id
         ORDER BY f.id DESC LIMIT ? OFFSET ?",
    )?;
    let files = stmt
        .query_map(params![limit, offset], |row| {
            Ok(FileWithOwner {
                file: file_from_row(row)?,
                username: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(files)
}
