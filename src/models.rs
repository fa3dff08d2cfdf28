use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// An uploaded asset. `name` is relative to the media root.
#[derive(Debug, Clone)]
pub struct File {
    pub id: i64,
    pub user_id: UserId,
    pub name: String,
    pub post_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileWithOwner {
    pub file: File,
    pub username: String,
}
