use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the directory.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,                   // assigned at registration, immutable
    pub username: String,           // display name, not unique
    pub email: String,              // normalized, unique
    pub password_hash: String,      // Argon2 PHC string, never plaintext
    pub bio: Option<String>,
    pub created_at: OffsetDateTime, // set once by the server
}

/// Public part of the user returned to the client. Has no password field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            email: user.email,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}
