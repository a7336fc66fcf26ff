use chrono::{DateTime, Utc};
use std::fmt;

/// The email a user registered with. This is also the identity the (external) authentication
/// layer hands to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Email(pub String);

impl Email {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub i32);

#[derive(Debug, Clone)]
pub struct User {
    pub id: Id,
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
    pub email_verified: bool,
    pub created: DateTime<Utc>,
}

/// Registration payload. The credential is stored as given; hashing happens before it gets
/// here.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: Email,
    pub first_name: String,
    pub last_name: String,
    pub profile_picture: Option<String>,
    pub credential_hash: String,
    pub email_verified: bool,
}
