//! Users are identity records. Every user owns exactly one account, see [`crate::account`].

mod entities;

pub use entities::{Email, Id, NewUser, User};

pub(crate) mod queries {
    use super::{Email, Id, NewUser, User};
    use crate::database;
    use chrono::NaiveDateTime;
    use const_format::formatcp;

    pub(crate) const COLUMNS: &str =
        "u.id, u.email, u.first_name, u.last_name, u.profile_picture, u.email_verified, u.created_at";

    pub(crate) async fn insert(
        data_tx: &mut database::Transaction,
        new_user: &NewUser,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(formatcp!(
            r#"INSERT INTO "user" AS u (email, first_name, last_name, profile_picture, password, email_verified)
                VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}"#,
            COLUMNS
        ))
        .bind(new_user.email.as_str())
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(new_user.profile_picture.as_deref())
        .bind(&new_user.credential_hash)
        .bind(new_user.email_verified)
        .fetch_one(&mut **data_tx)
        .await
        .map(UserRow::into_entity)
    }

    #[derive(sqlx::FromRow, Debug)]
    pub(crate) struct UserRow {
        pub id: i32,
        pub email: String,
        pub first_name: String,
        pub last_name: String,
        pub profile_picture: Option<String>,
        pub email_verified: bool,
        /// `TIMESTAMP` without time zone, read as UTC.
        pub created_at: NaiveDateTime,
    }

    impl UserRow {
        pub(crate) fn into_entity(self) -> User {
            User {
                id: Id(self.id),
                email: Email(self.email),
                first_name: self.first_name,
                last_name: self.last_name,
                profile_picture: self.profile_picture,
                email_verified: self.email_verified,
                created: self.created_at.and_utc(),
            }
        }
    }
}
