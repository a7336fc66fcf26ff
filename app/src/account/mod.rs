//! Accounts hold the balance of a user. Balances are only ever changed through ledger statements,
//! see [`crate::ledger::Statement`].

use crate::ledger::{self, LedgerWriter};
use crate::user::NewUser;

mod entities;

pub use entities::{Account, AccountNumber, Holder, Id, InvalidAccountNumber};

const REGISTRATION_ATTEMPTS: usize = 5;

/// Registers a user and opens their account. Account numbers are random, so a collision with an
/// existing account is retried with a fresh number.
pub async fn register(writer: &dyn LedgerWriter, new_user: &NewUser) -> Result<Holder, ledger::Error> {
    let mut attempt = 1;
    loop {
        let number = AccountNumber::generate();
        match writer.register(new_user, &number).await {
            Err(ledger::Error::ConstraintViolation(reason)) if attempt < REGISTRATION_ATTEMPTS => {
                log::warn!(
                    "registering {} with account {} failed ({}), retrying",
                    new_user.email,
                    number,
                    reason
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}

pub(crate) mod queries {
    use super::{Account, AccountNumber, Holder, Id};
    use crate::database::{self, Database};
    use crate::money::Money;
    use crate::user::{self, queries::UserRow};
    use chrono::NaiveDateTime;
    use const_format::formatcp;

    const HOLDER_COLUMNS: &str = formatcp!(
        "{}, a.id AS account_id, a.account_number, a.money",
        user::queries::COLUMNS
    );

    pub(crate) const ADJUST_BALANCE: &str =
        r#"UPDATE "account" SET money = money + $1 WHERE id = $2 AND money + $1 >= 0 RETURNING id"#;

    pub(crate) async fn by_number(
        db: &Database,
        number: &AccountNumber,
    ) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(
            r#"SELECT id, account_number, money, user_id FROM "account" WHERE account_number = $1"#,
        )
        .bind(number.as_str())
        .fetch_optional(db)
        .await
        .map(|row| row.map(AccountRow::into_entity))
    }

    pub(crate) async fn holder_by_email(
        db: &Database,
        email: &user::Email,
    ) -> Result<Option<Holder>, sqlx::Error> {
        sqlx::query_as::<_, HolderRow>(formatcp!(
            r#"SELECT {} FROM "user" AS u JOIN "account" AS a ON u.id = a.user_id WHERE u.email = $1"#,
            HOLDER_COLUMNS
        ))
        .bind(email.as_str())
        .fetch_optional(db)
        .await
        .map(|row| row.map(HolderRow::into_entity))
    }

    pub(crate) async fn balance_by_email(
        db: &Database,
        email: &user::Email,
    ) -> Result<Option<Money>, sqlx::Error> {
        sqlx::query_as::<_, BalanceRow>(
            r#"SELECT a.money FROM "account" AS a JOIN "user" AS u ON u.id = a.user_id WHERE u.email = $1"#,
        )
        .bind(email.as_str())
        .fetch_optional(db)
        .await
        .map(|row| row.map(|row| Money(row.money.into())))
    }

    /// Applies `money += delta`. Returns `None` if no row matched, either because the account
    /// does not exist or because the balance would go negative.
    pub(crate) async fn adjust(
        data_tx: &mut database::Transaction,
        id: Id,
        delta: Money,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_as::<_, IdRow>(ADJUST_BALANCE)
            .bind(delta.0)
            .bind(id.0)
            .fetch_optional(&mut **data_tx)
            .await
            .map(|row| row.map(|row| row.id))
    }

    pub(crate) async fn exists(
        data_tx: &mut database::Transaction,
        id: Id,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_as::<_, IdRow>(r#"SELECT id FROM "account" WHERE id = $1"#)
            .bind(id.0)
            .fetch_optional(&mut **data_tx)
            .await
            .map(|row| row.is_some())
    }

    /// Serializes registrations that drew the same number until the transaction ends. The
    /// account table does not enforce unique numbers, so this lock and [`number_taken`] do.
    pub(crate) async fn lock_number(
        data_tx: &mut database::Transaction,
        number: &AccountNumber,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(number.as_str())
            .execute(&mut **data_tx)
            .await
            .map(|_| ())
    }

    pub(crate) async fn number_taken(
        data_tx: &mut database::Transaction,
        number: &AccountNumber,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_as::<_, IdRow>(r#"SELECT id FROM "account" WHERE account_number = $1 LIMIT 1"#)
            .bind(number.as_str())
            .fetch_optional(&mut **data_tx)
            .await
            .map(|row| row.is_some())
    }

    pub(crate) async fn insert(
        data_tx: &mut database::Transaction,
        owner: user::Id,
        number: &AccountNumber,
    ) -> Result<Account, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(
            r#"INSERT INTO "account" (account_number, money, user_id) VALUES ($1, 0, $2)
                RETURNING id, account_number, money, user_id"#,
        )
        .bind(number.as_str())
        .bind(owner.0)
        .fetch_one(&mut **data_tx)
        .await
        .map(AccountRow::into_entity)
    }

    #[derive(sqlx::FromRow, Debug)]
    pub(crate) struct IdRow {
        pub id: i32,
    }

    #[derive(sqlx::FromRow, Debug)]
    struct BalanceRow {
        money: i32,
    }

    #[derive(sqlx::FromRow, Debug)]
    struct AccountRow {
        id: i32,
        account_number: String,
        money: i32,
        user_id: i32,
    }

    impl AccountRow {
        fn into_entity(self) -> Account {
            Account {
                id: Id(self.id),
                number: AccountNumber::from_stored(self.account_number),
                owner: user::Id(self.user_id),
                balance: Money(self.money.into()),
            }
        }
    }

    #[derive(sqlx::FromRow, Debug)]
    struct HolderRow {
        id: i32,
        email: String,
        first_name: String,
        last_name: String,
        profile_picture: Option<String>,
        email_verified: bool,
        created_at: NaiveDateTime,
        account_id: i32,
        account_number: String,
        money: i32,
    }

    impl HolderRow {
        fn into_entity(self) -> Holder {
            let user = UserRow {
                id: self.id,
                email: self.email,
                first_name: self.first_name,
                last_name: self.last_name,
                profile_picture: self.profile_picture,
                email_verified: self.email_verified,
                created_at: self.created_at,
            }
            .into_entity();
            Holder {
                account: Account {
                    id: Id(self.account_id),
                    number: AccountNumber::from_stored(self.account_number),
                    owner: user.id,
                    balance: Money(self.money.into()),
                },
                user,
            }
        }
    }

}
