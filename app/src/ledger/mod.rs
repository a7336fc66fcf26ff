//! The ledger store. Balances live on accounts, money movements are recorded as append-only
//! [`Transaction`] rows. The store is split into two capabilities, [`LedgerReader`] and
//! [`LedgerWriter`], so that the orchestrator in [`crate::transfer`] can be driven by test doubles.
//!
//! Every writer operation is a single statement. The only multi-statement primitive is
//! [`LedgerWriter::execute_atomic`], which runs an ordered list of [`Statement`]s in one store
//! transaction.

use crate::account::{self, Account, AccountNumber, Holder};
use crate::concurrency::ConflictError;
use crate::money::Money;
use crate::user::{self, Email, NewUser};
use crate::QueryRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
pub(crate) mod memory;
mod postgres;
mod reconcile;

pub use postgres::PgLedger;
pub use reconcile::{reconcile, Reconciliation};

/// Id of the row a statement touched or created.
pub type RowId = i32;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("statement failed: {0}")]
    ExecutionFailure(String),
    #[error("{0}")]
    Conflict(#[from] ConflictError),
    #[error("cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row"),
            sqlx::Error::Database(ref db_error) => match db_error.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => Error::Conflict(ConflictError),
                Some(code) if code.starts_with("23") => {
                    Error::ConstraintViolation(db_error.message().to_owned())
                }
                _ => Error::ExecutionFailure(e.to_string()),
            },
            e => Error::ExecutionFailure(e.to_string()),
        }
    }
}

/// One balance-mutating or ledger-appending database statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `balance += delta`. A negative delta never takes the balance below zero.
    AdjustBalance { account: account::Id, delta: Money },
    /// Appends one ledger row.
    AppendTransaction {
        receiver: user::Id,
        sender: user::Id,
        amount: Money,
    },
}

impl Statement {
    pub fn text(&self) -> &'static str {
        match self {
            Statement::AdjustBalance { .. } => account::queries::ADJUST_BALANCE,
            Statement::AppendTransaction { .. } => queries::APPEND,
        }
    }

    pub fn args(&self) -> StatementArgs<'_> {
        StatementArgs(self)
    }
}

/// Displays the bind parameters of a statement, in bind order.
pub struct StatementArgs<'a>(&'a Statement);

impl fmt::Display for StatementArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Statement::AdjustBalance { account, delta } => write!(f, "[{}, {}]", delta, account.0),
            Statement::AppendTransaction {
                receiver,
                sender,
                amount,
            } => write!(f, "[{}, {}, {}]", receiver.0, sender.0, amount),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub RowId);

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub receiver: user::Id,
    pub sender: user::Id,
    pub amount: Money,
    pub sent_at: DateTime<Utc>,
}

/// Selects ledger rows. `None` matches any user.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionFilter {
    pub receiver: Option<user::Id>,
    pub sender: Option<user::Id>,
}

impl TransactionFilter {
    #[cfg(test)]
    pub(crate) fn matches(&self, transaction: &Transaction) -> bool {
        self.receiver.map_or(true, |id| id == transaction.receiver)
            && self.sender.map_or(true, |id| id == transaction.sender)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTotals {
    pub received: Money,
    pub sent: Money,
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn account_by_number(&self, number: &AccountNumber) -> Result<Account, Error>;

    async fn holder_by_email(&self, email: &Email) -> Result<Holder, Error>;

    async fn current_balance(&self, email: &Email) -> Result<Money, Error>;

    /// Newest first.
    async fn transactions(
        &self,
        filter: TransactionFilter,
        range: QueryRange,
    ) -> Result<Vec<Transaction>, Error>;

    async fn ledger_totals(&self, user: user::Id) -> Result<LedgerTotals, Error>;
}

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn adjust_balance(&self, account: account::Id, delta: Money) -> Result<RowId, Error>;

    async fn append_transaction(
        &self,
        receiver: user::Id,
        sender: user::Id,
        amount: Money,
    ) -> Result<RowId, Error>;

    async fn execute(&self, statement: &Statement) -> Result<RowId, Error> {
        match *statement {
            Statement::AdjustBalance { account, delta } => self.adjust_balance(account, delta).await,
            Statement::AppendTransaction {
                receiver,
                sender,
                amount,
            } => self.append_transaction(receiver, sender, amount).await,
        }
    }

    /// Runs all statements in order as one unit. Either every statement takes effect or none
    /// does.
    async fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<RowId>, Error>;

    /// Creates the user and their account as one unit.
    async fn register(&self, new_user: &NewUser, number: &AccountNumber) -> Result<Holder, Error>;
}

pub(crate) mod queries {
    use super::{Transaction, TransactionFilter, TransactionId};
    use crate::database::{self, Database, SumRow};
    use crate::money::Money;
    use crate::{user, QueryRange};
    use chrono::NaiveDateTime;

    pub(crate) const APPEND: &str = r#"INSERT INTO "transactions" (receiver_id, sender_id, amount_sent)
        VALUES ($1, $2, $3) RETURNING id"#;

    pub(crate) async fn append(
        data_tx: &mut database::Transaction,
        receiver: user::Id,
        sender: user::Id,
        amount: Money,
    ) -> Result<i32, sqlx::Error> {
        sqlx::query_as::<_, crate::account::queries::IdRow>(APPEND)
            .bind(receiver.0)
            .bind(sender.0)
            .bind(amount.0)
            .fetch_one(&mut **data_tx)
            .await
            .map(|row| row.id)
    }

    pub(crate) async fn list(
        db: &Database,
        filter: TransactionFilter,
        range: QueryRange,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, TransactionRow>(
            r#"SELECT id, receiver_id, sender_id, amount_sent, sent_at FROM "transactions"
                WHERE ($1::INT IS NULL OR receiver_id = $1) AND ($2::INT IS NULL OR sender_id = $2)
                ORDER BY sent_at DESC, id DESC LIMIT $3 OFFSET $4"#,
        )
        .bind(filter.receiver.map(|id| id.0))
        .bind(filter.sender.map(|id| id.0))
        .bind(range.limit)
        .bind(range.offset)
        .fetch_all(db)
        .await
        .map(|rows| rows.into_iter().map(TransactionRow::into_entity).collect())
    }

    pub(crate) async fn received_total(
        db: &Database,
        user: user::Id,
    ) -> Result<Money, sqlx::Error> {
        sum(
            db,
            r#"SELECT SUM(amount_sent)::BIGINT AS sum FROM "transactions" WHERE receiver_id = $1"#,
            user,
        )
        .await
    }

    pub(crate) async fn sent_total(db: &Database, user: user::Id) -> Result<Money, sqlx::Error> {
        sum(
            db,
            r#"SELECT SUM(amount_sent)::BIGINT AS sum FROM "transactions" WHERE sender_id = $1"#,
            user,
        )
        .await
    }

    async fn sum(db: &Database, sql: &'static str, user: user::Id) -> Result<Money, sqlx::Error> {
        sqlx::query_as::<_, SumRow<Option<i64>>>(sql)
            .bind(user.0)
            .fetch_one(db)
            .await
            .map(|row| row.sum.map(Money).unwrap_or_default())
    }

    #[derive(sqlx::FromRow, Debug)]
    struct TransactionRow {
        id: i32,
        receiver_id: i32,
        sender_id: i32,
        amount_sent: i32,
        sent_at: NaiveDateTime,
    }

    impl TransactionRow {
        fn into_entity(self) -> Transaction {
            Transaction {
                id: TransactionId(self.id),
                receiver: user::Id(self.receiver_id),
                sender: user::Id(self.sender_id),
                amount: Money(self.amount_sent.into()),
                sent_at: self.sent_at.and_utc(),
            }
        }
    }

}
