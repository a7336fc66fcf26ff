use super::{
    queries, Error, LedgerReader, LedgerTotals, LedgerWriter, RowId, Statement, Transaction,
    TransactionFilter,
};
use crate::account::{self, Account, AccountNumber, Holder};
use crate::database::{self, Database};
use crate::money::Money;
use crate::user::{self, Email, NewUser};
use crate::QueryRange;
use async_trait::async_trait;

/// Ledger store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgLedger {
    db: Database,
}

impl PgLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn run(data_tx: &mut database::Transaction, statement: &Statement) -> Result<RowId, Error> {
        match *statement {
            Statement::AdjustBalance { account, delta } => {
                match account::queries::adjust(data_tx, account, delta).await? {
                    Some(id) => Ok(id),
                    None if account::queries::exists(data_tx, account).await? => {
                        Err(Error::InsufficientFunds)
                    }
                    None => Err(Error::NotFound("account")),
                }
            }
            Statement::AppendTransaction {
                receiver,
                sender,
                amount,
            } => Ok(queries::append(data_tx, receiver, sender, amount).await?),
        }
    }
}

#[async_trait]
impl LedgerReader for PgLedger {
    async fn account_by_number(&self, number: &AccountNumber) -> Result<Account, Error> {
        account::queries::by_number(&self.db, number)
            .await?
            .ok_or(Error::NotFound("account"))
    }

    async fn holder_by_email(&self, email: &Email) -> Result<Holder, Error> {
        account::queries::holder_by_email(&self.db, email)
            .await?
            .ok_or(Error::NotFound("user"))
    }

    async fn current_balance(&self, email: &Email) -> Result<Money, Error> {
        account::queries::balance_by_email(&self.db, email)
            .await?
            .ok_or(Error::NotFound("user"))
    }

    async fn transactions(
        &self,
        filter: TransactionFilter,
        range: QueryRange,
    ) -> Result<Vec<Transaction>, Error> {
        Ok(queries::list(&self.db, filter, range).await?)
    }

    async fn ledger_totals(&self, user: user::Id) -> Result<LedgerTotals, Error> {
        Ok(LedgerTotals {
            received: queries::received_total(&self.db, user).await?,
            sent: queries::sent_total(&self.db, user).await?,
        })
    }
}

#[async_trait]
impl LedgerWriter for PgLedger {
    async fn adjust_balance(&self, account: account::Id, delta: Money) -> Result<RowId, Error> {
        let mut data_tx = self.db.begin().await?;
        let id = Self::run(&mut data_tx, &Statement::AdjustBalance { account, delta }).await?;
        data_tx.commit().await?;
        Ok(id)
    }

    async fn append_transaction(
        &self,
        receiver: user::Id,
        sender: user::Id,
        amount: Money,
    ) -> Result<RowId, Error> {
        let mut data_tx = self.db.begin().await?;
        let id = queries::append(&mut data_tx, receiver, sender, amount).await?;
        data_tx.commit().await?;
        Ok(id)
    }

    async fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<RowId>, Error> {
        let mut data_tx = self.db.begin().await?;
        let mut ids = Vec::with_capacity(statements.len());
        for statement in statements {
            // Dropping the transaction on error rolls it back.
            ids.push(Self::run(&mut data_tx, statement).await?);
        }
        data_tx.commit().await?;
        Ok(ids)
    }

    async fn register(&self, new_user: &NewUser, number: &AccountNumber) -> Result<Holder, Error> {
        let mut data_tx = self.db.begin().await?;
        account::queries::lock_number(&mut data_tx, number).await?;
        if account::queries::number_taken(&mut data_tx, number).await? {
            return Err(Error::ConstraintViolation(format!(
                "account number {} taken",
                number
            )));
        }
        let user = user::queries::insert(&mut data_tx, new_user).await?;
        let account = account::queries::insert(&mut data_tx, user.id, number).await?;
        data_tx.commit().await?;
        Ok(Holder { user, account })
    }
}
