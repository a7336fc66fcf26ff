//! In-memory ledger used as a test double for both store capabilities.

use super::{
    Error, LedgerReader, LedgerTotals, LedgerWriter, RowId, Statement, Transaction,
    TransactionFilter, TransactionId,
};
use crate::account::{self, Account, AccountNumber, Holder};
use crate::money::Money;
use crate::user::{self, Email, NewUser, User};
use crate::QueryRange;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct State {
    users: Vec<User>,
    accounts: Vec<Account>,
    transactions: Vec<Transaction>,
}

impl State {
    fn apply(&mut self, statement: &Statement) -> Result<RowId, Error> {
        match *statement {
            Statement::AdjustBalance { account, delta } => {
                let account = self
                    .accounts
                    .iter_mut()
                    .find(|a| a.id == account)
                    .ok_or(Error::NotFound("account"))?;
                if (account.balance + delta).is_negative() {
                    return Err(Error::InsufficientFunds);
                }
                account.balance += delta;
                Ok(account.id.0)
            }
            Statement::AppendTransaction {
                receiver,
                sender,
                amount,
            } => {
                for id in [receiver, sender] {
                    if !self.users.iter().any(|u| u.id == id) {
                        return Err(Error::ConstraintViolation(format!(
                            "user {} does not exist",
                            id.0
                        )));
                    }
                }
                let id = TransactionId(self.transactions.len() as RowId + 1);
                self.transactions.push(Transaction {
                    id,
                    receiver,
                    sender,
                    amount,
                    sent_at: Utc::now(),
                });
                Ok(id.0)
            }
        }
    }

    fn holder(&self, user: &User) -> Option<Holder> {
        self.accounts
            .iter()
            .find(|a| a.owner == user.id)
            .map(|account| Holder {
                user: user.clone(),
                account: account.clone(),
            })
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryLedger {
    state: Mutex<State>,
    fail_appends: AtomicBool,
    rejected_registrations: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user whose account starts with `balance`, bypassing the ledger.
    pub async fn open(&self, email: &str, balance: i64) -> Holder {
        let new_user = NewUser {
            email: Email(email.to_owned()),
            first_name: email.to_owned(),
            last_name: "Test".to_owned(),
            profile_picture: None,
            credential_hash: "hash".to_owned(),
            email_verified: true,
        };
        let mut holder = self
            .register(&new_user, &AccountNumber::generate())
            .await
            .unwrap();
        let mut state = self.state.lock().unwrap();
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.id == holder.account.id)
            .unwrap();
        account.balance = Money(balance);
        holder.account.balance = Money(balance);
        holder
    }

    pub fn balance(&self, account: account::Id) -> Money {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .iter()
            .find(|a| a.id == account)
            .map(|a| a.balance)
            .unwrap()
    }

    pub fn ledger(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn reject_next_registrations(&self, count: usize) {
        self.rejected_registrations.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn account_by_number(&self, number: &AccountNumber) -> Result<Account, Error> {
        let state = self.state.lock().unwrap();
        state
            .accounts
            .iter()
            .find(|a| &a.number == number)
            .cloned()
            .ok_or(Error::NotFound("account"))
    }

    async fn holder_by_email(&self, email: &Email) -> Result<Holder, Error> {
        let state = self.state.lock().unwrap();
        state
            .users
            .iter()
            .find(|u| &u.email == email)
            .and_then(|u| state.holder(u))
            .ok_or(Error::NotFound("user"))
    }

    async fn current_balance(&self, email: &Email) -> Result<Money, Error> {
        self.holder_by_email(email)
            .await
            .map(|holder| holder.account.balance)
    }

    async fn transactions(
        &self,
        filter: TransactionFilter,
        range: QueryRange,
    ) -> Result<Vec<Transaction>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| filter.matches(t))
            .skip(range.offset as usize)
            .take(range.limit as usize)
            .cloned()
            .collect())
    }

    async fn ledger_totals(&self, user: user::Id) -> Result<LedgerTotals, Error> {
        let state = self.state.lock().unwrap();
        Ok(LedgerTotals {
            received: state
                .transactions
                .iter()
                .filter(|t| t.receiver == user)
                .map(|t| t.amount)
                .sum(),
            sent: state
                .transactions
                .iter()
                .filter(|t| t.sender == user)
                .map(|t| t.amount)
                .sum(),
        })
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn adjust_balance(&self, account: account::Id, delta: Money) -> Result<RowId, Error> {
        self.execute_atomic(&[Statement::AdjustBalance { account, delta }])
            .await
            .map(|ids| ids[0])
    }

    async fn append_transaction(
        &self,
        receiver: user::Id,
        sender: user::Id,
        amount: Money,
    ) -> Result<RowId, Error> {
        self.execute_atomic(&[Statement::AppendTransaction {
            receiver,
            sender,
            amount,
        }])
        .await
        .map(|ids| ids[0])
    }

    async fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<RowId>, Error> {
        // Give concurrent callers a chance to interleave between their reads and this write.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        let mut ids = Vec::with_capacity(statements.len());
        for statement in statements {
            if matches!(statement, Statement::AppendTransaction { .. })
                && self.fail_appends.load(Ordering::SeqCst)
            {
                return Err(Error::ExecutionFailure("append rejected".to_owned()));
            }
            ids.push(next.apply(statement)?);
        }
        *state = next;
        Ok(ids)
    }

    async fn register(&self, new_user: &NewUser, number: &AccountNumber) -> Result<Holder, Error> {
        let rejected = self.rejected_registrations.load(Ordering::SeqCst);
        if rejected > 0 {
            self.rejected_registrations
                .store(rejected - 1, Ordering::SeqCst);
            return Err(Error::ConstraintViolation(format!(
                "account number {} taken",
                number
            )));
        }
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.email == new_user.email) {
            return Err(Error::ConstraintViolation(format!(
                "email {} taken",
                new_user.email
            )));
        }
        if state.accounts.iter().any(|a| &a.number == number) {
            return Err(Error::ConstraintViolation(format!(
                "account number {} taken",
                number
            )));
        }
        let user = User {
            id: user::Id(state.users.len() as i32 + 1),
            email: new_user.email.clone(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            profile_picture: new_user.profile_picture.clone(),
            email_verified: new_user.email_verified,
            created: Utc::now(),
        };
        let account = Account {
            id: account::Id(state.accounts.len() as i32 + 1),
            number: number.clone(),
            owner: user.id,
            balance: Money::ZERO,
        };
        state.users.push(user.clone());
        state.accounts.push(account.clone());
        Ok(Holder { user, account })
    }
}
