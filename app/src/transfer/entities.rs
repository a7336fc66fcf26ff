use crate::account::{Account, Holder, InvalidAccountNumber};
use crate::job::{Job, JobId};
use crate::ledger::{self, RowId, Statement, TransactionId};
use crate::money::Money;
use crate::user::{self, Email};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("invalid account number: {0}")]
    InvalidAccountNumber(#[from] InvalidAccountNumber),
    #[error("sender not found")]
    SenderNotFound,
    #[error("recipient account not found")]
    RecipientNotFound,
    #[error("cannot transfer to the sender's own account")]
    SameAccount,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Ledger(ledger::Error),
}

impl Error {
    /// A stable identifier for callers that render errors to users.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAmount => "invalid_amount",
            Error::InvalidAccountNumber(_) => "invalid_account_number",
            Error::SenderNotFound => "sender_not_found",
            Error::RecipientNotFound => "recipient_not_found",
            Error::SameAccount => "same_account",
            Error::InsufficientFunds => "insufficient_funds",
            Error::Cancelled => "cancelled",
            Error::Ledger(_) => "ledger_failure",
        }
    }
}

impl From<ledger::Error> for Error {
    fn from(e: ledger::Error) -> Self {
        match e {
            // A debit that lost a race with a concurrent request.
            ledger::Error::InsufficientFunds => Error::InsufficientFunds,
            ledger::Error::Cancelled => Error::Cancelled,
            e => Error::Ledger(e),
        }
    }
}

/// Widens a request amount, rejecting anything that is not strictly positive.
pub(crate) fn validate_amount(amount: i32) -> Result<Money, Error> {
    let amount = Money::from(amount);
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(Error::InvalidAmount)
    }
}

/// Where a request is in its lifecycle. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Validate,
    ResolveTarget,
    CheckFunds,
    Dispatch,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::ResolveTarget => "resolve target",
            Stage::CheckFunds => "check funds",
            Stage::Dispatch => "dispatch",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A checked transfer, ready to be dispatched.
#[derive(Debug)]
pub(crate) struct Transfer {
    sender: Holder,
    recipient: Account,
    amount: Money,
}

impl Transfer {
    pub(crate) fn new(sender: Holder, recipient: Account) -> Pending {
        Pending { sender, recipient }
    }

    /// Debit the sender, credit the recipient, then record the ledger row.
    pub(crate) fn jobs(&self) -> Vec<Job> {
        Job::sequence([
            Statement::AdjustBalance {
                account: self.sender.account.id,
                delta: -self.amount,
            },
            Statement::AdjustBalance {
                account: self.recipient.id,
                delta: self.amount,
            },
            Statement::AppendTransaction {
                receiver: self.recipient.owner,
                sender: self.sender.user.id,
                amount: self.amount,
            },
        ])
    }
}

/// A transfer whose target has been resolved but whose funds have not been checked yet.
#[derive(Debug)]
pub(crate) struct Pending {
    sender: Holder,
    recipient: Account,
}

impl Pending {
    pub(crate) fn check_target(self) -> Result<Self, Error> {
        if self.sender.account.id == self.recipient.id {
            Err(Error::SameAccount)
        } else {
            Ok(self)
        }
    }

    /// The balance seen here may be stale by the time the debit runs; the debit itself is
    /// conditional and has the final say.
    pub(crate) fn check_funds(self, amount: Money) -> Result<Transfer, Error> {
        if self.sender.account.balance < amount {
            return Err(Error::InsufficientFunds);
        }
        Ok(Transfer {
            sender: self.sender,
            recipient: self.recipient,
            amount,
        })
    }
}

/// Money issued by the system account to a borrower.
#[derive(Debug)]
pub(crate) struct Borrow {
    pub borrower: Holder,
    pub lender: user::Id,
    pub amount: Money,
}

impl Borrow {
    pub(crate) fn jobs(&self) -> Vec<Job> {
        Job::sequence([
            Statement::AdjustBalance {
                account: self.borrower.account.id,
                delta: self.amount,
            },
            Statement::AppendTransaction {
                receiver: self.borrower.user.id,
                sender: self.lender,
                amount: self.amount,
            },
        ])
    }
}

/// What a successful transfer or borrow committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The row each job touched, in job order.
    pub jobs: Vec<(JobId, RowId)>,
    /// The ledger row that was appended.
    pub transaction: TransactionId,
}

impl Receipt {
    /// The ledger append is always the last job.
    pub(crate) fn from_rows(jobs: Vec<(JobId, RowId)>) -> Result<Self, Error> {
        let transaction = jobs
            .last()
            .map(|(_, row)| TransactionId(*row))
            .ok_or_else(|| {
                Error::Ledger(ledger::Error::ExecutionFailure(
                    "no statements were executed".to_owned(),
                ))
            })?;
        Ok(Self { jobs, transaction })
    }
}

/// One entry of a transfer batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub sender: Email,
    pub amount: i32,
    pub account_number: String,
}
