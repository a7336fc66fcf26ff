//! Moves money between accounts. A transfer goes through these stages:
//! - validate the amount, the target account number and the sender,
//! - resolve the target account,
//! - check the sender's funds,
//! - dispatch the debit, the credit and the ledger append as one atomic batch of jobs.
//!
//! Borrowing works the same way, except that the money is issued by the system account and there
//! is nothing to debit.

use crate::account::{AccountNumber, Holder};
use crate::job::{JobId, Sequenced};
use crate::ledger::{self, LedgerReader, LedgerWriter};
use crate::user::Email;
use crate::worker::{Executor, Handler, Report};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod entities;

use entities::{validate_amount, Borrow, Stage, Transfer};
pub use entities::{Error, Receipt, TransferRequest};

const TARGET: &str = "funds::transfer";

#[derive(Clone)]
pub struct Orchestrator {
    reader: Arc<dyn LedgerReader>,
    writer: Arc<dyn LedgerWriter>,
    system: Email,
}

impl Orchestrator {
    /// `system` is the email of the user that lends money to borrowers.
    pub fn new(reader: Arc<dyn LedgerReader>, writer: Arc<dyn LedgerWriter>, system: Email) -> Self {
        Self {
            reader,
            writer,
            system,
        }
    }

    pub async fn transfer(
        &self,
        ctx: &CancellationToken,
        sender: &Email,
        amount: i32,
        target: &str,
    ) -> Result<Receipt, Error> {
        let result = self.run_transfer(ctx, sender, amount, target).await;
        finish("transfer", sender, result)
    }

    pub async fn borrow(
        &self,
        ctx: &CancellationToken,
        borrower: &Email,
        amount: i32,
    ) -> Result<Receipt, Error> {
        let result = self.run_borrow(ctx, borrower, amount).await;
        finish("borrow", borrower, result)
    }

    /// Runs independent transfers concurrently. Each request is atomic on its own; one failing
    /// request does not affect the others.
    pub async fn transfer_batch(
        &self,
        ctx: &CancellationToken,
        requests: Vec<TransferRequest>,
        worker_count: usize,
    ) -> Report<Receipt, Error> {
        let jobs: Vec<TransferJob> = requests
            .into_iter()
            .zip(1..)
            .map(|(request, id)| TransferJob {
                id: JobId(id),
                request,
            })
            .collect();
        let handler = Arc::new(BatchHandler {
            orchestrator: self.clone(),
            ctx: ctx.clone(),
        });
        Executor::new(ctx.clone(), TARGET)
            .run_pool(jobs, worker_count, handler)
            .await
    }

    async fn run_transfer(
        &self,
        ctx: &CancellationToken,
        sender: &Email,
        amount: i32,
        target: &str,
    ) -> Result<Receipt, Error> {
        log::debug!(target: TARGET, "transfer from {}: {}", sender, Stage::Validate);
        let amount = validate_amount(amount)?;
        let number = AccountNumber::parse(target)?;
        let sender_holder = self.acting_holder(sender).await?;

        log::debug!(target: TARGET, "transfer from {}: {}", sender, Stage::ResolveTarget);
        let recipient = match self.reader.account_by_number(&number).await {
            Err(ledger::Error::NotFound(_)) => return Err(Error::RecipientNotFound),
            result => result?,
        };
        let pending = Transfer::new(sender_holder, recipient).check_target()?;

        log::debug!(target: TARGET, "transfer from {}: {}", sender, Stage::CheckFunds);
        let transfer = pending.check_funds(amount)?;

        log::debug!(target: TARGET, "transfer from {}: {}", sender, Stage::Dispatch);
        let rows = Executor::new(ctx.clone(), TARGET)
            .run_atomic(&transfer.jobs(), self.writer.as_ref())
            .await?;
        Receipt::from_rows(rows)
    }

    async fn run_borrow(
        &self,
        ctx: &CancellationToken,
        borrower: &Email,
        amount: i32,
    ) -> Result<Receipt, Error> {
        log::debug!(target: TARGET, "borrow by {}: {}", borrower, Stage::Validate);
        let amount = validate_amount(amount)?;
        let borrower_holder = self.acting_holder(borrower).await?;
        let lender = self.reader.holder_by_email(&self.system).await?;
        if lender.user.id == borrower_holder.user.id {
            return Err(Error::SameAccount);
        }

        log::debug!(target: TARGET, "borrow by {}: {}", borrower, Stage::Dispatch);
        let borrow = Borrow {
            borrower: borrower_holder,
            lender: lender.user.id,
            amount,
        };
        let rows = Executor::new(ctx.clone(), TARGET)
            .run_atomic(&borrow.jobs(), self.writer.as_ref())
            .await?;
        Receipt::from_rows(rows)
    }

    async fn acting_holder(&self, email: &Email) -> Result<Holder, Error> {
        match self.reader.holder_by_email(email).await {
            Err(ledger::Error::NotFound(_)) => Err(Error::SenderNotFound),
            result => Ok(result?),
        }
    }
}

fn finish(operation: &str, who: &Email, result: Result<Receipt, Error>) -> Result<Receipt, Error> {
    match &result {
        Ok(receipt) => log::info!(
            target: TARGET,
            "{} by {}: {} (transaction {})",
            operation,
            who,
            Stage::Done,
            receipt.transaction.0
        ),
        Err(e) => log::warn!(
            target: TARGET,
            "{} by {}: {} ({}: {})",
            operation,
            who,
            Stage::Failed,
            e.code(),
            e
        ),
    }
    result
}

struct TransferJob {
    id: JobId,
    request: TransferRequest,
}

impl Sequenced for TransferJob {
    fn id(&self) -> JobId {
        self.id
    }
}

struct BatchHandler {
    orchestrator: Orchestrator,
    ctx: CancellationToken,
}

#[async_trait]
impl Handler<TransferJob> for BatchHandler {
    type Output = Receipt;
    type Error = Error;

    async fn handle(&self, job: &TransferJob) -> Result<Receipt, Error> {
        let request = &job.request;
        self.orchestrator
            .transfer(
                &self.ctx,
                &request.sender,
                request.amount,
                &request.account_number,
            )
            .await
    }
}
