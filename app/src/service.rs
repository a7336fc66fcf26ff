//! The caller-side entry point. Runs orchestrator operations and announces the resulting balance
//! to live subscribers.

use crate::ledger::{self, LedgerReader, LedgerWriter, Reconciliation, Transaction, TransactionFilter};
use crate::money::Money;
use crate::notify::Broadcaster;
use crate::transfer::{self, Orchestrator, Receipt, TransferRequest};
use crate::user::Email;
use crate::worker::Report;
use crate::QueryRange;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Received,
    Sent,
    /// Money received from the system account.
    Borrowed,
}

#[derive(Clone)]
pub struct Funds {
    orchestrator: Orchestrator,
    reader: Arc<dyn LedgerReader>,
    broadcaster: Broadcaster,
    system: Email,
}

impl Funds {
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        writer: Arc<dyn LedgerWriter>,
        broadcaster: Broadcaster,
        system: Email,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&reader), writer, system.clone()),
            reader,
            broadcaster,
            system,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub async fn transfer(
        &self,
        ctx: &CancellationToken,
        sender: &Email,
        amount: i32,
        target: &str,
    ) -> Result<Receipt, transfer::Error> {
        let receipt = self
            .orchestrator
            .transfer(ctx, sender, amount, target)
            .await?;
        self.announce(sender).await;
        Ok(receipt)
    }

    pub async fn borrow(
        &self,
        ctx: &CancellationToken,
        borrower: &Email,
        amount: i32,
    ) -> Result<Receipt, transfer::Error> {
        let receipt = self.orchestrator.borrow(ctx, borrower, amount).await?;
        self.announce(borrower).await;
        Ok(receipt)
    }

    /// Balances are not announced for batches; every request has its own sender.
    pub async fn transfer_batch(
        &self,
        ctx: &CancellationToken,
        requests: Vec<TransferRequest>,
        worker_count: usize,
    ) -> Report<Receipt, transfer::Error> {
        self.orchestrator
            .transfer_batch(ctx, requests, worker_count)
            .await
    }

    pub async fn balance(&self, email: &Email) -> Result<Money, ledger::Error> {
        self.reader.current_balance(email).await
    }

    pub async fn history(
        &self,
        email: &Email,
        kind: HistoryKind,
        range: QueryRange,
    ) -> Result<Vec<Transaction>, ledger::Error> {
        let user = self.reader.holder_by_email(email).await?.user.id;
        let filter = match kind {
            HistoryKind::Received => TransactionFilter {
                receiver: Some(user),
                sender: None,
            },
            HistoryKind::Sent => TransactionFilter {
                receiver: None,
                sender: Some(user),
            },
            HistoryKind::Borrowed => {
                let lender = self.reader.holder_by_email(&self.system).await?.user.id;
                TransactionFilter {
                    receiver: Some(user),
                    sender: Some(lender),
                }
            }
        };
        self.reader.transactions(filter, range).await
    }

    pub async fn reconcile(&self, email: &Email) -> Result<Reconciliation, ledger::Error> {
        ledger::reconcile(self.reader.as_ref(), email).await
    }

    /// Publishes the user's new balance. The operation already succeeded, so failures here are
    /// only logged.
    async fn announce(&self, email: &Email) {
        match self.reader.current_balance(email).await {
            Ok(balance) => {
                let delivered = self.broadcaster.publish(&balance.to_string());
                log::debug!("balance of {} announced to {} subscribers", email, delivered);
            }
            Err(e) => log::error!("could not read the new balance of {}: {}", email, e),
        }
    }
}
