//! Balances are a cached projection of the ledger: for every regular user, the account balance
//! equals everything they received minus everything they sent. This module checks that.

use super::{Error, LedgerReader};
use crate::money::Money;
use crate::user::Email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub email: Email,
    /// The balance stored on the account.
    pub balance: Money,
    /// The balance reconstructed from ledger rows.
    pub projected: Money,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.projected
    }

    /// Positive when the account holds more than the ledger explains.
    pub fn difference(&self) -> Money {
        self.balance - self.projected
    }
}

pub async fn reconcile(reader: &dyn LedgerReader, email: &Email) -> Result<Reconciliation, Error> {
    let holder = reader.holder_by_email(email).await?;
    let totals = reader.ledger_totals(holder.user.id).await?;
    let reconciliation = Reconciliation {
        email: email.clone(),
        balance: holder.account.balance,
        projected: totals.received - totals.sent,
    };
    if !reconciliation.is_consistent() {
        log::warn!(
            "balance of {} is {} but the ledger accounts for {}",
            email,
            reconciliation.balance,
            reconciliation.projected
        );
    }
    Ok(reconciliation)
}
