use crate::account::{self, Holder};
use crate::ledger::{self, LedgerReader, LedgerWriter};
use crate::user::NewUser;

/// Makes sure the system account exists. Borrowed money is issued from this account, so it has
/// to be present before the first borrow. Running this again is a no-op.
pub async fn seed_system_account(
    reader: &dyn LedgerReader,
    writer: &dyn LedgerWriter,
    system: &NewUser,
) -> Result<Holder, ledger::Error> {
    match reader.holder_by_email(&system.email).await {
        Ok(holder) => {
            log::info!("system account {} already available", holder.account.number);
            Ok(holder)
        }
        Err(ledger::Error::NotFound(_)) => {
            let holder = account::register(writer, system).await?;
            log::info!("system account {} created", holder.account.number);
            Ok(holder)
        }
        Err(e) => Err(e),
    }
}
