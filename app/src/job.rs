//! Jobs are immutable descriptions of one unit of work handed to the [`crate::worker`] executor.

use crate::ledger::Statement;
use std::fmt;

/// Sequence number of a job within one dispatch. Numbering starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything the executor can queue. The id is used to report per-job results.
pub trait Sequenced {
    fn id(&self) -> JobId;
}

/// One ledger statement together with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    statement: Statement,
}

impl Job {
    pub fn new(id: JobId, statement: Statement) -> Self {
        Self { id, statement }
    }

    /// Numbers the statements in the given order.
    pub fn sequence(statements: impl IntoIterator<Item = Statement>) -> Vec<Job> {
        statements
            .into_iter()
            .zip(1..)
            .map(|(statement, id)| Job::new(JobId(id), statement))
            .collect()
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }
}

impl Sequenced for Job {
    fn id(&self) -> JobId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account, money::Money, user};

    #[test]
    fn sequence_numbers_from_one_in_order() {
        let jobs = Job::sequence([
            Statement::AdjustBalance {
                account: account::Id(1),
                delta: Money(-5),
            },
            Statement::AppendTransaction {
                receiver: user::Id(2),
                sender: user::Id(1),
                amount: Money(5),
            },
        ]);
        assert_eq!(
            jobs.iter().map(Sequenced::id).collect::<Vec<_>>(),
            vec![JobId(1), JobId(2)]
        );
        assert!(matches!(
            jobs[1].statement(),
            Statement::AppendTransaction { .. }
        ));
    }

    #[test]
    fn empty_sequence() {
        assert!(Job::sequence(Vec::new()).is_empty());
    }
}
