use crate::money::Money;
use crate::user;
use rand::Rng;
use std::fmt;
use thiserror::Error;

const NUMBER_PREFIX: &str = "512";
const NUMBER_MAX_LEN: usize = 10;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub i32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidAccountNumber {
    #[error("account number is empty")]
    Empty,
    #[error("account number may only contain digits")]
    NotNumeric,
    #[error("account number is longer than {NUMBER_MAX_LEN} digits")]
    TooLong,
}

/// The public identifier of an account, the thing users type in to send money to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountNumber(String);

impl AccountNumber {
    /// Parses an account number supplied by a caller.
    pub fn parse(s: &str) -> Result<Self, InvalidAccountNumber> {
        let s = s.trim();
        if s.is_empty() {
            Err(InvalidAccountNumber::Empty)
        } else if !s.bytes().all(|b| b.is_ascii_digit()) {
            Err(InvalidAccountNumber::NotNumeric)
        } else if s.len() > NUMBER_MAX_LEN {
            Err(InvalidAccountNumber::TooLong)
        } else {
            Ok(Self(s.to_owned()))
        }
    }

    /// Generates a fresh random account number. Uniqueness is enforced by the store, not here.
    pub fn generate() -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(1_000_000..9_999_999);
        Self(format!("{}{}", NUMBER_PREFIX, suffix))
    }

    pub(crate) fn from_stored(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Id,
    pub number: AccountNumber,
    pub owner: user::Id,
    pub balance: Money,
}

/// A user together with the account they own.
#[derive(Debug, Clone)]
pub struct Holder {
    pub user: user::User,
    pub account: Account,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_numbers_have_the_bank_prefix() {
        for _ in 0..100 {
            let number = AccountNumber::generate();
            assert_eq!(number.as_str().len(), 10);
            assert!(number.as_str().starts_with("512"));
            assert_eq!(AccountNumber::parse(number.as_str()), Ok(number));
        }
    }

    #[test]
    fn parse_trims_and_validates() {
        assert_eq!(
            AccountNumber::parse(" 5121234567 ").unwrap().as_str(),
            "5121234567"
        );
        assert_eq!(AccountNumber::parse("   "), Err(InvalidAccountNumber::Empty));
        assert_eq!(
            AccountNumber::parse("512-123"),
            Err(InvalidAccountNumber::NotNumeric)
        );
        assert_eq!(
            AccountNumber::parse("51212345678"),
            Err(InvalidAccountNumber::TooLong)
        );
    }
}
