//! Chart of accounts and posting batch kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// Fundamental account classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    /// Resources owned.
    Asset,
    /// Obligations owed.
    Liability,
    /// Owner's residual claim.
    Equity,
    /// Revenue.
    Income,
    /// Costs.
    Expense,
}

impl AccountType {
    /// Canonical uppercase name, as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side increases an account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSide {
    /// Debit-normal (assets, expenses).
    Debit,
    /// Credit-normal (liabilities, equity, income).
    Credit,
}

/// One account in the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Numeric account code, e.g. `"1100"`.
    pub code: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Classification.
    pub account_type: AccountType,
}

impl Account {
    /// The side that increases this account. The ECL allowance (1190) is a
    /// contra-asset and grows on the credit side.
    #[must_use]
    pub fn normal_side(&self) -> AccountSide {
        if self.code == codes::ALLOWANCE_ECL {
            return AccountSide::Credit;
        }
        match self.account_type {
            AccountType::Asset | AccountType::Expense => AccountSide::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => {
                AccountSide::Credit
            }
        }
    }
}

/// Well-known account codes.
pub mod codes {
    /// Cash and bank.
    pub const CASH: &str = "1000";
    /// Accounts receivable.
    pub const AR: &str = "1100";
    /// Contract asset (unbilled receivable).
    pub const CONTRACT_ASSET: &str = "1150";
    /// Allowance for expected credit losses (contra-asset).
    pub const ALLOWANCE_ECL: &str = "1190";
    /// VAT output payable.
    pub const VAT_OUTPUT: &str = "2100";
    /// Retained earnings.
    pub const RETAINED_EARNINGS: &str = "3000";
    /// Service revenue.
    pub const REVENUE: &str = "4000";
    /// Cost of service.
    pub const COST_OF_SERVICE: &str = "5000";
    /// Impairment loss on receivables.
    pub const IMPAIRMENT: &str = "5100";
}

/// The full chart of accounts.
pub const CHART_OF_ACCOUNTS: &[Account] = &[
    Account {
        code: codes::CASH,
        name: "Cash/Bank",
        account_type: AccountType::Asset,
    },
    Account {
        code: codes::AR,
        name: "Accounts Receivable",
        account_type: AccountType::Asset,
    },
    Account {
        code: codes::CONTRACT_ASSET,
        name: "Contract Asset (Unbilled A/R)",
        account_type: AccountType::Asset,
    },
    Account {
        code: codes::ALLOWANCE_ECL,
        name: "Allowance for ECL - Trade receivables",
        account_type: AccountType::Asset,
    },
    Account {
        code: codes::VAT_OUTPUT,
        name: "VAT Output Payable",
        account_type: AccountType::Liability,
    },
    Account {
        code: codes::RETAINED_EARNINGS,
        name: "Retained Earnings",
        account_type: AccountType::Equity,
    },
    Account {
        code: codes::REVENUE,
        name: "Service Revenue",
        account_type: AccountType::Income,
    },
    Account {
        code: codes::COST_OF_SERVICE,
        name: "Cost of Service",
        account_type: AccountType::Expense,
    },
    Account {
        code: codes::IMPAIRMENT,
        name: "Impairment loss (ECL)",
        account_type: AccountType::Expense,
    },
];

/// Look up an account by code.
#[must_use]
pub fn account(code: &str) -> Option<&'static Account> {
    CHART_OF_ACCOUNTS.iter().find(|a| a.code == code)
}

/// What a GL batch records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// Revenue earned ahead of invoicing (Dr contract asset / Cr revenue).
    Accrual,
    /// A receipt issued (Dr AR / Cr contract asset, Cr VAT).
    Issue,
    /// A receipt settled (Dr cash / Cr AR).
    Payment,
    /// Mirror-image reversal of an earlier batch.
    Reversal,
    /// Period-end close into retained earnings.
    Closing,
    /// Expected-credit-loss provision movement.
    Impairment,
}

impl BatchKind {
    /// Canonical lowercase name, as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BatchKind::Accrual => "accrual",
            BatchKind::Issue => "issue",
            BatchKind::Payment => "payment",
            BatchKind::Reversal => "reversal",
            BatchKind::Closing => "closing",
            BatchKind::Impairment => "impairment",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accrual" => Ok(BatchKind::Accrual),
            "issue" => Ok(BatchKind::Issue),
            "payment" => Ok(BatchKind::Payment),
            "reversal" => Ok(BatchKind::Reversal),
            "closing" => Ok(BatchKind::Closing),
            "impairment" => Ok(BatchKind::Impairment),
            other => Err(BillingError::UnknownAccount(other.to_string())),
        }
    }
}
