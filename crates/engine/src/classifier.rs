//! Expense/income classification.
//!
//! Amounts follow the aggregator convention: a positive amount is money
//! leaving the account, a negative amount is money coming in.

use serde::{Deserialize, Serialize};

/// Primary categories that never count as expense nor income: money moving
/// between the user's own accounts or paying down a debt.
const EXCLUDED_CATEGORIES: [&str; 5] = [
    "TRANSFER",
    "TRANSFER_IN",
    "TRANSFER_OUT",
    "LOAN_PAYMENTS",
    "CREDIT_CARD_PAYMENTS",
];

const CREDIT: &str = "credit";
const DEPOSITORY: &str = "depository";

/// Derived flags stored on every transaction row.
///
/// At most one of the two flags is ever `true`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub expense: bool,
    pub income: bool,
}

impl Classification {
    pub const NEITHER: Self = Self {
        expense: false,
        income: false,
    };

    pub fn is_neither(self) -> bool {
        !self.expense && !self.income
    }
}

/// Classifies a movement of money.
///
/// Only `credit` and `depository` accounts take part; investment, loan and
/// any other kind always yield [`Classification::NEITHER`]. Unknown
/// categories simply fall through to the amount rule.
pub fn classify(account_kind: &str, amount: f64, primary_category: &str) -> Classification {
    if is_excluded_category(primary_category) || !participates(account_kind) {
        return Classification::NEITHER;
    }

    if amount > 0.0 {
        Classification {
            expense: true,
            income: false,
        }
    } else if amount < 0.0 {
        Classification {
            expense: false,
            income: true,
        }
    } else {
        // Zero and NaN.
        Classification::NEITHER
    }
}

fn is_excluded_category(primary_category: &str) -> bool {
    let normalized = primary_category.trim().to_ascii_uppercase();
    EXCLUDED_CATEGORIES.contains(&normalized.as_str())
}

fn participates(account_kind: &str) -> bool {
    let kind = account_kind.trim();
    kind.eq_ignore_ascii_case(CREDIT) || kind.eq_ignore_ascii_case(DEPOSITORY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_amount_on_depository_is_expense() {
        let c = classify("depository", 50.0, "FOOD_AND_DRINK");
        assert_eq!(
            c,
            Classification {
                expense: true,
                income: false
            }
        );
    }

    #[test]
    fn negative_amount_on_credit_is_income() {
        let c = classify("credit", -12.5, "GENERAL_MERCHANDISE");
        assert_eq!(
            c,
            Classification {
                expense: false,
                income: true
            }
        );
    }

    #[test]
    fn zero_amount_is_neither() {
        assert!(classify("depository", 0.0, "FOOD_AND_DRINK").is_neither());
        assert!(classify("depository", -0.0, "INCOME").is_neither());
    }

    #[test]
    fn nan_amount_is_neither() {
        assert!(classify("credit", f64::NAN, "FOOD_AND_DRINK").is_neither());
    }

    #[test]
    fn excluded_categories_are_neither_for_any_amount_or_kind() {
        for category in EXCLUDED_CATEGORIES {
            for kind in ["credit", "depository", "loan", "investment", ""] {
                for amount in [-100.0, -0.01, 0.0, 0.01, 100.0] {
                    assert!(
                        classify(kind, amount, category).is_neither(),
                        "{kind} {amount} {category}"
                    );
                }
            }
        }
    }

    #[test]
    fn excluded_categories_match_case_insensitively() {
        assert!(classify("depository", 20.0, "transfer_out").is_neither());
        assert!(classify("depository", -20.0, "Loan_Payments").is_neither());
    }

    #[test]
    fn transfers_are_excluded_in_both_directions() {
        assert!(classify("depository", 40.0, "TRANSFER_IN").is_neither());
        assert!(classify("depository", -40.0, "TRANSFER_OUT").is_neither());
    }

    #[test]
    fn non_participating_kinds_are_neither() {
        for kind in ["investment", "loan", "brokerage", "other", ""] {
            assert!(classify(kind, 10.0, "FOOD_AND_DRINK").is_neither());
            assert!(classify(kind, -10.0, "INCOME").is_neither());
        }
    }

    #[test]
    fn unknown_category_falls_through_to_amount_rule() {
        let c = classify("credit", 3.0, "SOMETHING_NEW");
        assert!(c.expense);
        assert!(!c.income);
    }

    #[test]
    fn never_both_flags() {
        let kinds = ["credit", "depository", "loan", "investment", "weird"];
        let categories = ["", "FOOD_AND_DRINK", "TRANSFER", "INCOME", "x"];
        let amounts = [f64::MIN, -1.0, 0.0, 1.0, f64::MAX, f64::INFINITY];
        for kind in kinds {
            for category in categories {
                for amount in amounts {
                    let c = classify(kind, amount, category);
                    assert!(!(c.expense && c.income));
                }
            }
        }
    }
}
