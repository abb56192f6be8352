use super::types::{AccountSet, AccountType};

/// Amounts drawn from one account type: index 0 holds the household sum,
/// index `who + 1` the share of each individual.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Itemized(Vec<f64>);

impl Itemized {
    fn new(count: usize) -> Self {
        Self(vec![0.0; count + 1])
    }

    fn add(&mut self, who: usize, amount: f64) {
        self.0[0] += amount;
        self.0[who + 1] += amount;
    }

    pub fn sum(&self) -> f64 {
        self.0[0]
    }

    pub fn of(&self, who: usize) -> f64 {
        self.0[who + 1]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Outcome of one deposit or withdrawal across the household.
///
/// Only withdrawals are itemized by account; a deposit shows up in
/// `moved` and `total` alone.
#[derive(Clone, Debug, PartialEq)]
pub struct BankingResult {
    pub taxable: Itemized,
    pub tax_deferred: Itemized,
    pub tax_free: Itemized,
    /// Requested amount per individual, signed like the request.
    pub requested: Vec<f64>,
    /// Absolute amount actually moved per individual.
    pub moved: Vec<f64>,
    pub total: f64,
}

impl BankingResult {
    fn new(count: usize) -> Self {
        Self {
            taxable: Itemized::new(count),
            tax_deferred: Itemized::new(count),
            tax_free: Itemized::new(count),
            requested: vec![0.0; count],
            moved: vec![0.0; count],
            total: 0.0,
        }
    }

    pub fn get(&self, account: AccountType) -> &Itemized {
        match account {
            AccountType::Taxable => &self.taxable,
            AccountType::TaxDeferred => &self.tax_deferred,
            AccountType::TaxFree => &self.tax_free,
        }
    }

    fn get_mut(&mut self, account: AccountType) -> &mut Itemized {
        match account {
            AccountType::Taxable => &mut self.taxable,
            AccountType::TaxDeferred => &mut self.tax_deferred,
            AccountType::TaxFree => &mut self.tax_free,
        }
    }

    /// Money drawn that was never taxed as income on the way out.
    pub fn untaxed(&self) -> f64 {
        self.taxable.sum() + self.tax_free.sum()
    }

    pub fn shortfall_of(&self, who: usize) -> f64 {
        (self.requested[who].abs() - self.moved[who]).max(0.0)
    }

    pub fn shortfall(&self) -> f64 {
        (0..self.moved.len()).map(|who| self.shortfall_of(who)).sum()
    }
}

/// Share of a household request carried by individual `who`.
pub fn share(split: f64, who: usize, count: usize) -> f64 {
    if count == 1 {
        return 1.0;
    }
    let split = split.clamp(0.0, 1.0);
    if who == 0 { split } else { 1.0 - split }
}

/// Deposits (`amount > 0`) or withdraws (`amount < 0`) against year row
/// `n` without touching the balances.
///
/// Deposits land in the taxable account. Withdrawals drain taxable, then
/// tax-deferred, then tax-free, each capped at its balance.
pub fn itemize(amount: f64, accounts: &AccountSet, n: usize, split: f64) -> BankingResult {
    let count = accounts.count();
    let mut result = BankingResult::new(count);
    for who in 0..count {
        let sub = share(split, who, count) * amount;
        result.requested[who] = sub;
        if sub == 0.0 {
            continue;
        }
        if sub > 0.0 {
            result.moved[who] = sub;
            result.total += sub;
            continue;
        }

        let mut remain = -sub;
        let balances = accounts.get(n, who);
        for account in AccountType::ALL {
            if remain <= 0.0 {
                break;
            }
            let portion = remain.min(balances.get(account).max(0.0));
            if portion > 0.0 {
                result.get_mut(account).add(who, portion);
                remain -= portion;
            }
        }
        let moved = -sub - remain;
        result.moved[who] = moved;
        result.total += moved;
    }
    result
}

/// Same as [`itemize`], applying the result to row `n` when `commit`.
pub fn apply(
    amount: f64,
    accounts: &mut AccountSet,
    n: usize,
    split: f64,
    commit: bool,
) -> BankingResult {
    let result = itemize(amount, accounts, n, split);
    if !commit {
        return result;
    }

    for who in 0..accounts.count() {
        let balances = accounts.get_mut(n, who);
        if result.requested[who] > 0.0 {
            balances.taxable += result.moved[who];
            continue;
        }
        for account in AccountType::ALL {
            let slot = balances.get_mut(account);
            *slot = (*slot - result.get(account).of(who)).max(0.0);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Buckets;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    fn one(taxable: f64, deferred: f64, free: f64) -> AccountSet {
        AccountSet::new(2, &[Buckets::new(taxable, deferred, free)])
    }

    #[test]
    fn withdrawal_drains_taxable_before_tax_deferred() {
        let mut accounts = one(1_000.0, 5_000.0, 2_000.0);
        let result = apply(-3_000.0, &mut accounts, 0, 1.0, true);

        assert_approx(result.taxable.sum(), 1_000.0);
        assert_approx(result.tax_deferred.sum(), 2_000.0);
        assert_approx(result.tax_free.sum(), 0.0);
        assert_approx(result.total, 3_000.0);
        assert_eq!(accounts.get(0, 0), &Buckets::new(0.0, 3_000.0, 2_000.0));
    }

    #[test]
    fn exhausted_accounts_report_a_shortfall() {
        let mut accounts = one(100.0, 200.0, 300.0);
        let result = apply(-1_000.0, &mut accounts, 0, 1.0, true);

        assert_approx(result.total, 600.0);
        assert_approx(result.tax_free.sum(), 300.0);
        assert_approx(result.shortfall(), 400.0);
        assert_eq!(accounts.total(0), 0.0);
    }

    #[test]
    fn deposit_lands_in_taxable_only() {
        let mut accounts = one(10.0, 20.0, 30.0);
        let result = apply(500.0, &mut accounts, 0, 0.3, true);

        assert_approx(result.total, 500.0);
        assert_eq!(result.untaxed(), 0.0);
        assert_eq!(accounts.get(0, 0), &Buckets::new(510.0, 20.0, 30.0));
    }

    #[test]
    fn split_divides_between_individuals() {
        let mut accounts = AccountSet::new(
            1,
            &[Buckets::new(1_000.0, 0.0, 0.0), Buckets::new(1_000.0, 0.0, 0.0)],
        );
        let result = apply(-400.0, &mut accounts, 0, 0.25, true);

        assert_approx(result.taxable.of(0), 100.0);
        assert_approx(result.taxable.of(1), 300.0);
        assert_approx(result.taxable.sum(), 400.0);
        assert_approx(accounts.balance(0, 1, AccountType::Taxable), 700.0);
    }

    #[test]
    fn zero_amount_moves_nothing() {
        let accounts = one(10.0, 10.0, 10.0);
        let result = itemize(0.0, &accounts, 0, 1.0);
        assert_eq!(result.total, 0.0);
        assert_eq!(result.taxable.as_slice(), &[0.0, 0.0]);
    }

    proptest! {
        #[test]
        fn prop_waterfall_stops_at_tax_deferred(
            taxable in 0.0f64..1e6,
            deferred in 1.0f64..1e6,
            free in 0.0f64..1e6,
            frac in 0.01f64..0.99,
        ) {
            let w = taxable + frac * deferred;
            let accounts = one(taxable, deferred, free);
            let result = itemize(-w, &accounts, 0, 1.0);
            prop_assert!((result.taxable.sum() - taxable).abs() <= 1e-6);
            prop_assert!((result.tax_deferred.sum() - (w - taxable)).abs() <= 1e-6);
            prop_assert_eq!(result.tax_free.sum(), 0.0);
        }

        #[test]
        fn prop_split_conserves_the_total(
            amount in -2e6f64..2e6,
            split in 0.0f64..=1.0,
            a in proptest::array::uniform3(0.0f64..1e6),
            b in proptest::array::uniform3(0.0f64..1e6),
        ) {
            let accounts = AccountSet::new(
                1,
                &[Buckets::new(a[0], a[1], a[2]), Buckets::new(b[0], b[1], b[2])],
            );
            let result = itemize(amount, &accounts, 0, split);
            let per_person = result.moved[0] + result.moved[1];
            prop_assert!((per_person - result.total).abs() <= 1e-6);
            if amount < 0.0 {
                let drawn: f64 = AccountType::ALL.iter().map(|t| result.get(*t).sum()).sum();
                prop_assert!((drawn - result.total).abs() <= 1e-6);
            }
        }

        #[test]
        fn prop_uncommitted_calls_are_idempotent(
            amount in -2e6f64..2e6,
            split in 0.0f64..=1.0,
            a in proptest::array::uniform3(0.0f64..1e6),
            b in proptest::array::uniform3(0.0f64..1e6),
        ) {
            let mut accounts = AccountSet::new(
                1,
                &[Buckets::new(a[0], a[1], a[2]), Buckets::new(b[0], b[1], b[2])],
            );
            let before = accounts.clone();
            let first = apply(amount, &mut accounts, 0, split, false);
            let second = apply(amount, &mut accounts, 0, split, false);
            prop_assert_eq!(first, second);
            prop_assert_eq!(accounts, before);
        }
    }
}
