//! Threshold filtering and the aggregation modes.
//!
//! Given the votes of a round, the power table and the parameters:
//!
//! 1. Per source, votes are grouped by value. A value is accepted when its
//!    backing power reaches `threshold_a` percent of the total power.
//! 2. The round finalizes only when the validators backing at least one
//!    accepted value hold `threshold_b` percent of the total power.
//! 3. The accepted `(value, backing power)` pairs of all sources are
//!    combined with the configured [`Mode`].
//!
//! Only integer arithmetic is used. Inputs are ordered maps, so the result
//! is a pure function of their contents.

use std::collections::{BTreeMap, BTreeSet};

use feedr_types::{Mode, Params, Price, SourceId, ValidatorId, THRESHOLD_DENOMINATOR};

use super::round::Vote;
use super::{NotFinalized, PowerTable};

/// Whether `power` reaches `threshold` percent of `total`.
fn meets(power: u128, threshold: u32, total: u64) -> bool {
    power * u128::from(THRESHOLD_DENOMINATOR) >= u128::from(threshold) * u128::from(total)
}

/// Aggregate the votes of one round into a price with `decimal`.
pub fn aggregate(
    votes: &BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>>,
    powers: &PowerTable,
    params: &Params,
    decimal: u8,
) -> Result<Price, NotFinalized> {
    if votes.is_empty() {
        return Err(NotFinalized::NoSubmissions);
    }
    let total = powers.total();

    // value -> summed backing power over all sources
    let mut accepted: BTreeMap<u128, u128> = BTreeMap::new();
    let mut backers: BTreeSet<ValidatorId> = BTreeSet::new();

    for by_validator in votes.values() {
        let mut by_value: BTreeMap<u128, (u128, Vec<ValidatorId>)> = BTreeMap::new();
        for (validator, vote) in by_validator {
            let power = powers.power_of(validator).unwrap_or(0);
            let entry = by_value.entry(vote.price.value).or_default();
            entry.0 += u128::from(power);
            entry.1.push(*validator);
        }
        for (value, (power, voters)) in by_value {
            if power > 0 && meets(power, params.threshold_a, total) {
                *accepted.entry(value).or_default() += power;
                backers.extend(voters);
            }
        }
    }

    let round_power: u64 = backers
        .iter()
        .filter_map(|v| powers.power_of(v))
        .sum();
    if accepted.is_empty() || total == 0 || !meets(u128::from(round_power), params.threshold_b, total)
    {
        return Err(NotFinalized::ThresholdNotMet {
            accepted: round_power,
            total,
        });
    }

    let value = match params.mode {
        Mode::Median => weighted_median(&accepted),
        Mode::WeightedMean => weighted_mean(&accepted).ok_or(NotFinalized::Overflow)?,
        Mode::MaxPower => max_power(&accepted),
    };
    Ok(Price::new(value, decimal))
}

/// Smallest value whose cumulative weight reaches half the total weight.
fn weighted_median(weights: &BTreeMap<u128, u128>) -> u128 {
    let total: u128 = weights.values().sum();
    let mut cumulative = 0u128;
    for (value, weight) in weights {
        cumulative += weight;
        if cumulative.saturating_mul(2) >= total {
            return *value;
        }
    }
    weights.keys().next_back().copied().unwrap_or_default()
}

/// `(Σ v·w + W/2) / W`, i.e. the weighted mean rounded half up.
///
/// Returns `None` on `u128` overflow, which every node hits identically.
fn weighted_mean(weights: &BTreeMap<u128, u128>) -> Option<u128> {
    let mut sum = 0u128;
    let mut total = 0u128;
    for (value, weight) in weights {
        sum = sum.checked_add(value.checked_mul(*weight)?)?;
        total = total.checked_add(*weight)?;
    }
    if total == 0 {
        return None;
    }
    Some(sum.checked_add(total / 2)? / total)
}

/// Value with the greatest weight; ties go to the lower value.
fn max_power(weights: &BTreeMap<u128, u128>) -> u128 {
    let mut best: Option<(u128, u128)> = None;
    for (value, weight) in weights {
        match best {
            Some((_, w)) if *weight <= w => {}
            _ => best = Some((*value, *weight)),
        }
    }
    best.map(|(v, _)| v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_types::ValidatorPower;

    fn id(n: u8) -> ValidatorId {
        ValidatorId([n; 20])
    }

    fn table(powers: &[(u8, u64)]) -> PowerTable {
        let validators: Vec<ValidatorPower> = powers
            .iter()
            .map(|(n, power)| ValidatorPower {
                validator: id(*n),
                power: *power,
            })
            .collect();
        PowerTable::from_validators(&validators).expect("table")
    }

    fn params(a: u32, b: u32, mode: Mode) -> Params {
        Params {
            threshold_a: a,
            threshold_b: b,
            mode,
            ..Params::default()
        }
    }

    fn votes(entries: &[(SourceId, u8, u128)]) -> BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>> {
        let mut out: BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>> = BTreeMap::new();
        for (source, validator, value) in entries {
            out.entry(*source).or_default().insert(
                id(*validator),
                Vote {
                    nonce: 1,
                    price: Price::new(*value, 2),
                },
            );
        }
        out
    }

    #[test]
    fn test_two_validators_same_price_finalize() {
        let powers = table(&[(1, 40), (2, 25), (3, 35)]);
        let v = votes(&[(1, 1, 1000), (1, 2, 1000)]);
        let price = aggregate(&v, &powers, &params(30, 60, Mode::Median), 2).expect("finalized");
        assert_eq!(price, Price::new(1000, 2));
    }

    #[test]
    fn test_value_below_threshold_a_excluded() {
        let powers = table(&[(1, 40), (2, 25), (3, 35)]);
        let v = votes(&[(1, 2, 1000)]);
        let err = aggregate(&v, &powers, &params(30, 60, Mode::Median), 2).expect_err("open");
        assert_eq!(
            err,
            NotFinalized::ThresholdNotMet {
                accepted: 0,
                total: 100
            }
        );
    }

    #[test]
    fn test_threshold_b_boundary() {
        let powers = table(&[(1, 60), (2, 40)]);
        let v = votes(&[(1, 1, 500)]);
        // exactly 60% finalizes
        assert!(aggregate(&v, &powers, &params(30, 60, Mode::Median), 2).is_ok());
        // 61% required does not
        assert!(aggregate(&v, &powers, &params(30, 61, Mode::Median), 2).is_err());
    }

    #[test]
    fn test_no_votes() {
        let powers = table(&[(1, 1)]);
        let err = aggregate(&BTreeMap::new(), &powers, &Params::default(), 2).expect_err("empty");
        assert_eq!(err, NotFinalized::NoSubmissions);
    }

    #[test]
    fn test_median_across_sources() {
        let powers = table(&[(1, 50), (2, 30), (3, 20)]);
        // three sources, each with a unanimous value
        let v = votes(&[
            (1, 1, 100),
            (1, 2, 100),
            (1, 3, 100),
            (2, 1, 110),
            (2, 2, 110),
            (2, 3, 110),
            (3, 1, 130),
            (3, 2, 130),
            (3, 3, 130),
        ]);
        let price = aggregate(&v, &powers, &params(50, 50, Mode::Median), 2).expect("finalized");
        assert_eq!(price.value, 110);
    }

    #[test]
    fn test_weighted_mean_rounds_half_up() {
        let mut weights = BTreeMap::new();
        weights.insert(10, 1);
        weights.insert(11, 1);
        // 10.5 rounds up
        assert_eq!(weighted_mean(&weights), Some(11));
        weights.insert(10, 3);
        // (30 + 11) / 4 = 10.25
        assert_eq!(weighted_mean(&weights), Some(10));
    }

    #[test]
    fn test_weighted_mean_overflow_is_reported() {
        let mut weights = BTreeMap::new();
        weights.insert(u128::MAX, 2);
        assert_eq!(weighted_mean(&weights), None);

        let powers = table(&[(1, 2)]);
        let mut v = votes(&[]);
        v.entry(1).or_default().insert(
            id(1),
            Vote {
                nonce: 1,
                price: Price::new(u128::MAX, 0),
            },
        );
        let err = aggregate(&v, &powers, &params(50, 50, Mode::WeightedMean), 0)
            .expect_err("overflow");
        assert_eq!(err, NotFinalized::Overflow);
    }

    #[test]
    fn test_max_power_tie_goes_to_lower_value() {
        let mut weights = BTreeMap::new();
        weights.insert(200, 5);
        weights.insert(100, 5);
        weights.insert(300, 4);
        assert_eq!(max_power(&weights), 100);
    }

    #[test]
    fn test_split_vote_with_low_threshold_a() {
        let powers = table(&[(1, 40), (2, 35), (3, 25)]);
        let v = votes(&[(1, 1, 1000), (1, 2, 1010), (1, 3, 2000)]);
        // 25% is below threshold_a, the two others are accepted
        let median = aggregate(&v, &powers, &params(30, 60, Mode::Median), 2).expect("median");
        assert_eq!(median.value, 1000);
        let mean = aggregate(&v, &powers, &params(30, 60, Mode::WeightedMean), 2).expect("mean");
        // (1000*40 + 1010*35 + 37) / 75 = 1004.67 -> 1005
        assert_eq!(mean.value, 1005);
    }
}
