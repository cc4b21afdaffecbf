use fundwatch_core::{AmountChange, ChangeReport, RecordRef, Snapshot};

/// Compares the freshly built snapshot against the last published one.
///
/// Only regions present in both snapshots are compared; an absent previous
/// snapshot yields an empty report.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot, noise_threshold: u64) -> ChangeReport {
    let mut report = ChangeReport::default();
    let Some(previous) = previous else {
        return report;
    };

    for (region_id, region) in &current.regions {
        let Some(old_region) = previous.regions.get(region_id) else {
            continue;
        };

        let delta = signed_delta(old_region.total_amount, region.total_amount);
        if delta.unsigned_abs() > noise_threshold {
            report.amount_changes.push(AmountChange {
                region: region_id.clone(),
                old_amount: old_region.total_amount,
                new_amount: region.total_amount,
                delta,
            });
            report.total_delta = report.total_delta.saturating_add(delta);
        }

        let old_names = old_region.record_names();
        let new_names = region.record_names();

        report.new_records.extend(
            new_names
                .difference(&old_names)
                .map(|name| record_ref(region_id, name)),
        );
        report.removed_records.extend(
            old_names
                .difference(&new_names)
                .map(|name| record_ref(region_id, name)),
        );
    }

    if !report.is_empty() {
        tracing::info!(
            new_records = report.new_records.len(),
            removed_records = report.removed_records.len(),
            amount_changes = report.amount_changes.len(),
            total_delta = report.total_delta,
            "changes detected"
        );
    }

    report
}

fn record_ref(region: &str, name: &str) -> RecordRef {
    RecordRef {
        region: region.to_owned(),
        name: name.to_owned(),
    }
}

fn signed_delta(old: u64, new: u64) -> i64 {
    let delta = i128::from(new) - i128::from(old);
    i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use fundwatch_core::{Party, PersonRecord, PositionCode, RegionRecord, Regions, SnapshotStats};

    use super::*;

    fn person(name: &str, lobby_total: u64) -> PersonRecord {
        PersonRecord {
            name: name.to_owned(),
            photo_locator: None,
            position: PositionCode::parse("NV-01").expect("valid position"),
            party: Party::Democrat,
            lobby_total,
            organizations: BTreeSet::new(),
            next_election: None,
            running_for: None,
        }
    }

    fn snapshot(regions: &[(&str, Vec<PersonRecord>)]) -> Snapshot {
        let regions: Regions = regions
            .iter()
            .map(|(id, records)| {
                let total_amount = records.iter().map(|record| record.lobby_total).sum();
                (
                    (*id).to_owned(),
                    RegionRecord {
                        total_amount,
                        records: records.clone(),
                    },
                )
            })
            .collect();
        Snapshot::new(Utc::now(), "test", SnapshotStats::default(), regions)
    }

    #[test]
    fn first_run_reports_nothing() {
        let current = snapshot(&[("Nevada", vec![person("A", 10)])]);
        assert!(diff(None, &current, 1_000).is_empty());
    }

    #[test]
    fn deltas_within_noise_threshold_are_suppressed() {
        let previous = snapshot(&[
            ("Nevada", vec![person("A", 1_000_000)]),
            ("Oregon", vec![person("B", 1_000_000)]),
        ]);
        let current = snapshot(&[
            ("Nevada", vec![person("A", 1_000_500)]),
            ("Oregon", vec![person("B", 1_002_000)]),
        ]);

        let report = diff(Some(&previous), &current, 1_000);

        assert_eq!(
            report.amount_changes,
            vec![AmountChange {
                region: "Oregon".to_owned(),
                old_amount: 1_000_000,
                new_amount: 1_002_000,
                delta: 2_000,
            }]
        );
        assert_eq!(report.total_delta, 2_000);
    }

    #[test]
    fn added_and_removed_names_are_reported_per_region() {
        let previous = snapshot(&[
            ("Nevada", vec![person("Stays", 5), person("Leaves", 5)]),
            ("Gone", vec![person("Ignored", 5)]),
        ]);
        let current = snapshot(&[
            ("Nevada", vec![person("Stays", 5), person("Arrives", 5)]),
            ("Fresh", vec![person("Also Ignored", 5)]),
        ]);

        let report = diff(Some(&previous), &current, 1_000);

        assert_eq!(report.new_records, vec![record_ref("Nevada", "Arrives")]);
        assert_eq!(report.removed_records, vec![record_ref("Nevada", "Leaves")]);
        assert!(report.amount_changes.is_empty());
    }

    #[test]
    fn decreases_produce_negative_deltas() {
        let previous = snapshot(&[("Nevada", vec![person("A", 50_000)])]);
        let current = snapshot(&[("Nevada", vec![person("A", 10_000)])]);

        let report = diff(Some(&previous), &current, 1_000);
        assert_eq!(report.amount_changes[0].delta, -40_000);
        assert_eq!(report.total_delta, -40_000);
        assert_eq!(signed_delta(u64::MAX, 0), i64::MIN);
    }
}
