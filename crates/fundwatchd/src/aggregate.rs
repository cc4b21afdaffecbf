use fundwatch_core::{Regions, SnapshotStats};

/// Recomputes every region total from its records, then the snapshot-wide
/// stats from the regions. Whatever totals the input carried are overwritten.
pub fn aggregate(mut regions: Regions) -> (Regions, SnapshotStats) {
    let mut stats = SnapshotStats {
        region_count: regions.len(),
        ..SnapshotStats::default()
    };

    for region in regions.values_mut() {
        region.total_amount = region
            .records
            .iter()
            .fold(0u64, |sum, record| sum.saturating_add(record.lobby_total));
        stats.record_count += region.records.len();
        stats.total_amount = stats.total_amount.saturating_add(region.total_amount);
    }

    (regions, stats)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use fundwatch_core::{Party, PersonRecord, PositionCode, RegionRecord};

    use super::*;

    fn person(name: &str, position: &str, lobby_total: u64) -> PersonRecord {
        PersonRecord {
            name: name.to_owned(),
            photo_locator: None,
            position: PositionCode::parse(position).expect("valid position"),
            party: Party::Republican,
            lobby_total,
            organizations: BTreeSet::new(),
            next_election: None,
            running_for: None,
        }
    }

    #[test]
    fn totals_are_recomputed_from_records() {
        let mut regions = Regions::new();
        regions.insert(
            "Iowa".to_owned(),
            RegionRecord {
                total_amount: 1,
                records: vec![person("A", "IA-SEN", 1_000), person("B", "IA-01", 2_500)],
            },
        );
        regions.insert(
            "Utah".to_owned(),
            RegionRecord {
                total_amount: 999_999,
                records: vec![person("C", "UT-02", 500)],
            },
        );

        let (regions, stats) = aggregate(regions);

        assert_eq!(regions["Iowa"].total_amount, 3_500);
        assert_eq!(regions["Utah"].total_amount, 500);
        assert_eq!(
            stats,
            SnapshotStats {
                region_count: 2,
                record_count: 3,
                total_amount: 4_000,
            }
        );
    }

    #[test]
    fn empty_input_yields_zero_stats() {
        let (regions, stats) = aggregate(Regions::new());
        assert!(regions.is_empty());
        assert_eq!(stats, SnapshotStats::default());
    }
}
