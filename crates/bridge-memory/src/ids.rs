//! Monotonic per-(kind, date) ID generation (§3.4, §8).

/// Scan `existing_ids` for the highest `_NNN` suffix within `{prefix}_{YYYYMMDD}_`
/// and return the next sequence number.
fn next_seq(existing_ids: &[&str], prefix: &str, date: &str) -> u32 {
    let date_part = date.replace('-', "");
    let pattern = format!("{prefix}_{date_part}_");
    existing_ids
        .iter()
        .filter_map(|id| id.strip_prefix(&pattern))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .map(|m| m + 1)
        .unwrap_or(0)
}

pub fn generate_obs_id(existing_ids: &[&str], date: &str) -> String {
    let date_part = date.replace('-', "");
    let seq = next_seq(existing_ids, "obs", date);
    format!("obs_{date_part}_{seq:03}")
}

pub fn generate_ltm_id(existing_ids: &[&str], date: &str) -> String {
    let date_part = date.replace('-', "");
    let seq = next_seq(existing_ids, "ltm", date);
    format!("ltm_{date_part}_{seq:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_id_of_the_day_is_seq_zero() {
        assert_eq!(generate_obs_id(&[], "2026-07-27"), "obs_20260727_000");
    }

    #[test]
    fn sequence_increments_from_existing() {
        let existing = ["obs_20260727_000", "obs_20260727_001"];
        assert_eq!(generate_obs_id(&existing, "2026-07-27"), "obs_20260727_002");
    }

    #[test]
    fn different_dates_restart_sequence() {
        let existing = ["obs_20260726_005"];
        assert_eq!(generate_obs_id(&existing, "2026-07-27"), "obs_20260727_000");
    }

    #[test]
    fn ltm_ids_use_their_own_prefix() {
        let existing = ["obs_20260727_003"];
        assert_eq!(generate_ltm_id(&existing, "2026-07-27"), "ltm_20260727_000");
    }

    #[test]
    fn monotonic_across_many_calls() {
        let mut ids: Vec<String> = Vec::new();
        for _ in 0..5 {
            let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
            ids.push(generate_obs_id(&refs, "2026-07-27"));
        }
        assert_eq!(
            ids,
            vec![
                "obs_20260727_000",
                "obs_20260727_001",
                "obs_20260727_002",
                "obs_20260727_003",
                "obs_20260727_004",
            ]
        );
    }
}
