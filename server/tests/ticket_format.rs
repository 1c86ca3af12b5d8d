//! Ticket id and booking reference format tests

use chrono::NaiveDate;
use server::models::booking::generate_reference;
use server::models::ticket::ticket_id_for;

#[test]
fn ticket_id_is_reference_plus_label() {
    let reference = "BKG-2025-0614-093005-0A1B";
    let long_label = "Z".repeat(20);
    for label in ["V1", "A12", long_label.as_str()] {
        let ticket_id = ticket_id_for(reference, label);
        assert_eq!(ticket_id, format!("TKT-{}-{}", reference, label));
    }
}

#[test]
fn reference_carries_timestamp_and_hex_suffix() {
    let at = NaiveDate::from_ymd_opt(2025, 12, 31)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap();
    let reference = generate_reference(at);

    let parts: Vec<&str> = reference.split('-').collect();
    assert_eq!(parts.len(), 5, "BKG-YYYY-MMDD-HHMMSS-XXXX: {}", reference);
    assert_eq!(parts[0], "BKG");
    assert_eq!(parts[1], "2025");
    assert_eq!(parts[2], "1231");
    assert_eq!(parts[3], "235959");
    assert_eq!(parts[4].len(), 4);
    assert!(parts[4].chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn references_differ_across_calls() {
    let at = NaiveDate::from_ymd_opt(2025, 6, 14)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    // Same second, different random suffixes: collisions are possible but
    // a run of 32 identical draws would indicate a broken RNG.
    let references: std::collections::HashSet<String> =
        (0..32).map(|_| generate_reference(at)).collect();
    assert!(references.len() > 1);
}

#[test]
fn ticket_ids_unique_per_booking_seat_set() {
    let reference = "BKG-2025-0614-120000-FFFF";
    let labels = ["V1", "V2", "V10", "V20"];
    let ids: std::collections::HashSet<String> = labels
        .iter()
        .map(|label| ticket_id_for(reference, label))
        .collect();
    assert_eq!(ids.len(), labels.len());
}
