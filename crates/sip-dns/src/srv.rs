//! RFC 2782 weighted selection.

use rand::Rng;

use crate::records::SrvRecord;

/// Number of leading records that share the first record's priority and
/// transport. `records` must be sorted.
pub fn band_len(records: &[SrvRecord]) -> usize {
    match records.first() {
        None => 0,
        Some(first) => records
            .iter()
            .take_while(|r| r.priority == first.priority && r.transport == first.transport)
            .count(),
    }
}

/// Removes and returns the next record in selection order.
///
/// Within the leading band the running weight sum is compared against a
/// uniform draw from `[0, total]`; the first record whose running sum reaches
/// the draw wins. Sorting puts zero-weight records at the front of a band, so
/// each is picked first with probability `1 / (total + 1)`. Once a band is
/// exhausted the next call moves on to the following one.
pub fn take_weighted<R: Rng + ?Sized>(records: &mut Vec<SrvRecord>, rng: &mut R) -> Option<SrvRecord> {
    let band = band_len(records);
    if band == 0 {
        return None;
    }

    let total: u32 = records[..band].iter().map(|r| u32::from(r.weight)).sum();
    let draw = rng.gen_range(0..=total);
    let mut running = 0u32;
    let index = records[..band]
        .iter()
        .position(|r| {
            running += u32::from(r.weight);
            running >= draw
        })
        .unwrap_or(band - 1);

    Some(records.remove(index))
}
