//! Contiguous-fit checks over a day's slot grid.

use super::availability::Slot;

/// Slot granularity in minutes.
pub const SLOT_MINUTES: u32 = 30;

/// How many consecutive slots a booking of `duration_min` occupies.
///
/// Never less than one: a zero-length booking still takes its start slot.
pub fn slots_needed(duration_min: u32) -> usize {
    duration_min.div_ceil(SLOT_MINUTES).max(1) as usize
}

/// True when `slots[index..index + needed]` exists and is entirely free.
pub fn fits_at(slots: &[Slot], index: usize, duration_min: u32) -> bool {
    let needed = slots_needed(duration_min);
    match slots.get(index..index + needed) {
        Some(run) => run.iter().all(|s| s.available),
        None => false,
    }
}

/// Selectable flag for every slot, in grid order.
pub fn selectable(slots: &[Slot], duration_min: u32) -> Vec<bool> {
    (0..slots.len())
        .map(|i| fits_at(slots, i, duration_min))
        .collect()
}

/// Index of the slot whose label is `time`.
pub fn position_of(slots: &[Slot], time: &str) -> Option<usize> {
    slots.iter().position(|s| s.time == time)
}
