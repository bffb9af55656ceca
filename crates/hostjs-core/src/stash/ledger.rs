//! Ownership ledger arithmetic for the heap stash.
//!
//! The stash holds `held` reference units on an owner. The engine reports
//! `live`, every unit on the owner including the stash's own. Once the two
//! meet, only the stash keeps the owner alive.

/// Whether an owner with `live` units is kept alive only by the `held`
/// units of the ledger.
pub fn is_unreferenced(live: u32, held: u32) -> bool {
    external_units(live, held) == 0
}

/// Units held outside the ledger.
pub fn external_units(live: u32, held: u32) -> u32 {
    live.saturating_sub(held)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unreferenced() {
        assert!(is_unreferenced(1, 1));
        assert!(is_unreferenced(3, 3));
        assert!(!is_unreferenced(2, 1));
        // a cell freed behind the ledger's back reports zero
        assert!(is_unreferenced(0, 2));
    }

    #[test]
    fn test_external_units() {
        assert_eq!(external_units(5, 2), 3);
        assert_eq!(external_units(1, 4), 0);
    }
}
