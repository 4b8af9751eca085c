//! Canonical thumbnail size selection
//!
//! Stored thumbnails only ever use edge lengths from a small fixed ladder,
//! so that repeated requests for similar sizes resolve to the same disk
//! entry. Selection runs in one of two modes: unbounded (prefer a stored
//! size at least as large as the request) and bounded (prefer a stored size
//! that does not exceed the request).

use serde::{Deserialize, Serialize};

/// The fixed ladder of stored thumbnail edge lengths, parameterized on the
/// device screen dimensions which form its two largest rungs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizeLadder {
    screen_short: u32,
    screen_long: u32,
}

impl SizeLadder {
    pub const NONE: u32 = 0;
    pub const SMALL: u32 = 128;
    pub const MEDIUM: u32 = 256;
    pub const LARGE: u32 = 512;
    pub const EXTRA_LARGE: u32 = 768;

    /// Create a ladder for the given screen dimensions. The arguments may
    /// be passed in either order; the shorter edge always sorts first.
    pub fn new(screen_a: u32, screen_b: u32) -> Self {
        Self {
            screen_short: screen_a.min(screen_b),
            screen_long: screen_a.max(screen_b),
        }
    }

    pub fn screen_short(&self) -> u32 {
        self.screen_short
    }

    pub fn screen_long(&self) -> u32 {
        self.screen_long
    }

    /// Select the stored size for a request.
    ///
    /// Returns [`SizeLadder::NONE`] only in bounded mode, when even the
    /// smallest rung exceeds the requested size.
    pub fn select(&self, requested: (u32, u32), crop: bool, unbounded: bool) -> u32 {
        if unbounded {
            self.select_unbounded(requested, crop)
        } else {
            self.select_bounded(requested)
        }
    }

    /// The next ladder value after `size` in the direction matching the
    /// selection mode: upward for unbounded, downward for bounded. Returns
    /// [`SizeLadder::NONE`] once the ladder is exhausted or if `size` is
    /// not a rung of this ladder.
    pub fn next_size(&self, size: u32, unbounded: bool) -> u32 {
        let ascending = [
            Self::SMALL,
            Self::MEDIUM,
            Self::LARGE,
            Self::EXTRA_LARGE,
            self.screen_short,
            self.screen_long,
        ];
        let descending = [
            self.screen_long,
            self.screen_short,
            Self::EXTRA_LARGE,
            Self::LARGE,
            Self::MEDIUM,
            Self::SMALL,
        ];
        let rungs: &[u32] = if unbounded { &ascending } else { &descending };

        // Screen edges may coincide with each other or with a fixed rung;
        // walk a deduplicated ladder so every rung has a strictly later
        // successor and iterated walks always reach NONE.
        let mut deduped = [Self::NONE; 6];
        let mut len = 0;
        for &rung in rungs {
            if !deduped[..len].contains(&rung) {
                deduped[len] = rung;
                len += 1;
            }
        }

        for i in 0..len {
            if deduped[i] == size {
                return if i + 1 < len {
                    deduped[i + 1]
                } else {
                    Self::NONE
                };
            }
        }
        Self::NONE
    }

    fn select_unbounded(&self, requested: (u32, u32), crop: bool) -> u32 {
        // Prefer a stored size at least as large as the requested size.
        let candidates = [
            Self::SMALL,
            Self::MEDIUM,
            Self::LARGE,
            Self::EXTRA_LARGE,
            self.screen_short,
        ];
        for candidate in candidates {
            if acceptable_unbounded(requested, crop, candidate) {
                return candidate;
            }
        }
        if !acceptable_unbounded(requested, crop, self.screen_long) {
            log::warn!(
                "no thumbnail size covers {}x{}, using {}",
                requested.0,
                requested.1,
                self.screen_long
            );
        }
        self.screen_long
    }

    fn select_bounded(&self, requested: (u32, u32)) -> u32 {
        // Select a size that does not exceed the requested size.
        let candidates = [
            self.screen_long,
            self.screen_short,
            Self::EXTRA_LARGE,
            Self::LARGE,
            Self::MEDIUM,
        ];
        for candidate in candidates {
            if acceptable_bounded(requested, candidate) {
                return candidate;
            }
        }
        if !acceptable_bounded(requested, Self::SMALL) {
            log::warn!(
                "no thumbnail size fits within {}x{}",
                requested.0,
                requested.1
            );
            return Self::NONE;
        }
        Self::SMALL
    }
}

fn acceptable_unbounded(requested: (u32, u32), crop: bool, size: u32) -> bool {
    let sufficient_width = size >= requested.0;
    let sufficient_height = size >= requested.1;
    if crop {
        sufficient_width && sufficient_height
    } else {
        sufficient_width || sufficient_height
    }
}

fn acceptable_bounded(requested: (u32, u32), size: u32) -> bool {
    size <= requested.0 && size <= requested.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> SizeLadder {
        SizeLadder::new(540, 960)
    }

    #[test]
    fn screen_edges_sort_short_first() {
        let reversed = SizeLadder::new(960, 540);
        assert_eq!(reversed.screen_short(), 540);
        assert_eq!(reversed.screen_long(), 960);
    }

    #[test]
    fn unbounded_crop_needs_both_edges_covered() {
        // 200x200 cropped: 128 covers neither request edge fully, 256 does.
        assert_eq!(ladder().select((200, 200), true, true), 256);
        // Uncropped only needs one edge covered.
        assert_eq!(ladder().select((200, 100), false, true), 128);
    }

    #[test]
    fn unbounded_walks_up_to_screen_edges() {
        assert_eq!(ladder().select((600, 600), true, true), 768);
        assert_eq!(ladder().select((800, 500), true, true), 768);
        assert_eq!(ladder().select((900, 900), true, true), 960);
    }

    #[test]
    fn unbounded_always_resolves() {
        // Larger than every rung still yields the long screen edge.
        assert_eq!(ladder().select((4000, 4000), true, true), 960);
        assert_eq!(ladder().select((0, 0), true, true), 128);
    }

    #[test]
    fn bounded_prefers_largest_fitting() {
        assert_eq!(ladder().select((1000, 1000), false, false), 960);
        assert_eq!(ladder().select((600, 900), false, false), 540);
        assert_eq!(ladder().select((300, 300), false, false), 256);
        assert_eq!(ladder().select((130, 140), false, false), 128);
    }

    #[test]
    fn bounded_degenerate_request_yields_none() {
        assert_eq!(ladder().select((0, 0), false, false), SizeLadder::NONE);
        assert_eq!(ladder().select((50, 50), false, false), SizeLadder::NONE);
    }

    #[test]
    fn next_size_walks_the_ladder() {
        let l = ladder();
        assert_eq!(l.next_size(128, true), 256);
        assert_eq!(l.next_size(256, true), 512);
        assert_eq!(l.next_size(768, true), 540);
        assert_eq!(l.next_size(540, true), 960);
        assert_eq!(l.next_size(960, true), SizeLadder::NONE);

        assert_eq!(l.next_size(960, false), 540);
        assert_eq!(l.next_size(540, false), 768);
        assert_eq!(l.next_size(128, false), SizeLadder::NONE);
    }

    #[test]
    fn next_size_skips_duplicate_screen_rungs() {
        // A square screen repeats its edge in both walk directions.
        let square = SizeLadder::new(800, 800);
        assert_eq!(square.next_size(768, true), 800);
        assert_eq!(square.next_size(800, true), SizeLadder::NONE);
        assert_eq!(square.next_size(800, false), 768);

        // A screen edge can also coincide with a fixed rung.
        let coincident = SizeLadder::new(768, 960);
        assert_eq!(coincident.next_size(512, true), 768);
        assert_eq!(coincident.next_size(768, true), 960);
        assert_eq!(coincident.next_size(960, false), 768);
        assert_eq!(coincident.next_size(768, false), 512);
    }

    #[test]
    fn next_size_terminates_from_any_rung() {
        for l in [
            SizeLadder::new(540, 960),
            SizeLadder::new(800, 800),
            SizeLadder::new(768, 960),
            SizeLadder::new(128, 128),
        ] {
            for unbounded in [true, false] {
                for start in [128, 256, 512, 768, l.screen_short(), l.screen_long()] {
                    let mut size = start;
                    let mut steps = 0;
                    while size != SizeLadder::NONE {
                        size = l.next_size(size, unbounded);
                        steps += 1;
                        assert!(steps <= 6);
                    }
                }
            }
        }
    }

    #[test]
    fn next_size_of_unknown_value_is_none() {
        assert_eq!(ladder().next_size(300, true), SizeLadder::NONE);
        assert_eq!(ladder().next_size(300, false), SizeLadder::NONE);
    }
}
