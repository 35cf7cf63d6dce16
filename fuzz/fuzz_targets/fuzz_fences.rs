#![no_main]

use libfuzzer_sys::fuzz_target;
use mdblocks::scan::{Marks, fence_count, fences_balanced, withhold_incomplete_link};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let marks = Marks::scan(text);
        assert_eq!(marks.fences, fence_count(text));
        assert_eq!(fences_balanced(text), marks.fences % 2 == 0);

        // Fence counts are additive across a blank-line split.
        if let Some((head, tail)) = text.split_once("\n\n") {
            assert_eq!(fence_count(head) + fence_count(tail), marks.fences);
        }

        let shown = withhold_incomplete_link(text);
        assert!(text.starts_with(shown));
        assert!(text.is_char_boundary(shown.len()));
    }
});
