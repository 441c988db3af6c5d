//! Property-based tests for frame geometry and chunked transfer.

use pagecast::capture::{CapturedFrame, Dimensions};
use pagecast::processor::{
    crop_rect, fit_within, split_into_chunks, ChunkedTransfer, TransferState,
};
use proptest::prelude::*;

// ============================================================================
// STRATEGIES
// ============================================================================

fn arb_spec() -> impl Strategy<Value = Dimensions> {
    (
        prop_oneof![Just(0u32), 1u32..5000],
        prop_oneof![Just(0u32), 1u32..5000],
    )
        .prop_map(|(w, h)| Dimensions::new(w, h))
}

fn arb_frame_size() -> impl Strategy<Value = (u32, u32)> {
    (1u32..5000, 1u32..5000)
}

// ============================================================================
// GEOMETRY PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn resize_never_upscales((w, h) in arb_frame_size(), spec in arb_spec()) {
        if let Some((nw, nh)) = fit_within(w, h, spec) {
            prop_assert!(nw <= w && nh <= h);
            prop_assert!(nw >= 1 && nh >= 1);
            if spec.width > 0 {
                prop_assert!(nw <= spec.width.max(1));
            }
            if spec.height > 0 {
                prop_assert!(nh <= spec.height.max(1));
            }
        }
    }

    #[test]
    fn resize_skipped_when_frame_fits((w, h) in arb_frame_size(), spec in arb_spec()) {
        let fits = (spec.width == 0 || w <= spec.width) && (spec.height == 0 || h <= spec.height);
        if fits {
            prop_assert_eq!(fit_within(w, h, spec), None);
        }
    }

    #[test]
    fn crop_stays_inside_and_centered((w, h) in arb_frame_size(), spec in arb_spec()) {
        if let Some(rect) = crop_rect(w, h, spec) {
            prop_assert!(rect.x + rect.width <= w);
            prop_assert!(rect.y + rect.height <= h);
            prop_assert!(rect.width <= w && rect.height <= h);
            prop_assert_eq!(rect.x, (w - rect.width) / 2);
            prop_assert_eq!(rect.y, (h - rect.height) / 2);
        }
    }
}

// ============================================================================
// CHUNKED TRANSFER PROPERTIES
// ============================================================================

fn arb_delivery() -> impl Strategy<Value = (usize, usize, Vec<usize>)> {
    (1usize..60, 1usize..12).prop_flat_map(|(count, chunk_size)| {
        let chunks = count.div_ceil(chunk_size);
        let order = Just((0..chunks).collect::<Vec<_>>()).prop_shuffle();
        (Just(count), Just(chunk_size), order)
    })
}

proptest! {
    #[test]
    fn chunk_arrival_order_does_not_matter((count, chunk_size, order) in arb_delivery()) {
        let frames: Vec<CapturedFrame> = (0..count)
            .map(|i| CapturedFrame::new(i, i as u32 + 1, Vec::new()))
            .collect();
        let mut chunks: Vec<Option<Vec<CapturedFrame>>> =
            split_into_chunks(frames, chunk_size).into_iter().map(Some).collect();
        let total = chunks.len();

        let mut transfer = ChunkedTransfer::begin(total);
        for (n, &i) in order.iter().enumerate() {
            let chunk = chunks[i].take().unwrap();
            let state = transfer.append(chunk, false);
            if n + 1 < total {
                prop_assert_eq!(state, TransferState::Pending { received: n + 1, total });
            } else {
                prop_assert_eq!(state, TransferState::Complete);
            }
        }

        let pages: Vec<u32> = transfer.into_ordered().iter().map(|f| f.page).collect();
        let expected: Vec<u32> = (1..=count as u32).collect();
        prop_assert_eq!(pages, expected);
    }

    #[test]
    fn split_preserves_items(count in 0usize..100, chunk_size in 0usize..20) {
        let items: Vec<usize> = (0..count).collect();
        let chunks = split_into_chunks(items.clone(), chunk_size);
        prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= chunk_size.max(1)));
        let flat: Vec<usize> = chunks.into_iter().flatten().collect();
        prop_assert_eq!(flat, items);
    }
}
