use float_ord::FloatOrd;
use tracing::instrument;

use crate::Quad;

/// Boxes whose top-left corners are closer than this vertically count as one line.
pub const LINE_TOLERANCE: f32 = 10.0;

/// Puts detected boxes in reading order, top to bottom then left to right.
///
/// Boxes are stably sorted on their top-left `(y, x)`. A single pass over
/// adjacent pairs then swaps neighbours that sit on the same line within
/// [`LINE_TOLERANCE`] but are horizontally inverted. The pass runs once and is
/// not repeated until stable, so lines with several inversions may stay
/// partially out of order.
#[instrument(level = "trace", skip(boxes), fields(count = boxes.len()))]
pub fn sort_boxes(mut boxes: Vec<Quad>) -> Vec<Quad> {
    boxes.sort_by_key(|it| {
        let top_left = it.top_left();
        (FloatOrd(top_left.y), FloatOrd(top_left.x))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        let current = boxes[i].top_left();
        let next = boxes[i + 1].top_left();
        if (next.y - current.y).abs() < LINE_TOLERANCE && next.x < current.x {
            boxes.swap(i, i + 1);
        }
    }
    boxes
}
