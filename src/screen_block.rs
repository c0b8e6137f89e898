use std::iter::FusedIterator;
use std::num::NonZeroU32;

use crate::geometry::{ScreenBlock, ScreenPoint, ScreenSize};

pub trait ScreenBlockExt {
    fn from_size(size: ScreenSize) -> Self;
    fn is_empty(&self) -> bool;
    fn area(&self) -> u32;
    fn internal_points(&self) -> InternalPoints;
    fn tile_ordering(&self, tile_size: NonZeroU32) -> Vec<ScreenBlock>;
}

impl ScreenBlockExt for ScreenBlock {
    fn from_size(size: ScreenSize) -> Self {
        ScreenBlock::new(ScreenPoint::origin(), ScreenPoint::from(size))
    }

    fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    fn area(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.width() * self.height()
        }
    }

    /// Create an iterator over coordinates (x, y) pairs inside the block,
    /// in C order (x changes first, then y)
    fn internal_points(&self) -> InternalPoints {
        if self.is_empty() {
            InternalPoints::empty()
        } else {
            InternalPoints {
                min_x: self.min.x,
                max: self.max,
                cursor: self.min,
            }
        }
    }

    /// Splits the block into tiles of `tile_size` x `tile_size` pixels (clipped on the bottom and
    /// right edges), ordered from the center outwards.
    fn tile_ordering(&self, tile_size: NonZeroU32) -> Vec<ScreenBlock> {
        if self.is_empty() {
            return Vec::new();
        }

        let tile_size = tile_size.get();
        let columns = self.width().div_ceil(tile_size);
        let rows = self.height().div_ceil(tile_size);

        let mut tiles: Vec<ScreenBlock> = (0..rows)
            .flat_map(|row| (0..columns).map(move |column| (column, row)))
            .map(|(column, row)| {
                let min = ScreenPoint::new(
                    self.min.x + column * tile_size,
                    self.min.y + row * tile_size,
                );
                let max = ScreenPoint::new(
                    (min.x + tile_size).min(self.max.x),
                    (min.y + tile_size).min(self.max.y),
                );
                ScreenBlock::new(min, max)
            })
            .collect();

        // Chebyshev distance in tiles from the middle one, ties broken by position
        let middle = (i64::from(columns - 1) / 2, i64::from(rows - 1) / 2);
        tiles.sort_by_key(|tile| {
            let column = i64::from((tile.min.x - self.min.x) / tile_size);
            let row = i64::from((tile.min.y - self.min.y) / tile_size);
            let distance = (column - middle.0).abs().max((row - middle.1).abs());
            (distance, row, column)
        });
        tiles
    }
}

#[derive(Copy, Clone, Debug)]
pub struct InternalPoints {
    min_x: u32,
    max: ScreenPoint,

    cursor: ScreenPoint,
}

impl InternalPoints {
    // Construct an iterator over internal points that returns no points
    fn empty() -> Self {
        InternalPoints {
            min_x: 1,
            max: ScreenPoint::origin(),

            cursor: ScreenPoint::origin(),
        }
    }
}

impl Iterator for InternalPoints {
    type Item = ScreenPoint;

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.y >= self.max.y {
            return None;
        }

        let ret = self.cursor;

        debug_assert!(self.cursor.x < self.max.x);
        self.cursor.x += 1;
        if self.cursor.x >= self.max.x {
            self.cursor.x = self.min_x;
            self.cursor.y += 1;
        }

        Some(ret)
    }
}

impl ExactSizeIterator for InternalPoints {
    fn len(&self) -> usize {
        if self.cursor.y >= self.max.y {
            0
        } else {
            let whole_rows = (self.max.x - self.min_x) * (self.max.y - self.cursor.y - 1);
            let current_row = self.max.x - self.cursor.x;
            (whole_rows + current_row) as usize
        }
    }
}

impl FusedIterator for InternalPoints {}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn blocks() -> impl Strategy<Value = ScreenBlock> {
        const RANGE: std::ops::Range<u32> = 0..100u32;
        (RANGE, RANGE, RANGE, RANGE).prop_map(|(x0, y0, x1, y1)| {
            ScreenBlock::new(ScreenPoint::new(x0, y0), ScreenPoint::new(x1, y1))
        })
    }

    fn contains(block: &ScreenBlock, point: &ScreenPoint) -> bool {
        point.x >= block.min.x && point.x < block.max.x && point.y >= block.min.y && point.y < block.max.y
    }

    /// Check that all pixels in the block are covered exactly once by a pixel iterator
    fn check_pixel_iterator_covers_block(pixel_iterator: impl Iterator<Item = ScreenPoint>, block: ScreenBlock) {
        let mut seen = vec![false; block.area() as usize];
        for p in pixel_iterator {
            assert!(contains(&block, &p));
            let index = (p.x - block.min.x) + (p.y - block.min.y) * block.width();
            assert!(!seen[index as usize]);
            seen[index as usize] = true;
        }
        assert!(seen.into_iter().all(|v| v));
    }

    /// Goes through the whole iterator and checks that at every step iterator's size hint is equal
    /// to its reported length and equal to the expected number of elements.
    fn check_exact_length(mut iterator: impl ExactSizeIterator, expected_length: usize) {
        for remaining in (0..=expected_length).rev() {
            assert!(iterator.len() == remaining);
            assert!(iterator.size_hint() == (remaining, Some(remaining)));
            if remaining > 0 {
                assert!(iterator.next().is_some());
            }
        }
        assert!(iterator.next().is_none());
    }

    #[proptest]
    fn pixel_iterator_covers_all(#[strategy(blocks())] block: ScreenBlock) {
        check_pixel_iterator_covers_block(block.internal_points(), block);
    }

    #[proptest]
    fn pixel_iterator_exact_length(#[strategy(blocks())] block: ScreenBlock) {
        check_exact_length(block.internal_points(), block.area() as usize);
    }

    #[proptest]
    fn tiles_cover_all(#[strategy(blocks())] block: ScreenBlock, #[strategy(1u32..40)] tile_size: u32) {
        let tiles = block.tile_ordering(NonZeroU32::new(tile_size).unwrap());
        check_pixel_iterator_covers_block(tiles.iter().flat_map(|tile| tile.internal_points()), block);
        for tile in tiles {
            assert!(!tile.is_empty());
            assert!(tile.width() <= tile_size);
            assert!(tile.height() <= tile_size);
        }
    }

    #[test]
    fn tiles_start_in_the_middle() {
        let block = ScreenBlock::from_size(ScreenSize::new(50, 30));
        let tiles = block.tile_ordering(NonZeroU32::new(10).unwrap());
        assert!(tiles.len() == 15);
        assert!(tiles[0] == ScreenBlock::new(ScreenPoint::new(20, 10), ScreenPoint::new(30, 20)));
        assert!(tiles[14].min.x == 40 || tiles[14].min.x == 0);
    }
}
