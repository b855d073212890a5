//! Tile collision scratch buffer and the bisection search for the first
//! non-colliding position.

use crate::geom::{Point, Rect};

const CAPACITY: usize = 18;

/// Reusable scratch buffer of tile rects + gids touched by a query
/// rectangle: up to 3×3 cells from the main layer plus as many per-tile
/// collider sub-rects from the background layer. Reused across queries so
/// the per-frame hot path does not allocate.
#[derive(Debug, Clone)]
pub struct CollisionResult {
    rects: [Rect; CAPACITY],
    gids: [u32; CAPACITY],
    pub total: usize,
}

impl Default for CollisionResult {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionResult {
    pub const CAPACITY: usize = CAPACITY;

    pub fn new() -> Self {
        CollisionResult {
            rects: [Rect::default(); CAPACITY],
            gids: [0; CAPACITY],
            total: 0,
        }
    }

    pub fn clear(&mut self) {
        self.total = 0;
    }

    pub fn push(&mut self, gid: u32, rect: Rect) {
        if self.total < Self::CAPACITY {
            self.rects[self.total] = rect;
            self.gids[self.total] = gid;
            self.total += 1;
        }
    }

    /// Any filled slot with a non-empty gid means a solid hit.
    pub fn has_collided_gids(&self) -> bool {
        self.gids[..self.total].iter().any(|&gid| gid > 0)
    }

    /// (gid, rect) pairs of the filled slots that hold a tile.
    pub fn collided_rects(&self) -> impl Iterator<Item = (u32, Rect)> + '_ {
        (0..self.total).filter_map(move |i| {
            if self.gids[i] > 0 {
                Some((self.gids[i], self.rects[i]))
            } else {
                None
            }
        })
    }
}

/// Outcome of [`check_next_position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextPosition {
    /// Accepted top-left point for the moving rect.
    pub pos: Point,
    /// Whether the proposed position had to be walked back.
    pub collided: bool,
}

/// Find the first non-colliding position between `current` (known free)
/// and `next` (proposed).
///
/// `collect` fills the scratch buffer with everything a rect overlaps.
/// The fast path accepts `next` outright; otherwise the [free, blocked]
/// bracket is bisected until both axes are within one pixel, which gives
/// pixel-accurate slide-up-to-the-wall behaviour without per-pixel
/// stepping. On a collision, `result` is left holding the snapshot at the
/// blocked bracket endpoint so the caller can fire tile hooks from it.
pub fn check_next_position(
    mut collect: impl FnMut(&Rect, &mut CollisionResult),
    current: Rect,
    next: Rect,
    result: &mut CollisionResult,
) -> NextPosition {
    collect(&next, result);
    if !result.has_collided_gids() {
        return NextPosition {
            pos: next.topleft(),
            collided: false,
        };
    }

    let mut free = current.topleft();
    let mut blocked = next.topleft();
    while !free.is_close(blocked) {
        let mid = free.midpoint(blocked);
        collect(&next.at(mid), result);
        if result.has_collided_gids() {
            blocked = mid;
        } else {
            free = mid;
        }
    }

    // leave the blocked-endpoint snapshot in the buffer
    collect(&next.at(blocked), result);
    NextPosition {
        pos: free,
        collided: true,
    }
}
