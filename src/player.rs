//! Player-specific actor state: facing, walk animation, movement limits.

use crate::geom::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    Left,
    Right,
    Up,
    Down,
}

/// Cycles an object's gid through per-orientation frame lists while the
/// actor is walking.
#[derive(Debug, Clone)]
pub struct WalkingAnimation {
    pub orientation: Orientation,
    pub left_frames: Vec<u32>,
    pub right_frames: Vec<u32>,
    pub up_frames: Vec<u32>,
    pub down_frames: Vec<u32>,
    /// Simulation ticks per animation frame.
    pub animation_speed: u32,
    tick: u32,
}

impl Default for WalkingAnimation {
    fn default() -> Self {
        WalkingAnimation {
            orientation: Orientation::Left,
            left_frames: Vec::new(),
            right_frames: Vec::new(),
            up_frames: Vec::new(),
            down_frames: Vec::new(),
            animation_speed: 3,
            tick: 0,
        }
    }
}

impl WalkingAnimation {
    fn frames(&self) -> &[u32] {
        match self.orientation {
            Orientation::Left => &self.left_frames,
            Orientation::Right => &self.right_frames,
            Orientation::Up => &self.up_frames,
            Orientation::Down => &self.down_frames,
        }
    }

    /// Advance one walking tick; returns the gid to show, if any frames
    /// exist for the current orientation.
    pub fn walk(&mut self) -> Option<u32> {
        let speed = self.animation_speed.max(1);
        self.tick += 1;
        let len = self.frames().len();
        if len == 0 {
            return None;
        }
        let mut stage = (self.tick / speed) as usize;
        if stage >= len {
            self.tick = 0;
            stage = 0;
        }
        Some(self.frames()[stage])
    }

    /// Stop walking; returns the resting frame for the current facing.
    pub fn stop(&mut self) -> Option<u32> {
        self.tick = 0;
        self.frames().first().copied()
    }

    /// Change facing; returns the new resting frame when the facing
    /// actually changed.
    pub fn turn(&mut self, orientation: Orientation) -> Option<u32> {
        if self.orientation == orientation {
            return None;
        }
        self.orientation = orientation;
        self.tick = 0;
        self.frames().first().copied()
    }
}

/// The player actor. The underlying map object (rect, gid, properties)
/// lives in the level's object layer; this carries what is specific to
/// the player: speed, facing, walk frames and the optional movement cage.
#[derive(Debug, Clone)]
pub struct Player {
    /// Object id of the "player" object in the current level.
    pub object_id: u32,
    pub speed: i32,
    pub animation: WalkingAnimation,
    /// When non-empty, further confines the player beyond the map bounds
    /// (scripted cut-scenes and similar).
    pub restricted_rect: Rect,
}

impl Player {
    pub fn new(object_id: u32) -> Self {
        Player {
            object_id,
            speed: 2,
            animation: WalkingAnimation::default(),
            restricted_rect: Rect::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_cycles_frames_at_animation_speed() {
        let mut anim = WalkingAnimation {
            left_frames: vec![10, 11],
            animation_speed: 2,
            ..Default::default()
        };
        let frames: Vec<_> = (0..6).map(|_| anim.walk().unwrap()).collect();
        // ticks 1..=6 with speed 2: stages 0 1 1 (wrap) 0 0 1
        assert_eq!(frames, vec![10, 11, 11, 10, 10, 11]);
    }

    #[test]
    fn turn_resets_to_resting_frame() {
        let mut anim = WalkingAnimation {
            left_frames: vec![10, 11],
            right_frames: vec![20, 21],
            ..Default::default()
        };
        assert_eq!(anim.turn(Orientation::Right), Some(20));
        // turning to the current facing is a no-op
        assert_eq!(anim.turn(Orientation::Right), None);
        assert_eq!(anim.stop(), Some(20));
    }
}
