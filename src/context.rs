//! The per-frame simulation: moving actors through the level while firing
//! tile- and object-level behaviour hooks.

use std::collections::HashSet;

use macroquad::logging::error;

use crate::collision::CollisionResult;
use crate::geom::{Point, Rect};
use crate::level::Level;
use crate::player::{Orientation, Player};

/// Well-known property keys whose string values are behaviour scripts.
pub mod hooks {
    pub const ON_CREATE: &str = "on_create";
    pub const ON_SHOW: &str = "on_show";
    pub const ON_ENTER: &str = "on_enter";
    pub const ON_LEAVE: &str = "on_leave";
    pub const ON_COLLISION: &str = "on_collision";
    pub const ON_ANIMATE: &str = "on_animate";
    pub const ON_CLICK: &str = "on_click";
}

/// What fired, and the named values the script environment receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Create { this: u32 },
    Show { this: u32 },
    /// `obj` started overlapping `this`.
    Enter { obj: u32, this: u32 },
    /// `obj` stopped overlapping `this`.
    Leave { obj: u32, this: u32 },
    /// `obj` keeps overlapping `this`.
    ObjectCollision { obj: u32, this: u32 },
    /// `obj` ran into a solid tile.
    TileCollision { obj: u32, gid: u32, tile_rect: Rect },
    Animate { this: u32, elapsed_ms: u32 },
    Click { this: u32, pos: Point },
}

/// Directives a hook may issue to override the frame's default physics.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookControl {
    prevent_moving: bool,
    prevent_colliding: bool,
}

impl HookControl {
    /// Veto the movement that triggered this hook.
    pub fn prevent_moving(&mut self) {
        self.prevent_moving = true;
    }

    /// Drop this collision pair for the frame: no default veto/push, no
    /// enter/leave bookkeeping.
    pub fn prevent_colliding(&mut self) {
        self.prevent_colliding = true;
    }

    pub fn moving_prevented(&self) -> bool {
        self.prevent_moving
    }

    pub fn colliding_prevented(&self) -> bool {
        self.prevent_colliding
    }
}

/// The narrow contract with the scripting collaborator: the engine calls
/// back with the hook's script text and named values; the host interprets
/// it however it likes and may issue [`HookControl`] directives.
pub trait ScriptHost {
    fn run_hook(
        &mut self,
        script: &str,
        event: HookEvent,
        control: &mut HookControl,
    ) -> Result<(), String>;
}

/// Host that ignores every hook; useful for tools and tests.
#[derive(Debug, Default)]
pub struct NoScripts;

impl ScriptHost for NoScripts {
    fn run_hook(&mut self, _: &str, _: HookEvent, _: &mut HookControl) -> Result<(), String> {
        Ok(())
    }
}

/// Direction keys held this frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

/// Snapshot of one candidate object taken before hooks run, so hook
/// dispatch never aliases the live object graph.
#[derive(Debug, Clone)]
struct Candidate {
    id: u32,
    rect: Rect,
    solid: bool,
    pushable: bool,
    on_enter: Option<String>,
    on_leave: Option<String>,
    on_collision: Option<String>,
}

pub struct GameContext {
    pub level: Level,
    pub player: Player,
    pub player_input_allowed: bool,
    host: Box<dyn ScriptHost>,
    scratch: CollisionResult,
}

impl GameContext {
    pub fn new(level: Level, host: Box<dyn ScriptHost>) -> Self {
        let mut ctx = GameContext {
            player: Player::new(level.player_id),
            level,
            player_input_allowed: true,
            host,
            scratch: CollisionResult::new(),
        };
        ctx.bind_player();
        ctx.fire_object_hooks(hooks::ON_CREATE);
        ctx
    }

    /// Swap in another level; rebinds the player and fires `on_create`
    /// hooks of the new level's objects.
    pub fn set_level(&mut self, mut level: Level) {
        self.level.stop();
        level.start();
        self.level = level;
        self.bind_player();
        self.fire_object_hooks(hooks::ON_CREATE);
    }

    /// Make the level current: show the player and fire `on_show` hooks.
    pub fn start(&mut self) {
        self.level.start();
        self.fire_object_hooks(hooks::ON_SHOW);
    }

    fn bind_player(&mut self) {
        self.player.object_id = self.level.player_id;
        self.player.animation.orientation = self.level.player_orientation;
        self.player.animation.left_frames = self.level.player_left_frames.clone();
        self.player.animation.right_frames = self.level.player_right_frames.clone();
        let speed = self
            .level
            .map()
            .borrow()
            .find_object_group(self.level.objects_layer)
            .and_then(|g| g.object(self.player.object_id))
            .and_then(|o| o.properties.get_f32("speed"));
        if let Some(speed) = speed {
            self.player.speed = speed as i32;
        }
    }

    fn fire_object_hooks(&mut self, key: &str) {
        let targets: Vec<(u32, String)> = {
            let m = self.level.map().borrow();
            match m.find_object_group(self.level.objects_layer) {
                Some(group) => group
                    .objects()
                    .filter_map(|o| {
                        o.properties
                            .get_string(key)
                            .map(|script| (o.id, script.to_string()))
                    })
                    .collect(),
                None => Vec::new(),
            }
        };
        for (id, script) in targets {
            let event = match key {
                hooks::ON_SHOW => HookEvent::Show { this: id },
                _ => HookEvent::Create { this: id },
            };
            let mut control = HookControl::default();
            self.fire_hook(&script, event, &mut control);
        }
    }

    /// Run a hook, containing any failure to this call: a broken script is
    /// logged with its text and skipped, never crashing the frame.
    fn fire_hook(&mut self, script: &str, event: HookEvent, control: &mut HookControl) {
        if let Err(message) = self.host.run_hook(script, event, control) {
            error!("script hook failed: {} (script: {:?})", message, script);
        }
    }

    /// Per-axis keyboard movement for the player, with walk animation.
    pub fn process_keys(&mut self, input: InputState) {
        if !self.player_input_allowed {
            return;
        }
        let speed = self.player.speed;
        let vx = match (input.left, input.right) {
            (true, false) => -speed,
            (false, true) => speed,
            _ => 0,
        };
        let vy = match (input.up, input.down) {
            (true, false) => -speed,
            (false, true) => speed,
            _ => 0,
        };

        if vx < 0 {
            self.turn_player(Orientation::Left);
        } else if vx > 0 {
            self.turn_player(Orientation::Right);
        }

        let mut moved = false;
        if vx != 0 {
            moved |= self.move_object(self.player.object_id, vx, 0, true);
        }
        if vy != 0 {
            moved |= self.move_object(self.player.object_id, 0, vy, true);
        }

        let gid = if moved {
            self.player.animation.walk()
        } else {
            self.player.animation.stop()
        };
        if let Some(gid) = gid {
            self.set_object_gid(self.player.object_id, gid);
        }
    }

    fn turn_player(&mut self, orientation: Orientation) {
        if let Some(gid) = self.player.animation.turn(orientation) {
            self.set_object_gid(self.player.object_id, gid);
        }
    }

    fn set_object_gid(&mut self, id: u32, gid: u32) {
        let mut changed = false;
        if let Some(obj) = self
            .level
            .map()
            .borrow_mut()
            .find_object_group_mut(self.level.objects_layer)
            .and_then(|g| g.object_mut(id))
        {
            if obj.gid != gid {
                obj.gid = gid;
                changed = true;
            }
        }
        if changed {
            self.level.invalidated = true;
        }
    }

    /// Move an object by a displacement, clamped to the map bounds (and,
    /// for the player, to its restricted rect). With collisions on, the
    /// displacement is walked back by tile bisection and reconciled
    /// against other objects; tile `on_collision` hooks fire from the
    /// blocked snapshot whether or not the move survived.
    ///
    /// Returns whether the object's position actually changed.
    pub fn move_object(&mut self, object_id: u32, dx: i32, dy: i32, test_collisions: bool) -> bool {
        let Some(current) = self.level.object_rect(object_id) else {
            return false;
        };

        let mut next = current.translated(dx, dy).clamped_into(&self.level.map_rect);
        if object_id == self.player.object_id && !self.player.restricted_rect.is_empty() {
            next = next.clamped_into(&self.player.restricted_rect);
        }

        if !test_collisions {
            if next != current {
                self.commit_move(object_id, next);
                return true;
            }
            return false;
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        let outcome = self.level.check_next_position(current, next, &mut scratch);
        let accepted = next.at(outcome.pos);

        let vetoed = self.test_collisions_with_objects(accepted, object_id, (dx, dy));

        let mut moved = false;
        if !vetoed && accepted != current {
            self.commit_move(object_id, accepted);
            moved = true;
        }

        // tile hooks fire from the blocked snapshot regardless of the
        // object reconciliation outcome
        if outcome.collided {
            let hits: Vec<(u32, Rect)> = scratch.collided_rects().collect();
            for (gid, tile_rect) in hits {
                let script = self
                    .level
                    .collision_hook_properties(gid)
                    .and_then(|p| p.get_string(hooks::ON_COLLISION))
                    .map(str::to_string);
                if let Some(script) = script {
                    let mut control = HookControl::default();
                    self.fire_hook(
                        &script,
                        HookEvent::TileCollision {
                            obj: object_id,
                            gid,
                            tile_rect,
                        },
                        &mut control,
                    );
                }
            }
        }

        self.scratch = scratch;
        moved
    }

    fn commit_move(&mut self, object_id: u32, rect: Rect) {
        self.level.set_object_rect(object_id, rect);
        self.level.invalidated = true;
        if object_id == self.player.object_id {
            self.level.update_map_position(rect);
        }
    }

    /// Reconcile a proposed position against the other live objects.
    /// Returns true when some branch vetoed the movement.
    ///
    /// Enter transitions resolve in priority order: an `on_enter` hook if
    /// the object has one, else a push when it is pushable, else a veto
    /// when it is solid. Pairs still overlapping afterwards fire
    /// `on_collision` every frame; pairs that stopped overlapping fire
    /// `on_leave` exactly once.
    pub fn test_collisions_with_objects(
        &mut self,
        next_rect: Rect,
        object_id: u32,
        delta: (i32, i32),
    ) -> bool {
        let (candidates, previous) = self.snapshot_candidates(object_id);

        let mut overlapping: HashSet<u32> = candidates
            .iter()
            .filter(|c| c.rect.colliderect(&next_rect))
            .map(|c| c.id)
            .collect();

        let mut vetoed = false;

        let newly_entered: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| overlapping.contains(&c.id) && !previous.contains(&c.id))
            .collect();
        for cand in newly_entered {
            if let Some(script) = &cand.on_enter {
                let mut control = HookControl::default();
                self.fire_hook(
                    script,
                    HookEvent::Enter {
                        obj: object_id,
                        this: cand.id,
                    },
                    &mut control,
                );
                if control.colliding_prevented() {
                    overlapping.remove(&cand.id);
                    continue;
                }
                if control.moving_prevented() {
                    vetoed = true;
                }
            } else if cand.pushable {
                if !self.push_object(cand.id, delta) {
                    vetoed = true;
                }
            } else if cand.solid {
                vetoed = true;
            }
        }

        // persistent overlap hooks, newly entered pairs included
        for cand in &candidates {
            if !overlapping.contains(&cand.id) {
                continue;
            }
            if let Some(script) = &cand.on_collision {
                let mut control = HookControl::default();
                self.fire_hook(
                    script,
                    HookEvent::ObjectCollision {
                        obj: object_id,
                        this: cand.id,
                    },
                    &mut control,
                );
                if control.colliding_prevented() {
                    overlapping.remove(&cand.id);
                    continue;
                }
                if control.moving_prevented() {
                    vetoed = true;
                }
            }
        }

        for cand in &candidates {
            if previous.contains(&cand.id) && !overlapping.contains(&cand.id) {
                if let Some(script) = &cand.on_leave {
                    let mut control = HookControl::default();
                    self.fire_hook(
                        script,
                        HookEvent::Leave {
                            obj: object_id,
                            this: cand.id,
                        },
                        &mut control,
                    );
                }
            }
        }

        self.write_back_collision_sets(object_id, &previous, &overlapping);
        vetoed
    }

    /// Take an aliasing-free snapshot of every live candidate (visible,
    /// not the mover) plus the mover's previous-collision set.
    fn snapshot_candidates(&self, object_id: u32) -> (Vec<Candidate>, HashSet<u32>) {
        let m = self.level.map().borrow();
        let Some(group) = m.find_object_group(self.level.objects_layer) else {
            return (Vec::new(), HashSet::new());
        };
        let previous = group
            .object(object_id)
            .map(|o| o.collisions.clone())
            .unwrap_or_default();
        let candidates = group
            .objects()
            .filter(|o| o.id != object_id && o.visible)
            .map(|o| Candidate {
                id: o.id,
                rect: o.rect,
                solid: o.solid,
                pushable: o.pushable,
                on_enter: o.properties.get_string(hooks::ON_ENTER).map(str::to_string),
                on_leave: o.properties.get_string(hooks::ON_LEAVE).map(str::to_string),
                on_collision: o
                    .properties
                    .get_string(hooks::ON_COLLISION)
                    .map(str::to_string),
            })
            .collect();
        (candidates, previous)
    }

    fn write_back_collision_sets(
        &mut self,
        object_id: u32,
        previous: &HashSet<u32>,
        overlapping: &HashSet<u32>,
    ) {
        let mut m = self.level.map().borrow_mut();
        let Some(group) = m.find_object_group_mut(self.level.objects_layer) else {
            return;
        };
        if let Some(obj) = group.object_mut(object_id) {
            obj.collisions = overlapping.clone();
        }
        for &id in overlapping {
            if let Some(other) = group.object_mut(id) {
                other.collisions.insert(object_id);
            }
        }
        for &id in previous.difference(overlapping) {
            if let Some(other) = group.object_mut(id) {
                other.collisions.remove(&object_id);
            }
        }
    }

    /// Displace a pushable object by the actor's delta, tile-checked.
    /// The push only commits (and succeeds) when the full displacement is
    /// free; a blocked push vetoes the actor's movement instead.
    fn push_object(&mut self, object_id: u32, (dx, dy): (i32, i32)) -> bool {
        let Some(current) = self.level.object_rect(object_id) else {
            return false;
        };
        let next = current.translated(dx, dy).clamped_into(&self.level.map_rect);
        if next == current {
            return false;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        let outcome = self.level.check_next_position(current, next, &mut scratch);
        self.scratch = scratch;
        if outcome.collided || outcome.pos != next.topleft() {
            return false;
        }
        self.level.set_object_rect(object_id, next);
        self.level.invalidated = true;
        true
    }

    /// Per-frame animation tick: fires `on_animate` hooks of the cached
    /// hook-bearing objects.
    pub fn animate(&mut self, elapsed_ms: u32) {
        let targets: Vec<(u32, String)> = {
            let m = self.level.map().borrow();
            let Some(group) = m.find_object_group(self.level.objects_layer) else {
                return;
            };
            self.level
                .on_animate_objects()
                .iter()
                .filter_map(|&id| {
                    group.object(id).and_then(|o| {
                        o.properties
                            .get_string(hooks::ON_ANIMATE)
                            .map(|s| (id, s.to_string()))
                    })
                })
                .collect()
        };
        for (id, script) in targets {
            let mut control = HookControl::default();
            self.fire_hook(
                &script,
                HookEvent::Animate {
                    this: id,
                    elapsed_ms,
                },
                &mut control,
            );
        }
    }

    /// Mouse click dispatch: the topmost visible object under `pos` (in
    /// world pixels) gets its `on_click` hook.
    pub fn process_click(&mut self, pos: Point) {
        let target: Option<(u32, String)> = {
            let m = self.level.map().borrow();
            m.find_object_group(self.level.objects_layer).and_then(|group| {
                group
                    .objects()
                    .filter(|o| o.visible && o.rect.contains_point(pos))
                    .filter_map(|o| {
                        o.properties
                            .get_string(hooks::ON_CLICK)
                            .map(|s| (o.id, s.to_string()))
                    })
                    .last()
            })
        };
        if let Some((id, script)) = target {
            let mut control = HookControl::default();
            self.fire_hook(&script, HookEvent::Click { this: id, pos }, &mut control);
        }
    }
}
