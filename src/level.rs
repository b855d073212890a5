//! A runtime, playable view over a map or one named partition of it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use image::{imageops, Rgba, RgbaImage};

use crate::collision::{self, CollisionResult, NextPosition};
use crate::error::MapError;
use crate::geom::Rect;
use crate::gid::TileFlags;
use crate::layer::{Layer, TileLayer};
use crate::map::TiledMap;
use crate::player::Orientation;
use crate::properties::Properties;

/// Shared handle to the map document; the whole object graph is mutated
/// from a single control thread.
pub type SharedMap = Rc<RefCell<TiledMap>>;

/// Per-role layer ids resolved at construction time.
#[derive(Debug, Clone, Copy, Default)]
struct RoleLayers {
    background: Option<u32>,
    main: Option<u32>,
    foreground: Option<u32>,
    over: Option<u32>,
    objects: Option<u32>,
}

#[derive(Debug)]
pub struct Level {
    map: SharedMap,
    /// Partition number when this level is one `group_*` slice of the map.
    pub part_no: Option<u32>,
    pub name: String,
    pub tile_width: i32,
    pub tile_height: i32,
    /// Pixel bounds of the whole map.
    pub map_rect: Rect,
    pub viewport: Rect,
    pub x_offset: i32,
    pub y_offset: i32,
    /// Set whenever offset or content changed; cleared when the offscreen
    /// composite is repainted.
    pub invalidated: bool,
    composite: RgbaImage,
    roles: RoleLayers,
    /// Object layer id; always present (construction fails without one).
    pub objects_layer: u32,
    /// Id of the "player" object inside the object layer.
    pub player_id: u32,
    pub player_orientation: Orientation,
    pub player_left_frames: Vec<u32>,
    pub player_right_frames: Vec<u32>,
    /// Non-player object ids in the object layer.
    object_ids: Vec<u32>,
    /// Base gid → tile properties, pre-filtered to tiles with an
    /// `on_collision` hook.
    on_collision_tile_properties: HashMap<u32, Properties>,
    /// Object ids carrying an `on_animate` hook.
    on_animate_objects: Vec<u32>,
}

impl Level {
    /// One level per `group_*` group layer of the map, partition layers
    /// selected by the `_<part_no>` name suffix convention.
    pub fn load_levels(map: SharedMap) -> Result<Vec<Level>, MapError> {
        let group_ids: Vec<(u32, String)> = {
            let m = map.borrow();
            m.layers()
                .iter()
                .filter(|l| matches!(l, Layer::Group(_)) && l.name().starts_with("group_"))
                .map(|l| (l.id(), l.name().to_string()))
                .collect()
        };
        group_ids
            .into_iter()
            .enumerate()
            .map(|(i, (group_id, _))| Level::from_group(map.clone(), group_id, i as u32 + 1))
            .collect()
    }

    /// Build a level over one group-layer partition.
    pub fn from_group(map: SharedMap, group_id: u32, part_no: u32) -> Result<Level, MapError> {
        let suffix = format!("_{part_no}");
        let (viewport, candidates, name) = {
            let m = map.borrow();
            let group = m
                .layer(group_id)
                .and_then(Layer::as_group)
                .ok_or_else(|| MapError::Structure {
                    tag: "group".to_string(),
                    msg: format!("no group layer with id {group_id}"),
                })?;
            let viewport = parse_viewport(&group.properties).unwrap_or(m.rect());
            let candidates: Vec<(u32, String)> = group
                .layers
                .iter()
                .filter(|l| l.name().ends_with(&suffix))
                .map(|l| (l.id(), l.name().to_string()))
                .collect();
            (viewport, candidates, group.name.clone())
        };
        Level::build(map, Some(part_no), name, viewport, candidates)
    }

    /// Build a level over a whole, partition-less map.
    pub fn from_map(map: SharedMap, viewport: Rect) -> Result<Level, MapError> {
        let candidates: Vec<(u32, String)> = {
            let m = map.borrow();
            m.layers()
                .iter()
                .map(|l| (l.id(), l.name().to_string()))
                .collect()
        };
        Level::build(map, None, String::new(), viewport, candidates)
    }

    fn build(
        map: SharedMap,
        part_no: Option<u32>,
        name: String,
        viewport: Rect,
        candidates: Vec<(u32, String)>,
    ) -> Result<Level, MapError> {
        let mut roles = RoleLayers::default();
        for (id, layer_name) in &candidates {
            // first match wins per role
            let slot = if layer_name.starts_with("background") {
                &mut roles.background
            } else if layer_name.starts_with("main") {
                &mut roles.main
            } else if layer_name.starts_with("foreground") {
                &mut roles.foreground
            } else if layer_name.starts_with("over") {
                &mut roles.over
            } else if layer_name.starts_with("object") {
                &mut roles.objects
            } else {
                continue;
            };
            if slot.is_none() {
                *slot = Some(*id);
            }
        }

        let objects_layer = roles.objects.ok_or(MapError::MissingObjectLayer)?;

        let (
            tile_width,
            tile_height,
            map_rect,
            player_id,
            player_gid,
            object_ids,
            on_collision_tile_properties,
            on_animate_objects,
        ) = {
            let m = map.borrow();
            let group = m
                .find_layer(objects_layer)
                .and_then(Layer::as_object)
                .ok_or(MapError::MissingObjectLayer)?;
            let player = group.object_by_name("player").ok_or(MapError::MissingPlayer)?;

            let object_ids: Vec<u32> = group
                .objects()
                .filter(|o| o.id != player.id)
                .map(|o| o.id)
                .collect();
            let on_animate_objects: Vec<u32> = group
                .objects()
                .filter(|o| o.properties.contains("on_animate"))
                .map(|o| o.id)
                .collect();

            let mut hooked = HashMap::new();
            for (gid, meta) in m.tile_metas() {
                if meta.properties.contains("on_collision") {
                    hooked.insert(gid, meta.properties.clone());
                }
            }

            (
                m.tilewidth as i32,
                m.tileheight as i32,
                m.rect(),
                player.id,
                player.gid,
                object_ids,
                hooked,
                on_animate_objects,
            )
        };

        let mut level = Level {
            map,
            part_no,
            name,
            tile_width,
            tile_height,
            map_rect,
            viewport,
            x_offset: 0,
            y_offset: 0,
            invalidated: true,
            composite: RgbaImage::new(viewport.width.max(1) as u32, viewport.height.max(1) as u32),
            roles,
            objects_layer,
            player_id,
            player_orientation: Orientation::Left,
            player_left_frames: Vec::new(),
            player_right_frames: Vec::new(),
            object_ids,
            on_collision_tile_properties,
            on_animate_objects,
        };

        level.prepare_player_frames(player_gid)?;

        let player_rect = level.object_rect(level.player_id).unwrap_or_default();
        level.update_map_position(player_rect);
        Ok(level)
    }

    /// Synthesize the player's facing variants (plain and mirrored walk
    /// frames) once, via the map's memoized registry.
    fn prepare_player_frames(&mut self, player_gid: u32) -> Result<(), MapError> {
        if player_gid == 0 {
            return Ok(());
        }
        let mut m = self.map.borrow_mut();

        let (base, flags) = m
            .synthetic_origin(player_gid)
            .unwrap_or((player_gid, TileFlags::default()));
        if flags.flipped_horizontally {
            self.player_orientation = Orientation::Right;
        }

        let flipped = TileFlags {
            flipped_horizontally: true,
            ..Default::default()
        };
        let mut left = vec![m.ensure_gid(base, TileFlags::default())?];
        let mut right = vec![m.ensure_gid(base, flipped)?];
        // second walk frame sits next to the first in the tileset
        let second = base + 1;
        if m.image(second).is_some() && m.synthetic_origin(second).is_none() {
            left.push(m.ensure_gid(second, TileFlags::default())?);
            right.push(m.ensure_gid(second, flipped)?);
        }
        self.player_left_frames = left;
        self.player_right_frames = right;
        Ok(())
    }

    pub fn map(&self) -> &SharedMap {
        &self.map
    }

    pub fn main_layer(&self) -> Option<u32> {
        self.roles.main
    }

    pub fn background_layer(&self) -> Option<u32> {
        self.roles.background
    }

    /// Non-player object ids, refreshed against the live object layer.
    pub fn object_ids(&self) -> &[u32] {
        &self.object_ids
    }

    pub fn on_animate_objects(&self) -> &[u32] {
        &self.on_animate_objects
    }

    /// Tile properties for a gid's base tile, when that tile has an
    /// `on_collision` hook.
    pub fn collision_hook_properties(&self, gid: u32) -> Option<&Properties> {
        let base = self.map.borrow().base_gid(gid);
        self.on_collision_tile_properties.get(&base)
    }

    pub fn object_rect(&self, id: u32) -> Option<Rect> {
        self.map
            .borrow()
            .find_object_group(self.objects_layer)
            .and_then(|g| g.object(id))
            .map(|o| o.rect)
    }

    pub fn set_object_rect(&self, id: u32, rect: Rect) {
        if let Some(obj) = self
            .map
            .borrow_mut()
            .find_object_group_mut(self.objects_layer)
            .and_then(|g| g.object_mut(id))
        {
            obj.rect = rect;
        }
    }

    /// Drop an object from the running level and its layer.
    pub fn remove_object(&mut self, id: u32) {
        self.object_ids.retain(|&o| o != id);
        self.on_animate_objects.retain(|&o| o != id);
        if let Some(group) = self
            .map
            .borrow_mut()
            .find_object_group_mut(self.objects_layer)
        {
            group.remove_object(id);
        }
        self.invalidated = true;
    }

    /// Show the player object; called when the level becomes current.
    pub fn start(&mut self) {
        self.set_player_visible(true);
    }

    pub fn stop(&mut self) {
        self.set_player_visible(false);
    }

    fn set_player_visible(&mut self, visible: bool) {
        if let Some(obj) = self
            .map
            .borrow_mut()
            .find_object_group_mut(self.objects_layer)
            .and_then(|g| g.object_mut(self.player_id))
        {
            obj.visible = visible;
        }
        self.invalidated = true;
    }

    /// Recompute the camera offset so `focus` is centered in the viewport,
    /// clamped to the map bounds; an axis where the map is smaller than
    /// the viewport is letterboxed (centered with a negative offset).
    pub fn update_map_position(&mut self, focus: Rect) {
        fn place(focus_pos: i32, viewport_len: i32, map_len: i32) -> i32 {
            if map_len <= viewport_len {
                return -(viewport_len - map_len) / 2;
            }
            (focus_pos - viewport_len / 2).clamp(0, map_len - viewport_len)
        }

        let xo = place(focus.x, self.viewport.width, self.map_rect.width);
        let yo = place(focus.y, self.viewport.height, self.map_rect.height);
        if xo != self.x_offset || yo != self.y_offset {
            self.invalidated = true;
        }
        self.x_offset = xo;
        self.y_offset = yo;
    }

    /// Fill `result` with every main-layer cell the rect overlaps, plus
    /// any background-tile collider sub-rect intersecting it.
    pub fn collect_collided(&self, rect: &Rect, result: &mut CollisionResult) {
        result.clear();
        let m = self.map.borrow();

        if let Some(main) = self.roles.main.and_then(|id| {
            m.find_layer(id).and_then(Layer::as_tile)
        }) {
            self.each_overlapped_cell(main, rect, |tx, ty, gid| {
                let cell = Rect::new(
                    tx * self.tile_width,
                    ty * self.tile_height,
                    self.tile_width,
                    self.tile_height,
                );
                result.push(gid, cell);
            });
        }

        if let Some(background) = self.roles.background.and_then(|id| {
            m.find_layer(id).and_then(Layer::as_tile)
        }) {
            self.each_overlapped_cell(background, rect, |tx, ty, gid| {
                if gid == 0 {
                    return;
                }
                if let Some(meta) = m.tile_meta_for(gid) {
                    for collider in &meta.colliders {
                        let world =
                            collider.translated(tx * self.tile_width, ty * self.tile_height);
                        if world.colliderect(rect) {
                            result.push(gid, world);
                        }
                    }
                }
            });
        }
    }

    fn each_overlapped_cell(
        &self,
        layer: &TileLayer,
        rect: &Rect,
        mut visit: impl FnMut(i32, i32, u32),
    ) {
        let tx0 = rect.x.div_euclid(self.tile_width);
        let tx1 = (rect.right() - 1).div_euclid(self.tile_width);
        let ty0 = rect.y.div_euclid(self.tile_height);
        let ty1 = (rect.bottom() - 1).div_euclid(self.tile_height);
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                if layer.in_bounds(tx, ty) {
                    visit(tx, ty, layer.gid_at(tx as u32, ty as u32));
                }
            }
        }
    }

    /// Bisect a proposed displacement against the tile grid.
    pub fn check_next_position(
        &self,
        current: Rect,
        next: Rect,
        result: &mut CollisionResult,
    ) -> NextPosition {
        collision::check_next_position(
            |rect, res| self.collect_collided(rect, res),
            current,
            next,
            result,
        )
    }

    /// The composited frame for the current camera offset, repainted only
    /// when something invalidated it (or tile animations need fresh
    /// frames).
    pub fn draw(&mut self, time_ms: u32) -> &RgbaImage {
        let animated = self.map.borrow().has_tile_animations();
        if self.invalidated || animated {
            self.invalidated = false;
            let fill = self
                .map
                .borrow()
                .background_color
                .map(|[r, g, b]| Rgba([r, g, b, 255]))
                .unwrap_or(Rgba([0, 0, 0, 0]));
            for px in self.composite.pixels_mut() {
                *px = fill;
            }
            self.render_composite(time_ms);
        }
        &self.composite
    }

    fn render_composite(&mut self, time_ms: u32) {
        let ox = -self.x_offset;
        let oy = -self.y_offset;
        let map = self.map.clone();
        let m = map.borrow();

        // draw order: background, main, objects, foreground, over
        for slot in [self.roles.background, self.roles.main] {
            if let Some(layer) = slot.and_then(|id| m.find_layer(id).and_then(Layer::as_tile)) {
                if layer.visible {
                    self.render_tile_layer(&m, layer, ox, oy, time_ms);
                }
            }
        }
        self.render_objects(&m, ox, oy, time_ms);
        for slot in [self.roles.foreground, self.roles.over] {
            if let Some(layer) = slot.and_then(|id| m.find_layer(id).and_then(Layer::as_tile)) {
                if layer.visible {
                    self.render_tile_layer(&m, layer, ox, oy, time_ms);
                }
            }
        }
    }

    fn render_tile_layer(
        &mut self,
        m: &TiledMap,
        layer: &TileLayer,
        ox: i32,
        oy: i32,
        time_ms: u32,
    ) {
        let tx0 = (self.x_offset.div_euclid(self.tile_width)).max(0);
        let ty0 = (self.y_offset.div_euclid(self.tile_height)).max(0);
        let tx1 = ((self.x_offset + self.viewport.width - 1).div_euclid(self.tile_width))
            .min(layer.width as i32 - 1);
        let ty1 = ((self.y_offset + self.viewport.height - 1).div_euclid(self.tile_height))
            .min(layer.height as i32 - 1);

        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let gid = layer.gid_at(tx as u32, ty as u32);
                if gid == 0 {
                    continue;
                }
                let gid = m.animated_gid(gid, time_ms);
                if let Some(img) = m.image(gid) {
                    imageops::overlay(
                        &mut self.composite,
                        img,
                        (tx * self.tile_width + ox) as i64,
                        (ty * self.tile_height + oy) as i64,
                    );
                }
            }
        }
    }

    fn render_objects(&mut self, m: &TiledMap, ox: i32, oy: i32, time_ms: u32) {
        let Some(group) = m.find_layer(self.objects_layer).and_then(Layer::as_object) else {
            return;
        };
        if !group.visible {
            return;
        }
        for obj in group.objects() {
            if !obj.visible || obj.gid == 0 {
                continue;
            }
            let gid = m.animated_gid(obj.gid, time_ms);
            if let Some(img) = m.image(gid) {
                imageops::overlay(
                    &mut self.composite,
                    img,
                    (obj.rect.x + ox) as i64,
                    (obj.rect.y + oy) as i64,
                );
            }
        }
    }
}

/// Group layers carry their viewport as an `"x,y,w,h"` property.
fn parse_viewport(properties: &Properties) -> Option<Rect> {
    let text = properties.get_string("viewport")?;
    let mut parts = text.split(',').map(|v| v.trim().parse::<i32>());
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(x)), Some(Ok(y)), Some(Ok(w)), Some(Ok(h))) => Some(Rect::new(x, y, w, h)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{MapObject, ObjectGroup};
    use crate::tileset::Tileset;
    use image::RgbaImage;

    /// 8x8-tile map with a 16px grid, a main layer and an object layer
    /// holding the player.
    fn fixture(viewport: Rect) -> (SharedMap, Level) {
        let mut map = TiledMap::new(8, 8, 16, 16);
        let atlas = RgbaImage::from_pixel(32, 16, image::Rgba([255, 255, 255, 255]));
        let mut ts = Tileset::new("t".into(), 16, 16, 2, 2, 0, 0, atlas);
        ts.firstgid = 1;
        map.add_tileset(ts);

        let main = TileLayer::new(1, "main".into(), 8, 8);
        map.add_layer(Layer::Tile(main)).unwrap();

        let mut objects = ObjectGroup::new(2, "objects".into());
        let mut player = MapObject::new(0, "player".into(), Rect::new(16, 16, 16, 16));
        player.gid = 1;
        objects.add_object(player);
        map.add_layer(Layer::Object(objects)).unwrap();

        let shared: SharedMap = Rc::new(RefCell::new(map));
        let level = Level::from_map(shared.clone(), viewport).unwrap();
        (shared, level)
    }

    #[test]
    fn missing_player_fails_construction() {
        let mut map = TiledMap::new(4, 4, 16, 16);
        map.add_layer(Layer::Object(ObjectGroup::new(1, "objects".into())))
            .unwrap();
        let shared: SharedMap = Rc::new(RefCell::new(map));
        let err = Level::from_map(shared, Rect::new(0, 0, 64, 64)).unwrap_err();
        assert!(matches!(err, MapError::MissingPlayer));
    }

    #[test]
    fn missing_object_layer_fails_construction() {
        let map = TiledMap::new(4, 4, 16, 16);
        let shared: SharedMap = Rc::new(RefCell::new(map));
        let err = Level::from_map(shared, Rect::new(0, 0, 64, 64)).unwrap_err();
        assert!(matches!(err, MapError::MissingObjectLayer));
    }

    #[test]
    fn camera_clamps_to_map_bounds() {
        // 128px map, 64px viewport
        let (_, mut level) = fixture(Rect::new(0, 0, 64, 64));
        level.update_map_position(Rect::new(0, 0, 16, 16));
        assert_eq!((level.x_offset, level.y_offset), (0, 0));

        level.update_map_position(Rect::new(120, 120, 16, 16));
        assert_eq!((level.x_offset, level.y_offset), (64, 64));

        level.update_map_position(Rect::new(64, 64, 16, 16));
        assert_eq!((level.x_offset, level.y_offset), (32, 32));
    }

    #[test]
    fn camera_letterboxes_small_maps() {
        // 128px map, 200px viewport: centered with a negative offset
        let (_, mut level) = fixture(Rect::new(0, 0, 200, 200));
        level.update_map_position(Rect::new(0, 0, 16, 16));
        assert_eq!((level.x_offset, level.y_offset), (-36, -36));
    }

    #[test]
    fn offset_change_invalidates() {
        let (_, mut level) = fixture(Rect::new(0, 0, 64, 64));
        level.update_map_position(Rect::new(32, 32, 16, 16));
        level.invalidated = false;
        level.update_map_position(Rect::new(32, 32, 16, 16));
        assert!(!level.invalidated, "same offset must not invalidate");
        level.update_map_position(Rect::new(100, 32, 16, 16));
        assert!(level.invalidated);
    }

    #[test]
    fn collect_collided_counts_overlapped_cells() {
        let (map, level) = fixture(Rect::new(0, 0, 64, 64));
        map.borrow_mut()
            .find_tile_layer_mut(1)
            .unwrap()
            .set_gid(1, 1, 1);

        let mut result = CollisionResult::new();
        // exactly one cell
        level.collect_collided(&Rect::new(16, 16, 16, 16), &mut result);
        assert_eq!(result.total, 1);
        assert_eq!(
            result.collided_rects().next(),
            Some((1, Rect::new(16, 16, 16, 16)))
        );

        // straddling a 2x2 cell boundary
        level.collect_collided(&Rect::new(8, 8, 16, 16), &mut result);
        assert_eq!(result.total, 4);
    }

    #[test]
    fn background_colliders_use_sub_rects() {
        let mut map = TiledMap::new(8, 8, 16, 16);
        let atlas = RgbaImage::from_pixel(32, 16, image::Rgba([255, 255, 255, 255]));
        let mut ts = Tileset::new("t".into(), 16, 16, 2, 2, 0, 0, atlas);
        ts.firstgid = 1;
        // local id 1 (gid 2): a decoration whose collider covers only the
        // left half of the cell
        let mut meta = crate::tileset::TileMeta::default();
        meta.colliders.push(Rect::new(0, 0, 8, 16));
        ts.set_tile_meta(1, meta);
        map.add_tileset(ts);

        map.add_layer(Layer::Tile(TileLayer::new(1, "main".into(), 8, 8)))
            .unwrap();
        let mut bg = TileLayer::new(3, "background".into(), 8, 8);
        bg.set_gid(2, 2, 2);
        map.add_layer(Layer::Tile(bg)).unwrap();

        let mut objects = ObjectGroup::new(2, "objects".into());
        objects.add_object(MapObject::new(0, "player".into(), Rect::new(0, 0, 16, 16)));
        map.add_layer(Layer::Object(objects)).unwrap();

        let shared: SharedMap = Rc::new(RefCell::new(map));
        let level = Level::from_map(shared, Rect::new(0, 0, 64, 64)).unwrap();

        let mut result = CollisionResult::new();
        // overlap only the right half of cell (2, 2): main cells are empty
        // and the 8px-wide collider (32..40 px) is missed
        level.collect_collided(&Rect::new(42, 34, 12, 12), &mut result);
        assert_eq!(result.collided_rects().count(), 0);

        // overlap the left half: the collider is hit at its world position
        level.collect_collided(&Rect::new(34, 34, 12, 12), &mut result);
        let hits: Vec<_> = result.collided_rects().collect();
        assert_eq!(hits, vec![(2, Rect::new(32, 32, 8, 16))]);
    }

    #[test]
    fn viewport_property_parses() {
        let mut props = Properties::new();
        props.insert(
            "viewport",
            crate::properties::PropertyValue::String("10, 20, 320, 200".into()),
        );
        assert_eq!(parse_viewport(&props), Some(Rect::new(10, 20, 320, 200)));
    }
}
