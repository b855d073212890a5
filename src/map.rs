//! The map document model and its global-tile-ID registry.

use std::collections::{BTreeMap, HashMap};

use image::{imageops, RgbaImage};

use crate::error::MapError;
use crate::geom::Rect;
use crate::gid::TileFlags;
use crate::layer::{Layer, ObjectGroup, TileLayer};
use crate::properties::Properties;
use crate::tileset::{TileAnimation, TileMeta, Tileset};

/// Top-level container for tilesets, layers and the gid → image table.
///
/// The gid space is owned here: plain gids come from tileset ranges,
/// synthetic gids are allocated on demand for transformed tiles. `maxgid`
/// is an exclusive upper bound; `images[gid]` is defined for every gid in
/// `[0, maxgid)` that has ever been referenced (slot 0 stays empty).
#[derive(Debug, Clone)]
pub struct TiledMap {
    /// Map size in tiles.
    pub width: u32,
    pub height: u32,
    /// Tile size in pixels.
    pub tilewidth: u32,
    pub tileheight: u32,
    /// When set, tile-backed objects convert from the source format's
    /// bottom-left Y convention at parse time.
    pub invert_y: bool,
    pub background_color: Option<[u8; 3]>,
    pub properties: Properties,
    pub maxgid: u32,
    tilesets: Vec<Tileset>,
    layers: Vec<Layer>,
    images: Vec<Option<RgbaImage>>,
    /// Aggregated per-tile metadata across tilesets, keyed by gid.
    tiles: BTreeMap<u32, TileMeta>,
    tile_animations: HashMap<u32, TileAnimation>,
    /// Synthetic gid → the (base gid, flags) pair it was derived from.
    synthetic_gids: HashMap<u32, (u32, TileFlags)>,
    /// Memo of already-registered transforms, consulted by `ensure_gid`.
    gid_by_transform: HashMap<(u32, TileFlags), u32>,
}

impl TiledMap {
    pub fn new(width: u32, height: u32, tilewidth: u32, tileheight: u32) -> Self {
        TiledMap {
            width,
            height,
            tilewidth,
            tileheight,
            invert_y: true,
            background_color: None,
            properties: Properties::new(),
            maxgid: 0,
            tilesets: Vec::new(),
            layers: Vec::new(),
            images: Vec::new(),
            tiles: BTreeMap::new(),
            tile_animations: HashMap::new(),
            synthetic_gids: HashMap::new(),
            gid_by_transform: HashMap::new(),
        }
    }

    pub fn pixel_width(&self) -> i32 {
        (self.width * self.tilewidth) as i32
    }

    pub fn pixel_height(&self) -> i32 {
        (self.height * self.tileheight) as i32
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0, 0, self.pixel_width(), self.pixel_height())
    }

    pub fn tilesets(&self) -> &[Tileset] {
        &self.tilesets
    }

    /// Append a tileset, extend the gid space over its range and eagerly
    /// render every one of its tiles into the image table.
    ///
    /// A tileset arriving with `firstgid == 0` (editor-created) is assigned
    /// the next free gid. Ranges must stay monotonic and non-overlapping.
    pub fn add_tileset(&mut self, mut tileset: Tileset) {
        if tileset.firstgid == 0 {
            tileset.firstgid = self.maxgid.max(1);
        }
        debug_assert!(
            self.tilesets
                .last()
                .map_or(true, |prev| tileset.firstgid >= prev.end_gid()),
            "tileset gid ranges must be monotonic"
        );

        self.maxgid = self.maxgid.max(tileset.end_gid());
        if self.images.len() < self.maxgid as usize {
            self.images.resize(self.maxgid as usize, None);
        }
        for local in 0..tileset.tilecount {
            let gid = tileset.firstgid + local;
            self.images[gid as usize] = Some(tileset.get_image(gid));
        }

        self.tilesets.push(tileset);
        self.rebuild_tile_aggregates();
    }

    /// Recompute the gid-keyed union of per-tile metadata. Tileset ranges
    /// are disjoint, so this is a union, never an override.
    fn rebuild_tile_aggregates(&mut self) {
        self.tiles.clear();
        self.tile_animations.clear();
        for ts in &self.tilesets {
            for (local, meta) in ts.tiles() {
                let gid = ts.firstgid + local;
                if let Some(anim) = &meta.animation {
                    self.tile_animations.insert(gid, anim.clone());
                }
                self.tiles.insert(gid, meta.clone());
            }
        }
    }

    /// Aggregated metadata for a gid, if its tile carries any.
    pub fn tile_meta(&self, gid: u32) -> Option<&TileMeta> {
        self.tiles.get(&gid)
    }

    /// The base tile a gid was derived from: itself for plain gids, the
    /// original tile for synthetic transformed gids.
    pub fn base_gid(&self, gid: u32) -> u32 {
        self.synthetic_gids
            .get(&gid)
            .map(|&(base, _)| base)
            .unwrap_or(gid)
    }

    /// Metadata for a gid, resolving synthetic gids to their base tile
    /// (transforming a tile does not detach its properties or colliders).
    pub fn tile_meta_for(&self, gid: u32) -> Option<&TileMeta> {
        self.tiles.get(&self.base_gid(gid))
    }

    pub fn tile_metas(&self) -> impl Iterator<Item = (u32, &TileMeta)> {
        self.tiles.iter().map(|(gid, meta)| (*gid, meta))
    }

    pub fn tile_animation(&self, gid: u32) -> Option<&TileAnimation> {
        self.tile_animations.get(&gid)
    }

    pub fn has_tile_animations(&self) -> bool {
        !self.tile_animations.is_empty()
    }

    /// The gid to show for `gid` at `time_ms`, following its animation if
    /// it has one.
    pub fn animated_gid(&self, gid: u32, time_ms: u32) -> u32 {
        match self.tile_animations.get(&gid) {
            Some(anim) => anim.gid_at(time_ms),
            None => gid,
        }
    }

    pub fn image(&self, gid: u32) -> Option<&RgbaImage> {
        self.images.get(gid as usize).and_then(Option::as_ref)
    }

    /// Normalize any raw tile reference into a plain renderable gid.
    ///
    /// Idempotent: a gid below `maxgid` is already plain and comes back
    /// unchanged. Gid 0 always means "no tile" and never reaches the flag
    /// decoder.
    pub fn register_raw_gid(&mut self, raw: u32) -> Result<u32, MapError> {
        if raw == 0 {
            return Ok(0);
        }
        if raw < self.maxgid {
            return Ok(raw);
        }
        let (base, flags) = TileFlags::decode(raw);
        if flags.is_identity() {
            // no flags to strip, so the reference is simply out of range
            return Err(MapError::InvalidGid {
                gid: raw,
                maxgid: self.maxgid,
            });
        }
        self.ensure_gid(base, flags)
    }

    /// Memoized front-end over [`register_gid`](Self::register_gid): one
    /// synthetic gid per distinct (base, flags) pair.
    pub fn ensure_gid(&mut self, base: u32, flags: TileFlags) -> Result<u32, MapError> {
        if flags.is_identity() {
            return if base < self.maxgid {
                Ok(base)
            } else {
                Err(MapError::InvalidGid {
                    gid: base,
                    maxgid: self.maxgid,
                })
            };
        }
        if let Some(&gid) = self.gid_by_transform.get(&(base, flags)) {
            return Ok(gid);
        }
        self.register_gid(base, flags)
    }

    /// Allocate a fresh synthetic gid whose image is the base tile's image
    /// transformed by `flags`. Every call allocates a new slot; use
    /// [`ensure_gid`](Self::ensure_gid) when the pair may repeat.
    pub fn register_gid(&mut self, base: u32, flags: TileFlags) -> Result<u32, MapError> {
        let base_image = self
            .image(base)
            .ok_or(MapError::InvalidGid {
                gid: base,
                maxgid: self.maxgid,
            })?
            .clone();

        let mut img = base_image;
        if flags.flipped_diagonally {
            // the source format's diagonal flip is a transpose: quarter-turn
            // clockwise, then mirror horizontally
            img = imageops::flip_horizontal(&imageops::rotate90(&img));
        }
        if flags.flipped_horizontally {
            img = imageops::flip_horizontal(&img);
        }
        if flags.flipped_vertically {
            img = imageops::flip_vertical(&img);
        }

        let new_gid = self.maxgid;
        self.maxgid += 1;
        self.images.push(Some(img));
        self.synthetic_gids.insert(new_gid, (base, flags));
        self.gid_by_transform.insert((base, flags), new_gid);
        Ok(new_gid)
    }

    /// Re-encode a gid to the raw form the map format would store: a
    /// synthetic gid becomes its base gid with the flag bits set, anything
    /// else passes through.
    pub fn gid_to_raw(&self, gid: u32) -> u32 {
        match self.synthetic_gids.get(&gid) {
            Some(&(base, flags)) => flags.apply_to(base),
            None => gid,
        }
    }

    /// The (base, flags) origin of a synthetic gid.
    pub fn synthetic_origin(&self, gid: u32) -> Option<(u32, TileFlags)> {
        self.synthetic_gids.get(&gid).copied()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: u32) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    pub fn layer_mut(&mut self, id: u32) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id() == id)
    }

    pub fn tile_layer(&self, id: u32) -> Option<&TileLayer> {
        self.layer(id).and_then(Layer::as_tile)
    }

    pub fn tile_layer_mut(&mut self, id: u32) -> Option<&mut TileLayer> {
        match self.layer_mut(id) {
            Some(Layer::Tile(l)) => Some(l),
            _ => None,
        }
    }

    pub fn object_group(&self, id: u32) -> Option<&ObjectGroup> {
        self.layer(id).and_then(Layer::as_object)
    }

    pub fn object_group_mut(&mut self, id: u32) -> Option<&mut ObjectGroup> {
        match self.layer_mut(id) {
            Some(Layer::Object(l)) => Some(l),
            _ => None,
        }
    }

    /// Depth-first search for a layer by id, descending into groups.
    pub fn find_layer(&self, id: u32) -> Option<&Layer> {
        fn walk(layers: &[Layer], id: u32) -> Option<&Layer> {
            for layer in layers {
                if layer.id() == id {
                    return Some(layer);
                }
                if let Layer::Group(group) = layer {
                    if let Some(found) = walk(&group.layers, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&self.layers, id)
    }

    pub fn find_layer_mut(&mut self, id: u32) -> Option<&mut Layer> {
        fn walk(layers: &mut [Layer], id: u32) -> Option<&mut Layer> {
            for layer in layers {
                if layer.id() == id {
                    return Some(layer);
                }
                if let Layer::Group(group) = layer {
                    if let Some(found) = walk(&mut group.layers, id) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&mut self.layers, id)
    }

    pub fn find_tile_layer_mut(&mut self, id: u32) -> Option<&mut TileLayer> {
        match self.find_layer_mut(id) {
            Some(Layer::Tile(l)) => Some(l),
            _ => None,
        }
    }

    pub fn find_object_group(&self, id: u32) -> Option<&ObjectGroup> {
        self.find_layer(id).and_then(Layer::as_object)
    }

    pub fn find_object_group_mut(&mut self, id: u32) -> Option<&mut ObjectGroup> {
        match self.find_layer_mut(id) {
            Some(Layer::Object(l)) => Some(l),
            _ => None,
        }
    }

    /// Insert a layer; ids must be unique within the map.
    pub fn add_layer(&mut self, layer: Layer) -> Result<(), MapError> {
        let id = layer.id();
        if self.layer(id).is_some() {
            return Err(MapError::DuplicateLayerId(id));
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Smallest unused layer id.
    pub fn next_layer_id(&self) -> u32 {
        self.layers.iter().map(Layer::id).max().unwrap_or(0) + 1
    }
}
