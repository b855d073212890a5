//! Tile atlas and per-tile metadata.

use std::collections::BTreeMap;

use image::{imageops, RgbaImage};

use crate::geom::Rect;
use crate::properties::Properties;

/// One `<animation>` block: frame tile ids with per-frame durations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileAnimation {
    frames: Vec<AnimationFrame>,
    total_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationFrame {
    /// Already offset by the owning tileset's firstgid.
    pub gid: u32,
    pub duration_ms: u32,
}

impl TileAnimation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, gid: u32, duration_ms: u32) {
        self.frames.push(AnimationFrame { gid, duration_ms });
        self.total_ms += duration_ms;
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The frame gid showing at `time_ms`, cycling over the total duration.
    pub fn gid_at(&self, time_ms: u32) -> u32 {
        let mut r = (time_ms % self.total_ms.max(1)) as i64;
        for frame in &self.frames {
            r -= frame.duration_ms as i64;
            if r < 0 {
                return frame.gid;
            }
        }
        self.frames.last().map(|f| f.gid).unwrap_or(0)
    }
}

/// Metadata attached to one tile: free-form properties, collider
/// sub-rectangles (relative to the tile's top-left corner) and an optional
/// animation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileMeta {
    pub properties: Properties,
    pub colliders: Vec<Rect>,
    pub animation: Option<TileAnimation>,
}

impl TileMeta {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.colliders.is_empty() && self.animation.is_none()
    }
}

/// An atlas image plus grid geometry, owning a contiguous gid range
/// starting at `firstgid`.
#[derive(Debug, Clone)]
pub struct Tileset {
    pub firstgid: u32,
    pub name: String,
    pub tilewidth: u32,
    pub tileheight: u32,
    pub columns: u32,
    pub tilecount: u32,
    pub spacing: u32,
    pub margin: u32,
    /// Relative path of the tileset file the map referenced, if external.
    pub source: Option<String>,
    atlas: RgbaImage,
    /// Per-tile metadata keyed by local tile id.
    tiles: BTreeMap<u32, TileMeta>,
}

impl Tileset {
    pub fn new(
        name: String,
        tilewidth: u32,
        tileheight: u32,
        columns: u32,
        tilecount: u32,
        spacing: u32,
        margin: u32,
        atlas: RgbaImage,
    ) -> Self {
        Tileset {
            firstgid: 0,
            name,
            tilewidth,
            tileheight,
            columns,
            tilecount,
            spacing,
            margin,
            source: None,
            atlas,
            tiles: BTreeMap::new(),
        }
    }

    pub fn atlas(&self) -> &RgbaImage {
        &self.atlas
    }

    /// One past the last gid this tileset owns.
    pub fn end_gid(&self) -> u32 {
        self.firstgid + self.tilecount
    }

    pub fn contains_gid(&self, gid: u32) -> bool {
        gid >= self.firstgid && gid < self.end_gid()
    }

    pub fn set_tile_meta(&mut self, local_id: u32, meta: TileMeta) {
        self.tiles.insert(local_id, meta);
    }

    pub fn tile_meta(&self, local_id: u32) -> Option<&TileMeta> {
        self.tiles.get(&local_id)
    }

    /// Iterate (local id, meta) pairs.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, &TileMeta)> {
        self.tiles.iter().map(|(id, meta)| (*id, meta))
    }

    /// Pixel rectangle of a local tile index inside the atlas.
    fn cell_rect(&self, local_id: u32) -> Rect {
        let col = local_id % self.columns;
        let row = local_id / self.columns;
        Rect::new(
            (col * (self.tilewidth + self.spacing) + self.margin) as i32,
            (row * (self.tileheight + self.spacing) + self.margin) as i32,
            self.tilewidth as i32,
            self.tileheight as i32,
        )
    }

    /// Copy the atlas cell for `gid` out of the shared atlas.
    ///
    /// `gid` must lie inside this tileset's range.
    pub fn get_image(&self, gid: u32) -> RgbaImage {
        debug_assert!(self.contains_gid(gid));
        let cell = self.cell_rect(gid - self.firstgid);
        imageops::crop_imm(
            &self.atlas,
            cell.x as u32,
            cell.y as u32,
            cell.width as u32,
            cell.height as u32,
        )
        .to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn atlas_2x2(tile: u32) -> RgbaImage {
        // four 4x4 tiles, each a solid colour keyed by its local id
        let mut img = RgbaImage::new(tile * 2, tile * 2);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let local = (y / tile) * 2 + x / tile;
            *px = Rgba([local as u8, 0, 0, 255]);
        }
        img
    }

    fn tileset() -> Tileset {
        let mut ts = Tileset::new("t".into(), 4, 4, 2, 4, 0, 0, atlas_2x2(4));
        ts.firstgid = 1;
        ts
    }

    #[test]
    fn cell_lookup_uses_columns() {
        let ts = tileset();
        for local in 0..4u32 {
            let img = ts.get_image(ts.firstgid + local);
            assert_eq!(img.dimensions(), (4, 4));
            assert_eq!(img.get_pixel(0, 0)[0], local as u8);
        }
    }

    #[test]
    fn gid_range() {
        let ts = tileset();
        assert!(ts.contains_gid(1));
        assert!(ts.contains_gid(4));
        assert!(!ts.contains_gid(0));
        assert!(!ts.contains_gid(5));
        assert_eq!(ts.end_gid(), 5);
    }

    #[test]
    fn animation_frame_selection_wraps() {
        let mut anim = TileAnimation::new();
        anim.add_frame(10, 100);
        anim.add_frame(11, 50);
        anim.add_frame(12, 100);

        assert_eq!(anim.gid_at(0), 10);
        assert_eq!(anim.gid_at(99), 10);
        assert_eq!(anim.gid_at(100), 11);
        assert_eq!(anim.gid_at(149), 11);
        assert_eq!(anim.gid_at(150), 12);
        // wraps at 250
        assert_eq!(anim.gid_at(250), 10);
        assert_eq!(anim.gid_at(351), 11);
    }
}
