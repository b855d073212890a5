//! TMX tile-map engine: tileset atlases with per-tile metadata, a map
//! model with transform-aware global tile ids, playable levels with
//! camera and collision, per-frame simulation with behaviour hooks, and
//! an undoable action log for editors.

mod actions;
mod collision;
mod context;
mod error;
mod game;
mod geom;
mod gid;
mod layer;
mod level;
mod loader {
    pub mod tmx_loader;
}
mod map;
mod player;
mod properties;
mod schema;
mod tileset;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::Context;

pub use actions::{ActionsController, ElementRef, COALESCE_WINDOW, MAX_UNDOS};
pub use collision::{check_next_position, CollisionResult, NextPosition};
pub use context::{hooks, GameContext, HookControl, HookEvent, InputState, NoScripts, ScriptHost};
pub use error::MapError;
pub use game::Game;
pub use geom::{Point, Rect};
pub use gid::{TileFlags, FLIP_H, FLIP_V, GID_MASK, ROTATE};
pub use layer::{GroupLayer, Layer, MapObject, ObjectGroup, TileLayer};
pub use level::{Level, SharedMap};
pub use loader::tmx_loader::{load_map, load_tileset, parse_map_str};
pub use map::TiledMap;
pub use player::{Orientation, Player, WalkingAnimation};
pub use properties::{LayeredProperties, Properties, PropertyValue};
pub use schema::{AttrSpec, AttrType};
pub use tileset::{AnimationFrame, TileAnimation, TileMeta, Tileset};

/// Load a map file and build one level per `group_*` partition.
pub fn load_levels(path: impl AsRef<Path>) -> anyhow::Result<(SharedMap, Vec<Level>)> {
    let path = path.as_ref();
    let map = load_map(path).with_context(|| format!("Loading map {}", path.display()))?;
    let shared: SharedMap = Rc::new(RefCell::new(map));
    let levels = Level::load_levels(shared.clone())
        .with_context(|| format!("Building levels from {}", path.display()))?;
    Ok((shared, levels))
}
