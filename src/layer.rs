//! Map layers: tile grids, object groups and nested groups.

use std::collections::{BTreeMap, HashSet};

use crate::geom::Rect;
use crate::properties::{LayeredProperties, Properties};

/// One visual/logical slice of a map.
#[derive(Debug, Clone)]
pub enum Layer {
    Tile(TileLayer),
    Object(ObjectGroup),
    Group(GroupLayer),
}

impl Layer {
    pub fn id(&self) -> u32 {
        match self {
            Layer::Tile(l) => l.id,
            Layer::Object(l) => l.id,
            Layer::Group(l) => l.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Layer::Tile(l) => &l.name,
            Layer::Object(l) => &l.name,
            Layer::Group(l) => &l.name,
        }
    }

    pub fn visible(&self) -> bool {
        match self {
            Layer::Tile(l) => l.visible,
            Layer::Object(l) => l.visible,
            Layer::Group(l) => l.visible,
        }
    }

    pub fn as_tile(&self) -> Option<&TileLayer> {
        match self {
            Layer::Tile(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectGroup> {
        match self {
            Layer::Object(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupLayer> {
        match self {
            Layer::Group(l) => Some(l),
            _ => None,
        }
    }
}

/// A grid of gids, row-major, `width` columns per row. Gid 0 is empty.
#[derive(Debug, Clone)]
pub struct TileLayer {
    pub id: u32,
    pub name: String,
    pub visible: bool,
    pub width: u32,
    pub height: u32,
    pub properties: Properties,
    data: Vec<u32>,
}

impl TileLayer {
    pub fn new(id: u32, name: String, width: u32, height: u32) -> Self {
        TileLayer {
            id,
            name,
            visible: true,
            width,
            height,
            properties: Properties::new(),
            data: vec![0; (width * height) as usize],
        }
    }

    /// Replace the whole grid. The caller guarantees `data.len() == w * h`.
    pub fn set_data(&mut self, data: Vec<u32>) {
        debug_assert_eq!(data.len(), (self.width * self.height) as usize);
        self.data = data;
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    pub fn gid_at(&self, x: u32, y: u32) -> u32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set_gid(&mut self, x: u32, y: u32, gid: u32) {
        self.data[(y * self.width + x) as usize] = gid;
    }

    /// (x, y, gid) for every non-empty cell.
    pub fn iter_cells(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.data.iter().enumerate().filter_map(move |(i, &gid)| {
            if gid == 0 {
                None
            } else {
                Some((i as u32 % self.width, i as u32 / self.width, gid))
            }
        })
    }
}

/// An object placed in an object group.
#[derive(Debug, Clone)]
pub struct MapObject {
    /// Unique within the owning group; 0 means "assign on insert".
    pub id: u32,
    pub name: String,
    pub rect: Rect,
    /// 0 = area object, > 0 = tile-backed object.
    pub gid: u32,
    pub visible: bool,
    pub solid: bool,
    pub pushable: bool,
    /// Object properties layered over the properties of its gid's tile.
    pub properties: LayeredProperties,
    /// Ids of objects this one is currently overlapping.
    pub collisions: HashSet<u32>,
}

impl MapObject {
    pub fn new(id: u32, name: String, rect: Rect) -> Self {
        MapObject {
            id,
            name,
            rect,
            gid: 0,
            visible: true,
            solid: false,
            pushable: false,
            properties: LayeredProperties::new(),
            collisions: HashSet::new(),
        }
    }

    /// Re-read the behaviour switches from the merged property view.
    pub fn apply_property_switches(&mut self) {
        if let Some(v) = self.properties.get_bool("solid") {
            self.solid = v;
        }
        if let Some(v) = self.properties.get_bool("pushable") {
            self.pushable = v;
        }
    }
}

/// An id-keyed collection of objects.
#[derive(Debug, Clone)]
pub struct ObjectGroup {
    pub id: u32,
    pub name: String,
    pub visible: bool,
    pub properties: Properties,
    objects: BTreeMap<u32, MapObject>,
}

impl ObjectGroup {
    pub fn new(id: u32, name: String) -> Self {
        ObjectGroup {
            id,
            name,
            visible: true,
            properties: Properties::new(),
            objects: BTreeMap::new(),
        }
    }

    /// Insert an object, assigning `max + 1` when its id is 0.
    /// Returns the id it ended up with.
    pub fn add_object(&mut self, mut obj: MapObject) -> u32 {
        if obj.id == 0 {
            obj.id = self.objects.keys().next_back().map_or(1, |max| max + 1);
        }
        let id = obj.id;
        self.objects.insert(id, obj);
        id
    }

    pub fn remove_object(&mut self, id: u32) -> Option<MapObject> {
        self.objects.remove(&id)
    }

    pub fn object(&self, id: u32) -> Option<&MapObject> {
        self.objects.get(&id)
    }

    pub fn object_mut(&mut self, id: u32) -> Option<&mut MapObject> {
        self.objects.get_mut(&id)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&MapObject> {
        self.objects.values().find(|o| o.name == name)
    }

    pub fn objects(&self) -> impl Iterator<Item = &MapObject> {
        self.objects.values()
    }

    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut MapObject> {
        self.objects.values_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A layer grouping nested sub-layers, used to partition one map file into
/// multiple logical levels.
#[derive(Debug, Clone)]
pub struct GroupLayer {
    pub id: u32,
    pub name: String,
    pub visible: bool,
    pub properties: Properties,
    pub layers: Vec<Layer>,
}

impl GroupLayer {
    pub fn new(id: u32, name: String) -> Self {
        GroupLayer {
            id,
            name,
            visible: true,
            properties: Properties::new(),
            layers: Vec::new(),
        }
    }
}
