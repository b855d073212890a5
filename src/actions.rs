//! The editor's transactional mutation path: every user-driven edit goes
//! through [`ActionsController`], which records it as a reversible change
//! and replays it for undo/redo.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::MapError;
use crate::geom::{Point, Rect};
use crate::layer::{Layer, MapObject, ObjectGroup, TileLayer};
use crate::level::SharedMap;
use crate::map::TiledMap;
use crate::properties::PropertyValue;
use crate::schema::{self, AttrSpec, AttrType};

/// Bound on the undo log; exceeding it drops the oldest change.
pub const MAX_UNDOS: usize = 20;

/// Edits of the same cumulative kind arriving within this window coalesce
/// into one undo step.
pub const COALESCE_WINDOW: Duration = Duration::from_secs(2);

/// Addresses one property/attribute-bearing element of the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef {
    Map,
    Layer(u32),
    Object { layer: u32, id: u32 },
}

impl ElementRef {
    fn describe(&self) -> String {
        match self {
            ElementRef::Map => "map".to_string(),
            ElementRef::Layer(id) => format!("layer {id}"),
            ElementRef::Object { layer, id } => format!("object {id} in layer {layer}"),
        }
    }
}

/// One reversible unit on the log. Cumulative kinds carry enough snapshot
/// state to replay either direction idempotently.
#[derive(Debug, Clone)]
enum Change {
    /// Tile painting; `cells` maps (x, y) to (first before, last after).
    TilePaint {
        layer: u32,
        cells: HashMap<(u32, u32), (u32, u32)>,
    },
    /// Object move/resize; before is the rect at first edit.
    ObjectRect {
        layer: u32,
        id: u32,
        before: Rect,
        after: Rect,
    },
    AddObject { layer: u32, object: MapObject },
    DeleteObject { layer: u32, object: MapObject },
    /// Property add/update/delete in one: `None` means absent.
    SetProperty {
        target: ElementRef,
        key: String,
        before: Option<PropertyValue>,
        after: Option<PropertyValue>,
    },
    SetAttribute {
        target: ElementRef,
        key: String,
        before: PropertyValue,
        after: PropertyValue,
    },
}

impl Change {
    /// Whether further edits may coalesce into this change.
    fn is_cumulative(&self) -> bool {
        matches!(self, Change::TilePaint { .. } | Change::ObjectRect { .. })
    }
}

#[derive(Debug)]
struct LogEntry {
    change: Change,
    /// A fixed change no longer accepts coalesced edits.
    fixed: bool,
    last_edit: Instant,
}

/// Records map mutations as reversible changes, coalescing bursts of
/// similar edits, with a bounded undo log and a redo pointer.
pub struct ActionsController {
    map: SharedMap,
    /// Layer receiving `plot` calls.
    pub current_tile_layer: Option<u32>,
    /// Layer receiving object add/delete calls without an explicit layer.
    pub current_object_layer: Option<u32>,
    log: Vec<LogEntry>,
    /// Entries `[0, pointer)` are applied; the rest is the redo tail.
    pointer: usize,
}

impl ActionsController {
    pub fn new(map: SharedMap) -> Self {
        ActionsController {
            map,
            current_tile_layer: None,
            current_object_layer: None,
            log: Vec::new(),
            pointer: 0,
        }
    }

    pub fn map(&self) -> &SharedMap {
        &self.map
    }

    /// Swap the edited map; the undo log belongs to the old document and
    /// is discarded.
    pub fn set_map(&mut self, map: SharedMap) {
        self.map = map;
        self.current_tile_layer = None;
        self.current_object_layer = None;
        self.log.clear();
        self.pointer = 0;
    }

    /// Build a fresh map with one tile layer and one object group and make
    /// it the edited document.
    pub fn create_new_map(&mut self, width: u32, height: u32, tilewidth: u32, tileheight: u32) -> SharedMap {
        let mut map = TiledMap::new(width, height, tilewidth, tileheight);
        map.add_layer(Layer::Tile(TileLayer::new(1, "main".to_string(), width, height)))
            .expect("fresh map cannot have duplicate layer ids");
        map.add_layer(Layer::Object(ObjectGroup::new(2, "objects".to_string())))
            .expect("fresh map cannot have duplicate layer ids");
        let shared: SharedMap = Rc::new(RefCell::new(map));
        self.set_map(shared.clone());
        self.current_tile_layer = Some(1);
        self.current_object_layer = Some(2);
        shared
    }

    pub fn undos_available(&self) -> bool {
        self.pointer > 0
    }

    pub fn redos_available(&self) -> bool {
        self.pointer < self.log.len()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Freeze the pending cumulative change, if any.
    pub fn fix_change(&mut self) {
        if self.pointer == self.log.len() {
            if let Some(top) = self.log.last_mut() {
                top.fixed = true;
            }
        }
    }

    /// Must be called once per frame: a cumulative change left alone for
    /// longer than the coalescing window gets fixed even with no new edit.
    pub fn action_tick(&mut self) {
        self.action_tick_at(Instant::now());
    }

    fn action_tick_at(&mut self, now: Instant) {
        if self.pointer == self.log.len() {
            if let Some(top) = self.log.last_mut() {
                if !top.fixed && now.duration_since(top.last_edit) > COALESCE_WINDOW {
                    top.fixed = true;
                }
            }
        }
    }

    /// The open (unfixed, in-window) top entry, if it exists.
    fn open_top(&mut self, now: Instant) -> Option<&mut LogEntry> {
        if self.pointer != self.log.len() {
            return None;
        }
        let top = self.log.last_mut()?;
        if top.fixed || now.duration_since(top.last_edit) > COALESCE_WINDOW {
            return None;
        }
        Some(top)
    }

    /// Append a new change: the pending one is fixed, any redo tail is
    /// discarded, and the log is trimmed to its bound.
    fn push(&mut self, change: Change, now: Instant) {
        self.fix_change();
        self.log.truncate(self.pointer);
        let fixed = !change.is_cumulative();
        self.log.push(LogEntry {
            change,
            fixed,
            last_edit: now,
        });
        if self.log.len() > MAX_UNDOS {
            self.log.remove(0);
        }
        self.pointer = self.log.len();
    }

    /// Paint one cell of the current tile layer.
    pub fn plot(&mut self, x: u32, y: u32, gid: u32) -> Result<(), MapError> {
        self.plot_at(x, y, gid, Instant::now())
    }

    fn plot_at(&mut self, x: u32, y: u32, gid: u32, now: Instant) -> Result<(), MapError> {
        let layer_id = self.current_tile_layer.ok_or_else(|| MapError::Structure {
            tag: "plot".to_string(),
            msg: "no tile layer selected".to_string(),
        })?;

        let before = {
            let mut m = self.map.borrow_mut();
            let layer = m
                .find_tile_layer_mut(layer_id)
                .ok_or_else(|| MapError::Structure {
                    tag: "plot".to_string(),
                    msg: format!("no tile layer with id {layer_id}"),
                })?;
            if !layer.in_bounds(x as i32, y as i32) {
                return Err(MapError::Structure {
                    tag: "plot".to_string(),
                    msg: format!("cell ({x}, {y}) outside layer bounds"),
                });
            }
            let before = layer.gid_at(x, y);
            layer.set_gid(x, y, gid);
            before
        };

        if !self.try_merge_paint(layer_id, x, y, before, gid, now) {
            let mut cells = HashMap::new();
            cells.insert((x, y), (before, gid));
            self.push(
                Change::TilePaint {
                    layer: layer_id,
                    cells,
                },
                now,
            );
        }
        Ok(())
    }

    fn try_merge_paint(
        &mut self,
        layer_id: u32,
        x: u32,
        y: u32,
        before: u32,
        gid: u32,
        now: Instant,
    ) -> bool {
        if let Some(top) = self.open_top(now) {
            if let Change::TilePaint { layer, cells } = &mut top.change {
                if *layer == layer_id {
                    // keep the first before, take the latest after
                    cells.entry((x, y)).or_insert((before, gid)).1 = gid;
                    top.last_edit = now;
                    return true;
                }
            }
        }
        false
    }

    /// Move an object to an absolute position (continuous drags coalesce).
    pub fn move_object(&mut self, layer: u32, id: u32, pos: Point) -> Result<(), MapError> {
        self.set_object_rect_at(layer, id, |rect| rect.at(pos), Instant::now())
    }

    /// Resize an object in place (continuous drags coalesce).
    pub fn resize_object(&mut self, layer: u32, id: u32, width: i32, height: i32) -> Result<(), MapError> {
        self.set_object_rect_at(
            layer,
            id,
            |rect| Rect::new(rect.x, rect.y, width, height),
            Instant::now(),
        )
    }

    fn set_object_rect_at(
        &mut self,
        layer_id: u32,
        id: u32,
        update: impl FnOnce(Rect) -> Rect,
        now: Instant,
    ) -> Result<(), MapError> {
        let (before, after) = {
            let mut m = self.map.borrow_mut();
            let obj = m
                .find_object_group_mut(layer_id)
                .and_then(|g| g.object_mut(id))
                .ok_or_else(|| MapError::Structure {
                    tag: "object".to_string(),
                    msg: format!("no object {id} in layer {layer_id}"),
                })?;
            let before = obj.rect;
            obj.rect = update(before);
            (before, obj.rect)
        };

        if !self.try_merge_object_rect(layer_id, id, after, now) {
            self.push(
                Change::ObjectRect {
                    layer: layer_id,
                    id,
                    before,
                    after,
                },
                now,
            );
        }
        Ok(())
    }

    fn try_merge_object_rect(&mut self, layer_id: u32, id: u32, after: Rect, now: Instant) -> bool {
        if let Some(top) = self.open_top(now) {
            if let Change::ObjectRect {
                layer,
                id: changed_id,
                after: open_after,
                ..
            } = &mut top.change
            {
                if *layer == layer_id && *changed_id == id {
                    *open_after = after;
                    top.last_edit = now;
                    return true;
                }
            }
        }
        false
    }

    /// Insert an object into a layer; returns its assigned id.
    pub fn add_object(&mut self, layer: u32, object: MapObject) -> Result<u32, MapError> {
        let id = {
            let mut m = self.map.borrow_mut();
            let group = m
                .find_object_group_mut(layer)
                .ok_or_else(|| MapError::Structure {
                    tag: "objectgroup".to_string(),
                    msg: format!("no object layer with id {layer}"),
                })?;
            group.add_object(object)
        };
        let snapshot = self
            .map
            .borrow()
            .find_object_group(layer)
            .and_then(|g| g.object(id).cloned())
            .expect("object was just inserted");
        self.push(
            Change::AddObject {
                layer,
                object: snapshot,
            },
            Instant::now(),
        );
        Ok(id)
    }

    pub fn delete_object(&mut self, layer: u32, id: u32) -> Result<(), MapError> {
        let object = {
            let mut m = self.map.borrow_mut();
            m.find_object_group_mut(layer)
                .and_then(|g| g.remove_object(id))
                .ok_or_else(|| MapError::Structure {
                    tag: "object".to_string(),
                    msg: format!("no object {id} in layer {layer}"),
                })?
        };
        self.push(Change::DeleteObject { layer, object }, Instant::now());
        Ok(())
    }

    pub fn add_element_property(
        &mut self,
        target: ElementRef,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), MapError> {
        self.set_element_property(target, key, Some(value))
    }

    pub fn update_element_property(
        &mut self,
        target: ElementRef,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), MapError> {
        self.set_element_property(target, key, Some(value))
    }

    pub fn delete_element_property(&mut self, target: ElementRef, key: &str) -> Result<(), MapError> {
        self.set_element_property(target, key, None)
    }

    fn set_element_property(
        &mut self,
        target: ElementRef,
        key: &str,
        after: Option<PropertyValue>,
    ) -> Result<(), MapError> {
        let before = apply_property(&self.map, target, key, after.clone())?;
        self.push(
            Change::SetProperty {
                target,
                key: key.to_string(),
                before,
                after,
            },
            Instant::now(),
        );
        Ok(())
    }

    /// Update a built-in attribute, validated against the element's static
    /// schema. Rejections leave both the map and the log untouched.
    pub fn update_element_attribute(
        &mut self,
        target: ElementRef,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), MapError> {
        let spec = lookup_spec(&self.map, target, key)?;
        if !spec.editable || !type_matches(spec, &value) {
            return Err(MapError::UnknownAttribute {
                target: target.describe(),
                name: key.to_string(),
            });
        }
        let before = read_attribute(&self.map, target, key)?;
        write_attribute(&self.map, target, key, &value)?;
        self.push(
            Change::SetAttribute {
                target,
                key: key.to_string(),
                before,
                after: value,
            },
            Instant::now(),
        );
        Ok(())
    }

    /// Step back over the latest applied change. An in-progress cumulative
    /// edit is fixed first so it becomes undoable as one unit.
    pub fn undo(&mut self) -> bool {
        self.fix_change();
        if self.pointer == 0 {
            return false;
        }
        self.pointer -= 1;
        let change = self.log[self.pointer].change.clone();
        apply_change(&self.map, &change, Direction::Backward);
        true
    }

    /// Re-apply the change at the pointer. Any pending change is fixed
    /// first, so redo never operates on a half-open edit.
    pub fn redo(&mut self) -> bool {
        self.fix_change();
        if self.pointer >= self.log.len() {
            return false;
        }
        let change = self.log[self.pointer].change.clone();
        apply_change(&self.map, &change, Direction::Forward);
        self.pointer += 1;
        true
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Replay a change. Snapshot-based, so repeated replay converges instead
/// of drifting; targets that disappeared in the meantime are skipped.
fn apply_change(map: &SharedMap, change: &Change, dir: Direction) {
    let mut m = map.borrow_mut();
    match change {
        Change::TilePaint { layer, cells } => {
            if let Some(l) = m.find_tile_layer_mut(*layer) {
                for (&(x, y), &(before, after)) in cells {
                    let gid = match dir {
                        Direction::Forward => after,
                        Direction::Backward => before,
                    };
                    if l.in_bounds(x as i32, y as i32) {
                        l.set_gid(x, y, gid);
                    }
                }
            }
        }
        Change::ObjectRect {
            layer,
            id,
            before,
            after,
        } => {
            if let Some(obj) = m.find_object_group_mut(*layer).and_then(|g| g.object_mut(*id)) {
                obj.rect = match dir {
                    Direction::Forward => *after,
                    Direction::Backward => *before,
                };
            }
        }
        Change::AddObject { layer, object } => {
            if let Some(group) = m.find_object_group_mut(*layer) {
                match dir {
                    Direction::Forward => {
                        group.add_object(object.clone());
                    }
                    Direction::Backward => {
                        group.remove_object(object.id);
                    }
                }
            }
        }
        Change::DeleteObject { layer, object } => {
            if let Some(group) = m.find_object_group_mut(*layer) {
                match dir {
                    Direction::Forward => {
                        group.remove_object(object.id);
                    }
                    Direction::Backward => {
                        group.add_object(object.clone());
                    }
                }
            }
        }
        Change::SetProperty {
            target,
            key,
            before,
            after,
        } => {
            let value = match dir {
                Direction::Forward => after,
                Direction::Backward => before,
            };
            drop(m);
            let _ = apply_property(map, *target, key, value.clone());
        }
        Change::SetAttribute {
            target,
            key,
            before,
            after,
        } => {
            let value = match dir {
                Direction::Forward => after,
                Direction::Backward => before,
            };
            drop(m);
            let _ = write_attribute(map, *target, key, value);
        }
    }
}

/// Set or remove a property on a target element, returning the previous
/// value.
fn apply_property(
    map: &SharedMap,
    target: ElementRef,
    key: &str,
    value: Option<PropertyValue>,
) -> Result<Option<PropertyValue>, MapError> {
    let mut m = map.borrow_mut();
    let missing = || MapError::Structure {
        tag: "property".to_string(),
        msg: format!("no such element: {}", target.describe()),
    };
    match target {
        ElementRef::Map => {
            let before = m.properties.get(key).cloned();
            match value {
                Some(v) => m.properties.insert(key.to_string(), v),
                None => {
                    m.properties.remove(key);
                }
            }
            Ok(before)
        }
        ElementRef::Layer(id) => {
            let props = match m.find_layer_mut(id).ok_or_else(missing)? {
                Layer::Tile(l) => &mut l.properties,
                Layer::Object(l) => &mut l.properties,
                Layer::Group(l) => &mut l.properties,
            };
            let before = props.get(key).cloned();
            match value {
                Some(v) => props.insert(key.to_string(), v),
                None => {
                    props.remove(key);
                }
            }
            Ok(before)
        }
        ElementRef::Object { layer, id } => {
            let obj = m
                .find_object_group_mut(layer)
                .and_then(|g| g.object_mut(id))
                .ok_or_else(missing)?;
            let before = obj.properties.get(key).cloned();
            match value {
                Some(v) => obj.properties.insert(key.to_string(), v),
                None => {
                    obj.properties.remove(key);
                }
            }
            obj.apply_property_switches();
            Ok(before)
        }
    }
}

fn lookup_spec(
    map: &SharedMap,
    target: ElementRef,
    key: &str,
) -> Result<&'static AttrSpec, MapError> {
    let table = match target {
        ElementRef::Map => schema::MAP_ATTRIBUTES,
        ElementRef::Layer(id) => match map.borrow().find_layer(id) {
            Some(Layer::Tile(_)) => schema::TILE_LAYER_ATTRIBUTES,
            Some(Layer::Object(_)) | Some(Layer::Group(_)) => schema::OBJECT_GROUP_ATTRIBUTES,
            None => {
                return Err(MapError::Structure {
                    tag: "attribute".to_string(),
                    msg: format!("no such element: {}", target.describe()),
                })
            }
        },
        ElementRef::Object { .. } => schema::OBJECT_ATTRIBUTES,
    };
    schema::find(table, key).ok_or_else(|| MapError::UnknownAttribute {
        target: target.describe(),
        name: key.to_string(),
    })
}

fn type_matches(spec: &AttrSpec, value: &PropertyValue) -> bool {
    matches!(
        (spec.ty, value),
        (AttrType::Int, PropertyValue::I64(_))
            | (AttrType::Bool, PropertyValue::Bool(_))
            | (AttrType::Str, PropertyValue::String(_))
    )
}

fn read_attribute(
    map: &SharedMap,
    target: ElementRef,
    key: &str,
) -> Result<PropertyValue, MapError> {
    let m = map.borrow();
    let missing = || MapError::Structure {
        tag: "attribute".to_string(),
        msg: format!("no such element: {}", target.describe()),
    };
    let unknown = || MapError::UnknownAttribute {
        target: target.describe(),
        name: key.to_string(),
    };
    match target {
        ElementRef::Map => match key {
            "invert_y" => Ok(PropertyValue::Bool(m.invert_y)),
            _ => Err(unknown()),
        },
        ElementRef::Layer(id) => {
            let layer = m.find_layer(id).ok_or_else(missing)?;
            match key {
                "name" => Ok(PropertyValue::String(layer.name().to_string())),
                "visible" => Ok(PropertyValue::Bool(layer.visible())),
                _ => Err(unknown()),
            }
        }
        ElementRef::Object { layer, id } => {
            let obj = m
                .find_object_group(layer)
                .and_then(|g| g.object(id))
                .ok_or_else(missing)?;
            match key {
                "name" => Ok(PropertyValue::String(obj.name.clone())),
                "x" => Ok(PropertyValue::I64(obj.rect.x as i64)),
                "y" => Ok(PropertyValue::I64(obj.rect.y as i64)),
                "width" => Ok(PropertyValue::I64(obj.rect.width as i64)),
                "height" => Ok(PropertyValue::I64(obj.rect.height as i64)),
                "gid" => Ok(PropertyValue::I64(obj.gid as i64)),
                "visible" => Ok(PropertyValue::Bool(obj.visible)),
                "solid" => Ok(PropertyValue::Bool(obj.solid)),
                "pushable" => Ok(PropertyValue::Bool(obj.pushable)),
                _ => Err(unknown()),
            }
        }
    }
}

fn write_attribute(
    map: &SharedMap,
    target: ElementRef,
    key: &str,
    value: &PropertyValue,
) -> Result<(), MapError> {
    let mut m = map.borrow_mut();
    let missing = || MapError::Structure {
        tag: "attribute".to_string(),
        msg: format!("no such element: {}", target.describe()),
    };
    let unknown = || MapError::UnknownAttribute {
        target: target.describe(),
        name: key.to_string(),
    };
    match target {
        ElementRef::Map => match (key, value) {
            ("invert_y", PropertyValue::Bool(v)) => {
                m.invert_y = *v;
                Ok(())
            }
            _ => Err(unknown()),
        },
        ElementRef::Layer(id) => {
            let layer = m.find_layer_mut(id).ok_or_else(missing)?;
            match (key, value) {
                ("name", PropertyValue::String(v)) => {
                    match layer {
                        Layer::Tile(l) => l.name = v.clone(),
                        Layer::Object(l) => l.name = v.clone(),
                        Layer::Group(l) => l.name = v.clone(),
                    }
                    Ok(())
                }
                ("visible", PropertyValue::Bool(v)) => {
                    match layer {
                        Layer::Tile(l) => l.visible = *v,
                        Layer::Object(l) => l.visible = *v,
                        Layer::Group(l) => l.visible = *v,
                    }
                    Ok(())
                }
                _ => Err(unknown()),
            }
        }
        ElementRef::Object { layer, id } => {
            let obj = m
                .find_object_group_mut(layer)
                .and_then(|g| g.object_mut(id))
                .ok_or_else(missing)?;
            match (key, value) {
                ("name", PropertyValue::String(v)) => obj.name = v.clone(),
                ("x", PropertyValue::I64(v)) => obj.rect.x = *v as i32,
                ("y", PropertyValue::I64(v)) => obj.rect.y = *v as i32,
                ("width", PropertyValue::I64(v)) => obj.rect.width = *v as i32,
                ("height", PropertyValue::I64(v)) => obj.rect.height = *v as i32,
                ("gid", PropertyValue::I64(v)) => obj.gid = *v as u32,
                ("visible", PropertyValue::Bool(v)) => obj.visible = *v,
                ("solid", PropertyValue::Bool(v)) => obj.solid = *v,
                ("pushable", PropertyValue::Bool(v)) => obj.pushable = *v,
                _ => return Err(unknown()),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ActionsController {
        let mut ac = ActionsController::new(Rc::new(RefCell::new(TiledMap::new(1, 1, 16, 16))));
        ac.create_new_map(8, 8, 16, 16);
        ac
    }

    fn grid_gid(ac: &ActionsController, x: u32, y: u32) -> u32 {
        ac.map()
            .borrow()
            .tile_layer(1)
            .map(|l| l.gid_at(x, y))
            .unwrap()
    }

    #[test]
    fn paint_burst_coalesces_into_one_change() {
        let mut ac = controller();
        for i in 0..5 {
            ac.plot(i, 0, 7).unwrap();
        }
        assert_eq!(ac.log_len(), 1);
        assert_eq!(ac.pointer(), 1);

        assert!(ac.undo());
        for i in 0..5 {
            assert_eq!(grid_gid(&ac, i, 0), 0, "undo must restore cell {i}");
        }
        assert!(ac.redo());
        for i in 0..5 {
            assert_eq!(grid_gid(&ac, i, 0), 7);
        }
    }

    #[test]
    fn paint_keeps_first_before_and_last_after() {
        let mut ac = controller();
        ac.plot(2, 2, 5).unwrap();
        ac.plot(2, 2, 6).unwrap();
        ac.plot(2, 2, 9).unwrap();
        assert_eq!(ac.log_len(), 1);

        ac.undo();
        assert_eq!(grid_gid(&ac, 2, 2), 0);
        ac.redo();
        assert_eq!(grid_gid(&ac, 2, 2), 9);
    }

    #[test]
    fn differing_kind_fixes_open_change() {
        let mut ac = controller();
        ac.plot(0, 0, 3).unwrap();
        let id = ac
            .add_object(2, MapObject::new(0, "crate".into(), Rect::new(0, 0, 16, 16)))
            .unwrap();
        ac.plot(1, 0, 3).unwrap();
        // paint, add, paint: three changes, painting did not merge across
        // the intervening add
        assert_eq!(ac.log_len(), 3);

        ac.undo();
        assert_eq!(grid_gid(&ac, 1, 0), 0);
        assert_eq!(grid_gid(&ac, 0, 0), 3);
        ac.undo();
        assert!(ac.map().borrow().object_group(2).unwrap().object(id).is_none());
        ac.undo();
        assert_eq!(grid_gid(&ac, 0, 0), 0);
    }

    #[test]
    fn timeout_fixes_pending_change() {
        let mut ac = controller();
        ac.plot(0, 0, 1).unwrap();
        // simulate the per-frame timer firing after the window lapsed
        ac.action_tick_at(Instant::now() + COALESCE_WINDOW + Duration::from_millis(1));
        ac.plot(1, 0, 1).unwrap();
        assert_eq!(ac.log_len(), 2, "post-timeout paint starts a new change");
    }

    #[test]
    fn editing_after_undo_truncates_redo_tail() {
        let mut ac = controller();
        ac.plot(0, 0, 1).unwrap();
        ac.fix_change();
        ac.plot(0, 1, 2).unwrap();
        ac.fix_change();
        assert_eq!((ac.log_len(), ac.pointer()), (2, 2));

        assert!(ac.undo());
        assert_eq!((ac.log_len(), ac.pointer()), (2, 1));

        ac.plot(0, 2, 3).unwrap();
        assert_eq!((ac.log_len(), ac.pointer()), (2, 2));
        assert!(!ac.redo(), "redo tail was discarded by the new edit");
        assert_eq!(grid_gid(&ac, 0, 1), 0, "undone change stays undone");
        assert_eq!(grid_gid(&ac, 0, 2), 3);
    }

    #[test]
    fn undo_fixes_in_progress_edit_first() {
        let mut ac = controller();
        ac.plot(0, 0, 1).unwrap();
        // still unfixed; undo must freeze and revert it as one unit
        assert!(ac.undo());
        assert_eq!(grid_gid(&ac, 0, 0), 0);
        assert!(!ac.undos_available());
        assert!(ac.redos_available());
    }

    #[test]
    fn log_caps_at_max_undos() {
        let mut ac = controller();
        for i in 0..(MAX_UNDOS as u32 + 5) {
            ac.plot(i % 8, i / 8, i + 1).unwrap();
            ac.fix_change();
        }
        assert_eq!(ac.log_len(), MAX_UNDOS);
        assert_eq!(ac.pointer(), MAX_UNDOS);
    }

    #[test]
    fn object_drag_coalesces_and_inverts() {
        let mut ac = controller();
        let id = ac
            .add_object(2, MapObject::new(0, "crate".into(), Rect::new(0, 0, 16, 16)))
            .unwrap();
        ac.move_object(2, id, Point::new(4, 0)).unwrap();
        ac.move_object(2, id, Point::new(8, 0)).unwrap();
        ac.move_object(2, id, Point::new(12, 0)).unwrap();
        // one AddObject + one coalesced drag
        assert_eq!(ac.log_len(), 2);

        ac.undo();
        let rect = ac
            .map()
            .borrow()
            .object_group(2)
            .unwrap()
            .object(id)
            .unwrap()
            .rect;
        assert_eq!(rect, Rect::new(0, 0, 16, 16));
        ac.redo();
        let rect = ac
            .map()
            .borrow()
            .object_group(2)
            .unwrap()
            .object(id)
            .unwrap()
            .rect;
        assert_eq!(rect, Rect::new(12, 0, 16, 16));
    }

    #[test]
    fn delete_object_round_trips() {
        let mut ac = controller();
        let id = ac
            .add_object(2, MapObject::new(0, "npc".into(), Rect::new(8, 8, 16, 16)))
            .unwrap();
        ac.delete_object(2, id).unwrap();
        assert!(ac.map().borrow().object_group(2).unwrap().object(id).is_none());

        ac.undo();
        let m = ac.map().borrow();
        let restored = m.object_group(2).unwrap().object(id).unwrap();
        assert_eq!(restored.name, "npc");
        assert_eq!(restored.rect, Rect::new(8, 8, 16, 16));
    }

    #[test]
    fn property_edit_round_trips() {
        let mut ac = controller();
        ac.add_element_property(ElementRef::Map, "theme", PropertyValue::String("cave".into()))
            .unwrap();
        ac.update_element_property(ElementRef::Map, "theme", PropertyValue::String("forest".into()))
            .unwrap();
        assert_eq!(
            ac.map().borrow().properties.get_string("theme"),
            Some("forest")
        );

        ac.undo();
        assert_eq!(ac.map().borrow().properties.get_string("theme"), Some("cave"));
        ac.undo();
        assert!(ac.map().borrow().properties.get("theme").is_none());
        ac.redo();
        ac.redo();
        assert_eq!(
            ac.map().borrow().properties.get_string("theme"),
            Some("forest")
        );
    }

    #[test]
    fn attribute_update_validates_against_schema() {
        let mut ac = controller();
        let id = ac
            .add_object(2, MapObject::new(0, "door".into(), Rect::new(0, 0, 16, 16)))
            .unwrap();
        let target = ElementRef::Object { layer: 2, id };

        let log_before = ac.log_len();
        // unknown attribute
        assert!(ac
            .update_element_attribute(target, "rotation", PropertyValue::I64(90))
            .is_err());
        // read-only attribute
        assert!(ac
            .update_element_attribute(target, "id", PropertyValue::I64(99))
            .is_err());
        // type mismatch
        assert!(ac
            .update_element_attribute(target, "solid", PropertyValue::I64(1))
            .is_err());
        assert_eq!(ac.log_len(), log_before, "rejections never touch the log");

        ac.update_element_attribute(target, "solid", PropertyValue::Bool(true))
            .unwrap();
        assert!(ac.map().borrow().object_group(2).unwrap().object(id).unwrap().solid);
        ac.undo();
        assert!(!ac.map().borrow().object_group(2).unwrap().object(id).unwrap().solid);
    }

    #[test]
    fn repeated_undo_redo_converges() {
        let mut ac = controller();
        ac.plot(3, 3, 4).unwrap();
        ac.fix_change();
        for _ in 0..3 {
            ac.undo();
            assert_eq!(grid_gid(&ac, 3, 3), 0);
            assert!(!ac.undo());
            ac.redo();
            assert_eq!(grid_gid(&ac, 3, 3), 4);
            assert!(!ac.redo());
        }
    }
}
