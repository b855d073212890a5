//! Free-form typed properties attached to maps, tilesets, layers, objects
//! and tiles.

use std::collections::BTreeMap;

/// One typed property value from a TMX `<property>` element.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    I64(i64),
    F32(f32),
    String(String),
    /// `file` typed properties keep the raw relative path
    File(String),
    /// `color` typed properties keep the raw `#AARRGGBB` text
    Color(String),
    /// `object` typed properties reference another object by id
    Object(i64),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::I64(v) | PropertyValue::Object(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            PropertyValue::F32(v) => Some(*v),
            PropertyValue::I64(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::File(s) | PropertyValue::Color(s) => Some(s),
            _ => None,
        }
    }
}

/// An ordered name → value property bag with typed getters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(PropertyValue::as_bool)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name)
            .and_then(PropertyValue::as_i64)
            .and_then(|v| i32::try_from(v).ok())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(PropertyValue::as_i64)
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(PropertyValue::as_f32)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_str)
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        Properties {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Read-through lookup across an ordered pair of property sources.
///
/// A tile-backed object sees its own properties in front of the properties
/// of the tile its gid points at; writes land in the layer that already
/// holds the key, otherwise in the front layer. No copying happens at
/// lookup time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayeredProperties {
    own: Properties,
    under: Properties,
}

impl LayeredProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the fallback layer (the tile-level properties).
    pub fn set_under(&mut self, under: Properties) {
        self.under = under;
    }

    pub fn own(&self) -> &Properties {
        &self.own
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.own.get(name).or_else(|| self.under.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.own.contains(name) || self.under.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) {
        let name = name.into();
        if !self.own.contains(&name) && self.under.contains(&name) {
            self.under.insert(name, value);
        } else {
            self.own.insert(name, value);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.own.remove(name).or_else(|| self.under.remove(name))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(PropertyValue::as_bool)
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(PropertyValue::as_f32)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_str)
    }

    /// Keys from both layers, front layer first, without duplicates.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.own
            .iter()
            .map(|(k, _)| k)
            .chain(
                self.under
                    .iter()
                    .map(|(k, _)| k)
                    .filter(|k| !self.own.contains(k)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters() {
        let mut p = Properties::new();
        p.insert("solid", PropertyValue::Bool(true));
        p.insert("damage", PropertyValue::I64(10));
        p.insert("speed", PropertyValue::F32(2.5));
        p.insert("name", PropertyValue::String("rock".into()));

        assert_eq!(p.get_bool("solid"), Some(true));
        assert_eq!(p.get_i32("damage"), Some(10));
        assert_eq!(p.get_f32("speed"), Some(2.5));
        assert_eq!(p.get_string("name"), Some("rock"));
        assert_eq!(p.get_bool("damage"), None);
        assert_eq!(p.get_string("missing"), None);
    }

    #[test]
    fn layered_lookup_front_wins() {
        let mut tile = Properties::new();
        tile.insert("solid", PropertyValue::Bool(true));
        tile.insert("kind", PropertyValue::String("door".into()));

        let mut layered = LayeredProperties::new();
        layered.set_under(tile);
        layered.insert("kind", PropertyValue::String("open_door".into()));

        assert_eq!(layered.get_string("kind"), Some("open_door"));
        assert_eq!(layered.get_bool("solid"), Some(true));
    }

    #[test]
    fn layered_write_lands_in_owning_layer() {
        let mut tile = Properties::new();
        tile.insert("hp", PropertyValue::I64(3));

        let mut layered = LayeredProperties::new();
        layered.set_under(tile);

        // key exists only in the tile layer, so the write goes there
        layered.insert("hp", PropertyValue::I64(2));
        assert!(layered.own().get("hp").is_none());
        assert_eq!(layered.get("hp").and_then(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn keys_are_deduplicated() {
        let mut tile = Properties::new();
        tile.insert("a", PropertyValue::I64(1));
        tile.insert("b", PropertyValue::I64(2));

        let mut layered = LayeredProperties::new();
        layered.set_under(tile);
        layered.insert("a", PropertyValue::I64(3));

        let keys: Vec<&str> = layered.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
