//! Static attribute schemas for the editor.
//!
//! Each editable entity kind declares its fields and their types up front;
//! the property grid and the attribute-update action both consult these
//! tables instead of reflecting over the live structs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Bool,
    Str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub name: &'static str,
    pub ty: AttrType,
    pub editable: bool,
}

const fn attr(name: &'static str, ty: AttrType, editable: bool) -> AttrSpec {
    AttrSpec { name, ty, editable }
}

pub const MAP_ATTRIBUTES: &[AttrSpec] = &[
    attr("width", AttrType::Int, false),
    attr("height", AttrType::Int, false),
    attr("tilewidth", AttrType::Int, false),
    attr("tileheight", AttrType::Int, false),
    attr("invert_y", AttrType::Bool, true),
];

pub const TILE_LAYER_ATTRIBUTES: &[AttrSpec] = &[
    attr("id", AttrType::Int, false),
    attr("name", AttrType::Str, true),
    attr("visible", AttrType::Bool, true),
    attr("width", AttrType::Int, false),
    attr("height", AttrType::Int, false),
];

pub const OBJECT_GROUP_ATTRIBUTES: &[AttrSpec] = &[
    attr("id", AttrType::Int, false),
    attr("name", AttrType::Str, true),
    attr("visible", AttrType::Bool, true),
];

pub const OBJECT_ATTRIBUTES: &[AttrSpec] = &[
    attr("id", AttrType::Int, false),
    attr("name", AttrType::Str, true),
    attr("x", AttrType::Int, true),
    attr("y", AttrType::Int, true),
    attr("width", AttrType::Int, true),
    attr("height", AttrType::Int, true),
    attr("gid", AttrType::Int, true),
    attr("visible", AttrType::Bool, true),
    attr("solid", AttrType::Bool, true),
    attr("pushable", AttrType::Bool, true),
];

/// Look an attribute up in a schema table.
pub fn find(table: &'static [AttrSpec], name: &str) -> Option<&'static AttrSpec> {
    table.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_respects_mutability() {
        let spec = find(OBJECT_ATTRIBUTES, "id").unwrap();
        assert!(!spec.editable);
        let spec = find(OBJECT_ATTRIBUTES, "solid").unwrap();
        assert!(spec.editable);
        assert_eq!(spec.ty, AttrType::Bool);
        assert!(find(OBJECT_ATTRIBUTES, "rotation").is_none());
    }
}
