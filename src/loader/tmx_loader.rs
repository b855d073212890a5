//! TMX XML decoding: map and tileset documents → the engine's model.
//!
//! The loader is strict: malformed documents, unsupported encodings and
//! out-of-range tile references abort the whole load, leaving no partial
//! map behind.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use roxmltree::{Document, Node};

use crate::error::MapError;
use crate::geom::Rect;
use crate::layer::{GroupLayer, Layer, MapObject, ObjectGroup, TileLayer};
use crate::map::TiledMap;
use crate::properties::{Properties, PropertyValue};
use crate::tileset::{TileAnimation, TileMeta, Tileset};

/// Load a TMX map file, resolving external tilesets and atlas images
/// relative to the map's directory.
pub fn load_map(path: impl AsRef<Path>) -> Result<TiledMap, MapError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    parse_map_str(&text, &base_dir, path)
}

/// Parse TMX map XML. `base_dir` anchors external tileset and image paths;
/// `origin` only labels errors.
pub fn parse_map_str(xml: &str, base_dir: &Path, origin: &Path) -> Result<TiledMap, MapError> {
    let doc = Document::parse(xml).map_err(|source| MapError::Xml {
        path: origin.to_path_buf(),
        source,
    })?;
    let root = doc.root_element();
    if root.tag_name().name() != "map" {
        return Err(MapError::Structure {
            tag: root.tag_name().name().to_string(),
            msg: "expected <map> at document root".to_string(),
        });
    }

    let mut map = TiledMap::new(
        attribute(&root, "width")?,
        attribute(&root, "height")?,
        attribute(&root, "tilewidth")?,
        attribute(&root, "tileheight")?,
    );
    if let Some(colour) = root.attribute("backgroundcolor") {
        map.background_color = Some(parse_color(&root, colour)?);
    }
    map.properties = parse_properties(&root)?;
    if let Some(v) = map.properties.get_bool("invert_y") {
        map.invert_y = v;
    }

    // tilesets come first in document order; gid registration during layer
    // parsing depends on the full gid space being known
    for node in root.children().filter(|n| n.tag_name().name() == "tileset") {
        let tileset = parse_tileset(&node, base_dir)?;
        map.add_tileset(tileset);
    }

    let mut next_layer_id = 1;
    for node in root.children() {
        if let Some(layer) = parse_layer(&node, &mut map, &mut next_layer_id)? {
            map.add_layer(layer)?;
        }
    }

    Ok(map)
}

/// Load an external tileset file on its own. With no owning map yet,
/// `firstgid` stays 0 until assigned by [`TiledMap::add_tileset`].
pub fn load_tileset(path: impl AsRef<Path>) -> Result<Tileset, MapError> {
    load_tileset_file(path.as_ref(), 0)
}

/// Gid-bearing metadata (animation frames) needs the final `firstgid` at
/// parse time, so the map loader passes it down here.
fn load_tileset_file(path: &Path, firstgid: u32) -> Result<Tileset, MapError> {
    let text = fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = Document::parse(&text).map_err(|source| MapError::Xml {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut tileset = parse_tileset_node(&doc.root_element(), &base_dir, firstgid)?;
    tileset.source = Some(path.to_string_lossy().into_owned());
    Ok(tileset)
}

fn parse_tileset(node: &Node, base_dir: &Path) -> Result<Tileset, MapError> {
    let firstgid = attribute_or(node, "firstgid", 0u32)?;
    if let Some(source) = node.attribute("source") {
        let ts_path = base_dir.join(source.replace('\\', "/"));
        let mut tileset = load_tileset_file(&ts_path, firstgid)?;
        tileset.source = Some(source.to_string());
        Ok(tileset)
    } else {
        parse_tileset_node(node, base_dir, firstgid)
    }
}

fn parse_tileset_node(node: &Node, base_dir: &Path, firstgid: u32) -> Result<Tileset, MapError> {
    if node.tag_name().name() != "tileset" {
        return Err(MapError::Structure {
            tag: node.tag_name().name().to_string(),
            msg: "expected <tileset>".to_string(),
        });
    }

    let image_node = node
        .children()
        .find(|n| n.tag_name().name() == "image")
        .ok_or_else(|| MapError::Structure {
            tag: "tileset".to_string(),
            msg: "tileset has no <image> atlas".to_string(),
        })?;
    let image_source: String = attribute(&image_node, "source")?;
    let image_path = base_dir.join(image_source.replace('\\', "/"));
    let atlas = image::open(&image_path)
        .map_err(|source| MapError::Image {
            path: image_path,
            source,
        })?
        .to_rgba8();

    let mut tileset = Tileset::new(
        attribute_or(node, "name", String::new())?,
        attribute(node, "tilewidth")?,
        attribute(node, "tileheight")?,
        attribute(node, "columns")?,
        attribute(node, "tilecount")?,
        attribute_or(node, "spacing", 0)?,
        attribute_or(node, "margin", 0)?,
        atlas,
    );
    tileset.firstgid = firstgid;

    for tile_node in node.children().filter(|n| n.tag_name().name() == "tile") {
        let local_id: u32 = attribute(&tile_node, "id")?;
        let meta = parse_tile_meta(&tile_node, firstgid)?;
        if !meta.is_empty() {
            tileset.set_tile_meta(local_id, meta);
        }
    }

    Ok(tileset)
}

fn parse_tile_meta(node: &Node, firstgid: u32) -> Result<TileMeta, MapError> {
    let mut meta = TileMeta {
        properties: parse_properties(node)?,
        ..Default::default()
    };

    // nested object group: collider sub-rectangles relative to the tile
    if let Some(group) = node
        .children()
        .find(|n| n.tag_name().name() == "objectgroup")
    {
        for obj in group.children().filter(|n| n.tag_name().name() == "object") {
            meta.colliders.push(Rect::new(
                attribute_or(&obj, "x", 0.0f32)? as i32,
                attribute_or(&obj, "y", 0.0f32)? as i32,
                attribute_or(&obj, "width", 0.0f32)? as i32,
                attribute_or(&obj, "height", 0.0f32)? as i32,
            ));
        }
    }

    if let Some(animation) = node.children().find(|n| n.tag_name().name() == "animation") {
        let mut anim = TileAnimation::new();
        for frame in animation
            .children()
            .filter(|n| n.tag_name().name() == "frame")
        {
            let tileid: u32 = attribute(&frame, "tileid")?;
            anim.add_frame(firstgid + tileid, attribute(&frame, "duration")?);
        }
        if !anim.is_empty() {
            meta.animation = Some(anim);
        }
    }

    Ok(meta)
}

fn parse_layer(
    node: &Node,
    map: &mut TiledMap,
    next_id: &mut u32,
) -> Result<Option<Layer>, MapError> {
    let layer = match node.tag_name().name() {
        "layer" => Some(Layer::Tile(parse_tile_layer(node, map, next_id)?)),
        "objectgroup" => Some(Layer::Object(parse_object_group(node, map, next_id)?)),
        "group" => Some(Layer::Group(parse_group_layer(node, map, next_id)?)),
        _ => None,
    };
    Ok(layer)
}

fn take_layer_id(node: &Node, next_id: &mut u32) -> Result<u32, MapError> {
    let id = attribute_or(node, "id", 0u32)?;
    let id = if id == 0 { *next_id } else { id };
    *next_id = (*next_id).max(id + 1);
    Ok(id)
}

fn parse_tile_layer(
    node: &Node,
    map: &mut TiledMap,
    next_id: &mut u32,
) -> Result<TileLayer, MapError> {
    let name: String = attribute_or(node, "name", String::new())?;
    let width: u32 = attribute(node, "width")?;
    let height: u32 = attribute(node, "height")?;
    let mut layer = TileLayer::new(take_layer_id(node, next_id)?, name, width, height);
    layer.visible = bool_attribute_or(node, "visible", true)?;
    layer.properties = parse_properties(node)?;

    let data_node = node
        .children()
        .find(|n| n.tag_name().name() == "data")
        .ok_or_else(|| MapError::Structure {
            tag: "layer".to_string(),
            msg: format!("layer '{}' has no <data>", layer.name),
        })?;
    let raw = decode_layer_data(&data_node)?;
    if raw.len() != (width * height) as usize {
        return Err(MapError::InvalidLayerSize {
            layer: layer.name.clone(),
            expected: (width * height) as usize,
            actual: raw.len(),
        });
    }

    // every entry goes through gid registration, index 0 included; errors
    // carry the offending cell
    let mut data = Vec::with_capacity(raw.len());
    for (i, &raw_gid) in raw.iter().enumerate() {
        let gid = map.register_raw_gid(raw_gid).map_err(|_| {
            MapError::TileOutOfRange {
                layer: layer.name.clone(),
                x: i as u32 % width,
                y: i as u32 / width,
                gid: raw_gid,
            }
        })?;
        data.push(gid);
    }
    layer.set_data(data);

    Ok(layer)
}

fn decode_layer_data(data_node: &Node) -> Result<Vec<u32>, MapError> {
    let text = data_node.text().unwrap_or_default().trim();
    match data_node.attribute("encoding") {
        Some("csv") => text
            .split(',')
            .map(|cell| {
                cell.trim()
                    .parse::<u32>()
                    .map_err(|_| MapError::CorruptTileData(format!("bad csv cell {:?}", cell.trim())))
            })
            .collect(),
        Some("base64") => {
            let raw = BASE64
                .decode(text)
                .map_err(|e| MapError::CorruptTileData(format!("base64: {e}")))?;
            let bytes = match data_node.attribute("compression") {
                None => raw,
                Some("gzip") => inflate(libflate::gzip::Decoder::new(&raw[..]))?,
                Some("zlib") => inflate(libflate::zlib::Decoder::new(&raw[..]))?,
                Some(other) => return Err(MapError::UnsupportedCompression(other.to_string())),
            };
            if bytes.len() % 4 != 0 {
                return Err(MapError::CorruptTileData(format!(
                    "payload of {} bytes is not a whole number of u32s",
                    bytes.len()
                )));
            }
            Ok(bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect())
        }
        Some(other) => Err(MapError::UnsupportedEncoding(other.to_string())),
        None => Err(MapError::UnsupportedEncoding("<element data>".to_string())),
    }
}

fn inflate<D: Read>(decoder: std::io::Result<D>) -> Result<Vec<u8>, MapError> {
    let mut decoder =
        decoder.map_err(|e| MapError::CorruptTileData(format!("inflate header: {e}")))?;
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| MapError::CorruptTileData(format!("inflate: {e}")))?;
    Ok(out)
}

fn parse_object_group(
    node: &Node,
    map: &mut TiledMap,
    next_id: &mut u32,
) -> Result<ObjectGroup, MapError> {
    let mut group = ObjectGroup::new(
        take_layer_id(node, next_id)?,
        attribute_or(node, "name", String::new())?,
    );
    group.visible = bool_attribute_or(node, "visible", true)?;
    group.properties = parse_properties(node)?;

    for obj_node in node.children().filter(|n| n.tag_name().name() == "object") {
        group.add_object(parse_object(&obj_node, map)?);
    }
    Ok(group)
}

fn parse_object(node: &Node, map: &mut TiledMap) -> Result<MapObject, MapError> {
    let rect = Rect::new(
        attribute_or(node, "x", 0.0f32)? as i32,
        attribute_or(node, "y", 0.0f32)? as i32,
        attribute_or(node, "width", 0.0f32)? as i32,
        attribute_or(node, "height", 0.0f32)? as i32,
    );
    let mut obj = MapObject::new(
        attribute_or(node, "id", 0u32)?,
        attribute_or(node, "name", String::new())?,
        rect,
    );
    obj.visible = bool_attribute_or(node, "visible", true)?;

    let raw_gid = attribute_or(node, "gid", 0u32)?;
    if raw_gid > 0 {
        obj.gid = map.register_raw_gid(raw_gid)?;
        // a transformed object still inherits the base tile's properties
        if let Some(meta) = map.tile_meta_for(obj.gid) {
            obj.properties.set_under(meta.properties.clone());
        }
        if map.invert_y {
            obj.rect.y -= obj.rect.height;
        }
    }

    for (name, value) in parse_properties(node)?.iter() {
        obj.properties.insert(name.to_string(), value.clone());
    }
    obj.apply_property_switches();

    Ok(obj)
}

fn parse_group_layer(
    node: &Node,
    map: &mut TiledMap,
    next_id: &mut u32,
) -> Result<GroupLayer, MapError> {
    let mut group = GroupLayer::new(
        take_layer_id(node, next_id)?,
        attribute_or(node, "name", String::new())?,
    );
    group.visible = bool_attribute_or(node, "visible", true)?;
    group.properties = parse_properties(node)?;

    for child in node.children() {
        if let Some(layer) = parse_layer(&child, map, next_id)? {
            group.layers.push(layer);
        }
    }
    Ok(group)
}

fn parse_properties(node: &Node) -> Result<Properties, MapError> {
    let mut props = Properties::new();
    let Some(container) = node
        .children()
        .find(|n| n.tag_name().name() == "properties")
    else {
        return Ok(props);
    };

    for prop in container
        .children()
        .filter(|n| n.tag_name().name() == "property")
    {
        let name: String = attribute(&prop, "name")?;
        // multi-line strings store the value as element text
        let raw = prop
            .attribute("value")
            .map(str::to_string)
            .or_else(|| prop.text().map(str::to_string))
            .unwrap_or_default();

        let value = match prop.attribute("type") {
            Some("bool") => PropertyValue::Bool(parse_bool(&prop, &raw)?),
            Some("int") => PropertyValue::I64(parse_attr(&prop, "value", &raw)?),
            Some("float") => PropertyValue::F32(parse_attr(&prop, "value", &raw)?),
            Some("object") => PropertyValue::Object(parse_attr(&prop, "value", &raw)?),
            Some("file") => PropertyValue::File(raw),
            Some("color") => PropertyValue::Color(raw),
            Some("string") | Some("enum") | None => PropertyValue::String(raw),
            Some(other) => {
                return Err(MapError::Structure {
                    tag: "property".to_string(),
                    msg: format!("unsupported property type '{other}' on '{name}'"),
                })
            }
        };
        props.insert(name, value);
    }
    Ok(props)
}

fn parse_color(node: &Node, text: &str) -> Result<[u8; 3], MapError> {
    let invalid = || MapError::InvalidAttribute {
        tag: node.tag_name().name().to_string(),
        name: "backgroundcolor".to_string(),
        value: text.to_string(),
    };
    let hex = text.strip_prefix('#').ok_or_else(invalid)?;
    // optionally #AARRGGBB; the alpha byte is dropped
    let rgb = match hex.len() {
        6 => hex,
        8 => &hex[2..],
        _ => return Err(invalid()),
    };
    let parse = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    Ok([parse(&rgb[0..2])?, parse(&rgb[2..4])?, parse(&rgb[4..6])?])
}

fn attribute<T>(node: &Node, name: &str) -> Result<T, MapError>
where
    T: FromStr,
{
    let text = node.attribute(name).ok_or_else(|| MapError::MissingAttribute {
        tag: node.tag_name().name().to_string(),
        name: name.to_string(),
    })?;
    parse_attr(node, name, text)
}

fn attribute_or<T>(node: &Node, name: &str, default: T) -> Result<T, MapError>
where
    T: FromStr,
{
    match node.attribute(name) {
        None => Ok(default),
        Some(text) => parse_attr(node, name, text),
    }
}

fn parse_attr<T: FromStr>(node: &Node, name: &str, text: &str) -> Result<T, MapError> {
    text.parse().map_err(|_| MapError::InvalidAttribute {
        tag: node.tag_name().name().to_string(),
        name: name.to_string(),
        value: text.to_string(),
    })
}

/// TMX booleans appear as 0/1 as well as true/false.
fn parse_bool(node: &Node, text: &str) -> Result<bool, MapError> {
    match text.trim() {
        "1" | "true" | "t" | "yes" => Ok(true),
        "0" | "false" | "f" | "no" | "" => Ok(false),
        other => Err(MapError::InvalidAttribute {
            tag: node.tag_name().name().to_string(),
            name: "value".to_string(),
            value: other.to_string(),
        }),
    }
}

fn bool_attribute_or(node: &Node, name: &str, default: bool) -> Result<bool, MapError> {
    match node.attribute(name) {
        None => Ok(default),
        Some(text) => parse_bool(node, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_node_fixture(xml: &str) -> Vec<u32> {
        let doc = Document::parse(xml).unwrap();
        decode_layer_data(&doc.root_element()).unwrap()
    }

    #[test]
    fn csv_decoding() {
        let data = data_node_fixture(
            "<data encoding=\"csv\">1,2,3,\n4,0,6</data>",
        );
        assert_eq!(data, vec![1, 2, 3, 4, 0, 6]);
    }

    #[test]
    fn base64_decoding_uncompressed() {
        // 1, 2, 3 as little-endian u32s
        let payload = BASE64.encode([1u8, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
        let xml = format!("<data encoding=\"base64\">{payload}</data>");
        assert_eq!(data_node_fixture(&xml), vec![1, 2, 3]);
    }

    #[test]
    fn base64_decoding_zlib() {
        use std::io::Write;
        let mut encoder = libflate::zlib::Encoder::new(Vec::new()).unwrap();
        encoder
            .write_all(&[7u8, 0, 0, 0, 0, 0, 0, 0])
            .unwrap();
        let compressed = encoder.finish().into_result().unwrap();
        let xml = format!(
            "<data encoding=\"base64\" compression=\"zlib\">{}</data>",
            BASE64.encode(compressed)
        );
        assert_eq!(data_node_fixture(&xml), vec![7, 0]);
    }

    #[test]
    fn base64_decoding_gzip() {
        use std::io::Write;
        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&[9u8, 0, 0, 0]).unwrap();
        let compressed = encoder.finish().into_result().unwrap();
        let xml = format!(
            "<data encoding=\"base64\" compression=\"gzip\">{}</data>",
            BASE64.encode(compressed)
        );
        assert_eq!(data_node_fixture(&xml), vec![9]);
    }

    #[test]
    fn unknown_encoding_is_fatal() {
        let doc = Document::parse("<data encoding=\"hex\">00</data>").unwrap();
        let err = decode_layer_data(&doc.root_element()).unwrap_err();
        assert!(matches!(err, MapError::UnsupportedEncoding(e) if e == "hex"));
    }

    #[test]
    fn unknown_compression_is_fatal() {
        let doc =
            Document::parse("<data encoding=\"base64\" compression=\"lzma\">AA==</data>").unwrap();
        let err = decode_layer_data(&doc.root_element()).unwrap_err();
        assert!(matches!(err, MapError::UnsupportedCompression(c) if c == "lzma"));
    }

    #[test]
    fn truncated_payload_is_fatal() {
        let payload = BASE64.encode([1u8, 0, 0]);
        let xml = format!("<data encoding=\"base64\">{payload}</data>");
        let doc = Document::parse(&xml).unwrap();
        assert!(matches!(
            decode_layer_data(&doc.root_element()),
            Err(MapError::CorruptTileData(_))
        ));
    }

    #[test]
    fn property_parsing_types() {
        let xml = r#"<object>
            <properties>
                <property name="solid" type="bool" value="true"/>
                <property name="hp" type="int" value="12"/>
                <property name="speed" type="float" value="1.5"/>
                <property name="door" type="object" value="4"/>
                <property name="label" value="plain"/>
                <property name="script">line one
line two</property>
            </properties>
        </object>"#;
        let doc = Document::parse(xml).unwrap();
        let props = parse_properties(&doc.root_element()).unwrap();
        assert_eq!(props.get_bool("solid"), Some(true));
        assert_eq!(props.get_i32("hp"), Some(12));
        assert_eq!(props.get_f32("speed"), Some(1.5));
        assert_eq!(props.get_i64("door"), Some(4));
        assert_eq!(props.get_string("label"), Some("plain"));
        assert_eq!(props.get_string("script"), Some("line one\nline two"));
    }

    #[test]
    fn color_parsing() {
        let doc = Document::parse("<map/>").unwrap();
        let node = doc.root_element();
        assert_eq!(parse_color(&node, "#ff8000").unwrap(), [255, 128, 0]);
        assert_eq!(parse_color(&node, "#80ff8000").unwrap(), [255, 128, 0]);
        assert!(parse_color(&node, "ff8000").is_err());
        assert!(parse_color(&node, "#ff80").is_err());
    }
}
