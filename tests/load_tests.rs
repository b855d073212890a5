// Loading TMX documents end to end: external tilesets, encoded layer
// data, gid transform flags, objects and nested groups.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use tiled_engine::{load_map, MapError, FLIP_H};

fn write_atlas(dir: &Path) {
    // two 8x8 tiles side by side, distinguishable by their red channel
    let mut img = image::RgbaImage::new(16, 8);
    for (x, _, px) in img.enumerate_pixels_mut() {
        let local = x / 8;
        *px = image::Rgba([local as u8 + 1, 0, 0, 255]);
    }
    img.save(dir.join("tiles.png")).expect("writing atlas");
}

const TILESET_TSX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tileset name="terrain" tilewidth="8" tileheight="8" tilecount="2" columns="2">
  <image source="tiles.png" width="16" height="8"/>
  <tile id="0">
    <properties>
      <property name="on_collision" value="say('ouch')"/>
    </properties>
    <objectgroup draworder="index">
      <object id="1" x="0" y="0" width="4" height="8"/>
    </objectgroup>
  </tile>
  <tile id="1">
    <animation>
      <frame tileid="0" duration="100"/>
      <frame tileid="1" duration="150"/>
    </animation>
  </tile>
</tileset>
"#;

const MAP_TMX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.10" orientation="orthogonal" renderorder="right-down" width="4" height="4" tilewidth="8" tileheight="8" nextlayerid="13" nextobjectid="3">
 <tileset firstgid="1" source="terrain.tsx"/>
 <group id="10" name="group_1">
  <properties>
   <property name="viewport" value="0,0,32,32"/>
  </properties>
  <layer id="11" name="main_1" width="4" height="4">
   <data encoding="csv">
1,0,0,0,
0,0,0,0,
0,0,0,0,
0,0,0,2147483649
   </data>
  </layer>
  <objectgroup id="12" name="objects_1">
   <object id="1" name="player" gid="1" x="8" y="16" width="8" height="8"/>
   <object id="2" name="chest" x="16" y="16" width="8" height="8">
    <properties>
     <property name="solid" type="bool" value="true"/>
    </properties>
   </object>
  </objectgroup>
 </group>
</map>
"#;

fn write_fixture(dir: &Path) {
    write_atlas(dir);
    fs::write(dir.join("terrain.tsx"), TILESET_TSX).unwrap();
    fs::write(dir.join("level1.tmx"), MAP_TMX).unwrap();
}

#[test]
fn loads_map_with_external_tileset() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let map = load_map(dir.path().join("level1.tmx")).expect("map should load");
    assert_eq!((map.width, map.height), (4, 4));
    assert_eq!((map.tilewidth, map.tileheight), (8, 8));
    assert_eq!(map.tilesets().len(), 1);
    assert_eq!(map.tilesets()[0].firstgid, 1);
    assert_eq!(map.tilesets()[0].tilecount, 2);
    // plain range is gids 1..3; the flipped reference minted one synthetic
    assert_eq!(map.maxgid, 4);
}

#[test]
fn layer_stream_normalizes_every_entry() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let map = load_map(dir.path().join("level1.tmx")).unwrap();
    let group = map.layers()[0].as_group().expect("top layer is the group");
    let main = group.layers[0].as_tile().expect("first nested is tiles");

    // entry 0 passes through registration like every other entry
    assert_eq!(main.gid_at(0, 0), 1);
    // the flag-bearing raw reference became a plain synthetic gid
    let synthetic = main.gid_at(3, 3);
    assert_eq!(synthetic, 3);
    let (base, flags) = map.synthetic_origin(synthetic).unwrap();
    assert_eq!(base, 1);
    assert!(flags.flipped_horizontally);
    assert_eq!(map.gid_to_raw(synthetic), FLIP_H | 1);
    // the synthetic image is the base tile mirrored
    assert!(map.image(synthetic).is_some());
}

#[test]
fn tile_metadata_round_trips() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let map = load_map(dir.path().join("level1.tmx")).unwrap();
    let meta = map.tile_meta(1).expect("tile 0 has metadata");
    assert_eq!(
        meta.properties.get_string("on_collision"),
        Some("say('ouch')")
    );
    assert_eq!(meta.colliders, vec![tiled_engine::Rect::new(0, 0, 4, 8)]);

    let anim = map.tile_animation(2).expect("tile 1 is animated");
    assert_eq!(anim.gid_at(0), 1);
    assert_eq!(anim.gid_at(120), 2);
    assert_eq!(anim.gid_at(260), 1);
}

#[test]
fn tile_backed_object_inherits_tile_properties_and_inverts_y() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let map = load_map(dir.path().join("level1.tmx")).unwrap();
    let group = map.layers()[0].as_group().unwrap();
    let objects = group.layers[1].as_object().unwrap();

    let player = objects.object_by_name("player").unwrap();
    assert_eq!(player.gid, 1);
    // invert_y: stored y shifted up by the object height
    assert_eq!(player.rect, tiled_engine::Rect::new(8, 8, 8, 8));
    // tile-level property readable through the object's layered view
    assert_eq!(
        player.properties.get_string("on_collision"),
        Some("say('ouch')")
    );

    let chest = objects.object_by_name("chest").unwrap();
    assert!(chest.solid, "solid property switches the behaviour flag");
    // area object: no gid, no y shift
    assert_eq!(chest.rect, tiled_engine::Rect::new(16, 16, 8, 8));
}

#[test]
fn missing_map_file_is_an_io_error() {
    let err = load_map("no_such_map.tmx").unwrap_err();
    assert!(matches!(err, MapError::Io { .. }));
}

#[test]
fn malformed_xml_is_fatal() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.tmx"), "<map width=\"1\"").unwrap();
    let err = load_map(dir.path().join("bad.tmx")).unwrap_err();
    assert!(matches!(err, MapError::Xml { .. }));
}

#[test]
fn missing_external_tileset_aborts_load() {
    let dir = TempDir::new().unwrap();
    write_atlas(dir.path());
    let tmx = r#"<map width="1" height="1" tilewidth="8" tileheight="8">
      <tileset firstgid="1" source="missing.tsx"/>
    </map>"#;
    fs::write(dir.path().join("m.tmx"), tmx).unwrap();
    let err = load_map(dir.path().join("m.tmx")).unwrap_err();
    assert!(matches!(err, MapError::Io { .. }));
}

#[test]
fn layer_size_mismatch_is_a_checked_error() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let tmx = r#"<map width="2" height="2" tilewidth="8" tileheight="8">
      <tileset firstgid="1" source="terrain.tsx"/>
      <layer id="1" name="oops" width="2" height="2">
        <data encoding="csv">1,0,1</data>
      </layer>
    </map>"#;
    fs::write(dir.path().join("m.tmx"), tmx).unwrap();
    let err = load_map(dir.path().join("m.tmx")).unwrap_err();
    assert!(matches!(
        err,
        MapError::InvalidLayerSize {
            expected: 4,
            actual: 3,
            ..
        }
    ));
}

#[test]
fn unsupported_encoding_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let tmx = r#"<map width="1" height="1" tilewidth="8" tileheight="8">
      <tileset firstgid="1" source="terrain.tsx"/>
      <layer id="1" name="l" width="1" height="1">
        <data encoding="hex">01</data>
      </layer>
    </map>"#;
    fs::write(dir.path().join("m.tmx"), tmx).unwrap();
    let err = load_map(dir.path().join("m.tmx")).unwrap_err();
    assert!(matches!(err, MapError::UnsupportedEncoding(e) if e == "hex"));
}

#[test]
fn out_of_range_gid_reports_the_cell() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    let tmx = r#"<map width="2" height="2" tilewidth="8" tileheight="8">
      <tileset firstgid="1" source="terrain.tsx"/>
      <layer id="1" name="l" width="2" height="2">
        <data encoding="csv">0,0,0,99</data>
      </layer>
    </map>"#;
    fs::write(dir.path().join("m.tmx"), tmx).unwrap();
    let err = load_map(dir.path().join("m.tmx")).unwrap_err();
    match err {
        MapError::TileOutOfRange { x, y, gid, .. } => {
            assert_eq!((x, y, gid), (1, 1, 99));
        }
        other => panic!("expected TileOutOfRange, got {other:?}"),
    }
}
