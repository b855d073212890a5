use std::fmt;
use std::io;
use std::path::PathBuf;

/// Error type for map/tileset loading and editor operations.
#[derive(Debug)]
pub enum MapError {
    /// File I/O error, with the path that failed
    Io { path: PathBuf, source: io::Error },
    /// XML parse error, with the path of the offending document
    Xml {
        path: PathBuf,
        source: roxmltree::Error,
    },
    /// Atlas image decode error
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// A required attribute is missing from an element
    MissingAttribute { tag: String, name: String },
    /// An attribute value could not be parsed
    InvalidAttribute {
        tag: String,
        name: String,
        value: String,
    },
    /// A layer's decoded data length does not match width * height
    InvalidLayerSize {
        layer: String,
        expected: usize,
        actual: usize,
    },
    /// Tile data uses an encoding this loader does not understand
    UnsupportedEncoding(String),
    /// Tile data uses a compression this loader does not understand
    UnsupportedCompression(String),
    /// Tile data payload could not be decoded (bad base64 / inflate failure)
    CorruptTileData(String),
    /// The document's element structure is not what the format promises
    Structure { tag: String, msg: String },
    /// A gid lookup fell outside the registered image table
    InvalidGid { gid: u32, maxgid: u32 },
    /// A layer cell referenced a tile outside every tileset's range
    TileOutOfRange {
        layer: String,
        x: u32,
        y: u32,
        gid: u32,
    },
    /// Two layers were added with the same id
    DuplicateLayerId(u32),
    /// The level's object layer has no object named "player"
    MissingPlayer,
    /// A level partition has no object layer at all
    MissingObjectLayer,
    /// A script hook raised; carries the offending script text
    Script { script: String, message: String },
    /// An editor attribute update named an unknown or read-only field
    UnknownAttribute { target: String, name: String },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            MapError::Xml { path, source } => {
                write!(f, "XML parse error in {}: {}", path.display(), source)
            }
            MapError::Image { path, source } => {
                write!(f, "cannot decode image {}: {}", path.display(), source)
            }
            MapError::MissingAttribute { tag, name } => {
                write!(f, "<{tag}>: required attribute '{name}' missing")
            }
            MapError::InvalidAttribute { tag, name, value } => {
                write!(f, "<{tag}>: cannot parse attribute {name}=\"{value}\"")
            }
            MapError::InvalidLayerSize {
                layer,
                expected,
                actual,
            } => write!(
                f,
                "layer '{layer}': data has {actual} entries, expected {expected}"
            ),
            MapError::UnsupportedEncoding(enc) => write!(f, "unsupported data encoding '{enc}'"),
            MapError::UnsupportedCompression(c) => {
                write!(f, "unsupported data compression '{c}'")
            }
            MapError::CorruptTileData(msg) => write!(f, "corrupt tile data: {msg}"),
            MapError::Structure { tag, msg } => write!(f, "<{tag}>: {msg}"),
            MapError::InvalidGid { gid, maxgid } => {
                write!(f, "gid {gid} out of range (maxgid {maxgid})")
            }
            MapError::TileOutOfRange { layer, x, y, gid } => {
                write!(
                    f,
                    "layer '{layer}' cell ({x}, {y}): gid {gid} outside every tileset range"
                )
            }
            MapError::DuplicateLayerId(id) => write!(f, "layer id {id} already present in map"),
            MapError::MissingPlayer => write!(f, "no object named \"player\" in object layer"),
            MapError::MissingObjectLayer => write!(f, "level has no object layer"),
            MapError::Script { script, message } => {
                write!(f, "script hook failed: {message} (script: {script:?})")
            }
            MapError::UnknownAttribute { target, name } => {
                write!(f, "{target} has no editable attribute '{name}'")
            }
        }
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Io { source, .. } => Some(source),
            MapError::Xml { source, .. } => Some(source),
            MapError::Image { source, .. } => Some(source),
            _ => None,
        }
    }
}
