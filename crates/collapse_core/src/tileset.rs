//! Tileset loading from XML or JSON files.
//!
//! The XML form mirrors the classic tileset layout:
//!
//! ```xml
//! <tileset>
//!   <tiles>
//!     <tile name="grass" weight="2.0">
//!       <connector face="up" group="flat" rotation="invariant"/>
//!       <connector face="north" group="meadow" symmetry="symmetric"/>
//!       <exclude tile="water" face="north"/>
//!     </tile>
//!   </tiles>
//! </tileset>
//! ```
//!
//! The JSON form is the serde shape of `TileConfig` (an array of tiles).
//! Loading only parses; all semantic validation happens in
//! `TileSet::from_configs`.

use crate::direction::Direction;
use crate::tile::{ConnectorConfig, ExclusionConfig, Rotation, Symmetry, TileConfig};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt;
use std::path::Path;

/// Errors raised while reading tileset files.
#[derive(Debug)]
pub enum TilesetError {
    Io(std::io::Error),
    Xml(quick_xml::Error),
    Json(serde_json::Error),
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    UnknownValue {
        attribute: &'static str,
        value: String,
    },
    /// File extension is neither `.xml` nor `.json`.
    UnsupportedExtension(String),
}

impl fmt::Display for TilesetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TilesetError::Io(e) => write!(f, "IO error: {}", e),
            TilesetError::Xml(e) => write!(f, "XML parse error: {}", e),
            TilesetError::Json(e) => write!(f, "JSON parse error: {}", e),
            TilesetError::MissingAttribute { element, attribute } => {
                write!(f, "<{}> is missing the '{}' attribute", element, attribute)
            }
            TilesetError::UnknownValue { attribute, value } => {
                write!(f, "unknown {} value '{}'", attribute, value)
            }
            TilesetError::UnsupportedExtension(path) => {
                write!(f, "unsupported tileset extension: {}", path)
            }
        }
    }
}

impl std::error::Error for TilesetError {}

impl From<std::io::Error> for TilesetError {
    fn from(e: std::io::Error) -> Self {
        TilesetError::Io(e)
    }
}

impl From<quick_xml::Error> for TilesetError {
    fn from(e: quick_xml::Error) -> Self {
        TilesetError::Xml(e)
    }
}

impl From<serde_json::Error> for TilesetError {
    fn from(e: serde_json::Error) -> Self {
        TilesetError::Json(e)
    }
}

/// Load tile configurations from a file, picking the parser by extension.
pub fn load_tileset<P: AsRef<Path>>(path: P) -> Result<Vec<TileConfig>, TilesetError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => parse_tileset_xml(&text),
        Some("json") => parse_tileset_json(&text),
        _ => Err(TilesetError::UnsupportedExtension(
            path.display().to_string(),
        )),
    }
}

/// Parse the JSON tileset form: an array of `TileConfig` values.
pub fn parse_tileset_json(json: &str) -> Result<Vec<TileConfig>, TilesetError> {
    Ok(serde_json::from_str(json)?)
}

/// Parse the XML tileset form.
pub fn parse_tileset_xml(xml: &str) -> Result<Vec<TileConfig>, TilesetError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut tiles = Vec::new();
    let mut current: Option<TileConfig> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let name_bytes = e.name();
                let name = std::str::from_utf8(name_bytes.as_ref()).unwrap_or("");
                if name == "tile" {
                    current = Some(parse_tile_element(e)?);
                }
            }
            Event::Empty(ref e) => {
                let name_bytes = e.name();
                let name = std::str::from_utf8(name_bytes.as_ref()).unwrap_or("");
                match name {
                    // Self-closing tile carries no connectors; validation
                    // rejects it later with a precise error.
                    "tile" => tiles.push(parse_tile_element(e)?),
                    "connector" => {
                        if let Some(tile) = current.as_mut() {
                            let (face, connector) = parse_connector_element(e)?;
                            tile.connectors.set(face, connector);
                        }
                    }
                    "exclude" => {
                        if let Some(tile) = current.as_mut() {
                            tile.exclusions.push(parse_exclude_element(e)?);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => {
                let name_bytes = e.name();
                let name = std::str::from_utf8(name_bytes.as_ref()).unwrap_or("");
                if name == "tile" {
                    if let Some(tile) = current.take() {
                        tiles.push(tile);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    log::debug!("parsed tileset: {} tiles", tiles.len());
    Ok(tiles)
}

fn attr_value(e: &BytesStart, key: &str) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key.as_bytes() {
            return std::str::from_utf8(&attr.value).ok().map(str::to_string);
        }
    }
    None
}

fn parse_tile_element(e: &BytesStart) -> Result<TileConfig, TilesetError> {
    let name = attr_value(e, "name").ok_or(TilesetError::MissingAttribute {
        element: "tile",
        attribute: "name",
    })?;
    let mut config = TileConfig::new(name);
    if let Some(weight) = attr_value(e, "weight") {
        config.weight = weight
            .parse()
            .map_err(|_| TilesetError::UnknownValue {
                attribute: "weight",
                value: weight.clone(),
            })?;
    }
    Ok(config)
}

fn parse_connector_element(e: &BytesStart) -> Result<(Direction, ConnectorConfig), TilesetError> {
    let face = attr_value(e, "face").ok_or(TilesetError::MissingAttribute {
        element: "connector",
        attribute: "face",
    })?;
    let face = Direction::from_name(&face).ok_or(TilesetError::UnknownValue {
        attribute: "face",
        value: face,
    })?;
    let group = attr_value(e, "group").ok_or(TilesetError::MissingAttribute {
        element: "connector",
        attribute: "group",
    })?;

    let rotation = attr_value(e, "rotation")
        .map(|value| parse_rotation(&value))
        .transpose()?;
    let symmetry = attr_value(e, "symmetry")
        .map(|value| parse_symmetry(&value))
        .transpose()?;

    Ok((
        face,
        ConnectorConfig {
            group,
            rotation,
            symmetry,
        },
    ))
}

fn parse_exclude_element(e: &BytesStart) -> Result<ExclusionConfig, TilesetError> {
    let tile = attr_value(e, "tile").ok_or(TilesetError::MissingAttribute {
        element: "exclude",
        attribute: "tile",
    })?;
    let face = attr_value(e, "face").ok_or(TilesetError::MissingAttribute {
        element: "exclude",
        attribute: "face",
    })?;
    let direction = Direction::from_name(&face).ok_or(TilesetError::UnknownValue {
        attribute: "face",
        value: face,
    })?;
    Ok(ExclusionConfig { tile, direction })
}

fn parse_rotation(value: &str) -> Result<Rotation, TilesetError> {
    match value {
        "invariant" => Ok(Rotation::Invariant),
        "rot0" => Ok(Rotation::Rot0),
        "rot90" => Ok(Rotation::Rot90),
        "rot180" => Ok(Rotation::Rot180),
        "rot270" => Ok(Rotation::Rot270),
        _ => Err(TilesetError::UnknownValue {
            attribute: "rotation",
            value: value.to_string(),
        }),
    }
}

fn parse_symmetry(value: &str) -> Result<Symmetry, TilesetError> {
    match value {
        "symmetric" => Ok(Symmetry::Symmetric),
        "flipped" => Ok(Symmetry::Flipped),
        "not_flipped" => Ok(Symmetry::NotFlipped),
        _ => Err(TilesetError::UnknownValue {
            attribute: "symmetry",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileSet;
    use std::io::Write;

    const SAMPLE_XML: &str = r#"
    <tileset>
        <tiles>
            <tile name="grass" weight="2.0">
                <connector face="up" group="flat" rotation="invariant"/>
                <connector face="down" group="flat" rotation="invariant"/>
                <connector face="north" group="meadow" symmetry="symmetric"/>
                <connector face="south" group="meadow" symmetry="symmetric"/>
                <connector face="east" group="meadow" symmetry="symmetric"/>
                <connector face="west" group="meadow" symmetry="symmetric"/>
            </tile>
            <tile name="water">
                <connector face="up" group="flat" rotation="invariant"/>
                <connector face="down" group="flat" rotation="invariant"/>
                <connector face="north" group="sea" symmetry="symmetric"/>
                <connector face="south" group="sea" symmetry="symmetric"/>
                <connector face="east" group="sea" symmetry="symmetric"/>
                <connector face="west" group="sea" symmetry="symmetric"/>
                <exclude tile="grass" face="up"/>
            </tile>
        </tiles>
    </tileset>
    "#;

    #[test]
    fn test_parse_tileset_xml() {
        let tiles = parse_tileset_xml(SAMPLE_XML).unwrap();
        assert_eq!(tiles.len(), 2);

        assert_eq!(tiles[0].id, "grass");
        assert_eq!(tiles[0].weight, 2.0);
        let north = tiles[0].connectors.north.as_ref().unwrap();
        assert_eq!(north.group, "meadow");
        assert_eq!(north.symmetry, Some(Symmetry::Symmetric));

        assert_eq!(tiles[1].id, "water");
        assert_eq!(tiles[1].weight, 1.0);
        assert_eq!(tiles[1].exclusions.len(), 1);
        assert_eq!(tiles[1].exclusions[0].tile, "grass");
        assert_eq!(tiles[1].exclusions[0].direction, Direction::Up);
    }

    #[test]
    fn test_parsed_tileset_validates() {
        let tiles = parse_tileset_xml(SAMPLE_XML).unwrap();
        let set = TileSet::from_configs(&tiles).unwrap();
        assert_eq!(set.len(), 2);
        // Disjoint horizontal groups plus the vertical exclusion.
        assert!(!set.compatible_indices(0, Direction::East, 1));
        assert!(!set.compatible_indices(1, Direction::Up, 0));
        assert!(set.compatible_indices(0, Direction::Up, 0));
    }

    #[test]
    fn test_missing_name_rejected() {
        let xml = r#"<tileset><tiles><tile weight="1.0"/></tiles></tileset>"#;
        assert!(matches!(
            parse_tileset_xml(xml),
            Err(TilesetError::MissingAttribute {
                element: "tile",
                attribute: "name",
            })
        ));
    }

    #[test]
    fn test_bad_face_rejected() {
        let xml = r#"
        <tileset><tiles>
            <tile name="t">
                <connector face="sideways" group="g" symmetry="symmetric"/>
            </tile>
        </tiles></tileset>"#;
        assert!(matches!(
            parse_tileset_xml(xml),
            Err(TilesetError::UnknownValue {
                attribute: "face",
                ..
            })
        ));
    }

    #[test]
    fn test_bad_rotation_rejected() {
        let xml = r#"
        <tileset><tiles>
            <tile name="t">
                <connector face="up" group="g" rotation="rot45"/>
            </tile>
        </tiles></tileset>"#;
        assert!(matches!(
            parse_tileset_xml(xml),
            Err(TilesetError::UnknownValue {
                attribute: "rotation",
                ..
            })
        ));
    }

    #[test]
    fn test_parse_tileset_json() {
        let json = r#"[{
            "id": "t",
            "connectors": {
                "up": {"group": "g", "rotation": "invariant"},
                "down": {"group": "g", "rotation": "invariant"},
                "north": {"group": "g", "symmetry": "symmetric"},
                "south": {"group": "g", "symmetry": "symmetric"},
                "east": {"group": "g", "symmetry": "symmetric"},
                "west": {"group": "g", "symmetry": "symmetric"}
            }
        }]"#;
        let tiles = parse_tileset_json(json).unwrap();
        assert_eq!(tiles.len(), 1);
        assert!(TileSet::from_configs(&tiles).is_ok());
    }

    #[test]
    fn test_load_tileset_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let xml_path = dir.path().join("set.xml");
        let mut file = std::fs::File::create(&xml_path).unwrap();
        file.write_all(SAMPLE_XML.as_bytes()).unwrap();
        let tiles = load_tileset(&xml_path).unwrap();
        assert_eq!(tiles.len(), 2);

        let bad_path = dir.path().join("set.toml");
        std::fs::File::create(&bad_path).unwrap();
        assert!(matches!(
            load_tileset(&bad_path),
            Err(TilesetError::UnsupportedExtension(_))
        ));

        assert!(matches!(
            load_tileset(dir.path().join("missing.xml")),
            Err(TilesetError::Io(_))
        ));
    }
}
