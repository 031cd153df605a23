//! # Document format
//!
//! A single TOML manifest describing the whole [`ImageStack`]. Rasters (image layers and the selection mask)
//! are embedded as base64 PNG strings, so a document is one self-contained text file.
//!
//! Saving is atomic: the manifest is written to a temporary sibling of the destination which is then
//! renamed over it, so a crash mid-save never leaves a truncated document behind.

use crate::id::{LayerID, LayerIDServer};
use crate::state::graph::{Detached, LayerGraph, LayerKind, LayerNode, Location, TargetError, TextData};
use crate::state::stack::{GenerationAreaConstraints, ImageStack, StackParts};
use crate::state::transform::Matrix;
use crate::state::EditError;
use crate::util::{Rect, Size};
use base64::Engine;
use image::{GrayImage, RgbaImage};
use std::path::Path;

/// Bumped on incompatible manifest changes.
pub const FORMAT_VERSION: u32 = 1;
/// Conventional extension for documents.
pub const EXTENSION: &str = "intrapaint";

#[derive(thiserror::Error, Debug)]
pub enum DocumentIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write manifest: {0}")]
    Write(#[from] toml::ser::Error),
    #[error("unsupported format version {0}, expected {FORMAT_VERSION}")]
    Version(u32),
    #[error("bad raster encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bad raster data: {0}")]
    Image(#[from] image::ImageError),
    #[error("{name} raster is {found:?}, expected {expected:?}")]
    RasterSize {
        name: String,
        expected: Size,
        found: Size,
    },
    #[error("layer {layer}: {source}")]
    Tree {
        layer: LayerID,
        #[source]
        source: TargetError,
    },
    #[error("inconsistent document: {0}")]
    Invalid(#[from] EditError),
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Manifest {
    version: u32,
    uuid: uuid::Uuid,
    active: Option<LayerID>,
    size: Size,
    generation_area: Rect,
    ids: LayerIDServer,
    selection: String,
    /// Root's children, top first.
    #[serde(default)]
    layers: Vec<StoredLayer>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredLayer {
    id: LayerID,
    name: String,
    visible: bool,
    locked: bool,
    opacity: f32,
    transform: Matrix,
    content: StoredContent,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum StoredContent {
    Image { png: String },
    Text(TextData),
    Group { children: Vec<StoredLayer> },
}

fn encode_png<P>(image: &image::ImageBuffer<P, Vec<u8>>) -> Result<String, DocumentIoError>
where
    P: image::PixelWithColorType<Subpixel = u8>,
    [P::Subpixel]: image::EncodableLayout,
{
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes.into_inner()))
}
fn decode_png(data: &str) -> Result<image::DynamicImage, DocumentIoError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    Ok(image::load_from_memory_with_format(
        &bytes,
        image::ImageFormat::Png,
    )?)
}

fn store_layer(graph: &LayerGraph, id: LayerID, node: &LayerNode) -> Result<StoredLayer, DocumentIoError> {
    let content = match node.kind() {
        LayerKind::Image(image) => StoredContent::Image {
            png: encode_png(image)?,
        },
        LayerKind::Text(text) => StoredContent::Text(text.clone()),
        LayerKind::Group(children) => StoredContent::Group {
            children: children
                .iter()
                .filter_map(|child| Some((*child, graph.get(*child)?)))
                .map(|(child, node)| store_layer(graph, child, node))
                .collect::<Result<_, _>>()?,
        },
    };
    Ok(StoredLayer {
        id,
        name: node.name.clone(),
        visible: node.visible,
        locked: node.locked,
        opacity: node.opacity(),
        transform: node.transform,
        content,
    })
}

/// Attach `layers` into `parent`, top first, recursing into groups.
fn restore_layers(
    graph: &mut LayerGraph,
    parent: LayerID,
    layers: Vec<StoredLayer>,
) -> Result<(), DocumentIoError> {
    for (idx, stored) in layers.into_iter().enumerate() {
        let StoredLayer {
            id,
            name,
            visible,
            locked,
            opacity,
            transform,
            content,
        } = stored;
        if id == LayerID::ROOT || id == LayerID::SELECTION {
            return Err(DocumentIoError::Tree {
                layer: id,
                source: TargetError::Root,
            });
        }
        let (mut node, children) = match content {
            StoredContent::Image { png } => {
                let image: RgbaImage = decode_png(&png)?.into_rgba8();
                (LayerNode::new_image(name, image), None)
            }
            StoredContent::Text(text) => (LayerNode::new_text(name, text), None),
            StoredContent::Group { children } => (LayerNode::new_group(name), Some(children)),
        };
        node.visible = visible;
        node.locked = locked;
        node.set_opacity(opacity);
        node.transform = transform;
        graph
            .attach(
                Detached::single(id, node),
                Location::new(parent, idx),
            )
            .map_err(|source| DocumentIoError::Tree { layer: id, source })?;
        if let Some(children) = children {
            restore_layers(graph, id, children)?;
        }
    }
    Ok(())
}

/// Render a stack as a manifest string.
pub fn to_string(stack: &ImageStack) -> Result<String, DocumentIoError> {
    let graph = stack.graph();
    let layers = graph
        .children(LayerID::ROOT)
        .unwrap_or_default()
        .iter()
        .filter_map(|id| Some((*id, graph.get(*id)?)))
        .map(|(id, node)| store_layer(graph, id, node))
        .collect::<Result<_, _>>()?;
    let manifest = Manifest {
        version: FORMAT_VERSION,
        uuid: stack.uuid(),
        active: stack.active_layer(),
        size: stack.size(),
        generation_area: stack.generation_area(),
        ids: stack.id_server().clone(),
        selection: encode_png(stack.selection().mask())?,
        layers,
    };
    Ok(toml::to_string(&manifest)?)
}

/// Rebuild a stack from a manifest string.
pub fn from_str(
    manifest: &str,
    constraints: GenerationAreaConstraints,
) -> Result<ImageStack, DocumentIoError> {
    let Manifest {
        version,
        uuid,
        active,
        size,
        generation_area,
        ids,
        selection,
        layers,
    } = toml::from_str(manifest)?;
    if version != FORMAT_VERSION {
        return Err(DocumentIoError::Version(version));
    }
    let selection: GrayImage = decode_png(&selection)?.into_luma8();
    let found = crate::raster::size_of(&selection);
    if found != size {
        return Err(DocumentIoError::RasterSize {
            name: "selection".to_owned(),
            expected: size,
            found,
        });
    }
    let mut graph = LayerGraph::default();
    restore_layers(&mut graph, LayerID::ROOT, layers)?;
    let stack = ImageStack::from_parts(
        StackParts {
            uuid,
            graph,
            selection,
            active,
            generation_area,
            size,
            ids,
        },
        constraints,
    )?;
    Ok(stack)
}

/// Atomically write the document to `path`.
pub fn save(path: impl AsRef<Path>, stack: &ImageStack) -> Result<(), DocumentIoError> {
    use std::io::Write;
    let path = path.as_ref();
    let manifest = to_string(stack)?;
    // Temp file must be on the same filesystem for the rename to be atomic.
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(manifest.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    log::info!(
        "Saved {} ({} layers) to {path:?}",
        stack.uuid(),
        stack.graph().len()
    );
    Ok(())
}

/// Read a document from `path`.
pub fn load(
    path: impl AsRef<Path>,
    constraints: GenerationAreaConstraints,
) -> Result<ImageStack, DocumentIoError> {
    let path = path.as_ref();
    let manifest = std::fs::read_to_string(path)?;
    let stack = from_str(&manifest, constraints)?;
    log::info!(
        "Loaded {} ({} layers) from {path:?}",
        stack.uuid(),
        stack.graph().len()
    );
    Ok(stack)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raster;
    use crate::state::selection::{SelectionMode, Shape};
    use crate::state::Document;
    use crate::undo::UndoSettings;
    use crate::util::Point;
    use image::Rgba;

    fn sample() -> Document {
        let mut doc = Document::new(
            Size::new(24, 16),
            GenerationAreaConstraints::default(),
            UndoSettings::default(),
        )
        .unwrap();
        let mut image = raster::transparent(Size::new(24, 16));
        raster::paint_dab(&mut image, (6.0, 6.0), 4.0, Rgba([200, 10, 30, 255]), None);
        doc.create_layer(Some("paint"), Some(image), None).unwrap();
        let group = doc.create_layer_group(Some("group"), None).unwrap();
        doc.create_text_layer(Some("caption"), TextData::default(), Point::new(3, 4), None)
            .unwrap();
        doc.create_layer(Some("nested"), Some(raster::filled(Size::new(4, 4), Rgba([0, 0, 255, 128]))), None)
            .unwrap();
        doc.set_layer_opacity(Some(group), 0.25).unwrap();
        doc.set_layer_visible(Some(group), false).unwrap();
        doc.set_layer_locked(Some(group), true).unwrap();
        doc.select_shape(Shape::Ellipse(Rect::new(2, 2, 10, 8)), SelectionMode::Replace)
            .unwrap();
        doc.set_generation_area(Rect::new(4, 2, 12, 12)).unwrap();
        doc
    }

    fn assert_same(a: &ImageStack, b: &ImageStack) {
        assert_eq!(a.uuid(), b.uuid());
        assert_eq!(a.size(), b.size());
        assert_eq!(a.active_layer(), b.active_layer());
        assert_eq!(a.generation_area(), b.generation_area());
        assert_eq!(a.selection().mask(), b.selection().mask());
        let tree = |stack: &ImageStack| {
            stack
                .graph()
                .iter_top_down()
                .map(|(id, node)| (id, node.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(tree(a), tree(b));
    }

    #[test]
    fn save_load_round_trip() {
        let doc = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("sample.{EXTENSION}"));
        save(&path, doc.stack()).unwrap();
        let loaded = load(&path, GenerationAreaConstraints::default()).unwrap();
        assert_same(doc.stack(), &loaded);
        assert_eq!(loaded.next_layer_id(), doc.stack().next_layer_id());

        // Overwrites in place, leaving no temporaries behind.
        save(&path, &loaded).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
    #[test]
    fn ids_survive_undone_creation() {
        let mut doc = sample();
        doc.set_active_layer(None).unwrap();
        let removed = doc.create_layer(None, None, Some(0)).unwrap();
        doc.undo().unwrap();
        let loaded = from_str(
            &to_string(doc.stack()).unwrap(),
            GenerationAreaConstraints::default(),
        )
        .unwrap();
        // The undone layer's id is never handed out again.
        assert!(loaded.next_layer_id() > removed.get());
    }
    #[test]
    fn rejects_bad_documents() {
        let doc = sample();
        let text = to_string(doc.stack()).unwrap();
        let constraints = GenerationAreaConstraints::default();

        let newer = text.replace(&format!("version = {FORMAT_VERSION}"), "version = 99");
        assert!(matches!(
            from_str(&newer, constraints),
            Err(DocumentIoError::Version(99))
        ));
        assert!(matches!(
            from_str("version = ", constraints),
            Err(DocumentIoError::Parse(_))
        ));
        let missing = load(
            tempfile::tempdir().unwrap().path().join("missing"),
            constraints,
        );
        assert!(matches!(missing, Err(DocumentIoError::Io(_))));
    }
}
