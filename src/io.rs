use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::canvas::{PixelRect, RasterBuffer};
use crate::components::layers::{Layer, LayerStack};
use crate::document::Document;
use crate::error::EditorError;

// ============================================================================
// PPX PROJECT FILE FORMAT
// ============================================================================

/// Magic header for the flat layered format.
const PPX_MAGIC: &str = "PPX1";

/// File extension for native projects.
pub const PROJECT_EXTENSION: &str = "ppx";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct ProjectFile {
    magic: String,
    id: Uuid,
    width: u32,
    height: u32,
    active_layer_index: usize,
    output_region: PixelRect,
    layers: Vec<LayerData>,
}

#[derive(Serialize, Deserialize)]
struct LayerData {
    id: Uuid,
    name: String,
    visible: bool,
    opacity: f32,
    pixels: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("unsupported project version '{0}'")]
    UnsupportedVersion(String),
    #[error(transparent)]
    Editor(#[from] EditorError),
}

/// Save the document as a `.ppx` project. Undo history is not persisted.
pub fn save_project(doc: &Document, path: &Path) -> Result<(), ProjectError> {
    let stack = doc.layers();
    let layers = stack
        .iter()
        .map(|layer| LayerData {
            id: layer.id,
            name: layer.name().to_string(),
            visible: layer.visible,
            opacity: layer.opacity(),
            pixels: layer.pixels.as_raw().to_vec(),
        })
        .collect();

    let project = ProjectFile {
        magic: PPX_MAGIC.to_string(),
        id: doc.id,
        width: stack.width(),
        height: stack.height(),
        active_layer_index: stack.active_index(),
        output_region: doc.output_region(),
        layers,
    };

    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &project)?;
    log::info!("Saved project {} ({} layers)", path.display(), stack.len());
    Ok(())
}

/// Load a `.ppx` project. The returned document has a fresh history and is
/// not dirty.
pub fn load_project(path: &Path) -> Result<Document, ProjectError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(ProjectError::InvalidFormat("File too small".into()));
    }

    // bincode encodes a String as an 8-byte length prefix + UTF-8 data;
    // the 4-char magic sits in bytes 8..12.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PPX_MAGIC {
        return Err(if magic.starts_with("PPX") {
            ProjectError::UnsupportedVersion(magic.to_string())
        } else {
            ProjectError::InvalidFormat(format!("Unknown magic '{}'", magic))
        });
    }

    let project: ProjectFile = bincode::deserialize(&raw)?;

    if project.width == 0 || project.height == 0 {
        return Err(ProjectError::InvalidFormat("Canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(ProjectError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if project.layers.len() > MAX_LAYERS {
        return Err(ProjectError::InvalidFormat(format!(
            "Project contains {} layers, which exceeds the maximum of {}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }
    if project.layers.is_empty() {
        return Err(ProjectError::InvalidFormat("Project contains no layers".into()));
    }

    let expected_bytes = project.width as usize * project.height as usize * 4;
    let mut layers = Vec::with_capacity(project.layers.len());
    for ld in project.layers {
        if ld.pixels.len() != expected_bytes {
            return Err(ProjectError::InvalidFormat(format!(
                "Layer '{}' has {} bytes, expected {}",
                ld.name,
                ld.pixels.len(),
                expected_bytes
            )));
        }
        let buffer = RasterBuffer::from_raw(project.width, project.height, ld.pixels)?;
        let mut layer = Layer::from_buffer(ld.name, buffer)?;
        layer.id = ld.id;
        layer.visible = ld.visible;
        layer.set_opacity(ld.opacity);
        layers.push(layer);
    }

    let active = project.active_layer_index.min(layers.len() - 1);
    let stack = LayerStack::from_layers(layers, active)?;

    let mut doc = Document::from_layers("Unknown", stack);
    doc.id = project.id;
    doc.set_output_region(project.output_region);
    doc.path = Some(path.to_path_buf());
    doc.update_name_from_path();
    log::info!("Loaded project {} ({}x{})", path.display(), doc.width(), doc.height());
    Ok(doc)
}

// ============================================================================
// RASTER IMPORT / EXPORT
// ============================================================================

/// Raster formats the exporter can write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Bmp,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Bmp => ImageFormat::Bmp,
        }
    }
}

/// Write the flattened composite as PNG.
pub fn export_png(doc: &Document, path: &Path) -> Result<(), ProjectError> {
    export_image(doc, path, ExportFormat::Png)
}

pub fn export_image(doc: &Document, path: &Path, format: ExportFormat) -> Result<(), ProjectError> {
    let composite = doc.composite()?;
    write_image(composite.as_rgba_image(), path, format)?;
    log::info!("Exported {} ({:?})", path.display(), format);
    Ok(())
}

/// Export only the output region of the composite.
pub fn export_output_region(doc: &Document, path: &Path, format: ExportFormat) -> Result<(), ProjectError> {
    let region = doc.composite()?.sub_region(doc.output_region())?;
    write_image(region.as_rgba_image(), path, format)
}

fn write_image(image: &RgbaImage, path: &Path, format: ExportFormat) -> Result<(), ProjectError> {
    let mut writer = BufWriter::new(File::create(path)?);
    image.write_to(&mut writer, format.image_format())?;
    Ok(())
}

/// Decode a raster image into a single-layer document named after the file.
pub fn import_image(path: &Path) -> Result<Document, ProjectError> {
    let reader = image::io::Reader::new(BufReader::new(File::open(path)?)).with_guessed_format()?;
    let img = reader.decode()?.to_rgba8();

    let layer_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Background")
        .to_string();
    let layer = Layer::from_buffer(layer_name, RasterBuffer::from_rgba_image(img)?)?;
    let stack = LayerStack::from_layers(vec![layer], 0)?;

    let mut doc = Document::from_layers("Unknown", stack);
    doc.path = Some(path.to_path_buf());
    doc.update_name_from_path();
    Ok(doc)
}

/// Open either a native project or a raster image, chosen by extension.
pub fn open_document(path: &Path) -> Result<Document, ProjectError> {
    let is_project = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(PROJECT_EXTENSION));
    if is_project { load_project(path) } else { import_image(path) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample_document() -> Document {
        let mut doc = Document::new("sample", 40, 36).unwrap();
        let idx = doc.add_layer("Ink").unwrap();
        doc.set_layer_opacity(idx, 0.5).unwrap();
        doc.set_layer_visible(0, false).unwrap();
        doc.set_output_region(PixelRect::new(4, 2, 33, 33));
        doc
    }

    #[test]
    fn test_project_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.ppx");
        let mut doc = sample_document();
        let ctx = crate::components::tools::DrawingContext::default().with_color(Rgba([9, 8, 7, 255]));
        doc.stroke(&ctx, &[(1, 1), (10, 1)]).unwrap();

        save_project(&doc, &path).unwrap();
        let loaded = load_project(&path).unwrap();

        assert_eq!(loaded.id, doc.id);
        assert_eq!(loaded.name, "art.ppx");
        assert!(!loaded.is_dirty());
        assert!(!loaded.history().can_undo());
        assert_eq!(loaded.output_region(), doc.output_region());
        assert_eq!(loaded.layers().len(), 2);
        assert_eq!(loaded.layers().active_index(), 1);
        let ink = loaded.layers().get(1).unwrap();
        assert_eq!(ink.name(), "Ink");
        assert_eq!(ink.opacity(), 0.5);
        assert_eq!(ink.id, doc.layers().get(1).unwrap().id);
        assert!(!loaded.layers().get(0).unwrap().visible);
        assert_eq!(ink.pixels, doc.layers().get(1).unwrap().pixels);
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.ppx");
        std::fs::write(&path, b"definitely not a project file").unwrap();
        assert!(matches!(load_project(&path), Err(ProjectError::InvalidFormat(_))));

        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(load_project(&path), Err(ProjectError::InvalidFormat(_))));
    }

    #[test]
    fn test_load_rejects_other_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.ppx");
        let mut raw = 4u64.to_le_bytes().to_vec();
        raw.extend_from_slice(b"PPX9");
        raw.extend_from_slice(&[0; 16]);
        std::fs::write(&path, raw).unwrap();
        assert!(matches!(load_project(&path), Err(ProjectError::UnsupportedVersion(v)) if v == "PPX9"));
    }

    #[test]
    fn test_export_and_import_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut doc = Document::new("x", 8, 6).unwrap();
        let ctx = crate::components::tools::DrawingContext::default().with_color(Rgba([255, 0, 0, 255]));
        doc.stroke(&ctx, &[(2, 3)]).unwrap();

        export_png(&doc, &path).unwrap();
        let imported = import_image(&path).unwrap();
        assert_eq!(imported.width(), 8);
        assert_eq!(imported.height(), 6);
        assert_eq!(imported.layers().len(), 1);
        assert_eq!(imported.layers().active().name(), "out");
        assert_eq!(imported.sample_color(2, 3).unwrap(), Rgba([255, 0, 0, 255]));
        assert_eq!(imported.composite().unwrap(), doc.composite().unwrap());
    }

    #[test]
    fn test_export_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("a.PNG")), Some(ExportFormat::Png));
        assert_eq!(ExportFormat::from_path(Path::new("a.bmp")), Some(ExportFormat::Bmp));
        assert_eq!(ExportFormat::from_path(Path::new("a.jpg")), None);
    }

    #[test]
    fn test_open_document_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("p.PPX");
        save_project(&sample_document(), &project).unwrap();
        assert_eq!(open_document(&project).unwrap().layers().len(), 2);
    }
}
