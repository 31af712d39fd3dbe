use std::path::{Path, PathBuf};

use crate::components::history::UndoEngine;
use crate::components::layers::LastLayerPolicy;
use crate::components::tools::{DrawingContext, MirrorConfig, MirrorMode};

/// Persistent editor preferences, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub max_undo_steps: usize,
    /// Memory cap for the undo history; 0 disables the cap.
    pub max_undo_memory_mb: usize,
    pub last_layer_policy: LastLayerPolicy,
    pub default_width: u32,
    pub default_height: u32,
    pub default_brush_width: u32,
    pub default_mirror: MirrorMode,
    pub default_wrap: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            max_undo_memory_mb: 100,
            last_layer_policy: LastLayerPolicy::Reject,
            default_width: 64,
            default_height: 64,
            default_brush_width: 1,
            default_mirror: MirrorMode::None,
            default_wrap: false,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/pixelportal/pixelportal_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PixelPortal\pixelportal_settings.cfg
    /// On macOS:   ~/Library/Application Support/PixelPortal/pixelportal_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            PathBuf::from(std::env::var("APPDATA").ok()?).join("PixelPortal")
        } else if cfg!(target_os = "macos") {
            PathBuf::from(std::env::var("HOME").ok()?)
                .join("Library")
                .join("Application Support")
                .join("PixelPortal")
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
                .ok()?
                .join("pixelportal")
        };
        Some(config_dir.join("pixelportal_settings.cfg"))
    }

    /// Load from the default location, falling back to defaults if the file
    /// is missing or unreadable.
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                log::debug!("settings: using defaults ({}: {e})", path.display());
                Self::default()
            }
        }
    }

    /// Parse `key=value` lines. Unknown keys are ignored and malformed values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    s.max_undo_steps = val.parse::<usize>().unwrap_or(s.max_undo_steps).max(1);
                }
                "max_undo_memory_mb" => {
                    s.max_undo_memory_mb = val.parse::<usize>().unwrap_or(s.max_undo_memory_mb);
                }
                "last_layer_policy" => {
                    s.last_layer_policy = match val {
                        "blank" => LastLayerPolicy::ReplaceWithBlank,
                        _ => LastLayerPolicy::Reject,
                    };
                }
                "default_width" => {
                    s.default_width = val.parse::<u32>().ok().filter(|&w| w > 0).unwrap_or(s.default_width);
                }
                "default_height" => {
                    s.default_height = val.parse::<u32>().ok().filter(|&h| h > 0).unwrap_or(s.default_height);
                }
                "default_brush_width" => {
                    s.default_brush_width = val.parse::<u32>().ok().filter(|&w| w > 0).unwrap_or(s.default_brush_width);
                }
                "default_mirror" => {
                    s.default_mirror = match val {
                        "x" => MirrorMode::X,
                        "y" => MirrorMode::Y,
                        "both" => MirrorMode::Both,
                        _ => MirrorMode::None,
                    };
                }
                "default_wrap" => {
                    s.default_wrap = val == "true";
                }
                other => log::debug!("settings: ignoring unknown key '{other}'"),
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let policy = match self.last_layer_policy {
            LastLayerPolicy::Reject => "reject",
            LastLayerPolicy::ReplaceWithBlank => "blank",
        };
        let mirror = match self.default_mirror {
            MirrorMode::None => "none",
            MirrorMode::X => "x",
            MirrorMode::Y => "y",
            MirrorMode::Both => "both",
        };
        format!(
            "max_undo_steps={}\n\
             max_undo_memory_mb={}\n\
             last_layer_policy={policy}\n\
             default_width={}\n\
             default_height={}\n\
             default_brush_width={}\n\
             default_mirror={mirror}\n\
             default_wrap={}\n",
            self.max_undo_steps,
            self.max_undo_memory_mb,
            self.default_width,
            self.default_height,
            self.default_brush_width,
            self.default_wrap,
        )
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Save to the default location.
    pub fn save(&self) -> std::io::Result<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    /// History configured with these limits.
    pub fn undo_engine(&self) -> UndoEngine {
        let memory = (self.max_undo_memory_mb > 0).then(|| self.max_undo_memory_mb * 1024 * 1024);
        UndoEngine::new(self.max_undo_steps).with_memory_limit(memory)
    }

    /// Starting brush for new sessions.
    pub fn drawing_context(&self) -> DrawingContext {
        DrawingContext::default()
            .with_width(self.default_brush_width)
            .with_mirror(MirrorConfig::new(self.default_mirror))
            .with_wrap(self.default_wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_unknown_and_bad_values() {
        let s = EditorSettings::parse(
            "# comment\nmax_undo_steps=abc\nlast_layer_policy=blank\ntheme=dark\ndefault_width=0\ndefault_mirror=both\n",
        );
        assert_eq!(s.max_undo_steps, 50);
        assert_eq!(s.last_layer_policy, LastLayerPolicy::ReplaceWithBlank);
        assert_eq!(s.default_width, 64);
        assert_eq!(s.default_mirror, MirrorMode::Both);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.cfg");
        let s = EditorSettings {
            max_undo_steps: 7,
            max_undo_memory_mb: 0,
            default_wrap: true,
            default_brush_width: 3,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path), s);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = EditorSettings::load_from(&dir.path().join("absent.cfg"));
        assert_eq!(loaded, EditorSettings::default());
    }

    #[test]
    fn test_undo_engine_limits() {
        let s = EditorSettings {
            max_undo_steps: 3,
            ..Default::default()
        };
        assert_eq!(s.undo_engine().max_history_size(), 3);
        let ctx = EditorSettings {
            default_brush_width: 4,
            default_wrap: true,
            ..Default::default()
        }
        .drawing_context();
        assert_eq!(ctx.brush_width, 4);
        assert!(ctx.wrap);
    }
}
