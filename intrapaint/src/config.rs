//! # Configuration
//!
//! Typed application settings, shared between the tools, the generation bridge and the document.
//! Values are read and written by [`ConfigKey`], type-checked on write, and announced on a change bus.
//! Persisted as TOML in the user's preference directory.

use intrapaint_core::notify::{ChangeBus, Coalesce, Subscription};
use intrapaint_core::state::stack::GenerationAreaConstraints;
use intrapaint_core::undo::{MergePolicy, UndoSettings};
use intrapaint_core::util::Size;
use intrapaint_core::{Document, EditMode};

const DOCUMENTATION: &str = r#"# IntraPaint settings. You may edit this file, but be aware that formatting and comments will not
# be preserved. Unknown or malformed values fall back to their defaults.

"#;

#[must_use]
pub fn preferences_dir() -> Option<std::path::PathBuf> {
    let mut base_dir = dirs::preference_dir()?;
    base_dir.push(env!("CARGO_PKG_NAME"));
    Some(base_dir)
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::AsRefStr,
    strum::EnumIter,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigKey {
    EditMode,
    GenerationSize,
    /// Seconds.
    UndoMergeInterval,
    MaxUndo,
    UndoMergePolicy,
    FixedGenerationAspect,
    PaintSelectionOnly,
    SelectionPadding,
}
impl ConfigKey {
    /// Settings an open [`Document`] keeps its own copy of.
    #[must_use]
    pub fn shapes_document(self) -> bool {
        matches!(
            self,
            Self::GenerationSize
                | Self::UndoMergeInterval
                | Self::MaxUndo
                | Self::UndoMergePolicy
                | Self::FixedGenerationAspect
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    EditMode(EditMode),
    Size(Size),
    Seconds(f32),
    Count(usize),
    MergePolicy(MergePolicy),
    Bool(bool),
    Pixels(u32),
}
impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::EditMode(_) => "edit mode",
            Self::Size(_) => "size",
            Self::Seconds(_) => "seconds",
            Self::Count(_) => "count",
            Self::MergePolicy(_) => "merge policy",
            Self::Bool(_) => "bool",
            Self::Pixels(_) => "pixels",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key:?} expects a {expected} value, got {found}")]
    WrongType {
        key: ConfigKey,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{value:?} is out of range for {key:?}")]
    OutOfRange { key: ConfigKey, value: ConfigValue },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfigChanged {
    pub key: ConfigKey,
    pub value: ConfigValue,
}
impl Coalesce for ConfigChanged {
    fn supersedes(&self, earlier: &Self) -> bool {
        self.key == earlier.key
    }
}

/// Serialized form. Every field has a default so partial files still load.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub edit_mode: EditMode,
    pub generation_size: Size,
    pub undo_merge_interval: f32,
    pub max_undo: usize,
    pub undo_merge_policy: MergePolicy,
    pub fixed_generation_aspect: bool,
    pub paint_selection_only: bool,
    pub selection_padding: u32,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            edit_mode: EditMode::Inpaint,
            generation_size: Size::new(512, 512),
            undo_merge_interval: intrapaint_core::undo::DEFAULT_MERGE_INTERVAL.as_secs_f32(),
            max_undo: intrapaint_core::undo::DEFAULT_MAX_HISTORY,
            undo_merge_policy: MergePolicy::default(),
            fixed_generation_aspect: false,
            paint_selection_only: false,
            selection_padding: 32,
        }
    }
}
impl Settings {
    /// Copy every value through the checked setter, keeping defaults for any that are rejected.
    fn checked(self) -> Self {
        use strum::IntoEnumIterator;
        let mut checked = Self::default();
        for key in ConfigKey::iter() {
            if let Err(e) = checked.set(key, &self.get(key)) {
                log::warn!("Ignoring stored setting: {e}");
            }
        }
        checked
    }
    fn get(&self, key: ConfigKey) -> ConfigValue {
        match key {
            ConfigKey::EditMode => ConfigValue::EditMode(self.edit_mode),
            ConfigKey::GenerationSize => ConfigValue::Size(self.generation_size),
            ConfigKey::UndoMergeInterval => ConfigValue::Seconds(self.undo_merge_interval),
            ConfigKey::MaxUndo => ConfigValue::Count(self.max_undo),
            ConfigKey::UndoMergePolicy => ConfigValue::MergePolicy(self.undo_merge_policy),
            ConfigKey::FixedGenerationAspect => ConfigValue::Bool(self.fixed_generation_aspect),
            ConfigKey::PaintSelectionOnly => ConfigValue::Bool(self.paint_selection_only),
            ConfigKey::SelectionPadding => ConfigValue::Pixels(self.selection_padding),
        }
    }
    /// Type- and range-checked write. Returns whether the value changed.
    fn set(&mut self, key: ConfigKey, value: &ConfigValue) -> Result<bool, ConfigError> {
        let out_of_range = || ConfigError::OutOfRange {
            key,
            value: value.clone(),
        };
        let changed = match (key, value) {
            (ConfigKey::EditMode, ConfigValue::EditMode(mode)) => {
                std::mem::replace(&mut self.edit_mode, *mode) != *mode
            }
            (ConfigKey::GenerationSize, ConfigValue::Size(size)) => {
                if size.is_empty() {
                    return Err(out_of_range());
                }
                std::mem::replace(&mut self.generation_size, *size) != *size
            }
            (ConfigKey::UndoMergeInterval, ConfigValue::Seconds(seconds)) => {
                if !seconds.is_finite() || *seconds < 0.0 {
                    return Err(out_of_range());
                }
                std::mem::replace(&mut self.undo_merge_interval, *seconds) != *seconds
            }
            (ConfigKey::MaxUndo, ConfigValue::Count(count)) => {
                if *count == 0 {
                    return Err(out_of_range());
                }
                std::mem::replace(&mut self.max_undo, *count) != *count
            }
            (ConfigKey::UndoMergePolicy, ConfigValue::MergePolicy(policy)) => {
                std::mem::replace(&mut self.undo_merge_policy, *policy) != *policy
            }
            (ConfigKey::FixedGenerationAspect, ConfigValue::Bool(fixed)) => {
                std::mem::replace(&mut self.fixed_generation_aspect, *fixed) != *fixed
            }
            (ConfigKey::PaintSelectionOnly, ConfigValue::Bool(only)) => {
                std::mem::replace(&mut self.paint_selection_only, *only) != *only
            }
            (ConfigKey::SelectionPadding, ConfigValue::Pixels(padding)) => {
                std::mem::replace(&mut self.selection_padding, *padding) != *padding
            }
            (key, value) => {
                return Err(ConfigError::WrongType {
                    key,
                    expected: self.get(key).type_name(),
                    found: value.type_name(),
                })
            }
        };
        Ok(changed)
    }
}

pub struct ConfigProvider {
    settings: parking_lot::RwLock<Settings>,
    events: ChangeBus<ConfigChanged>,
    /// Where `save` writes, if anywhere.
    path: Option<std::path::PathBuf>,
    failed_to_load: bool,
}
impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("settings", &*self.settings.read())
            .field("path", &self.path)
            .field("failed_to_load", &self.failed_to_load)
            .finish_non_exhaustive()
    }
}
impl Default for ConfigProvider {
    /// Defaults, never saved.
    fn default() -> Self {
        Self::with_settings(Settings::default(), None)
    }
}
impl ConfigProvider {
    const FILENAME: &'static str = "config.toml";
    fn with_settings(settings: Settings, path: Option<std::path::PathBuf>) -> Self {
        Self {
            settings: parking_lot::RwLock::new(settings),
            events: ChangeBus::new(),
            path,
            failed_to_load: false,
        }
    }
    /// Settings from the user's preferences, or defaults if unavailable.
    #[must_use]
    pub fn load_user() -> Self {
        match preferences_dir() {
            None => {
                log::warn!("No preferences directory, using default settings.");
                Self::default()
            }
            Some(mut dir) => {
                dir.push(Self::FILENAME);
                Self::load_or_default(dir)
            }
        }
    }
    /// Settings from `path`. Defaults are used if it can't be read, and `path` is still where `save` writes.
    #[must_use]
    pub fn load_or_default(path: std::path::PathBuf) -> Self {
        let settings: anyhow::Result<Settings> = try_block::try_block! {
            let string = std::fs::read_to_string(&path)?;
            let settings: Settings = toml::from_str(&string)?;
            Ok(settings.checked())
        };
        match settings {
            Ok(settings) => Self::with_settings(settings, Some(path)),
            Err(e) => {
                log::warn!("Failed to load settings from {path:?}, defaulting: {e:#}");
                Self {
                    failed_to_load: true,
                    ..Self::with_settings(Settings::default(), Some(path))
                }
            }
        }
    }
    /// Return true if loading user's settings failed. This can be useful for
    /// displaying a warning.
    #[must_use]
    pub fn did_fail_to_load(&self) -> bool {
        self.failed_to_load
    }
    pub fn save(&self) -> anyhow::Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No settings path"))?;
        if let Some(parent) = path.parent() {
            // Explicity do *not* create recursively. If not found, the user probably has a good reason.
            // Ignore errors (could already exist). Any real errors will be emitted by file access below.
            let _ = std::fs::DirBuilder::new().create(parent);
        }
        let string = DOCUMENTATION.to_owned() + &toml::ser::to_string_pretty(&*self.settings.read())?;
        std::fs::write(path, string)?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: ConfigKey) -> ConfigValue {
        self.settings.read().get(key)
    }
    /// Write a value. Subscribers are told only if it actually changed.
    pub fn set(&self, key: ConfigKey, value: ConfigValue) -> Result<(), ConfigError> {
        let changed = self.settings.write().set(key, &value)?;
        if changed {
            log::debug!("Setting {} = {value:?}", key.as_ref());
            self.events.emit(ConfigChanged { key, value });
        }
        Ok(())
    }
    pub fn subscribe(&self) -> Subscription<ConfigChanged> {
        self.events.subscribe()
    }
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    #[must_use]
    pub fn edit_mode(&self) -> EditMode {
        self.settings.read().edit_mode
    }
    #[must_use]
    pub fn paint_selection_only(&self) -> bool {
        self.settings.read().paint_selection_only
    }
    #[must_use]
    pub fn selection_padding(&self) -> u32 {
        self.settings.read().selection_padding
    }
    #[must_use]
    pub fn generation_size(&self) -> Size {
        self.settings.read().generation_size
    }
    #[must_use]
    pub fn undo_settings(&self) -> UndoSettings {
        let settings = self.settings.read();
        UndoSettings {
            max_history: settings.max_undo,
            merge_interval: std::time::Duration::try_from_secs_f32(settings.undo_merge_interval)
                .unwrap_or_default(),
            merge_policy: settings.undo_merge_policy,
        }
    }
    #[must_use]
    pub fn area_constraints(&self) -> GenerationAreaConstraints {
        let settings = self.settings.read();
        GenerationAreaConstraints {
            generation_size: settings.generation_size,
            fixed_aspect: settings.fixed_generation_aspect,
        }
    }
    /// Push the history limits and generation area constraints into `document`.
    pub fn apply_to(&self, document: &mut Document) {
        document.set_undo_settings(self.undo_settings());
        document.set_constraints(self.area_constraints());
    }
    /// Start following the settings that shape open documents. See [`DocumentSync`].
    #[must_use]
    pub fn watch_documents(&self) -> DocumentSync {
        DocumentSync {
            changes: self
                .events
                .subscribe_filtered(|event: &ConfigChanged| event.key.shapes_document()),
        }
    }
}

/// Carries settings changes into open documents, which otherwise keep the values they were opened with.
pub struct DocumentSync {
    changes: Subscription<ConfigChanged>,
}
impl DocumentSync {
    /// Apply whatever changed since the last call. Returns whether anything did.
    pub fn sync(&self, config: &ConfigProvider, document: &mut Document) -> bool {
        if self.changes.drain().count() == 0 {
            return false;
        }
        log::debug!("Applying changed settings to document {}", document.id());
        config.apply_to(document);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_is_type_checked() {
        let config = ConfigProvider::default();
        assert_eq!(
            config.set(ConfigKey::MaxUndo, ConfigValue::Bool(true)),
            Err(ConfigError::WrongType {
                key: ConfigKey::MaxUndo,
                expected: "count",
                found: "bool",
            })
        );
        assert!(matches!(
            config.set(ConfigKey::GenerationSize, ConfigValue::Size(Size::new(0, 5))),
            Err(ConfigError::OutOfRange { .. })
        ));
        config
            .set(ConfigKey::MaxUndo, ConfigValue::Count(7))
            .unwrap();
        assert_eq!(config.get(ConfigKey::MaxUndo), ConfigValue::Count(7));
        assert_eq!(config.undo_settings().max_history, 7);
    }
    #[test]
    fn subscribers_see_changes_only() {
        let config = ConfigProvider::default();
        let events = config.subscribe();
        config
            .set(ConfigKey::EditMode, ConfigValue::EditMode(EditMode::Inpaint))
            .unwrap();
        config
            .set(ConfigKey::EditMode, ConfigValue::EditMode(EditMode::Img2Img))
            .unwrap();
        assert_eq!(
            events.drain().collect::<Vec<_>>(),
            [ConfigChanged {
                key: ConfigKey::EditMode,
                value: ConfigValue::EditMode(EditMode::Img2Img),
            }]
        );
    }
    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = ConfigProvider::load_or_default(path.clone());
        assert!(config.did_fail_to_load());
        config
            .set(ConfigKey::PaintSelectionOnly, ConfigValue::Bool(true))
            .unwrap();
        config
            .set(ConfigKey::UndoMergeInterval, ConfigValue::Seconds(0.5))
            .unwrap();
        config.save().unwrap();

        let reloaded = ConfigProvider::load_or_default(path);
        assert!(!reloaded.did_fail_to_load());
        assert_eq!(reloaded.settings(), config.settings());
        assert_eq!(
            reloaded.undo_settings().merge_interval,
            std::time::Duration::from_millis(500)
        );
    }
    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "edit_mode = \"txt2img\"\n").unwrap();
        let config = ConfigProvider::load_or_default(path);
        assert_eq!(config.edit_mode(), EditMode::Txt2Img);
        assert_eq!(config.generation_size(), Size::new(512, 512));
    }
    #[test]
    fn rejected_values_are_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_undo = 0\nselection_padding = 4\n").unwrap();
        let config = ConfigProvider::load_or_default(path);
        assert!(!config.did_fail_to_load());
        assert_eq!(
            config.undo_settings().max_history,
            intrapaint_core::undo::DEFAULT_MAX_HISTORY
        );
        assert_eq!(config.selection_padding(), 4);
    }
    #[test]
    fn open_documents_follow_changes() {
        use intrapaint_core::util::Rect;
        let config = ConfigProvider::default();
        let mut document = Document::new(
            Size::new(64, 64),
            config.area_constraints(),
            config.undo_settings(),
        )
        .unwrap();
        let sync = config.watch_documents();
        assert!(!sync.sync(&config, &mut document));
        // The document doesn't keep a copy of this one.
        config
            .set(ConfigKey::PaintSelectionOnly, ConfigValue::Bool(true))
            .unwrap();
        assert!(!sync.sync(&config, &mut document));

        config
            .set(ConfigKey::UndoMergeInterval, ConfigValue::Seconds(0.0))
            .unwrap();
        assert!(sync.sync(&config, &mut document));
        for _ in 0..4 {
            document.create_layer_group(None, None).unwrap();
        }
        assert_eq!(document.history().undo_count(), 4);

        config.set(ConfigKey::MaxUndo, ConfigValue::Count(2)).unwrap();
        config
            .set(ConfigKey::GenerationSize, ConfigValue::Size(Size::new(512, 256)))
            .unwrap();
        config
            .set(ConfigKey::FixedGenerationAspect, ConfigValue::Bool(true))
            .unwrap();
        // Nothing reaches the document until it syncs.
        assert_eq!(document.history().undo_count(), 4);
        assert_eq!(document.stack().generation_area(), Rect::new(0, 0, 64, 64));

        assert!(sync.sync(&config, &mut document));
        assert_eq!(document.history().settings(), config.undo_settings());
        assert_eq!(document.history().undo_count(), 2);
        assert_eq!(document.stack().constraints(), config.area_constraints());
        assert_eq!(document.stack().generation_area(), Rect::new(0, 0, 64, 32));
        assert!(!sync.sync(&config, &mut document));
    }
}
