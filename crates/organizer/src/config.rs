use novel_shelf_core::{canonical, Codec, EncodingPolicy, PlausibilityPolicy, SampleSpec};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const PENDING_DIR: &str = "00-待分类";
pub const REVIEW_DIR: &str = "00-二次确认";
pub const LOGS_DIR: &str = "logs";
pub const BACKUP_DIR: &str = "backup";
pub const CONFIG_FILE: &str = "config/novel-shelf.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library_path: PathBuf,
    pub create_backup: bool,
    pub encoding: EncodingConfig,
    pub classification: ClassificationConfig,
    pub sampling: SamplingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(".")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub target_encoding: String,
    pub min_confidence: f32,
    pub supported_encodings: Vec<String>,
    pub detection_encodings: Vec<String>,
    pub validation_encodings: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        let labels = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            target_encoding: "utf-8".to_string(),
            min_confidence: 0.7,
            supported_encodings: labels(novel_shelf_core::DEFAULT_SUPPORTED),
            detection_encodings: labels(novel_shelf_core::DEFAULT_DETECTION),
            validation_encodings: labels(novel_shelf_core::DEFAULT_SUPPORTED),
        }
    }
}

impl EncodingConfig {
    pub fn target(&self) -> Result<Codec, ConfigError> {
        Codec::from_label(&self.target_encoding)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown target encoding {:?}", self.target_encoding)))
    }

    /// Build the scan decision policy. Unknown fallback labels are skipped.
    pub fn policy(&self) -> Result<EncodingPolicy, ConfigError> {
        let detection_fallbacks = self
            .detection_encodings
            .iter()
            .filter_map(|label| {
                let codec = Codec::from_label(label);
                if codec.is_none() {
                    warn!(label = %label, "skipping unknown detection encoding");
                }
                codec
            })
            .collect();

        Ok(EncodingPolicy {
            target: self.target()?,
            min_confidence: self.min_confidence,
            supported: self.supported_encodings.iter().map(|l| canonical(l)).collect(),
            detection_fallbacks,
            plausibility: PlausibilityPolicy::default(),
        })
    }

    pub fn is_validated(&self, encoding: &str) -> bool {
        let name = canonical(encoding);
        self.validation_encodings.iter().any(|l| canonical(l) == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub categories: Categories,
    pub thresholds: Thresholds,
    pub weights: Weights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub direct_classification: u32,
    pub secondary_check: u32,
    pub score_difference: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            direct_classification: 16,
            secondary_check: 8,
            score_difference: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            high: 3,
            medium: 2,
            low: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub high_weight: Vec<String>,
    pub medium_weight: Vec<String>,
    pub low_weight: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryProfile {
    pub id: String,
    pub keywords: Keywords,
}

/// Category profiles in document order. The order is the tie-break when scores are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categories(pub Vec<CategoryProfile>);

impl Categories {
    pub fn iter(&self) -> impl Iterator<Item = &CategoryProfile> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.id.as_str())
    }
}

impl Default for Categories {
    fn default() -> Self {
        let defaults: &[(&str, [&[&str]; 3])] = &[
            (
                "01-玄幻",
                [&["玄幻", "异界", "斗气", "修炼"], &["魔法", "境界", "武者"], &["强者", "等级", "战斗"]],
            ),
            (
                "02-奇幻",
                [&["奇幻", "魔法", "精灵", "魔法师"], &["法师", "魔兽", "巫师"], &["魔力", "咒语", "魔法学院"]],
            ),
            (
                "05-都市",
                [&["都市", "重生", "系统", "签到"], &["现代", "都市生活", "商战"], &["都市情感", "职场", "创业"]],
            ),
            (
                "10-科幻",
                [&["科幻", "星际", "未来", "机甲"], &["太空", "科技", "星球"], &["外星", "时空", "变异"]],
            ),
        ];

        let owned = |words: &[&str]| -> Vec<String> { words.iter().map(|w| w.to_string()).collect() };
        Self(
            defaults
                .iter()
                .map(|(id, [high, medium, low])| CategoryProfile {
                    id: id.to_string(),
                    keywords: Keywords {
                        high_weight: owned(*high),
                        medium_weight: owned(*medium),
                        low_weight: owned(*low),
                    },
                })
                .collect(),
        )
    }
}

impl Serialize for Categories {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|c| (&c.id, &c.keywords)))
    }
}

impl<'de> Deserialize<'de> for Categories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CategoriesVisitor;

        impl<'de> Visitor<'de> for CategoriesVisitor {
            type Value = Categories;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of category id to keyword lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Categories, A::Error> {
                let mut categories = Vec::new();
                while let Some((id, keywords)) = map.next_entry::<String, Keywords>()? {
                    if categories.iter().any(|c: &CategoryProfile| c.id == id) {
                        return Err(serde::de::Error::custom(format!("duplicate category {id}")));
                    }
                    categories.push(CategoryProfile { id, keywords });
                }
                Ok(Categories(categories))
            }
        }

        deserializer.deserialize_map(CategoriesVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub begin_chars: usize,
    pub random_fragment_count: usize,
    pub random_fragment_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let spec = SampleSpec::default();
        Self {
            begin_chars: spec.head_chars,
            random_fragment_count: spec.fragment_count,
            random_fragment_size: spec.fragment_size,
        }
    }
}

impl SamplingConfig {
    pub fn spec(&self) -> SampleSpec {
        SampleSpec {
            head_chars: self.begin_chars,
            fragment_count: self.random_fragment_count,
            fragment_size: self.random_fragment_size,
        }
    }
}

impl Config {
    pub fn new(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            create_backup: true,
            encoding: EncodingConfig::default(),
            classification: ClassificationConfig::default(),
            sampling: SamplingConfig::default(),
        }
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.library_path.join(PENDING_DIR)
    }

    pub fn review_dir(&self) -> PathBuf {
        self.library_path.join(REVIEW_DIR)
    }

    pub fn category_dir(&self, id: &str) -> PathBuf {
        self.library_path.join(id)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.library_path.join(LOGS_DIR)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.library_path.join(BACKUP_DIR)
    }

    pub fn default_path(library_path: &Path) -> PathBuf {
        library_path.join(CONFIG_FILE)
    }

    /// Load YAML for `.yaml`/`.yml` files and JSON for anything else.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if is_yaml(path) {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(Into::into)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(0.0..=1.0).contains(&self.encoding.min_confidence) {
            return invalid(format!(
                "min_confidence must be within [0, 1], got {}",
                self.encoding.min_confidence
            ));
        }
        if !self.encoding.target()?.can_encode() {
            return invalid(format!("cannot write files as {}", self.encoding.target_encoding));
        }

        let Weights { high, medium, low } = self.classification.weights;
        if high == 0 || medium == 0 || low == 0 {
            return invalid("keyword weights must be positive".to_string());
        }
        if let Some(c) = self.classification.categories.iter().find(|c| c.id.trim().is_empty()) {
            return invalid(format!("category id must not be empty: {c:?}"));
        }
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_paths() {
        let config = Config::new("/lib");
        assert_eq!(config.pending_dir(), PathBuf::from("/lib/00-待分类"));
        assert_eq!(config.review_dir(), PathBuf::from("/lib/00-二次确认"));
        assert_eq!(config.category_dir("05-都市"), PathBuf::from("/lib/05-都市"));
        assert_eq!(config.logs_dir(), PathBuf::from("/lib/logs"));
        assert_eq!(
            Config::default_path(Path::new("/lib")),
            PathBuf::from("/lib/config/novel-shelf.yaml")
        );
    }

    #[test]
    fn defaults() {
        let config = Config::new("/lib");
        assert_eq!(config.classification.thresholds.direct_classification, 16);
        assert_eq!(config.classification.thresholds.score_difference, 4);
        assert_eq!(config.classification.weights, Weights { high: 3, medium: 2, low: 1 });
        assert_eq!(config.sampling.spec(), SampleSpec::default());
        assert_eq!(config.encoding.detection_encodings[0], "gbk");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_save_load_keeps_category_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config/novel-shelf.yaml");

        let mut config = Config::new("/lib");
        config.classification.categories.0.reverse();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        let ids: Vec<&str> = loaded.classification.categories.ids().collect();
        assert_eq!(ids, ["10-科幻", "05-都市", "02-奇幻", "01-玄幻"]);
        assert_eq!(loaded.library_path, PathBuf::from("/lib"));
    }

    #[test]
    fn json_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        Config::new("/lib").save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded.classification.categories, Categories::default());
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.yml");
        std::fs::write(
            &path,
            "library_path: /books\nclassification:\n  categories:\n    05-都市:\n      high_weight: [都市, 重生]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let categories = &config.classification.categories;
        assert_eq!(categories.len(), 1);
        assert_eq!(categories.0[0].keywords.high_weight, ["都市", "重生"]);
        assert!(categories.0[0].keywords.low_weight.is_empty());
        assert_eq!(config.classification.weights.high, 3);
        assert_eq!(config.encoding.target_encoding, "utf-8");
    }

    #[test]
    fn duplicate_category_is_rejected() {
        let yaml = "a: {}\nb: {}\na: {}\n";
        assert!(serde_yaml::from_str::<Categories>(yaml).is_err());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::new("/lib");
        config.encoding.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::new("/lib");
        config.classification.weights.low = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new("/lib");
        config.encoding.target_encoding = "utf-16".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::new("/lib");
        config.encoding.target_encoding = "nope".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn policy_skips_unknown_fallbacks() {
        let mut encoding = EncodingConfig::default();
        encoding.detection_encodings = vec!["gbk".into(), "klingon".into(), "big5".into()];

        let policy = encoding.policy().unwrap();
        assert_eq!(policy.detection_fallbacks.len(), 2);
        assert!(policy.is_supported("GB2312"));
    }
}
