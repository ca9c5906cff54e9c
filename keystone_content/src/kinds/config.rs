use std::collections::BTreeMap;

use keystone_shared::log::trace;

use crate::{kinds::SoftwareContext, AssetKey, AssetType, Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ConfigParams {
    /// Names of the properties that are read. All properties are read when empty.
    pub properties: Vec<String>,
}

/// Numeric settings stored as lines of `"PROPERTY" "VALUE"`.
///
/// Property names are case insensitive and stored in uppercase.
///
/// # Example
///
/// ```
/// use keystone_content::kinds::ConfigAsset;
/// let config = ConfigAsset::parse("\"fov\" \"90\"\n\"vsync\" \"1\"", &[]).unwrap();
/// assert_eq!(config.get("FOV"), Some(90.0));
/// assert_eq!(config.get("vsync"), Some(1.0));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigAsset {
    values: BTreeMap<String, f32>,
}

impl ConfigAsset {
    pub fn parse(text: &str, properties: &[String]) -> Result<Self> {
        let mut config = Self::default();
        for (index, line) in text.lines().enumerate() {
            let mut quoted = line.split('"').skip(1).step_by(2);
            let (Some(property), Some(value)) = (quoted.next(), quoted.next()) else {
                if !line.trim().is_empty() {
                    trace!("Ignoring config line {}: '{line}'", index + 1);
                }
                continue;
            };
            let property = property.to_uppercase();
            if !properties.is_empty() && !properties.iter().any(|declared| declared.to_uppercase() == property) {
                trace!("Ignoring unknown config property '{property}'");
                continue;
            }
            let value = value
                .trim()
                .parse::<f32>()
                .map_err(|err| Error::Decode(format!("invalid value '{value}' of property '{property}' in line {}: {err}", index + 1)))?;
            config.values.insert(property, value);
        }
        Ok(config)
    }

    pub fn get(&self, property: &str) -> Option<f32> {
        self.values.get(&property.to_uppercase()).copied()
    }

    pub fn set(&mut self, property: &str, value: f32) {
        self.values.insert(property.to_uppercase(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.values.iter().map(|(property, value)| (property.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Writes the config in the format that [`ConfigAsset::parse`] reads.
    pub fn to_text(&self) -> String {
        self.values
            .iter()
            .map(|(property, value)| format!("\"{property}\" \"{value}\"\n"))
            .collect()
    }
}

impl AssetType for ConfigAsset {
    type Context = SoftwareContext;
    type Params = ConfigParams;
    type Resource = ();

    const TYPE_TAG: &'static str = "config";

    fn decode(bytes: &[u8], params: &Self::Params) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|err| Error::Decode(err.to_string()))?;
        Self::parse(text, &params.properties)
    }

    fn commit(&self, _params: &Self::Params, _context: &mut Self::Context) -> Result<Self::Resource> {
        Ok(())
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("config/default.cfg")
    }

    fn hardcoded_fallback() -> Self {
        Self::default()
    }
}
