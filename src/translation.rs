//! Translation of raw variable codes into canonical variable names.
//!
//! The table is loaded once per run from an XML document of the form:
//!
//! ```xml
//! <translations>
//!   <asset name="T01">
//!     <translation><src>v101</src><dest>WindSpeed</dest></translation>
//!   </asset>
//! </translations>
//! ```
//!
//! It is read-only afterwards and shared by reference with every file being
//! processed.

use crate::error::{Error, Result};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
struct Document {
    #[serde(rename = "asset", default)]
    assets: Vec<AssetElement>,
}

#[derive(Deserialize)]
struct AssetElement {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "translation", default)]
    translations: Vec<TranslationElement>,
}

#[derive(Deserialize)]
struct TranslationElement {
    #[serde(default)]
    src: Option<String>,
    #[serde(default)]
    dest: Option<String>,
}

/// Maps `asset -> (raw code -> canonical name)`.
#[derive(Debug, Default, Clone)]
pub struct TranslationTable {
    assets: HashMap<String, HashMap<String, String>>,
}

impl TranslationTable {
    /// Loads the table from `path`, gunzipping it when the name ends in `.gz`.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let gzipped = path.extension().and_then(|e| e.to_str()) == Some("gz");

        let table = if gzipped {
            Self::from_reader(BufReader::new(MultiGzDecoder::new(file)))?
        } else {
            Self::from_reader(BufReader::new(file))?
        };

        debug!(
            assets = table.asset_count(),
            pairs = table.pair_count(),
            "Translation table loaded"
        );
        Ok(table)
    }

    /// Parses an uncompressed translation document.
    ///
    /// Later declarations of the same `(asset, src)` pair overwrite earlier
    /// ones. Pairs without a `src` or `dest` are left out.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let document: Document = quick_xml::de::from_reader(reader)?;
        let mut table = Self::default();

        for asset in document.assets {
            for entry in asset.translations {
                let (Some(src), Some(dest)) = (non_blank(entry.src), non_blank(entry.dest)) else {
                    continue;
                };
                table.insert(&asset.name, src, dest);
            }
        }

        Ok(table)
    }

    /// Adds a mapping, returning the name it replaced.
    pub fn insert(
        &mut self,
        asset: &str,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> Option<String> {
        self.assets
            .entry(asset.to_string())
            .or_default()
            .insert(code.into(), name.into())
    }

    pub fn lookup(&self, asset: &str, code: &str) -> Option<&str> {
        self.assets.get(asset)?.get(code).map(String::as_str)
    }

    /// Resolves a raw code, returning the table-owned asset id and the
    /// canonical variable name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Translation`] if the pair is unknown.
    pub fn resolve(&self, asset: &str, code: &str) -> Result<(&str, &str)> {
        self.assets
            .get_key_value(asset)
            .and_then(|(asset, codes)| Some((asset.as_str(), codes.get(code)?.as_str())))
            .ok_or_else(|| Error::Translation {
                asset: asset.to_string(),
                code: code.to_string(),
            })
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn pair_count(&self) -> usize {
        self.assets.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0
    }

    /// Iterates over all assets and their code mappings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashMap<String, String>)> {
        self.assets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<A, C, N> FromIterator<(A, C, N)> for TranslationTable
where
    A: AsRef<str>,
    C: Into<String>,
    N: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (A, C, N)>>(iter: T) -> Self {
        let mut table = Self::default();
        for (asset, code, name) in iter {
            table.insert(asset.as_ref(), code, name);
        }
        table
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
