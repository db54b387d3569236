//! Region descriptors for the `regions` snapshot option.
//!
//! Regions restrict or tune comparison for part of a page. They are plain
//! values: build one with [`RegionBuilder`] and place the result in the
//! caller options, e.g. `{"regions": [region]}`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Comparison algorithm applied inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Ignore,
    Standard,
    Intelliignore,
    Layout,
}

impl Algorithm {
    /// Whether the algorithm accepts a tuning configuration.
    pub fn is_tunable(self) -> bool {
        matches!(self, Algorithm::Standard | Algorithm::Intelliignore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Padding {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl Padding {
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            bottom: value,
            left: value,
            right: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_xpath: Option<String>,
    #[serde(rename = "elementCSS", skip_serializing_if = "Option::is_none")]
    pub element_css: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_sensitivity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ignore_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carousels_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banners_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ads_enabled: Option<bool>,
}

impl RegionConfiguration {
    fn is_empty(&self) -> bool {
        self == &RegionConfiguration::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAssertion {
    pub diff_ignore_threshold: f64,
}

/// A finished region descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub algorithm: Algorithm,
    pub element_selector: ElementSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<Padding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<RegionConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<RegionAssertion>,
}

impl Region {
    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Builder for [`Region`].
#[derive(Debug, Clone, Default)]
pub struct RegionBuilder {
    algorithm: Algorithm,
    selector: ElementSelector,
    padding: Option<Padding>,
    configuration: RegionConfiguration,
    diff_ignore_threshold: Option<f64>,
}

impl RegionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.selector.bounding_box = Some(bounding_box);
        self
    }

    pub fn element_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.selector.element_xpath = Some(xpath.into());
        self
    }

    pub fn element_css(mut self, selector: impl Into<String>) -> Self {
        self.selector.element_css = Some(selector.into());
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.padding = Some(padding);
        self
    }

    pub fn diff_sensitivity(mut self, value: u8) -> Self {
        self.configuration.diff_sensitivity = Some(value);
        self
    }

    pub fn image_ignore_threshold(mut self, value: f64) -> Self {
        self.configuration.image_ignore_threshold = Some(value);
        self
    }

    pub fn carousels_enabled(mut self, value: bool) -> Self {
        self.configuration.carousels_enabled = Some(value);
        self
    }

    pub fn banners_enabled(mut self, value: bool) -> Self {
        self.configuration.banners_enabled = Some(value);
        self
    }

    pub fn ads_enabled(mut self, value: bool) -> Self {
        self.configuration.ads_enabled = Some(value);
        self
    }

    pub fn diff_ignore_threshold(mut self, value: f64) -> Self {
        self.diff_ignore_threshold = Some(value);
        self
    }

    /// Tuning fields are dropped unless the algorithm is tunable.
    pub fn build(self) -> Region {
        let configuration = (self.algorithm.is_tunable() && !self.configuration.is_empty())
            .then_some(self.configuration);

        Region {
            algorithm: self.algorithm,
            element_selector: self.selector,
            padding: self.padding,
            configuration,
            assertion: self
                .diff_ignore_threshold
                .map(|diff_ignore_threshold| RegionAssertion {
                    diff_ignore_threshold,
                }),
        }
    }
}
