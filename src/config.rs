//! Tree configuration: sensor model, clamping, and binary encoding settings.

use serde::{ Deserialize, Serialize };
use crate::{
    error::{ Error, Result },
    utils::logodds,
};

/// Per-tree selection of how child payloads are bit-packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncodingMode {
    /// 3 bits per child: occupancy pair plus a single "rough" flag
    Thresholding,
    /// `2 + log2(num_bins) + 1` bits per child: occupancy pair, roughness
    /// bin index, stairs flag
    Binning,
}

impl TryFrom<u8> for EncodingMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EncodingMode::Thresholding),
            1 => Ok(EncodingMode::Binning),
            other => Err(Error::InvalidEncodingMode(other)),
        }
    }
}

impl From<EncodingMode> for u8 {
    fn from(mode: EncodingMode) -> u8 {
        match mode {
            EncodingMode::Thresholding => 0,
            EncodingMode::Binning => 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Edge length of a max-depth voxel in meters
    pub resolution: f64,

    /// Number of levels below the root; leaves live at this depth
    pub tree_depth: u8,

    /// Probability assigned to a hit observation
    pub prob_hit: f64,

    /// Probability assigned to a miss observation
    pub prob_miss: f64,

    /// Lower occupancy/stairs saturation bound (probability)
    pub clamping_thres_min: f64,

    /// Upper occupancy/stairs saturation bound (probability)
    pub clamping_thres_max: f64,

    /// A node is occupied at or above this probability
    pub occupancy_thres: f64,

    /// A node is stairs strictly above this probability
    pub stairs_thres: f64,

    pub encoding_mode: EncodingMode,

    /// Roughness bins used by [`EncodingMode::Binning`]; power of two
    pub num_bins: u32,

    /// Roughness above this value sets the rough flag in
    /// [`EncodingMode::Thresholding`]; decoded rough leaves carry this value
    pub rough_binary_thres: f32,

    /// Only affects the type id suffix
    pub stairs_enabled: bool,

    /// Track keys whose classification changed since the last reset
    pub change_detection: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            resolution: 0.1,
            tree_depth: 16,
            prob_hit: 0.7,
            prob_miss: 0.4,
            clamping_thres_min: 0.1192,
            clamping_thres_max: 0.971,
            occupancy_thres: 0.5,
            stairs_thres: 0.5,
            encoding_mode: EncodingMode::Binning,
            num_bins: 16,
            rough_binary_thres: 0.99,
            stairs_enabled: true,
            change_detection: false,
        }
    }
}

impl TreeConfig {
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_tree_depth(mut self, tree_depth: u8) -> Self {
        self.tree_depth = tree_depth;
        self
    }

    pub fn with_encoding_mode(mut self, mode: EncodingMode) -> Self {
        self.encoding_mode = mode;
        self
    }

    pub fn with_num_bins(mut self, num_bins: u32) -> Self {
        self.num_bins = num_bins;
        self
    }

    pub fn with_rough_binary_thres(mut self, thres: f32) -> Self {
        self.rough_binary_thres = thres;
        self
    }

    pub fn with_stairs_enabled(mut self, enabled: bool) -> Self {
        self.stairs_enabled = enabled;
        self
    }

    pub fn with_change_detection(mut self, enabled: bool) -> Self {
        self.change_detection = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tree_depth == 0 || self.tree_depth > 32 {
            return Err(Error::InvalidTreeDepth(self.tree_depth));
        }
        BinLayout::new(self.num_bins)?;
        let (min, max) = self.clamping_log_odds();
        if min > max {
            return Err(Error::InvalidClamping { min, max });
        }
        Ok(())
    }

    #[inline]
    pub fn prob_hit_log(&self) -> f32 {
        logodds(self.prob_hit)
    }

    #[inline]
    pub fn prob_miss_log(&self) -> f32 {
        logodds(self.prob_miss)
    }

    /// `(min, max)` saturation bounds in log-odds
    #[inline]
    pub fn clamping_log_odds(&self) -> (f32, f32) {
        (logodds(self.clamping_thres_min), logodds(self.clamping_thres_max))
    }

    #[inline]
    pub fn occupancy_thres_log(&self) -> f32 {
        logodds(self.occupancy_thres)
    }

    #[inline]
    pub fn stairs_thres_log(&self) -> f32 {
        logodds(self.stairs_thres)
    }
}

/// Bit budget of one child in [`EncodingMode::Binning`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinLayout {
    pub num_bins: u32,
    pub rough_bits: usize,
    /// Width of one bin. Note this is `1 / (num_bins - 1)`, so the last
    /// index lands exactly on 1.0.
    pub bin_size: f64,
}

impl BinLayout {
    pub fn new(num_bins: u32) -> Result<Self> {
        if num_bins < 2 || num_bins > (1 << 16) || !num_bins.is_power_of_two() {
            log::warn!("rejecting roughness bin count {num_bins}");
            return Err(Error::InvalidBinCount(num_bins));
        }

        Ok(Self {
            num_bins,
            rough_bits: num_bins.trailing_zeros() as usize,
            bin_size: 1.0 / (num_bins - 1) as f64,
        })
    }

    /// occupancy pair + roughness index + stairs flag
    #[inline]
    pub fn bits_per_child(&self) -> usize {
        2 + self.rough_bits + 1
    }

    /// Eight children always fill whole bytes
    #[inline]
    pub fn bytes_per_node(&self) -> usize {
        self.bits_per_child()
    }

    pub fn bin_index(&self, rough: f32) -> u32 {
        let index = (rough as f64 * (self.num_bins - 1) as f64).floor();
        index.max(0.0).min((self.num_bins - 1) as f64) as u32
    }

    pub fn bin_value(&self, index: u32) -> f32 {
        (index as f64 * self.bin_size) as f32
    }
}

#[test]
fn default_config_is_valid() {
    let config = TreeConfig::default();
    config.validate().unwrap();
    let (min, max) = config.clamping_log_odds();
    assert!((min + 2.0).abs() < 1e-3);
    assert!((max - 3.511).abs() < 1e-3);
    assert!((config.prob_hit_log() - 0.847).abs() < 1e-3);
    assert!((config.prob_miss_log() + 0.405).abs() < 1e-3);
    assert_eq!(config.occupancy_thres_log(), 0.0);
}

#[test]
fn rejects_bad_configs() {
    assert!(matches!(TreeConfig::default().with_num_bins(12).validate(), Err(Error::InvalidBinCount(12))));
    assert!(matches!(TreeConfig::default().with_num_bins(1).validate(), Err(Error::InvalidBinCount(1))));
    assert!(matches!(TreeConfig::default().with_tree_depth(0).validate(), Err(Error::InvalidTreeDepth(0))));
    assert!(matches!(TreeConfig::default().with_tree_depth(40).validate(), Err(Error::InvalidTreeDepth(40))));

    let mut config = TreeConfig::default();
    config.clamping_thres_min = 0.9;
    config.clamping_thres_max = 0.2;
    assert!(matches!(config.validate(), Err(Error::InvalidClamping { .. })));
}

#[test]
fn encoding_mode_from_byte() {
    assert_eq!(EncodingMode::try_from(0).unwrap(), EncodingMode::Thresholding);
    assert_eq!(EncodingMode::try_from(1).unwrap(), EncodingMode::Binning);
    assert!(matches!(EncodingMode::try_from(7), Err(Error::InvalidEncodingMode(7))));
    assert_eq!(u8::from(EncodingMode::Binning), 1);
}

#[test]
fn bin_layout_sixteen_bins() {
    let layout = BinLayout::new(16).unwrap();
    assert_eq!(layout.rough_bits, 4);
    assert_eq!(layout.bits_per_child(), 7);
    assert_eq!(layout.bytes_per_node(), 7);

    assert_eq!(layout.bin_index(1.0), 15);
    assert_eq!(layout.bin_value(15), 1.0);
    assert_eq!(layout.bin_index(0.0), 0);
    assert_eq!(layout.bin_value(0), 0.0);

    // out of range values saturate at the outer bins
    assert_eq!(layout.bin_index(1.7), 15);
    assert_eq!(layout.bin_index(-0.3), 0);
}
