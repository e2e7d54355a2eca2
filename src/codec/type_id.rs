//! Type tokens carrying the bin count (and stairs capability) next to a
//! stream, since neither is stored in the stream itself.

use crate::{
    config::TreeConfig,
    error::{ Error, Result },
    tree::RoughOcTree,
};

const STAIRS_TAG: &str = "S";

impl RoughOcTree {
    /// `"RoughOcTree-<bins>"`, or `"RoughOcTree-S-<bins>"` with stairs enabled.
    pub fn type_id(&self) -> String {
        if self.config.stairs_enabled {
            format!("{}-{STAIRS_TAG}-{}", Self::TREE_TYPE, self.config.num_bins)
        } else {
            format!("{}-{}", Self::TREE_TYPE, self.config.num_bins)
        }
    }

    /// Creates an empty tree configured for the stream `id` describes.
    pub fn from_type_id(id: &str, resolution: f64) -> Result<Self> {
        let unknown = || Error::UnknownTreeType(id.to_owned());

        let rest = id
            .strip_prefix(Self::TREE_TYPE)
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(unknown)?;
        let (stairs_enabled, bins) = match rest.strip_prefix(STAIRS_TAG).and_then(|bins| bins.strip_prefix('-')) {
            Some(bins) => (true, bins),
            None => (false, rest),
        };
        let num_bins: u32 = bins.parse().map_err(|_| unknown())?;

        Self::with_config(
            TreeConfig::default()
                .with_resolution(resolution)
                .with_num_bins(num_bins)
                .with_stairs_enabled(stairs_enabled),
        )
    }
}

#[test]
fn type_id_round_trip() {
    let tree = RoughOcTree::new(0.1);
    assert_eq!(tree.type_id(), "RoughOcTree-S-16");

    let tree = RoughOcTree::with_config(TreeConfig::default().with_num_bins(8).with_stairs_enabled(false)).unwrap();
    assert_eq!(tree.type_id(), "RoughOcTree-8");

    let parsed = RoughOcTree::from_type_id("RoughOcTree-8", 0.2).unwrap();
    assert_eq!(parsed.config().num_bins, 8);
    assert!(!parsed.config().stairs_enabled);
    assert_eq!(parsed.config().resolution, 0.2);

    let parsed = RoughOcTree::from_type_id("RoughOcTree-S-32", 0.2).unwrap();
    assert_eq!(parsed.config().num_bins, 32);
    assert!(parsed.config().stairs_enabled);
}

#[test]
fn unknown_type_ids() {
    for id in ["OcTree", "RoughOcTree", "RoughOcTree-", "RoughOcTree-S-", "RoughOcTree-X-16", "RoughOcTreeS-16"] {
        assert!(matches!(RoughOcTree::from_type_id(id, 0.1), Err(Error::UnknownTreeType(_))), "{id}");
    }
    assert!(matches!(RoughOcTree::from_type_id("RoughOcTree-12", 0.1), Err(Error::InvalidBinCount(12))));
}
