mod volumes;

pub use volumes::{DiscoveredVolumes, VolumeDir, discover_volumes};
