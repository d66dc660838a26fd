//! Queries against the tracking runtime that are not per-frame poses.

use crate::eye::Eye;
use crate::eye_transform::FovTangents;
use crate::pose::{HMD_DEVICE_INDEX, HmdMatrix34, MAX_TRACKED_DEVICE_COUNT, TrackedDeviceClass, TrackedDeviceIndex};

/// Pixel dimensions of one eye's render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTargetSize {
    pub width: u32,
    pub height: u32,
}

impl RenderTargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for RenderTargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Near-static HMD configuration and device inventory.
///
/// Per-frame poses come from [`PoseSource`](crate::PoseSource); this trait
/// covers what is queried once, or again after the HMD is reconfigured.
pub trait TrackingSystem {
    /// Per-eye render target size the runtime recommends.
    fn recommended_render_target_size(&self) -> RenderTargetSize;

    /// Tangents of the eye's frustum half-angles.
    fn projection_raw(&self, eye: Eye) -> FovTangents;

    /// Eye-to-head offset, in the runtime's native layout.
    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34;

    fn tracked_device_class(&self, index: TrackedDeviceIndex) -> TrackedDeviceClass;

    fn is_tracked_device_connected(&self, index: TrackedDeviceIndex) -> bool;

    /// Slot that carries the HMD's pose.
    fn hmd_device_index(&self) -> TrackedDeviceIndex {
        HMD_DEVICE_INDEX
    }

    /// Every occupied slot with its class and connection flag.
    fn device_inventory(&self) -> Vec<(TrackedDeviceIndex, TrackedDeviceClass, bool)> {
        (0..MAX_TRACKED_DEVICE_COUNT as u32)
            .map(TrackedDeviceIndex)
            .filter_map(|index| match self.tracked_device_class(index) {
                TrackedDeviceClass::Invalid => None,
                class => Some((index, class, self.is_tracked_device_connected(index))),
            })
            .collect()
    }
}

/// Error code returned by the tracking runtime's init call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InitErrorCode(pub i32);

impl InitErrorCode {
    pub const NONE: Self = Self(0);
    pub const UNKNOWN: Self = Self(1);
    pub const INSTALLATION_NOT_FOUND: Self = Self(100);
    pub const INSTALLATION_CORRUPT: Self = Self(101);
    pub const CLIENT_DLL_NOT_FOUND: Self = Self(102);
    pub const FILE_NOT_FOUND: Self = Self(103);
    pub const FACTORY_NOT_FOUND: Self = Self(104);
    pub const INTERFACE_NOT_FOUND: Self = Self(105);
    pub const INVALID_INTERFACE: Self = Self(106);
    pub const USER_CONFIG_DIRECTORY_INVALID: Self = Self(107);
    pub const HMD_NOT_FOUND: Self = Self(108);
    pub const NOT_INITIALIZED: Self = Self(109);
    pub const PATH_REGISTRY_NOT_FOUND: Self = Self(110);
    pub const NO_CONFIG_PATH: Self = Self(111);
    pub const NO_LOG_PATH: Self = Self(112);
    pub const PATH_REGISTRY_NOT_WRITABLE: Self = Self(113);
    pub const HMD_NOT_FOUND_PRESENCE_FAILED: Self = Self(126);
    pub const DRIVER_FAILED: Self = Self(200);
    pub const DRIVER_UNKNOWN: Self = Self(201);
    pub const DRIVER_HMD_UNKNOWN: Self = Self(202);
    pub const DRIVER_NOT_LOADED: Self = Self(203);
    pub const DRIVER_HMD_DISPLAY_NOT_FOUND: Self = Self(208);

    pub fn is_success(self) -> bool {
        self == Self::NONE
    }

    /// The runtime's symbolic name for this code.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::NONE => "VRInitError_None",
            Self::UNKNOWN => "VRInitError_Unknown",
            Self::INSTALLATION_NOT_FOUND => "VRInitError_Init_InstallationNotFound",
            Self::INSTALLATION_CORRUPT => "VRInitError_Init_InstallationCorrupt",
            Self::CLIENT_DLL_NOT_FOUND => "VRInitError_Init_VRClientDLLNotFound",
            Self::FILE_NOT_FOUND => "VRInitError_Init_FileNotFound",
            Self::FACTORY_NOT_FOUND => "VRInitError_Init_FactoryNotFound",
            Self::INTERFACE_NOT_FOUND => "VRInitError_Init_InterfaceNotFound",
            Self::INVALID_INTERFACE => "VRInitError_Init_InvalidInterface",
            Self::USER_CONFIG_DIRECTORY_INVALID => "VRInitError_Init_UserConfigDirectoryInvalid",
            Self::HMD_NOT_FOUND => "VRInitError_Init_HmdNotFound",
            Self::NOT_INITIALIZED => "VRInitError_Init_NotInitialized",
            Self::PATH_REGISTRY_NOT_FOUND => "VRInitError_Init_PathRegistryNotFound",
            Self::NO_CONFIG_PATH => "VRInitError_Init_NoConfigPath",
            Self::NO_LOG_PATH => "VRInitError_Init_NoLogPath",
            Self::PATH_REGISTRY_NOT_WRITABLE => "VRInitError_Init_PathRegistryNotWritable",
            Self::HMD_NOT_FOUND_PRESENCE_FAILED => "VRInitError_Init_HmdNotFoundPresenceFailed",
            Self::DRIVER_FAILED => "VRInitError_Driver_Failed",
            Self::DRIVER_UNKNOWN => "VRInitError_Driver_Unknown",
            Self::DRIVER_HMD_UNKNOWN => "VRInitError_Driver_HmdUnknown",
            Self::DRIVER_NOT_LOADED => "VRInitError_Driver_NotLoaded",
            Self::DRIVER_HMD_DISPLAY_NOT_FOUND => "VRInitError_Driver_HmdDisplayNotFound",
            _ => "VRInitError_Unrecognized",
        }
    }
}

impl std::fmt::Display for InitErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbol(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_still_have_a_symbol() {
        assert_eq!(InitErrorCode(4242).symbol(), "VRInitError_Unrecognized");
        assert_eq!(
            InitErrorCode::HMD_NOT_FOUND.to_string(),
            "VRInitError_Init_HmdNotFound (108)"
        );
        assert!(InitErrorCode::NONE.is_success());
    }
}
