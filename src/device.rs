use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

use crate::config::DeviceFeature;
use crate::error::GraphicsError;

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

/// Score of a device that failed one of the hard requirements.
pub const INADEQUATE_GPU_SCORE: u32 = 0;

/// Bonus that makes any discrete GPU outrank integrated ones of similar size.
pub const DISCRETE_GPU_BONUS: u32 = 1000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Both indices, when complete.
    pub fn resolved(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }

    /// Family indices that need a queue, deduplicated and ascending.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present]
            .into_iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything the renderer needs to know about one physical device.
///
/// Implemented over a live instance and surface by [`SurfaceQuery`]; tests
/// supply their own.
pub trait PhysicalDeviceSource {
    fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>>;
    fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> Result<bool>;
    fn extensions(&self, device: vk::PhysicalDevice) -> Result<Vec<vk::ExtensionProperties>>;
    fn swapchain_support(&self, device: vk::PhysicalDevice) -> Result<SwapchainSupport>;
}

pub struct SurfaceQuery<'a> {
    pub instance: &'a Instance,
    pub surface: vk::SurfaceKHR,
}

impl PhysicalDeviceSource for SurfaceQuery<'_> {
    fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.instance.enumerate_physical_devices()? })
    }

    fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.get_physical_device_properties(device) }
    }

    fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.instance.get_physical_device_features(device) }
    }

    fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe { self.instance.get_physical_device_queue_family_properties(device) }
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        Ok(unsafe {
            self.instance
                .get_physical_device_surface_support_khr(device, family, self.surface)?
        })
    }

    fn extensions(&self, device: vk::PhysicalDevice) -> Result<Vec<vk::ExtensionProperties>> {
        Ok(unsafe {
            self.instance
                .enumerate_device_extension_properties(device, None)?
        })
    }

    fn swapchain_support(&self, device: vk::PhysicalDevice) -> Result<SwapchainSupport> {
        unsafe {
            Ok(SwapchainSupport {
                capabilities: self
                    .instance
                    .get_physical_device_surface_capabilities_khr(device, self.surface)?,
                formats: self
                    .instance
                    .get_physical_device_surface_formats_khr(device, self.surface)?,
                present_modes: self
                    .instance
                    .get_physical_device_surface_present_modes_khr(device, self.surface)?,
            })
        }
    }
}

/// Scans queue families in order; the first graphics family and the first
/// presenting family win, and the scan stops once both are known.
pub fn find_queue_families<S: PhysicalDeviceSource>(
    source: &S,
    device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in source.queue_families(device).iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(index);
        }

        if indices.present.is_none() && source.supports_present(device, index)? {
            indices.present = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// A candidate device and the data gathered while scoring it.
#[derive(Clone, Debug)]
pub struct ScoredGpu {
    pub device: vk::PhysicalDevice,
    pub name: String,
    pub indices: QueueFamilyIndices,
    pub swapchain_support: SwapchainSupport,
    pub score: u32,
}

impl ScoredGpu {
    pub fn is_suitable(&self) -> bool {
        self.score != INADEQUATE_GPU_SCORE
    }
}

/// Raw score for a device that passed every requirement.
pub fn device_score(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let mut score: u32 = 0;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_GPU_BONUS;
    }
    score.saturating_add(properties.limits.max_image_dimension_2d)
}

fn has_extensions(available: &[vk::ExtensionProperties]) -> bool {
    let available = available
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();
    DEVICE_EXTENSIONS.iter().all(|e| available.contains(e))
}

pub fn score_physical_device<S: PhysicalDeviceSource>(
    source: &S,
    device: vk::PhysicalDevice,
    required_features: &[DeviceFeature],
) -> Result<ScoredGpu> {
    let properties = source.properties(device);
    let mut scored = ScoredGpu {
        device,
        name: properties.device_name.to_string(),
        indices: find_queue_families(source, device)?,
        swapchain_support: SwapchainSupport::default(),
        score: INADEQUATE_GPU_SCORE,
    };

    if !has_extensions(&source.extensions(device)?) {
        log::warn!("Skipping physical device (`{}`): missing required device extensions.", scored.name);
        return Ok(scored);
    }

    scored.swapchain_support = source.swapchain_support(device)?;
    if !scored.swapchain_support.is_adequate() {
        log::warn!("Skipping physical device (`{}`): insufficient swapchain support.", scored.name);
        return Ok(scored);
    }

    let features = source.features(device);
    if let Some(missing) = required_features
        .iter()
        .find(|f| !f.is_supported(&features))
    {
        log::warn!("Skipping physical device (`{}`): missing feature {:?}.", scored.name, missing);
        return Ok(scored);
    }

    if !scored.indices.is_complete() {
        log::warn!("Skipping physical device (`{}`): missing required queue families.", scored.name);
        return Ok(scored);
    }

    scored.score = device_score(&properties);
    log::info!("Physical device `{}` scored {}.", scored.name, scored.score);
    Ok(scored)
}

/// Scores every enumerated device and returns the best one.
///
/// A device whose queries fail is skipped like any other unsuitable one.
/// Ties go to the device enumerated first.
pub fn pick_physical_device<S: PhysicalDeviceSource>(
    source: &S,
    required_features: &[DeviceFeature],
) -> Result<ScoredGpu> {
    let mut best: Option<ScoredGpu> = None;

    for device in source.physical_devices()? {
        let scored = match score_physical_device(source, device, required_features) {
            Ok(scored) => scored,
            Err(e) => {
                log::warn!("Skipping physical device ({:?}): {:#}", device, e);
                continue;
            }
        };
        if best.as_ref().is_none_or(|b| scored.score > b.score) {
            best = Some(scored);
        }
    }

    match best {
        Some(best) if best.is_suitable() => {
            log::info!("Selected physical device (`{}`).", best.name);
            Ok(best)
        }
        _ => Err(GraphicsError::NoSuitableDevice.into()),
    }
}

/// Queue create entries for `indices`: one per unique family, priority 1.0.
pub fn queue_create_infos(
    indices: &QueueFamilyIndices,
    priorities: &[f32],
) -> Vec<vk::DeviceQueueCreateInfo> {
    indices
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(priorities)
                .build()
        })
        .collect()
}

pub struct LogicalDevice {
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    gpu: &ScoredGpu,
    layers: &[vk::ExtensionName],
    required_features: &[DeviceFeature],
) -> Result<LogicalDevice> {
    let (graphics, present) = gpu
        .indices
        .resolved()
        .ok_or(GraphicsError::NoSuitableDevice)?;

    let queue_priorities = &[1.0];
    let queue_infos = queue_create_infos(&gpu.indices, queue_priorities);

    let layers = layers.iter().map(|l| l.as_ptr()).collect::<Vec<_>>();
    let extensions = DEVICE_EXTENSIONS
        .iter()
        .map(|n| n.as_ptr())
        .collect::<Vec<_>>();
    let features = DeviceFeature::to_vk(required_features);

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance
        .create_device(gpu.device, &info, None)
        .context("failed to create a logical device")?;

    Ok(LogicalDevice {
        graphics_queue: device.get_device_queue(graphics, 0),
        present_queue: device.get_device_queue(present, 0),
        device,
    })
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use vulkanalia::vk::Handle;

    #[derive(Clone, Debug)]
    pub struct MockGpu {
        pub name: &'static str,
        pub device_type: vk::PhysicalDeviceType,
        pub max_image_dimension_2d: u32,
        pub geometry_shader: bool,
        pub has_swapchain_extension: bool,
        pub families: Vec<(vk::QueueFlags, bool)>,
        pub support: SwapchainSupport,
    }

    impl MockGpu {
        pub fn discrete(max_image_dimension_2d: u32) -> Self {
            Self {
                name: "mock discrete",
                device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
                max_image_dimension_2d,
                geometry_shader: true,
                has_swapchain_extension: true,
                families: vec![(vk::QueueFlags::GRAPHICS, true)],
                support: SwapchainSupport {
                    capabilities: vk::SurfaceCapabilitiesKHR {
                        min_image_count: 2,
                        max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
                        ..Default::default()
                    },
                    formats: vec![vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    }],
                    present_modes: vec![vk::PresentModeKHR::FIFO],
                },
            }
        }

        pub fn integrated(max_image_dimension_2d: u32) -> Self {
            Self {
                name: "mock integrated",
                device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
                ..Self::discrete(max_image_dimension_2d)
            }
        }
    }

    #[derive(Default)]
    pub struct MockSource {
        pub gpus: Vec<MockGpu>,
    }

    impl MockSource {
        fn gpu(&self, device: vk::PhysicalDevice) -> &MockGpu {
            &self.gpus[device.as_raw() - 1]
        }
    }

    impl PhysicalDeviceSource for MockSource {
        fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
            Ok((1..=self.gpus.len())
                .map(vk::PhysicalDevice::from_raw)
                .collect())
        }

        fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
            let gpu = self.gpu(device);
            vk::PhysicalDeviceProperties {
                device_type: gpu.device_type,
                device_name: vk::StringArray::from_bytes(gpu.name.as_bytes()),
                limits: vk::PhysicalDeviceLimits {
                    max_image_dimension_2d: gpu.max_image_dimension_2d,
                    ..Default::default()
                },
                ..Default::default()
            }
        }

        fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
            let mut features = vk::PhysicalDeviceFeatures::default();
            if self.gpu(device).geometry_shader {
                features.geometry_shader = vk::TRUE;
            }
            features
        }

        fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
            self.gpu(device)
                .families
                .iter()
                .map(|(flags, _)| vk::QueueFamilyProperties {
                    queue_flags: *flags,
                    queue_count: 1,
                    ..Default::default()
                })
                .collect()
        }

        fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> Result<bool> {
            Ok(self.gpu(device).families[family as usize].1)
        }

        fn extensions(&self, device: vk::PhysicalDevice) -> Result<Vec<vk::ExtensionProperties>> {
            if self.gpu(device).has_swapchain_extension {
                Ok(vec![vk::ExtensionProperties {
                    extension_name: vk::KHR_SWAPCHAIN_EXTENSION.name,
                    spec_version: 70,
                }])
            } else {
                Ok(Vec::new())
            }
        }

        fn swapchain_support(&self, device: vk::PhysicalDevice) -> Result<SwapchainSupport> {
            Ok(self.gpu(device).support.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockGpu, MockSource};
    use super::*;
    use vulkanalia::vk::Handle;

    const GEOMETRY: &[DeviceFeature] = &[DeviceFeature::GeometryShader];

    fn source(gpus: Vec<MockGpu>) -> MockSource {
        MockSource { gpus }
    }

    fn only_device(source: &MockSource) -> vk::PhysicalDevice {
        source.physical_devices().unwrap()[0]
    }

    #[test]
    fn queue_families_first_match_wins() {
        let mut gpu = MockGpu::discrete(4096);
        gpu.families = vec![
            (vk::QueueFlags::TRANSFER, false),
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            (vk::QueueFlags::COMPUTE, true),
        ];
        let source = source(vec![gpu]);

        let indices = find_queue_families(&source, only_device(&source)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert!(indices.is_complete());
    }

    #[test]
    fn queue_families_may_be_incomplete() {
        let mut gpu = MockGpu::discrete(4096);
        gpu.families = vec![(vk::QueueFlags::GRAPHICS, false)];
        let source = source(vec![gpu]);

        let indices = find_queue_families(&source, only_device(&source)).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: Some(0), present: None });
        assert!(!indices.is_complete());
        assert_eq!(indices.resolved(), None);
    }

    #[test]
    fn unique_families_deduplicate() {
        let shared = QueueFamilyIndices { graphics: Some(0), present: Some(0) };
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilyIndices { graphics: Some(2), present: Some(1) };
        assert_eq!(split.unique(), vec![1, 2]);
        assert_eq!(queue_create_infos(&split, &[1.0]).len(), 2);
    }

    #[test]
    fn score_is_discrete_bonus_plus_image_dimension() {
        let source = source(vec![MockGpu::discrete(16384), MockGpu::integrated(8192)]);
        let devices = source.physical_devices().unwrap();

        let discrete = score_physical_device(&source, devices[0], GEOMETRY).unwrap();
        let integrated = score_physical_device(&source, devices[1], GEOMETRY).unwrap();
        assert_eq!(discrete.score, 1000 + 16384);
        assert_eq!(integrated.score, 8192);
    }

    #[test]
    fn discrete_outranks_integrated_within_bonus() {
        let source = source(vec![MockGpu::integrated(4096 + 999), MockGpu::discrete(4096)]);
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.device.as_raw(), 2);
    }

    #[test]
    fn discrete_gpus_ordered_by_image_dimension() {
        let source = source(vec![MockGpu::discrete(8192), MockGpu::discrete(16384)]);
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.device.as_raw(), 2);
        assert_eq!(best.score, 1000 + 16384);
    }

    /// Fails the extension query of one device and forwards the rest.
    struct FailingExtensions {
        inner: MockSource,
        broken: vk::PhysicalDevice,
    }

    impl PhysicalDeviceSource for FailingExtensions {
        fn physical_devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
            self.inner.physical_devices()
        }

        fn properties(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
            self.inner.properties(device)
        }

        fn features(&self, device: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
            self.inner.features(device)
        }

        fn queue_families(&self, device: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
            self.inner.queue_families(device)
        }

        fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> Result<bool> {
            self.inner.supports_present(device, family)
        }

        fn extensions(&self, device: vk::PhysicalDevice) -> Result<Vec<vk::ExtensionProperties>> {
            if device == self.broken {
                return Err(vk::ErrorCode::INITIALIZATION_FAILED.into());
            }
            self.inner.extensions(device)
        }

        fn swapchain_support(&self, device: vk::PhysicalDevice) -> Result<SwapchainSupport> {
            self.inner.swapchain_support(device)
        }
    }

    #[test]
    fn failing_device_query_skips_that_device() {
        let source = FailingExtensions {
            inner: source(vec![MockGpu::integrated(4096), MockGpu::discrete(8192)]),
            broken: vk::PhysicalDevice::from_raw(1),
        };
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.device.as_raw(), 2);
        assert_eq!(best.score, 1000 + 8192);

        let source = FailingExtensions {
            inner: self::source(vec![MockGpu::discrete(8192)]),
            broken: vk::PhysicalDevice::from_raw(1),
        };
        let error = pick_physical_device(&source, GEOMETRY).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::NoSuitableDevice)
        ));
    }

    #[test]
    fn huge_image_dimension_saturates() {
        let source = source(vec![MockGpu::discrete(u32::MAX - 10)]);
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.score, u32::MAX);
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        let source = source(vec![MockGpu::discrete(8192), MockGpu::discrete(8192)]);
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.device.as_raw(), 1);
    }

    #[test]
    fn disqualified_devices_score_zero() {
        let mut no_extension = MockGpu::discrete(16384);
        no_extension.has_swapchain_extension = false;

        let mut no_formats = MockGpu::discrete(16384);
        no_formats.support.formats.clear();

        let mut no_present_modes = MockGpu::discrete(16384);
        no_present_modes.support.present_modes.clear();

        let mut no_present_family = MockGpu::discrete(16384);
        no_present_family.families = vec![(vk::QueueFlags::GRAPHICS, false)];

        let mut no_geometry = MockGpu::discrete(16384);
        no_geometry.geometry_shader = false;

        let source = source(vec![
            no_extension,
            no_formats,
            no_present_modes,
            no_present_family,
            no_geometry,
        ]);

        for device in source.physical_devices().unwrap() {
            let scored = score_physical_device(&source, device, GEOMETRY).unwrap();
            assert_eq!(scored.score, INADEQUATE_GPU_SCORE, "device {}", device.as_raw());
            assert!(!scored.is_suitable());
        }
    }

    #[test]
    fn disqualified_devices_never_win() {
        let mut big_but_broken = MockGpu::discrete(32768);
        big_but_broken.has_swapchain_extension = false;

        let source = source(vec![big_but_broken, MockGpu::integrated(1)]);
        let best = pick_physical_device(&source, GEOMETRY).unwrap();
        assert_eq!(best.device.as_raw(), 2);
    }

    #[test]
    fn required_features_are_configurable() {
        let mut gpu = MockGpu::discrete(4096);
        gpu.geometry_shader = false;
        let source = source(vec![gpu]);

        assert!(pick_physical_device(&source, GEOMETRY).is_err());
        assert!(pick_physical_device(&source, &[]).is_ok());
    }

    #[test]
    fn no_suitable_device_is_typed() {
        let empty = MockSource::default();
        let error = pick_physical_device(&empty, GEOMETRY).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::NoSuitableDevice)
        ));
    }
}
