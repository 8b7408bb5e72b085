use std::env;

use vulkanalia::vk;

/// Optimization level handed to the shader compiler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShaderOptimization {
    None,
    Performance,
}

impl ShaderOptimization {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "zero" => Some(Self::None),
            "performance" | "perf" => Some(Self::Performance),
            _ => None,
        }
    }
}

/// A physical-device feature that must be present for a GPU to be considered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceFeature {
    GeometryShader,
    TessellationShader,
    SamplerAnisotropy,
    FillModeNonSolid,
    WideLines,
    MultiViewport,
}

impl DeviceFeature {
    pub fn is_supported(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let flag = match self {
            Self::GeometryShader => features.geometry_shader,
            Self::TessellationShader => features.tessellation_shader,
            Self::SamplerAnisotropy => features.sampler_anisotropy,
            Self::FillModeNonSolid => features.fill_mode_non_solid,
            Self::WideLines => features.wide_lines,
            Self::MultiViewport => features.multi_viewport,
        };
        flag == vk::TRUE
    }

    fn enable(self, features: &mut vk::PhysicalDeviceFeatures) {
        let flag = match self {
            Self::GeometryShader => &mut features.geometry_shader,
            Self::TessellationShader => &mut features.tessellation_shader,
            Self::SamplerAnisotropy => &mut features.sampler_anisotropy,
            Self::FillModeNonSolid => &mut features.fill_mode_non_solid,
            Self::WideLines => &mut features.wide_lines,
            Self::MultiViewport => &mut features.multi_viewport,
        };
        *flag = vk::TRUE;
    }

    /// Builds the feature struct enabling exactly `required`.
    pub fn to_vk(required: &[DeviceFeature]) -> vk::PhysicalDeviceFeatures {
        let mut features = vk::PhysicalDeviceFeatures::default();
        for feature in required {
            feature.enable(&mut features);
        }
        features
    }
}

/// Renderer settings. Defaults follow the build profile.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub application_name: String,
    pub enable_validation: bool,
    pub shader_optimization: ShaderOptimization,
    pub required_features: Vec<DeviceFeature>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let debug = cfg!(debug_assertions);
        Self {
            application_name: "MineClone".to_string(),
            enable_validation: debug,
            shader_optimization: if debug {
                ShaderOptimization::None
            } else {
                ShaderOptimization::Performance
            },
            required_features: vec![DeviceFeature::GeometryShader],
        }
    }
}

impl RendererConfig {
    pub const VALIDATION_VAR: &'static str = "MINECLONE_VALIDATION";
    pub const SHADER_OPT_VAR: &'static str = "MINECLONE_SHADER_OPT";

    /// Default configuration with `MINECLONE_VALIDATION` / `MINECLONE_SHADER_OPT` overrides.
    pub fn from_env() -> Self {
        let validation = env::var(Self::VALIDATION_VAR).ok();
        let shader_opt = env::var(Self::SHADER_OPT_VAR).ok();
        Self::default().with_overrides(validation.as_deref(), shader_opt.as_deref())
    }

    fn with_overrides(mut self, validation: Option<&str>, shader_opt: Option<&str>) -> Self {
        if let Some(value) = validation {
            match parse_switch(value) {
                Some(enabled) => self.enable_validation = enabled,
                None => log::warn!("Ignoring {}={value:?}", Self::VALIDATION_VAR),
            }
        }

        if let Some(value) = shader_opt {
            match ShaderOptimization::parse(value) {
                Some(level) => self.shader_optimization = level,
                None => log::warn!("Ignoring {}={value:?}", Self::SHADER_OPT_VAR),
            }
        }

        self
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_follows_build_profile() {
        let config = RendererConfig::default();
        assert_eq!(config.enable_validation, cfg!(debug_assertions));
        assert_eq!(config.required_features, vec![DeviceFeature::GeometryShader]);
        if cfg!(debug_assertions) {
            assert_eq!(config.shader_optimization, ShaderOptimization::None);
        } else {
            assert_eq!(config.shader_optimization, ShaderOptimization::Performance);
        }
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let config = RendererConfig::default().with_overrides(Some("off"), Some("performance"));
        assert!(!config.enable_validation);
        assert_eq!(config.shader_optimization, ShaderOptimization::Performance);

        let base = RendererConfig::default();
        let config = RendererConfig::default().with_overrides(Some("maybe"), Some("ultra"));
        assert_eq!(config.enable_validation, base.enable_validation);
        assert_eq!(config.shader_optimization, base.shader_optimization);
    }

    #[test]
    fn required_features_enable_only_what_is_listed() {
        let features =
            DeviceFeature::to_vk(&[DeviceFeature::GeometryShader, DeviceFeature::WideLines]);
        assert_eq!(features.geometry_shader, vk::TRUE);
        assert_eq!(features.wide_lines, vk::TRUE);
        assert_eq!(features.tessellation_shader, vk::FALSE);
        assert!(DeviceFeature::GeometryShader.is_supported(&features));
        assert!(!DeviceFeature::SamplerAnisotropy.is_supported(&features));
    }
}
