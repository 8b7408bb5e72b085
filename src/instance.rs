use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::os::raw::c_void;

use anyhow::{Context, Result, anyhow};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtension;
use vulkanalia::window as vk_window;

use crate::config::RendererConfig;
use crate::error::GraphicsError;
use crate::window::RenderWindow;

pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

/// Enabled alongside validation when the loader has it.
pub const MONITOR_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_LUNARG_monitor");

/// An instance together with what was negotiated while creating it.
pub struct CreatedInstance {
    pub instance: Instance,
    pub layers: Vec<vk::ExtensionName>,
    pub extensions: Vec<vk::ExtensionProperties>,
}

/// Picks the layers to enable: the validation layer is mandatory, the
/// monitor layer is added only when present.
pub fn select_layers(available: &[vk::ExtensionName]) -> Result<Vec<vk::ExtensionName>> {
    let available = available.iter().collect::<HashSet<_>>();

    if !available.contains(&VALIDATION_LAYER) {
        return Err(GraphicsError::MissingValidationLayer(VALIDATION_LAYER.to_string()).into());
    }

    let mut layers = vec![VALIDATION_LAYER];
    if available.contains(&MONITOR_LAYER) {
        layers.push(MONITOR_LAYER);
    }
    Ok(layers)
}

pub unsafe fn create_instance<W: RenderWindow>(
    entry: &Entry,
    window: &W,
    config: &RendererConfig,
) -> Result<CreatedInstance> {
    log::info!("Vulkan loader version: {}", entry.version()?);

    let available_extensions = entry.enumerate_instance_extension_properties(None)?;
    for extension in &available_extensions {
        log::debug!("Instance extension: {}", extension.extension_name);
    }

    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| **e)
        .collect::<Vec<_>>();

    let mut layers = Vec::new();
    if config.enable_validation {
        let available_layers = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<Vec<_>>();
        layers = select_layers(&available_layers)?;

        let debug_utils = vk::EXT_DEBUG_UTILS_EXTENSION.name;
        if !available_extensions
            .iter()
            .any(|e| e.extension_name == debug_utils)
        {
            return Err(GraphicsError::MissingInstanceExtension(debug_utils.to_string()).into());
        }
        extensions.push(debug_utils);
    }

    let application_name = CString::new(config.application_name.as_str())
        .map_err(|_| anyhow!("Application name contains a NUL byte."))?;

    let application_info = vk::ApplicationInfo::builder()
        .application_name(application_name.as_bytes_with_nul())
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"No Engine\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    let layer_names = layers.iter().map(|l| l.as_ptr()).collect::<Vec<_>>();
    let extension_names = extensions.iter().map(|e| e.as_ptr()).collect::<Vec<_>>();

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layer_names)
        .enabled_extension_names(&extension_names);

    let instance = entry
        .create_instance(&info, None)
        .context("vkCreateInstance failed")?;

    Ok(CreatedInstance {
        instance,
        layers,
        extensions: available_extensions,
    })
}

pub unsafe fn create_debug_messenger(instance: &Instance) -> Result<vk::DebugUtilsMessengerEXT> {
    let info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback));

    instance
        .create_debug_utils_messenger_ext(&info, None)
        .context("failed to set up debug callback")
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        log::debug!("({:?}) {}", type_, message);
    } else {
        log::trace!("({:?}) {}", type_, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_layer_is_required() {
        let error = select_layers(&[MONITOR_LAYER]).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::MissingValidationLayer(_))
        ));
    }

    #[test]
    fn monitor_layer_is_optional() {
        assert_eq!(select_layers(&[VALIDATION_LAYER]).unwrap(), vec![VALIDATION_LAYER]);
        assert_eq!(
            select_layers(&[MONITOR_LAYER, VALIDATION_LAYER]).unwrap(),
            vec![VALIDATION_LAYER, MONITOR_LAYER]
        );
    }
}
