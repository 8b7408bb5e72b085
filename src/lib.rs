//! Vulkan device bootstrap and double-buffered present loop for the MineClone client.
//!
//! [`DeviceContext`] owns every device-level handle and drives the per-frame
//! render loop. The negotiation logic (device scoring, swap-chain policies)
//! is written against plain data so it can run without a GPU.

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod handle;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod window;

pub use config::{DeviceFeature, RendererConfig, ShaderOptimization};
pub use context::DeviceContext;
pub use error::GraphicsError;
pub use frame::{FrameCycle, FrameState, InFlightFrameData, MAX_FRAMES_IN_FLIGHT};
pub use swapchain::{SurfaceStatus, SwapChain, SwapchainPlan};
pub use window::RenderWindow;
