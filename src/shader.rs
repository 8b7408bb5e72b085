use anyhow::{Context, Result};
use shaderc::ShaderKind;
use vulkanalia::prelude::v1_0::*;

use crate::config::ShaderOptimization;
use crate::error::GraphicsError;
use crate::handle;

/// GLSL source embedded in the binary, keyed by a logical name and stage.
#[derive(Copy, Clone, Debug)]
pub struct ShaderSource {
    pub name: &'static str,
    pub kind: ShaderKind,
    pub source: &'static str,
}

pub const TRIANGLE_VERTEX: ShaderSource = ShaderSource {
    name: "triangle.vert",
    kind: ShaderKind::Vertex,
    source: include_str!("../shaders/triangle.vert"),
};

pub const TRIANGLE_FRAGMENT: ShaderSource = ShaderSource {
    name: "triangle.frag",
    kind: ShaderKind::Fragment,
    source: include_str!("../shaders/triangle.frag"),
};

/// SPIR-V produced by [`ShaderCompiler::compile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledShader {
    pub name: String,
    pub kind: ShaderKind,
    pub code: Vec<u32>,
}

pub struct ShaderCompiler {
    compiler: shaderc::Compiler,
    options: shaderc::CompileOptions<'static>,
}

impl ShaderCompiler {
    pub fn new(optimization: ShaderOptimization) -> Result<Self> {
        let compiler = shaderc::Compiler::new().context("shaderc is not available")?;
        let mut options = shaderc::CompileOptions::new().context("shaderc is not available")?;
        if optimization == ShaderOptimization::Performance {
            options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        }
        Ok(Self { compiler, options })
    }

    pub fn compile(&self, source: &str, name: &str, kind: ShaderKind) -> Result<CompiledShader> {
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&self.options))
            .map_err(|error| GraphicsError::ShaderCompilation {
                name: name.to_string(),
                message: match error {
                    shaderc::Error::CompilationError(_, message) => message,
                    other => other.to_string(),
                },
            })?;

        if artifact.get_num_warnings() > 0 {
            log::warn!("{}: {}", name, artifact.get_warning_messages());
        }

        Ok(CompiledShader {
            name: name.to_string(),
            kind,
            code: artifact.as_binary().to_vec(),
        })
    }

    pub fn compile_source(&self, source: &ShaderSource) -> Result<CompiledShader> {
        self.compile(source.source, source.name, source.kind)
    }
}

/// Pipeline stage for a shader kind. Only vertex and fragment shaders are
/// wired into the pipeline.
pub fn stage_flags(kind: ShaderKind) -> Result<vk::ShaderStageFlags> {
    match kind {
        ShaderKind::Vertex => Ok(vk::ShaderStageFlags::VERTEX),
        ShaderKind::Fragment => Ok(vk::ShaderStageFlags::FRAGMENT),
        other => Err(GraphicsError::UnknownShaderStage(other).into()),
    }
}

/// A device-resident shader module, destroyed on drop.
pub struct ShaderModule<'a> {
    device: &'a Device,
    kind: ShaderKind,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    pub unsafe fn new(device: &'a Device, shader: &CompiledShader) -> Result<Self> {
        let info = vk::ShaderModuleCreateInfo::builder()
            .code_size(std::mem::size_of_val(shader.code.as_slice()))
            .code(&shader.code);

        let module = device
            .create_shader_module(&info, None)
            .with_context(|| format!("failed to create shader module `{}`", shader.name))?;

        Ok(Self {
            device,
            kind: shader.kind,
            module,
        })
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Stage descriptor for pipeline creation, entry point `main`.
    pub fn stage_info(&self) -> Result<vk::PipelineShaderStageCreateInfo> {
        Ok(vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage_flags(self.kind)?)
            .module(self.module)
            .name(b"main\0")
            .build())
    }

    pub fn destroy(&mut self) {
        if let Some(module) = handle::take(&mut self.module) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn stage_flags_cover_vertex_and_fragment_only() {
        assert_eq!(stage_flags(ShaderKind::Vertex).unwrap(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(stage_flags(ShaderKind::Fragment).unwrap(), vk::ShaderStageFlags::FRAGMENT);

        let error = stage_flags(ShaderKind::Compute).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<GraphicsError>(),
            Some(GraphicsError::UnknownShaderStage(ShaderKind::Compute))
        ));
    }

    #[test]
    fn embedded_shaders_compile() {
        for optimization in [ShaderOptimization::None, ShaderOptimization::Performance] {
            let compiler = ShaderCompiler::new(optimization).unwrap();
            for source in [TRIANGLE_VERTEX, TRIANGLE_FRAGMENT] {
                let compiled = compiler.compile_source(&source).unwrap();
                assert_eq!(compiled.name, source.name);
                assert_eq!(compiled.kind, source.kind);
                assert_eq!(compiled.code.first(), Some(&SPIRV_MAGIC));
            }
        }
    }

    #[test]
    fn compile_failure_carries_diagnostics() {
        let compiler = ShaderCompiler::new(ShaderOptimization::None).unwrap();
        let error = compiler
            .compile("#version 450\nvoid main() { undefined_call(); }\n", "broken.frag", ShaderKind::Fragment)
            .unwrap_err();

        match error.downcast_ref::<GraphicsError>() {
            Some(GraphicsError::ShaderCompilation { name, message }) => {
                assert_eq!(name, "broken.frag");
                assert!(message.contains("undefined_call"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
