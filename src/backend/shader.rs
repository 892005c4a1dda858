// Shader module loading
//
// Vulkan consumes SPIR-V words. Files are read at pipeline creation time and
// every stage uses `main` as its entry point.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use super::error::RenderError;
use super::VulkanDevice;

pub const ENTRY_POINT: &CStr = c"main";

/// Read a SPIR-V file into 32-bit words
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;
    if bytes.is_empty() {
        return Err(RenderError::EmptyShader(path.display().to_string()).into());
    }
    parse_spirv(&bytes).with_context(|| format!("Invalid shader {}", path.display()))
}

/// Decode SPIR-V bytes; rejects empty input
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        return Err(RenderError::EmptyShader(String::from("bytecode")).into());
    }
    // read_spv checks alignment, length and the magic number
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V")?;
    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn empty_input_is_rejected() {
        let err = parse_spirv(&[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RenderError>(),
            Some(RenderError::EmptyShader(_))
        ));
    }

    #[test]
    fn words_are_decoded_little_endian() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn truncated_word_is_rejected() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_spirv(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("does/not/exist.spv"));
    }

    #[test]
    fn entry_point_is_main() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
