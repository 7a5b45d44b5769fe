//! Execution-device selection.

use candle_core::Device;

use crate::classifier::ClassifierError;

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> ClassifierError {
    ClassifierError::Configuration(
        "CUDA support not enabled. Compile with --features cuda".to_string(),
    )
}

/// Parses a device string and creates a candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N
///
/// # Errors
///
/// `ClassifierError::Configuration` if the string is not recognized, CUDA is
/// requested without the `cuda` feature, or device creation fails.
pub fn parse_device(device_str: &str) -> Result<Device, ClassifierError> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| {
                    ClassifierError::Configuration(format!("failed to create CUDA device: {}", e))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal: usize = s.strip_prefix("cuda:").unwrap().parse().map_err(|_| {
                    ClassifierError::Configuration(format!(
                        "invalid CUDA device ordinal in '{}'",
                        s
                    ))
                })?;
                Device::new_cuda(ordinal).map_err(|e| {
                    ClassifierError::Configuration(format!(
                        "failed to create CUDA device {}: {}",
                        ordinal, e
                    ))
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        _ => Err(ClassifierError::Configuration(format!(
            "unknown device: '{}'. Use 'cpu', 'cuda', or 'cuda:N'",
            device_str
        ))),
    }
}
