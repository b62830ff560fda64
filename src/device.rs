//! Compute-backend detection
//!
//! Picks the device hint exported to tool subprocesses. Explicit choices win;
//! auto-detection prefers MPS on macOS, then CUDA when `nvidia-smi` is
//! reachable, then CPU.

use serde::{Deserialize, Serialize};

/// Outcome of a device-selection decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeBackend {
    /// Chosen device: cpu, cuda, or mps
    pub device: String,
    /// "explicit" when selected by flag, "auto" otherwise
    pub source: String,
    /// Human-readable reason for the decision
    pub reason: String,
}

/// Resolve the compute backend from a preference string
pub fn detect_compute_backend(preferred: &str) -> ComputeBackend {
    let value = preferred.trim().to_lowercase();
    if matches!(value.as_str(), "cpu" | "cuda" | "mps") {
        return ComputeBackend {
            device: value,
            source: "explicit".to_string(),
            reason: "Selected by --device option".to_string(),
        };
    }

    if std::env::consts::OS == "macos" {
        return ComputeBackend {
            device: "mps".to_string(),
            source: "auto".to_string(),
            reason: "Detected macOS host; using MPS preference".to_string(),
        };
    }

    if which::which("nvidia-smi").is_ok() {
        return ComputeBackend {
            device: "cuda".to_string(),
            source: "auto".to_string(),
            reason: "Detected NVIDIA GPU via nvidia-smi".to_string(),
        };
    }

    ComputeBackend {
        device: "cpu".to_string(),
        source: "auto".to_string(),
        reason: "No supported GPU backend detected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_choice_wins() {
        let backend = detect_compute_backend("cuda");
        assert_eq!(backend.device, "cuda");
        assert_eq!(backend.source, "explicit");
    }

    #[test]
    fn explicit_choice_is_case_insensitive() {
        let backend = detect_compute_backend("  MPS ");
        assert_eq!(backend.device, "mps");
        assert_eq!(backend.source, "explicit");
    }

    #[test]
    fn auto_resolves_to_known_device() {
        let backend = detect_compute_backend("auto");
        assert_eq!(backend.source, "auto");
        assert!(matches!(backend.device.as_str(), "cpu" | "cuda" | "mps"));
    }
}
